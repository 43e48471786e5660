//! Thin SQL parsing facade over `sqlparser`.

use quarry_common::{QuarryError, Result};
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

pub fn parse_sql(sql: &str) -> Result<Vec<Statement>> {
    let dialect = GenericDialect {};
    Parser::parse_sql(&dialect, sql).map_err(|e| QuarryError::Planning(e.to_string()))
}

/// Parse exactly one statement.
pub fn parse_statement(sql: &str) -> Result<Statement> {
    let mut stmts = parse_sql(sql)?;
    if stmts.len() != 1 {
        return Err(QuarryError::Unsupported(format!(
            "expected a single SQL statement, found {}",
            stmts.len()
        )));
    }
    Ok(stmts.remove(0))
}

#[cfg(test)]
mod tests {
    use super::{parse_sql, parse_statement};

    #[test]
    fn parse_error_is_planning_error() {
        let err = parse_sql("SELEC 1").expect_err("must fail");
        assert!(err.to_string().contains("planning error"), "err={err}");
    }

    #[test]
    fn parse_statement_rejects_multiple() {
        let err = parse_statement("SELECT 1; SELECT 2").expect_err("must fail");
        assert!(err.to_string().contains("single SQL statement"), "err={err}");
    }
}
