//! Completion hints and qualified-name lookup for editors.

use std::collections::BTreeSet;

use quarry_common::{NodeId, QuarryError, Result};
use tracing::debug;

use crate::ast::{walk_statement, AstVisitor, Expr, ExprKind, FromItem, FromKind, Statement};
use crate::moniker::{Moniker, MonikerKind};
use crate::sql_frontend::sql_to_statement;

use super::{rewrite, Resolution, SqlValidator};

/// Marker spliced into SQL text at the cursor position.
pub const HINT_TOKEN: &str = "_suggest_";

/// Node found by id or by the hint marker.
enum Found<'a> {
    Expr(&'a Expr),
    From(&'a FromItem),
}

struct NodeFinder<'a> {
    target: Option<NodeId>,
    found: Option<Found<'a>>,
}

impl<'a> NodeFinder<'a> {
    fn matches(&self, id: NodeId, names: Option<&[String]>) -> bool {
        match self.target {
            Some(target) => target == id,
            None => names.is_some_and(|n| n.iter().any(|p| p.contains(HINT_TOKEN))),
        }
    }
}

impl<'a> AstVisitor<'a> for NodeFinder<'a> {
    fn expr(&mut self, expr: &'a Expr) {
        if self.found.is_none() && self.matches(expr.id, expr.identifier()) {
            self.found = Some(Found::Expr(expr));
        }
    }

    fn from_item(&mut self, item: &'a FromItem) {
        let names = match &item.kind {
            FromKind::Table(names) => Some(names.as_slice()),
            _ => None,
        };
        if self.found.is_none() && self.matches(item.id, names) {
            self.found = Some(Found::From(item));
        }
    }
}

fn find_node(stmt: &Statement, target: Option<NodeId>) -> Option<Found<'_>> {
    let mut finder = NodeFinder {
        target,
        found: None,
    };
    walk_statement(stmt, &mut finder);
    finder.found
}

/// Split a partially typed name into its complete prefix and the text typed
/// so far of its last part.
fn split_hint(names: &[String]) -> (&[String], String) {
    match names.split_last() {
        Some((last, prefix)) => {
            let partial = last.split(HINT_TOKEN).next().unwrap_or_default();
            (prefix, partial.to_string())
        }
        None => (names, String::new()),
    }
}

fn starts_with_ignore_case(name: &str, partial: &str) -> bool {
    name.len() >= partial.len()
        && name
            .get(..partial.len())
            .is_some_and(|p| p.eq_ignore_ascii_case(partial))
}

impl SqlValidator {
    /// Completion candidates for the name at `node`.
    ///
    /// The statement is validated on a best-effort basis first; validation
    /// errors elsewhere in it do not prevent hints.
    pub fn lookup_hints(&mut self, stmt: Statement, node: NodeId) -> Vec<Moniker> {
        let stmt = rewrite::rewrite_statement(stmt);
        if let Err(e) = self.validate_rewritten(&stmt) {
            debug!(error = %e, "statement incomplete while computing hints");
        }
        match find_node(&stmt, Some(node)) {
            Some(Found::Expr(expr)) => self.identifier_hints(expr),
            Some(Found::From(item)) => self.table_hints(item),
            None => vec![],
        }
    }

    /// Completion candidates at byte offset `cursor` of `sql`.
    pub fn lookup_hints_at(&mut self, sql: &str, cursor: usize) -> Result<Vec<Moniker>> {
        if !sql.is_char_boundary(cursor) {
            return Err(QuarryError::Planning(format!(
                "cursor {cursor} is not a character boundary"
            )));
        }
        let marked = format!("{}{HINT_TOKEN}{}", &sql[..cursor], &sql[cursor..]);
        let stmt = sql_to_statement(&marked)?;
        let node = match find_node(&stmt, None) {
            Some(Found::Expr(e)) => e.id,
            Some(Found::From(f)) => f.id,
            None => return Ok(vec![]),
        };
        Ok(self.lookup_hints(stmt, node))
    }

    /// Fully qualified name of the column or table at `node` of a statement
    /// this validator has validated.
    pub fn lookup_qualified_name(&self, stmt: &Statement, node: NodeId) -> Option<Moniker> {
        match find_node(stmt, Some(node))? {
            Found::Expr(_) => match self.resolutions.get(&node)? {
                Resolution::Column {
                    namespace, path, ..
                } => {
                    let mut names = match self.ns(*namespace).table() {
                        Some(table) => table.qualified_name(),
                        None => vec![],
                    };
                    names.extend(path.iter().cloned());
                    Some(Moniker::new(MonikerKind::Column, names))
                }
                Resolution::SelectAlias { .. } => self
                    .get_qualified_identifier(node)
                    .map(|names| Moniker::new(MonikerKind::Column, names)),
            },
            Found::From(item) => {
                let ns = self.node_namespaces.get(&item.id)?;
                let table = self.ns(*ns).table()?;
                Some(Moniker::new(MonikerKind::Table, table.qualified_name()))
            }
        }
    }

    fn table_hints(&self, item: &FromItem) -> Vec<Moniker> {
        let FromKind::Table(names) = &item.kind else {
            return vec![];
        };
        let (prefix, partial) = split_hint(names);
        self.catalog
            .get_all_schema_object_names(prefix)
            .into_iter()
            .filter(|m| starts_with_ignore_case(m.name(), &partial))
            .collect()
    }

    fn identifier_hints(&mut self, expr: &Expr) -> Vec<Moniker> {
        let ExprKind::Identifier(names) = &expr.kind else {
            return vec![];
        };
        let Some(scope) = self.expr_scopes.get(&expr.id).copied() else {
            return vec![];
        };
        let (prefix, partial) = split_hint(names);
        let mut out = vec![];
        if prefix.is_empty() {
            let columns = self.visible_columns(scope);
            let mut aliases = BTreeSet::new();
            let mut seen = BTreeSet::new();
            for (alias, column) in columns {
                if seen.insert(column.to_ascii_lowercase()) {
                    out.push(Moniker::new(MonikerKind::Column, vec![column]));
                }
                if !alias.is_empty() {
                    aliases.insert(alias);
                }
            }
            out.extend(
                aliases
                    .into_iter()
                    .map(|a| Moniker::simple(MonikerKind::Table, a)),
            );
            out.extend(
                self.operators
                    .function_names()
                    .into_iter()
                    .map(|f| Moniker::simple(MonikerKind::Function, f)),
            );
        } else if let Some((_, child)) = self.resolve_table(scope, prefix) {
            if let Ok(row_type) = self.namespace_row_type(child.namespace) {
                out.extend(row_type.field_names().into_iter().map(|f| {
                    Moniker::new(MonikerKind::Column, vec![child.alias.clone(), f])
                }));
            }
        }
        out.retain(|m| starts_with_ignore_case(m.name(), &partial));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::{split_hint, starts_with_ignore_case, HINT_TOKEN};

    #[test]
    fn split_hint_separates_typed_prefix() {
        let names = vec!["e".to_string(), format!("sa{HINT_TOKEN}")];
        let (prefix, partial) = split_hint(&names);
        assert_eq!(prefix, ["e".to_string()]);
        assert_eq!(partial, "sa");
    }

    #[test]
    fn prefix_match_ignores_case() {
        assert!(starts_with_ignore_case("SAL", "sa"));
        assert!(starts_with_ignore_case("anything", ""));
        assert!(!starts_with_ignore_case("s", "sal"));
    }
}
