use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use arrow_schema::{DataType, Field};

use crate::types::{
    comparable, is_character, is_numeric, least_restrictive, ColumnType, RowType,
};

/// An operator or function the validator can type-check.
///
/// This core never evaluates operators; it only asks them for types.
pub trait SqlOperator: fmt::Debug + Send + Sync {
    /// Upper-case name used for lookup.
    fn name(&self) -> &str;

    /// Accepted operand counts, inclusive.
    fn arity(&self) -> (usize, usize);

    fn is_aggregator(&self) -> bool {
        false
    }

    /// Only legal with an OVER clause (e.g. `ROW_NUMBER`).
    fn requires_over(&self) -> bool {
        false
    }

    /// Window must specify ORDER BY (e.g. `RANK`).
    fn requires_order(&self) -> bool {
        false
    }

    /// Usable in FROM; the return type is then a struct describing the row.
    fn is_table_function(&self) -> bool {
        false
    }

    /// Result type for the given operand types; `None` when the operator
    /// cannot be applied to them.
    fn return_type(&self, operands: &[ColumnType]) -> Option<ColumnType>;

    /// Types to assign to operands whose type is unknown (`NULL`, `?`).
    ///
    /// The default gives every unknown operand the type of the first known one.
    fn infer_operand_types(
        &self,
        known: &[Option<ColumnType>],
        _return_hint: Option<&ColumnType>,
    ) -> Vec<Option<ColumnType>> {
        let first = known.iter().flatten().next().cloned();
        known
            .iter()
            .map(|k| k.clone().or_else(|| first.clone().map(|t| t.with_nullable(true))))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuiltinKind {
    Comparison,
    NullSafeComparison,
    Logical,
    Not,
    NullTest,
    BooleanTest,
    Like,
    Between,
    Arithmetic,
    Negate,
    Concat,
    Count,
    Sum,
    MinMax,
    Avg,
    SingleValue,
    RowNumber,
    Rank,
    Coalesce,
    CaseFold,
    CharLength,
    Ramp,
}

/// Built-in operator described by its kind.
#[derive(Debug, Clone)]
pub struct BuiltinOperator {
    name: String,
    kind: BuiltinKind,
    arity: (usize, usize),
}

impl BuiltinOperator {
    fn new(name: &str, kind: BuiltinKind, arity: (usize, usize)) -> Self {
        Self {
            name: name.to_string(),
            kind,
            arity,
        }
    }
}

fn any_nullable(operands: &[ColumnType]) -> bool {
    operands.iter().any(|o| o.nullable)
}

fn is_null_type(t: &ColumnType) -> bool {
    t.data_type == DataType::Null
}

impl SqlOperator for BuiltinOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn arity(&self) -> (usize, usize) {
        self.arity
    }

    fn is_aggregator(&self) -> bool {
        matches!(
            self.kind,
            BuiltinKind::Count
                | BuiltinKind::Sum
                | BuiltinKind::MinMax
                | BuiltinKind::Avg
                | BuiltinKind::SingleValue
        )
    }

    fn requires_over(&self) -> bool {
        matches!(self.kind, BuiltinKind::RowNumber | BuiltinKind::Rank)
    }

    fn requires_order(&self) -> bool {
        self.kind == BuiltinKind::Rank
    }

    fn is_table_function(&self) -> bool {
        self.kind == BuiltinKind::Ramp
    }

    fn return_type(&self, operands: &[ColumnType]) -> Option<ColumnType> {
        let nullable = any_nullable(operands);
        match self.kind {
            BuiltinKind::Comparison => {
                let ok = operands
                    .windows(2)
                    .all(|w| comparable(&w[0].data_type, &w[1].data_type));
                ok.then(|| ColumnType::boolean(nullable))
            }
            BuiltinKind::NullSafeComparison => {
                comparable(&operands[0].data_type, &operands[1].data_type)
                    .then(|| ColumnType::boolean(false))
            }
            BuiltinKind::Logical | BuiltinKind::Not => operands
                .iter()
                .all(ColumnType::is_boolean)
                .then(|| ColumnType::boolean(nullable)),
            BuiltinKind::NullTest => Some(ColumnType::boolean(false)),
            BuiltinKind::BooleanTest => operands[0]
                .is_boolean()
                .then(|| ColumnType::boolean(false)),
            BuiltinKind::Like => operands
                .iter()
                .all(|o| is_character(&o.data_type) || is_null_type(o))
                .then(|| ColumnType::boolean(nullable)),
            BuiltinKind::Between => {
                let ok = comparable(&operands[0].data_type, &operands[1].data_type)
                    && comparable(&operands[0].data_type, &operands[2].data_type);
                ok.then(|| ColumnType::boolean(nullable))
            }
            BuiltinKind::Arithmetic => {
                if !operands
                    .iter()
                    .all(|o| is_numeric(&o.data_type) || is_null_type(o))
                {
                    return None;
                }
                least_restrictive(operands).map(|t| t.with_nullable(nullable))
            }
            BuiltinKind::Negate => {
                (is_numeric(&operands[0].data_type)).then(|| operands[0].clone())
            }
            BuiltinKind::Concat => operands
                .iter()
                .all(|o| is_character(&o.data_type) || is_null_type(o))
                .then(|| ColumnType::new(DataType::Utf8, nullable)),
            BuiltinKind::Count => Some(ColumnType::not_null(DataType::Int64)),
            BuiltinKind::Sum => {
                let t = &operands[0].data_type;
                if !is_numeric(t) {
                    return None;
                }
                let dt = match t {
                    DataType::Float32 | DataType::Float64 => DataType::Float64,
                    DataType::Decimal128(_, s) => DataType::Decimal128(38, *s),
                    _ => DataType::Int64,
                };
                Some(ColumnType::nullable(dt))
            }
            BuiltinKind::Avg => is_numeric(&operands[0].data_type)
                .then(|| operands[0].clone().with_nullable(true)),
            BuiltinKind::MinMax | BuiltinKind::SingleValue => {
                Some(operands[0].clone().with_nullable(true))
            }
            BuiltinKind::RowNumber | BuiltinKind::Rank => {
                Some(ColumnType::not_null(DataType::Int64))
            }
            BuiltinKind::Coalesce => {
                let t = least_restrictive(operands)?;
                let nullable = operands.iter().all(|o| o.nullable);
                Some(t.with_nullable(nullable))
            }
            BuiltinKind::CaseFold => is_character(&operands[0].data_type)
                .then(|| ColumnType::new(DataType::Utf8, nullable)),
            BuiltinKind::CharLength => is_character(&operands[0].data_type)
                .then(|| ColumnType::new(DataType::Int32, nullable)),
            BuiltinKind::Ramp => is_numeric(&operands[0].data_type).then(|| {
                ColumnType::not_null(
                    RowType::new(vec![Field::new("i", DataType::Int32, false)]).as_struct(),
                )
            }),
        }
    }

    fn infer_operand_types(
        &self,
        known: &[Option<ColumnType>],
        return_hint: Option<&ColumnType>,
    ) -> Vec<Option<ColumnType>> {
        match self.kind {
            BuiltinKind::Logical | BuiltinKind::Not | BuiltinKind::BooleanTest => known
                .iter()
                .map(|k| k.clone().or(Some(ColumnType::boolean(true))))
                .collect(),
            BuiltinKind::Like | BuiltinKind::Concat => known
                .iter()
                .map(|k| k.clone().or(Some(ColumnType::nullable(DataType::Utf8))))
                .collect(),
            BuiltinKind::Coalesce if known.iter().all(Option::is_none) => known
                .iter()
                .map(|_| return_hint.cloned().map(|t| t.with_nullable(true)))
                .collect(),
            _ => {
                let first = known.iter().flatten().next().cloned();
                known
                    .iter()
                    .map(|k| {
                        k.clone()
                            .or_else(|| first.clone().map(|t| t.with_nullable(true)))
                    })
                    .collect()
            }
        }
    }
}

/// Registry of operators keyed by upper-case name.
pub struct OperatorTable {
    operators: RwLock<HashMap<String, Arc<dyn SqlOperator>>>,
}

impl fmt::Debug for OperatorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .operators
            .read()
            .map(|m| m.len())
            .unwrap_or_default();
        f.debug_struct("OperatorTable")
            .field("operators", &count)
            .finish()
    }
}

impl Default for OperatorTable {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl OperatorTable {
    /// An empty table.
    pub fn empty() -> Self {
        Self {
            operators: RwLock::new(HashMap::new()),
        }
    }

    /// A table holding the standard operators.
    pub fn with_builtins() -> Self {
        use BuiltinKind::*;
        let table = Self::empty();
        let builtins = [
            ("=", Comparison, (2, 2)),
            ("<>", Comparison, (2, 2)),
            ("<", Comparison, (2, 2)),
            ("<=", Comparison, (2, 2)),
            (">", Comparison, (2, 2)),
            (">=", Comparison, (2, 2)),
            ("IS DISTINCT FROM", NullSafeComparison, (2, 2)),
            ("IS NOT DISTINCT FROM", NullSafeComparison, (2, 2)),
            ("AND", Logical, (2, 2)),
            ("OR", Logical, (2, 2)),
            ("NOT", Not, (1, 1)),
            ("IS NULL", NullTest, (1, 1)),
            ("IS NOT NULL", NullTest, (1, 1)),
            ("IS TRUE", BooleanTest, (1, 1)),
            ("IS FALSE", BooleanTest, (1, 1)),
            ("LIKE", Like, (2, 2)),
            ("NOT LIKE", Like, (2, 2)),
            ("BETWEEN", Between, (3, 3)),
            ("NOT BETWEEN", Between, (3, 3)),
            ("+", Arithmetic, (2, 2)),
            ("-", Arithmetic, (2, 2)),
            ("*", Arithmetic, (2, 2)),
            ("/", Arithmetic, (2, 2)),
            ("%", Arithmetic, (2, 2)),
            ("NEG", Negate, (1, 1)),
            ("||", Concat, (2, 2)),
            ("COUNT", Count, (0, usize::MAX)),
            ("SUM", Sum, (1, 1)),
            ("MIN", MinMax, (1, 1)),
            ("MAX", MinMax, (1, 1)),
            ("AVG", Avg, (1, 1)),
            ("SINGLE_VALUE", SingleValue, (1, 1)),
            ("ROW_NUMBER", RowNumber, (0, 0)),
            ("RANK", Rank, (0, 0)),
            ("DENSE_RANK", Rank, (0, 0)),
            ("COALESCE", Coalesce, (1, usize::MAX)),
            ("UPPER", CaseFold, (1, 1)),
            ("LOWER", CaseFold, (1, 1)),
            ("CHAR_LENGTH", CharLength, (1, 1)),
            ("RAMP", Ramp, (1, 1)),
        ];
        for (name, kind, arity) in builtins {
            table.register(Arc::new(BuiltinOperator::new(name, kind, arity)));
        }
        table
    }

    /// Register or replace an operator.
    ///
    /// Returns `true` when an existing operator with the same name was replaced.
    pub fn register(&self, op: Arc<dyn SqlOperator>) -> bool {
        self.operators
            .write()
            .expect("operator table lock poisoned")
            .insert(op.name().to_ascii_uppercase(), op)
            .is_some()
    }

    /// Deregister an operator by name.
    ///
    /// Returns `true` when an existing operator was removed.
    pub fn deregister(&self, name: &str) -> bool {
        self.operators
            .write()
            .expect("operator table lock poisoned")
            .remove(&name.to_ascii_uppercase())
            .is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn SqlOperator>> {
        self.operators
            .read()
            .expect("operator table lock poisoned")
            .get(&name.to_ascii_uppercase())
            .cloned()
    }

    pub fn is_aggregator(&self, name: &str) -> bool {
        self.lookup(name).is_some_and(|op| op.is_aggregator())
    }

    /// Every registered function name, for completion.
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .operators
            .read()
            .expect("operator table lock poisoned")
            .keys()
            .filter(|k| k.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_schema::DataType;

    use super::{BuiltinKind, BuiltinOperator, OperatorTable, SqlOperator};
    use crate::types::ColumnType;

    #[test]
    fn register_replaces_and_deregisters() {
        let table = OperatorTable::with_builtins();
        let replaced = table.register(Arc::new(BuiltinOperator::new(
            "upper",
            BuiltinKind::CaseFold,
            (1, 1),
        )));
        assert!(replaced);
        assert!(table.deregister("UPPER"));
        assert!(!table.deregister("UPPER"));
        assert!(table.lookup("upper").is_none());
    }

    #[test]
    fn sum_widens_integers_and_is_nullable() {
        let table = OperatorTable::with_builtins();
        let sum = table.lookup("sum").expect("sum");
        let t = sum
            .return_type(&[ColumnType::not_null(DataType::Int32)])
            .expect("typed");
        assert_eq!(t, ColumnType::nullable(DataType::Int64));
        assert!(sum.is_aggregator());
    }

    #[test]
    fn comparison_rejects_incomparable_types() {
        let table = OperatorTable::with_builtins();
        let eq = table.lookup("=").expect("eq");
        assert!(eq
            .return_type(&[
                ColumnType::not_null(DataType::Int32),
                ColumnType::not_null(DataType::Boolean),
            ])
            .is_none());
    }

    #[test]
    fn unknown_operands_take_first_known_type() {
        let table = OperatorTable::with_builtins();
        let plus = table.lookup("+").expect("plus");
        let inferred =
            plus.infer_operand_types(&[Some(ColumnType::not_null(DataType::Int32)), None], None);
        assert_eq!(inferred[1], Some(ColumnType::nullable(DataType::Int32)));
    }
}
