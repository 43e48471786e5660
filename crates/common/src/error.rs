use thiserror::Error;

use crate::ids::NodeId;

/// Canonical Quarry error taxonomy used across crates.
///
/// Classification guidance:
/// - [`QuarryError::Validation`]: a statement violated a SQL semantic rule (names, types, aggregation)
/// - [`QuarryError::Planning`]: parse failures and internal planning contract violations
/// - [`QuarryError::InvalidConfig`]: catalog/config document decode failures
/// - [`QuarryError::Unsupported`]: syntactically valid but intentionally unimplemented behavior
#[derive(Debug, Error)]
pub enum QuarryError {
    /// Invalid or inconsistent configuration/catalog state.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Semantic validation failure tied to an AST node.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Parse failures and broken planner contracts.
    ///
    /// Examples:
    /// - SQL text rejected by the parser
    /// - asking for the type of a node the validator never reached
    #[error("planning error: {0}")]
    Planning(String),

    /// Valid request for a feature/shape not implemented in current version.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// I/O failure (e.g. reading a catalog file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Standard Quarry result alias.
pub type Result<T> = std::result::Result<T, QuarryError>;

/// A validation failure together with the AST node it was raised against.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}{}", node.map(|n| format!(" (at node {n})")).unwrap_or_default())]
pub struct ValidationError {
    /// What went wrong.
    pub kind: ValidationErrorKind,
    /// Offending node, when one is known.
    pub node: Option<NodeId>,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind) -> Self {
        Self { kind, node: None }
    }

    pub fn at(kind: ValidationErrorKind, node: NodeId) -> Self {
        Self {
            kind,
            node: Some(node),
        }
    }
}

impl QuarryError {
    /// Shorthand for a validation error raised at `node`.
    pub fn validation(kind: ValidationErrorKind, node: NodeId) -> Self {
        QuarryError::Validation(ValidationError::at(kind, node))
    }

    /// Structured validation kind, if this is a validation error.
    pub fn validation_kind(&self) -> Option<&ValidationErrorKind> {
        match self {
            QuarryError::Validation(v) => Some(&v.kind),
            _ => None,
        }
    }
}

/// Every named semantic error the validator can raise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationErrorKind {
    // resolution
    #[error("Object '{0}' not found")]
    TableNameNotFound(String),
    #[error("Column '{0}' not found in any table")]
    ColumnNotFound(String),
    #[error("Column '{column}' not found in table '{table}'")]
    ColumnNotFoundInTable { column: String, table: String },
    #[error("Column '{0}' is ambiguous")]
    ColumnAmbiguous(String),
    #[error("Unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("Unknown field '{0}'")]
    UnknownField(String),

    // aggregation
    #[error("Expression '{0}' is not being grouped")]
    NotGroupExpr(String),
    #[error("Expression '{0}' is not in the select clause")]
    NotSelectDistinctExpr(String),
    #[error("Aggregate expression is illegal in WHERE clause")]
    AggregateIllegalInWhere,
    #[error("Aggregate expression is illegal in GROUP BY clause")]
    AggregateIllegalInGroupBy,
    #[error("Aggregate expression is illegal in ORDER BY clause of non-aggregating SELECT")]
    AggregateIllegalInOrderBy,
    #[error("Aggregate expression is illegal in ON clause")]
    AggregateIllegalInOn,
    #[error("Aggregate expressions cannot be nested")]
    NestedAggIllegal,

    // shape / degree
    #[error("List of column aliases must have same degree as table; table has {expected} columns, whereas alias list has {actual} columns")]
    AliasListDegree { expected: usize, actual: usize },
    #[error("Duplicate name '{0}' in column alias list")]
    AliasListDuplicate(String),
    #[error("Number of INSERT target columns ({target}) does not equal number of source items ({source_count})")]
    UnmatchInsertColumn { target: usize, source_count: usize },
    #[error("Values passed to VALUES operator must have compatible types")]
    IncompatibleValueType,
    #[error("Column count mismatch in {0}")]
    ColumnCountMismatchInSetOp(String),
    #[error("Unknown target column '{0}'")]
    UnknownTargetColumn(String),
    #[error("Target column '{0}' is assigned more than once")]
    DuplicateTargetColumn(String),
    #[error("Column '{0}' has no default value and does not allow NULLs")]
    ColumnHasNoDefault(String),

    // types
    #[error("Cannot assign to target field '{column}' of type {target_type} from source field of type {source_type}")]
    TypeNotAssignable {
        column: String,
        target_type: String,
        source_type: String,
    },
    #[error("WHERE clause must be a condition")]
    WhereMustBeBoolean,
    #[error("HAVING clause must be a condition")]
    HavingMustBeBoolean,
    #[error("ON clause must be a condition")]
    ConditionMustBeBoolean,
    #[error("Illegal use of 'NULL'")]
    NullIllegal,
    #[error("Illegal use of dynamic parameter")]
    DynamicParamIllegal,
    #[error("Unknown datatype name '{0}'")]
    UnknownDatatypeName(String),
    #[error("Cannot apply '{operator}' to arguments of type {types}")]
    CannotApplyOperator { operator: String, types: String },
    #[error("Illegal mixing of types in {0}")]
    IllegalMixingOfTypes(String),

    // joins
    #[error("INNER, LEFT, RIGHT or FULL join requires a condition (NATURAL keyword or ON or USING clause)")]
    JoinRequiresCondition,
    #[error("Cannot specify condition (NATURAL keyword, or ON or USING clause) following CROSS JOIN")]
    CrossJoinDisallowsCondition,
    #[error("Cannot specify NATURAL keyword with ON or USING clause")]
    NaturalDisallowsOnOrUsing,
    #[error("Column name '{0}' in USING clause is not unique on one side of join")]
    ColumnInUsingNotUnique(String),

    // windows
    #[error("Window name must be a simple identifier")]
    WindowNameMustBeSimple,
    #[error("Duplicate window names not allowed: '{0}'")]
    DuplicateWindowName(String),
    #[error("Duplicate window specification not allowed in the same window clause")]
    DupWindowSpec,
    #[error("Window '{0}' not found")]
    WindowNotFound(String),
    #[error("PARTITION BY not allowed with existing window reference")]
    PartitionNotAllowed,
    #[error("ORDER BY not allowed in both base and referenced windows")]
    OrderByOverlap,
    #[error("Referenced window cannot have framing declarations")]
    RefWindowWithFrame,
    #[error("Function '{0}' requires an ORDER BY clause in its window")]
    RankRequiresOrderBy(String),
    #[error("OVER clause is necessary for window functions; '{0}' is not an aggregate or window function")]
    OverNonAggregate(String),

    // structural
    #[error("Cycle detected during type-checking")]
    CycleDetected,
    #[error("Not allowed to perform {operation} on table '{table}'")]
    AccessNotAllowed { operation: String, table: String },
    #[error("No match found for function signature {0}")]
    FunctionNotFound(String),
    #[error("Only scalar sub-queries allowed in select list")]
    OnlyScalarSubQueryAllowed,
    #[error("SELECT * requires a FROM clause")]
    SelectStarRequiresFrom,
    #[error("SELECT must have a FROM clause")]
    SelectMissingFrom,
    #[error("OVER clause is necessary for window function '{0}'")]
    OverClauseRequired(String),
    #[error("Ordinal out of range: {0}")]
    OrdinalOutOfRange(i64),
    #[error("UNNEST argument must be a collection")]
    InvalidUnnestOperand,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_its_node() {
        let node = NodeId(7);
        let err = QuarryError::validation(ValidationErrorKind::DupWindowSpec, node);
        assert_eq!(err.validation_kind(), Some(&ValidationErrorKind::DupWindowSpec));
        assert!(err.to_string().ends_with("(at node 7)"), "err={err}");

        let err = QuarryError::from(ValidationError::new(ValidationErrorKind::DupWindowSpec));
        assert!(!err.to_string().contains("at node"), "err={err}");
    }
}
