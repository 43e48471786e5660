//! Relational algebra: immutable operator trees consumed by the decorrelator.
//!
//! Every [`RelNode`] carries a process-unique [`RelId`] and a row type derived
//! from its inputs when it is built. Rewrites never mutate a node; they build
//! a new one with [`RelNode::with_inputs`] and share unchanged subtrees.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use arrow_schema::DataType;
use quarry_common::{CorrelationId, RelId};

use crate::ast::SetOpKind;
use crate::catalog::Table;
use crate::types::{least_restrictive_rows, ColumnType, RowType};

pub type RelRef = Arc<RelNode>;

// -----------------------------
// Row expressions
// -----------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int64(i64),
    Utf8(String),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "null"),
            ScalarValue::Boolean(b) => write!(f, "{b}"),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Utf8(s) => write!(f, "'{s}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RexOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    IsNotDistinctFrom,
    And,
    Or,
    Not,
    IsNull,
    IsNotNull,
    Plus,
    Minus,
    Multiply,
    /// Operands are `when, then` pairs followed by the else result.
    Case,
    Coalesce,
}

impl RexOp {
    fn symbol(self) -> &'static str {
        match self {
            RexOp::Eq => "=",
            RexOp::NotEq => "<>",
            RexOp::Lt => "<",
            RexOp::LtEq => "<=",
            RexOp::Gt => ">",
            RexOp::GtEq => ">=",
            RexOp::IsNotDistinctFrom => "IS NOT DISTINCT FROM",
            RexOp::And => "AND",
            RexOp::Or => "OR",
            RexOp::Not => "NOT",
            RexOp::IsNull => "IS NULL",
            RexOp::IsNotNull => "IS NOT NULL",
            RexOp::Plus => "+",
            RexOp::Minus => "-",
            RexOp::Multiply => "*",
            RexOp::Case => "CASE",
            RexOp::Coalesce => "COALESCE",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            RexOp::Eq | RexOp::NotEq | RexOp::Lt | RexOp::LtEq | RexOp::Gt | RexOp::GtEq
        )
    }
}

/// A correlated field reference: field `field` of the row bound to `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorDef {
    pub id: CorrelationId,
    pub field: usize,
}

impl fmt::Display for CorDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id, self.field)
    }
}

/// Scalar expression evaluated against one input row.
#[derive(Debug, Clone, PartialEq)]
pub enum Rex {
    InputRef {
        index: usize,
        ty: ColumnType,
    },
    Literal {
        value: ScalarValue,
        ty: ColumnType,
    },
    Call {
        op: RexOp,
        operands: Vec<Rex>,
        ty: ColumnType,
    },
    /// The whole row bound by a `Correlate`; only meaningful under a
    /// [`Rex::FieldAccess`].
    CorrelVariable {
        id: CorrelationId,
        row_type: RowType,
    },
    FieldAccess {
        expr: Box<Rex>,
        field: usize,
        ty: ColumnType,
    },
}

impl Rex {
    pub fn input_ref(index: usize, ty: ColumnType) -> Rex {
        Rex::InputRef { index, ty }
    }

    /// Reference to column `index` of `row_type`.
    pub fn field_of(row_type: &RowType, index: usize) -> Rex {
        Rex::input_ref(index, row_type.column_type(index))
    }

    pub fn literal(value: ScalarValue) -> Rex {
        let ty = match &value {
            ScalarValue::Null => ColumnType::nullable(DataType::Null),
            ScalarValue::Boolean(_) => ColumnType::boolean(false),
            ScalarValue::Int64(_) => ColumnType::not_null(DataType::Int64),
            ScalarValue::Utf8(_) => ColumnType::not_null(DataType::Utf8),
        };
        Rex::Literal { value, ty }
    }

    pub fn typed_null(ty: ColumnType) -> Rex {
        Rex::Literal {
            value: ScalarValue::Null,
            ty: ty.with_nullable(true),
        }
    }

    /// Field `field` of correlation variable `id` whose row type is `row_type`.
    pub fn correl_field(id: CorrelationId, row_type: &RowType, field: usize) -> Rex {
        Rex::FieldAccess {
            ty: row_type.column_type(field),
            expr: Box::new(Rex::CorrelVariable {
                id,
                row_type: row_type.clone(),
            }),
            field,
        }
    }

    /// Build a call, deriving its type from the operands.
    pub fn call(op: RexOp, operands: Vec<Rex>) -> Rex {
        let any_nullable = operands.iter().any(|o| o.ty().nullable);
        let ty = match op {
            RexOp::IsNotDistinctFrom | RexOp::IsNull | RexOp::IsNotNull => {
                ColumnType::boolean(false)
            }
            RexOp::Eq
            | RexOp::NotEq
            | RexOp::Lt
            | RexOp::LtEq
            | RexOp::Gt
            | RexOp::GtEq
            | RexOp::And
            | RexOp::Or
            | RexOp::Not => ColumnType::boolean(any_nullable),
            RexOp::Plus | RexOp::Minus | RexOp::Multiply => {
                ColumnType::new(DataType::Int64, any_nullable)
            }
            RexOp::Case => {
                let results: Vec<&Rex> = operands
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| i % 2 == 1 || *i == operands.len() - 1)
                    .map(|(_, o)| o)
                    .collect();
                let base = results
                    .iter()
                    .map(|r| r.ty())
                    .find(|t| t.data_type != DataType::Null)
                    .unwrap_or_else(|| ColumnType::nullable(DataType::Null));
                base.with_nullable(results.iter().any(|r| r.ty().nullable))
            }
            RexOp::Coalesce => {
                let all_nullable = operands.iter().all(|o| o.ty().nullable);
                operands
                    .first()
                    .map(|o| o.ty())
                    .unwrap_or_else(|| ColumnType::nullable(DataType::Null))
                    .with_nullable(all_nullable)
            }
        };
        Rex::Call { op, operands, ty }
    }

    pub fn eq(a: Rex, b: Rex) -> Rex {
        Rex::call(RexOp::Eq, vec![a, b])
    }

    pub fn is_not_distinct_from(a: Rex, b: Rex) -> Rex {
        Rex::call(RexOp::IsNotDistinctFrom, vec![a, b])
    }

    /// Conjunction of `conjuncts`; `TRUE` when empty.
    pub fn and(mut conjuncts: Vec<Rex>) -> Rex {
        match conjuncts.len() {
            0 => Rex::literal(ScalarValue::Boolean(true)),
            1 => conjuncts.remove(0),
            _ => Rex::call(RexOp::And, conjuncts),
        }
    }

    pub fn ty(&self) -> ColumnType {
        match self {
            Rex::InputRef { ty, .. }
            | Rex::Literal { ty, .. }
            | Rex::Call { ty, .. }
            | Rex::FieldAccess { ty, .. } => ty.clone(),
            Rex::CorrelVariable { row_type, .. } => {
                ColumnType::not_null(row_type.as_struct())
            }
        }
    }

    pub fn is_always_true(&self) -> bool {
        matches!(
            self,
            Rex::Literal {
                value: ScalarValue::Boolean(true),
                ..
            }
        )
    }

    /// Top-level conjuncts of a condition.
    pub fn conjuncts(&self) -> Vec<&Rex> {
        match self {
            Rex::Call {
                op: RexOp::And,
                operands,
                ..
            } => operands.iter().flat_map(|o| o.conjuncts()).collect(),
            other => vec![other],
        }
    }

    pub fn input_refs(&self) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        self.visit(&mut |r| {
            if let Rex::InputRef { index, .. } = r {
                out.insert(*index);
            }
        });
        out
    }

    /// Correlated fields this expression reads.
    pub fn cor_defs(&self) -> BTreeSet<CorDef> {
        let mut out = BTreeSet::new();
        self.visit(&mut |r| {
            if let Some(def) = r.as_cor_def() {
                out.insert(def);
            }
        });
        out
    }

    /// Whether any correlation variable occurs, with or without field access.
    pub fn has_correlation(&self) -> bool {
        let mut found = false;
        self.visit(&mut |r| {
            if matches!(r, Rex::CorrelVariable { .. }) {
                found = true;
            }
        });
        found
    }

    /// Correlation variables occurring outside a field access.
    pub fn has_bare_correlation(&self) -> bool {
        match self {
            Rex::CorrelVariable { .. } => true,
            Rex::FieldAccess { expr, .. } => {
                !matches!(**expr, Rex::CorrelVariable { .. }) && expr.has_bare_correlation()
            }
            Rex::Call { operands, .. } => operands.iter().any(|o| o.has_bare_correlation()),
            Rex::InputRef { .. } | Rex::Literal { .. } => false,
        }
    }

    pub fn as_cor_def(&self) -> Option<CorDef> {
        match self {
            Rex::FieldAccess { expr, field, .. } => match **expr {
                Rex::CorrelVariable { id, .. } => Some(CorDef { id, field: *field }),
                _ => None,
            },
            _ => None,
        }
    }

    fn visit(&self, f: &mut dyn FnMut(&Rex)) {
        f(self);
        match self {
            Rex::Call { operands, .. } => {
                for o in operands {
                    o.visit(f);
                }
            }
            Rex::FieldAccess { expr, .. } => expr.visit(f),
            Rex::InputRef { .. } | Rex::Literal { .. } | Rex::CorrelVariable { .. } => {}
        }
    }

    /// Rebuild bottom-up; `f` sees each node after its operands were rebuilt
    /// and may return a replacement.
    pub fn transform(&self, f: &mut dyn FnMut(&Rex) -> Option<Rex>) -> Rex {
        let rebuilt = match self {
            Rex::Call { op, operands, ty } => Rex::Call {
                op: *op,
                operands: operands.iter().map(|o| o.transform(f)).collect(),
                ty: ty.clone(),
            },
            Rex::FieldAccess { expr, field, ty } if !matches!(**expr, Rex::CorrelVariable { .. }) => {
                Rex::FieldAccess {
                    expr: Box::new(expr.transform(f)),
                    field: *field,
                    ty: ty.clone(),
                }
            }
            other => other.clone(),
        };
        f(&rebuilt).unwrap_or(rebuilt)
    }

    /// Renumber input references through `map`.
    pub fn remap_inputs(&self, map: &dyn Fn(usize) -> usize) -> Rex {
        self.transform(&mut |r| match r {
            Rex::InputRef { index, ty } => Some(Rex::input_ref(map(*index), ty.clone())),
            _ => None,
        })
    }

    /// Shift every input reference by `offset`.
    pub fn shift(&self, offset: usize) -> Rex {
        self.remap_inputs(&|i| i + offset)
    }
}

impl fmt::Display for Rex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rex::InputRef { index, .. } => write!(f, "${index}"),
            Rex::Literal { value, .. } => write!(f, "{value}"),
            Rex::CorrelVariable { id, .. } => write!(f, "{id}"),
            Rex::FieldAccess { expr, field, .. } => write!(f, "{expr}.{field}"),
            Rex::Call { op, operands, .. } => match (op, operands.as_slice()) {
                (RexOp::Not, [x]) => write!(f, "NOT ({x})"),
                (RexOp::IsNull | RexOp::IsNotNull, [x]) => write!(f, "({x}) {}", op.symbol()),
                (RexOp::Case | RexOp::Coalesce, _) | (_, []) | (_, [_]) => {
                    write!(f, "{}(", op.symbol())?;
                    for (i, o) in operands.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{o}")?;
                    }
                    write!(f, ")")
                }
                (_, [first, rest @ ..]) => {
                    write!(f, "({first})")?;
                    for o in rest {
                        write!(f, " {} ({o})", op.symbol())?;
                    }
                    Ok(())
                }
            },
        }
    }
}

// -----------------------------
// Operators
// -----------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    /// Left rows with at least one match; right columns are not produced.
    Semi,
    /// Left rows with no match; right columns are not produced.
    Anti,
}

impl JoinType {
    pub fn projects_right(self) -> bool {
        !matches!(self, JoinType::Semi | JoinType::Anti)
    }

    pub fn generates_nulls_on_left(self) -> bool {
        matches!(self, JoinType::Right | JoinType::Full)
    }

    pub fn generates_nulls_on_right(self) -> bool {
        matches!(self, JoinType::Left | JoinType::Full)
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "inner"),
            JoinType::Left => write!(f, "left"),
            JoinType::Right => write!(f, "right"),
            JoinType::Full => write!(f, "full"),
            JoinType::Semi => write!(f, "semi"),
            JoinType::Anti => write!(f, "anti"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggFunc {
    Count,
    Sum,
    Min,
    Max,
    /// Value of the only input row; NULL on no rows, error on more than one.
    SingleValue,
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggFunc::Count => write!(f, "COUNT"),
            AggFunc::Sum => write!(f, "SUM"),
            AggFunc::Min => write!(f, "MIN"),
            AggFunc::Max => write!(f, "MAX"),
            AggFunc::SingleValue => write!(f, "SINGLE_VALUE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggCall {
    pub func: AggFunc,
    /// Input positions; empty for `COUNT(*)`.
    pub args: Vec<usize>,
    pub distinct: bool,
    pub name: String,
}

impl AggCall {
    pub fn new(func: AggFunc, args: Vec<usize>, name: impl Into<String>) -> Self {
        Self {
            func,
            args,
            distinct: false,
            name: name.into(),
        }
    }

    pub fn count_star(name: impl Into<String>) -> Self {
        Self::new(AggFunc::Count, vec![], name)
    }

    fn result_type(&self, input: &RowType) -> ColumnType {
        let arg = self.args.first().map(|&a| input.column_type(a));
        match (self.func, arg) {
            (AggFunc::Count, _) => ColumnType::not_null(DataType::Int64),
            (AggFunc::Sum, Some(t)) if crate::types::is_numeric(&t.data_type) => {
                ColumnType::nullable(DataType::Int64)
            }
            (_, Some(t)) => t.with_nullable(true),
            (_, None) => ColumnType::nullable(DataType::Null),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: usize,
    pub descending: bool,
    pub nulls_first: bool,
}

impl SortKey {
    pub fn asc(field: usize) -> Self {
        Self {
            field,
            descending: false,
            nulls_first: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RelKind {
    Scan {
        table: Arc<dyn Table>,
    },
    Values {
        rows: Vec<Vec<ScalarValue>>,
    },
    Filter {
        input: RelRef,
        condition: Rex,
    },
    Project {
        input: RelRef,
        exprs: Vec<Rex>,
        names: Vec<String>,
    },
    Join {
        left: RelRef,
        right: RelRef,
        condition: Rex,
        join_type: JoinType,
    },
    /// Evaluates `right` once per `left` row with that row bound to
    /// `correlation`.
    Correlate {
        left: RelRef,
        right: RelRef,
        correlation: CorrelationId,
        /// Left columns the right side reads.
        required: Vec<usize>,
        join_type: JoinType,
    },
    Aggregate {
        input: RelRef,
        group: Vec<usize>,
        calls: Vec<AggCall>,
    },
    Sort {
        input: RelRef,
        keys: Vec<SortKey>,
        offset: Option<usize>,
        fetch: Option<usize>,
    },
    SetOp {
        kind: SetOpKind,
        all: bool,
        inputs: Vec<RelRef>,
    },
}

#[derive(Debug)]
pub struct RelNode {
    pub id: RelId,
    pub kind: RelKind,
    row_type: RowType,
}

impl RelNode {
    fn build(kind: RelKind, row_type: RowType) -> RelRef {
        Arc::new(RelNode {
            id: RelId::next(),
            kind,
            row_type,
        })
    }

    fn make(kind: RelKind) -> RelRef {
        let row_type = derive_row_type(&kind);
        Self::build(kind, row_type)
    }

    pub fn scan(table: Arc<dyn Table>) -> RelRef {
        Self::make(RelKind::Scan { table })
    }

    /// Literal rows; `row_type` gives names and types.
    pub fn values(row_type: RowType, rows: Vec<Vec<ScalarValue>>) -> RelRef {
        Self::build(RelKind::Values { rows }, row_type)
    }

    pub fn filter(input: RelRef, condition: Rex) -> RelRef {
        Self::make(RelKind::Filter { input, condition })
    }

    pub fn project(input: RelRef, exprs: Vec<Rex>, names: Vec<String>) -> RelRef {
        Self::make(RelKind::Project {
            input,
            exprs,
            names,
        })
    }

    /// Project input columns by position, keeping their names.
    pub fn project_fields(input: RelRef, positions: &[usize]) -> RelRef {
        let row_type = input.row_type();
        let exprs = positions
            .iter()
            .map(|&p| Rex::field_of(row_type, p))
            .collect();
        let names = positions
            .iter()
            .map(|&p| row_type.field(p).name().clone())
            .collect();
        Self::project(input, exprs, names)
    }

    pub fn join(left: RelRef, right: RelRef, condition: Rex, join_type: JoinType) -> RelRef {
        Self::make(RelKind::Join {
            left,
            right,
            condition,
            join_type,
        })
    }

    pub fn correlate(
        left: RelRef,
        right: RelRef,
        correlation: CorrelationId,
        required: Vec<usize>,
        join_type: JoinType,
    ) -> RelRef {
        Self::make(RelKind::Correlate {
            left,
            right,
            correlation,
            required,
            join_type,
        })
    }

    pub fn aggregate(input: RelRef, group: Vec<usize>, calls: Vec<AggCall>) -> RelRef {
        Self::make(RelKind::Aggregate {
            input,
            group,
            calls,
        })
    }

    /// Distinct rows of `input`.
    pub fn distinct(input: RelRef) -> RelRef {
        let group = (0..input.row_type().len()).collect();
        Self::aggregate(input, group, vec![])
    }

    pub fn sort(
        input: RelRef,
        keys: Vec<SortKey>,
        offset: Option<usize>,
        fetch: Option<usize>,
    ) -> RelRef {
        Self::make(RelKind::Sort {
            input,
            keys,
            offset,
            fetch,
        })
    }

    pub fn set_op(kind: SetOpKind, all: bool, inputs: Vec<RelRef>) -> RelRef {
        Self::make(RelKind::SetOp { kind, all, inputs })
    }

    pub fn row_type(&self) -> &RowType {
        &self.row_type
    }

    pub fn inputs(&self) -> Vec<&RelRef> {
        match &self.kind {
            RelKind::Scan { .. } | RelKind::Values { .. } => vec![],
            RelKind::Filter { input, .. }
            | RelKind::Project { input, .. }
            | RelKind::Aggregate { input, .. }
            | RelKind::Sort { input, .. } => vec![input],
            RelKind::Join { left, right, .. } | RelKind::Correlate { left, right, .. } => {
                vec![left, right]
            }
            RelKind::SetOp { inputs, .. } => inputs.iter().collect(),
        }
    }

    /// Expressions this node evaluates itself.
    pub fn exprs(&self) -> Vec<&Rex> {
        match &self.kind {
            RelKind::Filter { condition, .. } | RelKind::Join { condition, .. } => {
                vec![condition]
            }
            RelKind::Project { exprs, .. } => exprs.iter().collect(),
            _ => vec![],
        }
    }

    /// Copy of this node over new inputs, with a fresh id and a re-derived
    /// row type. `inputs` must match [`RelNode::inputs`] in number.
    pub fn with_inputs(&self, inputs: Vec<RelRef>) -> RelRef {
        let mut it = inputs.into_iter();
        let mut next = |old: &RelRef| it.next().unwrap_or_else(|| old.clone());
        let kind = match &self.kind {
            RelKind::Scan { .. } | RelKind::Values { .. } => {
                return Self::build(self.kind.clone(), self.row_type.clone())
            }
            RelKind::Filter { input, condition } => RelKind::Filter {
                input: next(input),
                condition: condition.clone(),
            },
            RelKind::Project {
                input,
                exprs,
                names,
            } => RelKind::Project {
                input: next(input),
                exprs: exprs.clone(),
                names: names.clone(),
            },
            RelKind::Join {
                left,
                right,
                condition,
                join_type,
            } => RelKind::Join {
                left: next(left),
                right: next(right),
                condition: condition.clone(),
                join_type: *join_type,
            },
            RelKind::Correlate {
                left,
                right,
                correlation,
                required,
                join_type,
            } => RelKind::Correlate {
                left: next(left),
                right: next(right),
                correlation: *correlation,
                required: required.clone(),
                join_type: *join_type,
            },
            RelKind::Aggregate {
                input,
                group,
                calls,
            } => RelKind::Aggregate {
                input: next(input),
                group: group.clone(),
                calls: calls.clone(),
            },
            RelKind::Sort {
                input,
                keys,
                offset,
                fetch,
            } => RelKind::Sort {
                input: next(input),
                keys: keys.clone(),
                offset: *offset,
                fetch: *fetch,
            },
            RelKind::SetOp { kind, all, inputs } => RelKind::SetOp {
                kind: *kind,
                all: *all,
                inputs: inputs.iter().map(&mut next).collect(),
            },
        };
        Self::make(kind)
    }

    /// Short operator name used in explain output and logs.
    pub fn name(&self) -> &'static str {
        match &self.kind {
            RelKind::Scan { .. } => "Scan",
            RelKind::Values { .. } => "Values",
            RelKind::Filter { .. } => "Filter",
            RelKind::Project { .. } => "Project",
            RelKind::Join { .. } => "Join",
            RelKind::Correlate { .. } => "Correlate",
            RelKind::Aggregate { .. } => "Aggregate",
            RelKind::Sort { .. } => "Sort",
            RelKind::SetOp { .. } => "SetOp",
        }
    }

    /// Whether this node or any descendant is a `Correlate` or reads a
    /// correlation variable.
    pub fn has_correlation(&self) -> bool {
        matches!(self.kind, RelKind::Correlate { .. })
            || self.exprs().iter().any(|e| e.has_correlation())
            || self.inputs().iter().any(|i| i.has_correlation())
    }
}

fn join_row_type(left: &RowType, right: &RowType, join_type: JoinType) -> RowType {
    if !join_type.projects_right() {
        return left.clone();
    }
    let left = if join_type.generates_nulls_on_left() {
        left.make_nullable()
    } else {
        left.clone()
    };
    let right = if join_type.generates_nulls_on_right() {
        right.make_nullable()
    } else {
        right.clone()
    };
    left.concat(&right)
}

fn derive_row_type(kind: &RelKind) -> RowType {
    match kind {
        RelKind::Scan { table } => table.row_type(),
        // Built through `RelNode::values` with an explicit row type.
        RelKind::Values { .. } => RowType::default(),
        RelKind::Filter { input, .. } | RelKind::Sort { input, .. } => input.row_type().clone(),
        RelKind::Project { exprs, names, .. } => RowType::of(
            exprs
                .iter()
                .zip(names)
                .map(|(e, n)| (n.clone(), e.ty()))
                .collect(),
        ),
        RelKind::Join {
            left,
            right,
            join_type,
            ..
        }
        | RelKind::Correlate {
            left,
            right,
            join_type,
            ..
        } => join_row_type(left.row_type(), right.row_type(), *join_type),
        RelKind::Aggregate {
            input,
            group,
            calls,
        } => {
            let input_type = input.row_type();
            let mut columns: Vec<(String, ColumnType)> = group
                .iter()
                .map(|&g| {
                    (
                        input_type.field(g).name().clone(),
                        input_type.column_type(g),
                    )
                })
                .collect();
            columns.extend(
                calls
                    .iter()
                    .map(|c| (c.name.clone(), c.result_type(input_type))),
            );
            RowType::of(columns)
        }
        RelKind::SetOp { inputs, .. } => {
            let rows: Vec<RowType> = inputs.iter().map(|i| i.row_type().clone()).collect();
            let first = rows.first().cloned().unwrap_or_default();
            least_restrictive_rows(&rows)
                .map(|merged| merged.rename(&first.field_names()))
                .unwrap_or(first)
        }
    }
}

#[cfg(test)]
mod tests {
    use arrow_schema::DataType;
    use quarry_common::CorrelationId;

    use super::{AggCall, JoinType, RelNode, Rex, RexOp, ScalarValue};
    use crate::types::{ColumnType, RowType};

    fn two_ints() -> RowType {
        RowType::of(vec![
            ("a".to_string(), ColumnType::not_null(DataType::Int64)),
            ("b".to_string(), ColumnType::nullable(DataType::Int64)),
        ])
    }

    #[test]
    fn left_join_makes_right_side_nullable() {
        let l = RelNode::values(two_ints(), vec![]);
        let r = RelNode::values(two_ints(), vec![]);
        let j = RelNode::join(l, r, Rex::and(vec![]), JoinType::Left);
        assert_eq!(j.row_type().len(), 4);
        assert!(!j.row_type().column_type(0).nullable);
        assert!(j.row_type().column_type(2).nullable);

        let l = RelNode::values(two_ints(), vec![]);
        let r = RelNode::values(two_ints(), vec![]);
        let semi = RelNode::join(l, r, Rex::and(vec![]), JoinType::Semi);
        assert_eq!(semi.row_type().len(), 2);
    }

    #[test]
    fn count_is_never_null_but_sum_is() {
        let v = RelNode::values(two_ints(), vec![]);
        let agg = RelNode::aggregate(
            v,
            vec![],
            vec![
                AggCall::count_star("c"),
                AggCall::new(super::AggFunc::Sum, vec![0], "s"),
            ],
        );
        assert!(!agg.row_type().column_type(0).nullable);
        assert!(agg.row_type().column_type(1).nullable);
    }

    #[test]
    fn with_inputs_assigns_fresh_id_and_keeps_shape() {
        let v = RelNode::values(two_ints(), vec![vec![ScalarValue::Int64(1), ScalarValue::Null]]);
        let f = RelNode::filter(
            v.clone(),
            Rex::eq(Rex::field_of(v.row_type(), 0), Rex::literal(ScalarValue::Int64(1))),
        );
        let copy = f.with_inputs(vec![v]);
        assert_ne!(copy.id, f.id);
        assert_eq!(copy.row_type(), f.row_type());
    }

    #[test]
    fn correlated_field_references_are_collected() {
        let cor = CorrelationId::next();
        let rt = two_ints();
        let cond = Rex::and(vec![
            Rex::eq(Rex::field_of(&rt, 0), Rex::correl_field(cor, &rt, 1)),
            Rex::call(RexOp::IsNotNull, vec![Rex::field_of(&rt, 1)]),
        ]);
        let defs: Vec<_> = cond.cor_defs().into_iter().collect();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].id, cor);
        assert_eq!(defs[0].field, 1);
        assert!(cond.has_correlation());
        assert!(!cond.has_bare_correlation());
        assert_eq!(cond.conjuncts().len(), 2);
        assert_eq!(cond.input_refs().into_iter().collect::<Vec<_>>(), vec![0, 1]);
    }
}
