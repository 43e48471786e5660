//! Validator-facing SQL syntax tree.
//!
//! Every expression, query, FROM item and statement carries a stable [`NodeId`].
//! Rewrites build new trees and reuse the ids of nodes they keep, so per-node
//! maps in the validator stay valid across the rewrite.

use std::fmt;
use std::sync::Arc;

use quarry_common::NodeId;

/// One top-level SQL statement.
#[derive(Debug, Clone)]
pub enum Statement {
    Query(Arc<Query>),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Merge(Merge),
}

impl Statement {
    pub fn id(&self) -> NodeId {
        match self {
            Statement::Query(q) => q.id,
            Statement::Insert(i) => i.id,
            Statement::Update(u) => u.id,
            Statement::Delete(d) => d.id,
            Statement::Merge(m) => m.id,
        }
    }
}

/// A row-producing query expression.
#[derive(Debug, Clone)]
pub struct Query {
    pub id: NodeId,
    pub body: QueryBody,
}

impl Query {
    pub fn new(body: QueryBody) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::next(),
            body,
        })
    }

    pub fn with_id(id: NodeId, body: QueryBody) -> Arc<Self> {
        Arc::new(Self { id, body })
    }

    pub fn as_select(&self) -> Option<&Select> {
        match &self.body {
            QueryBody::Select(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum QueryBody {
    Select(Select),
    SetOp(SetOp),
    Values(Values),
    /// `<query> ORDER BY ... OFFSET ... FETCH ...` around a non-SELECT query.
    Ordered(Ordered),
    /// `TABLE t`
    Table(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct Select {
    pub distinct: bool,
    pub items: Vec<SelectItem>,
    pub from: Option<FromItem>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub windows: Vec<WindowDef>,
    pub order_by: Vec<OrderItem>,
    pub offset: Option<Expr>,
    pub fetch: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectItem {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpKind {
    Union,
    Intersect,
    Except,
}

impl fmt::Display for SetOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetOpKind::Union => write!(f, "UNION"),
            SetOpKind::Intersect => write!(f, "INTERSECT"),
            SetOpKind::Except => write!(f, "EXCEPT"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SetOp {
    pub kind: SetOpKind,
    pub all: bool,
    pub left: Arc<Query>,
    pub right: Arc<Query>,
}

#[derive(Debug, Clone)]
pub struct Values {
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone)]
pub struct Row {
    pub id: NodeId,
    pub values: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct Ordered {
    pub query: Arc<Query>,
    pub order_by: Vec<OrderItem>,
    pub offset: Option<Expr>,
    pub fetch: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct OrderItem {
    pub expr: Expr,
    pub asc: Option<bool>,
    pub nulls_first: Option<bool>,
}

impl OrderItem {
    pub fn new(expr: Expr) -> Self {
        Self {
            expr,
            asc: None,
            nulls_first: None,
        }
    }
}

// -------------------------
// FROM clause
// -------------------------

#[derive(Debug, Clone)]
pub struct FromItem {
    pub id: NodeId,
    pub kind: FromKind,
}

#[derive(Debug, Clone)]
pub enum FromKind {
    Table(Vec<String>),
    Derived { query: Arc<Query>, lateral: bool },
    Join(Box<Join>),
    Alias {
        item: Box<FromItem>,
        alias: String,
        columns: Vec<String>,
    },
    Unnest {
        exprs: Vec<Expr>,
        with_ordinality: bool,
    },
    /// Table function call, e.g. `FROM TABLE(ramp(3))`.
    Function { call: Expr, lateral: bool },
}

impl FromItem {
    pub fn new(kind: FromKind) -> Self {
        Self {
            id: NodeId::next(),
            kind,
        }
    }

    pub fn table(names: &[&str]) -> Self {
        Self::new(FromKind::Table(
            names.iter().map(|n| n.to_string()).collect(),
        ))
    }

    pub fn alias(self, alias: impl Into<String>, columns: &[&str]) -> Self {
        Self::new(FromKind::Alias {
            item: Box::new(self),
            alias: alias.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        })
    }

    pub fn join(self, right: FromItem, kind: JoinKind, condition: JoinCondition) -> Self {
        Self::new(FromKind::Join(Box::new(Join {
            left: self,
            right,
            kind,
            natural: false,
            condition,
        })))
    }

    /// The item beneath any aliases.
    pub fn strip_alias(&self) -> &FromItem {
        match &self.kind {
            FromKind::Alias { item, .. } => item.strip_alias(),
            _ => self,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
    /// `FROM a, b`
    Comma,
}

impl JoinKind {
    pub fn generates_nulls_on_left(self) -> bool {
        matches!(self, JoinKind::Right | JoinKind::Full)
    }

    pub fn generates_nulls_on_right(self) -> bool {
        matches!(self, JoinKind::Left | JoinKind::Full)
    }
}

#[derive(Debug, Clone)]
pub enum JoinCondition {
    None,
    On(Expr),
    Using(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Join {
    pub left: FromItem,
    pub right: FromItem,
    pub kind: JoinKind,
    pub natural: bool,
    pub condition: JoinCondition,
}

// -------------------------
// Windows
// -------------------------

#[derive(Debug, Clone)]
pub struct WindowDef {
    pub id: NodeId,
    /// Name parts; a legal window name has exactly one.
    pub name: Vec<String>,
    pub spec: WindowSpec,
}

#[derive(Debug, Clone, Default)]
pub struct WindowSpec {
    /// Name of a window this one refines.
    pub base: Option<String>,
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderItem>,
    pub frame: Option<WindowFrame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameUnits {
    Rows,
    Range,
    Groups,
}

/// One end of a frame; a missing offset means UNBOUNDED.
#[derive(Debug, Clone)]
pub enum FrameBound {
    CurrentRow,
    Preceding(Option<Box<Expr>>),
    Following(Option<Box<Expr>>),
}

/// `ROWS BETWEEN <start> AND <end>`; without an end the frame stops at
/// the current row.
#[derive(Debug, Clone)]
pub struct WindowFrame {
    pub units: FrameUnits,
    pub start: FrameBound,
    pub end: Option<FrameBound>,
}

impl WindowFrame {
    /// Offset expressions of both bounds.
    pub fn offsets(&self) -> impl Iterator<Item = &Expr> {
        [Some(&self.start), self.end.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(|b| match b {
                FrameBound::Preceding(Some(e)) | FrameBound::Following(Some(e)) => Some(&**e),
                _ => None,
            })
    }
}

impl fmt::Display for FrameBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameBound::CurrentRow => f.write_str("CURRENT ROW"),
            FrameBound::Preceding(None) => f.write_str("UNBOUNDED PRECEDING"),
            FrameBound::Following(None) => f.write_str("UNBOUNDED FOLLOWING"),
            FrameBound::Preceding(Some(n)) => write!(f, "{n} PRECEDING"),
            FrameBound::Following(Some(n)) => write!(f, "{n} FOLLOWING"),
        }
    }
}

impl fmt::Display for WindowFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units = match self.units {
            FrameUnits::Rows => "ROWS",
            FrameUnits::Range => "RANGE",
            FrameUnits::Groups => "GROUPS",
        };
        match &self.end {
            Some(end) => write!(f, "{units} BETWEEN {} AND {end}", self.start),
            None => write!(f, "{units} {}", self.start),
        }
    }
}

#[derive(Debug, Clone)]
pub enum WindowRef {
    Named(String),
    Spec(WindowSpec),
}

// -------------------------
// Expressions
// -------------------------

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    /// Exact or approximate numeric with a fractional part, as written.
    Decimal(String),
    String(String),
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Possibly-qualified name; a trailing `*` part denotes a star.
    Identifier(Vec<String>),
    Literal(Literal),
    /// `?` or `:name` placeholder.
    DynamicParam(String),
    Call {
        op: String,
        operands: Vec<Expr>,
        distinct: bool,
    },
    Case {
        operand: Option<Box<Expr>>,
        whens: Vec<(Expr, Expr)>,
        else_result: Option<Box<Expr>>,
    },
    Cast {
        expr: Box<Expr>,
        type_name: String,
    },
    Row(Vec<Expr>),
    ScalarSubquery(Arc<Query>),
    Exists(Arc<Query>),
    InSubquery {
        expr: Box<Expr>,
        query: Arc<Query>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Over {
        call: Box<Expr>,
        window: WindowRef,
    },
    /// `MULTISET(<query>)` collection constructor.
    Multiset(Arc<Query>),
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            id: NodeId::next(),
            kind,
        }
    }

    pub fn ident(names: &[&str]) -> Self {
        Self::new(ExprKind::Identifier(
            names.iter().map(|n| n.to_string()).collect(),
        ))
    }

    pub fn star() -> Self {
        Self::ident(&["*"])
    }

    pub fn int(v: i64) -> Self {
        Self::new(ExprKind::Literal(Literal::Integer(v)))
    }

    pub fn string(v: impl Into<String>) -> Self {
        Self::new(ExprKind::Literal(Literal::String(v.into())))
    }

    pub fn null() -> Self {
        Self::new(ExprKind::Literal(Literal::Null))
    }

    pub fn boolean(v: bool) -> Self {
        Self::new(ExprKind::Literal(Literal::Boolean(v)))
    }

    pub fn param(name: impl Into<String>) -> Self {
        Self::new(ExprKind::DynamicParam(name.into()))
    }

    pub fn call(op: &str, operands: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call {
            op: op.to_ascii_uppercase(),
            operands,
            distinct: false,
        })
    }

    pub fn binary(op: &str, left: Expr, right: Expr) -> Self {
        Self::call(op, vec![left, right])
    }

    pub fn subquery(query: Arc<Query>) -> Self {
        Self::new(ExprKind::ScalarSubquery(query))
    }

    /// Identifier parts, if this is an identifier.
    pub fn identifier(&self) -> Option<&[String]> {
        match &self.kind {
            ExprKind::Identifier(names) => Some(names),
            _ => None,
        }
    }

    pub fn is_star(&self) -> bool {
        self.identifier()
            .and_then(|n| n.last())
            .is_some_and(|last| last == "*")
    }

    /// Direct sub-expressions, excluding anything inside nested queries.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Identifier(_)
            | ExprKind::Literal(_)
            | ExprKind::DynamicParam(_)
            | ExprKind::ScalarSubquery(_)
            | ExprKind::Exists(_)
            | ExprKind::Multiset(_) => vec![],
            ExprKind::Call { operands, .. } => operands.iter().collect(),
            ExprKind::Case {
                operand,
                whens,
                else_result,
            } => {
                let mut out: Vec<&Expr> = operand.iter().map(|e| e.as_ref()).collect();
                for (w, t) in whens {
                    out.push(w);
                    out.push(t);
                }
                out.extend(else_result.iter().map(|e| e.as_ref()));
                out
            }
            ExprKind::Cast { expr, .. } => vec![expr],
            ExprKind::Row(items) => items.iter().collect(),
            ExprKind::InSubquery { expr, .. } => vec![expr],
            ExprKind::InList { expr, list, .. } => {
                let mut out = vec![expr.as_ref()];
                out.extend(list.iter());
                out
            }
            ExprKind::Over { call, window } => {
                let mut out = vec![call.as_ref()];
                if let WindowRef::Spec(spec) = window {
                    out.extend(spec.partition_by.iter());
                    out.extend(spec.order_by.iter().map(|o| &o.expr));
                    out.extend(spec.frame.iter().flat_map(|f| f.offsets()));
                }
                out
            }
        }
    }

    /// Render with a caller-supplied spelling for identifiers and subqueries.
    pub fn render(&self, naming: &dyn Fn(&Expr) -> Option<String>) -> String {
        let mut out = String::new();
        render_expr(self, naming, &mut out);
        out
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(&|_| None))
    }
}

fn render_expr(e: &Expr, naming: &dyn Fn(&Expr) -> Option<String>, out: &mut String) {
    if let Some(s) = naming(e) {
        out.push_str(&s);
        return;
    }
    match &e.kind {
        ExprKind::Identifier(names) => out.push_str(&names.join(".")),
        ExprKind::Literal(l) => out.push_str(&match l {
            Literal::Null => "NULL".to_string(),
            Literal::Boolean(b) => b.to_string().to_ascii_uppercase(),
            Literal::Integer(i) => i.to_string(),
            Literal::Decimal(d) => d.clone(),
            Literal::String(s) => format!("'{}'", s.replace('\'', "''")),
        }),
        ExprKind::DynamicParam(p) => out.push_str(p),
        ExprKind::Call {
            op,
            operands,
            distinct,
        } => render_call(op, operands, *distinct, naming, out),
        ExprKind::Case {
            operand,
            whens,
            else_result,
        } => {
            out.push_str("CASE");
            if let Some(o) = operand {
                out.push(' ');
                render_expr(o, naming, out);
            }
            for (w, t) in whens {
                out.push_str(" WHEN ");
                render_expr(w, naming, out);
                out.push_str(" THEN ");
                render_expr(t, naming, out);
            }
            if let Some(e) = else_result {
                out.push_str(" ELSE ");
                render_expr(e, naming, out);
            }
            out.push_str(" END");
        }
        ExprKind::Cast { expr, type_name } => {
            out.push_str("CAST(");
            render_expr(expr, naming, out);
            out.push_str(&format!(" AS {type_name})"));
        }
        ExprKind::Row(items) => {
            out.push_str("ROW(");
            render_list(items.iter(), naming, out);
            out.push(')');
        }
        ExprKind::ScalarSubquery(q) => out.push_str(&format!("(SELECT #{})", q.id)),
        ExprKind::Exists(q) => out.push_str(&format!("EXISTS (SELECT #{})", q.id)),
        ExprKind::Multiset(q) => out.push_str(&format!("MULTISET (SELECT #{})", q.id)),
        ExprKind::InSubquery {
            expr,
            query,
            negated,
        } => {
            render_expr(expr, naming, out);
            let not = if *negated { " NOT" } else { "" };
            out.push_str(&format!("{not} IN (SELECT #{})", query.id));
        }
        ExprKind::InList {
            expr,
            list,
            negated,
        } => {
            render_expr(expr, naming, out);
            out.push_str(if *negated { " NOT IN (" } else { " IN (" });
            render_list(list.iter(), naming, out);
            out.push(')');
        }
        ExprKind::Over { call, window } => {
            render_expr(call, naming, out);
            out.push_str(" OVER ");
            match window {
                WindowRef::Named(n) => out.push_str(n),
                WindowRef::Spec(spec) => {
                    out.push('(');
                    render_window_spec(spec, naming, out);
                    out.push(')');
                }
            }
        }
    }
}

fn render_list<'a>(
    items: impl Iterator<Item = &'a Expr>,
    naming: &dyn Fn(&Expr) -> Option<String>,
    out: &mut String,
) {
    for (i, item) in items.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        render_expr(item, naming, out);
    }
}

fn render_call(
    op: &str,
    operands: &[Expr],
    distinct: bool,
    naming: &dyn Fn(&Expr) -> Option<String>,
    out: &mut String,
) {
    let infix = matches!(
        op,
        "=" | "<>"
            | "<"
            | "<="
            | ">"
            | ">="
            | "+"
            | "-"
            | "*"
            | "/"
            | "%"
            | "||"
            | "AND"
            | "OR"
            | "LIKE"
            | "NOT LIKE"
            | "IS DISTINCT FROM"
            | "IS NOT DISTINCT FROM"
    );
    if infix && operands.len() == 2 {
        out.push('(');
        render_expr(&operands[0], naming, out);
        out.push_str(&format!(" {op} "));
        render_expr(&operands[1], naming, out);
        out.push(')');
        return;
    }
    if op.starts_with("IS ") && operands.len() == 1 {
        render_expr(&operands[0], naming, out);
        out.push_str(&format!(" {op}"));
        return;
    }
    match (op, operands) {
        ("NOT", [x]) => {
            out.push_str("NOT ");
            render_expr(x, naming, out);
        }
        ("NEG", [x]) => {
            out.push('-');
            render_expr(x, naming, out);
        }
        _ => {
            out.push_str(op);
            out.push('(');
            if distinct {
                out.push_str("DISTINCT ");
            }
            if operands.is_empty() && op == "COUNT" {
                out.push('*');
            }
            render_list(operands.iter(), naming, out);
            out.push(')');
        }
    }
}

fn render_window_spec(
    spec: &WindowSpec,
    naming: &dyn Fn(&Expr) -> Option<String>,
    out: &mut String,
) {
    let mut parts = vec![];
    if let Some(b) = &spec.base {
        parts.push(b.clone());
    }
    if !spec.partition_by.is_empty() {
        let mut s = String::from("PARTITION BY ");
        render_list(spec.partition_by.iter(), naming, &mut s);
        parts.push(s);
    }
    if !spec.order_by.is_empty() {
        let mut s = String::from("ORDER BY ");
        render_list(spec.order_by.iter().map(|o| &o.expr), naming, &mut s);
        parts.push(s);
    }
    if let Some(frame) = &spec.frame {
        parts.push(frame.to_string());
    }
    out.push_str(&parts.join(" "));
}

impl WindowSpec {
    /// Canonical text used to detect duplicate window specifications.
    pub fn render(&self, naming: &dyn Fn(&Expr) -> Option<String>) -> String {
        let mut out = String::new();
        render_window_spec(self, naming, &mut out);
        out
    }
}

// -------------------------
// DML
// -------------------------

#[derive(Debug, Clone)]
pub struct Insert {
    pub id: NodeId,
    pub table: Vec<String>,
    pub columns: Vec<String>,
    pub source: Arc<Query>,
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub struct Update {
    pub id: NodeId,
    pub table: FromItem,
    pub assignments: Vec<Assignment>,
    pub selection: Option<Expr>,
    /// `SELECT *, <set exprs> FROM target WHERE ...`, synthesized by the rewrite.
    pub source_select: Option<Arc<Query>>,
}

#[derive(Debug, Clone)]
pub struct Delete {
    pub id: NodeId,
    pub table: FromItem,
    pub selection: Option<Expr>,
    /// `SELECT * FROM target WHERE ...`, synthesized by the rewrite.
    pub source_select: Option<Arc<Query>>,
}

#[derive(Debug, Clone)]
pub struct MergeInsert {
    pub id: NodeId,
    pub columns: Vec<String>,
    pub values: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct MergeUpdate {
    pub id: NodeId,
    pub assignments: Vec<Assignment>,
}

#[derive(Debug, Clone)]
pub struct Merge {
    pub id: NodeId,
    pub target: FromItem,
    pub source: FromItem,
    pub on: Expr,
    pub update: Option<MergeUpdate>,
    pub insert: Option<MergeInsert>,
    pub delete: bool,
    /// Outer-join source select, synthesized by the rewrite.
    pub source_select: Option<Arc<Query>>,
}

/// Alias a DML target is visible under: its explicit alias, or its last name part.
pub fn target_alias(item: &FromItem) -> Option<String> {
    match &item.kind {
        FromKind::Alias { alias, .. } => Some(alias.clone()),
        FromKind::Table(names) => names.last().cloned(),
        _ => None,
    }
}

/// Qualified name of a DML target table.
pub fn target_table_name(item: &FromItem) -> Option<&[String]> {
    match &item.strip_alias().kind {
        FromKind::Table(names) => Some(names),
        _ => None,
    }
}

// -------------------------
// Traversal
// -------------------------

/// Callbacks for a pre-order walk over a syntax tree.
///
/// The walk descends into nested queries. Synthesized DML source selects are
/// skipped because they share node ids with the statement's own clauses.
pub trait AstVisitor<'a> {
    fn expr(&mut self, _expr: &'a Expr) {}
    fn from_item(&mut self, _item: &'a FromItem) {}
}

pub fn walk_statement<'a>(stmt: &'a Statement, v: &mut dyn AstVisitor<'a>) {
    match stmt {
        Statement::Query(q) => walk_query(q, v),
        Statement::Insert(ins) => walk_query(&ins.source, v),
        Statement::Update(upd) => {
            walk_from(&upd.table, v);
            for a in &upd.assignments {
                walk_expr(&a.value, v);
            }
            if let Some(sel) = &upd.selection {
                walk_expr(sel, v);
            }
        }
        Statement::Delete(del) => {
            walk_from(&del.table, v);
            if let Some(sel) = &del.selection {
                walk_expr(sel, v);
            }
        }
        Statement::Merge(m) => {
            walk_from(&m.target, v);
            walk_from(&m.source, v);
            walk_expr(&m.on, v);
            if let Some(u) = &m.update {
                for a in &u.assignments {
                    walk_expr(&a.value, v);
                }
            }
            if let Some(i) = &m.insert {
                for e in &i.values {
                    walk_expr(e, v);
                }
            }
        }
    }
}

pub fn walk_query<'a>(query: &'a Query, v: &mut dyn AstVisitor<'a>) {
    match &query.body {
        QueryBody::Select(s) => {
            for item in &s.items {
                walk_expr(&item.expr, v);
            }
            if let Some(from) = &s.from {
                walk_from(from, v);
            }
            for e in s
                .where_clause
                .iter()
                .chain(s.group_by.iter())
                .chain(s.having.iter())
            {
                walk_expr(e, v);
            }
            for w in &s.windows {
                walk_window_spec(&w.spec, v);
            }
            for o in &s.order_by {
                walk_expr(&o.expr, v);
            }
            for e in s.offset.iter().chain(s.fetch.iter()) {
                walk_expr(e, v);
            }
        }
        QueryBody::SetOp(op) => {
            walk_query(&op.left, v);
            walk_query(&op.right, v);
        }
        QueryBody::Values(values) => {
            for row in &values.rows {
                for e in &row.values {
                    walk_expr(e, v);
                }
            }
        }
        QueryBody::Ordered(o) => {
            walk_query(&o.query, v);
            for item in &o.order_by {
                walk_expr(&item.expr, v);
            }
            for e in o.offset.iter().chain(o.fetch.iter()) {
                walk_expr(e, v);
            }
        }
        QueryBody::Table(_) => {}
    }
}

pub fn walk_from<'a>(item: &'a FromItem, v: &mut dyn AstVisitor<'a>) {
    v.from_item(item);
    match &item.kind {
        FromKind::Table(_) => {}
        FromKind::Derived { query, .. } => walk_query(query, v),
        FromKind::Join(join) => {
            walk_from(&join.left, v);
            walk_from(&join.right, v);
            if let JoinCondition::On(e) = &join.condition {
                walk_expr(e, v);
            }
        }
        FromKind::Alias { item, .. } => walk_from(item, v),
        FromKind::Unnest { exprs, .. } => {
            for e in exprs {
                walk_expr(e, v);
            }
        }
        FromKind::Function { call, .. } => walk_expr(call, v),
    }
}

pub fn walk_expr<'a>(expr: &'a Expr, v: &mut dyn AstVisitor<'a>) {
    v.expr(expr);
    match &expr.kind {
        ExprKind::ScalarSubquery(q) | ExprKind::Exists(q) | ExprKind::Multiset(q) => {
            walk_query(q, v)
        }
        ExprKind::InSubquery { query, .. } => walk_query(query, v),
        _ => {}
    }
    for child in expr.children() {
        walk_expr(child, v);
    }
}

fn walk_window_spec<'a>(spec: &'a WindowSpec, v: &mut dyn AstVisitor<'a>) {
    for e in &spec.partition_by {
        walk_expr(e, v);
    }
    for o in &spec.order_by {
        walk_expr(&o.expr, v);
    }
    for e in spec.frame.iter().flat_map(|f| f.offsets()) {
        walk_expr(e, v);
    }
}

#[cfg(test)]
mod tests {
    use super::{Expr, ExprKind};

    #[test]
    fn render_nested_call() {
        let e = Expr::binary(
            "+",
            Expr::ident(&["emp", "sal"]),
            Expr::call("COALESCE", vec![Expr::ident(&["comm"]), Expr::int(0)]),
        );
        assert_eq!(e.to_string(), "(emp.sal + COALESCE(comm, 0))");
    }

    #[test]
    fn distinct_nulls_have_distinct_ids() {
        let a = Expr::null();
        let b = Expr::null();
        assert_ne!(a.id, b.id);
        assert!(matches!(a.kind, ExprKind::Literal(_)));
    }

    #[test]
    fn render_uses_naming_override() {
        let e = Expr::binary("=", Expr::ident(&["deptno"]), Expr::int(10));
        let target = e.children()[0].id;
        let s = e.render(&|x| (x.id == target).then(|| "EMP.DEPTNO".to_string()));
        assert_eq!(s, "(EMP.DEPTNO = 10)");
    }
}
