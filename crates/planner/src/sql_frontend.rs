use std::sync::Arc;

use quarry_common::{NodeId, QuarryError, Result};
use sqlparser::ast::{
    self as sql, BinaryOperator as SqlBinaryOp, Distinct, DuplicateTreatment, Expr as SqlExpr,
    FromTable, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, JoinConstraint,
    JoinOperator, MergeAction, MergeClauseKind, MergeInsertKind, NamedWindowExpr, ObjectName,
    SelectItem as SqlSelectItem, SetExpr, SetOperator, SetQuantifier, TableFactor,
    TableWithJoins, UnaryOperator, Value, WindowType,
};

use crate::ast::{
    Assignment, Delete, Expr, ExprKind, FrameBound, FrameUnits, FromItem, FromKind, Insert, Join,
    JoinCondition, JoinKind, Literal, Merge, MergeInsert, MergeUpdate, OrderItem, Ordered, Query,
    QueryBody, Row, Select, SelectItem, SetOp, SetOpKind, Statement, Update, Values, WindowDef,
    WindowFrame, WindowRef, WindowSpec,
};

/// Parse one SQL statement into the validator's syntax tree.
pub fn sql_to_statement(sql: &str) -> Result<Statement> {
    let stmt = quarry_sql::parse_statement(sql)?;
    convert_statement(&stmt)
}

/// Convert a parsed `sqlparser` statement.
pub fn convert_statement(stmt: &sql::Statement) -> Result<Statement> {
    match stmt {
        sql::Statement::Query(q) => Ok(Statement::Query(convert_query(q)?)),
        sql::Statement::Insert(ins) => {
            let source = ins.source.as_ref().ok_or_else(|| {
                QuarryError::Unsupported("INSERT without a source query".to_string())
            })?;
            Ok(Statement::Insert(Insert {
                id: NodeId::next(),
                table: object_name_parts(&ins.table_name),
                columns: ins.columns.iter().map(|c| c.value.clone()).collect(),
                source: convert_query(source)?,
            }))
        }
        sql::Statement::Update {
            table,
            assignments,
            from,
            selection,
            ..
        } => {
            if from.is_some() || !table.joins.is_empty() {
                return Err(QuarryError::Unsupported(
                    "UPDATE with FROM or joins is not supported".to_string(),
                ));
            }
            Ok(Statement::Update(Update {
                id: NodeId::next(),
                table: convert_table_factor(&table.relation)?,
                assignments: convert_assignments(assignments)?,
                selection: selection.as_ref().map(convert_expr).transpose()?,
                source_select: None,
            }))
        }
        sql::Statement::Delete(del) => {
            let tables = match &del.from {
                FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
            };
            if tables.len() != 1 || !tables[0].joins.is_empty() || del.using.is_some() {
                return Err(QuarryError::Unsupported(
                    "DELETE must target exactly one table".to_string(),
                ));
            }
            Ok(Statement::Delete(Delete {
                id: NodeId::next(),
                table: convert_table_factor(&tables[0].relation)?,
                selection: del.selection.as_ref().map(convert_expr).transpose()?,
                source_select: None,
            }))
        }
        sql::Statement::Merge {
            table,
            source,
            on,
            clauses,
            ..
        } => {
            let mut merge = Merge {
                id: NodeId::next(),
                target: convert_table_factor(table)?,
                source: convert_table_factor(source)?,
                on: convert_expr(on)?,
                update: None,
                insert: None,
                delete: false,
                source_select: None,
            };
            for clause in clauses {
                match (&clause.clause_kind, &clause.action) {
                    (MergeClauseKind::Matched, MergeAction::Update { assignments }) => {
                        merge.update = Some(MergeUpdate {
                            id: NodeId::next(),
                            assignments: convert_assignments(assignments)?,
                        });
                    }
                    (MergeClauseKind::Matched, MergeAction::Delete) => merge.delete = true,
                    (
                        MergeClauseKind::NotMatched | MergeClauseKind::NotMatchedByTarget,
                        MergeAction::Insert(ins),
                    ) => {
                        let values = match &ins.kind {
                            MergeInsertKind::Values(v) if v.rows.len() == 1 => v.rows[0]
                                .iter()
                                .map(convert_expr)
                                .collect::<Result<Vec<_>>>()?,
                            _ => {
                                return Err(QuarryError::Unsupported(
                                    "MERGE INSERT requires a single VALUES row".to_string(),
                                ))
                            }
                        };
                        merge.insert = Some(MergeInsert {
                            id: NodeId::next(),
                            columns: ins.columns.iter().map(|c| c.value.clone()).collect(),
                            values,
                        });
                    }
                    _ => {
                        return Err(QuarryError::Unsupported(
                            "unsupported MERGE clause".to_string(),
                        ))
                    }
                }
            }
            Ok(Statement::Merge(merge))
        }
        other => Err(QuarryError::Unsupported(format!(
            "statement kind not supported: {}",
            other.to_string().split_whitespace().next().unwrap_or("?")
        ))),
    }
}

fn convert_assignments(assignments: &[sql::Assignment]) -> Result<Vec<Assignment>> {
    assignments
        .iter()
        .map(|a| match &a.target {
            sql::AssignmentTarget::ColumnName(name) => Ok(Assignment {
                column: object_name_parts(name).last().cloned().unwrap_or_default(),
                value: convert_expr(&a.value)?,
            }),
            _ => Err(QuarryError::Unsupported(
                "tuple assignment targets are not supported".to_string(),
            )),
        })
        .collect()
}

fn object_name_parts(name: &ObjectName) -> Vec<String> {
    name.0.iter().map(|i| i.value.clone()).collect()
}

// -------------------------
// Queries
// -------------------------

pub fn convert_query(q: &sql::Query) -> Result<Arc<Query>> {
    if q.with.is_some() {
        return Err(QuarryError::Unsupported("WITH is not supported".to_string()));
    }
    let body = convert_set_expr(&q.body)?;
    let order_by = match &q.order_by {
        Some(ob) => ob
            .exprs
            .iter()
            .map(convert_order_by_expr)
            .collect::<Result<Vec<_>>>()?,
        None => vec![],
    };
    let offset = q
        .offset
        .as_ref()
        .map(|o| convert_expr(&o.value))
        .transpose()?;
    let fetch = match (&q.limit, &q.fetch) {
        (Some(limit), _) => Some(convert_expr(limit)?),
        (None, Some(f)) => f.quantity.as_ref().map(convert_expr).transpose()?,
        (None, None) => None,
    };
    if order_by.is_empty() && offset.is_none() && fetch.is_none() {
        return Ok(body);
    }
    Ok(Query::new(QueryBody::Ordered(Ordered {
        query: body,
        order_by,
        offset,
        fetch,
    })))
}

fn convert_set_expr(body: &SetExpr) -> Result<Arc<Query>> {
    match body {
        SetExpr::Select(s) => Ok(Query::new(QueryBody::Select(convert_select(s)?))),
        SetExpr::Query(q) => convert_query(q),
        SetExpr::SetOperation {
            op,
            set_quantifier,
            left,
            right,
        } => {
            let kind = match op {
                SetOperator::Union => SetOpKind::Union,
                SetOperator::Intersect => SetOpKind::Intersect,
                SetOperator::Except => SetOpKind::Except,
                #[allow(unreachable_patterns)]
                _ => {
                    return Err(QuarryError::Unsupported(format!(
                        "set operator {op} is not supported"
                    )))
                }
            };
            Ok(Query::new(QueryBody::SetOp(SetOp {
                kind,
                all: matches!(set_quantifier, SetQuantifier::All),
                left: convert_set_expr(left)?,
                right: convert_set_expr(right)?,
            })))
        }
        SetExpr::Values(values) => {
            let rows = values
                .rows
                .iter()
                .map(|r| {
                    Ok(Row {
                        id: NodeId::next(),
                        values: r.iter().map(convert_expr).collect::<Result<Vec<_>>>()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Query::new(QueryBody::Values(Values { rows })))
        }
        SetExpr::Table(t) => {
            let mut names = vec![];
            if let Some(s) = &t.schema_name {
                names.push(s.clone());
            }
            if let Some(n) = &t.table_name {
                names.push(n.clone());
            }
            Ok(Query::new(QueryBody::Table(names)))
        }
        other => Err(QuarryError::Unsupported(format!(
            "query body not supported: {other}"
        ))),
    }
}

fn convert_select(s: &sql::Select) -> Result<Select> {
    let distinct = match &s.distinct {
        None => false,
        Some(Distinct::Distinct) => true,
        Some(Distinct::On(_)) => {
            return Err(QuarryError::Unsupported(
                "DISTINCT ON is not supported".to_string(),
            ))
        }
    };

    let mut items = vec![];
    for item in &s.projection {
        items.push(match item {
            SqlSelectItem::UnnamedExpr(e) => SelectItem::new(convert_expr(e)?),
            SqlSelectItem::ExprWithAlias { expr, alias } => {
                SelectItem::aliased(convert_expr(expr)?, alias.value.clone())
            }
            SqlSelectItem::Wildcard(_) => SelectItem::new(Expr::star()),
            SqlSelectItem::QualifiedWildcard(name, _) => {
                let mut names = object_name_parts(name);
                names.push("*".to_string());
                SelectItem::new(Expr::new(ExprKind::Identifier(names)))
            }
        });
    }

    let from = convert_from(&s.from)?;
    let group_by = match &s.group_by {
        GroupByExpr::Expressions(es, _) => {
            es.iter().map(convert_expr).collect::<Result<Vec<_>>>()?
        }
        GroupByExpr::All(_) => {
            return Err(QuarryError::Unsupported(
                "GROUP BY ALL is not supported".to_string(),
            ))
        }
    };

    let mut windows = vec![];
    for def in &s.named_window {
        let spec = match &def.1 {
            NamedWindowExpr::WindowSpec(spec) => convert_window_spec(spec)?,
            NamedWindowExpr::NamedWindow(base) => WindowSpec {
                base: Some(base.value.clone()),
                ..WindowSpec::default()
            },
        };
        windows.push(WindowDef {
            id: NodeId::next(),
            name: vec![def.0.value.clone()],
            spec,
        });
    }

    Ok(Select {
        distinct,
        items,
        from,
        where_clause: s.selection.as_ref().map(convert_expr).transpose()?,
        group_by,
        having: s.having.as_ref().map(convert_expr).transpose()?,
        windows,
        ..Select::default()
    })
}

fn convert_order_by_expr(o: &sql::OrderByExpr) -> Result<OrderItem> {
    Ok(OrderItem {
        expr: convert_expr(&o.expr)?,
        asc: o.asc,
        nulls_first: o.nulls_first,
    })
}

fn convert_window_spec(spec: &sql::WindowSpec) -> Result<WindowSpec> {
    Ok(WindowSpec {
        base: spec.window_name.as_ref().map(|n| n.value.clone()),
        partition_by: spec
            .partition_by
            .iter()
            .map(convert_expr)
            .collect::<Result<Vec<_>>>()?,
        order_by: spec
            .order_by
            .iter()
            .map(convert_order_by_expr)
            .collect::<Result<Vec<_>>>()?,
        frame: spec.window_frame.as_ref().map(convert_frame).transpose()?,
    })
}

fn convert_frame(frame: &sql::WindowFrame) -> Result<WindowFrame> {
    Ok(WindowFrame {
        units: match frame.units {
            sql::WindowFrameUnits::Rows => FrameUnits::Rows,
            sql::WindowFrameUnits::Range => FrameUnits::Range,
            sql::WindowFrameUnits::Groups => FrameUnits::Groups,
        },
        start: convert_frame_bound(&frame.start_bound)?,
        end: frame.end_bound.as_ref().map(convert_frame_bound).transpose()?,
    })
}

fn convert_frame_bound(bound: &sql::WindowFrameBound) -> Result<FrameBound> {
    let offset = |e: &Option<Box<SqlExpr>>| -> Result<Option<Box<Expr>>> {
        e.as_deref().map(|e| convert_expr(e).map(Box::new)).transpose()
    };
    Ok(match bound {
        sql::WindowFrameBound::CurrentRow => FrameBound::CurrentRow,
        sql::WindowFrameBound::Preceding(e) => FrameBound::Preceding(offset(e)?),
        sql::WindowFrameBound::Following(e) => FrameBound::Following(offset(e)?),
    })
}

// -------------------------
// FROM
// -------------------------

fn convert_from(from: &[TableWithJoins]) -> Result<Option<FromItem>> {
    let mut out: Option<FromItem> = None;
    for twj in from {
        let item = convert_table_with_joins(twj)?;
        out = Some(match out {
            None => item,
            Some(left) => left.join(item, JoinKind::Comma, JoinCondition::None),
        });
    }
    Ok(out)
}

fn convert_table_with_joins(twj: &TableWithJoins) -> Result<FromItem> {
    let mut left = convert_table_factor(&twj.relation)?;
    for j in &twj.joins {
        let right = convert_table_factor(&j.relation)?;
        let (kind, constraint) = match &j.join_operator {
            JoinOperator::Inner(c) => (JoinKind::Inner, Some(c)),
            JoinOperator::LeftOuter(c) => (JoinKind::Left, Some(c)),
            JoinOperator::RightOuter(c) => (JoinKind::Right, Some(c)),
            JoinOperator::FullOuter(c) => (JoinKind::Full, Some(c)),
            JoinOperator::CrossJoin => (JoinKind::Cross, None),
            _ => {
                return Err(QuarryError::Unsupported(
                    "join operator not supported".to_string(),
                ))
            }
        };
        let (natural, condition) = match constraint {
            None | Some(JoinConstraint::None) => (false, JoinCondition::None),
            Some(JoinConstraint::Natural) => (true, JoinCondition::None),
            Some(JoinConstraint::On(e)) => (false, JoinCondition::On(convert_expr(e)?)),
            Some(JoinConstraint::Using(cols)) => (
                false,
                JoinCondition::Using(cols.iter().map(|c| c.to_string()).collect()),
            ),
        };
        left = FromItem::new(FromKind::Join(Box::new(Join {
            left,
            right,
            kind,
            natural,
            condition,
        })));
    }
    Ok(left)
}

fn with_alias(item: FromItem, alias: &Option<sql::TableAlias>) -> FromItem {
    match alias {
        None => item,
        Some(a) => FromItem::new(FromKind::Alias {
            item: Box::new(item),
            alias: a.name.value.clone(),
            columns: a.columns.iter().map(|c| c.to_string()).collect(),
        }),
    }
}

fn convert_table_factor(tf: &TableFactor) -> Result<FromItem> {
    match tf {
        TableFactor::Table {
            name,
            alias,
            args: None,
            ..
        } => Ok(with_alias(
            FromItem::new(FromKind::Table(object_name_parts(name))),
            alias,
        )),
        TableFactor::Table {
            name,
            alias,
            args: Some(args),
            ..
        } => {
            let call = function_call(name, &args.args, false)?;
            Ok(with_alias(
                FromItem::new(FromKind::Function {
                    call,
                    lateral: false,
                }),
                alias,
            ))
        }
        TableFactor::Function {
            lateral,
            name,
            args,
            alias,
            ..
        } => {
            let call = function_call(name, args, false)?;
            Ok(with_alias(
                FromItem::new(FromKind::Function {
                    call,
                    lateral: *lateral,
                }),
                alias,
            ))
        }
        TableFactor::Derived {
            lateral,
            subquery,
            alias,
            ..
        } => Ok(with_alias(
            FromItem::new(FromKind::Derived {
                query: convert_query(subquery)?,
                lateral: *lateral,
            }),
            alias,
        )),
        TableFactor::NestedJoin {
            table_with_joins,
            alias,
            ..
        } => Ok(with_alias(
            convert_table_with_joins(table_with_joins)?,
            alias,
        )),
        TableFactor::UNNEST {
            alias,
            array_exprs,
            with_ordinality,
            ..
        } => Ok(with_alias(
            FromItem::new(FromKind::Unnest {
                exprs: array_exprs
                    .iter()
                    .map(convert_expr)
                    .collect::<Result<Vec<_>>>()?,
                with_ordinality: *with_ordinality,
            }),
            alias,
        )),
        other => Err(QuarryError::Unsupported(format!(
            "FROM item not supported: {other}"
        ))),
    }
}

// -------------------------
// Expressions
// -------------------------

fn call(op: &str, operands: Vec<Expr>) -> Expr {
    Expr::call(op, operands)
}

fn boxed(e: &SqlExpr) -> Result<Expr> {
    convert_expr(e)
}

pub fn convert_expr(e: &SqlExpr) -> Result<Expr> {
    Ok(match e {
        SqlExpr::Identifier(id) => Expr::new(ExprKind::Identifier(vec![id.value.clone()])),
        SqlExpr::CompoundIdentifier(parts) => Expr::new(ExprKind::Identifier(
            parts.iter().map(|p| p.value.clone()).collect(),
        )),
        SqlExpr::Value(v) => convert_value(v)?,
        SqlExpr::Nested(inner) => convert_expr(inner)?,
        SqlExpr::BinaryOp { left, op, right } => {
            let name = match op {
                SqlBinaryOp::Plus => "+",
                SqlBinaryOp::Minus => "-",
                SqlBinaryOp::Multiply => "*",
                SqlBinaryOp::Divide => "/",
                SqlBinaryOp::Modulo => "%",
                SqlBinaryOp::StringConcat => "||",
                SqlBinaryOp::Gt => ">",
                SqlBinaryOp::Lt => "<",
                SqlBinaryOp::GtEq => ">=",
                SqlBinaryOp::LtEq => "<=",
                SqlBinaryOp::Eq => "=",
                SqlBinaryOp::NotEq => "<>",
                SqlBinaryOp::And => "AND",
                SqlBinaryOp::Or => "OR",
                other => {
                    return Err(QuarryError::Unsupported(format!(
                        "binary operator {other} is not supported"
                    )))
                }
            };
            call(name, vec![boxed(left)?, boxed(right)?])
        }
        SqlExpr::UnaryOp { op, expr } => match op {
            UnaryOperator::Not => call("NOT", vec![boxed(expr)?]),
            UnaryOperator::Minus => match expr.as_ref() {
                SqlExpr::Value(Value::Number(n, _)) => convert_number(&format!("-{n}"))?,
                _ => call("NEG", vec![boxed(expr)?]),
            },
            UnaryOperator::Plus => convert_expr(expr)?,
            other => {
                return Err(QuarryError::Unsupported(format!(
                    "unary operator {other} is not supported"
                )))
            }
        },
        SqlExpr::IsNull(x) => call("IS NULL", vec![boxed(x)?]),
        SqlExpr::IsNotNull(x) => call("IS NOT NULL", vec![boxed(x)?]),
        SqlExpr::IsTrue(x) => call("IS TRUE", vec![boxed(x)?]),
        SqlExpr::IsFalse(x) => call("IS FALSE", vec![boxed(x)?]),
        SqlExpr::IsDistinctFrom(a, b) => call("IS DISTINCT FROM", vec![boxed(a)?, boxed(b)?]),
        SqlExpr::IsNotDistinctFrom(a, b) => {
            call("IS NOT DISTINCT FROM", vec![boxed(a)?, boxed(b)?])
        }
        SqlExpr::Like {
            negated,
            expr,
            pattern,
            ..
        } => call(
            if *negated { "NOT LIKE" } else { "LIKE" },
            vec![boxed(expr)?, boxed(pattern)?],
        ),
        SqlExpr::Between {
            expr,
            negated,
            low,
            high,
        } => call(
            if *negated { "NOT BETWEEN" } else { "BETWEEN" },
            vec![boxed(expr)?, boxed(low)?, boxed(high)?],
        ),
        SqlExpr::InList {
            expr,
            list,
            negated,
        } => Expr::new(ExprKind::InList {
            expr: Box::new(boxed(expr)?),
            list: list.iter().map(convert_expr).collect::<Result<Vec<_>>>()?,
            negated: *negated,
        }),
        SqlExpr::InSubquery {
            expr,
            subquery,
            negated,
        } => Expr::new(ExprKind::InSubquery {
            expr: Box::new(boxed(expr)?),
            query: convert_query(subquery)?,
            negated: *negated,
        }),
        SqlExpr::Exists { subquery, negated } => {
            let exists = Expr::new(ExprKind::Exists(convert_query(subquery)?));
            if *negated {
                call("NOT", vec![exists])
            } else {
                exists
            }
        }
        SqlExpr::Subquery(q) => Expr::new(ExprKind::ScalarSubquery(convert_query(q)?)),
        SqlExpr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => Expr::new(ExprKind::Case {
            operand: operand.as_ref().map(|o| boxed(o).map(Box::new)).transpose()?,
            whens: conditions
                .iter()
                .zip(results)
                .map(|(c, r)| Ok((convert_expr(c)?, convert_expr(r)?)))
                .collect::<Result<Vec<_>>>()?,
            else_result: else_result
                .as_ref()
                .map(|e| boxed(e).map(Box::new))
                .transpose()?,
        }),
        SqlExpr::Cast {
            expr, data_type, ..
        } => Expr::new(ExprKind::Cast {
            expr: Box::new(boxed(expr)?),
            type_name: data_type.to_string(),
        }),
        SqlExpr::Tuple(items) => Expr::new(ExprKind::Row(
            items.iter().map(convert_expr).collect::<Result<Vec<_>>>()?,
        )),
        SqlExpr::Function(f) => convert_function(f)?,
        other => {
            return Err(QuarryError::Unsupported(format!(
                "expression not supported: {other}"
            )))
        }
    })
}

fn convert_number(n: &str) -> Result<Expr> {
    if let Ok(i) = n.parse::<i64>() {
        return Ok(Expr::new(ExprKind::Literal(Literal::Integer(i))));
    }
    if n.parse::<f64>().is_ok() {
        return Ok(Expr::new(ExprKind::Literal(Literal::Decimal(n.to_string()))));
    }
    Err(QuarryError::Planning(format!("invalid numeric literal: {n}")))
}

fn convert_value(v: &Value) -> Result<Expr> {
    Ok(match v {
        Value::Number(n, _) => convert_number(n)?,
        Value::SingleQuotedString(s) => Expr::string(s.clone()),
        Value::Boolean(b) => Expr::boolean(*b),
        Value::Null => Expr::null(),
        Value::Placeholder(p) => Expr::param(p.clone()),
        other => {
            return Err(QuarryError::Unsupported(format!(
                "literal not supported: {other}"
            )))
        }
    })
}

fn function_call(name: &ObjectName, args: &[FunctionArg], distinct: bool) -> Result<Expr> {
    let mut operands = vec![];
    for a in args {
        match a {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => operands.push(convert_expr(e)?),
            FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => {}
            _ => {
                return Err(QuarryError::Unsupported(format!(
                    "function argument not supported: {a}"
                )))
            }
        }
    }
    let op = object_name_parts(name).join(".").to_ascii_uppercase();
    Ok(Expr::new(ExprKind::Call {
        op,
        operands,
        distinct,
    }))
}

fn convert_function(f: &sql::Function) -> Result<Expr> {
    let name = object_name_parts(&f.name).join(".").to_ascii_uppercase();
    let call = match &f.args {
        FunctionArguments::None => function_call(&f.name, &[], false)?,
        FunctionArguments::List(list) => function_call(
            &f.name,
            &list.args,
            matches!(list.duplicate_treatment, Some(DuplicateTreatment::Distinct)),
        )?,
        FunctionArguments::Subquery(q) if name == "MULTISET" || name == "ARRAY" => {
            return Ok(Expr::new(ExprKind::Multiset(convert_query(q)?)));
        }
        FunctionArguments::Subquery(_) => {
            return Err(QuarryError::Unsupported(format!(
                "subquery argument to {name} is not supported"
            )))
        }
    };
    let window = match &f.over {
        None => return Ok(call),
        Some(WindowType::NamedWindow(n)) => WindowRef::Named(n.value.clone()),
        Some(WindowType::WindowSpec(spec)) => WindowRef::Spec(convert_window_spec(spec)?),
    };
    Ok(Expr::new(ExprKind::Over {
        call: Box::new(call),
        window,
    }))
}

#[cfg(test)]
mod tests {
    use super::sql_to_statement;
    use crate::ast::{
        ExprKind, FrameBound, FrameUnits, FromKind, JoinKind, QueryBody, Statement, WindowRef,
    };

    #[test]
    fn converts_select_with_join_and_alias() {
        let stmt = sql_to_statement(
            "SELECT e.empno AS x, d.name FROM emp e LEFT JOIN dept d ON e.deptno = d.deptno",
        )
        .expect("convert");
        let Statement::Query(q) = stmt else {
            panic!("expected query");
        };
        let QueryBody::Select(sel) = &q.body else {
            panic!("expected select");
        };
        assert_eq!(sel.items[0].alias.as_deref(), Some("x"));
        let from = sel.from.as_ref().expect("from");
        let FromKind::Join(join) = &from.kind else {
            panic!("expected join");
        };
        assert_eq!(join.kind, JoinKind::Left);
        assert!(matches!(join.left.kind, FromKind::Alias { .. }));
    }

    #[test]
    fn order_by_wraps_query() {
        let stmt = sql_to_statement("SELECT empno FROM emp ORDER BY empno LIMIT 3")
            .expect("convert");
        let Statement::Query(q) = stmt else {
            panic!("expected query");
        };
        let QueryBody::Ordered(ordered) = &q.body else {
            panic!("expected ordered wrapper");
        };
        assert_eq!(ordered.order_by.len(), 1);
        assert!(ordered.fetch.is_some());
    }

    #[test]
    fn windowed_call_converts_to_over() {
        let stmt = sql_to_statement("SELECT SUM(sal) OVER (PARTITION BY deptno) FROM emp")
            .expect("convert");
        let Statement::Query(q) = stmt else {
            panic!("expected query");
        };
        let sel = q.as_select().expect("select");
        assert!(matches!(sel.items[0].expr.kind, ExprKind::Over { .. }));
    }

    #[test]
    fn window_frame_converts_bounds() {
        let stmt = sql_to_statement(
            "SELECT SUM(sal) OVER (ORDER BY empno ROWS BETWEEN 1 PRECEDING AND CURRENT ROW) FROM emp",
        )
        .expect("convert");
        let Statement::Query(q) = stmt else {
            panic!("expected query");
        };
        let sel = q.as_select().expect("select");
        let ExprKind::Over {
            window: WindowRef::Spec(spec),
            ..
        } = &sel.items[0].expr.kind
        else {
            panic!("expected inline window");
        };
        let frame = spec.frame.as_ref().expect("frame");
        assert_eq!(frame.units, FrameUnits::Rows);
        assert!(matches!(frame.start, FrameBound::Preceding(Some(_))));
        assert!(matches!(frame.end, Some(FrameBound::CurrentRow)));
        assert_eq!(frame.to_string(), "ROWS BETWEEN 1 PRECEDING AND CURRENT ROW");
    }

    #[test]
    fn negative_literal_folds() {
        let stmt = sql_to_statement("SELECT -5 FROM emp").expect("convert");
        let Statement::Query(q) = stmt else {
            panic!("expected query");
        };
        let sel = q.as_select().expect("select");
        assert_eq!(sel.items[0].expr.to_string(), "-5");
    }

    #[test]
    fn unsupported_statement_is_reported() {
        let err = sql_to_statement("CREATE TABLE t (a INT)").expect_err("must fail");
        assert!(err.to_string().contains("unsupported"), "err={err}");
    }
}
