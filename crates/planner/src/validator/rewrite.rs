//! Unconditional syntactic rewrites applied before registration.
//!
//! - a VALUES query outside FROM becomes `SELECT * FROM (VALUES ...)`
//! - ORDER BY/OFFSET/FETCH around a query moves into it when it is a bare
//!   SELECT, otherwise the query is wrapped in `SELECT * FROM (...)`
//! - `TABLE t` becomes `SELECT * FROM t`
//! - UPDATE, DELETE and MERGE get a synthesized source SELECT
//!
//! Rewrites build a new tree; every node kept from the input keeps its id.
//! A SELECT that absorbs its ORDER BY wrapper takes the wrapper's id, so a
//! statement keeps its top-level id.

use std::sync::Arc;

use crate::ast::{
    Assignment, Delete, Expr, ExprKind, FromItem, FromKind, Insert, Join, JoinCondition,
    JoinKind, Merge, MergeInsert, MergeUpdate, OrderItem, Query, QueryBody, Row, Select,
    SelectItem, SetOp, Statement, Update, Values, WindowDef, WindowRef, WindowSpec,
};

pub fn rewrite_statement(stmt: Statement) -> Statement {
    match stmt {
        Statement::Query(q) => Statement::Query(rewrite_query(&q, false)),
        Statement::Insert(ins) => Statement::Insert(Insert {
            // INSERT ... VALUES keeps its VALUES so target types reach the rows.
            source: rewrite_query(&ins.source, true),
            ..ins
        }),
        Statement::Update(upd) => Statement::Update(rewrite_update(&upd)),
        Statement::Delete(del) => Statement::Delete(rewrite_delete(&del)),
        Statement::Merge(m) => Statement::Merge(rewrite_merge(&m)),
    }
}

fn star_select(from: FromItem) -> Select {
    Select {
        items: vec![SelectItem::new(Expr::star())],
        from: Some(from),
        ..Default::default()
    }
}

fn rewrite_assignments(assignments: &[Assignment]) -> Vec<Assignment> {
    assignments
        .iter()
        .map(|a| Assignment {
            column: a.column.clone(),
            value: rewrite_expr(&a.value),
        })
        .collect()
}

fn rewrite_update(upd: &Update) -> Update {
    let table = rewrite_from(&upd.table);
    let assignments = rewrite_assignments(&upd.assignments);
    let selection = upd.selection.as_ref().map(rewrite_expr);
    let mut select = star_select(table.clone());
    select
        .items
        .extend(assignments.iter().map(|a| SelectItem::new(a.value.clone())));
    select.where_clause = selection.clone();
    Update {
        id: upd.id,
        table,
        assignments,
        selection,
        source_select: Some(Query::new(QueryBody::Select(select))),
    }
}

fn rewrite_delete(del: &Delete) -> Delete {
    let table = rewrite_from(&del.table);
    let selection = del.selection.as_ref().map(rewrite_expr);
    let mut select = star_select(table.clone());
    select.where_clause = selection.clone();
    Delete {
        id: del.id,
        table,
        selection,
        source_select: Some(Query::new(QueryBody::Select(select))),
    }
}

fn rewrite_merge(m: &Merge) -> Merge {
    let target = rewrite_from(&m.target);
    let source = rewrite_from(&m.source);
    let on = rewrite_expr(&m.on);
    let update = m.update.as_ref().map(|u| MergeUpdate {
        id: u.id,
        assignments: rewrite_assignments(&u.assignments),
    });
    let insert = m.insert.as_ref().map(|i| MergeInsert {
        id: i.id,
        columns: i.columns.clone(),
        values: i.values.iter().map(rewrite_expr).collect(),
    });
    // Unmatched source rows must survive when there is an INSERT branch.
    let join = if insert.is_some() {
        source
            .clone()
            .join(target.clone(), JoinKind::Left, JoinCondition::On(on.clone()))
    } else {
        target
            .clone()
            .join(source.clone(), JoinKind::Inner, JoinCondition::On(on.clone()))
    };
    let mut select = star_select(join);
    if let Some(u) = &update {
        select
            .items
            .extend(u.assignments.iter().map(|a| SelectItem::new(a.value.clone())));
    }
    Merge {
        id: m.id,
        target,
        source,
        on,
        update,
        insert,
        delete: m.delete,
        source_select: Some(Query::new(QueryBody::Select(select))),
    }
}

/// Rewrite a query; `under_from` is true for a query directly in FROM (or
/// the source of an INSERT), where VALUES stays as it is.
pub fn rewrite_query(query: &Arc<Query>, under_from: bool) -> Arc<Query> {
    match &query.body {
        QueryBody::Select(s) => Query::with_id(query.id, QueryBody::Select(rewrite_select(s))),
        QueryBody::SetOp(op) => Query::with_id(
            query.id,
            QueryBody::SetOp(SetOp {
                kind: op.kind,
                all: op.all,
                left: rewrite_query(&op.left, false),
                right: rewrite_query(&op.right, false),
            }),
        ),
        QueryBody::Values(values) => {
            let rows = values
                .rows
                .iter()
                .map(|r| Row {
                    id: r.id,
                    values: r.values.iter().map(rewrite_expr).collect(),
                })
                .collect();
            let values = Query::with_id(query.id, QueryBody::Values(Values { rows }));
            if under_from {
                values
            } else {
                Query::new(QueryBody::Select(star_select(FromItem::new(
                    FromKind::Derived {
                        query: values,
                        lateral: false,
                    },
                ))))
            }
        }
        QueryBody::Ordered(o) => {
            let inner = rewrite_query(&o.query, false);
            let order_by = rewrite_order(&o.order_by);
            let offset = o.offset.as_ref().map(rewrite_expr);
            let fetch = o.fetch.as_ref().map(rewrite_expr);
            if let QueryBody::Select(s) = &inner.body {
                if s.order_by.is_empty() && s.offset.is_none() && s.fetch.is_none() {
                    let mut s = s.clone();
                    s.order_by = order_by;
                    s.offset = offset;
                    s.fetch = fetch;
                    return Query::with_id(query.id, QueryBody::Select(s));
                }
            }
            let mut select = star_select(FromItem::new(FromKind::Derived {
                query: inner,
                lateral: false,
            }));
            select.order_by = order_by;
            select.offset = offset;
            select.fetch = fetch;
            Query::with_id(query.id, QueryBody::Select(select))
        }
        QueryBody::Table(names) => Query::with_id(
            query.id,
            QueryBody::Select(star_select(FromItem::new(FromKind::Table(names.clone())))),
        ),
    }
}

fn rewrite_select(s: &Select) -> Select {
    Select {
        distinct: s.distinct,
        items: s
            .items
            .iter()
            .map(|i| SelectItem {
                expr: rewrite_expr(&i.expr),
                alias: i.alias.clone(),
            })
            .collect(),
        from: s.from.as_ref().map(rewrite_from),
        where_clause: s.where_clause.as_ref().map(rewrite_expr),
        group_by: s.group_by.iter().map(rewrite_expr).collect(),
        having: s.having.as_ref().map(rewrite_expr),
        windows: s
            .windows
            .iter()
            .map(|w| WindowDef {
                id: w.id,
                name: w.name.clone(),
                spec: rewrite_window_spec(&w.spec),
            })
            .collect(),
        order_by: rewrite_order(&s.order_by),
        offset: s.offset.as_ref().map(rewrite_expr),
        fetch: s.fetch.as_ref().map(rewrite_expr),
    }
}

fn rewrite_order(items: &[OrderItem]) -> Vec<OrderItem> {
    items
        .iter()
        .map(|o| OrderItem {
            expr: rewrite_expr(&o.expr),
            asc: o.asc,
            nulls_first: o.nulls_first,
        })
        .collect()
}

fn rewrite_window_spec(spec: &WindowSpec) -> WindowSpec {
    WindowSpec {
        base: spec.base.clone(),
        partition_by: spec.partition_by.iter().map(rewrite_expr).collect(),
        order_by: rewrite_order(&spec.order_by),
        frame: spec.frame.clone(),
    }
}

pub fn rewrite_from(item: &FromItem) -> FromItem {
    let kind = match &item.kind {
        FromKind::Table(names) => FromKind::Table(names.clone()),
        FromKind::Derived { query, lateral } => FromKind::Derived {
            query: rewrite_query(query, true),
            lateral: *lateral,
        },
        FromKind::Join(j) => FromKind::Join(Box::new(Join {
            left: rewrite_from(&j.left),
            right: rewrite_from(&j.right),
            kind: j.kind,
            natural: j.natural,
            condition: match &j.condition {
                JoinCondition::On(e) => JoinCondition::On(rewrite_expr(e)),
                other => other.clone(),
            },
        })),
        FromKind::Alias {
            item,
            alias,
            columns,
        } => FromKind::Alias {
            item: Box::new(rewrite_from(item)),
            alias: alias.clone(),
            columns: columns.clone(),
        },
        FromKind::Unnest {
            exprs,
            with_ordinality,
        } => FromKind::Unnest {
            exprs: exprs.iter().map(rewrite_expr).collect(),
            with_ordinality: *with_ordinality,
        },
        FromKind::Function { call, lateral } => FromKind::Function {
            call: rewrite_expr(call),
            lateral: *lateral,
        },
    };
    FromItem { id: item.id, kind }
}

pub fn rewrite_expr(e: &Expr) -> Expr {
    let boxed = |x: &Expr| Box::new(rewrite_expr(x));
    let kind = match &e.kind {
        ExprKind::Identifier(_) | ExprKind::Literal(_) | ExprKind::DynamicParam(_) => {
            e.kind.clone()
        }
        ExprKind::Call {
            op,
            operands,
            distinct,
        } => ExprKind::Call {
            op: op.clone(),
            operands: operands.iter().map(rewrite_expr).collect(),
            distinct: *distinct,
        },
        ExprKind::Case {
            operand,
            whens,
            else_result,
        } => ExprKind::Case {
            operand: operand.as_deref().map(boxed),
            whens: whens
                .iter()
                .map(|(w, t)| (rewrite_expr(w), rewrite_expr(t)))
                .collect(),
            else_result: else_result.as_deref().map(boxed),
        },
        ExprKind::Cast { expr, type_name } => ExprKind::Cast {
            expr: boxed(expr),
            type_name: type_name.clone(),
        },
        ExprKind::Row(items) => ExprKind::Row(items.iter().map(rewrite_expr).collect()),
        ExprKind::ScalarSubquery(q) => ExprKind::ScalarSubquery(rewrite_query(q, false)),
        ExprKind::Exists(q) => ExprKind::Exists(rewrite_query(q, false)),
        ExprKind::Multiset(q) => ExprKind::Multiset(rewrite_query(q, false)),
        ExprKind::InSubquery {
            expr,
            query,
            negated,
        } => ExprKind::InSubquery {
            expr: boxed(expr),
            query: rewrite_query(query, false),
            negated: *negated,
        },
        ExprKind::InList {
            expr,
            list,
            negated,
        } => ExprKind::InList {
            expr: boxed(expr),
            list: list.iter().map(rewrite_expr).collect(),
            negated: *negated,
        },
        ExprKind::Over { call, window } => ExprKind::Over {
            call: boxed(call),
            window: match window {
                WindowRef::Named(n) => WindowRef::Named(n.clone()),
                WindowRef::Spec(spec) => WindowRef::Spec(rewrite_window_spec(spec)),
            },
        },
    };
    Expr { id: e.id, kind }
}

#[cfg(test)]
mod tests {
    use super::{rewrite_query, rewrite_statement};
    use crate::ast::{FromKind, QueryBody, Statement};
    use crate::sql_frontend::sql_to_statement;

    fn query_of(stmt: &Statement) -> &std::sync::Arc<crate::ast::Query> {
        match stmt {
            Statement::Query(q) => q,
            other => panic!("expected query, got {other:?}"),
        }
    }

    #[test]
    fn top_level_values_is_wrapped_in_select() {
        let stmt = sql_to_statement("VALUES (1, 'a'), (2, 'b')").expect("parse");
        let original_id = query_of(&stmt).id;
        let rewritten = rewrite_statement(stmt);
        let q = query_of(&rewritten);
        let select = q.as_select().expect("select");
        let from = select.from.as_ref().expect("from");
        match &from.kind {
            FromKind::Derived { query, .. } => {
                assert_eq!(query.id, original_id);
                assert!(matches!(query.body, QueryBody::Values(_)));
            }
            other => panic!("unexpected from {other:?}"),
        }
    }

    #[test]
    fn order_by_moves_into_plain_select() {
        let stmt = sql_to_statement("SELECT empno FROM emp ORDER BY empno LIMIT 3").expect("parse");
        let original_id = query_of(&stmt).id;
        let rewritten = rewrite_statement(stmt);
        assert_eq!(query_of(&rewritten).id, original_id);
        let select = query_of(&rewritten).as_select().expect("select").clone();
        assert_eq!(select.order_by.len(), 1);
        assert!(select.fetch.is_some());
    }

    #[test]
    fn rewrite_is_idempotent() {
        let stmt = sql_to_statement(
            "SELECT * FROM (VALUES (1)) AS t(x) UNION SELECT deptno FROM dept ORDER BY 1",
        )
        .expect("parse");
        let once = rewrite_statement(stmt);
        let q1 = query_of(&once).clone();
        let q2 = rewrite_query(&q1, false);
        assert_eq!(format!("{q1:?}"), format!("{q2:?}"));
    }

    #[test]
    fn update_gets_source_select_sharing_ids() {
        let stmt =
            sql_to_statement("UPDATE emp SET sal = sal + 1 WHERE deptno = 10").expect("parse");
        let Statement::Update(upd) = rewrite_statement(stmt) else {
            panic!("expected update");
        };
        let source = upd.source_select.expect("source select");
        let select = source.as_select().expect("select");
        assert_eq!(select.items.len(), 2);
        assert_eq!(select.items[1].expr.id, upd.assignments[0].value.id);
        assert_eq!(select.from.as_ref().map(|f| f.id), Some(upd.table.id));
    }
}
