//! Registration: build the namespace and scope graph before any type work.

use std::sync::Arc;

use quarry_common::{NodeId, QuarryError, Result};
use tracing::trace;

use crate::ast::{
    Expr, ExprKind, FromItem, FromKind, JoinCondition, Query, QueryBody, Select, Statement,
};

use super::namespace::{NamespaceId, NamespaceKind};
use super::scope::{ScopeId, ScopeKind};
use super::{SelectScopes, SqlValidator};

impl SqlValidator {
    pub(crate) fn register_statement(&mut self, stmt: &Statement) -> Result<()> {
        let root = self.root_scope;
        match stmt {
            Statement::Query(q) => {
                self.register_query(root, None, q, None, false)?;
            }
            Statement::Insert(ins) => {
                self.add_namespace(
                    Some(ins.id),
                    NamespaceKind::Table {
                        names: ins.table.clone(),
                    },
                );
                self.register_query(root, None, &ins.source, None, false)?;
            }
            Statement::Update(upd) => {
                self.register_dml_source(upd.id, upd.source_select.as_ref(), &upd.table)?;
            }
            Statement::Delete(del) => {
                self.register_dml_source(del.id, del.source_select.as_ref(), &del.table)?;
            }
            Statement::Merge(m) => {
                let source = self.register_dml_source(m.id, m.source_select.as_ref(), &m.target)?;
                if let Some(ins) = &m.insert {
                    // Inserted values see the joined source row.
                    let scope = self
                        .get_select_scope(source.id)
                        .ok_or_else(|| QuarryError::Planning("merge source has no scope".into()))?;
                    for v in &ins.values {
                        self.register_expr(scope, v)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Register the synthesized source select of UPDATE/DELETE/MERGE and
    /// bind the statement node to its target table namespace.
    fn register_dml_source(
        &mut self,
        stmt: NodeId,
        source: Option<&Arc<Query>>,
        target: &FromItem,
    ) -> Result<Arc<Query>> {
        let source = source.cloned().ok_or_else(|| {
            QuarryError::Planning(format!("statement {stmt} has no source select; rewrite first"))
        })?;
        self.dml_sources.insert(source.id);
        self.register_query(self.root_scope, None, &source, None, false)?;
        let target_ns = self.namespace_of(target.id)?;
        self.node_namespaces.insert(stmt, target_ns);
        Ok(source)
    }

    /// Register a query under `parent`; when `usage` is given the query is
    /// also a child of that scope under `alias`.
    pub(crate) fn register_query(
        &mut self,
        parent: ScopeId,
        usage: Option<ScopeId>,
        query: &Arc<Query>,
        alias: Option<&str>,
        nullable: bool,
    ) -> Result<NamespaceId> {
        let ns = match &query.body {
            QueryBody::Select(select) => self.register_select(parent, query, select)?,
            QueryBody::SetOp(op) => {
                let ns = self.add_namespace(
                    Some(query.id),
                    NamespaceKind::SetOp {
                        query: query.clone(),
                    },
                );
                self.register_query(parent, None, &op.left, None, false)?;
                self.register_query(parent, None, &op.right, None, false)?;
                ns
            }
            QueryBody::Values(values) => {
                let ns = self.add_namespace(
                    Some(query.id),
                    NamespaceKind::Values {
                        query: query.clone(),
                        scope: parent,
                    },
                );
                for row in &values.rows {
                    for v in &row.values {
                        self.register_expr(parent, v)?;
                    }
                }
                ns
            }
            QueryBody::Ordered(_) | QueryBody::Table(_) => {
                return Err(QuarryError::Planning(format!(
                    "query {} must be rewritten before registration",
                    query.id
                )))
            }
        };
        self.finish_child(ns, usage, alias, nullable)?;
        Ok(ns)
    }

    fn finish_child(
        &mut self,
        ns: NamespaceId,
        usage: Option<ScopeId>,
        alias: Option<&str>,
        nullable: bool,
    ) -> Result<()> {
        if nullable {
            self.make_nullable(ns)?;
        }
        if let Some(usage) = usage {
            let alias = match alias {
                Some(a) => a.to_string(),
                None => self.next_alias(),
            };
            self.add_child(usage, &alias, ns, nullable);
        }
        Ok(())
    }

    fn register_select(
        &mut self,
        parent: ScopeId,
        query: &Arc<Query>,
        select: &Select,
    ) -> Result<NamespaceId> {
        let id = query.id;
        let ns = self.add_namespace(
            Some(id),
            NamespaceKind::Select {
                query: query.clone(),
            },
        );
        self.queries.insert(id, query.clone());
        let select_scope = self.add_scope(Some(parent), Some(id), ScopeKind::Select { select: id });
        trace!(select = %id, scope = select_scope.0, "registering select");

        if let Some(from) = &select.from {
            self.register_from(parent, Some(select_scope), from, None, false)?;
        }
        for e in select.where_clause.iter().chain(select.group_by.iter()) {
            self.register_expr(select_scope, e)?;
        }
        for w in &select.windows {
            for e in &w.spec.partition_by {
                self.register_expr(select_scope, e)?;
            }
            for o in &w.spec.order_by {
                self.register_expr(select_scope, &o.expr)?;
            }
        }

        let is_aggregate = !select.group_by.is_empty()
            || select.having.is_some()
            || select
                .items
                .iter()
                .any(|i| self.find_aggregate(&i.expr, false).is_some());
        let aggregating = is_aggregate.then(|| {
            self.add_scope(
                Some(select_scope),
                Some(id),
                ScopeKind::Aggregating {
                    select: id,
                    distinct: false,
                },
            )
        });
        let item_scope = aggregating.unwrap_or(select_scope);
        for item in &select.items {
            self.register_expr(item_scope, &item.expr)?;
        }
        if let Some(having) = &select.having {
            self.register_expr(item_scope, having)?;
        }
        let distinct = select.distinct.then(|| {
            self.add_scope(
                Some(item_scope),
                Some(id),
                ScopeKind::Aggregating {
                    select: id,
                    distinct: true,
                },
            )
        });
        let order = (!select.order_by.is_empty()).then(|| {
            self.add_scope(
                Some(distinct.unwrap_or(item_scope)),
                Some(id),
                ScopeKind::OrderBy { select: id },
            )
        });
        if let Some(order_scope) = order {
            for o in &select.order_by {
                self.register_expr(order_scope, &o.expr)?;
            }
        }
        for e in select.offset.iter().chain(select.fetch.iter()) {
            self.register_expr(select_scope, e)?;
        }
        self.select_scopes.insert(
            id,
            SelectScopes {
                select: select_scope,
                aggregating,
                distinct,
                order,
                is_aggregate,
            },
        );
        Ok(ns)
    }

    /// Register a FROM item. Items see `parent`, not each other, unless
    /// LATERAL (or UNNEST), in which case they see the scope being built.
    fn register_from(
        &mut self,
        parent: ScopeId,
        usage: Option<ScopeId>,
        item: &FromItem,
        alias: Option<&str>,
        nullable: bool,
    ) -> Result<NamespaceId> {
        match &item.kind {
            FromKind::Table(names) => {
                let ns = self.add_namespace(
                    Some(item.id),
                    NamespaceKind::Table {
                        names: names.clone(),
                    },
                );
                let alias = alias.map(str::to_string).or_else(|| names.last().cloned());
                self.finish_child(ns, usage, alias.as_deref(), nullable)?;
                Ok(ns)
            }
            FromKind::Derived { query, lateral } => {
                let scope = if *lateral {
                    usage.unwrap_or(parent)
                } else {
                    parent
                };
                let ns = self.register_query(scope, None, query, None, false)?;
                self.node_namespaces.insert(item.id, ns);
                self.finish_child(ns, usage, alias, nullable)?;
                Ok(ns)
            }
            FromKind::Join(join) => {
                let join_scope =
                    self.add_scope(Some(parent), Some(item.id), ScopeKind::Join { usage });
                self.join_scopes.insert(item.id, join_scope);
                let left = self.register_from(
                    parent,
                    Some(join_scope),
                    &join.left,
                    None,
                    nullable || join.kind.generates_nulls_on_left(),
                )?;
                let right = self.register_from(
                    parent,
                    Some(join_scope),
                    &join.right,
                    None,
                    nullable || join.kind.generates_nulls_on_right(),
                )?;
                if let JoinCondition::On(cond) = &join.condition {
                    self.register_expr(join_scope, cond)?;
                }
                let ns = self.add_namespace(
                    Some(item.id),
                    NamespaceKind::Join {
                        left,
                        right,
                        kind: join.kind,
                    },
                );
                if nullable {
                    self.make_nullable(ns)?;
                }
                Ok(ns)
            }
            FromKind::Alias {
                item: inner,
                alias,
                columns,
            } => {
                if columns.is_empty() {
                    let ns = self.register_from(parent, usage, inner, Some(alias), nullable)?;
                    self.node_namespaces.insert(item.id, ns);
                    return Ok(ns);
                }
                let inner_ns = self.register_from(parent, None, inner, Some(alias), nullable)?;
                let ns = self.add_namespace(
                    Some(item.id),
                    NamespaceKind::Alias {
                        inner: inner_ns,
                        columns: columns.clone(),
                    },
                );
                self.finish_child(ns, usage, Some(alias), nullable)?;
                Ok(ns)
            }
            FromKind::Unnest {
                exprs,
                with_ordinality,
            } => {
                let scope = usage.unwrap_or(parent);
                for e in exprs {
                    self.register_expr(scope, e)?;
                }
                let ns = self.add_namespace(
                    Some(item.id),
                    NamespaceKind::Unnest {
                        exprs: exprs.clone(),
                        scope,
                        with_ordinality: *with_ordinality,
                    },
                );
                self.finish_child(ns, usage, alias, nullable)?;
                Ok(ns)
            }
            FromKind::Function { call, lateral } => {
                let scope = if *lateral {
                    usage.unwrap_or(parent)
                } else {
                    parent
                };
                self.register_expr(scope, call)?;
                let ns = self.add_namespace(
                    Some(item.id),
                    NamespaceKind::Procedure {
                        call: call.clone(),
                        scope,
                    },
                );
                self.finish_child(ns, usage, alias, nullable)?;
                Ok(ns)
            }
        }
    }

    /// Record the scope of every node in `expr` and register the queries
    /// nested in it.
    pub(crate) fn register_expr(&mut self, scope: ScopeId, expr: &Expr) -> Result<()> {
        self.expr_scopes.insert(expr.id, scope);
        match &expr.kind {
            ExprKind::ScalarSubquery(q) | ExprKind::Exists(q) => {
                self.register_query(scope, None, q, None, false)?;
            }
            ExprKind::InSubquery { query, .. } => {
                self.register_query(scope, None, query, None, false)?;
            }
            ExprKind::Multiset(q) => {
                let inner = self.register_query(scope, None, q, None, false)?;
                self.add_namespace(Some(expr.id), NamespaceKind::Collect { inner });
            }
            _ => {}
        }
        for child in expr.children() {
            self.register_expr(scope, child)?;
        }
        Ok(())
    }
}
