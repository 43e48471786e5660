//! Aggregation legality: which expressions may appear above a GROUP BY or
//! in the ORDER BY of a SELECT DISTINCT.

use quarry_common::{NodeId, Result, ValidationErrorKind};

use crate::ast::{walk_query, AstVisitor, Expr, ExprKind, Query, WindowRef};

use super::scope::{ScopeId, ScopeKind};
use super::{fail, Resolution, SqlValidator};

/// Collects every identifier of a subquery tree.
#[derive(Default)]
struct IdentifierCollector<'a> {
    found: Vec<&'a Expr>,
}

impl<'a> AstVisitor<'a> for IdentifierCollector<'a> {
    fn expr(&mut self, expr: &'a Expr) {
        if matches!(expr.kind, ExprKind::Identifier(_)) {
            self.found.push(expr);
        }
    }
}

/// Grouping context of one check.
struct AggContext {
    select_scope: Option<ScopeId>,
    distinct: bool,
    keys: Vec<String>,
}

impl SqlValidator {
    /// First aggregate call in `expr`, not looking into nested queries.
    ///
    /// A windowed aggregate counts only when `include_windowed`; the
    /// operands and window of an OVER are searched either way.
    pub(crate) fn find_aggregate<'e>(
        &self,
        expr: &'e Expr,
        include_windowed: bool,
    ) -> Option<&'e Expr> {
        match &expr.kind {
            ExprKind::Over { call, window } => {
                if include_windowed {
                    return Some(expr);
                }
                if let ExprKind::Call { operands, .. } = &call.kind {
                    if let Some(found) = operands
                        .iter()
                        .find_map(|o| self.find_aggregate(o, include_windowed))
                    {
                        return Some(found);
                    }
                }
                if let WindowRef::Spec(spec) = window {
                    return spec
                        .partition_by
                        .iter()
                        .chain(spec.order_by.iter().map(|o| &o.expr))
                        .find_map(|e| self.find_aggregate(e, include_windowed));
                }
                None
            }
            ExprKind::Call { op, .. } if self.operators.is_aggregator(op) => Some(expr),
            _ => expr
                .children()
                .into_iter()
                .find_map(|c| self.find_aggregate(c, include_windowed)),
        }
    }

    /// Comparison key of an expression: identifiers are spelled by what
    /// they resolved to, so `deptno` and `emp.deptno` agree.
    pub(crate) fn expr_key(&self, expr: &Expr) -> String {
        let cs = self.config.case_sensitive;
        let fold = |s: String| if cs { s } else { s.to_ascii_lowercase() };
        expr.render(&|e| {
            let ExprKind::Identifier(names) = &e.kind else {
                return None;
            };
            Some(match self.resolutions.get(&e.id) {
                Some(Resolution::Column {
                    namespace,
                    alias,
                    path,
                    ..
                }) => fold(format!("{alias}#{}.{}", namespace.0, path.join("."))),
                Some(Resolution::SelectAlias { ordinal, .. }) => format!("${ordinal}"),
                None => fold(names.join(".")),
            })
        })
    }

    pub(crate) fn is_group_key(&self, select: NodeId, expr: &Expr) -> bool {
        let Some(keys) = self.group_exprs.get(&select) else {
            return false;
        };
        let key = self.expr_key(expr);
        keys.iter().any(|k| self.expr_key(k) == key)
    }

    /// Check that `expr`, validated in the aggregating scope `scope`, only
    /// refers to grouped columns outside aggregate calls.
    pub(crate) fn check_aggregate_expr(&self, scope: ScopeId, expr: &Expr) -> Result<()> {
        let ScopeKind::Aggregating { select, distinct } = self.sc(scope).kind else {
            return Ok(());
        };
        let select_scope = self.get_select_scope(select);
        let keys = if distinct {
            self.expanded_select_lists
                .get(&select)
                .map(|items| items.iter().map(|i| self.expr_key(&i.expr)).collect())
                .unwrap_or_default()
        } else {
            self.group_exprs
                .get(&select)
                .map(|g| g.iter().map(|e| self.expr_key(e)).collect())
                .unwrap_or_default()
        };
        let ctx = AggContext {
            select_scope,
            distinct,
            keys,
        };
        self.check_agg_node(&ctx, expr)
    }

    fn not_grouped(&self, ctx: &AggContext, expr: &Expr) -> quarry_common::QuarryError {
        let kind = if ctx.distinct {
            ValidationErrorKind::NotSelectDistinctExpr(expr.to_string())
        } else {
            ValidationErrorKind::NotGroupExpr(expr.to_string())
        };
        fail(kind, Some(expr.id))
    }

    fn check_agg_node(&self, ctx: &AggContext, expr: &Expr) -> Result<()> {
        if ctx.keys.contains(&self.expr_key(expr)) {
            return Ok(());
        }
        match &expr.kind {
            ExprKind::Call { op, .. } if self.operators.is_aggregator(op) => {
                if ctx.distinct {
                    Err(self.not_grouped(ctx, expr))
                } else {
                    Ok(())
                }
            }
            ExprKind::Identifier(_) => match self.resolutions.get(&expr.id) {
                Some(Resolution::SelectAlias { .. }) => Ok(()),
                Some(Resolution::Column { scope, .. }) if Some(*scope) != ctx.select_scope => {
                    Ok(())
                }
                _ => Err(self.not_grouped(ctx, expr)),
            },
            ExprKind::Literal(_) | ExprKind::DynamicParam(_) => Ok(()),
            ExprKind::Over { call, window } => {
                if let ExprKind::Call { operands, .. } = &call.kind {
                    for o in operands {
                        self.check_agg_node(ctx, o)?;
                    }
                }
                let named;
                let spec = match window {
                    WindowRef::Spec(spec) => Some(spec),
                    WindowRef::Named(name) => {
                        named = ctx.select_scope.and_then(|s| self.lookup_window(s, name));
                        named.as_ref()
                    }
                };
                if let Some(spec) = spec {
                    for e in spec
                        .partition_by
                        .iter()
                        .chain(spec.order_by.iter().map(|o| &o.expr))
                    {
                        self.check_agg_node(ctx, e)?;
                    }
                }
                Ok(())
            }
            ExprKind::ScalarSubquery(q) | ExprKind::Exists(q) | ExprKind::Multiset(q) => {
                self.check_subquery(ctx, q)
            }
            ExprKind::InSubquery { expr: lhs, query, .. } => {
                self.check_agg_node(ctx, lhs)?;
                self.check_subquery(ctx, query)
            }
            _ => {
                for child in expr.children() {
                    self.check_agg_node(ctx, child)?;
                }
                Ok(())
            }
        }
    }

    /// Correlated references from a subquery into this SELECT's FROM must
    /// be grouped too.
    fn check_subquery(&self, ctx: &AggContext, query: &Query) -> Result<()> {
        let mut collector = IdentifierCollector::default();
        walk_query(query, &mut collector);
        for ident in collector.found {
            let Some(Resolution::Column { scope, .. }) = self.resolutions.get(&ident.id) else {
                continue;
            };
            if Some(*scope) == ctx.select_scope && !ctx.keys.contains(&self.expr_key(ident)) {
                return Err(self.not_grouped(ctx, ident));
            }
        }
        Ok(())
    }
}
