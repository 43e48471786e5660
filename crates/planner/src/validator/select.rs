//! Clause-by-clause validation of SELECT, set operations, VALUES and FROM.

use std::collections::HashSet;
use std::sync::Arc;

use arrow_schema::DataType;
use quarry_common::{NodeId, QuarryError, Result, ValidationErrorKind};
use tracing::{debug, trace};

use crate::ast::{
    Expr, ExprKind, FromItem, FromKind, Join, JoinCondition, JoinKind, Literal, Query, QueryBody,
    Select, SelectItem,
};
use crate::catalog::AccessType;
use crate::types::{comparable, is_numeric, least_restrictive_rows, ColumnType, RowType};

use super::namespace::NamespaceId;
use super::scope::{ScopeId, UsingGroup};
use super::{fail, Resolution, SelectScopes, SqlValidator};

/// Output name of an unaliased select item.
pub(crate) fn derive_alias(expr: &Expr, ordinal: usize) -> String {
    match expr.identifier().and_then(|n| n.last()) {
        Some(last) if last != "*" => last.clone(),
        _ => format!("EXPR${ordinal}"),
    }
}

impl SqlValidator {
    pub(crate) fn validate_select(&mut self, query: &Arc<Query>) -> Result<RowType> {
        let select = query.as_select().ok_or_else(|| {
            QuarryError::Planning(format!("query {} is not a SELECT", query.id))
        })?;
        let scopes = self.select_scopes.get(&query.id).cloned().ok_or_else(|| {
            QuarryError::Planning(format!("select {} was not registered", query.id))
        })?;
        trace!(select = %query.id, aggregate = scopes.is_aggregate, "validating select");

        match &select.from {
            Some(from) => {
                self.validate_from(query.id, from)?;
            }
            None if self.config.conformance.is_from_required() => {
                return Err(fail(ValidationErrorKind::SelectMissingFrom, Some(query.id)))
            }
            None => {}
        }
        self.validate_where(select, scopes.select)?;
        self.validate_group_by(query.id, select, scopes.select)?;
        self.validate_having(select, &scopes)?;
        self.validate_window_clause(select, scopes.select)?;
        let row_type = self.validate_select_list(query.id, select, &scopes)?;
        self.select_row_types.insert(query.id, row_type.clone());
        self.validate_order_by(select, &scopes, &row_type)?;
        for (clause, e) in [("OFFSET", &select.offset), ("FETCH", &select.fetch)] {
            if let Some(e) = e {
                self.validate_row_count(scopes.select, clause, e)?;
            }
        }
        debug!(select = %query.id, row_type = %row_type, "validated select");
        Ok(row_type)
    }

    // -------------------------
    // FROM
    // -------------------------

    fn validate_from(&mut self, select: NodeId, item: &FromItem) -> Result<RowType> {
        match &item.kind {
            FromKind::Table(_) => {
                let ns = self.namespace_of(item.id)?;
                let row_type = self.namespace_row_type(ns)?;
                if !self.dml_sources.contains(&select) {
                    self.check_access(ns, AccessType::Select, item.id)?;
                }
                Ok(row_type)
            }
            FromKind::Join(join) => self.validate_join(select, item, join),
            FromKind::Alias { item: inner, .. } => {
                self.validate_from(select, inner)?;
                let ns = self.namespace_of(item.id)?;
                self.namespace_row_type(ns)
            }
            _ => {
                let ns = self.namespace_of(item.id)?;
                self.namespace_row_type(ns)
            }
        }
    }

    fn validate_join(&mut self, select: NodeId, item: &FromItem, join: &Join) -> Result<RowType> {
        let left_type = self.validate_from(select, &join.left)?;
        let right_type = self.validate_from(select, &join.right)?;
        let has_condition = !matches!(join.condition, JoinCondition::None);
        match join.kind {
            JoinKind::Cross if has_condition || join.natural => {
                return Err(fail(
                    ValidationErrorKind::CrossJoinDisallowsCondition,
                    Some(item.id),
                ))
            }
            JoinKind::Cross | JoinKind::Comma => {}
            _ if join.natural && has_condition => {
                return Err(fail(
                    ValidationErrorKind::NaturalDisallowsOnOrUsing,
                    Some(item.id),
                ))
            }
            _ if !join.natural && !has_condition => {
                return Err(fail(ValidationErrorKind::JoinRequiresCondition, Some(item.id)))
            }
            _ => {}
        }
        let join_scope = self.get_join_scope(item.id).ok_or_else(|| {
            QuarryError::Planning(format!("join {} has no scope", item.id))
        })?;
        match &join.condition {
            JoinCondition::On(cond) => {
                if let Some(agg) = self.find_aggregate(cond, true) {
                    return Err(fail(ValidationErrorKind::AggregateIllegalInOn, Some(agg.id)));
                }
                self.infer_unknown_types(join_scope, cond, Some(ColumnType::boolean(true)))?;
                let ty = self.derive_type(join_scope, cond)?;
                if !ty.is_boolean() {
                    return Err(fail(
                        ValidationErrorKind::ConditionMustBeBoolean,
                        Some(cond.id),
                    ));
                }
            }
            JoinCondition::Using(columns) => {
                self.validate_using(item, join, join_scope, columns, &left_type, &right_type)?
            }
            JoinCondition::None if join.natural => {
                let columns: Vec<String> = left_type
                    .field_names()
                    .into_iter()
                    .filter(|n| right_type.index_of(n, self.config.case_sensitive).is_some())
                    .collect();
                self.validate_using(item, join, join_scope, &columns, &left_type, &right_type)?
            }
            JoinCondition::None => {}
        }
        let ns = self.namespace_of(item.id)?;
        self.namespace_row_type(ns)
    }

    fn validate_using(
        &mut self,
        item: &FromItem,
        join: &Join,
        join_scope: ScopeId,
        columns: &[String],
        left_type: &RowType,
        right_type: &RowType,
    ) -> Result<()> {
        let cs = self.config.case_sensitive;
        let left_leaves = self.leaf_namespaces(&join.left);
        let right_leaves = self.leaf_namespaces(&join.right);
        for column in columns {
            let l = left_type.positions_of(column, cs);
            let r = right_type.positions_of(column, cs);
            if l.is_empty() || r.is_empty() {
                return Err(fail(
                    ValidationErrorKind::ColumnNotFound(column.clone()),
                    Some(item.id),
                ));
            }
            if l.len() > 1 || r.len() > 1 {
                return Err(fail(
                    ValidationErrorKind::ColumnInUsingNotUnique(column.clone()),
                    Some(item.id),
                ));
            }
            let lt = left_type.column_type(l[0]);
            let rt = right_type.column_type(r[0]);
            if !comparable(&lt.data_type, &rt.data_type) {
                return Err(fail(
                    ValidationErrorKind::CannotApplyOperator {
                        operator: "=".to_string(),
                        types: format!("<{lt}>, <{rt}>"),
                    },
                    Some(item.id),
                ));
            }
            let left_has = self.leaves_with_column(&left_leaves, column)?;
            let right_has = self.leaves_with_column(&right_leaves, column)?;
            let preferred = if join.kind == JoinKind::Right {
                right_has.first().or(left_has.first())
            } else {
                left_has.first().or(right_has.first())
            };
            let Some(preferred) = preferred.copied() else {
                continue;
            };
            let mut namespaces = left_has;
            namespaces.extend(right_has);
            self.add_using_group(
                join_scope,
                UsingGroup {
                    column: column.clone(),
                    namespaces,
                    preferred,
                },
            );
        }
        Ok(())
    }

    /// Namespaces that are scope children somewhere beneath `item`.
    fn leaf_namespaces(&self, item: &FromItem) -> Vec<NamespaceId> {
        match &item.kind {
            FromKind::Join(join) => {
                let mut out = self.leaf_namespaces(&join.left);
                out.extend(self.leaf_namespaces(&join.right));
                out
            }
            FromKind::Alias { item: inner, columns, .. } if columns.is_empty() => {
                self.leaf_namespaces(inner)
            }
            _ => self.node_namespaces.get(&item.id).copied().into_iter().collect(),
        }
    }

    fn leaves_with_column(
        &mut self,
        leaves: &[NamespaceId],
        column: &str,
    ) -> Result<Vec<NamespaceId>> {
        let mut out = vec![];
        for ns in leaves {
            let row_type = self.namespace_row_type(*ns)?;
            if row_type.index_of(column, self.config.case_sensitive).is_some() {
                out.push(*ns);
            }
        }
        Ok(out)
    }

    pub(crate) fn check_access(
        &self,
        ns: NamespaceId,
        access: AccessType,
        node: NodeId,
    ) -> Result<()> {
        let Some(table) = self.ns(ns).table() else {
            return Ok(());
        };
        if table.allowed_access().allows(access) {
            return Ok(());
        }
        Err(fail(
            ValidationErrorKind::AccessNotAllowed {
                operation: access.to_string(),
                table: table.qualified_name().join("."),
            },
            Some(node),
        ))
    }

    // -------------------------
    // WHERE / GROUP BY / HAVING
    // -------------------------

    fn validate_where(&mut self, select: &Select, scope: ScopeId) -> Result<()> {
        let Some(cond) = &select.where_clause else {
            return Ok(());
        };
        if let Some(agg) = self.find_aggregate(cond, true) {
            return Err(fail(ValidationErrorKind::AggregateIllegalInWhere, Some(agg.id)));
        }
        self.infer_unknown_types(scope, cond, Some(ColumnType::boolean(true)))?;
        let ty = self.derive_type(scope, cond)?;
        if !ty.is_boolean() {
            return Err(fail(ValidationErrorKind::WhereMustBeBoolean, Some(cond.id)));
        }
        Ok(())
    }

    fn validate_group_by(&mut self, id: NodeId, select: &Select, scope: ScopeId) -> Result<()> {
        let mut keys = vec![];
        for g in &select.group_by {
            let g = self.expand_group_expr(select, scope, g)?;
            if let Some(agg) = self.find_aggregate(&g, true) {
                return Err(fail(
                    ValidationErrorKind::AggregateIllegalInGroupBy,
                    Some(agg.id),
                ));
            }
            self.infer_unknown_types(scope, &g, None)?;
            self.derive_type(scope, &g)?;
            keys.push(g);
        }
        self.group_exprs.insert(id, keys);
        Ok(())
    }

    /// Replace a GROUP BY ordinal or select alias with the select item it
    /// names, when the conformance allows it.
    fn expand_group_expr(&mut self, select: &Select, scope: ScopeId, g: &Expr) -> Result<Expr> {
        let conformance = self.config.conformance;
        match &g.kind {
            ExprKind::Literal(Literal::Integer(n)) if conformance.is_group_by_ordinal() => {
                let item = usize::try_from(*n)
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| select.items.get(i))
                    .filter(|item| !item.expr.is_star());
                match item {
                    Some(item) => Ok(item.expr.clone()),
                    None => Err(fail(ValidationErrorKind::OrdinalOutOfRange(*n), Some(g.id))),
                }
            }
            ExprKind::Identifier(names) if names.len() == 1 && conformance.is_group_by_alias() => {
                if self
                    .find_qualifying_table_name(scope, &names[0], g.id)?
                    .is_some()
                {
                    return Ok(g.clone());
                }
                let aliased = select.items.iter().find(|i| {
                    i.alias
                        .as_deref()
                        .is_some_and(|a| self.names_match(a, &names[0]))
                });
                Ok(aliased.map(|i| i.expr.clone()).unwrap_or_else(|| g.clone()))
            }
            _ => Ok(g.clone()),
        }
    }

    fn validate_having(&mut self, select: &Select, scopes: &SelectScopes) -> Result<()> {
        let Some(having) = &select.having else {
            return Ok(());
        };
        let scope = scopes.aggregating.ok_or_else(|| {
            QuarryError::Planning("HAVING without an aggregating scope".to_string())
        })?;
        self.infer_unknown_types(scope, having, Some(ColumnType::boolean(true)))?;
        let ty = self.derive_type(scope, having)?;
        self.check_aggregate_expr(scope, having)?;
        if !ty.is_boolean() {
            return Err(fail(ValidationErrorKind::HavingMustBeBoolean, Some(having.id)));
        }
        Ok(())
    }

    // -------------------------
    // Select list
    // -------------------------

    fn validate_select_list(
        &mut self,
        id: NodeId,
        select: &Select,
        scopes: &SelectScopes,
    ) -> Result<RowType> {
        let item_scope = scopes.aggregating.unwrap_or(scopes.select);
        let target = self.target_types.get(&id).cloned();
        let mut expanded: Vec<SelectItem> = vec![];
        let mut fields: Vec<(String, ColumnType)> = vec![];
        for (i, item) in select.items.iter().enumerate() {
            if item.expr.is_star() {
                if select.from.is_none() {
                    return Err(fail(
                        ValidationErrorKind::SelectStarRequiresFrom,
                        Some(item.expr.id),
                    ));
                }
                self.expand_star(scopes.select, &item.expr, &mut expanded, &mut fields)?;
                continue;
            }
            let expected = target
                .as_ref()
                .filter(|t| fields.len() < t.len())
                .map(|t| t.column_type(fields.len()));
            self.infer_unknown_types(item_scope, &item.expr, expected)?;
            let ty = self.derive_type(item_scope, &item.expr)?;
            if let Some(agg_scope) = scopes.aggregating {
                self.check_aggregate_expr(agg_scope, &item.expr)?;
            }
            let alias = item
                .alias
                .clone()
                .unwrap_or_else(|| derive_alias(&item.expr, i));
            expanded.push(SelectItem::aliased(item.expr.clone(), alias.clone()));
            fields.push((alias, ty));
        }
        self.uniquify(&mut expanded, &mut fields);
        self.expanded_select_lists.insert(id, expanded);
        Ok(RowType::of(fields))
    }

    /// Suffix repeated output names so each is distinct.
    fn uniquify(&self, items: &mut [SelectItem], fields: &mut [(String, ColumnType)]) {
        let mut used: HashSet<String> = HashSet::new();
        let norm = |s: &str| {
            if self.config.case_sensitive {
                s.to_string()
            } else {
                s.to_ascii_lowercase()
            }
        };
        for (item, field) in items.iter_mut().zip(fields.iter_mut()) {
            if used.insert(norm(&field.0)) {
                continue;
            }
            let base = field.0.clone();
            let mut n = 0;
            let unique = loop {
                let candidate = format!("{base}{n}");
                if used.insert(norm(&candidate)) {
                    break candidate;
                }
                n += 1;
            };
            item.alias = Some(unique.clone());
            field.0 = unique;
        }
    }

    /// Expand `*` or `t.*` into qualified column references. Columns merged
    /// by USING/NATURAL appear once.
    fn expand_star(
        &mut self,
        scope: ScopeId,
        star: &Expr,
        expanded: &mut Vec<SelectItem>,
        fields: &mut Vec<(String, ColumnType)>,
    ) -> Result<()> {
        let names = star.identifier().unwrap_or_default();
        let children = if names.len() > 1 {
            let prefix = &names[..names.len() - 1];
            let (_, child) = self.resolve_table(scope, prefix).ok_or_else(|| {
                fail(
                    ValidationErrorKind::TableNameNotFound(prefix.join(".")),
                    Some(star.id),
                )
            })?;
            vec![child]
        } else {
            self.sc(scope).children().to_vec()
        };
        let groups = self.sc(scope).using_groups.clone();
        let mut emitted_groups: HashSet<usize> = HashSet::new();
        for child in children {
            let row_type = self.namespace_row_type(child.namespace)?;
            for (pos, field) in row_type.fields().iter().enumerate() {
                let group = groups.iter().position(|g| {
                    g.namespaces.contains(&child.namespace)
                        && self.names_match(&g.column, field.name())
                });
                if let Some(g) = group {
                    if names.len() == 1 && !emitted_groups.insert(g) {
                        continue;
                    }
                }
                let expr = if self.config.identifier_expansion {
                    Expr::ident(&[child.alias.as_str(), field.name().as_str()])
                } else {
                    Expr::ident(&[field.name().as_str()])
                };
                let mut ty = row_type.column_type(pos);
                if child.nullable {
                    ty = ty.with_nullable(true);
                }
                self.resolutions.insert(
                    expr.id,
                    Resolution::Column {
                        scope,
                        namespace: child.namespace,
                        alias: child.alias.clone(),
                        path: vec![field.name().clone()],
                    },
                );
                self.node_types.insert(expr.id, ty.clone());
                expanded.push(SelectItem::aliased(expr, field.name().clone()));
                fields.push((field.name().clone(), ty));
            }
        }
        Ok(())
    }

    // -------------------------
    // ORDER BY / OFFSET / FETCH
    // -------------------------

    fn validate_order_by(
        &mut self,
        select: &Select,
        scopes: &SelectScopes,
        row_type: &RowType,
    ) -> Result<()> {
        let Some(order_scope) = scopes.order else {
            return Ok(());
        };
        for item in &select.order_by {
            let e = &item.expr;
            if let ExprKind::Literal(Literal::Integer(n)) = e.kind {
                if self.config.conformance.is_sort_by_ordinal() {
                    let ordinal = usize::try_from(n)
                        .ok()
                        .filter(|n| (1..=row_type.len()).contains(n))
                        .ok_or_else(|| {
                            fail(ValidationErrorKind::OrdinalOutOfRange(n), Some(e.id))
                        })?;
                    self.node_types.insert(e.id, row_type.column_type(ordinal - 1));
                    continue;
                }
            }
            self.infer_unknown_types(order_scope, e, None)?;
            self.derive_type(order_scope, e)?;
            match scopes.aggregating {
                Some(agg_scope) => self.check_aggregate_expr(agg_scope, e)?,
                None => {
                    if let Some(agg) = self.find_aggregate(e, false) {
                        return Err(fail(
                            ValidationErrorKind::AggregateIllegalInOrderBy,
                            Some(agg.id),
                        ));
                    }
                }
            }
            if let Some(distinct_scope) = scopes.distinct {
                self.check_aggregate_expr(distinct_scope, e)?;
            }
        }
        Ok(())
    }

    fn validate_row_count(&mut self, scope: ScopeId, clause: &str, e: &Expr) -> Result<()> {
        self.infer_unknown_types(scope, e, Some(ColumnType::not_null(DataType::Int64)))?;
        let ty = self.derive_type(scope, e)?;
        if !is_numeric(&ty.data_type) {
            return Err(fail(
                ValidationErrorKind::CannotApplyOperator {
                    operator: clause.to_string(),
                    types: format!("<{ty}>"),
                },
                Some(e.id),
            ));
        }
        Ok(())
    }

    // -------------------------
    // Set operations, VALUES, UNNEST, table functions
    // -------------------------

    pub(crate) fn validate_set_op(&mut self, query: &Arc<Query>) -> Result<RowType> {
        let QueryBody::SetOp(op) = &query.body else {
            return Err(QuarryError::Planning(format!(
                "query {} is not a set operation",
                query.id
            )));
        };
        let target = self.target_types.get(&query.id).cloned();
        let left = self.validate_query(&op.left, target.clone())?;
        let right = self.validate_query(&op.right, target)?;
        if left.len() != right.len() {
            return Err(fail(
                ValidationErrorKind::ColumnCountMismatchInSetOp(op.kind.to_string()),
                Some(query.id),
            ));
        }
        least_restrictive_rows(&[left, right]).ok_or_else(|| {
            fail(
                ValidationErrorKind::IllegalMixingOfTypes(op.kind.to_string()),
                Some(query.id),
            )
        })
    }

    pub(crate) fn validate_values(&mut self, query: &Arc<Query>, scope: ScopeId) -> Result<RowType> {
        let QueryBody::Values(values) = &query.body else {
            return Err(QuarryError::Planning(format!(
                "query {} is not VALUES",
                query.id
            )));
        };
        let target = self.target_types.get(&query.id).cloned();
        let mut rows: Vec<RowType> = vec![];
        for row in &values.rows {
            if let Some(first) = rows.first() {
                if first.len() != row.values.len() {
                    return Err(fail(ValidationErrorKind::IncompatibleValueType, Some(row.id)));
                }
            }
            let mut columns = vec![];
            for (i, v) in row.values.iter().enumerate() {
                let expected = target
                    .as_ref()
                    .filter(|t| i < t.len())
                    .map(|t| t.column_type(i));
                let ty = match (&v.kind, expected) {
                    // Without a target, a bare NULL keeps the NULL type.
                    (ExprKind::Literal(Literal::Null), None) => {
                        let t = ColumnType::nullable(DataType::Null);
                        self.node_types.insert(v.id, t.clone());
                        t
                    }
                    (_, expected) => {
                        self.infer_unknown_types(scope, v, expected)?;
                        self.derive_type(scope, v)?
                    }
                };
                columns.push((format!("EXPR${i}"), ty));
            }
            rows.push(RowType::of(columns));
        }
        if rows.len() == 1 {
            return Ok(rows.remove(0));
        }
        least_restrictive_rows(&rows)
            .ok_or_else(|| fail(ValidationErrorKind::IncompatibleValueType, Some(query.id)))
    }

    pub(crate) fn validate_unnest(
        &mut self,
        exprs: &[Expr],
        scope: ScopeId,
        with_ordinality: bool,
    ) -> Result<RowType> {
        let mut columns = vec![];
        for (i, e) in exprs.iter().enumerate() {
            self.infer_unknown_types(scope, e, None)?;
            let ty = self.derive_type(scope, e)?;
            let element = ty
                .element_type()
                .ok_or_else(|| fail(ValidationErrorKind::InvalidUnnestOperand, Some(e.id)))?;
            match element.struct_fields() {
                Some(fields) => {
                    for f in fields.iter() {
                        columns.push((
                            f.name().clone(),
                            ColumnType::new(
                                f.data_type().clone(),
                                f.is_nullable() || element.nullable,
                            ),
                        ));
                    }
                }
                None => columns.push((format!("EXPR${i}"), element)),
            }
        }
        if with_ordinality {
            columns.push((
                "ORDINALITY".to_string(),
                ColumnType::not_null(DataType::Int32),
            ));
        }
        Ok(RowType::of(columns))
    }

    pub(crate) fn validate_table_function(&mut self, call: &Expr, scope: ScopeId) -> Result<RowType> {
        let ExprKind::Call { op, .. } = &call.kind else {
            return Err(QuarryError::Unsupported(format!(
                "table expression {call} in FROM"
            )));
        };
        let is_table_function = self
            .operators
            .lookup(op)
            .is_some_and(|o| o.is_table_function());
        if !is_table_function {
            return Err(fail(
                ValidationErrorKind::FunctionNotFound(format!("{op}(...)")),
                Some(call.id),
            ));
        }
        self.infer_unknown_types(scope, call, None)?;
        let ty = self.derive_type(scope, call)?;
        Ok(RowType::from_struct_or_wrap(&ty, "EXPR$0"))
    }
}
