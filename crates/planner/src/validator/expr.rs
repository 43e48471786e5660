//! Expression typing: unknown-type inference followed by type derivation.

use arrow_schema::{DataType, Field, Fields};
use quarry_common::{NodeId, QuarryError, Result, ValidationErrorKind};
use tracing::trace;

use crate::ast::{Expr, ExprKind, Literal, WindowRef};
use crate::types::{
    comparable, least_restrictive, list_of, parse_type_name, sql_type_name, ColumnType,
};

use super::scope::ScopeId;
use super::{fail, SqlValidator};

/// Intrinsic type of a literal; `None` for an untyped NULL.
pub(crate) fn literal_type(literal: &Literal) -> Option<ColumnType> {
    let data_type = match literal {
        Literal::Null => return None,
        Literal::Boolean(_) => DataType::Boolean,
        Literal::Integer(v) => {
            if i32::try_from(*v).is_ok() {
                DataType::Int32
            } else {
                DataType::Int64
            }
        }
        Literal::Decimal(text) => decimal_type(text),
        Literal::String(_) => DataType::Utf8,
    };
    Some(ColumnType::not_null(data_type))
}

/// Exact numerics keep their written precision and scale; anything with an
/// exponent is approximate.
fn decimal_type(text: &str) -> DataType {
    if text.contains(['e', 'E']) {
        return DataType::Float64;
    }
    let digits = text.trim_start_matches(['-', '+']);
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    let int_digits = int_part.trim_start_matches('0').len();
    let scale = frac_part.len();
    let precision = (int_digits + scale).max(1);
    match (u8::try_from(precision), i8::try_from(scale)) {
        (Ok(p), Ok(s)) if p <= 38 => DataType::Decimal128(p, s),
        _ => DataType::Float64,
    }
}

fn type_list(types: &[ColumnType]) -> String {
    types
        .iter()
        .map(|t| format!("<{}>", sql_type_name(&t.data_type)))
        .collect::<Vec<_>>()
        .join(", ")
}

impl SqlValidator {
    /// Whether `expr` is a NULL literal or dynamic parameter that has not been
    /// given a type yet.
    pub(crate) fn is_unknown(&self, expr: &Expr) -> bool {
        matches!(
            expr.kind,
            ExprKind::Literal(Literal::Null) | ExprKind::DynamicParam(_)
        ) && !self.node_types.contains_key(&expr.id)
    }

    /// Derive (and cache) the type of `expr` in `scope`.
    pub(crate) fn derive_type(&mut self, scope: ScopeId, expr: &Expr) -> Result<ColumnType> {
        if let Some(t) = self.node_types.get(&expr.id) {
            return Ok(t.clone());
        }
        let t = self.derive_type_impl(scope, expr)?;
        trace!(node = %expr.id, r#type = %t, "derived type");
        self.node_types.insert(expr.id, t.clone());
        Ok(t)
    }

    fn derive_type_impl(&mut self, scope: ScopeId, expr: &Expr) -> Result<ColumnType> {
        match &expr.kind {
            ExprKind::Identifier(names) => {
                if expr.is_star() {
                    return Err(fail(
                        ValidationErrorKind::UnknownIdentifier("*".to_string()),
                        Some(expr.id),
                    ));
                }
                let (resolution, ty) = self.resolve_identifier(scope, expr, names)?;
                self.resolutions.insert(expr.id, resolution);
                Ok(ty)
            }
            ExprKind::Literal(literal) => literal_type(literal)
                .ok_or_else(|| fail(ValidationErrorKind::NullIllegal, Some(expr.id))),
            ExprKind::DynamicParam(_) => {
                Err(fail(ValidationErrorKind::DynamicParamIllegal, Some(expr.id)))
            }
            ExprKind::Call { .. } => self.derive_call_type(scope, expr, false),
            ExprKind::Case {
                operand,
                whens,
                else_result,
            } => {
                match operand {
                    Some(operand) => {
                        let ot = self.derive_type(scope, operand)?;
                        for (w, _) in whens {
                            let wt = self.derive_type(scope, w)?;
                            if !comparable(&ot.data_type, &wt.data_type) {
                                return Err(fail(
                                    ValidationErrorKind::IllegalMixingOfTypes("CASE".into()),
                                    Some(w.id),
                                ));
                            }
                        }
                    }
                    None => {
                        for (w, _) in whens {
                            if !self.derive_type(scope, w)?.is_boolean() {
                                return Err(fail(
                                    ValidationErrorKind::IllegalMixingOfTypes(
                                        "CASE WHEN".into(),
                                    ),
                                    Some(w.id),
                                ));
                            }
                        }
                    }
                }
                let mut results = vec![];
                for (_, then) in whens {
                    results.push(self.derive_type(scope, then)?);
                }
                match else_result {
                    Some(e) => results.push(self.derive_type(scope, e)?),
                    None => results.push(ColumnType::nullable(DataType::Null)),
                }
                least_restrictive(&results).ok_or_else(|| {
                    fail(
                        ValidationErrorKind::IllegalMixingOfTypes("CASE".into()),
                        Some(expr.id),
                    )
                })
            }
            ExprKind::Cast { expr: inner, type_name } => {
                let it = self.derive_type(scope, inner)?;
                let dt = self.resolve_type_name(type_name, expr.id)?;
                Ok(ColumnType::new(dt, it.nullable))
            }
            ExprKind::Row(items) => {
                let mut fields = vec![];
                for (i, item) in items.iter().enumerate() {
                    let t = self.derive_type(scope, item)?;
                    fields.push(Field::new(format!("EXPR${i}"), t.data_type, t.nullable));
                }
                Ok(ColumnType::not_null(DataType::Struct(Fields::from(fields))))
            }
            ExprKind::ScalarSubquery(q) => {
                let row_type = self.validate_query(q, None)?;
                if row_type.len() != 1 {
                    return Err(fail(
                        ValidationErrorKind::OnlyScalarSubQueryAllowed,
                        Some(expr.id),
                    ));
                }
                // No row means NULL.
                Ok(row_type.column_type(0).with_nullable(true))
            }
            ExprKind::Exists(q) => {
                self.validate_query(q, None)?;
                Ok(ColumnType::boolean(false))
            }
            ExprKind::InSubquery {
                expr: lhs, query, ..
            } => {
                let lt = self.derive_type(scope, lhs)?;
                let row_type = self.validate_query(query, None)?;
                let rt = if row_type.len() == 1 {
                    row_type.column_type(0)
                } else {
                    ColumnType::not_null(row_type.as_struct())
                };
                if !comparable(&lt.data_type, &rt.data_type) {
                    return Err(fail(
                        ValidationErrorKind::CannotApplyOperator {
                            operator: "IN".into(),
                            types: type_list(&[lt, rt]),
                        },
                        Some(expr.id),
                    ));
                }
                let nullable =
                    lt.nullable || row_type.column_types().iter().any(|c| c.nullable);
                Ok(ColumnType::boolean(nullable))
            }
            ExprKind::InList { expr: lhs, list, .. } => {
                let lt = self.derive_type(scope, lhs)?;
                let mut nullable = lt.nullable;
                for item in list {
                    let it = self.derive_type(scope, item)?;
                    if !comparable(&lt.data_type, &it.data_type) {
                        return Err(fail(
                            ValidationErrorKind::CannotApplyOperator {
                                operator: "IN".into(),
                                types: type_list(&[lt, it]),
                            },
                            Some(item.id),
                        ));
                    }
                    nullable |= it.nullable;
                }
                Ok(ColumnType::boolean(nullable))
            }
            ExprKind::Over { call, window } => self.derive_over_type(scope, expr, call, window),
            ExprKind::Multiset(_) => {
                let ns = self.namespace_of(expr.id)?;
                let row_type = self.namespace_row_type(ns)?;
                let element = ColumnType::not_null(row_type.as_struct());
                Ok(ColumnType::not_null(list_of(element)))
            }
        }
    }

    /// Type of an operator call. `windowed` calls are the function of an
    /// OVER clause: they may be window-only functions and their operands do
    /// not move below the aggregation.
    fn derive_call_type(
        &mut self,
        scope: ScopeId,
        call: &Expr,
        windowed: bool,
    ) -> Result<ColumnType> {
        let ExprKind::Call { op, operands, .. } = &call.kind else {
            return Err(QuarryError::Planning(format!("{call} is not a call")));
        };
        let operator = self.operators.lookup(op);
        if let Some(o) = &operator {
            if o.requires_over() && !windowed {
                return Err(fail(
                    ValidationErrorKind::OverClauseRequired(op.clone()),
                    Some(call.id),
                ));
            }
            if o.is_aggregator() && !windowed {
                for operand in operands {
                    if let Some(nested) = self.find_aggregate(operand, true) {
                        return Err(fail(ValidationErrorKind::NestedAggIllegal, Some(nested.id)));
                    }
                }
            }
        }
        let operand_scope = if windowed {
            scope
        } else {
            self.get_operand_scope(scope, call)
        };
        let mut types = Vec::with_capacity(operands.len());
        for operand in operands {
            types.push(self.derive_type(operand_scope, operand)?);
        }
        let signature = || {
            let names: Vec<String> = types.iter().map(|t| sql_type_name(&t.data_type)).collect();
            format!("{op}({})", names.join(", "))
        };
        let Some(operator) = operator else {
            return Err(fail(
                ValidationErrorKind::FunctionNotFound(signature()),
                Some(call.id),
            ));
        };
        let (min, max) = operator.arity();
        if !(min..=max).contains(&types.len()) {
            return Err(fail(
                ValidationErrorKind::FunctionNotFound(signature()),
                Some(call.id),
            ));
        }
        operator.return_type(&types).ok_or_else(|| {
            fail(
                ValidationErrorKind::CannotApplyOperator {
                    operator: op.clone(),
                    types: type_list(&types),
                },
                Some(call.id),
            )
        })
    }

    fn derive_over_type(
        &mut self,
        scope: ScopeId,
        over: &Expr,
        call: &Expr,
        window: &WindowRef,
    ) -> Result<ColumnType> {
        let ExprKind::Call { op, .. } = &call.kind else {
            return Err(fail(
                ValidationErrorKind::OverNonAggregate(call.to_string()),
                Some(call.id),
            ));
        };
        let operator = self.operators.lookup(op);
        let windowable = operator
            .as_ref()
            .is_some_and(|o| o.is_aggregator() || o.requires_over());
        if !windowable {
            return Err(fail(
                ValidationErrorKind::OverNonAggregate(op.clone()),
                Some(call.id),
            ));
        }
        let spec = self.resolve_window(scope, window, over.id)?;
        for e in spec
            .partition_by
            .iter()
            .chain(spec.order_by.iter().map(|o| &o.expr))
            .chain(spec.frame.iter().flat_map(|f| f.offsets()))
        {
            self.infer_unknown_types(scope, e, None)?;
            self.derive_type(scope, e)?;
        }
        if operator.is_some_and(|o| o.requires_order()) && spec.order_by.is_empty() {
            return Err(fail(
                ValidationErrorKind::RankRequiresOrderBy(op.clone()),
                Some(over.id),
            ));
        }
        let t = self.derive_call_type(scope, call, true)?;
        self.node_types.insert(call.id, t.clone());
        Ok(t)
    }

    /// Built-in type name, else a named type from the catalog.
    pub(crate) fn resolve_type_name(&self, type_name: &str, node: NodeId) -> Result<DataType> {
        if let Some(dt) = parse_type_name(type_name) {
            return Ok(dt);
        }
        let names: Vec<String> = type_name.split('.').map(|s| s.trim().to_string()).collect();
        self.catalog.get_named_type(&names).ok_or_else(|| {
            fail(
                ValidationErrorKind::UnknownDatatypeName(type_name.to_string()),
                Some(node),
            )
        })
    }

    // -------------------------
    // Unknown-type inference
    // -------------------------

    /// Give NULL literals and dynamic parameters in `expr` a type from their
    /// context. `expected` is the type the surrounding construct wants.
    pub(crate) fn infer_unknown_types(
        &mut self,
        scope: ScopeId,
        expr: &Expr,
        expected: Option<ColumnType>,
    ) -> Result<()> {
        match &expr.kind {
            ExprKind::Literal(Literal::Null) | ExprKind::DynamicParam(_) => {
                if self.node_types.contains_key(&expr.id) {
                    return Ok(());
                }
                let Some(t) = expected.filter(|t| t.data_type != DataType::Null) else {
                    let kind = if matches!(expr.kind, ExprKind::DynamicParam(_)) {
                        ValidationErrorKind::DynamicParamIllegal
                    } else {
                        ValidationErrorKind::NullIllegal
                    };
                    return Err(fail(kind, Some(expr.id)));
                };
                trace!(node = %expr.id, r#type = %t, "inferred unknown type");
                self.node_types.insert(expr.id, t.with_nullable(true));
                Ok(())
            }
            ExprKind::Call { op, operands, .. } => {
                let operand_scope = self.get_operand_scope(scope, expr);
                let mut known = Vec::with_capacity(operands.len());
                for operand in operands {
                    if self.is_unknown(operand) {
                        known.push(None);
                    } else {
                        self.infer_unknown_types(operand_scope, operand, None)?;
                        known.push(Some(self.derive_type(operand_scope, operand)?));
                    }
                }
                let inferred = match self.operators.lookup(op) {
                    Some(operator) => operator.infer_operand_types(&known, expected.as_ref()),
                    None => known.clone(),
                };
                for ((operand, k), t) in operands.iter().zip(&known).zip(inferred) {
                    if k.is_none() {
                        self.infer_unknown_types(operand_scope, operand, t)?;
                    }
                }
                Ok(())
            }
            ExprKind::Case {
                operand,
                whens,
                else_result,
            } => {
                let when_type = match operand {
                    Some(operand) => {
                        self.infer_unknown_types(scope, operand, None)?;
                        Some(self.derive_type(scope, operand)?)
                    }
                    None => Some(ColumnType::boolean(true)),
                };
                for (w, _) in whens {
                    self.infer_unknown_types(scope, w, when_type.clone())?;
                }
                let results: Vec<&Expr> = whens
                    .iter()
                    .map(|(_, t)| t)
                    .chain(else_result.as_deref())
                    .collect();
                self.infer_common(scope, &results, expected)
            }
            ExprKind::Cast {
                expr: inner,
                type_name,
            } => {
                let target = self.resolve_type_name(type_name, expr.id)?;
                self.infer_unknown_types(scope, inner, Some(ColumnType::nullable(target)))
            }
            ExprKind::Row(items) => {
                let fields = expected.as_ref().and_then(|t| t.struct_fields().cloned());
                for (i, item) in items.iter().enumerate() {
                    let t = fields
                        .as_ref()
                        .and_then(|f| f.get(i))
                        .map(|f| ColumnType::new(f.data_type().clone(), f.is_nullable()));
                    self.infer_unknown_types(scope, item, t)?;
                }
                Ok(())
            }
            ExprKind::InList { expr: lhs, list, .. } => {
                let mut all: Vec<&Expr> = vec![lhs.as_ref()];
                all.extend(list.iter());
                self.infer_common(scope, &all, None)
            }
            ExprKind::InSubquery {
                expr: lhs, query, ..
            } => {
                if self.is_unknown(lhs) {
                    let row_type = self.validate_query(query, None)?;
                    let t = (row_type.len() == 1).then(|| row_type.column_type(0));
                    self.infer_unknown_types(scope, lhs, t)
                } else {
                    self.infer_unknown_types(scope, lhs, None)
                }
            }
            ExprKind::Over { call, window } => {
                if let WindowRef::Spec(spec) = window {
                    for e in spec
                        .partition_by
                        .iter()
                        .chain(spec.order_by.iter().map(|o| &o.expr))
                    {
                        self.infer_unknown_types(scope, e, None)?;
                    }
                }
                self.infer_over_operands(scope, call, expected)
            }
            ExprKind::Identifier(_)
            | ExprKind::Literal(_)
            | ExprKind::ScalarSubquery(_)
            | ExprKind::Exists(_)
            | ExprKind::Multiset(_) => Ok(()),
        }
    }

    /// Window function operands are typed in the window's own scope.
    fn infer_over_operands(
        &mut self,
        scope: ScopeId,
        call: &Expr,
        expected: Option<ColumnType>,
    ) -> Result<()> {
        let ExprKind::Call { op, operands, .. } = &call.kind else {
            return self.infer_unknown_types(scope, call, expected);
        };
        let mut known = vec![];
        for operand in operands {
            if self.is_unknown(operand) {
                known.push(None);
            } else {
                self.infer_unknown_types(scope, operand, None)?;
                known.push(Some(self.derive_type(scope, operand)?));
            }
        }
        let inferred = match self.operators.lookup(op) {
            Some(operator) => operator.infer_operand_types(&known, expected.as_ref()),
            None => known.clone(),
        };
        for ((operand, k), t) in operands.iter().zip(&known).zip(inferred) {
            if k.is_none() {
                self.infer_unknown_types(scope, operand, t)?;
            }
        }
        Ok(())
    }

    /// Unknown members of `exprs` take the common type of the known ones,
    /// falling back to `expected`.
    fn infer_common(
        &mut self,
        scope: ScopeId,
        exprs: &[&Expr],
        expected: Option<ColumnType>,
    ) -> Result<()> {
        let mut known = vec![];
        for e in exprs {
            if !self.is_unknown(e) {
                self.infer_unknown_types(scope, e, None)?;
                known.push(self.derive_type(scope, e)?);
            }
        }
        let common = least_restrictive(&known)
            .filter(|t| t.data_type != DataType::Null)
            .or(expected);
        for e in exprs {
            if self.is_unknown(e) {
                self.infer_unknown_types(scope, e, common.clone())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use arrow_schema::DataType;

    use super::literal_type;
    use crate::ast::Literal;

    #[test]
    fn integer_literals_widen_past_i32() {
        let small = literal_type(&Literal::Integer(7)).expect("typed");
        let big = literal_type(&Literal::Integer(i64::from(i32::MAX) + 1)).expect("typed");
        assert_eq!(small.data_type, DataType::Int32);
        assert_eq!(big.data_type, DataType::Int64);
        assert!(!small.nullable);
    }

    #[test]
    fn decimal_literals_keep_precision_and_scale() {
        let t = literal_type(&Literal::Decimal("12.50".into())).expect("typed");
        assert_eq!(t.data_type, DataType::Decimal128(4, 2));
        let approx = literal_type(&Literal::Decimal("1.5e3".into())).expect("typed");
        assert_eq!(approx.data_type, DataType::Float64);
        assert!(literal_type(&Literal::Null).is_none());
    }
}
