//! Scalar subquery removal.
//!
//! Matches
//!
//! ```text
//! Correlate(left)
//!   left
//!   Aggregate group=[] SINGLE_VALUE($0)
//!     Project e
//!       Filter r.k = $corN.f AND ...
//!         r
//! ```
//!
//! and, when the filtered keys of `r` are unique, replaces it with a left
//! join of `left` and `r` that computes `e` directly.

use std::collections::BTreeSet;
use std::sync::Arc;

use quarry_common::CorrelationId;
use tracing::{debug, trace};

use crate::rel::{AggFunc, JoinType, RelKind, RelNode, RelRef, Rex, RexOp, ScalarValue};

use super::decorrelator::Decorrelator;

/// Name of the column marking rows that came from the right side.
const NULL_INDICATOR: &str = "nullIndicator";

/// Pieces of a matched scalar subquery.
struct ScalarSubquery<'a> {
    left: &'a RelRef,
    right: &'a RelRef,
    value: &'a Rex,
    value_name: &'a str,
    /// `(right column, left column)` equality pairs.
    keys: Vec<(usize, usize)>,
    residual: Vec<Rex>,
}

impl Decorrelator {
    /// Rewrite every scalar correlated subquery whose correlated keys are
    /// unique into a left join. Other nodes are rebuilt over their rewritten
    /// inputs.
    pub fn remove_correlation(&mut self, root: RelRef) -> RelRef {
        let old_inputs: Vec<RelRef> = root.inputs().into_iter().cloned().collect();
        let new_inputs: Vec<RelRef> = old_inputs
            .iter()
            .map(|i| self.remove_correlation(i.clone()))
            .collect();
        let changed = old_inputs
            .iter()
            .zip(&new_inputs)
            .any(|(o, n)| !Arc::ptr_eq(o, n));
        let node = if changed {
            root.with_inputs(new_inputs)
        } else {
            root
        };
        match self.remove_scalar_subquery(&node) {
            Some(rewritten) => {
                debug!(old = %node.id, new = %rewritten.id, "removed scalar subquery correlation");
                rewritten
            }
            None => node,
        }
    }

    fn remove_scalar_subquery(&self, rel: &RelRef) -> Option<RelRef> {
        let m = match_scalar_subquery(rel)?;
        let keys: BTreeSet<usize> = m.keys.iter().map(|(r, _)| *r).collect();
        if !self.metadata.are_columns_unique(m.right, &keys) {
            trace!(node = %rel.id, ?keys, "correlated keys not unique; keeping correlate");
            return None;
        }

        let left_type = m.left.row_type();
        let left_width = left_type.len();
        let right = if m.residual.is_empty() {
            m.right.clone()
        } else {
            RelNode::filter(m.right.clone(), Rex::and(m.residual))
        };
        let right_type = right.row_type().clone();
        let right_width = right_type.len();

        let mut exprs: Vec<Rex> = (0..right_width)
            .map(|i| Rex::field_of(&right_type, i))
            .collect();
        exprs.push(Rex::literal(ScalarValue::Boolean(true)));
        let mut names = right_type.field_names();
        names.push(NULL_INDICATOR.to_string());
        let indicated = RelNode::project(right, exprs, names);
        let indicated_type = indicated.row_type().clone();

        let condition = Rex::and(
            m.keys
                .iter()
                .map(|&(r, l)| {
                    Rex::eq(
                        Rex::field_of(left_type, l),
                        Rex::field_of(&indicated_type, r).shift(left_width),
                    )
                })
                .collect(),
        );
        let join = RelNode::join(m.left.clone(), indicated, condition, JoinType::Left);
        let join_type = join.row_type().clone();

        let value_type = m.value.ty();
        let value = Rex::call(
            RexOp::Case,
            vec![
                Rex::call(
                    RexOp::IsNull,
                    vec![Rex::field_of(&join_type, left_width + right_width)],
                ),
                Rex::typed_null(value_type),
                m.value.shift(left_width),
            ],
        );
        let mut exprs: Vec<Rex> = (0..left_width)
            .map(|i| Rex::field_of(&join_type, i))
            .collect();
        exprs.push(value);
        let mut names = left_type.field_names();
        names.push(m.value_name.to_string());
        Some(RelNode::project(join, exprs, names))
    }
}

fn match_scalar_subquery(rel: &RelRef) -> Option<ScalarSubquery<'_>> {
    let RelKind::Correlate {
        left,
        right,
        correlation,
        join_type: JoinType::Left,
        ..
    } = &rel.kind
    else {
        return None;
    };
    let RelKind::Aggregate {
        input: agg_input,
        group,
        calls,
    } = &right.kind
    else {
        return None;
    };
    let [call] = calls.as_slice() else {
        return None;
    };
    if !group.is_empty() || call.func != AggFunc::SingleValue || call.args != [0usize] {
        return None;
    }
    let RelKind::Project {
        input: project_input,
        exprs,
        ..
    } = &agg_input.kind
    else {
        return None;
    };
    let [value] = exprs.as_slice() else {
        return None;
    };
    if value.has_correlation() {
        return None;
    }
    let RelKind::Filter {
        input: filter_input,
        condition,
    } = &project_input.kind
    else {
        return None;
    };
    if filter_input.has_correlation() {
        return None;
    }
    let mut keys = vec![];
    let mut residual = vec![];
    for conjunct in condition.conjuncts() {
        if let Some(pair) = correlated_equality(conjunct, *correlation) {
            keys.push(pair);
        } else if conjunct.has_correlation() {
            return None;
        } else {
            residual.push(conjunct.clone());
        }
    }
    if keys.is_empty() {
        return None;
    }
    Some(ScalarSubquery {
        left,
        right: filter_input,
        value,
        value_name: &call.name,
        keys,
        residual,
    })
}

/// `$i = $cor.f` in either operand order.
fn correlated_equality(rex: &Rex, correlation: CorrelationId) -> Option<(usize, usize)> {
    let Rex::Call {
        op: RexOp::Eq,
        operands,
        ..
    } = rex
    else {
        return None;
    };
    let [a, b] = operands.as_slice() else {
        return None;
    };
    let pick = |input: &Rex, cor: &Rex| match (input, cor.as_cor_def()) {
        (Rex::InputRef { index, .. }, Some(def)) if def.id == correlation => {
            Some((*index, def.field))
        }
        _ => None,
    };
    pick(a, b).or_else(|| pick(b, a))
}
