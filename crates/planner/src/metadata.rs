//! Derived properties of relational trees.

use std::collections::{BTreeSet, HashSet};

use tracing::trace;

use crate::ast::SetOpKind;
use crate::rel::{JoinType, RelKind, RelNode, Rex};

/// Answers structural questions about a relational tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelMetadata;

impl RelMetadata {
    pub fn new() -> Self {
        Self
    }

    /// Whether no two rows of `rel` agree on every column in `columns`.
    ///
    /// `false` means "not known to be unique", not "known to repeat".
    pub fn are_columns_unique(&self, rel: &RelNode, columns: &BTreeSet<usize>) -> bool {
        let unique = self.unique_impl(rel, columns);
        trace!(rel = %rel.id, op = rel.name(), ?columns, unique, "uniqueness");
        unique
    }

    fn unique_impl(&self, rel: &RelNode, columns: &BTreeSet<usize>) -> bool {
        match &rel.kind {
            RelKind::Scan { table } => table
                .unique_keys()
                .iter()
                .any(|key| !key.is_empty() && key.iter().all(|k| columns.contains(k))),
            RelKind::Values { rows } => {
                let mut seen = HashSet::new();
                rows.iter().all(|row| {
                    let key: Vec<_> = columns.iter().filter_map(|&c| row.get(c)).collect();
                    seen.insert(key)
                })
            }
            RelKind::Filter { input, .. } | RelKind::Sort { input, .. } => {
                self.are_columns_unique(input, columns)
            }
            RelKind::Project { input, exprs, .. } => {
                let sources: BTreeSet<usize> = columns
                    .iter()
                    .filter_map(|&c| match exprs.get(c) {
                        Some(Rex::InputRef { index, .. }) => Some(*index),
                        _ => None,
                    })
                    .collect();
                !sources.is_empty() && self.are_columns_unique(input, &sources)
            }
            RelKind::Aggregate { group, .. } => {
                // One output row per distinct group key.
                (0..group.len()).all(|g| columns.contains(&g))
            }
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
            } => {
                if !join_type.projects_right() {
                    return self.are_columns_unique(left, columns);
                }
                let width = left.row_type().len();
                let (l, r): (BTreeSet<usize>, BTreeSet<usize>) =
                    columns.iter().partition(|&&c| c < width);
                let r: BTreeSet<usize> = r.into_iter().map(|c| c - width).collect();
                // Null-extended rows may repeat the null key.
                *join_type != JoinType::Full
                    && self.are_columns_unique(left, &l)
                    && self.are_columns_unique(right, &r)
            }
            RelKind::SetOp {
                kind,
                all,
                inputs,
            } => {
                let width = rel.row_type().len();
                let whole_row = columns.len() == width;
                match kind {
                    SetOpKind::Union => !*all && whole_row,
                    SetOpKind::Intersect | SetOpKind::Except => {
                        (!*all && whole_row)
                            || inputs
                                .first()
                                .is_some_and(|first| self.are_columns_unique(first, columns))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use arrow_schema::DataType;

    use super::RelMetadata;
    use crate::catalog::MemoryTable;
    use crate::rel::{AggCall, JoinType, RelNode, Rex, ScalarValue};
    use crate::types::{ColumnType, RowType};

    fn cols(c: &[usize]) -> BTreeSet<usize> {
        c.iter().copied().collect()
    }

    fn keyed_scan() -> Arc<RelNode> {
        let rt = RowType::of(vec![
            ("id".to_string(), ColumnType::not_null(DataType::Int64)),
            ("v".to_string(), ColumnType::nullable(DataType::Int64)),
        ]);
        let table = MemoryTable::new(vec!["t".to_string()], rt).with_unique_key(vec![0]);
        RelNode::scan(Arc::new(table))
    }

    #[test]
    fn scan_uses_declared_keys() {
        let md = RelMetadata::new();
        let scan = keyed_scan();
        assert!(md.are_columns_unique(&scan, &cols(&[0])));
        assert!(md.are_columns_unique(&scan, &cols(&[0, 1])));
        assert!(!md.are_columns_unique(&scan, &cols(&[1])));
    }

    #[test]
    fn project_maps_through_input_refs() {
        let md = RelMetadata::new();
        let scan = keyed_scan();
        let p = RelNode::project(
            scan.clone(),
            vec![Rex::field_of(scan.row_type(), 1), Rex::field_of(scan.row_type(), 0)],
            vec!["v".to_string(), "id".to_string()],
        );
        assert!(md.are_columns_unique(&p, &cols(&[1])));
        assert!(!md.are_columns_unique(&p, &cols(&[0])));
    }

    #[test]
    fn aggregate_group_keys_are_unique() {
        let md = RelMetadata::new();
        let agg = RelNode::aggregate(keyed_scan(), vec![1], vec![AggCall::count_star("c")]);
        assert!(md.are_columns_unique(&agg, &cols(&[0])));
        assert!(!md.are_columns_unique(&agg, &cols(&[1])));
    }

    #[test]
    fn values_are_checked_by_content() {
        let md = RelMetadata::new();
        let rt = RowType::of(vec![
            ("a".to_string(), ColumnType::not_null(DataType::Int64)),
            ("b".to_string(), ColumnType::not_null(DataType::Int64)),
        ]);
        let v = RelNode::values(
            rt,
            vec![
                vec![ScalarValue::Int64(1), ScalarValue::Int64(7)],
                vec![ScalarValue::Int64(2), ScalarValue::Int64(7)],
            ],
        );
        assert!(md.are_columns_unique(&v, &cols(&[0])));
        assert!(!md.are_columns_unique(&v, &cols(&[1])));
    }

    #[test]
    fn inner_join_needs_both_sides_unique() {
        let md = RelMetadata::new();
        let (l, r) = (keyed_scan(), keyed_scan());
        let cond = Rex::eq(Rex::field_of(l.row_type(), 0), Rex::field_of(r.row_type(), 0).shift(2));
        let j = RelNode::join(l, r, cond, JoinType::Inner);
        assert!(md.are_columns_unique(&j, &cols(&[0, 2])));
        assert!(!md.are_columns_unique(&j, &cols(&[0])));
    }
}
