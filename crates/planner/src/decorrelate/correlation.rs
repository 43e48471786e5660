//! Correlation bookkeeping derived from a relational tree.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use quarry_common::{CorrelationId, RelId};

use crate::rel::{CorDef, RelKind, RelNode};

/// One correlation variable and where it comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correlation {
    pub id: CorrelationId,
    /// The `Correlate` node binding the variable.
    pub correlate: RelId,
    /// The node whose rows the variable ranges over (the correlate's left input).
    pub producer: RelId,
}

/// Read-only maps relating correlation variables to the nodes that define
/// and read them.
#[derive(Debug, Default, Clone)]
pub struct CorrelationMaps {
    correlations: BTreeMap<CorrelationId, Correlation>,
    produced: HashMap<RelId, BTreeSet<CorrelationId>>,
    references: HashMap<RelId, BTreeSet<CorDef>>,
}

impl CorrelationMaps {
    /// Derive the maps by walking `root` once.
    pub fn build(root: &RelNode) -> Self {
        let mut maps = CorrelationMaps::default();
        maps.visit(root);
        maps
    }

    fn visit(&mut self, rel: &RelNode) {
        if let RelKind::Correlate {
            left, correlation, ..
        } = &rel.kind
        {
            self.add_correlation(Correlation {
                id: *correlation,
                correlate: rel.id,
                producer: left.id,
            });
        }
        for e in rel.exprs() {
            for def in e.cor_defs() {
                self.add_reference(rel.id, def);
            }
        }
        for input in rel.inputs() {
            self.visit(input);
        }
    }

    pub fn add_correlation(&mut self, correlation: Correlation) {
        self.produced
            .entry(correlation.producer)
            .or_default()
            .insert(correlation.id);
        self.correlations.insert(correlation.id, correlation);
    }

    pub fn add_reference(&mut self, rel: RelId, def: CorDef) {
        self.references.entry(rel).or_default().insert(def);
    }

    pub fn is_empty(&self) -> bool {
        self.correlations.is_empty()
    }

    pub fn correlation(&self, id: CorrelationId) -> Option<&Correlation> {
        self.correlations.get(&id)
    }

    pub fn correlations(&self) -> impl Iterator<Item = &Correlation> {
        self.correlations.values()
    }

    /// Correlations whose values range over the rows of `producer`.
    pub fn produced_by(&self, producer: RelId) -> Option<&BTreeSet<CorrelationId>> {
        self.produced.get(&producer)
    }

    /// Correlated fields read directly by the expressions of `rel`.
    pub fn references(&self, rel: RelId) -> Option<&BTreeSet<CorDef>> {
        self.references.get(&rel)
    }

    /// Every field of `id` read anywhere in the tree.
    pub fn referenced_fields(&self, id: CorrelationId) -> BTreeSet<usize> {
        self.references
            .values()
            .flatten()
            .filter(|d| d.id == id)
            .map(|d| d.field)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use arrow_schema::DataType;
    use quarry_common::CorrelationId;

    use super::CorrelationMaps;
    use crate::rel::{JoinType, RelNode, Rex};
    use crate::types::{ColumnType, RowType};

    #[test]
    fn build_links_correlate_producer_and_readers() {
        let rt = RowType::of(vec![("k".to_string(), ColumnType::not_null(DataType::Int64))]);
        let outer = RelNode::values(rt.clone(), vec![]);
        let inner = RelNode::values(rt.clone(), vec![]);
        let cor = CorrelationId::next();
        let filter = RelNode::filter(
            inner,
            Rex::eq(Rex::field_of(&rt, 0), Rex::correl_field(cor, &rt, 0)),
        );
        let correlate =
            RelNode::correlate(outer.clone(), filter.clone(), cor, vec![0], JoinType::Inner);

        let maps = CorrelationMaps::build(&correlate);
        let c = maps.correlation(cor).expect("correlation registered");
        assert_eq!(c.correlate, correlate.id);
        assert_eq!(c.producer, outer.id);
        assert!(maps.produced_by(outer.id).is_some_and(|s| s.contains(&cor)));
        assert_eq!(maps.references(filter.id).map(|s| s.len()), Some(1));
        assert_eq!(maps.referenced_fields(cor).into_iter().collect::<Vec<_>>(), vec![0]);
    }
}
