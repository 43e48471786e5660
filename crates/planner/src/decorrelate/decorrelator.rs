//! Bottom-up elimination of `Correlate` nodes.
//!
//! Each visited node is rewritten into a [`Frame`]: the new node, where each
//! old output column now lives, and which correlated fields the new node
//! carries as extra output columns. A `Correlate` turns into a join on those
//! carried columns once its right side has been rewritten.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use quarry_common::{CorrelationId, RelId};
use tracing::{debug, trace};

use crate::metadata::RelMetadata;
use crate::rel::{
    AggCall, AggFunc, CorDef, JoinType, RelKind, RelNode, RelRef, Rex, RexOp, ScalarValue,
    SortKey,
};

use super::correlation::CorrelationMaps;

/// Rewritten form of one node.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub(crate) rel: RelRef,
    /// Old output position to new output position.
    pub(crate) old_to_new: Vec<usize>,
    /// Correlated fields carried by `rel` and the output position of each.
    pub(crate) cor_defs: BTreeMap<CorDef, usize>,
}

impl Frame {
    fn identity(rel: RelRef) -> Self {
        Self {
            old_to_new: (0..rel.row_type().len()).collect(),
            rel,
            cor_defs: BTreeMap::new(),
        }
    }

    fn is_identity(&self) -> bool {
        self.old_to_new.len() == self.rel.row_type().len()
            && self.old_to_new.iter().enumerate().all(|(i, &p)| i == p)
    }
}

/// Rewrites correlated subtrees into joins.
///
/// Both passes are best effort: a node whose rewrite preconditions fail is
/// returned unchanged together with everything above it.
#[derive(Debug)]
pub struct Decorrelator {
    pub(crate) maps: CorrelationMaps,
    pub(crate) metadata: RelMetadata,
    frames: HashMap<RelId, Frame>,
}

impl Decorrelator {
    pub fn new(maps: CorrelationMaps) -> Self {
        Self {
            maps,
            metadata: RelMetadata::new(),
            frames: HashMap::new(),
        }
    }

    /// Remove every `Correlate` reachable from `root`, or return `root`
    /// unchanged when that is not possible.
    pub fn decorrelate(&mut self, root: RelRef) -> RelRef {
        if !root.has_correlation() {
            return root;
        }
        match self.decorrelate_rel(&root) {
            Some(frame) if frame.cor_defs.is_empty() => {
                let out = restore_layout(&root, frame);
                debug!(old = %root.id, new = %out.id, "decorrelated");
                out
            }
            Some(frame) => {
                debug!(
                    root = %root.id,
                    unresolved = frame.cor_defs.len(),
                    "correlated variables escape the root; keeping original tree"
                );
                root
            }
            None => {
                debug!(root = %root.id, "decorrelation not applicable; keeping original tree");
                root
            }
        }
    }

    fn decorrelate_rel(&mut self, rel: &RelRef) -> Option<Frame> {
        if let Some(frame) = self.frames.get(&rel.id) {
            return Some(frame.clone());
        }
        let frame = if rel.has_correlation() {
            match &rel.kind {
                RelKind::Filter { input, condition } => self.decorrelate_filter(input, condition),
                RelKind::Project {
                    input,
                    exprs,
                    names,
                } => self.decorrelate_project(input, exprs, names),
                RelKind::Aggregate {
                    input,
                    group,
                    calls,
                } => self.decorrelate_aggregate(input, group, calls),
                RelKind::Sort {
                    input,
                    keys,
                    offset,
                    fetch,
                } => self.decorrelate_sort(input, keys, *offset, *fetch),
                RelKind::Join {
                    left,
                    right,
                    condition,
                    join_type,
                } => self.decorrelate_join(left, right, condition, *join_type),
                RelKind::Correlate {
                    left,
                    right,
                    correlation,
                    join_type,
                    ..
                } => self.decorrelate_correlate(rel, left, right, *correlation, *join_type),
                RelKind::Scan { .. } | RelKind::Values { .. } | RelKind::SetOp { .. } => {
                    self.decorrelate_generic(rel)
                }
            }
        } else {
            Some(Frame::identity(rel.clone()))
        };
        match &frame {
            Some(f) => {
                trace!(
                    old = %rel.id,
                    new = %f.rel.id,
                    op = rel.name(),
                    carried = f.cor_defs.len(),
                    "rewrote node"
                );
                self.frames.insert(rel.id, f.clone());
            }
            None => trace!(old = %rel.id, op = rel.name(), "left node unrewritten"),
        }
        frame
    }

    // -----------------------------
    // Rules
    // -----------------------------

    /// Clone the node over rewritten inputs; none of them may still carry
    /// correlated fields.
    fn decorrelate_generic(&mut self, rel: &RelRef) -> Option<Frame> {
        if rel.exprs().iter().any(|e| e.has_correlation()) {
            return None;
        }
        let mut inputs = vec![];
        for input in rel.inputs() {
            let frame = self.decorrelate_rel(input)?;
            if !frame.cor_defs.is_empty() {
                return None;
            }
            inputs.push(restore_layout(input, frame));
        }
        Some(Frame::identity(rel.with_inputs(inputs)))
    }

    fn decorrelate_filter(&mut self, input: &RelRef, condition: &Rex) -> Option<Frame> {
        if condition.has_bare_correlation() {
            return None;
        }
        let frame = self.decorrelate_rel(input)?;
        let frame = self.with_value_generator(frame, &condition.cor_defs())?;
        let condition = rewrite_rex(condition, &frame)?;
        Some(Frame {
            rel: RelNode::filter(frame.rel.clone(), condition),
            old_to_new: frame.old_to_new,
            cor_defs: frame.cor_defs,
        })
    }

    fn decorrelate_project(
        &mut self,
        input: &RelRef,
        exprs: &[Rex],
        names: &[String],
    ) -> Option<Frame> {
        if exprs.iter().any(|e| e.has_bare_correlation()) {
            return None;
        }
        let frame = self.decorrelate_rel(input)?;
        let needed: BTreeSet<CorDef> = exprs.iter().flat_map(|e| e.cor_defs()).collect();
        let frame = self.with_value_generator(frame, &needed)?;
        let mut new_exprs = exprs
            .iter()
            .map(|e| rewrite_rex(e, &frame))
            .collect::<Option<Vec<_>>>()?;
        let mut new_names = names.to_vec();
        let mut cor_defs = BTreeMap::new();
        for (def, &pos) in &frame.cor_defs {
            cor_defs.insert(*def, new_exprs.len());
            new_exprs.push(Rex::field_of(frame.rel.row_type(), pos));
            new_names.push(def.to_string());
        }
        Some(Frame {
            rel: RelNode::project(frame.rel, new_exprs, new_names),
            old_to_new: (0..exprs.len()).collect(),
            cor_defs,
        })
    }

    fn decorrelate_aggregate(
        &mut self,
        input: &RelRef,
        group: &[usize],
        calls: &[AggCall],
    ) -> Option<Frame> {
        let frame = self.decorrelate_rel(input)?;
        // Group keys first, then carried correlated fields, then arguments.
        let mut positions: Vec<usize> = group
            .iter()
            .map(|&g| frame.old_to_new.get(g).copied())
            .collect::<Option<_>>()?;
        let carried: Vec<CorDef> = frame.cor_defs.keys().copied().collect();
        positions.extend(frame.cor_defs.values().copied());
        let key_count = positions.len();
        let mut new_calls = Vec::with_capacity(calls.len());
        for call in calls {
            let mut args = Vec::with_capacity(call.args.len());
            for &a in &call.args {
                let new = *frame.old_to_new.get(a)?;
                let slot = match positions.iter().position(|&p| p == new) {
                    Some(slot) => slot,
                    None => {
                        positions.push(new);
                        positions.len() - 1
                    }
                };
                args.push(slot);
            }
            new_calls.push(AggCall {
                args,
                ..call.clone()
            });
        }
        let project = RelNode::project_fields(frame.rel, &positions);
        let agg = RelNode::aggregate(project, (0..key_count).collect(), new_calls);
        let agg_frame = Frame {
            rel: agg,
            old_to_new: (0..group.len())
                .chain((0..calls.len()).map(|k| key_count + k))
                .collect(),
            cor_defs: carried
                .iter()
                .enumerate()
                .map(|(j, def)| (*def, group.len() + j))
                .collect(),
        };
        if group.is_empty() && !carried.is_empty() {
            return self.restore_scalar_aggregate(agg_frame, calls);
        }
        Some(agg_frame)
    }

    /// A scalar aggregate yields one row even for an empty input; grouping it
    /// by correlated fields would drop that row. Join the grouped result back
    /// to every correlated value and give `COUNT` zero where nothing matched.
    fn restore_scalar_aggregate(&mut self, agg: Frame, calls: &[AggCall]) -> Option<Frame> {
        let defs: Vec<CorDef> = agg.cor_defs.keys().copied().collect();
        let generator = self.value_generator(&defs)?;
        let gen_type = generator.rel.row_type().clone();
        let width = gen_type.len();
        let agg_type = agg.rel.row_type().clone();
        let condition = Rex::and(
            agg.cor_defs
                .iter()
                .map(|(def, &agg_pos)| {
                    let gen_pos = generator.cor_defs.get(def).copied()?;
                    Some(Rex::is_not_distinct_from(
                        Rex::field_of(&gen_type, gen_pos),
                        Rex::field_of(&agg_type, agg_pos).shift(width),
                    ))
                })
                .collect::<Option<Vec<_>>>()?,
        );
        let join = RelNode::join(generator.rel, agg.rel, condition, JoinType::Left);
        let join_type = join.row_type().clone();
        let mut exprs: Vec<Rex> = (0..width).map(|j| Rex::field_of(&join_type, j)).collect();
        let mut names = gen_type.field_names();
        for (def, &pos) in &generator.cor_defs {
            names[pos] = def.to_string();
        }
        for (k, call) in calls.iter().enumerate() {
            let pos = width + agg.old_to_new[k];
            let value = Rex::field_of(&join_type, pos);
            exprs.push(match call.func {
                AggFunc::Count => Rex::call(
                    RexOp::Coalesce,
                    vec![value, Rex::literal(ScalarValue::Int64(0))],
                ),
                _ => value,
            });
            names.push(call.name.clone());
        }
        trace!(calls = calls.len(), "restored empty-group aggregate rows");
        Some(Frame {
            rel: RelNode::project(join, exprs, names),
            old_to_new: (0..calls.len()).map(|k| width + k).collect(),
            cor_defs: generator.cor_defs,
        })
    }

    fn decorrelate_sort(
        &mut self,
        input: &RelRef,
        keys: &[SortKey],
        offset: Option<usize>,
        fetch: Option<usize>,
    ) -> Option<Frame> {
        let frame = self.decorrelate_rel(input)?;
        // A limit applies per outer row; it cannot be carried past the join.
        if !frame.cor_defs.is_empty() && (offset.is_some() || fetch.is_some()) {
            return None;
        }
        let keys = keys
            .iter()
            .map(|k| {
                Some(SortKey {
                    field: *frame.old_to_new.get(k.field)?,
                    ..*k
                })
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Frame {
            rel: RelNode::sort(frame.rel.clone(), keys, offset, fetch),
            old_to_new: frame.old_to_new,
            cor_defs: frame.cor_defs,
        })
    }

    fn decorrelate_join(
        &mut self,
        left: &RelRef,
        right: &RelRef,
        condition: &Rex,
        join_type: JoinType,
    ) -> Option<Frame> {
        if condition.has_bare_correlation() {
            return None;
        }
        let lf = self.decorrelate_rel(left)?;
        let rf = self.decorrelate_rel(right)?;
        // Carried columns on a null-generating side would lose their values.
        if !rf.cor_defs.is_empty() && join_type != JoinType::Inner {
            return None;
        }
        if !lf.cor_defs.is_empty() && join_type.generates_nulls_on_left() {
            return None;
        }
        let left_width = lf.rel.row_type().len();
        let combined = combine(&lf, &rf, left_width);
        let mut conjuncts = vec![rewrite_rex(condition, &combined)?];
        // A field carried by both sides must agree across the join.
        for (def, &lpos) in &lf.cor_defs {
            if let Some(&rpos) = rf.cor_defs.get(def) {
                conjuncts.push(Rex::is_not_distinct_from(
                    Rex::field_of(lf.rel.row_type(), lpos),
                    Rex::field_of(rf.rel.row_type(), rpos).shift(left_width),
                ));
            }
        }
        let rel = RelNode::join(lf.rel.clone(), rf.rel.clone(), Rex::and(conjuncts), join_type);
        if join_type.projects_right() {
            Some(Frame { rel, ..combined })
        } else {
            Some(Frame {
                rel,
                old_to_new: lf.old_to_new,
                cor_defs: lf.cor_defs,
            })
        }
    }

    fn decorrelate_correlate(
        &mut self,
        rel: &RelRef,
        left: &RelRef,
        right: &RelRef,
        correlation: CorrelationId,
        join_type: JoinType,
    ) -> Option<Frame> {
        if self
            .maps
            .correlation(correlation)
            .is_some_and(|c| c.correlate != rel.id)
        {
            debug!(%correlation, node = %rel.id, "correlation is bound elsewhere");
            return None;
        }
        if !matches!(
            join_type,
            JoinType::Inner | JoinType::Left | JoinType::Semi | JoinType::Anti
        ) {
            return None;
        }
        let lf = self.decorrelate_rel(left)?;
        let rf = self.decorrelate_rel(right)?;
        let left_width = lf.rel.row_type().len();
        let mut conjuncts = vec![];
        let mut remaining = BTreeMap::new();
        for (def, &pos) in &rf.cor_defs {
            let lpos = if def.id == correlation {
                *lf.old_to_new.get(def.field)?
            } else if let Some(&lpos) = lf.cor_defs.get(def) {
                // An outer value carried by both sides must agree.
                lpos
            } else {
                remaining.insert(*def, pos + left_width);
                continue;
            };
            conjuncts.push(Rex::is_not_distinct_from(
                Rex::field_of(lf.rel.row_type(), lpos),
                Rex::field_of(rf.rel.row_type(), pos).shift(left_width),
            ));
        }
        if !remaining.is_empty() && join_type != JoinType::Inner {
            return None;
        }
        let rel = RelNode::join(lf.rel.clone(), rf.rel.clone(), Rex::and(conjuncts), join_type);
        let mut old_to_new = lf.old_to_new.clone();
        if join_type.projects_right() {
            old_to_new.extend(rf.old_to_new.iter().map(|p| p + left_width));
        }
        let mut cor_defs = lf.cor_defs.clone();
        cor_defs.extend(remaining);
        debug!(%correlation, join = %rel.id, %join_type, "correlate rewritten as join");
        Some(Frame {
            rel,
            old_to_new,
            cor_defs,
        })
    }

    // -----------------------------
    // Value generators
    // -----------------------------

    /// Make `frame` carry every field in `needed`, joining it with the
    /// distinct values of fields it does not carry yet.
    fn with_value_generator(&self, frame: Frame, needed: &BTreeSet<CorDef>) -> Option<Frame> {
        let missing: Vec<CorDef> = needed
            .iter()
            .filter(|d| !frame.cor_defs.contains_key(d))
            .copied()
            .collect();
        if missing.is_empty() {
            return Some(frame);
        }
        let generator = self.value_generator(&missing)?;
        Some(join_carried(frame, generator))
    }

    /// Distinct values of `defs` taken from each correlation's producer, one
    /// generator per correlation, joined together.
    ///
    /// A producer that sits inside another correlated subtree carries the
    /// outer fields it reads; its generator carries them too, and generators
    /// sharing an outer field are joined on it.
    fn value_generator(&self, defs: &[CorDef]) -> Option<Frame> {
        let mut by_correlation: BTreeMap<CorrelationId, BTreeSet<usize>> = BTreeMap::new();
        for d in defs {
            by_correlation.entry(d.id).or_default().insert(d.field);
        }
        let mut generator: Option<Frame> = None;
        for (id, fields) in by_correlation {
            let producer = self.maps.correlation(id)?.producer;
            let frame = self.frames.get(&producer)?;
            let mut positions = fields
                .iter()
                .map(|&f| frame.old_to_new.get(f).copied())
                .collect::<Option<Vec<_>>>()?;
            let mut cor_defs: BTreeMap<CorDef, usize> = fields
                .iter()
                .enumerate()
                .map(|(k, &field)| (CorDef { id, field }, k))
                .collect();
            for (def, &pos) in &frame.cor_defs {
                cor_defs.insert(*def, positions.len());
                positions.push(pos);
            }
            let values = Frame {
                rel: RelNode::distinct(RelNode::project_fields(frame.rel.clone(), &positions)),
                old_to_new: vec![],
                cor_defs,
            };
            generator = Some(match generator {
                None => values,
                Some(g) => join_carried(g, values),
            });
        }
        let generator = generator?;
        trace!(fields = generator.cor_defs.len(), "built value generator");
        Some(generator)
    }
}

// -----------------------------
// Helpers
// -----------------------------

/// Inner join `right` onto `left` on the correlated fields both carry.
/// Columns of `left` keep their positions.
fn join_carried(left: Frame, right: Frame) -> Frame {
    let width = left.rel.row_type().len();
    let conjuncts: Vec<Rex> = left
        .cor_defs
        .iter()
        .filter_map(|(def, &lpos)| {
            let rpos = *right.cor_defs.get(def)?;
            Some(Rex::is_not_distinct_from(
                Rex::field_of(left.rel.row_type(), lpos),
                Rex::field_of(right.rel.row_type(), rpos).shift(width),
            ))
        })
        .collect();
    let mut cor_defs = left.cor_defs;
    for (def, pos) in right.cor_defs {
        cor_defs.entry(def).or_insert(pos + width);
    }
    Frame {
        rel: RelNode::join(left.rel, right.rel, Rex::and(conjuncts), JoinType::Inner),
        old_to_new: left.old_to_new,
        cor_defs,
    }
}

/// Frame of a join's combined output before semi/anti trimming.
fn combine(lf: &Frame, rf: &Frame, left_width: usize) -> Frame {
    let mut old_to_new = lf.old_to_new.clone();
    old_to_new.extend(rf.old_to_new.iter().map(|p| p + left_width));
    let mut cor_defs = lf.cor_defs.clone();
    for (def, &pos) in &rf.cor_defs {
        cor_defs.entry(*def).or_insert(pos + left_width);
    }
    Frame {
        rel: lf.rel.clone(),
        old_to_new,
        cor_defs,
    }
}

/// Rewrite `rex` over the old input into one over `frame.rel`; correlated
/// field reads become references to carried columns.
fn rewrite_rex(rex: &Rex, frame: &Frame) -> Option<Rex> {
    let mut ok = true;
    let out = rex.transform(&mut |r| {
        if let Some(def) = r.as_cor_def() {
            return match frame.cor_defs.get(&def) {
                Some(&pos) => Some(Rex::input_ref(pos, r.ty())),
                None => {
                    ok = false;
                    None
                }
            };
        }
        match r {
            Rex::InputRef { index, ty } => match frame.old_to_new.get(*index) {
                Some(&pos) => Some(Rex::input_ref(pos, ty.clone())),
                None => {
                    ok = false;
                    None
                }
            },
            _ => None,
        }
    });
    ok.then_some(out)
}

/// `frame.rel` reshaped to the output columns of `old`.
fn restore_layout(old: &RelNode, frame: Frame) -> RelRef {
    if frame.is_identity() {
        return frame.rel;
    }
    let row_type = old.row_type();
    let exprs = frame
        .old_to_new
        .iter()
        .map(|&p| Rex::field_of(frame.rel.row_type(), p))
        .collect();
    RelNode::project(frame.rel, exprs, row_type.field_names())
}
