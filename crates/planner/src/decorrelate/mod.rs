//! Correlated subquery elimination over relational trees.

mod correlation;
mod decorrelator;
mod remove;

pub use correlation::{Correlation, CorrelationMaps};
pub use decorrelator::Decorrelator;

use crate::rel::RelRef;

/// Remove scalar subqueries with unique keys, then decorrelate what is left.
pub fn decorrelate_query(root: RelRef) -> RelRef {
    let root = Decorrelator::new(CorrelationMaps::build(&root)).remove_correlation(root);
    Decorrelator::new(CorrelationMaps::build(&root)).decorrelate(root)
}
