//! Typed identifiers shared by the validator and the relational layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_REL_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CORRELATION_ID: AtomicU64 = AtomicU64::new(0);

/// Stable identity of one AST node.
///
/// Two structurally equal nodes (two `NULL` literals, say) always carry
/// different ids, so per-node caches never conflate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(
    /// Raw numeric id value.
    pub u64,
);

impl NodeId {
    /// Allocate a fresh process-unique node id.
    pub fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of one relational operator node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelId(
    /// Raw numeric id value.
    pub u64,
);

impl RelId {
    /// Allocate a fresh process-unique rel id.
    pub fn next() -> Self {
        RelId(NEXT_REL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of one correlation variable (`$cor0`, `$cor1`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(
    /// Raw numeric id value.
    pub u64,
);

impl CorrelationId {
    /// Allocate a fresh process-unique correlation id.
    pub fn next() -> Self {
        CorrelationId(NEXT_CORRELATION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$cor{}", self.0)
    }
}
