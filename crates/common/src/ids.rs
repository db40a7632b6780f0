//! Typed identifiers shared across worker/planner components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of one cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(
    /// Raw node name.
    pub String,
);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Query identifier, unique for the lifetime of the owning node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId {
    /// Node that minted the identifier.
    pub node: NodeId,
    /// Monotonic counter on the minting node.
    pub seq: u64,
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.seq)
    }
}

/// Sub-query identifier: 1-based coverage-plan position plus owning query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubQueryId {
    /// 1-based position in coverage-plan order.
    pub index: usize,
    /// Owning query.
    pub qid: QueryId,
}

impl fmt::Display for SubQueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.qid, self.index)
    }
}
