//! Coverage planning: sub-query start key to primary owner node.
//!
//! Contract:
//! - the engine-level key packs the startkey's `(field, value)` pairs in
//!   partition-key order, with the time component rounded to its quantum
//!   bucket so every window hashes to the partition storing it;
//! - exactly one primary serves a sub-query; there are no fallbacks, since
//!   a fallback could return a partial window.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tfq_common::{NodeId, QueryError};
use tfq_planner::SubQuery;
use tfq_storage::codec::pack_key_cells;
use tfq_storage::scan::RowFilter;
use tfq_storage::{CellValue, KeyComponent, TableDdl};
use tracing::trace;

/// Cluster membership surface consulted by the planner.
///
/// Implementations own the ordering of the primaries list; the planner
/// takes its head.
pub trait Membership: Send + Sync {
    /// Consistent hash of `(bucket, key)` to a document index.
    fn chash_key(&self, bucket: &str, key: &[u8]) -> u64;

    /// Primary owners of a document index at replication factor `n_val`,
    /// excluding fallbacks.
    fn primary_owners(&self, doc_idx: u64, n_val: usize) -> Vec<NodeId>;
}

/// Assignment of one sub-query to its owning node.
#[derive(Debug, Clone)]
pub struct CoveragePlan {
    /// Primary node responsible for the sub-query's hash.
    pub node: NodeId,
    /// Coverage filters; always empty for primary-only plans.
    pub filters: Vec<RowFilter>,
}

/// Choose the primary owner for one sub-query.
pub fn plan_coverage(
    sub_query: &SubQuery,
    n_val: usize,
    membership: &dyn Membership,
) -> Result<CoveragePlan, QueryError> {
    let cells: Vec<(String, CellValue)> = sub_query
        .range
        .start
        .iter()
        .map(|c| (c.field.clone(), c.value.clone()))
        .collect();
    let node = primary_for_cells(&sub_query.ddl, &cells, n_val, membership)?;
    Ok(CoveragePlan {
        node,
        filters: Vec::new(),
    })
}

/// Primary owner placing a record or sub-query by its partition key.
///
/// `cells` must contain every partition-key field; the time component is
/// rounded to its quantum bucket before hashing.
pub fn primary_for_cells(
    ddl: &TableDdl,
    cells: &[(String, CellValue)],
    n_val: usize,
    membership: &dyn Membership,
) -> Result<NodeId, QueryError> {
    let key = partition_hash_key(ddl, cells)?;
    let doc_idx = membership.chash_key(&ddl.name, &key);
    let primaries = membership.primary_owners(doc_idx, n_val);
    trace!(
        table = %ddl.name,
        doc_idx,
        primaries = primaries.len(),
        "coverage computed"
    );
    primaries
        .into_iter()
        .next()
        .ok_or(QueryError::NoPrimariesAvailable)
}

/// Pack partition-key cells (quantum applied) into the engine hash key.
pub fn partition_hash_key(
    ddl: &TableDdl,
    cells: &[(String, CellValue)],
) -> Result<Vec<u8>, QueryError> {
    let quantum = ddl
        .quantum()
        .map_err(|e| QueryError::InvalidQuery(e.to_string()))?;

    let mut packed: Vec<(&str, CellValue)> = Vec::with_capacity(ddl.partition_key.len());
    for component in &ddl.partition_key {
        let field = component.field();
        let cell = cells
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, c)| c)
            .ok_or_else(|| {
                QueryError::InvalidQuery(format!("partition key field '{field}' has no cell"))
            })?;
        let value = match component {
            KeyComponent::Param { .. } => cell.clone(),
            KeyComponent::Quantum { .. } => {
                let ts = cell.as_timestamp().ok_or_else(|| {
                    QueryError::InvalidQuery(format!(
                        "quantum field '{field}' is bound to a non-timestamp cell"
                    ))
                })?;
                CellValue::Timestamp(quantum.floor(ts))
            }
        };
        packed.push((field, value));
    }

    let pairs: Vec<(&str, &CellValue)> = packed.iter().map(|(f, v)| (*f, v)).collect();
    pack_key_cells(&pairs).map_err(|e| QueryError::Storage(e.to_string()))
}

/// Fixed-membership hash ring for embedded use and tests.
///
/// Document indexes are spread over a fixed partition count; ownership
/// walks ring successors from the hashed partition.
#[derive(Debug, Clone)]
pub struct StaticRing {
    nodes: Vec<NodeId>,
    partitions: u64,
}

impl StaticRing {
    /// Ring over `nodes` with the default partition count.
    pub fn new(nodes: Vec<NodeId>) -> Self {
        Self {
            nodes,
            partitions: 64,
        }
    }

    /// Ring with an explicit partition count.
    pub fn with_partitions(nodes: Vec<NodeId>, partitions: u64) -> Self {
        Self {
            nodes,
            partitions: partitions.max(1),
        }
    }
}

impl Membership for StaticRing {
    fn chash_key(&self, bucket: &str, key: &[u8]) -> u64 {
        let mut hasher = DefaultHasher::new();
        bucket.hash(&mut hasher);
        key.hash(&mut hasher);
        hasher.finish() % self.partitions
    }

    fn primary_owners(&self, doc_idx: u64, n_val: usize) -> Vec<NodeId> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        let start = (doc_idx % self.nodes.len() as u64) as usize;
        (0..n_val.min(self.nodes.len()))
            .map(|i| self.nodes[(start + i) % self.nodes.len()].clone())
            .collect()
    }
}
