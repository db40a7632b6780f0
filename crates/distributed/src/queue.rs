//! Process-wide query queue and query-id minting.
//!
//! The queue is a single bounded FIFO; producers enqueue from the public
//! submission API and each pop hands ownership of one query to exactly one
//! worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tfq_common::{NodeId, QueryError, QueryId, Result, TfqError};
use tfq_planner::SubQuery;
use tfq_storage::{Row, TableDdl};
use tokio::sync::{mpsc, oneshot, Mutex};

/// Final outcome of one query, sent to the waiting client.
pub type QueryResult = std::result::Result<Vec<Row>, QueryError>;

/// One queued query, ready for a worker.
#[derive(Debug)]
pub struct QueuedQuery {
    /// Channel the final result is sent on.
    pub reply_to: oneshot::Sender<QueryResult>,
    /// Query identifier minted at submission.
    pub qid: QueryId,
    /// Compiled sub-queries in coverage-plan order.
    pub sub_queries: Vec<SubQuery>,
    /// Table DDL handle.
    pub ddl: Arc<TableDdl>,
}

/// Bounded FIFO with one blocking consumer operation.
#[derive(Debug)]
pub struct QueryQueue {
    tx: mpsc::Sender<QueuedQuery>,
    rx: Mutex<mpsc::Receiver<QueuedQuery>>,
}

impl QueryQueue {
    /// Queue with the given capacity.
    pub fn new(depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(depth.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Enqueue one query; applies backpressure when the queue is full.
    pub async fn push(&self, query: QueuedQuery) -> Result<()> {
        self.tx
            .send(query)
            .await
            .map_err(|_| TfqError::Execution("query queue is closed".to_string()))
    }

    /// Block until the next query is ready; `None` once the queue closes.
    ///
    /// The receiver lock guarantees each entry is handed to exactly one
    /// worker.
    pub async fn pop(&self) -> Option<QueuedQuery> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }
}

/// Mints cluster-unique query identifiers for one owning node.
#[derive(Debug)]
pub struct QidGenerator {
    node: NodeId,
    counter: AtomicU64,
}

impl QidGenerator {
    /// Generator owned by `node`.
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            counter: AtomicU64::new(0),
        }
    }

    /// Next query identifier.
    pub fn next(&self) -> QueryId {
        QueryId {
            node: self.node.clone(),
            seq: self.counter.fetch_add(1, Ordering::Relaxed),
        }
    }
}
