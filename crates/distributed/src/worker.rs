//! Query worker runtime and result reassembly.
//!
//! Responsibilities:
//! - pull the next ready query from the shared queue;
//! - fan out its sub-queries through the injected dispatcher;
//! - accumulate chunked results in arrival order and emit them in
//!   coverage-plan (ascending index) order;
//! - drop late and duplicate chunks, abort whole queries on the first
//!   error, and return to the queue for the next query.
//!
//! Identity semantics:
//! - every storage reply carries the sub-query id `(index, qid)`;
//! - replies whose qid does not match the in-flight query are logged at
//!   debug and discarded, which also retires replies that arrive after a
//!   timeout already failed the query.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tfq_common::{global_metrics, QueryError, QueryId, SubQueryId};
use tfq_planner::{SelectStmt, SubQuery};
use tfq_storage::codec::decode_record_value;
use tfq_storage::scan::{CoverageSpec, RangeScan, ScanMessage, StorageClient};
use tfq_storage::Row;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::coverage::{plan_coverage, Membership};
use crate::queue::{QueryQueue, QueryResult, QueuedQuery};

#[derive(Debug, Clone)]
/// Worker identity and runtime controls.
pub struct WorkerConfig {
    /// Worker name used in logs.
    pub name: String,
    /// Capacity of the scan reply channel handed to the dispatcher.
    pub scan_channel_depth: usize,
    /// Accumulation policy for chunks beyond the first per sub-query.
    pub chunk_policy: ChunkPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "query-worker-1".to_string(),
            scan_channel_depth: 64,
            chunk_policy: ChunkPolicy::FirstChunkWins,
        }
    }
}

/// Sub-query fan-out contract, injected into the worker.
///
/// The default implementation is [`CoverageDispatcher`]; tests substitute
/// their own to drive the worker directly.
#[async_trait]
pub trait SubQueryDispatcher: Send + Sync {
    /// Start every sub-query in `batch`, streaming replies to `reply_to`.
    async fn dispatch(
        &self,
        batch: &[(SubQuery, SubQueryId)],
        reply_to: mpsc::Sender<ScanMessage>,
    ) -> Result<(), QueryError>;
}

/// Default dispatcher: coverage-plan each sub-query and start a
/// primary-only range scan on the owning node.
pub struct CoverageDispatcher<S, M> {
    storage: Arc<S>,
    membership: Arc<M>,
    n_val: usize,
    sub_query_timeout_ms: u64,
}

impl<S, M> CoverageDispatcher<S, M> {
    /// Dispatcher over the given storage client and membership view.
    pub fn new(
        storage: Arc<S>,
        membership: Arc<M>,
        n_val: usize,
        sub_query_timeout_ms: u64,
    ) -> Self {
        Self {
            storage,
            membership,
            n_val,
            sub_query_timeout_ms,
        }
    }
}

#[async_trait]
impl<S, M> SubQueryDispatcher for CoverageDispatcher<S, M>
where
    S: StorageClient,
    M: Membership,
{
    async fn dispatch(
        &self,
        batch: &[(SubQuery, SubQueryId)],
        reply_to: mpsc::Sender<ScanMessage>,
    ) -> Result<(), QueryError> {
        for (sub_query, sub_qid) in batch {
            let plan = plan_coverage(sub_query, self.n_val, self.membership.as_ref())?;
            let scan = RangeScan {
                table: sub_query.ddl.name.clone(),
                range: sub_query.range.clone(),
                filter: sub_query.filter.clone(),
            };
            debug!(
                sub_query = %sub_qid,
                node = %plan.node,
                "starting range scan"
            );
            self.storage
                .start_range_scan(
                    &plan.node,
                    scan,
                    sub_qid.clone(),
                    self.sub_query_timeout_ms,
                    CoverageSpec::Colocated,
                    reply_to.clone(),
                )
                .await
                .map_err(|e| QueryError::Storage(e.to_string()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerStatus {
    Void,
    AccumulatingChunks,
}

/// How chunks beyond the first per sub-query index are handled.
///
/// One chunk per sub-query is the storage contract today; the enum marks
/// the extension point for streaming backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPolicy {
    /// Keep the first chunk per index, drop the rest.
    FirstChunkWins,
}

enum WorkerMessage {
    PopNextQuery,
    Scan(ScanMessage),
}

/// Single-query coordinator actor.
///
/// Owns at most one query at a time; multiple workers may run against the
/// same queue in parallel.
pub struct QueryWorker<D: SubQueryDispatcher> {
    config: WorkerConfig,
    queue: Arc<QueryQueue>,
    dispatcher: Arc<D>,
    inbox_tx: mpsc::UnboundedSender<WorkerMessage>,
    inbox_rx: mpsc::UnboundedReceiver<WorkerMessage>,
    scan_tx: mpsc::Sender<ScanMessage>,
    scan_rx: Option<mpsc::Receiver<ScanMessage>>,

    qid: Option<QueryId>,
    reply_to: Option<tokio::sync::oneshot::Sender<QueryResult>>,
    query: Option<SelectStmt>,
    table: String,
    sub_qrys: HashSet<usize>,
    status: WorkerStatus,
    result: Vec<(usize, Vec<Row>)>,
    started_at: Option<Instant>,
}

impl<D: SubQueryDispatcher + 'static> QueryWorker<D> {
    /// Build a worker over the shared queue and dispatcher.
    pub fn new(config: WorkerConfig, queue: Arc<QueryQueue>, dispatcher: Arc<D>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (scan_tx, scan_rx) = mpsc::channel(config.scan_channel_depth.max(1));
        Self {
            config,
            queue,
            dispatcher,
            inbox_tx,
            inbox_rx,
            scan_tx,
            scan_rx: Some(scan_rx),
            qid: None,
            reply_to: None,
            query: None,
            table: String::new(),
            sub_qrys: HashSet::new(),
            status: WorkerStatus::Void,
            result: Vec::new(),
            started_at: None,
        }
    }

    /// Drive the worker until the queue closes.
    pub async fn run(mut self) {
        info!(worker = %self.config.name, "query worker started");
        // Funnel storage replies into the worker inbox so the actor has a
        // single receive point.
        if let Some(mut scan_rx) = self.scan_rx.take() {
            let forward = self.inbox_tx.clone();
            tokio::spawn(async move {
                while let Some(msg) = scan_rx.recv().await {
                    if forward.send(WorkerMessage::Scan(msg)).is_err() {
                        break;
                    }
                }
            });
        }
        self.send_pop();
        while let Some(msg) = self.inbox_rx.recv().await {
            match msg {
                WorkerMessage::PopNextQuery => {
                    if !self.pop_next_query().await {
                        break;
                    }
                }
                WorkerMessage::Scan(scan) => self.handle_scan(scan),
            }
        }
        info!(worker = %self.config.name, "query worker stopped");
    }

    fn send_pop(&self) {
        let _ = self.inbox_tx.send(WorkerMessage::PopNextQuery);
    }

    async fn pop_next_query(&mut self) -> bool {
        match self.queue.pop().await {
            Some(entry) => {
                self.execute(entry).await;
                true
            }
            None => {
                debug!(worker = %self.config.name, "query queue closed");
                false
            }
        }
    }

    async fn execute(&mut self, entry: QueuedQuery) {
        if self.status != WorkerStatus::Void {
            // A worker only pops while idle; landing here is a bug.
            error!(
                worker = %self.config.name,
                query_id = %entry.qid,
                "execute requested while a query is in flight"
            );
            let _ = entry.reply_to.send(Err(QueryError::Mismanagement(
                "query worker is not idle".to_string(),
            )));
            return;
        }

        let QueuedQuery {
            reply_to,
            qid,
            sub_queries,
            ddl,
        } = entry;

        if sub_queries.is_empty() {
            let _ = reply_to.send(Ok(Vec::new()));
            self.send_pop();
            return;
        }

        let count = sub_queries.len();
        let batch: Vec<(SubQuery, SubQueryId)> = sub_queries
            .into_iter()
            .enumerate()
            .map(|(i, q)| {
                (
                    q,
                    SubQueryId {
                        index: i + 1,
                        qid: qid.clone(),
                    },
                )
            })
            .collect();
        global_metrics().add_subqueries_dispatched(&ddl.name, count as u64);

        match self.dispatcher.dispatch(&batch, self.scan_tx.clone()).await {
            Ok(()) => {
                debug!(
                    worker = %self.config.name,
                    query_id = %qid,
                    sub_queries = count,
                    "sub-queries dispatched"
                );
                self.qid = Some(qid);
                self.reply_to = Some(reply_to);
                self.query = Some(batch[0].0.select.clone());
                self.table = ddl.name.clone();
                self.sub_qrys = (1..=count).collect();
                self.status = WorkerStatus::Void;
                self.result.clear();
                self.started_at = Some(Instant::now());
            }
            Err(e) => {
                warn!(
                    worker = %self.config.name,
                    query_id = %qid,
                    error = %e,
                    "sub-query dispatch failed"
                );
                global_metrics().inc_queries_failed(&ddl.name);
                let _ = reply_to.send(Err(e));
                self.send_pop();
            }
        }
    }

    fn handle_scan(&mut self, msg: ScanMessage) {
        let sub_qid = match &msg {
            ScanMessage::Results { sub_qid, .. }
            | ScanMessage::Done { sub_qid }
            | ScanMessage::Error { sub_qid, .. } => sub_qid.clone(),
        };
        if self.qid.as_ref() != Some(&sub_qid.qid) {
            debug!(
                worker = %self.config.name,
                sub_query = %sub_qid,
                "dropping reply for stale query id"
            );
            return;
        }

        match msg {
            ScanMessage::Results { chunk, .. } => {
                if !self.sub_qrys.contains(&sub_qid.index) {
                    match self.config.chunk_policy {
                        ChunkPolicy::FirstChunkWins => {
                            debug!(
                                worker = %self.config.name,
                                sub_query = %sub_qid,
                                "dropping extra chunk for completed sub-query"
                            );
                            return;
                        }
                    }
                }
                match self.decode_chunk(&chunk) {
                    Ok(rows) => {
                        self.result.push((sub_qid.index, rows));
                        self.sub_qrys.remove(&sub_qid.index);
                        self.status = WorkerStatus::AccumulatingChunks;
                        global_metrics().inc_chunks_received(&self.table);
                    }
                    Err(e) => self.fail_query(e),
                }
            }
            ScanMessage::Done { .. } => {
                if self.sub_qrys.is_empty() {
                    self.finish_query();
                }
            }
            ScanMessage::Error { error, .. } => {
                warn!(
                    worker = %self.config.name,
                    sub_query = %sub_qid,
                    error = %error,
                    "sub-query failed; aborting query"
                );
                self.fail_query(error);
            }
        }
    }

    // Tombstones are skipped; the projection keeps pairs in stored order.
    fn decode_chunk(&self, chunk: &[(Vec<u8>, Vec<u8>)]) -> Result<Vec<Row>, QueryError> {
        let mut rows = Vec::with_capacity(chunk.len());
        for (_key, value) in chunk {
            let row = decode_record_value(value)
                .map_err(|e| QueryError::Storage(format!("chunk decode failed: {e}")))?;
            let Some(row) = row else {
                continue;
            };
            let projected: Row = match self.query.as_ref().map(|q| &q.projection) {
                Some(projection) => row
                    .into_iter()
                    .filter(|(field, _)| projection.keeps(field))
                    .collect(),
                None => row,
            };
            rows.push(projected);
        }
        Ok(rows)
    }

    fn finish_query(&mut self) {
        let mut result = std::mem::take(&mut self.result);
        result.sort_by_key(|(index, _)| *index);
        let rows: Vec<Row> = result.into_iter().flat_map(|(_, rows)| rows).collect();

        info!(
            worker = %self.config.name,
            query_id = ?self.qid,
            rows = rows.len(),
            "query completed"
        );
        global_metrics().inc_queries_succeeded(&self.table);
        if let Some(started_at) = self.started_at.take() {
            global_metrics().observe_query_seconds(&self.table, started_at.elapsed().as_secs_f64());
        }
        if let Some(reply_to) = self.reply_to.take() {
            let _ = reply_to.send(Ok(rows));
        }
        self.reset();
        self.send_pop();
    }

    fn fail_query(&mut self, error: QueryError) {
        global_metrics().inc_queries_failed(&self.table);
        if let Some(reply_to) = self.reply_to.take() {
            let _ = reply_to.send(Err(error));
        }
        self.reset();
        self.send_pop();
    }

    fn reset(&mut self) {
        self.qid = None;
        self.reply_to = None;
        self.query = None;
        self.sub_qrys.clear();
        self.result.clear();
        self.status = WorkerStatus::Void;
        self.started_at = None;
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
