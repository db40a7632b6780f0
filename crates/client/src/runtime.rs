//! Embedding runtime: table lifecycle, SQL entry point, and worker pool.
//!
//! Responsibilities:
//! - activate tables through the compile-state registry;
//! - lower SQL text, compile SELECTs, and submit them to the query queue;
//! - serve DESCRIBE from the DDL and route INSERT rows to their primary;
//! - own the worker pool pulling from the shared queue.

use std::sync::Arc;
use std::time::Duration;

use tfq_common::{global_metrics, EngineConfig, NodeId, QueryError, Result, TfqError};
use tfq_distributed::{
    primary_for_cells, CoverageDispatcher, InProcessStorage, Membership, QidGenerator, QueryQueue,
    QueryWorker, QueuedQuery, StaticRing, WorkerConfig,
};
use tfq_planner::{
    coerce_literal, compile, sql_to_plan, DescribeStmt, InsertStmt, SelectStmt, SqlStatement,
};
use tfq_storage::codec::{encode_record_value, pack_key_cells};
use tfq_storage::scan::StorageClient;
use tfq_storage::{Catalog, CellValue, CompileState, Row, TableDdl};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Embedding runtime over a storage client and membership view.
pub struct Runtime<S, M> {
    config: EngineConfig,
    node: NodeId,
    catalog: Arc<Catalog>,
    queue: Arc<QueryQueue>,
    qids: QidGenerator,
    storage: Arc<S>,
    membership: Arc<M>,
    n_val: usize,
}

impl Runtime<InProcessStorage, StaticRing> {
    /// Single-node runtime over the in-process storage backend.
    pub fn embedded(config: EngineConfig) -> Self {
        let node = NodeId::from("local");
        let membership = StaticRing::new(vec![node.clone()]);
        Self::new(
            config,
            node,
            Arc::new(InProcessStorage::new()),
            Arc::new(membership),
            3,
        )
    }
}

impl<S, M> Runtime<S, M>
where
    S: StorageClient + 'static,
    M: Membership + 'static,
{
    /// Runtime over explicit storage/membership collaborators.
    pub fn new(
        config: EngineConfig,
        node: NodeId,
        storage: Arc<S>,
        membership: Arc<M>,
        n_val: usize,
    ) -> Self {
        let queue = Arc::new(QueryQueue::new(config.query_queue_depth));
        let qids = QidGenerator::new(node.clone());
        Self {
            config,
            node,
            catalog: Arc::new(Catalog::new()),
            queue,
            qids,
            storage,
            membership,
            n_val,
        }
    }

    /// Shared table catalog.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Spawn the worker pool. Must be called within a Tokio runtime.
    pub fn start(&self) {
        for i in 0..self.config.query_workers.max(1) {
            let worker_config = WorkerConfig {
                name: format!("query-worker-{}", i + 1),
                ..WorkerConfig::default()
            };
            let dispatcher = Arc::new(CoverageDispatcher::new(
                Arc::clone(&self.storage),
                Arc::clone(&self.membership),
                self.n_val,
                self.config.sub_query_timeout_ms,
            ));
            let worker = QueryWorker::new(worker_config, Arc::clone(&self.queue), dispatcher);
            tokio::spawn(worker.run());
        }
        info!(
            node = %self.node,
            workers = self.config.query_workers.max(1),
            "query worker pool started"
        );
    }

    /// Register and activate a table.
    ///
    /// The registry row is inserted as `compiling` owned by this activation
    /// call, then flipped to `compiled` or `failed` by the shape check.
    pub fn create_table(&self, ddl: TableDdl) -> Result<()> {
        let owner = format!("{}/activate/{}", self.node, ddl.name);
        let ddl = Arc::new(ddl);
        self.catalog
            .insert(Arc::clone(&ddl), &owner, CompileState::Compiling);
        match ddl.validate() {
            Ok(()) => {
                self.catalog.update_state(&owner, CompileState::Compiled)?;
                info!(table = %ddl.name, "table activated");
                Ok(())
            }
            Err(e) => {
                warn!(table = %ddl.name, error = %e, "table activation failed");
                self.catalog.update_state(&owner, CompileState::Failed)?;
                Err(e)
            }
        }
    }

    /// Poll until a table is active, bounded by the activation-wait ceiling.
    pub async fn wait_for_table_active(&self, table: &str) -> Result<()> {
        let deadline = Duration::from_secs(self.config.activation_wait_secs.max(1));
        let started = std::time::Instant::now();
        loop {
            match self.catalog.get_state(table) {
                Some(CompileState::Compiled) => return Ok(()),
                Some(CompileState::Failed) => {
                    return Err(QueryError::TableInactive(table.to_string()).into());
                }
                Some(CompileState::Compiling) | None => {}
            }
            if started.elapsed() >= deadline {
                return match self.catalog.get_state(table) {
                    None => Err(QueryError::NotFound(format!("table '{table}'")).into()),
                    _ => Err(QueryError::TableInactive(table.to_string()).into()),
                };
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Execute one SQL statement and return its rows.
    ///
    /// SELECT returns data rows, DESCRIBE returns one row per column, and
    /// INSERT returns no rows.
    pub async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        match sql_to_plan(sql)? {
            SqlStatement::Select(stmt) => self.run_select(stmt).await,
            SqlStatement::Describe(stmt) => self.describe(&stmt),
            SqlStatement::Insert(stmt) => self.run_insert(stmt).await,
        }
    }

    async fn run_select(&self, stmt: SelectStmt) -> Result<Vec<Row>> {
        let table = stmt.table.clone();
        self.check_active(&table)?;
        let ddl = self.catalog.ddl(&table)?;
        let sub_queries =
            compile(&ddl, &stmt, self.config.max_quanta_span).map_err(TfqError::from)?;

        global_metrics().inc_queries_submitted(&table);
        let qid = self.qids.next();
        debug!(
            query_id = %qid,
            table = %table,
            sub_queries = sub_queries.len(),
            "query submitted"
        );
        let (reply_to, rx) = oneshot::channel();
        self.queue
            .push(QueuedQuery {
                reply_to,
                qid,
                sub_queries,
                ddl,
            })
            .await?;
        let outcome = rx
            .await
            .map_err(|_| TfqError::Execution("query worker dropped the reply".to_string()))?;
        outcome.map_err(TfqError::from)
    }

    fn describe(&self, stmt: &DescribeStmt) -> Result<Vec<Row>> {
        let ddl = self.catalog.ddl(&stmt.table)?;
        let quantum = ddl.quantum()?;

        let mut rows = Vec::with_capacity(ddl.fields.len());
        for field in &ddl.fields {
            let partition_pos = ddl
                .partition_key
                .iter()
                .position(|c| c.field() == field.name);
            let local_pos = ddl.local_key.iter().position(|k| *k == field.name);
            let (interval, unit) = if field.name == quantum.field {
                (
                    CellValue::Sint64(quantum.every as i64),
                    CellValue::Varchar(quantum.unit.as_str().to_string()),
                )
            } else {
                (CellValue::Null, CellValue::Null)
            };
            rows.push(vec![
                (
                    "column".to_string(),
                    CellValue::Varchar(field.name.clone()),
                ),
                (
                    "type".to_string(),
                    CellValue::Varchar(field.field_type.as_str().to_string()),
                ),
                ("is_null".to_string(), CellValue::Boolean(field.nullable)),
                (
                    "partition_key".to_string(),
                    position_cell(partition_pos),
                ),
                ("local_key".to_string(), position_cell(local_pos)),
                ("interval".to_string(), interval),
                ("unit".to_string(), unit),
            ]);
        }
        Ok(rows)
    }

    async fn run_insert(&self, stmt: InsertStmt) -> Result<Vec<Row>> {
        self.check_active(&stmt.table)?;
        let ddl = self.catalog.ddl(&stmt.table)?;

        let columns: Vec<String> = if stmt.columns.is_empty() {
            ddl.fields.iter().map(|f| f.name.clone()).collect()
        } else {
            stmt.columns.clone()
        };
        for column in &columns {
            if ddl.field(column).is_none() {
                return Err(
                    QueryError::InvalidQuery(format!("unknown column '{column}'")).into(),
                );
            }
        }

        for literals in &stmt.rows {
            if literals.len() != columns.len() {
                return Err(QueryError::InvalidQuery(format!(
                    "row carries {} values for {} columns",
                    literals.len(),
                    columns.len()
                ))
                .into());
            }

            // Cells in DDL declaration order; absent nullable columns get
            // explicit nulls.
            let mut row: Row = Vec::with_capacity(ddl.fields.len());
            for field in &ddl.fields {
                match columns.iter().position(|c| *c == field.name) {
                    Some(i) => {
                        let cell = coerce_literal(field.field_type, &literals[i], &field.name)
                            .map_err(TfqError::from)?;
                        row.push((field.name.clone(), cell));
                    }
                    None if field.nullable => row.push((field.name.clone(), CellValue::Null)),
                    None => {
                        return Err(QueryError::InvalidQuery(format!(
                            "column '{}' is not nullable and has no value",
                            field.name
                        ))
                        .into());
                    }
                }
            }

            let key_cells: Vec<(&str, &CellValue)> = ddl
                .local_key
                .iter()
                .filter_map(|key_field| {
                    row.iter()
                        .find(|(name, cell)| name == key_field && *cell != CellValue::Null)
                        .map(|(name, cell)| (name.as_str(), cell))
                })
                .collect();
            if key_cells.len() != ddl.local_key.len() {
                return Err(QueryError::BadKeyLength {
                    expected: ddl.local_key.len(),
                    got: key_cells.len(),
                }
                .into());
            }

            let key = pack_key_cells(&key_cells)?;
            let value = encode_record_value(&row)?;
            let node = primary_for_cells(&ddl, &row, self.n_val, &*self.membership)
                .map_err(TfqError::from)?;
            self.storage.put(&node, &ddl.name, key, value).await?;
        }
        debug!(table = %stmt.table, rows = stmt.rows.len(), "insert applied");
        Ok(Vec::new())
    }

    fn check_active(&self, table: &str) -> Result<()> {
        match self.catalog.get_state(table) {
            Some(CompileState::Compiled) => Ok(()),
            Some(_) => Err(QueryError::TableInactive(table.to_string()).into()),
            None => Err(QueryError::NotFound(format!("table '{table}'")).into()),
        }
    }
}

fn position_cell(pos: Option<usize>) -> CellValue {
    match pos {
        Some(p) => CellValue::Sint64((p + 1) as i64),
        None => CellValue::Null,
    }
}
