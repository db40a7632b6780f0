//! In-process storage backend for embedded use and tests.
//!
//! Implements the range-scan/put contracts over an in-memory table map.
//! Scans evaluate the key range and residual filter against decoded rows
//! and stream exactly one chunk followed by `Done`, in ascending local-key
//! order. Tombstoned records stay in the chunk; the worker skips them.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tfq_common::{NodeId, QueryError, Result, SubQueryId, TfqError};
use tfq_storage::codec::{cell_cmp, decode_record_value};
use tfq_storage::scan::{key_in_range, CoverageSpec, RangeScan, ScanMessage, StorageClient};
use tfq_storage::CellValue;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Vec<u8>,
    local_key: Vec<CellValue>,
    value: Vec<u8>,
}

/// In-memory storage engine keyed by table name.
#[derive(Debug, Default)]
pub struct InProcessStorage {
    tables: Mutex<HashMap<String, Vec<StoredRecord>>>,
}

impl InProcessStorage {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records in a table.
    pub fn record_count(&self, table: &str) -> usize {
        let tables = self.tables.lock().expect("storage lock poisoned");
        tables.get(table).map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl StorageClient for InProcessStorage {
    async fn start_range_scan(
        &self,
        _node: &NodeId,
        scan: RangeScan,
        sub_qid: SubQueryId,
        _timeout_ms: u64,
        _coverage: CoverageSpec,
        reply_to: mpsc::Sender<ScanMessage>,
    ) -> Result<()> {
        let records = {
            let tables = self.tables.lock().expect("storage lock poisoned");
            tables.get(&scan.table).cloned().unwrap_or_default()
        };
        tokio::spawn(async move {
            let mut selected = Vec::new();
            for record in records {
                match key_in_range(&record.local_key, &scan.range) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        let _ = reply_to
                            .send(ScanMessage::Error {
                                sub_qid,
                                error: QueryError::Storage(e.to_string()),
                            })
                            .await;
                        return;
                    }
                }
                if let Some(filter) = &scan.filter {
                    match decode_record_value(&record.value) {
                        // Tombstones pass through; there is no row to filter.
                        Ok(None) => {}
                        Ok(Some(row)) => match filter.matches(&row) {
                            Ok(true) => {}
                            Ok(false) => continue,
                            Err(e) => {
                                let _ = reply_to
                                    .send(ScanMessage::Error {
                                        sub_qid,
                                        error: QueryError::Storage(e.to_string()),
                                    })
                                    .await;
                                return;
                            }
                        },
                        Err(e) => {
                            let _ = reply_to
                                .send(ScanMessage::Error {
                                    sub_qid,
                                    error: QueryError::Storage(e.to_string()),
                                })
                                .await;
                            return;
                        }
                    }
                }
                selected.push(record);
            }
            selected.sort_by(|a, b| cmp_local_keys(&a.local_key, &b.local_key));
            debug!(
                table = %scan.table,
                sub_query = %sub_qid,
                records = selected.len(),
                "range scan served"
            );
            let chunk = selected
                .into_iter()
                .map(|r| (r.key, r.value))
                .collect::<Vec<_>>();
            let _ = reply_to
                .send(ScanMessage::Results {
                    sub_qid: sub_qid.clone(),
                    chunk,
                })
                .await;
            let _ = reply_to.send(ScanMessage::Done { sub_qid }).await;
        });
        Ok(())
    }

    async fn put(&self, _node: &NodeId, table: &str, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        // Keys are packed `(field, cell)` pairs; the cells in pack order are
        // the record's local key.
        let pairs: Vec<(String, CellValue)> = serde_json::from_slice(&key)
            .map_err(|e| TfqError::Execution(format!("stored key decode failed: {e}")))?;
        let local_key: Vec<CellValue> = pairs.into_iter().map(|(_, cell)| cell).collect();

        let mut tables = self.tables.lock().expect("storage lock poisoned");
        let records = tables.entry(table.to_string()).or_default();
        match records.iter_mut().find(|r| r.local_key == local_key) {
            Some(existing) => {
                existing.key = key;
                existing.value = value;
            }
            None => records.push(StoredRecord {
                key,
                local_key,
                value,
            }),
        }
        Ok(())
    }
}

fn cmp_local_keys(a: &[CellValue], b: &[CellValue]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match cell_cmp(x, y).unwrap_or(Ordering::Equal) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}
