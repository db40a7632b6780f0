//! Range-scan and put contracts implemented by storage backends.
//!
//! Contract:
//! - a range scan streams `Results`/`Done`/`Error` messages back to the
//!   reply channel, tagged with the originating sub-query id;
//! - key ranges cover the full local key, in local-key order;
//! - the residual filter is evaluated backend-side against decoded rows.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tfq_common::{NodeId, QueryError, Result, SubQueryId, TfqError};
use tokio::sync::mpsc;

use crate::codec::{cell_cmp, CellValue, Row};
use crate::ddl::FieldType;

/// Comparison operators usable in WHERE leaves and residual filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

impl CompareOp {
    /// SQL spelling of the operator.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }
}

/// One `(field, type, value)` tuple of a start or end key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyCell {
    /// Field name.
    pub field: String,
    /// Declared field type.
    pub field_type: FieldType,
    /// Bound value.
    pub value: CellValue,
}

/// Inclusive/exclusive local-key range of one sub-query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRange {
    /// Start key cells covering the full local key, in local-key order.
    pub start: Vec<KeyCell>,
    /// End key cells covering the full local key, in local-key order.
    pub end: Vec<KeyCell>,
    /// Whether the start key itself is in range. Default true.
    pub start_inclusive: bool,
    /// Whether the end key itself is in range. Default false.
    pub end_inclusive: bool,
}

/// Residual boolean filter over non-key fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowFilter {
    /// Typed comparison leaf.
    Cmp {
        /// Comparison operator.
        op: CompareOp,
        /// Field name.
        field: String,
        /// Comparison value.
        value: CellValue,
    },
    /// Conjunction.
    And(Box<RowFilter>, Box<RowFilter>),
    /// Disjunction.
    Or(Box<RowFilter>, Box<RowFilter>),
}

impl RowFilter {
    /// Evaluate against a decoded row; absent or null fields never match.
    pub fn matches(&self, row: &Row) -> Result<bool> {
        match self {
            Self::And(a, b) => Ok(a.matches(row)? && b.matches(row)?),
            Self::Or(a, b) => Ok(a.matches(row)? || b.matches(row)?),
            Self::Cmp { op, field, value } => {
                let cell = row
                    .iter()
                    .find(|(name, _)| name == field)
                    .map(|(_, cell)| cell);
                let cell = match cell {
                    None | Some(CellValue::Null) => return Ok(false),
                    Some(cell) => cell,
                };
                let ord = cell_cmp(cell, value)?;
                Ok(match op {
                    CompareOp::Eq => ord == Ordering::Equal,
                    CompareOp::NotEq => ord != Ordering::Equal,
                    CompareOp::Lt => ord == Ordering::Less,
                    CompareOp::LtEq => ord != Ordering::Greater,
                    CompareOp::Gt => ord == Ordering::Greater,
                    CompareOp::GtEq => ord != Ordering::Less,
                })
            }
        }
    }
}

/// One range-scan request against a single quantum window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeScan {
    /// Table (bucket) name.
    pub table: String,
    /// Local-key range of the window.
    pub range: KeyRange,
    /// Residual filter, when any survived compilation.
    pub filter: Option<RowFilter>,
}

/// Coverage constraint for a range scan.
///
/// Sub-queries are served by the owning primary or not at all; fallbacks
/// would return partial windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageSpec {
    /// Scan must run on a primary owner of the key's hash.
    Colocated,
}

/// Messages a range scan streams back to the owning worker.
#[derive(Debug, Clone)]
pub enum ScanMessage {
    /// One chunk of `(encoded_key, encoded_value)` pairs.
    Results {
        /// Originating sub-query.
        sub_qid: SubQueryId,
        /// Encoded records in storage order.
        chunk: Vec<(Vec<u8>, Vec<u8>)>,
    },
    /// The scan finished streaming.
    Done {
        /// Originating sub-query.
        sub_qid: SubQueryId,
    },
    /// The scan failed.
    Error {
        /// Originating sub-query.
        sub_qid: SubQueryId,
        /// Structured failure reason.
        error: QueryError,
    },
}

/// Async client contract to the storage engine.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Start a range scan on `node`, streaming replies to `reply_to`.
    ///
    /// The call returns once the scan is started; results arrive as
    /// [`ScanMessage`]s. The backend enforces `timeout_ms` and reports
    /// expiry as a scan error.
    async fn start_range_scan(
        &self,
        node: &NodeId,
        scan: RangeScan,
        sub_qid: SubQueryId,
        timeout_ms: u64,
        coverage: CoverageSpec,
        reply_to: mpsc::Sender<ScanMessage>,
    ) -> Result<()>;

    /// Write one record under its partition/local key.
    async fn put(&self, node: &NodeId, table: &str, key: Vec<u8>, value: Vec<u8>) -> Result<()>;
}

/// Compare a row's local-key cells against key cells, elementwise.
pub fn cmp_local_key(row_key: &[CellValue], bound: &[KeyCell]) -> Result<Ordering> {
    if row_key.len() != bound.len() {
        return Err(TfqError::Execution(format!(
            "local key length mismatch: row has {} cells, bound has {}",
            row_key.len(),
            bound.len()
        )));
    }
    for (cell, key_cell) in row_key.iter().zip(bound) {
        match cell_cmp(cell, &key_cell.value)? {
            Ordering::Equal => continue,
            other => return Ok(other),
        }
    }
    Ok(Ordering::Equal)
}

/// Whether a row's local-key cells fall inside a range.
pub fn key_in_range(row_key: &[CellValue], range: &KeyRange) -> Result<bool> {
    let lo = cmp_local_key(row_key, &range.start)?;
    if lo == Ordering::Less || (lo == Ordering::Equal && !range.start_inclusive) {
        return Ok(false);
    }
    let hi = cmp_local_key(row_key, &range.end)?;
    if hi == Ordering::Greater || (hi == Ordering::Equal && !range.end_inclusive) {
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::{key_in_range, CompareOp, KeyCell, KeyRange, RowFilter};
    use crate::codec::CellValue;
    use crate::ddl::FieldType;

    fn cell(field: &str, value: CellValue) -> KeyCell {
        let field_type = match value {
            CellValue::Timestamp(_) => FieldType::Timestamp,
            _ => FieldType::Varchar,
        };
        KeyCell {
            field: field.to_string(),
            field_type,
            value,
        }
    }

    fn range(lo: i64, hi: i64, start_inclusive: bool, end_inclusive: bool) -> KeyRange {
        KeyRange {
            start: vec![
                cell("user", CellValue::Varchar("u1".to_string())),
                cell("time", CellValue::Timestamp(lo)),
            ],
            end: vec![
                cell("user", CellValue::Varchar("u1".to_string())),
                cell("time", CellValue::Timestamp(hi)),
            ],
            start_inclusive,
            end_inclusive,
        }
    }

    #[test]
    fn range_respects_inclusivity_flags() {
        let key = |ts| {
            vec![
                CellValue::Varchar("u1".to_string()),
                CellValue::Timestamp(ts),
            ]
        };
        let r = range(3_000, 5_000, true, false);
        assert!(key_in_range(&key(3_000), &r).expect("in"));
        assert!(key_in_range(&key(4_999), &r).expect("in"));
        assert!(!key_in_range(&key(5_000), &r).expect("out"));

        let r = range(3_000, 5_000, false, true);
        assert!(!key_in_range(&key(3_000), &r).expect("out"));
        assert!(key_in_range(&key(5_000), &r).expect("in"));
    }

    #[test]
    fn filter_null_and_missing_fields_never_match() {
        let filter = RowFilter::Cmp {
            op: CompareOp::NotEq,
            field: "weather".to_string(),
            value: CellValue::Varchar("hail".to_string()),
        };
        let absent = vec![("time".to_string(), CellValue::Timestamp(1))];
        let null = vec![("weather".to_string(), CellValue::Null)];
        assert!(!filter.matches(&absent).expect("absent"));
        assert!(!filter.matches(&null).expect("null"));
    }

    #[test]
    fn or_filter_matches_either_arm() {
        let filter = RowFilter::Or(
            Box::new(RowFilter::Cmp {
                op: CompareOp::Eq,
                field: "weather".to_string(),
                value: CellValue::Varchar("hail".to_string()),
            }),
            Box::new(RowFilter::Cmp {
                op: CompareOp::Gt,
                field: "temperature".to_string(),
                value: CellValue::Double(30.0),
            }),
        );
        let row = vec![
            ("weather".to_string(), CellValue::Varchar("sun".to_string())),
            ("temperature".to_string(), CellValue::Double(31.5)),
        ];
        assert!(filter.matches(&row).expect("or"));
    }
}
