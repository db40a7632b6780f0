//! Record value and key encoding.
//!
//! A stored record value is an ordered list of `(field, cell)` pairs; an
//! empty payload is a tombstone. Engine-level hash keys pack `(field, cell)`
//! pairs in partition-key order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tfq_common::{Result, TfqError};

/// One typed cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellValue {
    /// UTF-8 string.
    Varchar(String),
    /// Signed 64-bit integer.
    Sint64(i64),
    /// IEEE-754 double.
    Double(f64),
    /// Millisecond timestamp.
    Timestamp(i64),
    /// Boolean.
    Boolean(bool),
    /// Explicit null.
    Null,
}

impl CellValue {
    /// Timestamp payload, when this cell is a timestamp.
    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

/// One decoded record row: ordered `(field, cell)` pairs.
pub type Row = Vec<(String, CellValue)>;

/// Encode a record value for storage.
pub fn encode_record_value(row: &Row) -> Result<Vec<u8>> {
    serde_json::to_vec(row).map_err(|e| TfqError::Execution(format!("record encode failed: {e}")))
}

/// Decode a stored record value; `None` marks a tombstone.
pub fn decode_record_value(bytes: &[u8]) -> Result<Option<Row>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(bytes)
        .map(Some)
        .map_err(|e| TfqError::Execution(format!("record decode failed: {e}")))
}

/// Pack `(field, cell)` pairs into an engine-level key payload.
pub fn pack_key_cells(cells: &[(&str, &CellValue)]) -> Result<Vec<u8>> {
    serde_json::to_vec(cells).map_err(|e| TfqError::Execution(format!("key pack failed: {e}")))
}

/// Order two cells of the same declared type.
///
/// Cross-type comparison is an execution error; the compiler types both
/// sides against the DDL before any comparison is evaluated.
pub fn cell_cmp(a: &CellValue, b: &CellValue) -> Result<Ordering> {
    match (a, b) {
        (CellValue::Sint64(x), CellValue::Sint64(y)) => Ok(x.cmp(y)),
        (CellValue::Timestamp(x), CellValue::Timestamp(y)) => Ok(x.cmp(y)),
        (CellValue::Double(x), CellValue::Double(y)) => Ok(x.total_cmp(y)),
        (CellValue::Varchar(x), CellValue::Varchar(y)) => Ok(x.cmp(y)),
        (CellValue::Boolean(x), CellValue::Boolean(y)) => Ok(x.cmp(y)),
        _ => Err(TfqError::Execution(
            "cannot compare cells of different types".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::{cell_cmp, decode_record_value, encode_record_value, CellValue};
    use std::cmp::Ordering;

    #[test]
    fn empty_payload_is_tombstone() {
        assert!(decode_record_value(&[]).expect("decode").is_none());
    }

    #[test]
    fn record_round_trips_in_field_order() {
        let row = vec![
            ("weather".to_string(), CellValue::Varchar("hail".to_string())),
            ("time".to_string(), CellValue::Timestamp(4_000)),
        ];
        let bytes = encode_record_value(&row).expect("encode");
        let back = decode_record_value(&bytes).expect("decode").expect("row");
        assert_eq!(back, row);
    }

    #[test]
    fn cross_type_comparison_is_an_error() {
        let err = cell_cmp(&CellValue::Sint64(1), &CellValue::Timestamp(1)).expect_err("mismatch");
        assert!(format!("{err}").contains("different types"));
    }

    #[test]
    fn doubles_order_totally() {
        assert_eq!(
            cell_cmp(&CellValue::Double(1.5), &CellValue::Double(2.0)).expect("cmp"),
            Ordering::Less
        );
    }
}
