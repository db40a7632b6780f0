//! Storage-facing model for TFQ: table DDL, compile-state catalog, record
//! codec, and the range-scan client contract.
//!
//! Architecture role:
//! - table definition and key-shape validation contracts
//! - compile-state registry consulted before any query is served
//! - record value/key encoding shared by the insert and query paths
//! - async range-scan/put contracts implemented by storage backends
//!
//! Key modules:
//! - [`ddl`]
//! - [`catalog`]
//! - [`codec`]
//! - [`scan`]

pub mod catalog;
pub mod codec;
pub mod ddl;
pub mod scan;

pub use catalog::{Catalog, CompileState};
pub use codec::{CellValue, Row};
pub use ddl::{FieldDef, FieldType, KeyComponent, Quantum, QuantumUnit, TableDdl};
pub use scan::{
    CompareOp, CoverageSpec, KeyCell, KeyRange, RangeScan, RowFilter, ScanMessage, StorageClient,
};
