#![deny(missing_docs)]

//! Shared configuration, error types, IDs, and observability primitives for TFQ crates.
//!
//! Architecture role:
//! - defines engine/runtime configuration passed across layers
//! - provides common [`TfqError`] / [`Result`] contracts and the structured
//!   [`QueryError`] taxonomy surfaced to clients
//! - hosts metrics utilities
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

/// Shared engine/runtime configuration types.
pub mod config;
/// Shared error taxonomy.
pub mod error;
/// Strongly-typed identifier wrappers.
pub mod ids;
/// Metrics registry and Prometheus rendering helpers.
pub mod metrics;

pub use config::EngineConfig;
pub use error::{ErrorCode, QueryError, Result, TfqError};
pub use ids::*;
pub use metrics::{global_metrics, MetricsRegistry};
