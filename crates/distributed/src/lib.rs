//! Distributed query runtime building blocks.
//!
//! Architecture role:
//! - coverage planning from sub-query start keys to primary owner nodes
//! - the process-wide query queue workers pull from
//! - the per-query worker actor that fans out sub-queries and reassembles
//!   chunked results in coverage-plan order
//! - in-process storage/membership adapters for embedded use and tests
//!
//! Key modules:
//! - [`coverage`]
//! - [`queue`]
//! - [`worker`]
//! - [`in_process`]

pub mod coverage;
pub mod in_process;
pub mod queue;
pub mod worker;

pub use coverage::{
    partition_hash_key, plan_coverage, primary_for_cells, CoveragePlan, Membership, StaticRing,
};
pub use in_process::InProcessStorage;
pub use queue::{QidGenerator, QueryQueue, QueryResult, QueuedQuery};
pub use worker::{ChunkPolicy, CoverageDispatcher, QueryWorker, SubQueryDispatcher, WorkerConfig};
