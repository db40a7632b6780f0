use serde::{Deserialize, Serialize};

/// Global engine configuration shared across planner/worker layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on the number of quantum-aligned sub-queries one query
    /// may expand into; exceeding it fails compilation.
    #[serde(default = "default_max_quanta_span")]
    pub max_quanta_span: usize,
    /// Per sub-query storage deadline in milliseconds.
    #[serde(default = "default_sub_query_timeout_ms")]
    pub sub_query_timeout_ms: u64,
    /// Polling ceiling in seconds while waiting for table activation.
    #[serde(default = "default_activation_wait_secs")]
    pub activation_wait_secs: u64,
    /// Storage fetch retry budget.
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    /// Capacity of the shared query queue.
    #[serde(default = "default_query_queue_depth")]
    pub query_queue_depth: usize,
    /// Number of query workers pulling from the shared queue.
    #[serde(default = "default_query_workers")]
    pub query_workers: usize,
}

fn default_max_quanta_span() -> usize {
    5_000
}

fn default_sub_query_timeout_ms() -> u64 {
    10_000
}

fn default_activation_wait_secs() -> u64 {
    30
}

fn default_fetch_retries() -> u32 {
    10
}

fn default_query_queue_depth() -> usize {
    64
}

fn default_query_workers() -> usize {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_quanta_span: default_max_quanta_span(),
            sub_query_timeout_ms: default_sub_query_timeout_ms(),
            activation_wait_secs: default_activation_wait_secs(),
            fetch_retries: default_fetch_retries(),
            query_queue_depth: default_query_queue_depth(),
            query_workers: default_query_workers(),
        }
    }
}
