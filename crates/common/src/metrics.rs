//! Query-layer metrics registry with Prometheus text rendering.

use std::sync::{Arc, OnceLock};

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

/// Shared metrics registry for the query layer.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    queries_submitted: CounterVec,
    queries_succeeded: CounterVec,
    queries_failed: CounterVec,
    compile_failures: CounterVec,
    subqueries_dispatched: CounterVec,
    chunks_received: CounterVec,
    query_seconds: HistogramVec,
}

impl MetricsRegistry {
    /// Build an empty registry with all collectors registered.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// Record a query entering the queue.
    pub fn inc_queries_submitted(&self, table: &str) {
        self.inner
            .queries_submitted
            .with_label_values(&[table])
            .inc();
    }

    /// Record a query completing with rows.
    pub fn inc_queries_succeeded(&self, table: &str) {
        self.inner
            .queries_succeeded
            .with_label_values(&[table])
            .inc();
    }

    /// Record a query surfacing an error to its client.
    pub fn inc_queries_failed(&self, table: &str) {
        self.inner.queries_failed.with_label_values(&[table]).inc();
    }

    /// Record a compile rejection by structured reason.
    pub fn inc_compile_failures(&self, reason: &str) {
        self.inner
            .compile_failures
            .with_label_values(&[reason])
            .inc();
    }

    /// Record sub-queries fanned out for one query.
    pub fn add_subqueries_dispatched(&self, table: &str, count: u64) {
        self.inner
            .subqueries_dispatched
            .with_label_values(&[table])
            .inc_by(count as f64);
    }

    /// Record one result chunk arriving at a worker.
    pub fn inc_chunks_received(&self, table: &str) {
        self.inner.chunks_received.with_label_values(&[table]).inc();
    }

    /// Record end-to-end query latency in seconds.
    pub fn observe_query_seconds(&self, table: &str, secs: f64) {
        self.inner
            .query_seconds
            .with_label_values(&[table])
            .observe(secs.max(0.0));
    }

    /// Render all collectors in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.inner.registry.gather();
        let mut buf = Vec::new();
        if encoder.encode(&families, &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let queries_submitted = CounterVec::new(
            Opts::new("tfq_queries_submitted_total", "Queries entering the queue"),
            &["table"],
        )
        .expect("queries_submitted opts");
        let queries_succeeded = CounterVec::new(
            Opts::new("tfq_queries_succeeded_total", "Queries answered with rows"),
            &["table"],
        )
        .expect("queries_succeeded opts");
        let queries_failed = CounterVec::new(
            Opts::new("tfq_queries_failed_total", "Queries answered with errors"),
            &["table"],
        )
        .expect("queries_failed opts");
        let compile_failures = CounterVec::new(
            Opts::new("tfq_compile_failures_total", "Compile rejections by reason"),
            &["reason"],
        )
        .expect("compile_failures opts");
        let subqueries_dispatched = CounterVec::new(
            Opts::new(
                "tfq_subqueries_dispatched_total",
                "Sub-queries fanned out to storage",
            ),
            &["table"],
        )
        .expect("subqueries_dispatched opts");
        let chunks_received = CounterVec::new(
            Opts::new(
                "tfq_chunks_received_total",
                "Result chunks received by workers",
            ),
            &["table"],
        )
        .expect("chunks_received opts");
        let query_seconds = HistogramVec::new(
            HistogramOpts::new("tfq_query_seconds", "End-to-end query latency"),
            &["table"],
        )
        .expect("query_seconds opts");

        for c in [
            &queries_submitted,
            &queries_succeeded,
            &queries_failed,
            &compile_failures,
            &subqueries_dispatched,
            &chunks_received,
        ] {
            registry
                .register(Box::new(c.clone()))
                .expect("register counter");
        }
        registry
            .register(Box::new(query_seconds.clone()))
            .expect("register histogram");

        Self {
            registry,
            queries_submitted,
            queries_succeeded,
            queries_failed,
            compile_failures,
            subqueries_dispatched,
            chunks_received,
            query_seconds,
        }
    }
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

/// Process-wide metrics registry.
pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::MetricsRegistry;

    #[test]
    fn renders_counters_after_increment() {
        let metrics = MetricsRegistry::new();
        metrics.inc_queries_submitted("GeoCheckin");
        metrics.add_subqueries_dispatched("GeoCheckin", 3);
        let text = metrics.render();
        assert!(text.contains("tfq_queries_submitted_total"));
        assert!(text.contains("tfq_subqueries_dispatched_total"));
    }
}
