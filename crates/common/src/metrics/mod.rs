//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for every orchestration stage with
//! standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all DisasterShift metrics
pub const METRICS_PREFIX: &str = "disastershift";

/// Histogram buckets for request and stage latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, // 1ms
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
];

/// Buckets for embedding latency (remote model calls)
pub const EMBEDDING_BUCKETS: &[f64] = &[
    0.010, // 10ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.000, // 2s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_chat_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Chat requests by resolved audience"
    );

    // Analytics metrics
    describe_counter!(
        format!("{}_analytics_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Structured analytics operations executed"
    );

    describe_histogram!(
        format!("{}_analytics_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Structured analytics latency in seconds"
    );

    // Retrieval metrics
    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Knowledge retrieval latency in seconds"
    );

    describe_gauge!(
        format!("{}_retrieval_hits", METRICS_PREFIX),
        Unit::Count,
        "Chunks returned by the last retrieval"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding errors"
    );

    // Generation metrics
    describe_counter!(
        format!("{}_generation_tokens_total", METRICS_PREFIX),
        Unit::Count,
        "Tokens streamed to callers"
    );

    describe_counter!(
        format!("{}_generation_outcomes_total", METRICS_PREFIX),
        Unit::Count,
        "Answer streams by outcome (done, error, cancelled)"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Count a chat request under its resolved audience
pub fn record_chat_request(audience: &str) {
    counter!(
        format!("{}_chat_requests_total", METRICS_PREFIX),
        "audience" => audience.to_string()
    )
    .increment(1);
}

/// Helper to record analytics metrics
pub fn record_analytics(duration_secs: f64, op: &str, rows: usize) {
    counter!(
        format!("{}_analytics_queries_total", METRICS_PREFIX),
        "op" => op.to_string(),
        "empty" => (rows == 0).to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_analytics_duration_seconds", METRICS_PREFIX),
        "op" => op.to_string()
    )
    .record(duration_secs);
}

/// Helper to record retrieval metrics
pub fn record_retrieval(duration_secs: f64, branch: &str, hits: usize) {
    histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        "branch" => branch.to_string()
    )
    .record(duration_secs);

    gauge!(
        format!("{}_retrieval_hits", METRICS_PREFIX),
        "branch" => branch.to_string()
    )
    .set(hits as f64);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(batch_size as u64);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Record the end of an answer stream
pub fn record_generation(provider: &str, outcome: &str, tokens: u64) {
    counter!(
        format!("{}_generation_tokens_total", METRICS_PREFIX),
        "provider" => provider.to_string()
    )
    .increment(tokens);

    counter!(
        format!("{}_generation_outcomes_total", METRICS_PREFIX),
        "provider" => provider.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
