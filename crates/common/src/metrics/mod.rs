//! Metrics and observability utilities
//!
//! Provides Prometheus metric descriptions and recording helpers
//! with standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all DocRAG metrics
pub const METRICS_PREFIX: &str = "docrag";

/// Histogram buckets for pipeline stage latency (in seconds)
pub const STAGE_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    15.00,  // 15s - expansion timeout
    30.00,  // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Pipeline metrics
    describe_counter!(
        format!("{}_rag_operations_total", METRICS_PREFIX),
        Unit::Count,
        "Total pipeline stage executions"
    );

    describe_histogram!(
        format!("{}_rag_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Pipeline stage latency in seconds"
    );

    describe_gauge!(
        format!("{}_rag_candidates", METRICS_PREFIX),
        Unit::Count,
        "Candidates leaving a pipeline stage"
    );

    describe_histogram!(
        format!("{}_rag_context_tokens", METRICS_PREFIX),
        Unit::Count,
        "Estimated tokens in assembled contexts"
    );

    // Search metrics
    describe_counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total vector store searches"
    );

    describe_histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Hybrid retrieval latency in seconds"
    );

    describe_counter!(
        format!("{}_search_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Sparse searches served by the dense fallback"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total query embedding requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    describe_counter!(
        format!("{}_cache_evictions_total", METRICS_PREFIX),
        Unit::Count,
        "Entries evicted from a full cache"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record one pipeline stage execution
pub fn record_stage(stage: &str, duration_secs: f64, output_count: usize, success: bool) {
    counter!(
        format!("{}_rag_operations_total", METRICS_PREFIX),
        "operation" => stage.to_string(),
        "success" => success.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_rag_stage_duration_seconds", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .record(duration_secs);

    gauge!(
        format!("{}_rag_candidates", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .set(output_count as f64);
}

/// Helper to record the size of an assembled context
pub fn record_context_tokens(tokens: usize) {
    histogram!(format!("{}_rag_context_tokens", METRICS_PREFIX)).record(tokens as f64);
}

/// Helper to record search metrics
pub fn record_search(duration_secs: f64, queries: usize, fallbacks: usize) {
    counter!(format!("{}_search_queries_total", METRICS_PREFIX)).increment(queries as u64);

    histogram!(format!("{}_search_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    if fallbacks > 0 {
        counter!(format!("{}_search_fallbacks_total", METRICS_PREFIX)).increment(fallbacks as u64);
    }
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

/// Helper to record cache evictions
pub fn record_cache_eviction(evicted: usize, cache_name: &str) {
    counter!(
        format!("{}_cache_evictions_total", METRICS_PREFIX),
        "cache" => cache_name.to_string()
    )
    .increment(evicted as u64);
}
