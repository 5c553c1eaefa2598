//! Prometheus metrics for the retrieval engine
//!
//! Search, corpus cache, embedding and storage counters, registered in a
//! crate-local registry so embedding applications can expose them.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Search metrics
    // ============================================================================

    /// Total number of queries, labelled by mode
    pub static ref SEARCH_REQUESTS: CounterVec = CounterVec::new(
        Opts::new("docrag_search_requests_total", "Total number of queries"),
        &["mode"]
    ).expect("Failed to create SEARCH_REQUESTS counter");

    /// Query latency in seconds
    pub static ref SEARCH_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "docrag_search_latency_seconds",
            "Query latency in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0])
    ).expect("Failed to create SEARCH_LATENCY histogram");

    /// Number of results returned per query
    pub static ref SEARCH_RESULTS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "docrag_search_results_count",
            "Number of results returned per query"
        ).buckets(vec![0.0, 1.0, 5.0, 10.0, 20.0, 50.0])
    ).expect("Failed to create SEARCH_RESULTS histogram");

    /// Failed queries, labelled by error kind
    pub static ref SEARCH_FAILURES: CounterVec = CounterVec::new(
        Opts::new("docrag_search_failures_total", "Failed queries by error kind"),
        &["kind"]
    ).expect("Failed to create SEARCH_FAILURES counter");

    // ============================================================================
    // Corpus cache metrics
    // ============================================================================

    /// Number of corpus snapshot rebuilds
    pub static ref CORPUS_REBUILDS: Counter = Counter::with_opts(
        Opts::new(
            "docrag_corpus_rebuilds_total",
            "Number of corpus snapshot rebuilds"
        )
    ).expect("Failed to create CORPUS_REBUILDS counter");

    /// Corpus rebuild duration in seconds
    pub static ref CORPUS_REBUILD_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "docrag_corpus_rebuild_seconds",
            "Corpus rebuild duration in seconds"
        ).buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0])
    ).expect("Failed to create CORPUS_REBUILD_LATENCY histogram");

    /// Tokens held by the current corpus snapshot
    pub static ref CORPUS_TOKENS: Gauge = Gauge::with_opts(
        Opts::new(
            "docrag_corpus_tokens",
            "Tokens held by the current corpus snapshot"
        )
    ).expect("Failed to create CORPUS_TOKENS gauge");

    // ============================================================================
    // Storage metrics
    // ============================================================================

    /// Chunks written to the store
    pub static ref CHUNKS_STORED: Counter = Counter::with_opts(
        Opts::new(
            "docrag_chunks_stored_total",
            "Chunks written to the store"
        )
    ).expect("Failed to create CHUNKS_STORED counter");

    // ============================================================================
    // Embedding metrics
    // ============================================================================

    /// Total query embedding requests sent to the provider
    pub static ref EMBEDDING_REQUESTS: Counter = Counter::with_opts(
        Opts::new(
            "docrag_embedding_requests_total",
            "Query embedding requests sent to the provider"
        )
    ).expect("Failed to create EMBEDDING_REQUESTS counter");

    /// Query embeddings served from the cache
    pub static ref EMBEDDING_CACHE_HITS: Counter = Counter::with_opts(
        Opts::new(
            "docrag_embedding_cache_hits_total",
            "Query embeddings served from the cache"
        )
    ).expect("Failed to create EMBEDDING_CACHE_HITS counter");

    /// Embedding generation latency in seconds
    pub static ref EMBEDDING_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "docrag_embedding_latency_seconds",
            "Embedding generation latency in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0])
    ).expect("Failed to create EMBEDDING_LATENCY histogram");
}

/// Register all metrics with the global registry.
///
/// Call once at application startup. Repeated registration is ignored.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(SEARCH_REQUESTS.clone()),
        Box::new(SEARCH_LATENCY.clone()),
        Box::new(SEARCH_RESULTS.clone()),
        Box::new(SEARCH_FAILURES.clone()),
        Box::new(CORPUS_REBUILDS.clone()),
        Box::new(CORPUS_REBUILD_LATENCY.clone()),
        Box::new(CORPUS_TOKENS.clone()),
        Box::new(CHUNKS_STORED.clone()),
        Box::new(EMBEDDING_REQUESTS.clone()),
        Box::new(EMBEDDING_CACHE_HITS.clone()),
        Box::new(EMBEDDING_LATENCY.clone()),
    ];

    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            tracing::debug!(error = %e, "Metric already registered");
        }
    }
}

/// Gather all metrics and encode them in Prometheus text format.
///
/// Returns an empty string if encoding fails.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}
