//! Prometheus metrics for ingestion-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Histogram for database query duration by operation.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ingestion_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for import jobs by terminal status.
pub static IMPORT_JOBS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingestion_import_jobs_total",
        "Total number of import jobs by terminal status",
        &["status"]
    )
    .expect("Failed to register IMPORT_JOBS")
});

/// Counter for classifier batches by outcome.
pub static CLASSIFIER_BATCHES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingestion_classifier_batches_total",
        "Total number of classifier batches by outcome",
        &["outcome"]
    )
    .expect("Failed to register CLASSIFIER_BATCHES")
});

/// Counter for confirmation outcomes.
pub static CONFIRMATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ingestion_confirmations_total",
        "Total number of confirmation entries by outcome",
        &["outcome"]
    )
    .expect("Failed to register CONFIRMATIONS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&IMPORT_JOBS);
    Lazy::force(&CLASSIFIER_BATCHES);
    Lazy::force(&CONFIRMATIONS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => String::from_utf8(buffer).unwrap_or_default(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            String::new()
        }
    }
}
