//! Observability utilities for the air-quality monitoring pipeline.
//!
//! This crate provides:
//! - Prometheus metrics recording and export
//! - Custom metrics for ingestion, tiered storage, and alerting
//!
//! # Example
//!
//! ```rust,ignore
//! use observability::{init_metrics, metrics_handler, IngestMetrics};
//!
//! // Initialize metrics recorder
//! init_metrics();
//!
//! // Record ingestion operations
//! IngestMetrics::record_fetch("paris", true, 2, 412);
//! ```

pub mod ingest;
pub mod storage;

pub use ingest::IngestMetrics;
pub use storage::StorageMetrics;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize the Prometheus metrics recorder.
///
/// This should be called once at application startup.
/// Returns the PrometheusHandle for rendering metrics.
pub fn init_metrics() -> &'static PrometheusHandle {
    METRICS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");

        info!("Prometheus metrics recorder initialized");

        describe_metrics();

        handle
    })
}

/// Get the metrics handle (must call init_metrics first)
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Render the current metrics in Prometheus text format.
pub fn render_metrics() -> String {
    match get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

/// Register metric descriptions for documentation.
///
/// Safe to call when another crate installed the global recorder.
pub fn describe_metrics() {
    use metrics::describe_counter;
    use metrics::describe_gauge;
    use metrics::describe_histogram;

    // Upstream fetch metrics
    describe_counter!(
        "upstream_fetch_total",
        "Upstream provider fetches by location and outcome"
    );
    describe_histogram!(
        "upstream_fetch_duration_seconds",
        "Upstream fetch round-trip duration in seconds"
    );
    describe_counter!(
        "upstream_fetch_retries_total",
        "Retry attempts against the upstream provider"
    );
    describe_counter!(
        "circuit_breaker_rejections_total",
        "Calls rejected while the circuit breaker was open"
    );

    // Aggregation metrics
    describe_counter!(
        "aggregation_runs_total",
        "Daily aggregation runs by location and status"
    );
    describe_histogram!(
        "aggregation_duration_seconds",
        "Daily aggregation pipeline duration in seconds"
    );

    // Tiered storage metrics
    describe_counter!(
        "tier_migration_records_total",
        "Records moved between storage tiers"
    );
    describe_counter!(
        "tier_migration_errors_total",
        "Per-record errors during tier migration"
    );
    describe_histogram!(
        "tier_migration_duration_seconds",
        "Tier migration batch duration in seconds"
    );
    describe_gauge!(
        "tier_record_count",
        "Record count per storage tier as of the last probe"
    );
    describe_histogram!(
        "range_query_duration_seconds",
        "Smart range query duration in seconds"
    );

    // Alerting metrics
    describe_counter!(
        "alerts_triggered_total",
        "Alerts created by condition and severity"
    );
    describe_counter!(
        "alerts_throttled_total",
        "Alert evaluations suppressed by the throttle window"
    );
    describe_counter!(
        "alert_emails_total",
        "Alert email dispatch attempts by outcome"
    );
}
