//! Typed metric helpers for the ingestion path (fetch + aggregation).

use metrics::{counter, histogram};

/// Metrics for upstream fetches and aggregation runs.
pub struct IngestMetrics;

impl IngestMetrics {
    /// Record an upstream fetch outcome.
    pub fn record_fetch(location: &str, success: bool, retries: u32, duration_ms: u64) {
        let outcome = if success { "success" } else { "failure" };
        counter!(
            "upstream_fetch_total",
            "location" => location.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        counter!(
            "upstream_fetch_retries_total",
            "location" => location.to_string()
        )
        .increment(retries as u64);
        histogram!(
            "upstream_fetch_duration_seconds",
            "location" => location.to_string()
        )
        .record(duration_ms as f64 / 1000.0);
    }

    /// Record a fetch rejected by the circuit breaker.
    pub fn record_breaker_rejection(location: &str) {
        counter!(
            "circuit_breaker_rejections_total",
            "location" => location.to_string()
        )
        .increment(1);
    }

    /// Record an aggregation run.
    pub fn record_aggregation(location: &str, success: bool, duration_ms: u64) {
        let status = if success { "success" } else { "failure" };
        counter!(
            "aggregation_runs_total",
            "location" => location.to_string(),
            "status" => status
        )
        .increment(1);
        histogram!(
            "aggregation_duration_seconds",
            "location" => location.to_string()
        )
        .record(duration_ms as f64 / 1000.0);
    }

    /// Record an alert being created.
    pub fn record_alert(condition: &str, severity: &str) {
        counter!(
            "alerts_triggered_total",
            "condition" => condition.to_string(),
            "severity" => severity.to_string()
        )
        .increment(1);
    }

    /// Record an alert evaluation suppressed by throttling.
    pub fn record_alert_throttled(condition: &str) {
        counter!(
            "alerts_throttled_total",
            "condition" => condition.to_string()
        )
        .increment(1);
    }

    /// Record an alert email dispatch attempt.
    pub fn record_alert_email(success: bool) {
        let outcome = if success { "sent" } else { "failed" };
        counter!(
            "alert_emails_total",
            "outcome" => outcome
        )
        .increment(1);
    }
}
