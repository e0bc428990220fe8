//! Metrics module for queue observability.
//!
//! Prometheus-compatible metrics for monitoring dispatcher performance and
//! health.
//!
//! ## Available Metrics
//!
//! - `aq_jobs_processed_total` - Counter of jobs processed by status
//! - `aq_job_processing_duration_seconds` - Histogram of job processing time
//! - `aq_queue_depth` - Gauge of current queue depth
//! - `aq_errors_total` - Counter of errors by type
//! - `aq_retries_total` - Counter of retry attempts
//! - `aq_jobs_deduped_total` - Counter of suppressed duplicate enqueues
//! - `aq_delayed_jobs` - Gauge of jobs parked in the delayed set
//! - `aq_in_flight_jobs` - Gauge of jobs currently processing

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency
pub mod names {
    pub const JOBS_PROCESSED: &str = "aq_jobs_processed_total";
    pub const JOB_DURATION: &str = "aq_job_processing_duration_seconds";
    pub const QUEUE_DEPTH: &str = "aq_queue_depth";
    pub const ERRORS: &str = "aq_errors_total";
    pub const RETRIES: &str = "aq_retries_total";
    pub const BATCH_SIZE: &str = "aq_batch_size";
    pub const DLQ_SIZE: &str = "aq_dlq_size";
    pub const DEDUPED: &str = "aq_jobs_deduped_total";
    pub const DELAYED_JOBS: &str = "aq_delayed_jobs";
    /// Current number of jobs being processed concurrently
    pub const IN_FLIGHT_JOBS: &str = "aq_in_flight_jobs";
}

/// Job processing status for metrics labeling
#[derive(Debug, Clone, Copy)]
pub enum JobStatus {
    Success,
    Failed,
    Dlq,
    Skipped,
    Stalled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Dlq => "dlq",
            Self::Skipped => "skipped",
            Self::Stalled => "stalled",
        }
    }
}

/// Error category for metrics labeling
#[derive(Debug, Clone, Copy)]
pub enum ErrorType {
    Transient,
    Permanent,
    RateLimited,
    Timeout,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
        }
    }
}

/// Initialize the Prometheus metrics exporter.
///
/// Call once at application startup; subsequent calls return the same handle.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("Failed to install Prometheus recorder")
        })
        .clone()
}

/// Get the global Prometheus handle.
///
/// Returns None if metrics haven't been initialized.
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

/// Record a job as processed with the given status.
pub fn record_job_processed(queue: &str, kind: &str, status: JobStatus) {
    counter!(
        names::JOBS_PROCESSED,
        "queue" => queue.to_string(),
        "kind" => kind.to_string(),
        "status" => status.as_str().to_string()
    )
    .increment(1);
}

/// Record job processing duration.
pub fn record_job_duration(queue: &str, kind: &str, duration: Duration) {
    histogram!(
        names::JOB_DURATION,
        "queue" => queue.to_string(),
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Update the queue depth gauge.
pub fn set_queue_depth(queue: &str, depth: f64) {
    gauge!(
        names::QUEUE_DEPTH,
        "queue" => queue.to_string()
    )
    .set(depth);
}

/// Record an error by type.
pub fn record_error(queue: &str, error_type: ErrorType) {
    counter!(
        names::ERRORS,
        "queue" => queue.to_string(),
        "error_type" => error_type.as_str().to_string()
    )
    .increment(1);
}

/// Record a retry attempt.
pub fn record_retry(queue: &str, attempt: u32) {
    counter!(
        names::RETRIES,
        "queue" => queue.to_string(),
        "attempt" => attempt.to_string()
    )
    .increment(1);
}

/// Record a suppressed duplicate enqueue.
pub fn record_deduped(queue: &str) {
    counter!(
        names::DEDUPED,
        "queue" => queue.to_string()
    )
    .increment(1);
}

/// Record the batch size processed.
pub fn record_batch_size(queue: &str, size: usize) {
    histogram!(
        names::BATCH_SIZE,
        "queue" => queue.to_string()
    )
    .record(size as f64);
}

/// Update the DLQ size gauge.
pub fn set_dlq_size(queue: &str, size: f64) {
    gauge!(
        names::DLQ_SIZE,
        "queue" => queue.to_string()
    )
    .set(size);
}

/// Update the delayed-set size gauge.
pub fn set_delayed_jobs(queue: &str, size: f64) {
    gauge!(
        names::DELAYED_JOBS,
        "queue" => queue.to_string()
    )
    .set(size);
}

/// Update the in-flight jobs gauge (concurrent processing).
pub fn set_in_flight_jobs(queue: &str, count: f64) {
    gauge!(
        names::IN_FLIGHT_JOBS,
        "queue" => queue.to_string()
    )
    .set(count);
}

/// Helper struct for timing operations and recording metrics on drop.
pub struct MetricsTimer {
    queue: String,
    kind: String,
    start: std::time::Instant,
    recorded: bool,
}

impl MetricsTimer {
    /// Start a new timer for the given queue and job kind.
    pub fn new(queue: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            kind: kind.into(),
            start: std::time::Instant::now(),
            recorded: false,
        }
    }

    /// Stop the timer and record the duration.
    pub fn stop(mut self) {
        self.recorded = true;
        record_job_duration(&self.queue, &self.kind, self.start.elapsed());
    }

    /// Get elapsed time without stopping.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if !self.recorded {
            record_job_duration(&self.queue, &self.kind, self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_as_str() {
        assert_eq!(JobStatus::Success.as_str(), "success");
        assert_eq!(JobStatus::Failed.as_str(), "failed");
        assert_eq!(JobStatus::Dlq.as_str(), "dlq");
        assert_eq!(JobStatus::Skipped.as_str(), "skipped");
        assert_eq!(JobStatus::Stalled.as_str(), "stalled");
    }

    #[test]
    fn test_error_type_as_str() {
        assert_eq!(ErrorType::Transient.as_str(), "transient");
        assert_eq!(ErrorType::Permanent.as_str(), "permanent");
        assert_eq!(ErrorType::RateLimited.as_str(), "rate_limited");
        assert_eq!(ErrorType::Timeout.as_str(), "timeout");
    }

    #[test]
    fn test_metrics_timer() {
        let timer = MetricsTimer::new("test_queue", "test_kind");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed().as_millis() >= 10);
        timer.stop();
    }
}
