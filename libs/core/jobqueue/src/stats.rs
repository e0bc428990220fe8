//! Per-job-kind execution stats.
//!
//! A single guarded registry per queue records outcomes as jobs finish; the
//! health monitor and admin endpoints read snapshots.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Stats for one job kind.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct JobTypeStats {
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    /// Incremental mean of execution time in milliseconds.
    pub avg_execution_ms: f64,
    pub last_processed_at: Option<DateTime<Utc>>,
}

impl JobTypeStats {
    fn record(&mut self, success: bool, duration: Duration) {
        self.processed += 1;
        if success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        // Incremental mean: m += (x - m) / n
        let ms = duration.as_secs_f64() * 1000.0;
        self.avg_execution_ms += (ms - self.avg_execution_ms) / self.processed as f64;
        self.last_processed_at = Some(Utc::now());
    }
}

/// Aggregate snapshot across all kinds in a queue.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StatsSnapshot {
    pub per_kind: HashMap<String, JobTypeStats>,
    pub processed: u64,
    pub failed: u64,
    pub avg_execution_ms: f64,
    pub captured_at: Option<DateTime<Utc>>,
}

impl StatsSnapshot {
    /// Failure rate in [0,1]; zero when nothing has been processed.
    pub fn failure_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.failed as f64 / self.processed as f64
        }
    }
}

/// Guarded per-kind stats registry for one queue.
#[derive(Default)]
pub struct StatsRegistry {
    inner: Mutex<HashMap<String, JobTypeStats>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished job.
    pub fn record(&self, kind: &str, success: bool, duration: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.entry(kind.to_string()).or_default().record(success, duration);
    }

    /// Stats for one kind, if any jobs of that kind have run.
    pub fn for_kind(&self, kind: &str) -> Option<JobTypeStats> {
        self.inner.lock().unwrap().get(kind).cloned()
    }

    /// Snapshot everything, with queue-level aggregates.
    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock().unwrap();

        let mut processed = 0u64;
        let mut failed = 0u64;
        let mut weighted_ms = 0.0;

        for stats in inner.values() {
            processed += stats.processed;
            failed += stats.failed;
            weighted_ms += stats.avg_execution_ms * stats.processed as f64;
        }

        let avg_execution_ms = if processed == 0 {
            0.0
        } else {
            weighted_ms / processed as f64
        };

        StatsSnapshot {
            per_kind: inner.clone(),
            processed,
            failed,
            avg_execution_ms,
            captured_at: Some(Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_success_and_failure() {
        let registry = StatsRegistry::new();

        registry.record("fetch", true, Duration::from_millis(100));
        registry.record("fetch", false, Duration::from_millis(300));

        let stats = registry.for_kind("fetch").unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
        assert!(stats.last_processed_at.is_some());
    }

    #[test]
    fn test_incremental_mean() {
        let registry = StatsRegistry::new();

        registry.record("fetch", true, Duration::from_millis(100));
        registry.record("fetch", true, Duration::from_millis(200));
        registry.record("fetch", true, Duration::from_millis(300));

        let stats = registry.for_kind("fetch").unwrap();
        assert!((stats.avg_execution_ms - 200.0).abs() < 1.0);
    }

    #[test]
    fn test_snapshot_aggregates_across_kinds() {
        let registry = StatsRegistry::new();

        registry.record("fetch", true, Duration::from_millis(100));
        registry.record("aggregate", false, Duration::from_millis(500));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.per_kind.len(), 2);
        assert!((snapshot.failure_rate() - 0.5).abs() < f64::EPSILON);
        assert!((snapshot.avg_execution_ms - 300.0).abs() < 1.0);
    }

    #[test]
    fn test_empty_snapshot() {
        let registry = StatsRegistry::new();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.processed, 0);
        assert_eq!(snapshot.failure_rate(), 0.0);
        assert_eq!(snapshot.avg_execution_ms, 0.0);
    }
}
