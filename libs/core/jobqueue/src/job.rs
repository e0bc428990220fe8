//! Queue definitions, priorities, and the per-job execution context.

use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Job priority, claimed in descending order.
///
/// Each priority maps to its own stream band under the queue prefix, so a
/// critical job never waits behind a backlog of low-priority work. Ties
/// within a band keep enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
    Critical,
}

impl Priority {
    /// Numeric level used in stream key suffixes (`p{level}`).
    pub fn level(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Normal => 5,
            Self::High => 10,
            Self::Urgent => 15,
            Self::Critical => 20,
        }
    }

    /// All priorities in descending claim order.
    pub fn descending() -> [Priority; 5] {
        [
            Self::Critical,
            Self::Urgent,
            Self::High,
            Self::Normal,
            Self::Low,
        ]
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self::Low),
            5 => Some(Self::Normal),
            10 => Some(Self::High),
            15 => Some(Self::Urgent),
            20 => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Queue configuration (type-safe constants)
///
/// Implement this trait to define a queue's Redis keys and settings.
///
/// # Example
///
/// ```ignore
/// struct AirQualityQueue;
///
/// impl QueueDef for AirQualityQueue {
///     const QUEUE_NAME: &'static str = "airQuality";
///     const STREAM_PREFIX: &'static str = "aq:jobs";
///     const CONSUMER_GROUP: &'static str = "aq_workers";
/// }
/// ```
pub trait QueueDef {
    /// Logical queue name (used in stats, health, and metrics labels)
    const QUEUE_NAME: &'static str;

    /// Prefix for the priority stream bands (e.g., "aq:jobs" -> "aq:jobs:p20")
    const STREAM_PREFIX: &'static str;

    /// The consumer group name (e.g., "aq_workers")
    const CONSUMER_GROUP: &'static str;

    /// Maximum stream length per band before trimming (default: 100,000)
    const MAX_LENGTH: i64 = 100_000;

    /// Default poll interval in milliseconds (default: 1000)
    const POLL_INTERVAL_MS: u64 = 1000;

    /// Default batch size for reading messages (default: 10)
    const BATCH_SIZE: usize = 10;

    /// Lease duration in milliseconds before a claimed job counts as stalled
    const STALLED_INTERVAL_MS: u64 = 30_000;

    /// How many stalled re-deliveries are tolerated before the job fails
    const MAX_STALLED_COUNT: u32 = 1;

    /// Dead letter queue stream name
    fn dlq_stream() -> String {
        format!("{}:dlq", Self::STREAM_PREFIX)
    }

    /// Sorted set holding delayed jobs (scored by run-at epoch millis)
    fn delayed_set() -> String {
        format!("{}:delayed", Self::STREAM_PREFIX)
    }
}

/// Per-job execution context handed to processors.
///
/// Carries the correlation id for log continuity and a progress reporter
/// backed by a Redis hash, so progress is observable outside the worker.
pub struct JobContext {
    pub job_id: String,
    pub correlation_id: String,
    redis: ConnectionManager,
    progress_key: String,
}

impl JobContext {
    pub fn new(
        redis: ConnectionManager,
        queue: &str,
        job_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            correlation_id: correlation_id.into(),
            redis,
            progress_key: format!("{}:progress", queue),
        }
    }

    /// Report progress (0-100) on the running job.
    ///
    /// Best-effort: a failed write is logged, never surfaced to the handler.
    pub async fn progress(&self, pct: u8) {
        let mut conn = self.redis.clone();
        let pct = pct.min(100);

        let result: Result<(), redis::RedisError> = redis::cmd("HSET")
            .arg(&self.progress_key)
            .arg(&self.job_id)
            .arg(pct)
            .query_async(&mut conn)
            .await;

        if let Err(e) = result {
            debug!(job_id = %self.job_id, error = %e, "Failed to record job progress");
        } else {
            // Progress entries expire with the hash; refresh a 1h TTL
            let _: Result<(), redis::RedisError> = redis::cmd("EXPIRE")
                .arg(&self.progress_key)
                .arg(3600)
                .query_async(&mut conn)
                .await;
        }
    }

    /// Remove the progress entry once the job reaches a terminal state.
    pub async fn clear_progress(&self) {
        let mut conn = self.redis.clone();
        let _: Result<(), redis::RedisError> = redis::cmd("HDEL")
            .arg(&self.progress_key)
            .arg(&self.job_id)
            .query_async(&mut conn)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_levels() {
        assert_eq!(Priority::Low.level(), 1);
        assert_eq!(Priority::Normal.level(), 5);
        assert_eq!(Priority::High.level(), 10);
        assert_eq!(Priority::Urgent.level(), 15);
        assert_eq!(Priority::Critical.level(), 20);
    }

    #[test]
    fn test_priority_descending_order() {
        let order = Priority::descending();
        assert_eq!(order[0], Priority::Critical);
        assert_eq!(order[4], Priority::Low);
        for pair in order.windows(2) {
            assert!(pair[0].level() > pair[1].level());
        }
    }

    #[test]
    fn test_priority_roundtrip() {
        for p in Priority::descending() {
            assert_eq!(Priority::from_level(p.level()), Some(p));
        }
        assert_eq!(Priority::from_level(7), None);
    }

    struct TestQueue;

    impl QueueDef for TestQueue {
        const QUEUE_NAME: &'static str = "test";
        const STREAM_PREFIX: &'static str = "test:jobs";
        const CONSUMER_GROUP: &'static str = "test_workers";
    }

    #[test]
    fn test_queue_def_derived_keys() {
        assert_eq!(TestQueue::dlq_stream(), "test:jobs:dlq");
        assert_eq!(TestQueue::delayed_set(), "test:jobs:delayed");
        assert_eq!(TestQueue::MAX_LENGTH, 100_000);
        assert_eq!(TestQueue::MAX_STALLED_COUNT, 1);
    }
}
