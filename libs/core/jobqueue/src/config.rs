//! Worker configuration
//!
//! This module provides `WorkerConfig` and the per-queue default job options.

use crate::job::QueueDef;
use uuid::Uuid;

/// Backoff flavor applied when a failed job is rescheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    Exponential,
    Fixed,
}

/// Reschedule backoff settings.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub kind: BackoffKind,
    pub delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay_ms: 5000,
            max_delay_ms: 300_000,
        }
    }
}

impl Backoff {
    /// Delay before the given attempt (0-indexed) re-runs.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        match self.kind {
            BackoffKind::Fixed => self.delay_ms,
            BackoffKind::Exponential => self
                .delay_ms
                .saturating_mul(2u64.saturating_pow(attempt))
                .min(self.max_delay_ms),
        }
    }
}

/// Per-queue default job options.
#[derive(Debug, Clone)]
pub struct DefaultJobOptions {
    /// Maximum attempts before a job fails terminally
    pub max_attempts: u32,

    /// Backoff applied between attempts
    pub backoff: Backoff,

    /// Delete the stream entry once processed successfully
    pub remove_on_complete: bool,

    /// Delete the stream entry once moved to the DLQ
    pub remove_on_fail: bool,
}

impl Default for DefaultJobOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::default(),
            remove_on_complete: true,
            remove_on_fail: true,
        }
    }
}

/// Configuration for the queue worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Logical queue name (stats/health/metrics label)
    pub queue_name: String,

    /// Prefix for the priority stream bands
    pub stream_prefix: String,

    /// Consumer group name
    pub consumer_group: String,

    /// Unique consumer ID (auto-generated if not provided)
    pub consumer_id: String,

    /// Dead letter queue stream name
    pub dlq_stream: String,

    /// Sorted set holding delayed jobs
    pub delayed_set: String,

    /// Maximum stream length per band before trimming
    pub max_length: i64,

    /// Poll interval in milliseconds when no messages available
    pub poll_interval_ms: u64,

    /// Batch size for reading messages
    pub batch_size: usize,

    /// Blocking read timeout in milliseconds (None = non-blocking)
    pub block_timeout_ms: Option<u64>,

    /// Maximum concurrent jobs to process
    pub max_concurrent_jobs: usize,

    /// Lease duration before a claimed-but-silent job counts as stalled
    pub stalled_interval_ms: u64,

    /// Stalled re-deliveries tolerated before the job is failed to the DLQ
    pub max_stalled_count: u32,

    /// Per-queue default job options
    pub default_opts: DefaultJobOptions,

    /// Enable the dead letter queue
    pub enable_dlq: bool,
}

impl WorkerConfig {
    /// Create a new WorkerConfig from a QueueDef
    pub fn from_queue_def<Q: QueueDef>() -> Self {
        Self {
            queue_name: Q::QUEUE_NAME.to_string(),
            stream_prefix: Q::STREAM_PREFIX.to_string(),
            consumer_group: Q::CONSUMER_GROUP.to_string(),
            consumer_id: format!("worker-{}", Uuid::new_v4()),
            dlq_stream: Q::dlq_stream(),
            delayed_set: Q::delayed_set(),
            max_length: Q::MAX_LENGTH,
            poll_interval_ms: Q::POLL_INTERVAL_MS,
            batch_size: Q::BATCH_SIZE,
            block_timeout_ms: Some(5000),
            max_concurrent_jobs: 1,
            stalled_interval_ms: Q::STALLED_INTERVAL_MS,
            max_stalled_count: Q::MAX_STALLED_COUNT,
            default_opts: DefaultJobOptions::default(),
            enable_dlq: true,
        }
    }

    /// Create a new WorkerConfig with explicit values
    pub fn new(
        queue_name: impl Into<String>,
        stream_prefix: impl Into<String>,
        consumer_group: impl Into<String>,
    ) -> Self {
        let prefix: String = stream_prefix.into();
        Self {
            queue_name: queue_name.into(),
            consumer_group: consumer_group.into(),
            consumer_id: format!("worker-{}", Uuid::new_v4()),
            dlq_stream: format!("{}:dlq", prefix),
            delayed_set: format!("{}:delayed", prefix),
            stream_prefix: prefix,
            max_length: 100_000,
            poll_interval_ms: 1000,
            batch_size: 10,
            block_timeout_ms: Some(5000),
            max_concurrent_jobs: 1,
            stalled_interval_ms: 30_000,
            max_stalled_count: 1,
            default_opts: DefaultJobOptions::default(),
            enable_dlq: true,
        }
    }

    /// Set the consumer ID
    pub fn with_consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = id.into();
        self
    }

    /// Set the maximum stream length
    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = max_length;
        self
    }

    /// Set the poll interval
    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = interval;
        self
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the blocking timeout (None for non-blocking)
    pub fn with_blocking(mut self, timeout_ms: Option<u64>) -> Self {
        self.block_timeout_ms = timeout_ms;
        self
    }

    /// Set the maximum concurrent jobs
    pub fn with_max_concurrent_jobs(mut self, count: usize) -> Self {
        self.max_concurrent_jobs = count.max(1);
        self
    }

    /// Set the stalled lease interval
    pub fn with_stalled_interval_ms(mut self, interval: u64) -> Self {
        self.stalled_interval_ms = interval;
        self
    }

    /// Set the tolerated stalled re-delivery count
    pub fn with_max_stalled_count(mut self, count: u32) -> Self {
        self.max_stalled_count = count;
        self
    }

    /// Set the per-queue default job options
    pub fn with_default_opts(mut self, opts: DefaultJobOptions) -> Self {
        self.default_opts = opts;
        self
    }

    /// Enable or disable the DLQ
    pub fn with_dlq(mut self, enable: bool) -> Self {
        self.enable_dlq = enable;
        self
    }

    /// Stream key for a priority band.
    pub fn band_stream(&self, level: u8) -> String {
        format!("{}:p{}", self.stream_prefix, level)
    }

    /// All band streams in descending priority order.
    pub fn band_streams(&self) -> Vec<String> {
        crate::job::Priority::descending()
            .iter()
            .map(|p| self.band_stream(p.level()))
            .collect()
    }

    /// Key flagging the queue as paused.
    pub fn paused_key(&self) -> String {
        format!("{}:paused", self.stream_prefix)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("default", "jobs", "workers")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestQueue;

    impl QueueDef for TestQueue {
        const QUEUE_NAME: &'static str = "test";
        const STREAM_PREFIX: &'static str = "test:jobs";
        const CONSUMER_GROUP: &'static str = "test:group";
    }

    #[test]
    fn test_from_queue_def() {
        let config = WorkerConfig::from_queue_def::<TestQueue>();

        assert_eq!(config.queue_name, "test");
        assert_eq!(config.stream_prefix, "test:jobs");
        assert_eq!(config.consumer_group, "test:group");
        assert_eq!(config.dlq_stream, "test:jobs:dlq");
        assert_eq!(config.delayed_set, "test:jobs:delayed");
        assert!(config.consumer_id.starts_with("worker-"));
    }

    #[test]
    fn test_band_streams_descending() {
        let config = WorkerConfig::new("q", "q:jobs", "g");
        let bands = config.band_streams();

        assert_eq!(
            bands,
            vec!["q:jobs:p20", "q:jobs:p15", "q:jobs:p10", "q:jobs:p5", "q:jobs:p1"]
        );
    }

    #[test]
    fn test_builder_pattern() {
        let config = WorkerConfig::new("my", "my:jobs", "my:group")
            .with_consumer_id("worker-1")
            .with_batch_size(20)
            .with_max_concurrent_jobs(4)
            .with_blocking(Some(10_000))
            .with_max_stalled_count(2);

        assert_eq!(config.consumer_id, "worker-1");
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.block_timeout_ms, Some(10_000));
        assert_eq!(config.max_stalled_count, 2);
    }

    #[test]
    fn test_backoff_fixed() {
        let backoff = Backoff {
            kind: BackoffKind::Fixed,
            delay_ms: 5000,
            max_delay_ms: 300_000,
        };
        assert_eq!(backoff.delay_for_attempt(0), 5000);
        assert_eq!(backoff.delay_for_attempt(5), 5000);
    }

    #[test]
    fn test_backoff_exponential_caps() {
        let backoff = Backoff {
            kind: BackoffKind::Exponential,
            delay_ms: 5000,
            max_delay_ms: 60_000,
        };
        assert_eq!(backoff.delay_for_attempt(0), 5000);
        assert_eq!(backoff.delay_for_attempt(1), 10_000);
        assert_eq!(backoff.delay_for_attempt(2), 20_000);
        assert_eq!(backoff.delay_for_attempt(10), 60_000);
    }
}
