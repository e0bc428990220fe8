//! Queue producer for enqueueing jobs.
//!
//! Jobs land on the priority band stream matching their priority, or in the
//! delayed sorted set when scheduled for the future. Duplicate suppression
//! happens here, before anything touches Redis.

use crate::config::WorkerConfig;
use crate::dedupe::DedupeSet;
use crate::error::QueueError;
use crate::job::Priority;
use crate::metrics;
use crate::worker::QueueJob;
use chrono::Utc;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Envelope stored in the delayed sorted set.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct DelayedEnvelope {
    pub priority: u8,
    pub job: serde_json::Value,
}

/// Options for a single enqueue.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Override the job's own priority.
    pub priority: Option<Priority>,
    /// Park the job until the delay elapses.
    pub delay: Option<Duration>,
    /// Bucketed dedupe key; a second enqueue with the same key inside the
    /// retention window returns `DedupeSuppressed`.
    pub dedupe_key: Option<String>,
}

impl EnqueueOptions {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }
}

/// Queue producer used by the scheduler and services to add jobs.
///
/// # Example
///
/// ```rust,ignore
/// use jobqueue::{EnqueueOptions, QueueProducer};
///
/// let producer = QueueProducer::new(redis, config);
/// let message_id = producer
///     .enqueue(&job, EnqueueOptions::default().with_dedupe_key(key))
///     .await?;
/// ```
pub struct QueueProducer {
    redis: Arc<ConnectionManager>,
    config: WorkerConfig,
    dedupe: Arc<DedupeSet>,
}

impl QueueProducer {
    /// Create a new producer for the given queue.
    pub fn new(redis: ConnectionManager, config: WorkerConfig) -> Self {
        Self {
            redis: Arc::new(redis),
            config,
            dedupe: Arc::new(DedupeSet::new()),
        }
    }

    /// Share an existing dedupe set (one set per queue across producers).
    pub fn with_dedupe(mut self, dedupe: Arc<DedupeSet>) -> Self {
        self.dedupe = dedupe;
        self
    }

    /// The dedupe set, for sweeping and stats.
    pub fn dedupe(&self) -> Arc<DedupeSet> {
        Arc::clone(&self.dedupe)
    }

    /// Logical queue name.
    pub fn queue_name(&self) -> &str {
        &self.config.queue_name
    }

    /// Enqueue a job.
    ///
    /// Returns the stream message ID, or the delayed-set member key for
    /// delayed jobs.
    pub async fn enqueue<J: QueueJob>(
        &self,
        job: &J,
        opts: EnqueueOptions,
    ) -> Result<String, QueueError> {
        if let Some(ref key) = opts.dedupe_key {
            if !self.dedupe.try_claim(key) {
                debug!(
                    queue = %self.config.queue_name,
                    dedupe_key = %key,
                    job_id = %job.job_id(),
                    "Suppressed duplicate enqueue"
                );
                metrics::record_deduped(&self.config.queue_name);
                return Err(QueueError::DedupeSuppressed(key.clone()));
            }
        }

        let priority = opts.priority.unwrap_or_else(|| job.priority());

        match opts.delay {
            Some(delay) if !delay.is_zero() => self.park_delayed(job, priority, delay).await,
            _ => self.push_to_band(job, priority).await,
        }
    }

    /// Enqueue multiple jobs at the same priority in one pipeline.
    pub async fn enqueue_batch<J: QueueJob>(
        &self,
        jobs: &[J],
        priority: Priority,
    ) -> Result<Vec<String>, QueueError> {
        if jobs.is_empty() {
            return Ok(vec![]);
        }

        let stream = self.config.band_stream(priority.level());
        let mut conn = (*self.redis).clone();
        let mut pipe = redis::pipe();

        for job in jobs {
            let job_json = serde_json::to_string(job)?;
            pipe.cmd("XADD")
                .arg(&stream)
                .arg("MAXLEN")
                .arg("~")
                .arg(self.config.max_length)
                .arg("*")
                .arg("job")
                .arg(&job_json);
        }

        let message_ids: Vec<String> = pipe.query_async(&mut conn).await?;

        debug!(
            stream = %stream,
            count = message_ids.len(),
            "Added batch of jobs to stream"
        );

        Ok(message_ids)
    }

    /// Pause the queue: workers stop claiming until `resume`.
    pub async fn pause(&self) -> Result<(), QueueError> {
        let mut conn = (*self.redis).clone();
        redis::cmd("SET")
            .arg(self.config.paused_key())
            .arg("1")
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Resume a paused queue.
    pub async fn resume(&self) -> Result<(), QueueError> {
        let mut conn = (*self.redis).clone();
        redis::cmd("DEL")
            .arg(self.config.paused_key())
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn push_to_band<J: QueueJob>(
        &self,
        job: &J,
        priority: Priority,
    ) -> Result<String, QueueError> {
        let stream = self.config.band_stream(priority.level());
        let mut conn = (*self.redis).clone();
        let job_json = serde_json::to_string(job)?;

        // MAXLEN ~ for approximate trimming (more efficient)
        let message_id: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_length)
            .arg("*")
            .arg("job")
            .arg(&job_json)
            .query_async(&mut conn)
            .await?;

        debug!(
            stream = %stream,
            message_id = %message_id,
            job_id = %job.job_id(),
            kind = %job.kind(),
            "Added job to stream"
        );

        Ok(message_id)
    }

    async fn park_delayed<J: QueueJob>(
        &self,
        job: &J,
        priority: Priority,
        delay: Duration,
    ) -> Result<String, QueueError> {
        let run_at_ms = Utc::now().timestamp_millis() as u64 + delay.as_millis() as u64;
        let envelope = DelayedEnvelope {
            priority: priority.level(),
            job: serde_json::to_value(job)?,
        };
        let member = serde_json::to_string(&envelope)?;

        let mut conn = (*self.redis).clone();
        redis::cmd("ZADD")
            .arg(&self.config.delayed_set)
            .arg(run_at_ms)
            .arg(&member)
            .query_async::<()>(&mut conn)
            .await?;

        debug!(
            delayed_set = %self.config.delayed_set,
            job_id = %job.job_id(),
            kind = %job.kind(),
            run_at_ms = run_at_ms,
            "Parked delayed job"
        );

        Ok(format!("delayed:{}", job.job_id()))
    }
}

impl Clone for QueueProducer {
    fn clone(&self) -> Self {
        Self {
            redis: Arc::clone(&self.redis),
            config: self.config.clone(),
            dedupe: Arc::clone(&self.dedupe),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_options_builder() {
        let opts = EnqueueOptions::default()
            .with_priority(Priority::Critical)
            .with_delay(Duration::from_secs(30))
            .with_dedupe_key("paris-fetch-42");

        assert_eq!(opts.priority, Some(Priority::Critical));
        assert_eq!(opts.delay, Some(Duration::from_secs(30)));
        assert_eq!(opts.dedupe_key.as_deref(), Some("paris-fetch-42"));
    }

    #[test]
    fn test_delayed_envelope_roundtrip() {
        let envelope = DelayedEnvelope {
            priority: 20,
            job: serde_json::json!({"id": "abc", "kind": "fetch"}),
        };

        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: DelayedEnvelope = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.priority, 20);
        assert_eq!(parsed.job["kind"], "fetch");
    }
}
