//! Core job traits and the generic QueueWorker implementation.
//!
//! This module provides:
//! - `QueueJob` trait for job payloads
//! - `JobProcessor` trait for job handlers
//! - `QueueWorker` struct running the dispatch loop

use crate::config::WorkerConfig;
use crate::consumer::{ClaimedMessage, QueueConsumer};
use crate::dedupe::DedupeSet;
use crate::error::{ErrorCategory, QueueError};
use crate::job::{JobContext, Priority};
use crate::metrics::{self, ErrorType, JobStatus};
use crate::resilience::ResilienceLayer;
use crate::stats::StatsRegistry;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Trait for queue job payloads.
///
/// Job types are typically tagged enums with one typed payload per variant;
/// the dispatcher routes on `kind()`.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// enum PipelineJob {
///     Fetch { city: String, attempts: u32, .. },
///     Migrate { phase: MigrationPhase, attempts: u32, .. },
/// }
///
/// impl QueueJob for PipelineJob {
///     fn job_id(&self) -> String { .. }
///     fn kind(&self) -> &'static str {
///         match self { Self::Fetch { .. } => "fetch", Self::Migrate { .. } => "migrate" }
///     }
///     ..
/// }
/// ```
pub trait QueueJob: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Returns the job ID for logging and tracking.
    fn job_id(&self) -> String;

    /// Stable kind tag used for routing, stats, and per-kind timeouts.
    fn kind(&self) -> &'static str;

    /// Claim priority. Defaults to normal.
    fn priority(&self) -> Priority {
        Priority::Normal
    }

    /// Number of attempts already consumed.
    fn attempts(&self) -> u32;

    /// A copy of the job with the attempt counter incremented.
    fn with_attempt(&self) -> Self;

    /// Maximum attempts before the job fails terminally (0 = queue default).
    fn max_attempts(&self) -> u32 {
        0
    }

    /// Correlation ID threaded through logs and downstream jobs.
    fn correlation_id(&self) -> String {
        self.job_id()
    }
}

/// Trait for job handlers.
///
/// # Example
///
/// ```rust,ignore
/// struct FetchProcessor { fetcher: Arc<ResilientFetcher> }
///
/// #[async_trait]
/// impl JobProcessor<PipelineJob> for FetchProcessor {
///     async fn process(&self, job: &PipelineJob, ctx: &JobContext) -> Result<(), QueueError> {
///         ctx.progress(10).await;
///         // ...
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str { "fetch_processor" }
/// }
/// ```
#[async_trait]
pub trait JobProcessor<J: QueueJob>: Send + Sync {
    /// Process a single job.
    ///
    /// Return `Ok(())` for success, `Err` for failure. Failed jobs are
    /// rescheduled with backoff or moved to the DLQ based on the error
    /// category and the job's attempt budget.
    async fn process(&self, job: &J, ctx: &JobContext) -> Result<(), QueueError>;

    /// Get the processor name for logging.
    fn name(&self) -> &'static str;

    /// Deadline applied to one processing attempt of the given kind.
    ///
    /// Exceeding it is a handler error and triggers the retry policy.
    fn timeout_for(&self, _kind: &str) -> Duration {
        Duration::from_secs(60)
    }

    /// Health check for the processor.
    ///
    /// Override to check downstream services. Default: always healthy.
    async fn health_check(&self) -> Result<bool, QueueError> {
        Ok(true)
    }
}

/// Details handed to the final-failure hook when a job exhausts its attempts.
#[derive(Debug, Clone)]
pub struct FinalFailure {
    pub queue: String,
    pub kind: String,
    pub job_id: String,
    pub correlation_id: String,
    pub error: String,
    pub attempts: u32,
}

/// Hook invoked on a job's terminal failure (used to raise system alerts).
pub type FinalFailureHook = Arc<dyn Fn(FinalFailure) + Send + Sync>;

/// Generic queue worker that drains priority bands through a processor.
///
/// Encapsulates the dispatch loop with:
/// - Consumer group management across priority bands
/// - Delayed-job promotion
/// - Pending message recovery and stalled-job handling
/// - Per-kind timeouts with heartbeat lease refresh
/// - Retry scheduling with backoff, DLQ on exhaustion
/// - Per-kind execution stats
/// - Graceful shutdown
/// - **Concurrent job processing** (configurable via `max_concurrent_jobs`)
pub struct QueueWorker<J, P>
where
    J: QueueJob,
    P: JobProcessor<J>,
{
    consumer: Arc<QueueConsumer>,
    processor: Arc<P>,
    config: WorkerConfig,
    /// Semaphore to limit concurrent job processing
    concurrency_semaphore: Arc<Semaphore>,
    /// Optional resilience layer (circuit breaker + rate limiter)
    resilience: Option<Arc<ResilienceLayer>>,
    /// Per-kind execution stats
    stats: Arc<StatsRegistry>,
    /// Hook fired when a job fails terminally
    on_final_failure: Option<FinalFailureHook>,
    /// Optional dedupe set to sweep while running
    dedupe: Option<Arc<DedupeSet>>,
    _phantom: PhantomData<J>,
}

impl<J, P> QueueWorker<J, P>
where
    J: QueueJob,
    P: JobProcessor<J> + 'static,
{
    /// Create a new queue worker.
    pub fn new(redis: ConnectionManager, processor: P, config: WorkerConfig) -> Self {
        Self::with_arc_processor(redis, Arc::new(processor), config)
    }

    /// Create a new queue worker with an Arc processor.
    pub fn with_arc_processor(
        redis: ConnectionManager,
        processor: Arc<P>,
        config: WorkerConfig,
    ) -> Self {
        let consumer = Arc::new(QueueConsumer::new(redis, config.clone()));
        let concurrency_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));

        Self {
            consumer,
            processor,
            concurrency_semaphore,
            resilience: None,
            stats: Arc::new(StatsRegistry::new()),
            on_final_failure: None,
            dedupe: None,
            config,
            _phantom: PhantomData,
        }
    }

    /// Add a resilience layer (circuit breaker + optional rate limiter).
    ///
    /// When configured, the worker checks the layer before each job and
    /// reschedules jobs instead of burning attempts while the circuit is
    /// open.
    pub fn with_resilience(mut self, resilience: Arc<ResilienceLayer>) -> Self {
        self.resilience = Some(resilience);
        self
    }

    /// Register the final-failure hook.
    pub fn with_final_failure_hook(mut self, hook: FinalFailureHook) -> Self {
        self.on_final_failure = Some(hook);
        self
    }

    /// Attach a dedupe set so the worker drives its minute sweep.
    pub fn with_dedupe(mut self, dedupe: Arc<DedupeSet>) -> Self {
        self.dedupe = Some(dedupe);
        self
    }

    /// Get a reference to the resilience layer, if configured.
    pub fn resilience(&self) -> Option<&ResilienceLayer> {
        self.resilience.as_deref()
    }

    /// Get a reference to the consumer for health checks.
    pub fn consumer(&self) -> Arc<QueueConsumer> {
        Arc::clone(&self.consumer)
    }

    /// Per-kind stats registry.
    pub fn stats(&self) -> Arc<StatsRegistry> {
        Arc::clone(&self.stats)
    }

    /// Get a clone of the Redis connection manager.
    pub fn redis(&self) -> ConnectionManager {
        self.consumer.redis().clone()
    }

    /// Run the worker loop.
    ///
    /// Continuously promotes due delayed jobs and drains the priority bands.
    /// Use the shutdown receiver to stop gracefully: the loop stops claiming
    /// and in-flight handlers finish before return.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        info!(
            consumer_id = %self.config.consumer_id,
            queue = %self.config.queue_name,
            group = %self.config.consumer_group,
            processor = %self.processor.name(),
            "Starting queue worker"
        );

        self.consumer.ensure_consumer_groups().await?;

        if let Err(e) = self.consumer.claim_all_pending_on_startup().await {
            warn!(error = %e, "Failed to claim pending messages on startup");
        }

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let stalled_check_interval = Duration::from_millis(self.config.stalled_interval_ms * 2);
        let sweep_interval = Duration::from_secs(60);
        let mut last_stalled_check = std::time::Instant::now();
        let mut last_sweep = std::time::Instant::now();
        let is_blocking = self.consumer.is_blocking();

        // Track consecutive errors for exponential backoff
        let mut consecutive_errors: u32 = 0;
        const MAX_BACKOFF_SECS: u64 = 30;

        info!(
            block_timeout_ms = ?self.config.block_timeout_ms,
            max_concurrent_jobs = %self.config.max_concurrent_jobs,
            batch_size = %self.config.batch_size,
            "Worker loop configured"
        );

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping worker");
                break;
            }

            if self.consumer.is_paused().await {
                debug!(queue = %self.config.queue_name, "Queue paused, idling");
                tokio::time::sleep(poll_interval).await;
                continue;
            }

            if let Err(e) = self.consumer.promote_due_delayed().await {
                debug!(error = %e, "Error promoting delayed jobs");
            }

            match self.process_batch().await {
                Ok(_) => {
                    if consecutive_errors > 0 {
                        info!("Connection recovered after {} errors", consecutive_errors);
                        consecutive_errors = 0;
                    }
                }
                Err(e) => {
                    // BLOCK timeout is normal - no messages arrived
                    if e.is_block_timeout() {
                        debug!("BLOCK timeout - no messages, continuing...");
                        continue;
                    }

                    consecutive_errors += 1;

                    if e.is_nogroup_error() {
                        warn!("Consumer group missing, recreating...");
                        if let Err(create_err) = self.consumer.ensure_consumer_groups().await {
                            error!(error = %create_err, "Failed to recreate consumer groups");
                        }
                    } else if e.is_connection_error() {
                        let backoff_secs =
                            std::cmp::min(2u64.pow(consecutive_errors.min(5)), MAX_BACKOFF_SECS);
                        warn!(
                            error = %e,
                            consecutive_errors = %consecutive_errors,
                            backoff_secs = %backoff_secs,
                            "Redis connection error, backing off"
                        );
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    } else {
                        error!(error = %e, "Error processing batch");
                    }

                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            }

            // Periodically recover stalled messages
            if last_stalled_check.elapsed() >= stalled_check_interval {
                match self.consumer.recover_stalled::<J>().await {
                    Ok((_, failed)) if failed > 0 => {
                        for _ in 0..failed {
                            metrics::record_job_processed(
                                &self.config.queue_name,
                                "unknown",
                                JobStatus::Stalled,
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "Error recovering stalled messages"),
                }
                last_stalled_check = std::time::Instant::now();
            }

            // Minute sweep for the dedupe set
            if last_sweep.elapsed() >= sweep_interval {
                if let Some(ref dedupe) = self.dedupe {
                    dedupe.sweep();
                }
                last_sweep = std::time::Instant::now();
            }

            // In blocking mode, Redis BLOCK handles waiting; in polling mode,
            // wait before the next poll
            if !is_blocking {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("Received shutdown signal, stopping worker");
                            break;
                        }
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }

        info!("Queue worker stopped");
        Ok(())
    }

    /// Process one batch: pending (recovered) messages first, then new ones.
    async fn process_batch(&self) -> Result<(), QueueError> {
        let pending = self.consumer.read_pending_messages::<J>().await?;
        let new_messages = self.consumer.read_new_messages::<J>().await?;

        let total = pending.len() + new_messages.len();
        if total == 0 {
            return Ok(());
        }

        metrics::record_batch_size(&self.config.queue_name, total);

        let mut join_set: JoinSet<()> = JoinSet::new();
        let in_flight = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        for message in pending.into_iter().chain(new_messages) {
            let semaphore = Arc::clone(&self.concurrency_semaphore);
            let consumer = Arc::clone(&self.consumer);
            let processor = Arc::clone(&self.processor);
            let config = self.config.clone();
            let stats = Arc::clone(&self.stats);
            let resilience = self.resilience.clone();
            let hook = self.on_final_failure.clone();
            let in_flight = Arc::clone(&in_flight);

            join_set.spawn(async move {
                let _permit = semaphore.acquire().await.expect("Semaphore closed");

                let current = in_flight.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                metrics::set_in_flight_jobs(&config.queue_name, current as f64);

                Self::process_one(consumer, processor, &config, stats, resilience, hook, message)
                    .await;

                let current = in_flight.fetch_sub(1, std::sync::atomic::Ordering::SeqCst) - 1;
                metrics::set_in_flight_jobs(&config.queue_name, current as f64);
            });
        }

        while join_set.join_next().await.is_some() {}

        Ok(())
    }

    /// Process a single claimed message end to end.
    async fn process_one(
        consumer: Arc<QueueConsumer>,
        processor: Arc<P>,
        config: &WorkerConfig,
        stats: Arc<StatsRegistry>,
        resilience: Option<Arc<ResilienceLayer>>,
        hook: Option<FinalFailureHook>,
        message: ClaimedMessage<J>,
    ) {
        let job = &message.job;
        let kind = job.kind();

        debug!(
            message_id = %message.message_id,
            job_id = %job.job_id(),
            kind = %kind,
            correlation_id = %job.correlation_id(),
            "Processing job"
        );

        // Resilience gate: open breaker or exhausted quota reschedules the
        // job without consuming an attempt.
        if let Some(ref layer) = resilience {
            if let Err(e) = layer.check(kind) {
                warn!(
                    message_id = %message.message_id,
                    job_id = %job.job_id(),
                    error = %e,
                    circuit_state = ?layer.circuit_state(),
                    "Deferring job: resilience check failed"
                );

                let delay = config.default_opts.backoff.delay_ms;
                if let Err(err) = consumer.requeue_delayed(job, job.priority(), delay).await {
                    error!(error = %err, "Failed to defer job after resilience rejection");
                }
                Self::finish_message(&consumer, &message, true).await;

                metrics::record_job_processed(&config.queue_name, kind, JobStatus::Skipped);
                return;
            }
        }

        let ctx = JobContext::new(
            consumer.redis().clone(),
            &config.queue_name,
            job.job_id(),
            job.correlation_id(),
        );

        // Heartbeat: refresh the claim lease while the handler runs so a
        // long job is not treated as stalled.
        let heartbeat = {
            let consumer = Arc::clone(&consumer);
            let stream = message.stream.clone();
            let message_id = message.message_id.clone();
            let interval = Duration::from_millis((config.stalled_interval_ms / 2).max(1000));
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // first tick is immediate
                loop {
                    ticker.tick().await;
                    if let Err(e) = consumer.heartbeat(&stream, &message_id).await {
                        debug!(error = %e, "Heartbeat failed");
                    }
                }
            })
        };

        let timeout = processor.timeout_for(kind);
        let start = std::time::Instant::now();

        let outcome = match tokio::time::timeout(timeout, processor.process(job, &ctx)).await {
            Ok(result) => result,
            Err(_) => Err(QueueError::HandlerTimeout(timeout)),
        };

        heartbeat.abort();
        let elapsed = start.elapsed();

        match outcome {
            Ok(()) => {
                if let Some(ref layer) = resilience {
                    layer.record_success();
                }

                stats.record(kind, true, elapsed);
                metrics::record_job_processed(&config.queue_name, kind, JobStatus::Success);
                metrics::record_job_duration(&config.queue_name, kind, elapsed);

                ctx.clear_progress().await;
                if let Err(e) = consumer.complete(&message.stream, &message.message_id).await {
                    error!(message_id = %message.message_id, error = %e, "Failed to complete message");
                }
            }
            Err(e) => {
                if let Some(ref layer) = resilience {
                    layer.record_failure();
                }

                stats.record(kind, false, elapsed);
                metrics::record_job_processed(&config.queue_name, kind, JobStatus::Failed);

                let category = e.category();
                let error_type = match &e {
                    QueueError::HandlerTimeout(_) => ErrorType::Timeout,
                    _ => match category {
                        ErrorCategory::Transient => ErrorType::Transient,
                        ErrorCategory::Permanent => ErrorType::Permanent,
                        ErrorCategory::RateLimited => ErrorType::RateLimited,
                    },
                };
                metrics::record_error(&config.queue_name, error_type);

                warn!(
                    message_id = %message.message_id,
                    job_id = %job.job_id(),
                    kind = %kind,
                    error = %e,
                    error_category = ?category,
                    "Job processing failed"
                );

                ctx.clear_progress().await;
                if let Err(handler_err) =
                    Self::handle_failure(&consumer, config, &hook, &message, e).await
                {
                    error!(
                        message_id = %message.message_id,
                        error = %handler_err,
                        "Failed to handle job error"
                    );
                    // Still ACK to prevent an infinite redelivery loop
                    let _ = consumer.ack(&message.stream, &message.message_id).await;
                }
            }
        }
    }

    /// Retry with backoff, or fail terminally to the DLQ.
    async fn handle_failure(
        consumer: &QueueConsumer,
        config: &WorkerConfig,
        hook: &Option<FinalFailureHook>,
        message: &ClaimedMessage<J>,
        error: QueueError,
    ) -> Result<(), QueueError> {
        let job = &message.job;
        let category = error.category();

        let effective_max = if job.max_attempts() > 0 {
            job.max_attempts()
        } else {
            config.default_opts.max_attempts
        };

        let next_attempts = job.attempts() + 1;
        let terminal = !category.should_retry() || next_attempts >= effective_max;

        if terminal {
            warn!(
                job_id = %job.job_id(),
                kind = %job.kind(),
                attempts = next_attempts,
                max_attempts = effective_max,
                error_category = ?category,
                "Job failed terminally, moving to DLQ"
            );

            metrics::record_job_processed(&config.queue_name, job.kind(), JobStatus::Dlq);

            consumer
                .move_to_dlq(job, &error.to_string(), &message.message_id)
                .await?;
            Self::finish_message(consumer, message, config.default_opts.remove_on_fail).await;

            if let Some(hook) = hook {
                hook(FinalFailure {
                    queue: config.queue_name.clone(),
                    kind: job.kind().to_string(),
                    job_id: job.job_id(),
                    correlation_id: job.correlation_id(),
                    error: error.to_string(),
                    attempts: next_attempts,
                });
            }

            return Ok(());
        }

        // Reschedule with the larger of the queue backoff and the
        // category-specific backoff (rate limits need the longer delay).
        let queue_delay = config.default_opts.backoff.delay_for_attempt(job.attempts());
        let category_delay = category
            .retry_strategy()
            .delay_for_attempt(job.attempts())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let delay_ms = queue_delay.max(category_delay);

        metrics::record_retry(&config.queue_name, next_attempts);

        info!(
            job_id = %job.job_id(),
            kind = %job.kind(),
            retry_attempt = next_attempts,
            delay_ms = delay_ms,
            error_category = ?category,
            "Scheduling job retry with backoff"
        );

        let retry_job = job.with_attempt();
        consumer
            .requeue_delayed(&retry_job, job.priority(), delay_ms)
            .await?;
        Self::finish_message(consumer, message, true).await;

        Ok(())
    }

    /// Ack (and optionally delete) a superseded stream entry.
    async fn finish_message(consumer: &QueueConsumer, message: &ClaimedMessage<J>, delete: bool) {
        if let Err(e) = consumer.ack(&message.stream, &message.message_id).await {
            error!(message_id = %message.message_id, error = %e, "Failed to ACK message");
            return;
        }
        if delete {
            if let Err(e) = consumer.delete(&message.stream, &message.message_id).await {
                debug!(message_id = %message.message_id, error = %e, "Failed to delete message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct TestJob {
        id: String,
        data: String,
        attempts: u32,
    }

    impl QueueJob for TestJob {
        fn job_id(&self) -> String {
            self.id.clone()
        }

        fn kind(&self) -> &'static str {
            "test"
        }

        fn attempts(&self) -> u32 {
            self.attempts
        }

        fn with_attempt(&self) -> Self {
            Self {
                attempts: self.attempts + 1,
                ..self.clone()
            }
        }

        fn max_attempts(&self) -> u32 {
            3
        }
    }

    #[test]
    fn test_queue_job_trait() {
        let job = TestJob {
            id: "job-1".to_string(),
            data: "test".to_string(),
            attempts: 0,
        };

        assert_eq!(job.job_id(), "job-1");
        assert_eq!(job.kind(), "test");
        assert_eq!(job.attempts(), 0);
        assert_eq!(job.max_attempts(), 3);
        assert_eq!(job.priority(), Priority::Normal);
        assert_eq!(job.correlation_id(), "job-1");

        let retry = job.with_attempt();
        assert_eq!(retry.attempts(), 1);
    }
}
