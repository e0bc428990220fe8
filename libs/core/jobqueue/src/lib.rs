//! Jobqueue - Redis Streams job queue and dispatcher
//!
//! A reusable library for background job processing with:
//! - Priority-banded streams (higher priorities claimed first)
//! - Consumer group support for horizontal scaling
//! - Delayed jobs and automatic retry with exponential backoff and jitter
//! - Smart error categorization (transient, permanent, rate-limited)
//! - Duplicate suppression via bucketed dedupe keys
//! - Stalled-job recovery with a delivery-count cap
//! - Dead letter queue (DLQ) for failed jobs with admin API
//! - Per-job-kind stats and per-queue health scoring
//! - **Circuit breaker** for cascading failure protection
//! - **Per-recipient rate limiting** with hour/day sliding windows
//! - Graceful shutdown handling
//!
//! # Architecture
//!
//! ```text
//! Priority streams ({queue}:p20 .. {queue}:p1)     Delayed set ({queue}:delayed)
//!   ↓ (consumer group, descending band order)        ↑ (retry backoff, delayed enqueue)
//! QueueWorker<J, P>  ── promotes due jobs ───────────┘
//!   ↓ (processes jobs under per-kind timeout)
//! JobProcessor<J>
//!   ↓ (terminal failure)
//! DLQ stream ({queue}:dlq) + final-failure hook
//! ```
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use jobqueue::{QueueJob, JobProcessor, QueueWorker, WorkerConfig};
//!
//! // 1. Define your job type (typically a tagged enum of typed payloads)
//! #[derive(Clone, Serialize, Deserialize)]
//! struct MyJob { id: Uuid, payload: String, attempts: u32 }
//!
//! impl QueueJob for MyJob {
//!     fn job_id(&self) -> String { self.id.to_string() }
//!     fn kind(&self) -> &'static str { "my_job" }
//!     fn attempts(&self) -> u32 { self.attempts }
//!     fn with_attempt(&self) -> Self {
//!         Self { attempts: self.attempts + 1, ..self.clone() }
//!     }
//! }
//!
//! // 2. Define your processor
//! struct MyProcessor;
//!
//! #[async_trait]
//! impl JobProcessor<MyJob> for MyProcessor {
//!     async fn process(&self, job: &MyJob, ctx: &JobContext) -> Result<(), QueueError> {
//!         ctx.progress(50).await;
//!         Ok(())
//!     }
//!     fn name(&self) -> &'static str { "my_processor" }
//! }
//!
//! // 3. Run the worker
//! let config = WorkerConfig::from_queue_def::<MyQueue>();
//! let worker = QueueWorker::new(redis, processor, config);
//! worker.run(shutdown_rx).await?;
//! ```

mod config;
mod consumer;
mod dedupe;
pub mod dlq;
mod error;
pub mod health;
mod inspect;
mod job;
pub mod metrics;
mod producer;
pub mod resilience;
mod stats;
mod worker;

pub use config::{Backoff, BackoffKind, DefaultJobOptions, WorkerConfig};
pub use consumer::{ClaimedMessage, QueueConsumer};
pub use dedupe::DedupeSet;
pub use dlq::{DlqEntry, DlqManager, DlqStats};
pub use error::{ErrorCategory, QueueError, RetryStrategy};
pub use health::{
    full_admin_router, health_router, Bottleneck, BottleneckKind, BottleneckSeverity, HealthState,
    HealthTrend, QueueHealth, QueueHealthMonitor, QueueSample,
};
pub use inspect::{JobState, QueueCounts, QueueInspector};
pub use job::{JobContext, Priority, QueueDef};
pub use producer::{EnqueueOptions, QueueProducer};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimitConfig, RecipientRateLimiter,
    ResilienceError, ResilienceLayer,
};
pub use stats::{JobTypeStats, StatsRegistry, StatsSnapshot};
pub use worker::{FinalFailure, FinalFailureHook, JobProcessor, QueueJob, QueueWorker};

/// Result type alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;
