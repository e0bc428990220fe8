//! Job handlers for the airQuality queue.
//!
//! One processor serves the whole queue and dispatches on the job tag;
//! each kind's logic lives in its own module.

mod aggregate;
mod alert;
mod cleanup;
mod fetch;
mod migrate;

pub use aggregate::AggregateHandler;
pub use alert::AlertHandler;
pub use cleanup::CleanupHandler;
pub use fetch::FetchHandler;
pub use migrate::MigrateHandler;

use async_trait::async_trait;
use jobqueue::{JobContext, JobProcessor, QueueError};
use std::time::Duration;

use crate::jobs::AqJob;

/// The queue's processor: routes each claimed job to its handler.
pub struct PipelineProcessor {
    pub fetch: FetchHandler,
    pub aggregate: AggregateHandler,
    pub alert: AlertHandler,
    pub migrate: MigrateHandler,
    pub cleanup: CleanupHandler,
}

#[async_trait]
impl JobProcessor<AqJob> for PipelineProcessor {
    async fn process(&self, job: &AqJob, ctx: &JobContext) -> Result<(), QueueError> {
        match job {
            AqJob::Fetch { city, .. } => self.fetch.handle(city, ctx).await,
            AqJob::AggregateDaily {
                location,
                date,
                finalize,
                ..
            } => self.aggregate.handle(location, *date, *finalize, ctx).await,
            AqJob::SendAlert { alert_id, .. } => self.alert.handle(*alert_id, ctx).await,
            AqJob::Migrate { phase, .. } => self.migrate.handle(*phase, ctx).await,
            AqJob::Cleanup {
                older_than_days, ..
            } => self.cleanup.handle(*older_than_days, ctx).await,
        }
    }

    fn name(&self) -> &'static str {
        "pipeline_processor"
    }

    /// Per-kind deadlines. The fetch budget covers the full retry schedule
    /// (five backoffs at a 30s base); migrations stream batches and get the
    /// widest budget.
    fn timeout_for(&self, kind: &str) -> Duration {
        match kind {
            "fetch" => Duration::from_secs(1800),
            "aggregate_daily" => Duration::from_secs(300),
            "send_alert" => Duration::from_secs(120),
            "migrate" => Duration::from_secs(3600),
            "cleanup" => Duration::from_secs(600),
            _ => Duration::from_secs(60),
        }
    }
}
