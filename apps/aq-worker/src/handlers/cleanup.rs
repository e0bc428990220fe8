//! Cleanup handler: drop aged DLQ entries and alert records.

use chrono::{Duration, Utc};
use domain_alerts::{AlertEngine, MongoAlertStore};
use jobqueue::{JobContext, JobState, QueueError, QueueInspector};
use std::sync::Arc;
use tracing::info;

pub struct CleanupHandler {
    inspector: Arc<QueueInspector>,
    alerts: Arc<AlertEngine<MongoAlertStore>>,
}

impl CleanupHandler {
    pub fn new(inspector: Arc<QueueInspector>, alerts: Arc<AlertEngine<MongoAlertStore>>) -> Self {
        Self { inspector, alerts }
    }

    pub async fn handle(&self, older_than_days: i64, ctx: &JobContext) -> Result<(), QueueError> {
        ctx.progress(10).await;
        let cutoff = Utc::now() - Duration::days(older_than_days);

        let removed_failed = self.inspector.clean(cutoff, JobState::Failed).await?;

        ctx.progress(60).await;

        let removed_alerts = self
            .alerts
            .clear_older_than(older_than_days)
            .await
            .map_err(|e| QueueError::transient(e.to_string()))?;

        info!(
            older_than_days,
            removed_failed_jobs = removed_failed,
            removed_alerts,
            "Cleanup finished"
        );

        ctx.progress(100).await;
        Ok(())
    }
}
