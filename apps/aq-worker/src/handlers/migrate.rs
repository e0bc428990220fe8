//! Migration handler: move aged records between tiers, watch storage usage.

use domain_alerts::{AlertEngine, AlertSignal, MongoAlertStore};
use domain_readings::{MigrationPhase, MongoReadingStore, ReadingStore, Tier, TierMigrator};
use jobqueue::{EnqueueOptions, JobContext, QueueError, QueueProducer};
use mongodb::bson::doc;
use mongodb::Database;
use observability::StorageMetrics;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::jobs::AqJob;

pub struct MigrateHandler {
    migrator: Arc<TierMigrator<MongoReadingStore>>,
    store: Arc<MongoReadingStore>,
    alerts: Arc<AlertEngine<MongoAlertStore>>,
    producer: QueueProducer,
    db: Database,
    storage_capacity_bytes: u64,
    alert_max_attempts: u32,
}

impl MigrateHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        migrator: Arc<TierMigrator<MongoReadingStore>>,
        store: Arc<MongoReadingStore>,
        alerts: Arc<AlertEngine<MongoAlertStore>>,
        producer: QueueProducer,
        db: Database,
        storage_capacity_bytes: u64,
        alert_max_attempts: u32,
    ) -> Self {
        Self {
            migrator,
            store,
            alerts,
            producer,
            db,
            storage_capacity_bytes,
            alert_max_attempts,
        }
    }

    pub async fn handle(&self, phase: MigrationPhase, ctx: &JobContext) -> Result<(), QueueError> {
        ctx.progress(5).await;

        let stats = self
            .migrator
            .run(phase)
            .await
            .map_err(|e| QueueError::transient(e.to_string()))?;

        StorageMetrics::record_migration(
            phase.as_str(),
            stats.migrated,
            stats.errors,
            stats.duration_ms,
        );

        ctx.progress(60).await;

        // Refresh per-tier gauges after the move
        for tier in [Tier::Hot, Tier::Warm, Tier::Cold] {
            if let Ok(count) = self.store.count(tier).await {
                StorageMetrics::set_tier_count(&tier.to_string(), count);
            }
        }

        ctx.progress(80).await;

        // Storage usage check rides along with migrations
        if let Some(usage) = self.storage_usage().await {
            match self.alerts.evaluate(AlertSignal::StorageUsage { usage }).await {
                Ok(Some(record)) => {
                    let correlation =
                        Uuid::parse_str(&ctx.correlation_id).unwrap_or_else(|_| Uuid::new_v4());
                    let job = AqJob::send_alert(record.id, self.alert_max_attempts, correlation);
                    if let Err(e) = self.producer.enqueue(&job, EnqueueOptions::default()).await {
                        if !matches!(e, QueueError::DedupeSuppressed(_)) {
                            warn!(error = %e, "Failed to enqueue storage alert job");
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Storage usage evaluation failed"),
            }
        }

        info!(
            phase = phase.as_str(),
            migrated = stats.migrated,
            deleted = stats.deleted,
            errors = stats.errors,
            duration_ms = stats.duration_ms,
            "Migration handler finished"
        );

        ctx.progress(100).await;

        if stats.errors > 0 {
            // Per-record errors left rows in the source tier; retrying the
            // job picks them up again
            return Err(QueueError::transient(format!(
                "{} records failed to migrate",
                stats.errors
            )));
        }

        Ok(())
    }

    /// Fraction of configured capacity the database currently uses.
    async fn storage_usage(&self) -> Option<f64> {
        let stats = self.db.run_command(doc! { "dbStats": 1 }).await.ok()?;
        let data_size = stats
            .get("dataSize")
            .and_then(|v| v.as_f64().or_else(|| v.as_i64().map(|i| i as f64)))?;
        Some(data_size / self.storage_capacity_bytes as f64)
    }
}
