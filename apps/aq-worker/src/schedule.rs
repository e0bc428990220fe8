//! The worker's cron schedule.
//!
//! Ticks enqueue jobs; nothing runs inline. Fetch ticks are gated on the
//! shared circuit breaker and on queue health, and every job guards its
//! period with a bucketed dedupe key so a tick and a manual run cannot
//! double-enqueue.

use chrono::Utc;
use domain_alerts::{AlertEngine, AlertSignal, MongoAlertStore};
use domain_readings::MigrationPhase;
use jobqueue::{
    CircuitBreaker, EnqueueOptions, QueueError, QueueHealthMonitor, QueueProducer,
};
use scheduler::{CronRunner, JobBody, JobGate, ScheduledJobSpec, SchedulerError};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::config::CityTarget;
use crate::jobs::{dedupe_keys, AqJob};

/// Queue health below this skips fetch ticks.
const HEALTH_GATE_THRESHOLD: f64 = 0.7;

/// Everything the schedule bodies need.
#[derive(Clone)]
pub struct ScheduleDeps {
    pub producer: QueueProducer,
    pub breaker: Arc<CircuitBreaker>,
    pub monitor: Arc<QueueHealthMonitor>,
    pub alerts: Arc<AlertEngine<MongoAlertStore>>,
    pub city: CityTarget,
    pub queue_max_attempts: u32,
    pub alert_max_attempts: u32,
    pub cleanup_retention_days: i64,
}

/// Enqueue, treating a dedupe suppression as success (the bucket already
/// holds this tick's job).
async fn enqueue_silently(
    producer: &QueueProducer,
    job: &AqJob,
    dedupe_key: String,
) -> Result<(), String> {
    match producer
        .enqueue(job, EnqueueOptions::default().with_dedupe_key(dedupe_key))
        .await
    {
        Ok(_) | Err(QueueError::DedupeSuppressed(_)) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

/// Build the full cron schedule.
pub async fn build_runner(deps: ScheduleDeps) -> Result<CronRunner, SchedulerError> {
    let mut runner = CronRunner::new().await?;

    // fetch-paris-data: every minute, Paris time, gated on breaker + health
    let fetch_gate: JobGate = {
        let breaker = Arc::clone(&deps.breaker);
        let monitor = Arc::clone(&deps.monitor);
        Arc::new(move || {
            let breaker = Arc::clone(&breaker);
            let monitor = Arc::clone(&monitor);
            Box::pin(async move {
                if !breaker.allow() {
                    return Some("breaker-open".to_string());
                }
                if monitor.score("airQuality") < HEALTH_GATE_THRESHOLD {
                    return Some("queue-health".to_string());
                }
                None
            })
        })
    };

    let fetch_body: JobBody = {
        let deps = deps.clone();
        Arc::new(move || {
            let deps = deps.clone();
            Box::pin(async move {
                let job = AqJob::fetch(deps.city.clone(), deps.queue_max_attempts);
                enqueue_silently(
                    &deps.producer,
                    &job,
                    dedupe_keys::fetch(&deps.city.location_key),
                )
                .await
            })
        })
    };

    runner
        .add(ScheduledJobSpec {
            name: "fetch-paris-data",
            schedule: "0 * * * * *",
            timezone: chrono_tz::Europe::Paris,
            gate: Some(fetch_gate),
            body: fetch_body,
        })
        .await?;

    // hourly-aggregations: partial-day aggregation for the current day
    let hourly_body: JobBody = {
        let deps = deps.clone();
        Arc::new(move || {
            let deps = deps.clone();
            Box::pin(async move {
                let job = AqJob::aggregate_daily(
                    &deps.city.location_key,
                    Utc::now().date_naive(),
                    false,
                    deps.queue_max_attempts,
                );
                enqueue_silently(
                    &deps.producer,
                    &job,
                    dedupe_keys::hourly_aggregation(&deps.city.location_key),
                )
                .await
            })
        })
    };

    runner
        .add(ScheduledJobSpec {
            name: "hourly-aggregations",
            schedule: "0 0 * * * *",
            timezone: chrono_tz::UTC,
            gate: None,
            body: hourly_body,
        })
        .await?;

    // finalize-daily-stats: 23:59 UTC upserts the day
    let finalize_body: JobBody = {
        let deps = deps.clone();
        Arc::new(move || {
            let deps = deps.clone();
            Box::pin(async move {
                let job = AqJob::aggregate_daily(
                    &deps.city.location_key,
                    Utc::now().date_naive(),
                    true,
                    deps.queue_max_attempts,
                );
                enqueue_silently(
                    &deps.producer,
                    &job,
                    dedupe_keys::finalize_daily(&deps.city.location_key),
                )
                .await
            })
        })
    };

    runner
        .add(ScheduledJobSpec {
            name: "finalize-daily-stats",
            schedule: "0 59 23 * * *",
            timezone: chrono_tz::UTC,
            gate: None,
            body: finalize_body,
        })
        .await?;

    // weekly-cleanup: Sunday 02:00 UTC
    let cleanup_body: JobBody = {
        let deps = deps.clone();
        Arc::new(move || {
            let deps = deps.clone();
            Box::pin(async move {
                let job = AqJob::cleanup(deps.cleanup_retention_days, 1);
                enqueue_silently(&deps.producer, &job, dedupe_keys::cleanup()).await
            })
        })
    };

    runner
        .add(ScheduledJobSpec {
            name: "weekly-cleanup",
            schedule: "0 0 2 * * Sun",
            timezone: chrono_tz::UTC,
            gate: None,
            body: cleanup_body,
        })
        .await?;

    // health-check: every 5 minutes, evaluate queue-health alert conditions
    let health_body: JobBody = {
        let deps = deps.clone();
        Arc::new(move || {
            let deps = deps.clone();
            Box::pin(async move {
                let Some(health) = deps.monitor.health_for("airQuality") else {
                    return Ok(());
                };

                let signals = [
                    AlertSignal::QueueBacklog {
                        queue: "airQuality".to_string(),
                        waiting: health.sample.waiting,
                    },
                    AlertSignal::SystemErrorRate {
                        queue: "airQuality".to_string(),
                        rate: health.sample.failure_rate,
                    },
                ];

                for signal in signals {
                    match deps.alerts.evaluate(signal).await {
                        Ok(Some(record)) => {
                            let job = AqJob::send_alert(
                                record.id,
                                deps.alert_max_attempts,
                                Uuid::new_v4(),
                            );
                            if let Err(e) = deps
                                .producer
                                .enqueue(&job, EnqueueOptions::default())
                                .await
                            {
                                if !matches!(e, QueueError::DedupeSuppressed(_)) {
                                    warn!(error = %e, "Failed to enqueue health alert job");
                                }
                            }
                        }
                        Ok(None) => {}
                        Err(e) => return Err(e.to_string()),
                    }
                }

                Ok(())
            })
        })
    };

    runner
        .add(ScheduledJobSpec {
            name: "health-check",
            schedule: "0 */5 * * * *",
            timezone: chrono_tz::UTC,
            gate: None,
            body: health_body,
        })
        .await?;

    // Tier migrations: hot->warm daily 02:00 UTC, warm->cold monthly 03:00
    let hot_warm_body: JobBody = {
        let deps = deps.clone();
        Arc::new(move || {
            let deps = deps.clone();
            Box::pin(async move {
                let job = AqJob::migrate(MigrationPhase::HotToWarm, deps.queue_max_attempts);
                enqueue_silently(
                    &deps.producer,
                    &job,
                    dedupe_keys::migration(MigrationPhase::HotToWarm),
                )
                .await
            })
        })
    };

    runner
        .add(ScheduledJobSpec {
            name: "migrate-hot-warm",
            schedule: "0 0 2 * * *",
            timezone: chrono_tz::UTC,
            gate: None,
            body: hot_warm_body,
        })
        .await?;

    let warm_cold_body: JobBody = {
        let deps = deps.clone();
        Arc::new(move || {
            let deps = deps.clone();
            Box::pin(async move {
                let job = AqJob::migrate(MigrationPhase::WarmToCold, deps.queue_max_attempts);
                enqueue_silently(
                    &deps.producer,
                    &job,
                    dedupe_keys::migration(MigrationPhase::WarmToCold),
                )
                .await
            })
        })
    };

    runner
        .add(ScheduledJobSpec {
            name: "migrate-warm-cold",
            schedule: "0 0 3 1 * *",
            timezone: chrono_tz::UTC,
            gate: None,
            body: warm_cold_body,
        })
        .await?;

    Ok(runner)
}
