//! Fetch handler: pull the current reading, persist it, evaluate alerts.

use chrono::Utc;
use domain_alerts::{AlertEngine, AlertSignal, MongoAlertStore};
use domain_readings::{MongoReadingStore, Reading, ReadingMetadata, ReadingStore, Tier};
use jobqueue::{EnqueueOptions, JobContext, QueueError, QueueProducer};
use observability::IngestMetrics;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CityTarget;
use crate::jobs::AqJob;
use crate::upstream::{IqAirProvider, ResilientFetcher, UpstreamError};

pub struct FetchHandler {
    fetcher: Arc<ResilientFetcher<IqAirProvider>>,
    store: Arc<MongoReadingStore>,
    alerts: Arc<AlertEngine<MongoAlertStore>>,
    producer: QueueProducer,
    alert_max_attempts: u32,
}

impl FetchHandler {
    pub fn new(
        fetcher: Arc<ResilientFetcher<IqAirProvider>>,
        store: Arc<MongoReadingStore>,
        alerts: Arc<AlertEngine<MongoAlertStore>>,
        producer: QueueProducer,
        alert_max_attempts: u32,
    ) -> Self {
        Self {
            fetcher,
            store,
            alerts,
            producer,
            alert_max_attempts,
        }
    }

    pub async fn handle(&self, city: &CityTarget, ctx: &JobContext) -> Result<(), QueueError> {
        ctx.progress(10).await;

        let outcome = match self.fetcher.fetch(city).await {
            Ok(outcome) => outcome,
            Err(UpstreamError::CircuitOpen) => {
                IngestMetrics::record_breaker_rejection(&city.location_key);
                return Err(QueueError::CircuitOpen);
            }
            Err(e) => {
                IngestMetrics::record_fetch(&city.location_key, false, 0, 0);

                // A long failure run raises the api_failures alert
                let streak = self.fetcher.failure_streak();
                self.raise_alert(AlertSignal::ApiFailureStreak(streak), ctx)
                    .await;

                return Err(if e.is_retryable() {
                    QueueError::transient(e.to_string())
                } else {
                    QueueError::permanent(e.to_string())
                });
            }
        };

        ctx.progress(50).await;

        let reading = Reading::new(
            &city.location_key,
            Utc::now(),
            outcome.reading.coordinates,
            outcome.reading.aqi,
            outcome.reading.main_pollutant,
            outcome.reading.weather,
            ReadingMetadata {
                api_response_time_ms: outcome.response_time_ms,
                cached: false,
                retry_count: outcome.retries,
            },
        )
        .map_err(|e| QueueError::permanent(e.to_string()))?;

        let inserted = self
            .store
            .insert(Tier::Hot, &reading)
            .await
            .map_err(|e| QueueError::transient(e.to_string()))?;

        if !inserted {
            debug!(
                location = %city.location_key,
                timestamp = %reading.timestamp,
                "Reading already present, insert deduplicated"
            );
        }

        IngestMetrics::record_fetch(
            &city.location_key,
            true,
            outcome.retries,
            outcome.response_time_ms,
        );

        ctx.progress(80).await;

        // Threshold evaluation on the fresh value
        self.raise_alert(
            AlertSignal::Aqi {
                location: city.location_key.clone(),
                value: reading.aqi,
            },
            ctx,
        )
        .await;

        info!(
            location = %city.location_key,
            aqi = reading.aqi,
            level = %reading.level,
            retries = outcome.retries,
            "Reading persisted to hot tier"
        );

        ctx.progress(100).await;
        Ok(())
    }

    /// Evaluate a signal and enqueue the alert's email job when one fires.
    ///
    /// Alert evaluation failures never fail the fetch; the reading is
    /// already persisted.
    async fn raise_alert(&self, signal: AlertSignal, ctx: &JobContext) {
        match self.alerts.evaluate(signal).await {
            Ok(Some(record)) => {
                IngestMetrics::record_alert(record.condition.id(), &record.severity.to_string());

                let correlation = Uuid::parse_str(&ctx.correlation_id)
                    .unwrap_or_else(|_| Uuid::new_v4());
                let job = AqJob::send_alert(record.id, self.alert_max_attempts, correlation);

                match self.producer.enqueue(&job, EnqueueOptions::default()).await {
                    Ok(_) => {
                        debug!(alert_id = %record.id, "Enqueued alert dispatch job");
                    }
                    Err(QueueError::DedupeSuppressed(_)) => {}
                    Err(e) => {
                        warn!(alert_id = %record.id, error = %e, "Failed to enqueue alert job");
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Alert evaluation failed");
            }
        }
    }
}
