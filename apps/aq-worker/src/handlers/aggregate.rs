//! Aggregation handler: compute and persist a day's statistics.
//!
//! Finalized days also produce the daily report email for the configured
//! recipients; report delivery is best-effort and never fails the job.

use chrono::NaiveDate;
use domain_readings::MongoReadingStore;
use domain_stats::{DailyAggregation, DailyAggregator, MongoAggregationStore, StatsError};
use email::{Email, EmailProvider, TemplateEngine};
use jobqueue::{JobContext, QueueError, RecipientRateLimiter};
use observability::IngestMetrics;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

pub struct AggregateHandler {
    aggregator: Arc<DailyAggregator<MongoReadingStore, MongoAggregationStore>>,
    mailer: Arc<dyn EmailProvider>,
    templates: Arc<TemplateEngine>,
    limiter: Arc<RecipientRateLimiter>,
    report_recipients: Vec<String>,
}

impl AggregateHandler {
    pub fn new(
        aggregator: Arc<DailyAggregator<MongoReadingStore, MongoAggregationStore>>,
        mailer: Arc<dyn EmailProvider>,
        templates: Arc<TemplateEngine>,
        limiter: Arc<RecipientRateLimiter>,
        report_recipients: Vec<String>,
    ) -> Self {
        Self {
            aggregator,
            mailer,
            templates,
            limiter,
            report_recipients,
        }
    }

    pub async fn handle(
        &self,
        location: &str,
        date: NaiveDate,
        finalize: bool,
        ctx: &JobContext,
    ) -> Result<(), QueueError> {
        ctx.progress(10).await;
        let started = std::time::Instant::now();

        let result = self.aggregator.aggregate_day(location, date, finalize).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(aggregation) => {
                IngestMetrics::record_aggregation(location, true, duration_ms);
                info!(
                    location,
                    %date,
                    finalize,
                    avg_aqi = aggregation.avg_aqi,
                    records = aggregation.record_count,
                    missing_hours = aggregation.missing_data_hours.len(),
                    "Aggregation complete"
                );

                ctx.progress(80).await;

                if finalize {
                    self.send_daily_report(&aggregation).await;
                }

                ctx.progress(100).await;
                Ok(())
            }
            // A day with no readings is not an error worth retrying; the
            // next tick covers it
            Err(StatsError::NoData { location, date }) => {
                info!(location = %location, date = %date, "No readings to aggregate");
                ctx.progress(100).await;
                Ok(())
            }
            Err(e) => {
                IngestMetrics::record_aggregation(location, false, duration_ms);
                Err(QueueError::transient(e.to_string()))
            }
        }
    }

    /// Render and send the daily report. Best-effort.
    async fn send_daily_report(&self, aggregation: &DailyAggregation) {
        if self.report_recipients.is_empty() {
            return;
        }

        let data = json!({
            "location": aggregation.location,
            "date": aggregation.date,
            "avg_aqi": aggregation.avg_aqi,
            "level": aggregation.pollution_level.to_string(),
            "max_aqi": aggregation.max_aqi.value,
            "min_aqi": aggregation.min_aqi.value,
            "pollutant": aggregation.dominant_pollutant.to_string(),
            "unhealthy_hours": aggregation.unhealthy_hours,
            "alert_id": "-",
            "triggered_at": aggregation.calculated_at.to_rfc3339(),
        });

        let rendered = match self.templates.render("daily_report", &data) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(error = %e, "Daily report template failed to render");
                return;
            }
        };

        for recipient in &self.report_recipients {
            if !self.limiter.allow(recipient) {
                continue;
            }

            let mut report = Email::new(recipient, &rendered.subject);
            if let Some(ref text) = rendered.body_text {
                report = report.with_text(text.clone());
            }
            if let Some(ref html) = rendered.body_html {
                report = report.with_html(html.clone());
            }

            if let Err(e) = self.mailer.send(&report).await {
                warn!(recipient = %recipient, error = %e, "Daily report email failed");
            }
        }
    }
}
