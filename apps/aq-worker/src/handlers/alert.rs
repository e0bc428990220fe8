//! Alert dispatch handler: render the template and send the email.

use domain_alerts::{AlertCondition, AlertEngine, AlertRecord, MongoAlertStore};
use domain_readings::PollutionLevel;
use email::{Email, EmailPriority, EmailProvider, TemplateEngine};
use jobqueue::{CircuitBreaker, JobContext, QueueError, RecipientRateLimiter};
use observability::IngestMetrics;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct AlertHandler {
    alerts: Arc<AlertEngine<MongoAlertStore>>,
    mailer: Arc<dyn EmailProvider>,
    templates: Arc<TemplateEngine>,
    limiter: Arc<RecipientRateLimiter>,
    breaker: Arc<CircuitBreaker>,
}

impl AlertHandler {
    pub fn new(
        alerts: Arc<AlertEngine<MongoAlertStore>>,
        mailer: Arc<dyn EmailProvider>,
        templates: Arc<TemplateEngine>,
        limiter: Arc<RecipientRateLimiter>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            alerts,
            mailer,
            templates,
            limiter,
            breaker,
        }
    }

    pub async fn handle(&self, alert_id: Uuid, ctx: &JobContext) -> Result<(), QueueError> {
        ctx.progress(10).await;

        let record = self
            .alerts
            .get(alert_id)
            .await
            .map_err(|e| QueueError::transient(e.to_string()))?
            .ok_or_else(|| QueueError::permanent(format!("alert {} not found", alert_id)))?;

        // A retried job after a partial dispatch must not re-send
        if record.email_delivery_id.is_some() {
            info!(alert_id = %alert_id, "Alert email already dispatched, skipping");
            return Ok(());
        }

        let data = self.template_data(&record);
        let rendered = self
            .templates
            .render(record.condition.template(), &data)
            .map_err(|e| QueueError::permanent(format!("template error: {}", e)))?;

        ctx.progress(40).await;

        let mut delivery_id: Option<String> = None;
        let mut errors: Vec<String> = Vec::new();
        let mut skipped = 0usize;

        for recipient in &record.recipients {
            if !self.limiter.allow(recipient) {
                // Quota exhausted: skip silently, no side effects
                skipped += 1;
                continue;
            }

            let mut email = Email::new(recipient, &rendered.subject);
            if let Some(ref text) = rendered.body_text {
                email = email.with_text(text.clone());
            }
            if let Some(ref html) = rendered.body_html {
                email = email.with_html(html.clone());
            }
            if record.severity >= domain_alerts::AlertSeverity::High {
                email = email.with_priority(EmailPriority::High);
            }

            match self.mailer.send(&email).await {
                Ok(result) => {
                    IngestMetrics::record_alert_email(true);
                    if delivery_id.is_none() {
                        delivery_id = Some(result.message_id);
                    }
                }
                Err(e) => {
                    IngestMetrics::record_alert_email(false);
                    warn!(alert_id = %alert_id, recipient = %recipient, error = %e, "Alert email failed");
                    errors.push(format!("{}: {}", recipient, e));
                }
            }
        }

        ctx.progress(90).await;

        let error_summary = if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        };

        // The record persists with the dispatch outcome either way
        self.alerts
            .record_email_outcome(alert_id, delivery_id.clone(), error_summary.clone())
            .await
            .map_err(|e| QueueError::transient(e.to_string()))?;

        info!(
            alert_id = %alert_id,
            condition = record.condition.id(),
            delivered = delivery_id.is_some(),
            failures = errors.len(),
            rate_limited = skipped,
            "Alert dispatch finished"
        );

        if delivery_id.is_none() && !errors.is_empty() {
            // Nothing went out; let the queue retry up to the email budget
            return Err(QueueError::transient(format!(
                "alert dispatch failed: {}",
                error_summary.unwrap_or_default()
            )));
        }

        ctx.progress(100).await;
        Ok(())
    }

    /// Flatten the alert's signal payload into template variables.
    fn template_data(&self, record: &AlertRecord) -> Value {
        let signal_value = record
            .payload
            .get("signal")
            .and_then(|s| s.get("value"))
            .cloned()
            .unwrap_or(Value::Null);

        let mut data = json!({
            "alert_id": record.id.to_string(),
            "triggered_at": record.triggered_at.to_rfc3339(),
            "severity": record.severity.to_string(),
            "escalated": record.escalated,
        });

        match record.condition {
            AlertCondition::HighPollution | AlertCondition::ExtremePollution => {
                let aqi = signal_value
                    .get("value")
                    .and_then(Value::as_i64)
                    .unwrap_or(0) as i32;
                data["location"] = signal_value
                    .get("location")
                    .cloned()
                    .unwrap_or(Value::String("unknown".into()));
                data["aqi"] = json!(aqi);
                data["level"] = json!(PollutionLevel::from_aqi(aqi).to_string());
                data["pollutant"] = signal_value
                    .get("pollutant")
                    .cloned()
                    .unwrap_or(Value::String("p2".into()));
            }
            AlertCondition::ApiFailures => {
                data["streak"] = signal_value;
                data["breaker_state"] = json!(format!("{:?}", self.breaker.state()));
            }
            AlertCondition::QueueBacklog => {
                data["queue"] = signal_value
                    .get("queue")
                    .cloned()
                    .unwrap_or(Value::String("airQuality".into()));
                data["waiting"] = signal_value.get("waiting").cloned().unwrap_or(json!(0));
            }
            AlertCondition::SystemErrorRate => {
                data["queue"] = signal_value
                    .get("queue")
                    .cloned()
                    .unwrap_or(Value::String("airQuality".into()));
                let rate = signal_value
                    .get("rate")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                data["rate"] = json!(format!("{:.1}%", rate * 100.0));
            }
            AlertCondition::StorageUsage => {
                let usage = signal_value
                    .get("usage")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                data["usage_pct"] = json!(format!("{:.0}", usage * 100.0));
            }
        }

        data
    }
}
