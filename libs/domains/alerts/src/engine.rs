//! The alert engine: throttle, escalate, persist.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::conditions::{match_signal, AlertSignal, AlertThresholds};
use crate::error::AlertError;
use crate::models::{AlertRecord, AlertStore, ThrottleState};

/// Escalation trips once a condition has fired more than this many times
/// and the previous trigger falls inside the escalation window.
const ESCALATION_COUNT: u32 = 3;

/// Evaluates signals into persisted alerts with throttling and escalation.
///
/// Throttle state is per condition id, guarded by a single mutex.
pub struct AlertEngine<S: AlertStore> {
    store: Arc<S>,
    thresholds: AlertThresholds,
    throttle: Mutex<HashMap<&'static str, ThrottleState>>,
    recipients: Vec<String>,
    escalation_recipients: Vec<String>,
}

impl<S: AlertStore> AlertEngine<S> {
    pub fn new(
        store: Arc<S>,
        thresholds: AlertThresholds,
        recipients: Vec<String>,
        escalation_recipients: Vec<String>,
    ) -> Self {
        Self {
            store,
            thresholds,
            throttle: Mutex::new(HashMap::new()),
            recipients,
            escalation_recipients,
        }
    }

    /// Evaluate a signal now.
    ///
    /// Returns the created alert, or `None` when no condition tripped or
    /// the condition is inside its throttle window.
    pub async fn evaluate(&self, signal: AlertSignal) -> Result<Option<AlertRecord>, AlertError> {
        self.evaluate_at(signal, Utc::now()).await
    }

    /// Evaluate a signal at an explicit instant (backfills, tests).
    #[instrument(skip(self, signal))]
    pub async fn evaluate_at(
        &self,
        signal: AlertSignal,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertRecord>, AlertError> {
        let Some(condition) = match_signal(&self.thresholds, &signal) else {
            return Ok(None);
        };

        // Throttle decision under the lock; persistence happens after.
        let (suppressed, escalated) = {
            let mut throttle = self.throttle.lock().unwrap();

            match throttle.get_mut(condition.id()) {
                Some(state) => {
                    state.count += 1;

                    let since_last = now - state.last_triggered_at;
                    if since_last < condition.throttle_window() {
                        (true, state.escalated)
                    } else {
                        let escalated = state.count > ESCALATION_COUNT
                            && since_last < condition.escalation_window();
                        state.last_triggered_at = now;
                        state.escalated = escalated;
                        (false, escalated)
                    }
                }
                None => {
                    throttle.insert(
                        condition.id(),
                        ThrottleState {
                            last_triggered_at: now,
                            count: 1,
                            escalated: false,
                        },
                    );
                    (false, false)
                }
            }
        };

        if suppressed {
            debug!(
                condition = condition.id(),
                "Alert suppressed by throttle window"
            );
            return Ok(None);
        }

        let mut recipients = self.recipients.clone();
        if escalated {
            recipients.extend(self.escalation_recipients.iter().cloned());
            recipients.dedup();
        }

        let record = AlertRecord {
            id: Uuid::new_v4(),
            condition,
            severity: condition.severity(),
            payload: json!({ "signal": signal }),
            triggered_at: now,
            throttle_key: condition.id().to_string(),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            escalated,
            recipients,
            email_delivery_id: None,
            email_error: None,
        };

        self.store.insert(&record).await?;

        info!(
            alert_id = %record.id,
            condition = condition.id(),
            severity = %record.severity,
            escalated,
            "Alert created"
        );

        Ok(Some(record))
    }

    /// Mark an alert acknowledged by a user.
    pub async fn acknowledge(&self, id: Uuid, user: &str) -> Result<AlertRecord, AlertError> {
        self.store.acknowledge(id, user, Utc::now()).await
    }

    /// Unacknowledged alerts, newest first.
    pub async fn active(&self, limit: i64) -> Result<Vec<AlertRecord>, AlertError> {
        self.store.find_active(limit).await
    }

    /// Record the email dispatch outcome on an alert.
    pub async fn record_email_outcome(
        &self,
        id: Uuid,
        delivery_id: Option<String>,
        error: Option<String>,
    ) -> Result<(), AlertError> {
        self.store.set_email_outcome(id, delivery_id, error).await
    }

    /// Fetch one alert.
    pub async fn get(&self, id: Uuid) -> Result<Option<AlertRecord>, AlertError> {
        self.store.find(id).await
    }

    /// Remove alerts older than `days`. Returns removed count.
    pub async fn clear_older_than(&self, days: i64) -> Result<u64, AlertError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        self.store.delete_older_than(cutoff).await
    }

    /// Current throttle state for a condition id (stats endpoints).
    pub fn throttle_state(&self, condition_id: &str) -> Option<ThrottleState> {
        self.throttle.lock().unwrap().get(condition_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertCondition;
    use async_trait::async_trait;
    use chrono::Duration;

    /// In-memory alert store for engine tests.
    #[derive(Default)]
    struct MemoryAlertStore {
        records: Mutex<Vec<AlertRecord>>,
    }

    #[async_trait]
    impl AlertStore for MemoryAlertStore {
        async fn insert(&self, record: &AlertRecord) -> Result<(), AlertError> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn find(&self, id: Uuid) -> Result<Option<AlertRecord>, AlertError> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.id == id)
                .cloned())
        }

        async fn find_active(&self, limit: i64) -> Result<Vec<AlertRecord>, AlertError> {
            let mut active: Vec<AlertRecord> = self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| !r.acknowledged)
                .cloned()
                .collect();
            active.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
            active.truncate(limit as usize);
            Ok(active)
        }

        async fn acknowledge(
            &self,
            id: Uuid,
            user: &str,
            at: DateTime<Utc>,
        ) -> Result<AlertRecord, AlertError> {
            let mut records = self.records.lock().unwrap();
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(AlertError::NotFound(id))?;
            record.acknowledged = true;
            record.acknowledged_by = Some(user.to_string());
            record.acknowledged_at = Some(at);
            Ok(record.clone())
        }

        async fn set_email_outcome(
            &self,
            id: Uuid,
            delivery_id: Option<String>,
            error: Option<String>,
        ) -> Result<(), AlertError> {
            let mut records = self.records.lock().unwrap();
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(AlertError::NotFound(id))?;
            record.email_delivery_id = delivery_id;
            record.email_error = error;
            Ok(())
        }

        async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AlertError> {
            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|r| r.triggered_at >= cutoff);
            Ok((before - records.len()) as u64)
        }
    }

    fn engine() -> AlertEngine<MemoryAlertStore> {
        AlertEngine::new(
            Arc::new(MemoryAlertStore::default()),
            AlertThresholds::default(),
            vec!["ops@example.com".to_string()],
            vec!["oncall@example.com".to_string()],
        )
    }

    fn extreme_signal() -> AlertSignal {
        AlertSignal::Aqi {
            location: "paris".to_string(),
            value: 210,
        }
    }

    #[tokio::test]
    async fn test_below_threshold_creates_nothing() {
        let engine = engine();
        let signal = AlertSignal::Aqi {
            location: "paris".to_string(),
            value: 80,
        };
        assert!(engine.evaluate(signal).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extreme_aqi_creates_high_severity_alert() {
        let engine = engine();

        let record = engine.evaluate(extreme_signal()).await.unwrap().unwrap();
        assert_eq!(record.condition, AlertCondition::ExtremePollution);
        assert_eq!(record.severity, crate::models::AlertSeverity::High);
        assert!(!record.escalated);
        assert_eq!(record.recipients, vec!["ops@example.com"]);
        assert_eq!(record.throttle_key, "extreme_pollution");
    }

    #[tokio::test]
    async fn test_throttle_window_suppresses_repeats() {
        let engine = engine();
        let t0 = Utc::now();

        let first = engine.evaluate_at(extreme_signal(), t0).await.unwrap();
        assert!(first.is_some());

        // Inside the 30-minute window: suppressed
        let second = engine
            .evaluate_at(extreme_signal(), t0 + Duration::minutes(10))
            .await
            .unwrap();
        assert!(second.is_none());

        // Past the window: a new alert
        let third = engine
            .evaluate_at(extreme_signal(), t0 + Duration::minutes(31))
            .await
            .unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn test_escalation_after_repeated_triggers() {
        let engine = engine();
        let t0 = Utc::now();

        // Trigger every 31 minutes: outside throttle (30m), inside
        // escalation (60m). Counts 1..=4; the 4th trigger has count > 3.
        let mut escalated_seen = false;
        for i in 0..4 {
            let at = t0 + Duration::minutes(31 * i);
            if let Some(record) = engine.evaluate_at(extreme_signal(), at).await.unwrap() {
                if i < 3 {
                    assert!(!record.escalated, "escalated too early at trigger {}", i);
                } else {
                    assert!(record.escalated);
                    assert!(record.recipients.contains(&"oncall@example.com".to_string()));
                    escalated_seen = true;
                }
            }
        }
        assert!(escalated_seen);

        let state = engine.throttle_state("extreme_pollution").unwrap();
        assert!(state.escalated);
        assert_eq!(state.count, 4);
    }

    #[tokio::test]
    async fn test_no_escalation_when_triggers_are_sparse() {
        let engine = engine();
        let t0 = Utc::now();

        // Triggers 2 hours apart: count climbs past 3 but each is outside
        // the 60-minute escalation window.
        for i in 0..5 {
            let at = t0 + Duration::hours(2 * i);
            let record = engine.evaluate_at(extreme_signal(), at).await.unwrap();
            assert!(!record.unwrap().escalated);
        }
    }

    #[tokio::test]
    async fn test_acknowledge_and_active_listing() {
        let engine = engine();

        let record = engine.evaluate(extreme_signal()).await.unwrap().unwrap();
        assert_eq!(engine.active(10).await.unwrap().len(), 1);

        let acked = engine.acknowledge(record.id, "valentina").await.unwrap();
        assert!(acked.acknowledged);
        assert_eq!(acked.acknowledged_by.as_deref(), Some("valentina"));
        assert!(acked.acknowledged_at.is_some());

        assert!(engine.active(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_missing_alert() {
        let engine = engine();
        let result = engine.acknowledge(Uuid::new_v4(), "nobody").await;
        assert!(matches!(result, Err(AlertError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_email_outcome_recorded() {
        let engine = engine();
        let record = engine.evaluate(extreme_signal()).await.unwrap().unwrap();

        engine
            .record_email_outcome(record.id, Some("msg-123".to_string()), None)
            .await
            .unwrap();

        let stored = engine.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.email_delivery_id.as_deref(), Some("msg-123"));
        assert!(stored.email_error.is_none());
    }

    #[tokio::test]
    async fn test_clear_older_than() {
        let engine = engine();
        let old = Utc::now() - Duration::days(40);

        engine.evaluate_at(extreme_signal(), old).await.unwrap();
        engine.evaluate(extreme_signal()).await.unwrap();

        let removed = engine.clear_older_than(30).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(engine.active(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_conditions_throttle_independently() {
        let engine = engine();
        let t0 = Utc::now();

        let extreme = engine.evaluate_at(extreme_signal(), t0).await.unwrap();
        assert!(extreme.is_some());

        let backlog = AlertSignal::QueueBacklog {
            queue: "airQuality".to_string(),
            waiting: 150,
        };
        let backlog_alert = engine.evaluate_at(backlog, t0).await.unwrap();
        assert!(backlog_alert.is_some());
        assert_eq!(
            backlog_alert.unwrap().condition,
            AlertCondition::QueueBacklog
        );
    }
}
