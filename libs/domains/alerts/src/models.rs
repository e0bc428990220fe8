use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::error::AlertError;

/// Alert severity levels.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// The built-in alert conditions.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertCondition {
    ApiFailures,
    HighPollution,
    ExtremePollution,
    QueueBacklog,
    SystemErrorRate,
    StorageUsage,
}

impl AlertCondition {
    /// Stable condition id, also used as the throttle key.
    pub fn id(&self) -> &'static str {
        match self {
            Self::ApiFailures => "api_failures",
            Self::HighPollution => "high_pollution",
            Self::ExtremePollution => "extreme_pollution",
            Self::QueueBacklog => "queue_backlog",
            Self::SystemErrorRate => "system_error_rate",
            Self::StorageUsage => "storage_usage",
        }
    }

    pub fn severity(&self) -> AlertSeverity {
        match self {
            Self::ApiFailures => AlertSeverity::Critical,
            Self::HighPollution => AlertSeverity::Medium,
            Self::ExtremePollution => AlertSeverity::High,
            Self::QueueBacklog => AlertSeverity::Medium,
            Self::SystemErrorRate => AlertSeverity::High,
            Self::StorageUsage => AlertSeverity::Medium,
        }
    }

    /// Minimum interval between two alerts for this condition.
    pub fn throttle_window(&self) -> Duration {
        match self {
            Self::ApiFailures => Duration::minutes(30),
            Self::HighPollution => Duration::minutes(60),
            Self::ExtremePollution => Duration::minutes(30),
            Self::QueueBacklog => Duration::minutes(15),
            Self::SystemErrorRate => Duration::minutes(10),
            Self::StorageUsage => Duration::minutes(60),
        }
    }

    /// Window inside which repeated triggers escalate.
    pub fn escalation_window(&self) -> Duration {
        match self {
            Self::ApiFailures => Duration::minutes(60),
            Self::HighPollution => Duration::minutes(120),
            Self::ExtremePollution => Duration::minutes(60),
            Self::QueueBacklog => Duration::minutes(45),
            Self::SystemErrorRate => Duration::minutes(30),
            Self::StorageUsage => Duration::minutes(180),
        }
    }

    /// Email template rendered when dispatching this condition.
    pub fn template(&self) -> &'static str {
        match self {
            Self::ApiFailures => "api_failures",
            Self::HighPollution => "high_pollution",
            Self::ExtremePollution => "extreme_pollution",
            Self::QueueBacklog => "queue_backlog",
            Self::SystemErrorRate => "system_error",
            Self::StorageUsage => "storage_usage",
        }
    }
}

/// Per-condition throttle bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleState {
    pub last_triggered_at: DateTime<Utc>,
    /// Condition-true evaluations since startup (including suppressed ones).
    pub count: u32,
    pub escalated: bool,
}

/// A persisted alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    #[serde(rename = "_id", alias = "id")]
    pub id: Uuid,
    pub condition: AlertCondition,
    pub severity: AlertSeverity,
    /// Condition-specific context (measured values, job details)
    pub payload: serde_json::Value,
    /// Stored as a BSON date so retention filters and sorts operate on a
    /// real date field.
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub triggered_at: DateTime<Utc>,
    pub throttle_key: String,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub escalated: bool,
    pub recipients: Vec<String>,
    /// Provider message id once the email went out
    pub email_delivery_id: Option<String>,
    /// Dispatch failure detail; the record persists either way
    pub email_error: Option<String>,
}

/// Persistence operations for alerts.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert(&self, record: &AlertRecord) -> Result<(), AlertError>;

    async fn find(&self, id: Uuid) -> Result<Option<AlertRecord>, AlertError>;

    /// Unacknowledged alerts, newest first.
    async fn find_active(&self, limit: i64) -> Result<Vec<AlertRecord>, AlertError>;

    /// Mark an alert acknowledged.
    async fn acknowledge(
        &self,
        id: Uuid,
        user: &str,
        at: DateTime<Utc>,
    ) -> Result<AlertRecord, AlertError>;

    /// Record the email dispatch outcome on an alert.
    async fn set_email_outcome(
        &self,
        id: Uuid,
        delivery_id: Option<String>,
        error: Option<String>,
    ) -> Result<(), AlertError>;

    /// Remove alerts triggered before the cutoff. Returns removed count.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AlertError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_table() {
        let cases = [
            (AlertCondition::ApiFailures, AlertSeverity::Critical, 30, 60),
            (AlertCondition::HighPollution, AlertSeverity::Medium, 60, 120),
            (AlertCondition::ExtremePollution, AlertSeverity::High, 30, 60),
            (AlertCondition::QueueBacklog, AlertSeverity::Medium, 15, 45),
            (AlertCondition::SystemErrorRate, AlertSeverity::High, 10, 30),
            (AlertCondition::StorageUsage, AlertSeverity::Medium, 60, 180),
        ];

        for (condition, severity, throttle_min, escalate_min) in cases {
            assert_eq!(condition.severity(), severity, "{:?}", condition);
            assert_eq!(
                condition.throttle_window(),
                Duration::minutes(throttle_min),
                "{:?}",
                condition
            );
            assert_eq!(
                condition.escalation_window(),
                Duration::minutes(escalate_min),
                "{:?}",
                condition
            );
        }
    }

    #[test]
    fn test_condition_ids() {
        assert_eq!(AlertCondition::ApiFailures.id(), "api_failures");
        assert_eq!(AlertCondition::ExtremePollution.id(), "extreme_pollution");
        assert_eq!(AlertCondition::SystemErrorRate.id(), "system_error_rate");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Critical > AlertSeverity::High);
        assert!(AlertSeverity::High > AlertSeverity::Medium);
        assert!(AlertSeverity::Medium > AlertSeverity::Low);
    }

    #[test]
    fn test_condition_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AlertCondition::HighPollution).unwrap(),
            "\"high_pollution\""
        );
    }
}
