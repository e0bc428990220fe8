//! Pipeline job definitions.
//!
//! One tagged enum covers every job kind on the airQuality queue; the
//! dispatcher routes on the tag. Each variant carries a typed payload plus
//! the shared envelope (identity, attempts, correlation).

use chrono::{DateTime, NaiveDate, Utc};
use domain_readings::MigrationPhase;
use jobqueue::{DedupeSet, Priority, QueueDef, QueueJob};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::CityTarget;

/// The single logical queue this worker drains.
pub struct AirQualityQueue;

impl QueueDef for AirQualityQueue {
    const QUEUE_NAME: &'static str = "airQuality";
    const STREAM_PREFIX: &'static str = "aq:jobs";
    const CONSUMER_GROUP: &'static str = "aq_workers";
}

/// Shared job bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: Uuid,
    pub correlation_id: Uuid,
    #[serde(default)]
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl JobEnvelope {
    fn new(max_attempts: u32) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            correlation_id: id,
            attempts: 0,
            max_attempts,
            created_at: Utc::now(),
        }
    }

    /// Continue an existing correlation (follow-up jobs).
    fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// All job kinds handled by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AqJob {
    /// Fetch the current reading for a city and persist it to the hot tier.
    Fetch {
        envelope: JobEnvelope,
        city: CityTarget,
    },
    /// Aggregate one (location, date); `finalize` controls the UPSERT.
    AggregateDaily {
        envelope: JobEnvelope,
        location: String,
        date: NaiveDate,
        finalize: bool,
    },
    /// Render and dispatch the email for a persisted alert.
    SendAlert {
        envelope: JobEnvelope,
        alert_id: Uuid,
    },
    /// Run one tier migration phase.
    Migrate {
        envelope: JobEnvelope,
        phase: MigrationPhase,
    },
    /// Remove aged queue entries, DLQ items, and alerts.
    Cleanup {
        envelope: JobEnvelope,
        older_than_days: i64,
    },
}

impl AqJob {
    pub fn fetch(city: CityTarget, max_attempts: u32) -> Self {
        Self::Fetch {
            envelope: JobEnvelope::new(max_attempts),
            city,
        }
    }

    pub fn aggregate_daily(
        location: impl Into<String>,
        date: NaiveDate,
        finalize: bool,
        max_attempts: u32,
    ) -> Self {
        Self::AggregateDaily {
            envelope: JobEnvelope::new(max_attempts),
            location: location.into(),
            date,
            finalize,
        }
    }

    pub fn send_alert(alert_id: Uuid, max_attempts: u32, correlation_id: Uuid) -> Self {
        Self::SendAlert {
            envelope: JobEnvelope::new(max_attempts).with_correlation(correlation_id),
            alert_id,
        }
    }

    pub fn migrate(phase: MigrationPhase, max_attempts: u32) -> Self {
        Self::Migrate {
            envelope: JobEnvelope::new(max_attempts),
            phase,
        }
    }

    pub fn cleanup(older_than_days: i64, max_attempts: u32) -> Self {
        Self::Cleanup {
            envelope: JobEnvelope::new(max_attempts),
            older_than_days,
        }
    }

    fn envelope(&self) -> &JobEnvelope {
        match self {
            Self::Fetch { envelope, .. }
            | Self::AggregateDaily { envelope, .. }
            | Self::SendAlert { envelope, .. }
            | Self::Migrate { envelope, .. }
            | Self::Cleanup { envelope, .. } => envelope,
        }
    }

    fn envelope_mut(&mut self) -> &mut JobEnvelope {
        match self {
            Self::Fetch { envelope, .. }
            | Self::AggregateDaily { envelope, .. }
            | Self::SendAlert { envelope, .. }
            | Self::Migrate { envelope, .. }
            | Self::Cleanup { envelope, .. } => envelope,
        }
    }
}

impl QueueJob for AqJob {
    fn job_id(&self) -> String {
        self.envelope().id.to_string()
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::AggregateDaily { .. } => "aggregate_daily",
            Self::SendAlert { .. } => "send_alert",
            Self::Migrate { .. } => "migrate",
            Self::Cleanup { .. } => "cleanup",
        }
    }

    fn priority(&self) -> Priority {
        match self {
            Self::Fetch { .. } => Priority::High,
            Self::AggregateDaily { .. } => Priority::Normal,
            Self::SendAlert { .. } => Priority::Urgent,
            Self::Migrate { .. } => Priority::Low,
            Self::Cleanup { .. } => Priority::Low,
        }
    }

    fn attempts(&self) -> u32 {
        self.envelope().attempts
    }

    fn with_attempt(&self) -> Self {
        let mut next = self.clone();
        next.envelope_mut().attempts += 1;
        next
    }

    fn max_attempts(&self) -> u32 {
        self.envelope().max_attempts
    }

    fn correlation_id(&self) -> String {
        self.envelope().correlation_id.to_string()
    }
}

/// Bucketed dedupe keys: `<jobname>-<floor(now/period)>`.
///
/// A scheduler tick and a manual run inside the same bucket collapse to one
/// enqueue.
pub mod dedupe_keys {
    use super::*;

    fn now_ms() -> u64 {
        Utc::now().timestamp_millis() as u64
    }

    /// fetch-<location>-<minute bucket>, e.g. "paris-fetch-29433600"
    pub fn fetch(location: &str) -> String {
        DedupeSet::bucket_key(
            &format!("{}-fetch", location),
            now_ms(),
            Duration::from_secs(60),
        )
    }

    /// hourly aggregation bucket
    pub fn hourly_aggregation(location: &str) -> String {
        DedupeSet::bucket_key(
            &format!("{}-hourly-agg", location),
            now_ms(),
            Duration::from_secs(3600),
        )
    }

    /// daily finalize bucket
    pub fn finalize_daily(location: &str) -> String {
        DedupeSet::bucket_key(
            &format!("{}-finalize", location),
            now_ms(),
            Duration::from_secs(24 * 3600),
        )
    }

    /// migration bucket (per phase, per day)
    pub fn migration(phase: MigrationPhase) -> String {
        DedupeSet::bucket_key(
            &format!("migrate-{}", phase.as_str()),
            now_ms(),
            Duration::from_secs(24 * 3600),
        )
    }

    /// weekly cleanup bucket
    pub fn cleanup() -> String {
        DedupeSet::bucket_key("cleanup", now_ms(), Duration::from_secs(7 * 24 * 3600))
    }
}
