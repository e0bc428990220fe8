use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ReadingError;
use crate::models::{Reading, Tier};

/// Query filters for range reads.
#[derive(Debug, Clone, Default)]
pub struct RangeFilter {
    /// Restrict to one location key.
    pub location: Option<String>,
    /// Restrict to readings at or above this AQI.
    pub min_aqi: Option<i32>,
}

/// Storage operations over the three reading tiers.
///
/// Implementations back each tier with its own collection; the tier is an
/// explicit argument so migration can address source and target uniformly.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Insert a reading into a tier.
    ///
    /// Returns `false` when a record with the same (location, timestamp)
    /// already exists in that tier (write-time dedupe).
    async fn insert(&self, tier: Tier, reading: &Reading) -> Result<bool, ReadingError>;

    /// Readings in `[start, end)` matching the filter, newest first.
    async fn find_range(
        &self,
        tier: Tier,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &RangeFilter,
        limit: i64,
    ) -> Result<Vec<Reading>, ReadingError>;

    /// Most recent reading for a location in a tier.
    async fn latest(&self, tier: Tier, location: &str) -> Result<Option<Reading>, ReadingError>;

    /// Readings strictly older than the cutoff, oldest first (migration scan).
    async fn find_older_than(
        &self,
        tier: Tier,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Reading>, ReadingError>;

    /// Delete specific records by storage identity. Returns deleted count.
    async fn delete_by_ids(&self, tier: Tier, ids: &[Uuid]) -> Result<u64, ReadingError>;

    /// Total records in a tier.
    async fn count(&self, tier: Tier) -> Result<u64, ReadingError>;

    /// Records matching the range filter in `[start, end)` (for totals).
    async fn count_range(
        &self,
        tier: Tier,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &RangeFilter,
    ) -> Result<u64, ReadingError>;
}
