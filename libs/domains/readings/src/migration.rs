//! Tier migration: moving aged records hot -> warm -> cold.
//!
//! Each batch is SELECT below cutoff, INSERT into the target with a fresh
//! identity, then DELETE the selected ids from the source. A failed insert
//! skips the delete for that record, so a record is never lost; at worst it
//! is retried on the next run. Duplicate-key inserts (from a previous
//! partial batch) count as already-migrated and still delete the source row.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::ReadingError;
use crate::models::Tier;
use crate::repository::ReadingStore;

/// Records older than this move out of the hot tier.
pub const HOT_RETENTION: Duration = Duration::days(30);

/// Records older than this move out of the warm tier.
pub const WARM_RETENTION: Duration = Duration::days(365);

/// Which migration is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    HotToWarm,
    WarmToCold,
}

impl MigrationPhase {
    pub fn source(&self) -> Tier {
        match self {
            Self::HotToWarm => Tier::Hot,
            Self::WarmToCold => Tier::Warm,
        }
    }

    pub fn target(&self) -> Tier {
        match self {
            Self::HotToWarm => Tier::Warm,
            Self::WarmToCold => Tier::Cold,
        }
    }

    /// Cutoff timestamp: records strictly older than this are moved.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::HotToWarm => now - HOT_RETENTION,
            Self::WarmToCold => now - WARM_RETENTION,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HotToWarm => "hot_to_warm",
            Self::WarmToCold => "warm_to_cold",
        }
    }
}

/// Result of one migration run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationStats {
    pub migrated: usize,
    pub deleted: usize,
    pub errors: usize,
    pub duration_ms: u64,
}

/// Drives batched tier migrations against a ReadingStore.
pub struct TierMigrator<S: ReadingStore> {
    store: Arc<S>,
    batch_size: i64,
}

impl<S: ReadingStore> TierMigrator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            batch_size: 500,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run one full migration pass for the phase, batching until the source
    /// has no records older than the cutoff.
    pub async fn run(&self, phase: MigrationPhase) -> Result<MigrationStats, ReadingError> {
        let started = std::time::Instant::now();
        let cutoff = phase.cutoff(Utc::now());
        let mut stats = MigrationStats::default();

        info!(
            phase = phase.as_str(),
            cutoff = %cutoff,
            batch_size = self.batch_size,
            "Starting tier migration"
        );

        loop {
            let batch = self
                .store
                .find_older_than(phase.source(), cutoff, self.batch_size)
                .await?;

            if batch.is_empty() {
                break;
            }

            let mut migrated_ids = Vec::with_capacity(batch.len());

            for reading in &batch {
                let moved = reading.with_new_identity();
                match self.store.insert(phase.target(), &moved).await {
                    // true = inserted, false = already present in target;
                    // either way the source row is safe to delete
                    Ok(_) => {
                        stats.migrated += 1;
                        migrated_ids.push(reading.id);
                    }
                    Err(e) => {
                        warn!(
                            phase = phase.as_str(),
                            reading_id = %reading.id,
                            error = %e,
                            "Failed to copy record into target tier"
                        );
                        stats.errors += 1;
                    }
                }
            }

            let deleted = self
                .store
                .delete_by_ids(phase.source(), &migrated_ids)
                .await?;
            stats.deleted += deleted as usize;

            // Short batch means the scan is exhausted
            if (batch.len() as i64) < self.batch_size {
                break;
            }
        }

        stats.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            phase = phase.as_str(),
            migrated = stats.migrated,
            deleted = stats.deleted,
            errors = stats.errors,
            duration_ms = stats.duration_ms,
            "Tier migration complete"
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coordinates, Pollutant, Reading, ReadingMetadata, WeatherSnapshot};
    use crate::repository::RangeFilter;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// In-memory store exercising the migration contract.
    #[derive(Default)]
    struct MemoryStore {
        tiers: Mutex<HashMap<Tier, Vec<Reading>>>,
        fail_inserts_for: Mutex<Vec<DateTime<Utc>>>,
    }

    impl MemoryStore {
        fn seed(&self, tier: Tier, readings: Vec<Reading>) {
            self.tiers.lock().unwrap().insert(tier, readings);
        }

        fn all(&self, tier: Tier) -> Vec<Reading> {
            self.tiers
                .lock()
                .unwrap()
                .get(&tier)
                .cloned()
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl ReadingStore for MemoryStore {
        async fn insert(&self, tier: Tier, reading: &Reading) -> Result<bool, ReadingError> {
            if self
                .fail_inserts_for
                .lock()
                .unwrap()
                .contains(&reading.timestamp)
            {
                return Err(ReadingError::Invalid("simulated insert failure".into()));
            }
            let mut tiers = self.tiers.lock().unwrap();
            let records = tiers.entry(tier).or_default();
            if records
                .iter()
                .any(|r| r.location == reading.location && r.timestamp == reading.timestamp)
            {
                return Ok(false);
            }
            records.push(reading.clone());
            Ok(true)
        }

        async fn find_range(
            &self,
            tier: Tier,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            _filter: &RangeFilter,
            limit: i64,
        ) -> Result<Vec<Reading>, ReadingError> {
            let mut rows: Vec<Reading> = self
                .all(tier)
                .into_iter()
                .filter(|r| r.timestamp >= start && r.timestamp < end)
                .collect();
            rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            rows.truncate(limit as usize);
            Ok(rows)
        }

        async fn latest(
            &self,
            tier: Tier,
            location: &str,
        ) -> Result<Option<Reading>, ReadingError> {
            Ok(self
                .all(tier)
                .into_iter()
                .filter(|r| r.location == location)
                .max_by_key(|r| r.timestamp))
        }

        async fn find_older_than(
            &self,
            tier: Tier,
            cutoff: DateTime<Utc>,
            limit: i64,
        ) -> Result<Vec<Reading>, ReadingError> {
            let mut rows: Vec<Reading> = self
                .all(tier)
                .into_iter()
                .filter(|r| r.timestamp < cutoff)
                .collect();
            rows.sort_by_key(|r| r.timestamp);
            rows.truncate(limit as usize);
            Ok(rows)
        }

        async fn delete_by_ids(&self, tier: Tier, ids: &[Uuid]) -> Result<u64, ReadingError> {
            let mut tiers = self.tiers.lock().unwrap();
            let records = tiers.entry(tier).or_default();
            let before = records.len();
            records.retain(|r| !ids.contains(&r.id));
            Ok((before - records.len()) as u64)
        }

        async fn count(&self, tier: Tier) -> Result<u64, ReadingError> {
            Ok(self.all(tier).len() as u64)
        }

        async fn count_range(
            &self,
            tier: Tier,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            filter: &RangeFilter,
        ) -> Result<u64, ReadingError> {
            Ok(self
                .find_range(tier, start, end, filter, i64::MAX)
                .await?
                .len() as u64)
        }
    }

    fn reading_aged(days_old: i64) -> Reading {
        Reading::new(
            "paris",
            Utc::now() - Duration::days(days_old),
            Coordinates::new(48.85, 2.35).unwrap(),
            60,
            Pollutant::P2,
            WeatherSnapshot {
                humidity: 55.0,
                ..Default::default()
            },
            ReadingMetadata::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_phase_tiers_and_cutoffs() {
        let now = Utc::now();
        assert_eq!(MigrationPhase::HotToWarm.source(), Tier::Hot);
        assert_eq!(MigrationPhase::HotToWarm.target(), Tier::Warm);
        assert_eq!(MigrationPhase::HotToWarm.cutoff(now), now - Duration::days(30));
        assert_eq!(MigrationPhase::WarmToCold.source(), Tier::Warm);
        assert_eq!(MigrationPhase::WarmToCold.target(), Tier::Cold);
        assert_eq!(
            MigrationPhase::WarmToCold.cutoff(now),
            now - Duration::days(365)
        );
    }

    #[tokio::test]
    async fn test_migration_moves_only_aged_records() {
        let store = Arc::new(MemoryStore::default());
        let old = reading_aged(31);
        let fresh = reading_aged(29);
        store.seed(Tier::Hot, vec![old.clone(), fresh.clone()]);

        let migrator = TierMigrator::new(Arc::clone(&store));
        let stats = migrator.run(MigrationPhase::HotToWarm).await.unwrap();

        assert_eq!(stats.migrated, 1);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.errors, 0);

        let hot = store.all(Tier::Hot);
        let warm = store.all(Tier::Warm);
        assert_eq!(hot.len(), 1);
        assert_eq!(hot[0].timestamp, fresh.timestamp);
        assert_eq!(warm.len(), 1);
        assert_eq!(warm[0].timestamp, old.timestamp);
        // Moved record gets a new identity
        assert_ne!(warm[0].id, old.id);
    }

    #[tokio::test]
    async fn test_migration_never_loses_records() {
        let store = Arc::new(MemoryStore::default());
        let failing = reading_aged(40);
        let ok = reading_aged(45);
        store
            .fail_inserts_for
            .lock()
            .unwrap()
            .push(failing.timestamp);
        store.seed(Tier::Hot, vec![failing.clone(), ok.clone()]);

        let migrator = TierMigrator::new(Arc::clone(&store));
        let stats = migrator.run(MigrationPhase::HotToWarm).await.unwrap();

        assert_eq!(stats.migrated, 1);
        assert_eq!(stats.errors, 1);

        // The failed record stays in hot; union count is unchanged
        let total = store.all(Tier::Hot).len() + store.all(Tier::Warm).len();
        assert_eq!(total, 2);
        assert!(store
            .all(Tier::Hot)
            .iter()
            .any(|r| r.timestamp == failing.timestamp));
    }

    #[tokio::test]
    async fn test_migration_batches_until_exhausted() {
        let store = Arc::new(MemoryStore::default());
        let mut records = Vec::new();
        for i in 0..7 {
            let mut r = reading_aged(40);
            r.timestamp += Duration::seconds(i);
            records.push(r);
        }
        store.seed(Tier::Hot, records);

        let migrator = TierMigrator::new(Arc::clone(&store)).with_batch_size(3);
        let stats = migrator.run(MigrationPhase::HotToWarm).await.unwrap();

        assert_eq!(stats.migrated, 7);
        assert_eq!(store.all(Tier::Hot).len(), 0);
        assert_eq!(store.all(Tier::Warm).len(), 7);
    }

    #[tokio::test]
    async fn test_rerun_after_partial_batch_is_idempotent() {
        let store = Arc::new(MemoryStore::default());
        let old = reading_aged(40);
        store.seed(Tier::Hot, vec![old.clone()]);
        // Simulate a previous run that copied but failed to delete
        store.seed(Tier::Warm, vec![old.with_new_identity()]);

        let migrator = TierMigrator::new(Arc::clone(&store));
        let stats = migrator.run(MigrationPhase::HotToWarm).await.unwrap();

        // Insert reports duplicate, source row still gets cleaned up
        assert_eq!(stats.migrated, 1);
        assert_eq!(stats.deleted, 1);
        assert_eq!(store.all(Tier::Hot).len(), 0);
        assert_eq!(store.all(Tier::Warm).len(), 1);
    }
}
