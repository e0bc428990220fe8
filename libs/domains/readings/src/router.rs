//! Smart query router over the storage tiers.
//!
//! The 30-day and 365-day retention boundaries partition time; a range read
//! only touches the tiers its window intersects. Tier queries run in
//! parallel, results merge newest-first, and the merged set truncates to
//! the caller's limit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::cache::ReadingCache;
use crate::error::ReadingError;
use crate::migration::{HOT_RETENTION, WARM_RETENTION};
use crate::models::{Reading, Tier};
use crate::repository::{RangeFilter, ReadingStore};

const LATEST_CACHE_TTL: Duration = Duration::from_secs(60);

/// Per-tier row counts contributing to a range result.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TierCounts {
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
}

/// Result of a routed range query.
#[derive(Debug, Clone, Serialize)]
pub struct RangeResult {
    pub rows: Vec<Reading>,
    pub sources: TierCounts,
    pub total_count: u64,
    pub execution_time_ms: u64,
}

/// Tiers whose retention window intersects `[start, end)`.
///
/// Hot holds everything newer than 30 days, warm 30-365 days, cold older.
pub fn tiers_for_range(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<Tier> {
    let hot_floor = now - HOT_RETENTION;
    let warm_floor = now - WARM_RETENTION;
    let mut tiers = Vec::new();

    if end > hot_floor {
        tiers.push(Tier::Hot);
    }
    if start < hot_floor && end > warm_floor {
        tiers.push(Tier::Warm);
    }
    if start < warm_floor {
        tiers.push(Tier::Cold);
    }

    tiers
}

/// Routes reads across the tiers with caching.
pub struct QueryRouter<S: ReadingStore> {
    store: Arc<S>,
    cache: ReadingCache,
}

impl<S: ReadingStore> QueryRouter<S> {
    pub fn new(store: Arc<S>, cache: ReadingCache) -> Self {
        Self { store, cache }
    }

    /// Range query fanned out to the intersecting tiers.
    #[instrument(skip(self, filter))]
    pub async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &RangeFilter,
        limit: i64,
    ) -> Result<RangeResult, ReadingError> {
        let started = std::time::Instant::now();
        let tiers = tiers_for_range(start, end, Utc::now());

        debug!(?tiers, %start, %end, limit, "Routing range query");

        let mut rows = Vec::new();
        let mut sources = TierCounts::default();
        let mut total_count = 0u64;

        // Up to three tiers; issue the per-tier reads in parallel
        let mut fetches = Vec::with_capacity(tiers.len());
        for tier in &tiers {
            fetches.push(self.store.find_range(*tier, start, end, filter, limit));
        }
        let mut counts = Vec::with_capacity(tiers.len());
        for tier in &tiers {
            counts.push(self.store.count_range(*tier, start, end, filter));
        }

        let fetched = futures_util::future::try_join_all(fetches).await?;
        let counted = futures_util::future::try_join_all(counts).await?;

        for ((tier, tier_rows), tier_count) in tiers.iter().zip(fetched).zip(counted) {
            match tier {
                Tier::Hot => sources.hot = tier_rows.len(),
                Tier::Warm => sources.warm = tier_rows.len(),
                Tier::Cold => sources.cold = tier_rows.len(),
            }
            total_count += tier_count;
            rows.extend(tier_rows);
        }

        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows.truncate(limit.max(0) as usize);

        Ok(RangeResult {
            rows,
            sources,
            total_count,
            execution_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Latest reading for a location: probe hot -> warm -> cold, first hit
    /// wins. The hit is cached briefly under `latest:{location}`.
    #[instrument(skip(self))]
    pub async fn latest_for(&self, location: &str) -> Result<Option<Reading>, ReadingError> {
        let cache_key = format!("latest:{}", location);

        if let Some(cached) = self.cache.get::<Reading>(&cache_key).await? {
            debug!(location, "Latest reading served from cache");
            return Ok(Some(cached));
        }

        for tier in [Tier::Hot, Tier::Warm, Tier::Cold] {
            if let Some(reading) = self.store.latest(tier, location).await? {
                self.cache
                    .set(&cache_key, &reading, LATEST_CACHE_TTL)
                    .await?;
                return Ok(Some(reading));
            }
        }

        Ok(None)
    }

    /// Invalidate cached reads under a key prefix.
    pub async fn invalidate(&self, prefix: &str) -> Result<usize, ReadingError> {
        self.cache.invalidate(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_recent_range_hits_hot_only() {
        let tiers = tiers_for_range(now() - ChronoDuration::days(7), now(), now());
        assert_eq!(tiers, vec![Tier::Hot]);
    }

    #[test]
    fn test_mid_range_hits_hot_and_warm() {
        let tiers = tiers_for_range(now() - ChronoDuration::days(90), now(), now());
        assert_eq!(tiers, vec![Tier::Hot, Tier::Warm]);
    }

    #[test]
    fn test_full_range_hits_all_tiers() {
        let tiers = tiers_for_range(now() - ChronoDuration::days(800), now(), now());
        assert_eq!(tiers, vec![Tier::Hot, Tier::Warm, Tier::Cold]);
    }

    #[test]
    fn test_warm_only_window() {
        let tiers = tiers_for_range(
            now() - ChronoDuration::days(200),
            now() - ChronoDuration::days(60),
            now(),
        );
        assert_eq!(tiers, vec![Tier::Warm]);
    }

    #[test]
    fn test_cold_only_window() {
        let tiers = tiers_for_range(
            now() - ChronoDuration::days(900),
            now() - ChronoDuration::days(400),
            now(),
        );
        assert_eq!(tiers, vec![Tier::Cold]);
    }

    #[test]
    fn test_warm_cold_window() {
        let tiers = tiers_for_range(
            now() - ChronoDuration::days(900),
            now() - ChronoDuration::days(60),
            now(),
        );
        assert_eq!(tiers, vec![Tier::Warm, Tier::Cold]);
    }
}
