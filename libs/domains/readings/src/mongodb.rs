//! MongoDB implementation of the tiered ReadingStore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, to_bson, Bson, Document},
    options::IndexOptions,
    Collection, Database, IndexModel,
};
use tracing::instrument;
use uuid::Uuid;

use crate::error::ReadingError;
use crate::models::{Reading, Tier};
use crate::repository::{RangeFilter, ReadingStore};

/// MongoDB-backed reading store over the three tier collections.
pub struct MongoReadingStore {
    hot: Collection<Reading>,
    warm: Collection<Reading>,
    cold: Collection<Reading>,
}

impl MongoReadingStore {
    pub fn new(db: &Database) -> Self {
        Self {
            hot: db.collection::<Reading>(Tier::Hot.collection()),
            warm: db.collection::<Reading>(Tier::Warm.collection()),
            cold: db.collection::<Reading>(Tier::Cold.collection()),
        }
    }

    fn collection(&self, tier: Tier) -> &Collection<Reading> {
        match tier {
            Tier::Hot => &self.hot,
            Tier::Warm => &self.warm,
            Tier::Cold => &self.cold,
        }
    }

    /// Initialize per-tier indexes.
    ///
    /// - hot: unique (location, timestamp desc) dedupe index, 2dsphere on
    ///   coordinates, partial index on aqi >= 100
    /// - warm: (location, timestamp desc), TTL 365 days on timestamp
    /// - cold: (timestamp desc) only
    pub async fn init_indexes(&self) -> Result<(), ReadingError> {
        let dedupe_index = |name: &str| {
            IndexModel::builder()
                .keys(doc! { "location": 1, "timestamp": -1 })
                .options(
                    IndexOptions::builder()
                        .unique(true)
                        .name(name.to_string())
                        .build(),
                )
                .build()
        };

        let hot_indexes = vec![
            dedupe_index("idx_location_timestamp_unique"),
            IndexModel::builder()
                .keys(doc! { "coordinates": "2dsphere" })
                .options(
                    IndexOptions::builder()
                        .name("idx_coordinates_geo".to_string())
                        .build(),
                )
                .build(),
            // Partial index keeps elevated-pollution scans cheap
            IndexModel::builder()
                .keys(doc! { "aqi": -1 })
                .options(
                    IndexOptions::builder()
                        .partial_filter_expression(doc! { "aqi": { "$gte": 100 } })
                        .name("idx_elevated_aqi".to_string())
                        .build(),
                )
                .build(),
        ];
        self.hot.create_indexes(hot_indexes).await?;

        let warm_indexes = vec![
            dedupe_index("idx_location_timestamp_unique"),
            IndexModel::builder()
                .keys(doc! { "timestamp": 1 })
                .options(
                    IndexOptions::builder()
                        .expire_after(std::time::Duration::from_secs(365 * 24 * 3600))
                        .name("idx_timestamp_ttl".to_string())
                        .build(),
                )
                .build(),
        ];
        self.warm.create_indexes(warm_indexes).await?;

        let cold_indexes = vec![IndexModel::builder()
            .keys(doc! { "timestamp": -1 })
            .options(
                IndexOptions::builder()
                    .name("idx_timestamp".to_string())
                    .build(),
            )
            .build()];
        self.cold.create_indexes(cold_indexes).await?;

        tracing::info!("Reading tier indexes created successfully");
        Ok(())
    }

    fn build_filter(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        filter: &RangeFilter,
    ) -> Document {
        let mut doc = doc! {};

        if start.is_some() || end.is_some() {
            let mut ts = doc! {};
            if let Some(start) = start {
                ts.insert("$gte", Bson::DateTime(start.into()));
            }
            if let Some(end) = end {
                ts.insert("$lt", Bson::DateTime(end.into()));
            }
            doc.insert("timestamp", ts);
        }

        if let Some(ref location) = filter.location {
            doc.insert("location", location);
        }

        if let Some(min_aqi) = filter.min_aqi {
            doc.insert("aqi", doc! { "$gte": min_aqi });
        }

        doc
    }
}

#[async_trait]
impl ReadingStore for MongoReadingStore {
    #[instrument(skip(self, reading), fields(location = %reading.location, tier = %tier))]
    async fn insert(&self, tier: Tier, reading: &Reading) -> Result<bool, ReadingError> {
        match self.collection(tier).insert_one(reading).await {
            Ok(_) => Ok(true),
            Err(e) => {
                let wrapped = ReadingError::Mongo(e);
                if wrapped.is_duplicate_key() {
                    tracing::debug!(
                        location = %reading.location,
                        timestamp = %reading.timestamp,
                        "Duplicate reading, skipping insert"
                    );
                    Ok(false)
                } else {
                    Err(wrapped)
                }
            }
        }
    }

    #[instrument(skip(self, filter))]
    async fn find_range(
        &self,
        tier: Tier,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &RangeFilter,
        limit: i64,
    ) -> Result<Vec<Reading>, ReadingError> {
        let mongo_filter = Self::build_filter(Some(start), Some(end), filter);

        let options = mongodb::options::FindOptions::builder()
            .limit(limit)
            .sort(doc! { "timestamp": -1 })
            .build();

        let cursor = self
            .collection(tier)
            .find(mongo_filter)
            .with_options(options)
            .await?;
        let readings: Vec<Reading> = cursor.try_collect().await?;

        Ok(readings)
    }

    #[instrument(skip(self))]
    async fn latest(&self, tier: Tier, location: &str) -> Result<Option<Reading>, ReadingError> {
        let options = mongodb::options::FindOneOptions::builder()
            .sort(doc! { "timestamp": -1 })
            .build();

        let reading = self
            .collection(tier)
            .find_one(doc! { "location": location })
            .with_options(options)
            .await?;

        Ok(reading)
    }

    #[instrument(skip(self))]
    async fn find_older_than(
        &self,
        tier: Tier,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Reading>, ReadingError> {
        let filter = doc! { "timestamp": { "$lt": Bson::DateTime(cutoff.into()) } };

        let options = mongodb::options::FindOptions::builder()
            .limit(limit)
            .sort(doc! { "timestamp": 1 })
            .build();

        let cursor = self
            .collection(tier)
            .find(filter)
            .with_options(options)
            .await?;
        let readings: Vec<Reading> = cursor.try_collect().await?;

        Ok(readings)
    }

    #[instrument(skip(self, ids))]
    async fn delete_by_ids(&self, tier: Tier, ids: &[Uuid]) -> Result<u64, ReadingError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let id_bsons: Vec<Bson> = ids
            .iter()
            .map(|id| to_bson(id).unwrap_or(Bson::Null))
            .collect();

        let result = self
            .collection(tier)
            .delete_many(doc! { "_id": { "$in": id_bsons } })
            .await?;

        Ok(result.deleted_count)
    }

    #[instrument(skip(self))]
    async fn count(&self, tier: Tier) -> Result<u64, ReadingError> {
        let count = self.collection(tier).estimated_document_count().await?;
        Ok(count)
    }

    #[instrument(skip(self, filter))]
    async fn count_range(
        &self,
        tier: Tier,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: &RangeFilter,
    ) -> Result<u64, ReadingError> {
        let mongo_filter = Self::build_filter(Some(start), Some(end), filter);
        let count = self.collection(tier).count_documents(mongo_filter).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_empty() {
        let doc = MongoReadingStore::build_filter(None, None, &RangeFilter::default());
        assert!(doc.is_empty());
    }

    #[test]
    fn test_build_filter_with_range() {
        let start = Utc::now() - chrono::Duration::days(1);
        let end = Utc::now();
        let doc = MongoReadingStore::build_filter(Some(start), Some(end), &RangeFilter::default());
        assert!(doc.contains_key("timestamp"));
    }

    #[test]
    fn test_build_filter_with_location_and_aqi() {
        let filter = RangeFilter {
            location: Some("paris".to_string()),
            min_aqi: Some(100),
        };
        let doc = MongoReadingStore::build_filter(None, None, &filter);
        assert!(doc.contains_key("location"));
        assert!(doc.contains_key("aqi"));
    }
}
