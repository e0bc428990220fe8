//! MongoDB implementation of the AggregationStore.

use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::TryStreamExt;
use mongodb::{bson::doc, options::IndexOptions, Collection, Database, IndexModel};
use tracing::instrument;

use crate::error::StatsError;
use crate::models::{AggregationStore, DailyAggregation};

const COLLECTION: &str = "daily_aggregations";

/// MongoDB-backed aggregation store.
pub struct MongoAggregationStore {
    collection: Collection<DailyAggregation>,
}

impl MongoAggregationStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection::<DailyAggregation>(COLLECTION),
        }
    }

    /// Unique (date, location) plus a partial index on elevated averages.
    pub async fn init_indexes(&self) -> Result<(), StatsError> {
        let indexes = vec![
            IndexModel::builder()
                .keys(doc! { "date": 1, "location": 1 })
                .options(
                    IndexOptions::builder()
                        .unique(true)
                        .name("idx_date_location_unique".to_string())
                        .build(),
                )
                .build(),
            IndexModel::builder()
                .keys(doc! { "avg_aqi": -1 })
                .options(
                    IndexOptions::builder()
                        .partial_filter_expression(doc! { "avg_aqi": { "$gte": 100 } })
                        .name("idx_elevated_avg_aqi".to_string())
                        .build(),
                )
                .build(),
        ];

        self.collection.create_indexes(indexes).await?;
        tracing::info!("Daily aggregation indexes created successfully");
        Ok(())
    }
}

#[async_trait]
impl AggregationStore for MongoAggregationStore {
    #[instrument(skip(self, aggregation), fields(location = %aggregation.location, date = %aggregation.date))]
    async fn upsert(&self, aggregation: &DailyAggregation) -> Result<(), StatsError> {
        let filter = doc! {
            "date": &aggregation.date,
            "location": &aggregation.location,
        };

        let mut replacement = mongodb::bson::to_document(aggregation)
            .map_err(mongodb::error::Error::from)?;
        // The unique key identifies the document; keep the existing _id
        replacement.remove("_id");

        self.collection
            .update_one(filter, doc! { "$set": replacement })
            .upsert(true)
            .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn find(
        &self,
        location: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyAggregation>, StatsError> {
        let filter = doc! {
            "date": date.format("%Y-%m-%d").to_string(),
            "location": location,
        };
        let found = self.collection.find_one(filter).await?;
        Ok(found)
    }

    #[instrument(skip(self))]
    async fn find_range(
        &self,
        location: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyAggregation>, StatsError> {
        let filter = doc! {
            "location": location,
            "date": {
                "$gte": start.format("%Y-%m-%d").to_string(),
                "$lte": end.format("%Y-%m-%d").to_string(),
            },
        };

        let options = mongodb::options::FindOptions::builder()
            .sort(doc! { "date": 1 })
            .build();

        let cursor = self.collection.find(filter).with_options(options).await?;
        let aggregations: Vec<DailyAggregation> = cursor.try_collect().await?;

        Ok(aggregations)
    }

    #[instrument(skip(self))]
    async fn delete_older_than(&self, cutoff: NaiveDate) -> Result<u64, StatsError> {
        let filter = doc! {
            "date": { "$lt": cutoff.format("%Y-%m-%d").to_string() },
        };
        let result = self.collection.delete_many(filter).await?;
        Ok(result.deleted_count)
    }
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    #[ignore] // Requires actual MongoDB
    async fn test_upsert_is_idempotent() {
        use super::*;
        use crate::aggregator::compute_daily;
        use chrono::TimeZone;
        use chrono::Utc;
        use domain_readings::{
            Coordinates, Pollutant, Reading, ReadingMetadata, WeatherSnapshot,
        };

        let url = std::env::var("MONGODB_URL")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
        let client = mongodb::Client::with_uri_str(&url).await.unwrap();
        let db = client.database("aq_test");
        let store = MongoAggregationStore::new(&db);
        store.init_indexes().await.unwrap();

        let date = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        let readings = vec![Reading::new(
            "paris",
            Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap(),
            Coordinates::new(48.85, 2.35).unwrap(),
            65,
            Pollutant::P2,
            WeatherSnapshot {
                humidity: 50.0,
                ..Default::default()
            },
            ReadingMetadata::default(),
        )
        .unwrap()];

        let agg = compute_daily("paris", date, &readings).unwrap();
        store.upsert(&agg).await.unwrap();
        store.upsert(&agg).await.unwrap();

        let found = store.find("paris", date).await.unwrap().unwrap();
        assert_eq!(found.avg_aqi, agg.avg_aqi);
        assert_eq!(found.record_count, agg.record_count);
    }
}
