//! MongoDB implementation of the AlertStore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, to_bson, Bson},
    options::IndexOptions,
    Collection, Database, IndexModel,
};
use tracing::instrument;
use uuid::Uuid;

use crate::error::AlertError;
use crate::models::{AlertRecord, AlertStore};

const COLLECTION: &str = "alerts";

/// MongoDB-backed alert store.
pub struct MongoAlertStore {
    collection: Collection<AlertRecord>,
}

impl MongoAlertStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection::<AlertRecord>(COLLECTION),
        }
    }

    pub async fn init_indexes(&self) -> Result<(), AlertError> {
        let indexes = vec![
            IndexModel::builder()
                .keys(doc! { "triggered_at": -1 })
                .options(
                    IndexOptions::builder()
                        .name("idx_triggered_at".to_string())
                        .build(),
                )
                .build(),
            // Active-alert listings filter on acknowledged = false
            IndexModel::builder()
                .keys(doc! { "acknowledged": 1, "triggered_at": -1 })
                .options(
                    IndexOptions::builder()
                        .name("idx_acknowledged_triggered".to_string())
                        .build(),
                )
                .build(),
            IndexModel::builder()
                .keys(doc! { "condition": 1, "triggered_at": -1 })
                .options(
                    IndexOptions::builder()
                        .name("idx_condition_triggered".to_string())
                        .build(),
                )
                .build(),
        ];

        self.collection.create_indexes(indexes).await?;
        tracing::info!("Alert indexes created successfully");
        Ok(())
    }

    fn id_filter(id: Uuid) -> mongodb::bson::Document {
        doc! { "_id": to_bson(&id).unwrap_or(Bson::Null) }
    }
}

#[async_trait]
impl AlertStore for MongoAlertStore {
    #[instrument(skip(self, record), fields(alert_id = %record.id, condition = %record.condition))]
    async fn insert(&self, record: &AlertRecord) -> Result<(), AlertError> {
        self.collection.insert_one(record).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find(&self, id: Uuid) -> Result<Option<AlertRecord>, AlertError> {
        let record = self.collection.find_one(Self::id_filter(id)).await?;
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn find_active(&self, limit: i64) -> Result<Vec<AlertRecord>, AlertError> {
        let options = mongodb::options::FindOptions::builder()
            .limit(limit)
            .sort(doc! { "triggered_at": -1 })
            .build();

        let cursor = self
            .collection
            .find(doc! { "acknowledged": false })
            .with_options(options)
            .await?;
        let records: Vec<AlertRecord> = cursor.try_collect().await?;

        Ok(records)
    }

    #[instrument(skip(self))]
    async fn acknowledge(
        &self,
        id: Uuid,
        user: &str,
        at: DateTime<Utc>,
    ) -> Result<AlertRecord, AlertError> {
        // acknowledged_at round-trips through plain chrono serde, so it is
        // written in the same RFC3339 form it deserializes from
        let update = doc! {
            "$set": {
                "acknowledged": true,
                "acknowledged_by": user,
                "acknowledged_at": at.to_rfc3339(),
            }
        };

        self.collection
            .update_one(Self::id_filter(id), update)
            .await?;

        self.collection
            .find_one(Self::id_filter(id))
            .await?
            .ok_or(AlertError::NotFound(id))
    }

    #[instrument(skip(self, delivery_id, error))]
    async fn set_email_outcome(
        &self,
        id: Uuid,
        delivery_id: Option<String>,
        error: Option<String>,
    ) -> Result<(), AlertError> {
        let update = doc! {
            "$set": {
                "email_delivery_id": delivery_id.map(Bson::String).unwrap_or(Bson::Null),
                "email_error": error.map(Bson::String).unwrap_or(Bson::Null),
            }
        };

        let result = self
            .collection
            .update_one(Self::id_filter(id), update)
            .await?;

        if result.matched_count == 0 {
            return Err(AlertError::NotFound(id));
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AlertError> {
        let filter = doc! { "triggered_at": { "$lt": Bson::DateTime(cutoff.into()) } };
        let result = self.collection.delete_many(filter).await?;
        Ok(result.deleted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_filter_shape() {
        let id = Uuid::new_v4();
        let filter = MongoAlertStore::id_filter(id);
        assert!(filter.contains_key("_id"));
    }
}
