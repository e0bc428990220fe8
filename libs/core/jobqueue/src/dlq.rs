//! Dead Letter Queue (DLQ) management
//!
//! Holds jobs that failed terminally (permanent errors, exhausted attempts,
//! or stalled past tolerance). Entries can be inspected, requeued onto their
//! original priority band, or archived.

use crate::config::WorkerConfig;
use crate::error::QueueError;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

// Type alias for Redis stream entries
type StreamEntries = Vec<(String, Vec<(String, String)>)>;

/// DLQ entry as persisted by the consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    /// Original job ID
    pub job_id: String,

    /// Job kind tag
    pub kind: String,

    /// Priority level the job ran at
    #[serde(default)]
    pub priority: u8,

    /// Serialized job payload
    pub job: serde_json::Value,

    /// Error message that caused the terminal failure
    pub error: String,

    /// Original stream entry ID
    pub original_stream_id: String,

    /// Attempts consumed
    pub attempts: u32,

    /// When the job was moved to the DLQ
    pub failed_at: DateTime<Utc>,
}

/// A listed DLQ entry together with its DLQ stream ID.
#[derive(Debug, Clone, Serialize)]
pub struct DlqListed {
    pub dlq_id: String,
    #[serde(flatten)]
    pub entry: DlqEntry,
}

/// DLQ statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqStats {
    pub stream_name: String,
    pub length: i64,
    pub oldest_entry_id: Option<String>,
    pub newest_entry_id: Option<String>,
}

/// Result of a batch reprocess.
#[derive(Debug, Clone, Serialize)]
pub struct ReprocessResult {
    pub requeued: usize,
    pub skipped: usize,
}

/// Dead Letter Queue manager
pub struct DlqManager {
    redis: Arc<ConnectionManager>,
    config: WorkerConfig,
}

impl DlqManager {
    /// Create a new DlqManager for a queue.
    pub fn new(redis: Arc<ConnectionManager>, config: WorkerConfig) -> Self {
        Self { redis, config }
    }

    /// Get the DLQ stream name
    pub fn dlq_stream(&self) -> &str {
        &self.config.dlq_stream
    }

    /// Get DLQ statistics
    pub async fn stats(&self) -> Result<DlqStats, QueueError> {
        let mut conn = (*self.redis).clone();

        let len: i64 = conn.xlen(&self.config.dlq_stream).await.unwrap_or(0);

        let oldest: Option<StreamEntries> = redis::cmd("XRANGE")
            .arg(&self.config.dlq_stream)
            .arg("-")
            .arg("+")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await
            .ok();

        let newest: Option<StreamEntries> = redis::cmd("XREVRANGE")
            .arg(&self.config.dlq_stream)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await
            .ok();

        let oldest_id = oldest.and_then(|v| v.first().map(|(id, _)| id.clone()));
        let newest_id = newest.and_then(|v| v.first().map(|(id, _)| id.clone()));

        Ok(DlqStats {
            stream_name: self.config.dlq_stream.clone(),
            length: len,
            oldest_entry_id: oldest_id,
            newest_entry_id: newest_id,
        })
    }

    /// List DLQ entries, oldest first.
    pub async fn list(
        &self,
        count: usize,
        offset: Option<&str>,
    ) -> Result<Vec<DlqListed>, QueueError> {
        let mut conn = (*self.redis).clone();

        let start = offset.unwrap_or("-");

        let entries: StreamEntries = redis::cmd("XRANGE")
            .arg(&self.config.dlq_stream)
            .arg(start)
            .arg("+")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut results = Vec::new();

        for (id, fields) in entries {
            if let Some(data) = fields.iter().find(|(k, _)| k == "data").map(|(_, v)| v) {
                if let Ok(entry) = serde_json::from_str::<DlqEntry>(data) {
                    results.push(DlqListed { dlq_id: id, entry });
                }
            }
        }

        Ok(results)
    }

    /// Get a specific DLQ entry by its DLQ stream ID.
    pub async fn get(&self, dlq_id: &str) -> Result<Option<DlqEntry>, QueueError> {
        let mut conn = (*self.redis).clone();

        let entries: StreamEntries = redis::cmd("XRANGE")
            .arg(&self.config.dlq_stream)
            .arg(dlq_id)
            .arg(dlq_id)
            .query_async(&mut conn)
            .await?;

        if let Some((_id, fields)) = entries.first() {
            if let Some(data) = fields.iter().find(|(k, _)| k == "data").map(|(_, v)| v) {
                return Ok(serde_json::from_str(data).ok());
            }
        }

        Ok(None)
    }

    /// Requeue a single DLQ entry onto its original priority band.
    ///
    /// Returns `false` when the entry is missing or unparseable.
    pub async fn reprocess(&self, dlq_id: &str) -> Result<bool, QueueError> {
        let Some(entry) = self.get(dlq_id).await? else {
            return Ok(false);
        };

        let stream = self.config.band_stream(if entry.priority == 0 {
            crate::job::Priority::Normal.level()
        } else {
            entry.priority
        });

        let mut conn = (*self.redis).clone();
        let _: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_length)
            .arg("*")
            .arg("job")
            .arg(entry.job.to_string())
            .query_async(&mut conn)
            .await?;

        self.delete(dlq_id).await?;

        info!(
            dlq_id = %dlq_id,
            job_id = %entry.job_id,
            stream = %stream,
            "Requeued DLQ entry"
        );

        Ok(true)
    }

    /// Requeue the oldest `count` entries.
    pub async fn reprocess_batch(&self, count: usize) -> Result<ReprocessResult, QueueError> {
        let entries = self.list(count, None).await?;
        let mut requeued = 0;
        let mut skipped = 0;

        for listed in entries {
            if self.reprocess(&listed.dlq_id).await? {
                requeued += 1;
            } else {
                skipped += 1;
            }
        }

        Ok(ReprocessResult { requeued, skipped })
    }

    /// Delete an entry from the DLQ.
    pub async fn delete(&self, dlq_id: &str) -> Result<bool, QueueError> {
        let mut conn = (*self.redis).clone();

        let deleted: i64 = conn.xdel(&self.config.dlq_stream, &[dlq_id]).await?;

        debug!(dlq_id = %dlq_id, "Deleted DLQ entry");

        Ok(deleted > 0)
    }

    /// Purge all entries from the DLQ. Returns the number removed.
    pub async fn purge(&self) -> Result<i64, QueueError> {
        let mut conn = (*self.redis).clone();

        let len: i64 = conn.xlen(&self.config.dlq_stream).await?;

        if len > 0 {
            let _: () = redis::cmd("XTRIM")
                .arg(&self.config.dlq_stream)
                .arg("MAXLEN")
                .arg(0)
                .query_async(&mut conn)
                .await?;

            info!(count = len, "Purged DLQ");
        }

        Ok(len)
    }

    /// Remove DLQ entries older than the cutoff. Stream IDs embed the entry
    /// timestamp, so the filter runs on the ID prefix.
    pub async fn clean_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut conn = (*self.redis).clone();
        let cutoff_ms = cutoff.timestamp_millis();

        // Entries up to (cutoff_ms - 1)-<max seq>
        let end = format!("{}", cutoff_ms - 1);
        let entries: StreamEntries = redis::cmd("XRANGE")
            .arg(&self.config.dlq_stream)
            .arg("-")
            .arg(&end)
            .query_async(&mut conn)
            .await?;

        let mut removed = 0;
        for (id, _fields) in entries {
            let deleted: i64 = conn.xdel(&self.config.dlq_stream, &[&id]).await?;
            removed += deleted as usize;
        }

        if removed > 0 {
            info!(count = removed, "Cleaned old DLQ entries");
        }

        Ok(removed)
    }
}

impl Clone for DlqManager {
    fn clone(&self) -> Self {
        Self {
            redis: self.redis.clone(),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dlq_entry_serialization() {
        let entry = DlqEntry {
            job_id: "job-1".to_string(),
            kind: "fetch".to_string(),
            priority: 20,
            job: serde_json::json!({"test": "data"}),
            error: "Test error".to_string(),
            original_stream_id: "1234567890123-0".to_string(),
            attempts: 3,
            failed_at: Utc::now(),
        };

        let json = serde_json::to_string(&entry).unwrap();
        let deserialized: DlqEntry = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.job_id, "job-1");
        assert_eq!(deserialized.kind, "fetch");
        assert_eq!(deserialized.priority, 20);
        assert_eq!(deserialized.attempts, 3);
    }

    #[test]
    fn test_dlq_entry_parses_consumer_payload() {
        // Shape written by QueueConsumer::move_to_dlq
        let raw = serde_json::json!({
            "job_id": "j-9",
            "kind": "migrate",
            "priority": 10,
            "job": {"id": "j-9"},
            "error": "stalled: lease expired 2 times (idle 61000ms)",
            "original_stream_id": "170000-0",
            "attempts": 1,
            "failed_at": Utc::now().to_rfc3339(),
        })
        .to_string();

        let entry: DlqEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(entry.kind, "migrate");
        assert!(entry.error.starts_with("stalled"));
    }
}
