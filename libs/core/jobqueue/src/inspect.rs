//! Queue inspection: per-state counts, scans, lookups, and cleanup.

use crate::config::WorkerConfig;
use crate::error::QueueError;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

type StreamEntries = Vec<(String, Vec<(String, String)>)>;

/// Observable job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
    Stalled,
}

/// Per-state counts for one queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub failed: usize,
}

/// A scanned job with its location and state.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub state: JobState,
    pub stream: Option<String>,
    pub message_id: Option<String>,
    pub job: serde_json::Value,
}

/// Read-only view over a queue's streams, delayed set, and DLQ.
pub struct QueueInspector {
    redis: Arc<ConnectionManager>,
    config: WorkerConfig,
}

impl QueueInspector {
    pub fn new(redis: Arc<ConnectionManager>, config: WorkerConfig) -> Self {
        Self { redis, config }
    }

    /// Per-state counts.
    ///
    /// Completed jobs are deleted on ack, so streams hold waiting + active
    /// entries; active is the consumer group's pending count.
    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let mut conn = (*self.redis).clone();

        let mut depth = 0usize;
        let mut active = 0usize;

        for stream in self.config.band_streams() {
            let len: usize = conn.xlen(&stream).await.unwrap_or(0);
            depth += len;

            let result: redis::Value = redis::cmd("XPENDING")
                .arg(&stream)
                .arg(&self.config.consumer_group)
                .query_async(&mut conn)
                .await
                .unwrap_or(redis::Value::Nil);

            if let redis::Value::Array(arr) = result {
                if let Some(redis::Value::Int(count)) = arr.first() {
                    active += *count as usize;
                }
            }
        }

        let delayed: usize = redis::cmd("ZCARD")
            .arg(&self.config.delayed_set)
            .query_async(&mut conn)
            .await
            .unwrap_or(0);

        let failed: usize = conn.xlen(&self.config.dlq_stream).await.unwrap_or(0);

        Ok(QueueCounts {
            waiting: depth.saturating_sub(active),
            active,
            delayed,
            failed,
        })
    }

    /// Scan jobs in a given state, up to `limit`.
    pub async fn scan(&self, state: JobState, limit: usize) -> Result<Vec<JobSummary>, QueueError> {
        match state {
            JobState::Waiting | JobState::Active => self.scan_streams(state, limit).await,
            JobState::Delayed => self.scan_delayed(limit).await,
            JobState::Failed | JobState::Stalled => self.scan_dlq(state, limit).await,
            JobState::Completed => Ok(vec![]), // completed entries are deleted on ack
        }
    }

    async fn scan_streams(
        &self,
        wanted: JobState,
        limit: usize,
    ) -> Result<Vec<JobSummary>, QueueError> {
        let mut conn = (*self.redis).clone();
        let mut results = Vec::new();

        for stream in self.config.band_streams() {
            if results.len() >= limit {
                break;
            }

            // Pending (active) entry IDs for this band
            let pending_ids = self.pending_ids(&stream).await;

            let entries: StreamEntries = redis::cmd("XRANGE")
                .arg(&stream)
                .arg("-")
                .arg("+")
                .arg("COUNT")
                .arg(limit)
                .query_async(&mut conn)
                .await
                .unwrap_or_default();

            for (id, fields) in entries {
                if results.len() >= limit {
                    break;
                }
                let state = if pending_ids.contains(&id) {
                    JobState::Active
                } else {
                    JobState::Waiting
                };
                if state != wanted {
                    continue;
                }
                if let Some((_, raw)) = fields.iter().find(|(k, _)| k == "job") {
                    if let Ok(job) = serde_json::from_str(raw) {
                        results.push(JobSummary {
                            state,
                            stream: Some(stream.clone()),
                            message_id: Some(id),
                            job,
                        });
                    }
                }
            }
        }

        Ok(results)
    }

    async fn scan_delayed(&self, limit: usize) -> Result<Vec<JobSummary>, QueueError> {
        let mut conn = (*self.redis).clone();

        let members: Vec<String> = redis::cmd("ZRANGE")
            .arg(&self.config.delayed_set)
            .arg(0)
            .arg((limit.max(1) - 1) as i64)
            .query_async(&mut conn)
            .await
            .unwrap_or_default();

        Ok(members
            .into_iter()
            .filter_map(|m| serde_json::from_str::<serde_json::Value>(&m).ok())
            .map(|envelope| JobSummary {
                state: JobState::Delayed,
                stream: None,
                message_id: None,
                job: envelope.get("job").cloned().unwrap_or(envelope),
            })
            .collect())
    }

    async fn scan_dlq(
        &self,
        wanted: JobState,
        limit: usize,
    ) -> Result<Vec<JobSummary>, QueueError> {
        let mut conn = (*self.redis).clone();

        let entries: StreamEntries = redis::cmd("XRANGE")
            .arg(&self.config.dlq_stream)
            .arg("-")
            .arg("+")
            .arg("COUNT")
            .arg(limit)
            .query_async(&mut conn)
            .await
            .unwrap_or_default();

        let mut results = Vec::new();
        for (id, fields) in entries {
            if let Some((_, raw)) = fields.iter().find(|(k, _)| k == "data") {
                if let Ok(data) = serde_json::from_str::<serde_json::Value>(raw) {
                    let is_stalled = data
                        .get("error")
                        .and_then(|e| e.as_str())
                        .map(|e| e.starts_with("stalled"))
                        .unwrap_or(false);
                    let state = if is_stalled {
                        JobState::Stalled
                    } else {
                        JobState::Failed
                    };
                    // Stalled entries also satisfy a Failed scan
                    if state == wanted || wanted == JobState::Failed {
                        results.push(JobSummary {
                            state,
                            stream: Some(self.config.dlq_stream.clone()),
                            message_id: Some(id),
                            job: data,
                        });
                    }
                }
            }
        }

        Ok(results)
    }

    /// Best-effort lookup of a job by its job ID across states.
    ///
    /// Bounded scan: checks streams, the delayed set, and the DLQ up to a
    /// fixed window each.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobSummary>, QueueError> {
        const WINDOW: usize = 1000;

        for state in [JobState::Active, JobState::Waiting, JobState::Delayed] {
            let found = self
                .scan(state, WINDOW)
                .await?
                .into_iter()
                .find(|s| s.job.get("id").and_then(|v| v.as_str()) == Some(job_id));
            if found.is_some() {
                return Ok(found);
            }
        }

        let found = self
            .scan(JobState::Failed, WINDOW)
            .await?
            .into_iter()
            .find(|s| s.job.get("job_id").and_then(|v| v.as_str()) == Some(job_id));

        Ok(found)
    }

    /// Remove entries older than the cutoff in the given state.
    ///
    /// Stream IDs embed the entry timestamp, so the filter runs on the ID.
    pub async fn clean(
        &self,
        older_than: DateTime<Utc>,
        state: JobState,
    ) -> Result<usize, QueueError> {
        let mut conn = (*self.redis).clone();
        let cutoff_ms = older_than.timestamp_millis();
        let mut removed = 0usize;

        match state {
            JobState::Failed | JobState::Stalled => {
                let end = format!("{}", cutoff_ms - 1);
                let entries: StreamEntries = redis::cmd("XRANGE")
                    .arg(&self.config.dlq_stream)
                    .arg("-")
                    .arg(&end)
                    .query_async(&mut conn)
                    .await
                    .unwrap_or_default();
                for (id, _) in entries {
                    let deleted: i64 = conn.xdel(&self.config.dlq_stream, &[&id]).await?;
                    removed += deleted as usize;
                }
            }
            JobState::Waiting => {
                let end = format!("{}", cutoff_ms - 1);
                for stream in self.config.band_streams() {
                    let pending_ids = self.pending_ids(&stream).await;
                    let entries: StreamEntries = redis::cmd("XRANGE")
                        .arg(&stream)
                        .arg("-")
                        .arg(&end)
                        .query_async(&mut conn)
                        .await
                        .unwrap_or_default();
                    for (id, _) in entries {
                        // Never delete an in-flight entry
                        if pending_ids.contains(&id) {
                            continue;
                        }
                        let deleted: i64 = conn.xdel(&stream, &[&id]).await?;
                        removed += deleted as usize;
                    }
                }
            }
            JobState::Delayed => {
                let count: i64 = redis::cmd("ZREMRANGEBYSCORE")
                    .arg(&self.config.delayed_set)
                    .arg("-inf")
                    .arg(cutoff_ms)
                    .query_async(&mut conn)
                    .await?;
                removed = count as usize;
            }
            JobState::Active | JobState::Completed => {}
        }

        if removed > 0 {
            info!(
                queue = %self.config.queue_name,
                state = ?state,
                count = removed,
                "Cleaned old queue entries"
            );
        }

        Ok(removed)
    }

    async fn pending_ids(&self, stream: &str) -> HashSet<String> {
        let mut conn = (*self.redis).clone();
        let mut ids = HashSet::new();

        let result: redis::Value = redis::cmd("XPENDING")
            .arg(stream)
            .arg(&self.config.consumer_group)
            .arg("-")
            .arg("+")
            .arg(1000)
            .query_async(&mut conn)
            .await
            .unwrap_or(redis::Value::Nil);

        if let redis::Value::Array(rows) = result {
            for row in rows {
                if let redis::Value::Array(fields) = row {
                    if let Some(redis::Value::BulkString(b)) = fields.first() {
                        ids.insert(String::from_utf8_lossy(b).to_string());
                    }
                }
            }
        }

        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobState::Waiting).unwrap(),
            "\"waiting\""
        );
        assert_eq!(
            serde_json::to_string(&JobState::Stalled).unwrap(),
            "\"stalled\""
        );
    }

    #[test]
    fn test_queue_counts_default() {
        let counts = QueueCounts::default();
        assert_eq!(counts.waiting, 0);
        assert_eq!(counts.active, 0);
        assert_eq!(counts.delayed, 0);
        assert_eq!(counts.failed, 0);
    }
}
