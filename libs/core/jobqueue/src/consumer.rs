//! Queue consumer over priority-banded Redis streams.
//!
//! Handles all stream-level operations for one logical queue:
//! - Consumer group creation across every priority band
//! - Reading pending and new messages, highest band first
//! - Message acknowledgment and completion cleanup
//! - Promoting due jobs out of the delayed sorted set
//! - Stalled-message recovery with a delivery-count cap
//! - Moving failed jobs to the dead letter queue

use crate::config::WorkerConfig;
use crate::error::QueueError;
use crate::job::Priority;
use crate::producer::DelayedEnvelope;
use crate::worker::QueueJob;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A message claimed from one of the priority band streams.
#[derive(Debug, Clone)]
pub struct ClaimedMessage<J> {
    /// Band stream the message lives on (needed for XACK/XDEL).
    pub stream: String,
    /// Stream entry ID.
    pub message_id: String,
    /// Parsed job payload.
    pub job: J,
}

/// A pending entry as reported by XPENDING (extended form).
#[derive(Debug, Clone)]
struct PendingEntry {
    id: String,
    idle_ms: u64,
    delivered: u32,
}

pub struct QueueConsumer {
    redis: Arc<ConnectionManager>,
    config: WorkerConfig,
}

impl QueueConsumer {
    /// Create a new queue consumer.
    pub fn new(redis: ConnectionManager, config: WorkerConfig) -> Self {
        Self {
            redis: Arc::new(redis),
            config,
        }
    }

    /// Get a reference to the Redis connection manager.
    pub fn redis(&self) -> &ConnectionManager {
        &self.redis
    }

    /// Logical queue name.
    pub fn queue_name(&self) -> &str {
        &self.config.queue_name
    }

    /// Ensure the consumer group exists on every priority band.
    ///
    /// Creates missing streams as a side effect (MKSTREAM).
    pub async fn ensure_consumer_groups(&self) -> Result<(), QueueError> {
        let mut conn = (*self.redis).clone();

        for stream in self.config.band_streams() {
            let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(&stream)
                .arg(&self.config.consumer_group)
                .arg("$")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;

            match result {
                Ok(_) => {
                    info!(stream = %stream, group = %self.config.consumer_group, "Created consumer group");
                }
                Err(e) if e.to_string().contains("BUSYGROUP") => {
                    debug!(stream = %stream, "Consumer group already exists");
                }
                Err(e) => return Err(QueueError::ConsumerGroup(e.to_string())),
            }
        }

        Ok(())
    }

    /// Whether the queue is administratively paused.
    pub async fn is_paused(&self) -> bool {
        let mut conn = (*self.redis).clone();
        let flag: Option<String> = redis::cmd("GET")
            .arg(self.config.paused_key())
            .query_async(&mut conn)
            .await
            .unwrap_or(None);
        flag.is_some()
    }

    /// Read pending messages already assigned to this consumer.
    ///
    /// These are messages delivered but not yet acknowledged (e.g., claimed
    /// before a crash or via stalled recovery).
    pub async fn read_pending_messages<J: QueueJob>(
        &self,
    ) -> Result<Vec<ClaimedMessage<J>>, QueueError> {
        let mut conn = (*self.redis).clone();
        let streams = self.config.band_streams();
        let ids: Vec<&str> = streams.iter().map(|_| "0").collect();

        let opts = StreamReadOptions::default()
            .group(&self.config.consumer_group, &self.config.consumer_id)
            .count(self.config.batch_size);

        let keys: Vec<&str> = streams.iter().map(|s| s.as_str()).collect();
        let result: Result<StreamReadReply, _> = conn.xread_options(&keys, &ids, &opts).await;

        match result {
            Ok(reply) => self.parse_messages(reply),
            Err(e) if e.to_string().to_lowercase().contains("timeout") => Ok(vec![]),
            Err(e) => Err(QueueError::Redis(e)),
        }
    }

    /// Read new messages across all priority bands, highest band first.
    ///
    /// XREADGROUP returns stream keys in the requested order, so iterating
    /// the reply preserves priority precedence.
    pub async fn read_new_messages<J: QueueJob>(
        &self,
    ) -> Result<Vec<ClaimedMessage<J>>, QueueError> {
        let mut conn = (*self.redis).clone();
        let streams = self.config.band_streams();
        let ids: Vec<&str> = streams.iter().map(|_| ">").collect();

        let mut opts = StreamReadOptions::default()
            .group(&self.config.consumer_group, &self.config.consumer_id)
            .count(self.config.batch_size);

        if let Some(timeout_ms) = self.config.block_timeout_ms {
            opts = opts.block(timeout_ms as usize);
        }

        let keys: Vec<&str> = streams.iter().map(|s| s.as_str()).collect();
        let result: Result<StreamReadReply, _> = conn.xread_options(&keys, &ids, &opts).await;

        match result {
            Ok(reply) => {
                let messages = self.parse_messages(reply)?;
                if !messages.is_empty() {
                    debug!(count = messages.len(), "Received new messages");
                }
                Ok(messages)
            }
            // BLOCK timeout returns nil/empty - this is normal, not an error
            Err(e) => {
                let err_str = e.to_string().to_lowercase();
                if err_str.contains("timeout")
                    || err_str.contains("timed out")
                    || err_str.contains("nil")
                    || (err_str.contains("response") && err_str.contains("type"))
                {
                    Ok(vec![])
                } else {
                    Err(QueueError::Redis(e))
                }
            }
        }
    }

    /// Check if blocking mode is enabled.
    pub fn is_blocking(&self) -> bool {
        self.config.block_timeout_ms.is_some()
    }

    fn parse_messages<J: QueueJob>(
        &self,
        reply: StreamReadReply,
    ) -> Result<Vec<ClaimedMessage<J>>, QueueError> {
        let mut messages = Vec::new();

        for stream_key in reply.keys {
            for message in stream_key.ids {
                match Self::parse_job::<J>(&message.map) {
                    Ok(job) => {
                        messages.push(ClaimedMessage {
                            stream: stream_key.key.clone(),
                            message_id: message.id,
                            job,
                        });
                    }
                    Err(e) => {
                        warn!(
                            message_id = %message.id,
                            stream = %stream_key.key,
                            error = %e,
                            "Failed to parse job, moving raw entry to DLQ"
                        );
                    }
                }
            }
        }

        Ok(messages)
    }

    fn parse_job<J: QueueJob>(map: &HashMap<String, redis::Value>) -> Result<J, QueueError> {
        let job_value = map
            .get("job")
            .ok_or_else(|| QueueError::JobParsing("Missing 'job' field in message".to_string()))?;

        let job_str = match job_value {
            redis::Value::BulkString(bytes) => String::from_utf8_lossy(bytes).to_string(),
            redis::Value::SimpleString(s) => s.clone(),
            _ => {
                return Err(QueueError::JobParsing(
                    "Invalid 'job' field type".to_string(),
                ))
            }
        };

        let job: J = serde_json::from_str(&job_str)?;
        Ok(job)
    }

    /// Acknowledge a message, deleting it when remove-on-complete is set.
    pub async fn complete(&self, stream: &str, message_id: &str) -> Result<(), QueueError> {
        self.ack(stream, message_id).await?;

        if self.config.default_opts.remove_on_complete {
            let mut conn = (*self.redis).clone();
            let _: i64 = conn.xdel(stream, &[message_id]).await?;
        }

        Ok(())
    }

    /// Acknowledge a message without deleting it.
    pub async fn ack(&self, stream: &str, message_id: &str) -> Result<(), QueueError> {
        let mut conn = (*self.redis).clone();

        let _: () = conn
            .xack(stream, &self.config.consumer_group, &[message_id])
            .await?;

        debug!(message_id = %message_id, stream = %stream, "Acknowledged message");
        Ok(())
    }

    /// Delete a stream entry (used together with `ack` on failure paths).
    pub async fn delete(&self, stream: &str, message_id: &str) -> Result<(), QueueError> {
        let mut conn = (*self.redis).clone();
        let _: i64 = conn.xdel(stream, &[message_id]).await?;
        Ok(())
    }

    /// Re-queue a job immediately on its priority band.
    pub async fn requeue_immediate<J: QueueJob>(
        &self,
        job: &J,
        priority: Priority,
    ) -> Result<(), QueueError> {
        let stream = self.config.band_stream(priority.level());
        let mut conn = (*self.redis).clone();
        let job_json = serde_json::to_string(job)?;

        let _: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_length)
            .arg("*")
            .arg("job")
            .arg(&job_json)
            .query_async(&mut conn)
            .await?;

        debug!(job_id = %job.job_id(), attempts = %job.attempts(), "Re-queued job");
        Ok(())
    }

    /// Park a retry in the delayed set so the backoff delay is honored.
    pub async fn requeue_delayed<J: QueueJob>(
        &self,
        job: &J,
        priority: Priority,
        delay_ms: u64,
    ) -> Result<(), QueueError> {
        let run_at_ms = Utc::now().timestamp_millis() as u64 + delay_ms;
        let envelope = DelayedEnvelope {
            priority: priority.level(),
            job: serde_json::to_value(job)?,
        };
        let member = serde_json::to_string(&envelope)?;

        let mut conn = (*self.redis).clone();
        redis::cmd("ZADD")
            .arg(&self.config.delayed_set)
            .arg(run_at_ms)
            .arg(&member)
            .query_async::<()>(&mut conn)
            .await?;

        debug!(
            job_id = %job.job_id(),
            attempts = %job.attempts(),
            delay_ms = delay_ms,
            "Scheduled retry in delayed set"
        );
        Ok(())
    }

    /// Promote jobs whose run-at time has arrived onto their band streams.
    ///
    /// ZREM-before-XADD so two workers promoting concurrently cannot
    /// duplicate a job.
    pub async fn promote_due_delayed(&self) -> Result<usize, QueueError> {
        let mut conn = (*self.redis).clone();
        let now_ms = Utc::now().timestamp_millis() as u64;

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.config.delayed_set)
            .arg("-inf")
            .arg(now_ms)
            .arg("LIMIT")
            .arg(0)
            .arg(self.config.batch_size)
            .query_async(&mut conn)
            .await?;

        let mut promoted = 0;

        for member in due {
            let removed: i64 = redis::cmd("ZREM")
                .arg(&self.config.delayed_set)
                .arg(&member)
                .query_async(&mut conn)
                .await?;

            if removed == 0 {
                // Another worker won the race for this member
                continue;
            }

            let envelope: DelayedEnvelope = match serde_json::from_str(&member) {
                Ok(env) => env,
                Err(e) => {
                    warn!(error = %e, "Dropping unparseable delayed envelope");
                    continue;
                }
            };

            let stream = self.config.band_stream(envelope.priority);
            let job_json = envelope.job.to_string();

            let _: String = redis::cmd("XADD")
                .arg(&stream)
                .arg("MAXLEN")
                .arg("~")
                .arg(self.config.max_length)
                .arg("*")
                .arg("job")
                .arg(&job_json)
                .query_async(&mut conn)
                .await?;

            promoted += 1;
        }

        if promoted > 0 {
            debug!(count = promoted, "Promoted delayed jobs");
        }

        Ok(promoted)
    }

    /// Move a job to the dead letter queue.
    pub async fn move_to_dlq<J: QueueJob>(
        &self,
        job: &J,
        error: &str,
        original_stream_id: &str,
    ) -> Result<(), QueueError> {
        if !self.config.enable_dlq {
            return Ok(());
        }

        let dlq_entry = serde_json::json!({
            "job_id": job.job_id(),
            "kind": job.kind(),
            "priority": job.priority().level(),
            "job": job,
            "error": error,
            "original_stream_id": original_stream_id,
            "attempts": job.attempts(),
            "failed_at": Utc::now().to_rfc3339(),
        });

        let mut conn = (*self.redis).clone();
        let _: String = redis::cmd("XADD")
            .arg(&self.config.dlq_stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(10_000)
            .arg("*")
            .arg("data")
            .arg(dlq_entry.to_string())
            .query_async(&mut conn)
            .await?;

        warn!(
            job_id = %job.job_id(),
            kind = %job.kind(),
            dlq = %self.config.dlq_stream,
            "Moved job to DLQ"
        );
        Ok(())
    }

    /// Claim all pending messages on startup.
    ///
    /// Workers get a fresh consumer ID on restart, so messages assigned to
    /// the previous ID must be claimed before they count as stalled.
    pub async fn claim_all_pending_on_startup(&self) -> Result<usize, QueueError> {
        let mut total_claimed = 0;

        for stream in self.config.band_streams() {
            total_claimed += self.autoclaim_stream(&stream, 0).await?;
        }

        if total_claimed > 0 {
            info!(
                count = total_claimed,
                consumer = %self.config.consumer_id,
                "Claimed pending messages on startup"
            );
        }

        Ok(total_claimed)
    }

    async fn autoclaim_stream(&self, stream: &str, min_idle_ms: u64) -> Result<usize, QueueError> {
        let mut conn = (*self.redis).clone();
        let mut claimed = 0;
        let mut start_id = "0-0".to_string();

        loop {
            // XAUTOCLAIM response: [next-start-id, [[msg-id, fields], ...], [deleted-ids]]
            let result: redis::Value = redis::cmd("XAUTOCLAIM")
                .arg(stream)
                .arg(&self.config.consumer_group)
                .arg(&self.config.consumer_id)
                .arg(min_idle_ms)
                .arg(&start_id)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .unwrap_or(redis::Value::Nil);

            let redis::Value::Array(arr) = &result else {
                break;
            };
            if arr.len() < 2 {
                break;
            }

            match &arr[0] {
                redis::Value::BulkString(next_id) => {
                    let next = String::from_utf8_lossy(next_id).to_string();
                    if next == "0-0" {
                        if let redis::Value::Array(messages) = &arr[1] {
                            claimed += messages.len();
                        }
                        break;
                    }
                    start_id = next;
                }
                _ => break,
            }

            match &arr[1] {
                redis::Value::Array(messages) => {
                    claimed += messages.len();
                    if messages.is_empty() {
                        break;
                    }
                }
                _ => break,
            }
        }

        Ok(claimed)
    }

    /// Recover stalled messages: entries whose lease expired without an ack.
    ///
    /// Entries still under the stalled tolerance are re-claimed by this
    /// consumer and reappear as pending reads. Entries delivered more than
    /// `max_stalled_count + 1` times are failed to the DLQ.
    pub async fn recover_stalled<J: QueueJob>(&self) -> Result<(usize, usize), QueueError> {
        let mut reclaimed = 0;
        let mut failed = 0;

        for stream in self.config.band_streams() {
            let entries = self
                .pending_entries(&stream, self.config.stalled_interval_ms)
                .await?;

            for entry in entries {
                if entry.delivered > self.config.max_stalled_count + 1 {
                    // Exceeded the stalled tolerance: fetch the body, DLQ it
                    if let Some(job) = self.fetch_entry::<J>(&stream, &entry.id).await? {
                        self.move_to_dlq(
                            &job,
                            &format!(
                                "stalled: lease expired {} times (idle {}ms)",
                                entry.delivered - 1,
                                entry.idle_ms
                            ),
                            &entry.id,
                        )
                        .await?;
                    }
                    self.ack(&stream, &entry.id).await?;
                    if self.config.default_opts.remove_on_fail {
                        self.delete(&stream, &entry.id).await?;
                    }
                    failed += 1;
                } else {
                    // Claim to this consumer; shows up in the next pending read
                    let mut conn = (*self.redis).clone();
                    let _: redis::Value = redis::cmd("XCLAIM")
                        .arg(&stream)
                        .arg(&self.config.consumer_group)
                        .arg(&self.config.consumer_id)
                        .arg(self.config.stalled_interval_ms)
                        .arg(&entry.id)
                        .query_async(&mut conn)
                        .await
                        .unwrap_or(redis::Value::Nil);
                    reclaimed += 1;
                }
            }
        }

        if reclaimed > 0 || failed > 0 {
            info!(
                reclaimed = reclaimed,
                failed = failed,
                consumer = %self.config.consumer_id,
                "Recovered stalled messages"
            );
        }

        Ok((reclaimed, failed))
    }

    /// Refresh the lease on an in-flight message (heartbeat).
    ///
    /// XCLAIM with JUSTID to this consumer resets the idle clock without
    /// re-delivering the body.
    pub async fn heartbeat(&self, stream: &str, message_id: &str) -> Result<(), QueueError> {
        let mut conn = (*self.redis).clone();
        let _: redis::Value = redis::cmd("XCLAIM")
            .arg(stream)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id)
            .arg(0)
            .arg(message_id)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Pending entries older than `min_idle_ms`, with delivery counts.
    async fn pending_entries(
        &self,
        stream: &str,
        min_idle_ms: u64,
    ) -> Result<Vec<PendingEntry>, QueueError> {
        let mut conn = (*self.redis).clone();

        // XPENDING <stream> <group> IDLE <ms> - + <count>
        let result: redis::Value = redis::cmd("XPENDING")
            .arg(stream)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(100)
            .query_async(&mut conn)
            .await
            .unwrap_or(redis::Value::Nil);

        let mut entries = Vec::new();

        if let redis::Value::Array(rows) = result {
            for row in rows {
                let redis::Value::Array(fields) = row else {
                    continue;
                };
                // [id, consumer, idle-ms, delivery-count]
                if fields.len() < 4 {
                    continue;
                }

                let id = match &fields[0] {
                    redis::Value::BulkString(b) => String::from_utf8_lossy(b).to_string(),
                    redis::Value::SimpleString(s) => s.clone(),
                    _ => continue,
                };
                let idle_ms = match &fields[2] {
                    redis::Value::Int(n) => *n as u64,
                    _ => 0,
                };
                let delivered = match &fields[3] {
                    redis::Value::Int(n) => *n as u32,
                    _ => 1,
                };

                entries.push(PendingEntry {
                    id,
                    idle_ms,
                    delivered,
                });
            }
        }

        Ok(entries)
    }

    /// Fetch a single entry's job payload by stream ID.
    async fn fetch_entry<J: QueueJob>(
        &self,
        stream: &str,
        message_id: &str,
    ) -> Result<Option<J>, QueueError> {
        let mut conn = (*self.redis).clone();

        let entries: Vec<(String, Vec<(String, String)>)> = redis::cmd("XRANGE")
            .arg(stream)
            .arg(message_id)
            .arg(message_id)
            .query_async(&mut conn)
            .await
            .unwrap_or_default();

        if let Some((_id, fields)) = entries.first() {
            if let Some((_, raw)) = fields.iter().find(|(k, _)| k == "job") {
                return Ok(serde_json::from_str(raw).ok());
            }
        }

        Ok(None)
    }

    /// Total entries across band streams (waiting + unacked-active).
    pub async fn stream_depth(&self) -> Result<usize, QueueError> {
        let mut conn = (*self.redis).clone();
        let mut depth = 0usize;

        for stream in self.config.band_streams() {
            let len: usize = conn.xlen(&stream).await.unwrap_or(0);
            depth += len;
        }

        Ok(depth)
    }

    /// Count of unacknowledged (active) entries across bands.
    pub async fn pending_count(&self) -> Result<usize, QueueError> {
        let mut conn = (*self.redis).clone();
        let mut total = 0usize;

        for stream in self.config.band_streams() {
            // XPENDING <stream> <group> summary form: [count, min, max, consumers]
            let result: redis::Value = redis::cmd("XPENDING")
                .arg(&stream)
                .arg(&self.config.consumer_group)
                .query_async(&mut conn)
                .await
                .unwrap_or(redis::Value::Nil);

            if let redis::Value::Array(arr) = result {
                if let Some(redis::Value::Int(count)) = arr.first() {
                    total += *count as usize;
                }
            }
        }

        Ok(total)
    }

    /// Size of the delayed set.
    pub async fn delayed_count(&self) -> Result<usize, QueueError> {
        let mut conn = (*self.redis).clone();
        let count: usize = redis::cmd("ZCARD")
            .arg(&self.config.delayed_set)
            .query_async(&mut conn)
            .await
            .unwrap_or(0);
        Ok(count)
    }
}
