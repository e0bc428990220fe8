//! Per-queue health scoring and the health/admin HTTP surface.
//!
//! The monitor samples every registered queue once a minute, scores it,
//! categorizes bottlenecks, and labels the trend against the previous
//! snapshot. The scheduler's pre-enqueue gate and the `/queues/health`
//! endpoint both read the published snapshots.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::WorkerConfig;
use crate::consumer::QueueConsumer;
use crate::dlq::DlqManager;
use crate::metrics;
use crate::stats::StatsRegistry;

/// One measurement of a queue, input to scoring.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueSample {
    /// Failures / processed, in [0,1].
    pub failure_rate: f64,
    /// Mean handler execution time in milliseconds.
    pub avg_processing_ms: f64,
    /// Entries waiting to be claimed.
    pub waiting: usize,
    /// Jobs finished per minute since the last snapshot.
    pub processing_per_min: f64,
}

/// Compute the health score for a sample.
///
/// Starts at 1.0 and applies the penalty schedule:
/// - failure rate above 5%: minus `0.5 * failure_rate`
/// - average processing above 10s: minus 0.2
/// - waiting above 50: minus `min(0.3, waiting / 1000)`
/// - processing rate below 5/min: minus 0.2
///
/// Clamped to [0, 1].
pub fn compute_score(sample: &QueueSample) -> f64 {
    let mut score = 1.0;

    if sample.failure_rate > 0.05 {
        score -= 0.5 * sample.failure_rate;
    }
    if sample.avg_processing_ms > 10_000.0 {
        score -= 0.2;
    }
    if sample.waiting > 50 {
        score -= (sample.waiting as f64 / 1000.0).min(0.3);
    }
    if sample.processing_per_min < 5.0 {
        score -= 0.2;
    }

    score.clamp(0.0, 1.0)
}

/// Bottleneck category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckKind {
    QueueBacklog,
    HighFailureRate,
    SlowProcessing,
}

/// Bottleneck severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckSeverity {
    Medium,
    High,
    Critical,
}

/// A detected bottleneck with the measured value that tripped it.
#[derive(Debug, Clone, Serialize)]
pub struct Bottleneck {
    pub kind: BottleneckKind,
    pub severity: BottleneckSeverity,
    pub value: f64,
}

/// Categorize bottlenecks for a sample.
pub fn detect_bottlenecks(sample: &QueueSample) -> Vec<Bottleneck> {
    let mut found = Vec::new();

    if sample.waiting > 100 {
        let severity = if sample.waiting > 500 {
            BottleneckSeverity::Critical
        } else if sample.waiting > 200 {
            BottleneckSeverity::High
        } else {
            BottleneckSeverity::Medium
        };
        found.push(Bottleneck {
            kind: BottleneckKind::QueueBacklog,
            severity,
            value: sample.waiting as f64,
        });
    }

    if sample.failure_rate > 0.10 {
        let severity = if sample.failure_rate > 0.25 {
            BottleneckSeverity::Critical
        } else if sample.failure_rate > 0.15 {
            BottleneckSeverity::High
        } else {
            BottleneckSeverity::Medium
        };
        found.push(Bottleneck {
            kind: BottleneckKind::HighFailureRate,
            severity,
            value: sample.failure_rate,
        });
    }

    if sample.avg_processing_ms > 30_000.0 {
        let severity = if sample.avg_processing_ms > 120_000.0 {
            BottleneckSeverity::Critical
        } else if sample.avg_processing_ms > 60_000.0 {
            BottleneckSeverity::High
        } else {
            BottleneckSeverity::Medium
        };
        found.push(Bottleneck {
            kind: BottleneckKind::SlowProcessing,
            severity,
            value: sample.avg_processing_ms,
        });
    }

    found
}

/// Health trend versus the previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthTrend {
    Improving,
    Degrading,
    Stable,
}

/// Label the trend between two consecutive snapshots.
pub fn compare_trend(current: &QueueHealth, previous: &QueueHealth) -> HealthTrend {
    let score_delta = current.health_score - previous.health_score;
    let throughput_delta = current.sample.processing_per_min - previous.sample.processing_per_min;
    let proc_ms_delta = current.sample.avg_processing_ms - previous.sample.avg_processing_ms;

    if score_delta > 0.1 && throughput_delta > 0.0 {
        HealthTrend::Improving
    } else if score_delta < -0.1 || proc_ms_delta > 5000.0 {
        HealthTrend::Degrading
    } else {
        HealthTrend::Stable
    }
}

/// Published health snapshot for one queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub queue: String,
    pub health_score: f64,
    pub sample: QueueSample,
    pub bottlenecks: Vec<Bottleneck>,
    pub trend: HealthTrend,
    pub processed_total: u64,
    pub captured_at: DateTime<Utc>,
}

struct MonitoredQueue {
    name: String,
    consumer: Arc<QueueConsumer>,
    stats: Arc<StatsRegistry>,
}

/// Samples registered queues on an interval and publishes snapshots.
pub struct QueueHealthMonitor {
    queues: Vec<MonitoredQueue>,
    snapshots: Mutex<HashMap<String, QueueHealth>>,
    interval: Duration,
}

impl QueueHealthMonitor {
    pub fn new() -> Self {
        Self {
            queues: Vec::new(),
            snapshots: Mutex::new(HashMap::new()),
            interval: Duration::from_secs(60),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Register a queue to monitor.
    pub fn register(
        mut self,
        name: impl Into<String>,
        consumer: Arc<QueueConsumer>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        self.queues.push(MonitoredQueue {
            name: name.into(),
            consumer,
            stats,
        });
        self
    }

    /// Latest snapshot for a queue.
    pub fn health_for(&self, queue: &str) -> Option<QueueHealth> {
        self.snapshots.lock().unwrap().get(queue).cloned()
    }

    /// Latest health score for a queue, 1.0 before the first sample.
    pub fn score(&self, queue: &str) -> f64 {
        self.health_for(queue)
            .map(|h| h.health_score)
            .unwrap_or(1.0)
    }

    /// All latest snapshots.
    pub fn all(&self) -> Vec<QueueHealth> {
        self.snapshots.lock().unwrap().values().cloned().collect()
    }

    /// Sample every registered queue once and publish the snapshots.
    pub async fn sample_once(&self) {
        for queue in &self.queues {
            match self.sample_queue(queue).await {
                Ok(health) => {
                    metrics::set_queue_depth(&queue.name, health.sample.waiting as f64);
                    if health.health_score < 0.7 {
                        warn!(
                            queue = %queue.name,
                            score = health.health_score,
                            bottlenecks = health.bottlenecks.len(),
                            "Queue health degraded"
                        );
                    }
                    self.snapshots
                        .lock()
                        .unwrap()
                        .insert(queue.name.clone(), health);
                }
                Err(e) => {
                    debug!(queue = %queue.name, error = %e, "Health sample failed");
                }
            }
        }
    }

    async fn sample_queue(
        &self,
        queue: &MonitoredQueue,
    ) -> Result<QueueHealth, crate::error::QueueError> {
        let stats = queue.stats.snapshot();
        let depth = queue.consumer.stream_depth().await?;
        let active = queue.consumer.pending_count().await?;
        let waiting = depth.saturating_sub(active);

        let previous = self.health_for(&queue.name);

        let processing_per_min = match &previous {
            Some(prev) => {
                let elapsed_min = (Utc::now() - prev.captured_at).num_seconds().max(1) as f64 / 60.0;
                let delta = stats.processed.saturating_sub(prev.processed_total);
                delta as f64 / elapsed_min
            }
            // First sample: no window yet, assume nominal flow
            None => 5.0,
        };

        let sample = QueueSample {
            failure_rate: stats.failure_rate(),
            avg_processing_ms: stats.avg_execution_ms,
            waiting,
            processing_per_min,
        };

        let mut health = QueueHealth {
            queue: queue.name.clone(),
            health_score: compute_score(&sample),
            bottlenecks: detect_bottlenecks(&sample),
            trend: HealthTrend::Stable,
            sample,
            processed_total: stats.processed,
            captured_at: Utc::now(),
        };

        if let Some(prev) = previous {
            health.trend = compare_trend(&health, &prev);
        }

        Ok(health)
    }

    /// Run the sampling loop until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sample_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

impl Default for QueueHealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// HTTP surface
// ============================================================================

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Redis connection for readiness checks.
    pub redis: Arc<ConnectionManager>,
    /// Application name.
    pub app_name: String,
    /// Application version.
    pub app_version: String,
    /// Queue worker configuration (streams, DLQ).
    pub config: WorkerConfig,
    /// Health monitor with published snapshots.
    pub monitor: Arc<QueueHealthMonitor>,
}

impl HealthState {
    pub fn new(
        redis: Arc<ConnectionManager>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
        config: WorkerConfig,
        monitor: Arc<QueueHealthMonitor>,
    ) -> Self {
        Self {
            redis,
            app_name: app_name.into(),
            app_version: app_version.into(),
            config,
            monitor,
        }
    }

    /// Get a DLQ manager for this state.
    pub fn dlq_manager(&self) -> DlqManager {
        DlqManager::new(Arc::clone(&self.redis), self.config.clone())
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status (always "healthy" if responding).
    pub status: &'static str,
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
}

/// Liveness probe handler.
///
/// Always returns OK if the server is running.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness probe handler.
///
/// Checks if Redis is connected and ready.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let mut conn = (*state.redis).clone();

    let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;

    match result {
        Ok(response) if response == "PONG" => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": { "redis": "ok" }
            })),
        )),
        Ok(response) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "redis": format!("unexpected response: {}", response) }
            })),
        )),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "redis": format!("error: {}", e) }
            })),
        )),
    }
}

/// Published queue health snapshots.
pub async fn queues_health_handler(State(state): State<HealthState>) -> Json<Value> {
    Json(json!({ "queues": state.monitor.all() }))
}

/// Stream depth handler for monitoring.
pub async fn stream_info_handler(
    State(state): State<HealthState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mut conn = (*state.redis).clone();
    let mut bands = Vec::new();

    for stream in state.config.band_streams() {
        let len: usize = redis::cmd("XLEN")
            .arg(&stream)
            .query_async(&mut conn)
            .await
            .unwrap_or(0);
        bands.push(json!({ "stream": stream, "length": len }));
    }

    let delayed: usize = redis::cmd("ZCARD")
        .arg(&state.config.delayed_set)
        .query_async(&mut conn)
        .await
        .unwrap_or(0);

    let dlq: usize = redis::cmd("XLEN")
        .arg(&state.config.dlq_stream)
        .query_async(&mut conn)
        .await
        .unwrap_or(0);

    Ok(Json(json!({
        "queue": state.config.queue_name,
        "bands": bands,
        "delayed": delayed,
        "dlq": dlq,
    })))
}

/// Prometheus metrics endpoint handler.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::get_metrics_handle() {
        Some(handle) => {
            let metrics_output = handle.render();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                metrics_output,
            )
                .into_response()
        }
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

// ============================================================================
// DLQ Admin Handlers
// ============================================================================

/// Query parameters for DLQ list endpoint.
#[derive(Debug, Deserialize)]
pub struct DlqListParams {
    /// Maximum number of messages to return (default: 10, max: 100)
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Stream ID to start from, for pagination
    pub offset: Option<String>,
}

fn default_limit() -> usize {
    10
}

/// Query parameters for DLQ reprocess batch endpoint.
#[derive(Debug, Deserialize)]
pub struct DlqReprocessParams {
    /// Number of messages to reprocess (default: 10, max: 100)
    #[serde(default = "default_limit")]
    pub count: usize,
}

/// `GET /admin/dlq/stats`
pub async fn dlq_stats_handler(
    State(state): State<HealthState>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let manager = state.dlq_manager();

    match manager.stats().await {
        Ok(stats) => Ok(Json(stats)),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

/// `GET /admin/dlq/messages?limit=10&offset=<id>`
pub async fn dlq_list_handler(
    State(state): State<HealthState>,
    Query(params): Query<DlqListParams>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let manager = state.dlq_manager();
    let limit = params.limit.min(100);

    match manager.list(limit, params.offset.as_deref()).await {
        Ok(messages) => Ok(Json(json!({
            "count": messages.len(),
            "messages": messages,
            "limit": limit,
        }))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

/// `POST /admin/dlq/reprocess/{id}`
pub async fn dlq_reprocess_one_handler(
    State(state): State<HealthState>,
    Path(message_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let manager = state.dlq_manager();

    match manager.reprocess(&message_id).await {
        Ok(true) => Ok((
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message_id": message_id,
                "message": "Message requeued for processing"
            })),
        )),
        Ok(false) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "Message not found in DLQ",
                "message_id": message_id
            })),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

/// `POST /admin/dlq/reprocess?count=10`
pub async fn dlq_reprocess_batch_handler(
    State(state): State<HealthState>,
    Query(params): Query<DlqReprocessParams>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let manager = state.dlq_manager();
    let count = params.count.min(100);

    match manager.reprocess_batch(count).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

/// `DELETE /admin/dlq/{id}`
pub async fn dlq_archive_one_handler(
    State(state): State<HealthState>,
    Path(message_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let manager = state.dlq_manager();

    match manager.delete(&message_id).await {
        Ok(true) => Ok((
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message_id": message_id,
                "message": "Message archived (deleted from DLQ)"
            })),
        )),
        Ok(false) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "Message not found in DLQ",
                "message_id": message_id
            })),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

/// `DELETE /admin/dlq/all`
///
/// WARNING: permanently deletes all DLQ messages.
pub async fn dlq_archive_all_handler(
    State(state): State<HealthState>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let manager = state.dlq_manager();

    match manager.purge().await {
        Ok(count) => Ok(Json(json!({
            "success": true,
            "archived_count": count,
            "message": "All DLQ messages archived"
        }))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

/// Create a standard health router.
///
/// - `/health`, `/healthz` - Liveness probes
/// - `/ready`, `/readyz` - Readiness probes
/// - `/queues/health` - Queue health snapshots
/// - `/stream/info` - Stream depths
/// - `/metrics` - Prometheus metrics
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/queues/health", get(queues_health_handler))
        .route("/stream/info", get(stream_info_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Create a full router with health and DLQ admin endpoints.
pub fn full_admin_router(state: HealthState) -> axum::Router {
    use axum::routing::{delete, get, post};

    axum::Router::new()
        // Health endpoints
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/queues/health", get(queues_health_handler))
        .route("/stream/info", get(stream_info_handler))
        .route("/metrics", get(metrics_handler))
        // DLQ admin endpoints
        .route("/admin/dlq/stats", get(dlq_stats_handler))
        .route("/admin/dlq/messages", get(dlq_list_handler))
        .route("/admin/dlq/reprocess/{id}", post(dlq_reprocess_one_handler))
        .route("/admin/dlq/reprocess", post(dlq_reprocess_batch_handler))
        .route("/admin/dlq/{id}", delete(dlq_archive_one_handler))
        .route("/admin/dlq/all", delete(dlq_archive_all_handler))
        .with_state(state)
}
