//! Read and operations endpoints served alongside the health router.
//!
//! Smart-routed reads (latest, range), aggregation lookups, weekly
//! summaries, alert acknowledgment, scheduler controls, and cache
//! invalidation. Zero-record lookups return 404, not errors.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use domain_alerts::{AlertEngine, MongoAlertStore};
use domain_readings::{MongoReadingStore, QueryRouter, RangeFilter};
use domain_stats::{weekly_summary, DailyAggregator, MongoAggregationStore};
use scheduler::CronRunner;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

type ApiError = (StatusCode, Json<Value>);

fn internal(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

fn not_found(what: impl Into<String>) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": what.into() })),
    )
}

#[derive(Clone)]
pub struct ApiState {
    pub reads: Arc<QueryRouter<MongoReadingStore>>,
    pub aggregator: Arc<DailyAggregator<MongoReadingStore, MongoAggregationStore>>,
    pub alerts: Arc<AlertEngine<MongoAlertStore>>,
    pub runner: Arc<CronRunner>,
}

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: Option<String>,
    pub min_aqi: Option<i32>,
    #[serde(default = "default_range_limit")]
    pub limit: i64,
}

fn default_range_limit() -> i64 {
    100
}

/// `GET /readings/latest/{location}`
async fn latest_reading(
    State(state): State<ApiState>,
    Path(location): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.reads.latest_for(&location).await.map_err(internal)? {
        Some(reading) => Ok(Json(json!(reading))),
        None => Err(not_found(format!("no readings for '{}'", location))),
    }
}

/// `GET /readings/range?start&end&location&min_aqi&limit`
async fn range_readings(
    State(state): State<ApiState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Value>, ApiError> {
    let filter = RangeFilter {
        location: params.location,
        min_aqi: params.min_aqi,
    };

    let result = state
        .reads
        .query_range(params.start, params.end, &filter, params.limit.min(1000))
        .await
        .map_err(internal)?;

    Ok(Json(json!(result)))
}

/// `GET /stats/daily/{location}/{date}`
async fn daily_stats(
    State(state): State<ApiState>,
    Path((location, date)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "date must be YYYY-MM-DD" })),
        )
    })?;

    match state
        .aggregator
        .get_day(&location, date)
        .await
        .map_err(internal)?
    {
        Some(aggregation) => Ok(Json(json!(aggregation))),
        None => Err(not_found(format!(
            "no aggregation for {} on {}",
            location, date
        ))),
    }
}

/// `GET /stats/weekly/{location}`
async fn weekly_stats(
    State(state): State<ApiState>,
    Path(location): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let end = Utc::now().date_naive();
    let start = end - Duration::days(6);

    let days = state
        .aggregator
        .range(&location, start, end)
        .await
        .map_err(internal)?;

    match weekly_summary(&location, &days) {
        Some(summary) => Ok(Json(json!(summary))),
        None => Err(not_found(format!("no aggregations for '{}'", location))),
    }
}

/// `GET /alerts/active`
async fn active_alerts(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    let alerts = state.alerts.active(100).await.map_err(internal)?;
    Ok(Json(json!({ "count": alerts.len(), "alerts": alerts })))
}

#[derive(Debug, Deserialize)]
struct AckBody {
    user: String,
}

/// `POST /alerts/{id}/ack`
async fn acknowledge_alert(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AckBody>,
) -> Result<Json<Value>, ApiError> {
    match state.alerts.acknowledge(id, &body.user).await {
        Ok(record) => Ok(Json(json!(record))),
        Err(domain_alerts::AlertError::NotFound(id)) => {
            Err(not_found(format!("alert {} not found", id)))
        }
        Err(e) => Err(internal(e)),
    }
}

/// `GET /scheduler/jobs`
async fn scheduler_jobs(State(state): State<ApiState>) -> Json<Value> {
    let jobs: Value = state
        .runner
        .all_stats()
        .into_iter()
        .map(|(name, (schedule, stats))| {
            (name, json!({ "schedule": schedule, "stats": stats }))
        })
        .collect::<serde_json::Map<String, Value>>()
        .into();
    Json(jobs)
}

/// `POST /scheduler/jobs/{name}/run`
async fn run_job_now(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.runner.run_manually(&name).await {
        Ok(outcome) => Ok(Json(json!({ "job": name, "outcome": format!("{:?}", outcome) }))),
        Err(scheduler::SchedulerError::UnknownJob(name)) => {
            Err(not_found(format!("unknown job '{}'", name)))
        }
        Err(e) => Err(internal(e)),
    }
}

#[derive(Debug, Deserialize)]
struct ToggleParams {
    enabled: bool,
}

/// `POST /scheduler/jobs/{name}/toggle?enabled=true|false`
async fn toggle_job(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(params): Query<ToggleParams>,
) -> Result<Json<Value>, ApiError> {
    match state.runner.toggle(&name, params.enabled) {
        Ok(()) => Ok(Json(json!({ "job": name, "enabled": params.enabled }))),
        Err(scheduler::SchedulerError::UnknownJob(name)) => {
            Err(not_found(format!("unknown job '{}'", name)))
        }
        Err(e) => Err(internal(e)),
    }
}

#[derive(Debug, Deserialize)]
struct InvalidateParams {
    prefix: String,
}

/// `POST /admin/cache/invalidate?prefix=daily-stats:paris`
async fn invalidate_cache(
    State(state): State<ApiState>,
    Query(params): Query<InvalidateParams>,
) -> Result<Json<Value>, ApiError> {
    let removed = state
        .reads
        .invalidate(&params.prefix)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "prefix": params.prefix, "removed": removed })))
}

/// Build the pipeline API router.
pub fn pipeline_router(state: ApiState) -> Router {
    Router::new()
        .route("/readings/latest/{location}", get(latest_reading))
        .route("/readings/range", get(range_readings))
        .route("/stats/daily/{location}/{date}", get(daily_stats))
        .route("/stats/weekly/{location}", get(weekly_stats))
        .route("/alerts/active", get(active_alerts))
        .route("/alerts/{id}/ack", post(acknowledge_alert))
        .route("/scheduler/jobs", get(scheduler_jobs))
        .route("/scheduler/jobs/{name}/run", post(run_job_now))
        .route("/scheduler/jobs/{name}/toggle", post(toggle_job))
        .route("/admin/cache/invalidate", post(invalidate_cache))
        .with_state(state)
}
