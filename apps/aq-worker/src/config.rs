//! Configuration for the air-quality worker.

use core_config::{
    env_or_default, env_parsed_or, env_required, mongodb::MongoConfig, redis::RedisConfig,
    ConfigError, FromEnv,
};
use domain_alerts::AlertThresholds;
use jobqueue::{Backoff, BackoffKind, RateLimitConfig};
use std::time::Duration;

/// The city whose readings the pipeline ingests.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CityTarget {
    pub city: String,
    pub state: String,
    pub country: String,
    /// Location key readings are stored under, e.g. "paris"
    pub location_key: String,
}

impl CityTarget {
    fn from_env() -> Self {
        let city = env_or_default("FETCH_CITY", "Paris");
        Self {
            location_key: env_or_default("FETCH_LOCATION_KEY", &city.to_lowercase()),
            state: env_or_default("FETCH_STATE", "Ile-de-France"),
            country: env_or_default("FETCH_COUNTRY", "France"),
            city,
        }
    }
}

/// Upstream provider settings.
#[derive(Debug, Clone)]
pub struct IqAirConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Resilient fetcher settings.
#[derive(Debug, Clone, Copy)]
pub struct FetcherSettings {
    /// Hard per-attempt timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base backoff delay (doubles per attempt, plus jitter)
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
}

/// Circuit breaker settings for the upstream endpoint.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    /// Sliding window the failure streak is judged against (stats only)
    pub monitoring_window: Duration,
}

/// Queue tuning.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub stalled_interval_ms: u64,
    pub max_stalled_count: u32,
    pub max_concurrent_jobs: usize,
    pub batch_size: usize,
}

/// Alerting configuration.
#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub thresholds: AlertThresholds,
    pub recipients: Vec<String>,
    pub escalation_recipients: Vec<String>,
    /// weekly-cleanup removes alerts older than this
    pub retention_days: i64,
}

/// Email dispatch limits.
#[derive(Debug, Clone, Copy)]
pub struct EmailSettings {
    pub rate_limit: RateLimitConfig,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

/// Full worker configuration, loaded from the environment at boot.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub iqair: IqAirConfig,
    pub city: CityTarget,
    pub fetcher: FetcherSettings,
    pub breaker: BreakerSettings,
    pub queue: QueueSettings,
    pub alerts: AlertSettings,
    pub email: EmailSettings,
    pub mongo: MongoConfig,
    pub redis: RedisConfig,
    /// Capacity the storage_usage alert is judged against
    pub storage_capacity_bytes: u64,
    pub health_port: u16,
}

fn split_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect()
}

impl AppConfig {
    /// Load configuration from environment variables. Fails fast on a
    /// missing API key or unparseable numbers.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backoff_kind = match env_or_default("QUEUE_BACKOFF_KIND", "exponential").as_str() {
            "fixed" => BackoffKind::Fixed,
            _ => BackoffKind::Exponential,
        };

        Ok(Self {
            iqair: IqAirConfig {
                api_key: env_required("IQAIR_API_KEY")?,
                base_url: env_or_default("IQAIR_BASE_URL", "https://api.airvisual.com/v2"),
            },
            city: CityTarget::from_env(),
            fetcher: FetcherSettings {
                timeout: Duration::from_millis(env_parsed_or("FETCH_TIMEOUT_MS", 10_000u64)?),
                max_retries: env_parsed_or("FETCH_MAX_RETRIES", 5u32)?,
                base_delay: Duration::from_millis(env_parsed_or(
                    "FETCH_BASE_DELAY_MS",
                    30_000u64,
                )?),
                max_delay: Duration::from_millis(env_parsed_or("FETCH_MAX_DELAY_MS", 300_000u64)?),
            },
            breaker: BreakerSettings {
                failure_threshold: env_parsed_or("BREAKER_FAILURE_THRESHOLD", 5u32)?,
                reset_timeout: Duration::from_millis(env_parsed_or(
                    "BREAKER_RESET_TIMEOUT_MS",
                    300_000u64,
                )?),
                monitoring_window: Duration::from_millis(env_parsed_or(
                    "BREAKER_MONITORING_WINDOW_MS",
                    60_000u64,
                )?),
            },
            queue: QueueSettings {
                max_attempts: env_parsed_or("QUEUE_MAX_ATTEMPTS", 5u32)?,
                backoff: Backoff {
                    kind: backoff_kind,
                    delay_ms: env_parsed_or("QUEUE_BACKOFF_DELAY_MS", 5000u64)?,
                    max_delay_ms: env_parsed_or("QUEUE_BACKOFF_MAX_DELAY_MS", 300_000u64)?,
                },
                stalled_interval_ms: env_parsed_or("QUEUE_STALLED_INTERVAL_MS", 30_000u64)?,
                max_stalled_count: env_parsed_or("QUEUE_MAX_STALLED_COUNT", 1u32)?,
                max_concurrent_jobs: env_parsed_or("QUEUE_MAX_CONCURRENT_JOBS", 10usize)?,
                batch_size: env_parsed_or("QUEUE_BATCH_SIZE", 20usize)?,
            },
            alerts: AlertSettings {
                thresholds: AlertThresholds {
                    consecutive_api_failures: env_parsed_or(
                        "ALERT_CONSECUTIVE_API_FAILURES",
                        5u32,
                    )?,
                    high_pollution_aqi: env_parsed_or("ALERT_HIGH_POLLUTION_AQI", 150i32)?,
                    extreme_pollution_aqi: env_parsed_or("ALERT_EXTREME_POLLUTION_AQI", 200i32)?,
                    queue_backlog_size: env_parsed_or("ALERT_QUEUE_BACKLOG_SIZE", 100usize)?,
                    system_error_rate: env_parsed_or("ALERT_SYSTEM_ERROR_RATE", 0.1f64)?,
                    storage_usage_threshold: env_parsed_or(
                        "ALERT_STORAGE_USAGE_THRESHOLD",
                        0.8f64,
                    )?,
                },
                recipients: split_recipients(&env_or_default("ALERT_RECIPIENTS", "")),
                escalation_recipients: split_recipients(&env_or_default(
                    "ALERT_ESCALATION_RECIPIENTS",
                    "",
                )),
                retention_days: env_parsed_or("ALERT_RETENTION_DAYS", 30i64)?,
            },
            email: EmailSettings {
                rate_limit: RateLimitConfig {
                    max_per_hour: env_parsed_or("EMAIL_MAX_PER_HOUR", 50u32)?,
                    max_per_day: env_parsed_or("EMAIL_MAX_PER_DAY", 1000u32)?,
                },
                retry_attempts: env_parsed_or("EMAIL_RETRY_ATTEMPTS", 3u32)?,
                retry_delay: Duration::from_millis(env_parsed_or("EMAIL_RETRY_DELAY_MS", 5000u64)?),
            },
            mongo: MongoConfig::from_env()?,
            redis: RedisConfig::from_env()?,
            storage_capacity_bytes: env_parsed_or(
                "STORAGE_CAPACITY_BYTES",
                10 * 1024 * 1024 * 1024u64,
            )?,
            health_port: env_parsed_or("HEALTH_PORT", 8082u16)?,
        })
    }
}
