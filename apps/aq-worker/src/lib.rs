//! Air-Quality Worker Service
//!
//! A background worker that ingests readings from the upstream provider,
//! maintains the tiered reading store, aggregates daily statistics, and
//! dispatches alert emails.
//!
//! ## Architecture
//!
//! ```text
//! CronRunner (tz-aware schedules, gated ticks)
//!   ↓ (enqueues AqJob onto priority streams)
//! QueueWorker<AqJob, PipelineProcessor>
//!   ├─ fetch ───────> ResilientFetcher -> hot tier -> alert evaluation
//!   ├─ aggregate ───> DailyAggregator -> daily_aggregations (+ report)
//!   ├─ send_alert ──> TemplateEngine -> EmailProvider
//!   ├─ migrate ─────> TierMigrator (hot -> warm -> cold)
//!   └─ cleanup ─────> DLQ + alert retention
//! ```
//!
//! ## Lifecycle
//!
//! Startup: tracing -> metrics -> config -> Mongo/Redis (with retry) ->
//! indexes -> worker -> health monitor -> scheduler -> health server.
//! Readiness reports true only once all of those are up. Shutdown stops the
//! scheduler first, then drains the dispatcher up to a timeout.

pub mod api;
pub mod config;
pub mod handlers;
pub mod jobs;
pub mod schedule;
pub mod upstream;

use core_config::{app_info, Environment};
use domain_alerts::{AlertEngine, AlertSignal, MongoAlertStore};
use domain_readings::{MongoReadingStore, QueryRouter, ReadingCache, TierMigrator};
use domain_stats::{DailyAggregator, MongoAggregationStore};
use email::{EmailProvider, MockSmtpProvider, SmtpConfig, SmtpProvider, TemplateEngine};
use eyre::{Result, WrapErr};
use jobqueue::{
    full_admin_router, CircuitBreaker, CircuitBreakerConfig, DefaultJobOptions, EnqueueOptions,
    FinalFailure, FinalFailureHook, HealthState, QueueError, QueueHealthMonitor, QueueInspector,
    QueueProducer, QueueWorker, RecipientRateLimiter, WorkerConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::handlers::{
    AggregateHandler, AlertHandler, CleanupHandler, FetchHandler, MigrateHandler,
    PipelineProcessor,
};
use crate::jobs::{AirQualityQueue, AqJob};
use crate::upstream::{IqAirProvider, ResilientFetcher};

/// How long in-flight handlers may drain after shutdown is signaled.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Run the air-quality worker.
///
/// # Errors
///
/// Returns an error when configuration is invalid or a storage client
/// cannot be reached at startup.
pub async fn run() -> Result<()> {
    // Tracing (env-aware: JSON for prod, pretty for dev)
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    // Prometheus recorder + metric descriptions
    jobqueue::metrics::init_metrics();
    observability::describe_metrics();

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting air-quality worker");
    info!("Environment: {:?}", environment);

    // Configuration fails fast at boot
    let config = AppConfig::from_env().wrap_err("Failed to load configuration")?;

    // Storage clients, with startup retry
    info!("Connecting to MongoDB...");
    let mongo_client = database::mongodb::connect_from_config_with_retry(&config.mongo, None)
        .await
        .wrap_err("Failed to connect to MongoDB")?;
    let db = mongo_client.database(&config.mongo.database);
    info!(database = %config.mongo.database, "Connected to MongoDB");

    info!("Connecting to Redis...");
    let redis = database::redis::connect_from_config_with_retry(&config.redis, None)
        .await
        .wrap_err("Failed to connect to Redis")?;
    info!("Connected to Redis");

    // Stores and indexes
    let readings = Arc::new(MongoReadingStore::new(&db));
    readings
        .init_indexes()
        .await
        .wrap_err("Failed to create reading indexes")?;

    let aggregations = Arc::new(MongoAggregationStore::new(&db));
    aggregations
        .init_indexes()
        .await
        .wrap_err("Failed to create aggregation indexes")?;

    let alert_store = Arc::new(MongoAlertStore::new(&db));
    alert_store
        .init_indexes()
        .await
        .wrap_err("Failed to create alert indexes")?;

    let cache = ReadingCache::new(redis.clone());

    // One breaker per upstream endpoint, shared by fetcher and scheduler
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: config.breaker.failure_threshold,
        reset_timeout: config.breaker.reset_timeout,
    }));

    let provider = IqAirProvider::new(config.iqair.clone(), config.fetcher.timeout);
    let fetcher = Arc::new(ResilientFetcher::new(
        provider,
        Arc::clone(&breaker),
        config.fetcher,
    ));

    // Alerting
    let alerts = Arc::new(AlertEngine::new(
        Arc::clone(&alert_store),
        config.alerts.thresholds,
        config.alerts.recipients.clone(),
        config.alerts.escalation_recipients.clone(),
    ));

    // Mailer port: SMTP when configured, recording mock otherwise
    let mailer: Arc<dyn EmailProvider> = if std::env::var("SMTP_HOST").is_ok() {
        let smtp_config = SmtpConfig::from_env().wrap_err("Invalid SMTP configuration")?;
        Arc::new(SmtpProvider::new(smtp_config).wrap_err("Failed to build SMTP transport")?)
    } else {
        warn!("SMTP_HOST not set; alert emails go to the in-memory mock provider");
        Arc::new(MockSmtpProvider::new())
    };

    let templates =
        Arc::new(TemplateEngine::new().wrap_err("Failed to build email templates")?);
    let email_limiter = Arc::new(RecipientRateLimiter::new(config.email.rate_limit));

    // Queue configuration
    let worker_config = WorkerConfig::from_queue_def::<AirQualityQueue>()
        .with_blocking(Some(1000))
        .with_batch_size(config.queue.batch_size)
        .with_max_concurrent_jobs(config.queue.max_concurrent_jobs)
        .with_stalled_interval_ms(config.queue.stalled_interval_ms)
        .with_max_stalled_count(config.queue.max_stalled_count)
        .with_default_opts(DefaultJobOptions {
            max_attempts: config.queue.max_attempts,
            backoff: config.queue.backoff,
            remove_on_complete: true,
            remove_on_fail: true,
        });
    info!(
        queue = %worker_config.queue_name,
        consumer_id = %worker_config.consumer_id,
        batch_size = worker_config.batch_size,
        max_concurrent_jobs = worker_config.max_concurrent_jobs,
        "Queue configuration loaded"
    );

    let producer = QueueProducer::new(redis.clone(), worker_config.clone());

    // Domain services
    let aggregator = Arc::new(DailyAggregator::new(
        Arc::clone(&readings),
        Arc::clone(&aggregations),
        cache.clone(),
    ));
    let migrator = Arc::new(TierMigrator::new(Arc::clone(&readings)));
    let reads = Arc::new(QueryRouter::new(Arc::clone(&readings), cache.clone()));
    let inspector = Arc::new(QueueInspector::new(
        Arc::new(redis.clone()),
        worker_config.clone(),
    ));

    // The queue processor
    let processor = PipelineProcessor {
        fetch: FetchHandler::new(
            Arc::clone(&fetcher),
            Arc::clone(&readings),
            Arc::clone(&alerts),
            producer.clone(),
            config.email.retry_attempts,
        ),
        aggregate: AggregateHandler::new(
            Arc::clone(&aggregator),
            Arc::clone(&mailer),
            Arc::clone(&templates),
            Arc::clone(&email_limiter),
            config.alerts.recipients.clone(),
        ),
        alert: AlertHandler::new(
            Arc::clone(&alerts),
            Arc::clone(&mailer),
            Arc::clone(&templates),
            Arc::clone(&email_limiter),
            Arc::clone(&breaker),
        ),
        migrate: MigrateHandler::new(
            Arc::clone(&migrator),
            Arc::clone(&readings),
            Arc::clone(&alerts),
            producer.clone(),
            db.clone(),
            config.storage_capacity_bytes,
            config.email.retry_attempts,
        ),
        cleanup: CleanupHandler::new(Arc::clone(&inspector), Arc::clone(&alerts)),
    };

    // Worker, stats, and the terminal-failure -> system alert hook
    let worker = QueueWorker::new(redis.clone(), processor, worker_config.clone());
    let stats = worker.stats();
    let consumer = worker.consumer();

    let hook: FinalFailureHook = {
        let alerts = Arc::clone(&alerts);
        let producer = producer.clone();
        let stats = Arc::clone(&stats);
        let alert_max_attempts = config.email.retry_attempts;
        Arc::new(move |failure: FinalFailure| {
            let alerts = Arc::clone(&alerts);
            let producer = producer.clone();
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                error!(
                    queue = %failure.queue,
                    kind = %failure.kind,
                    job_id = %failure.job_id,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Job failed terminally"
                );

                let rate = stats.snapshot().failure_rate();
                match alerts
                    .evaluate(AlertSignal::SystemErrorRate {
                        queue: failure.queue,
                        rate,
                    })
                    .await
                {
                    Ok(Some(record)) => {
                        let job = AqJob::send_alert(record.id, alert_max_attempts, Uuid::new_v4());
                        match producer.enqueue(&job, EnqueueOptions::default()).await {
                            Ok(_) | Err(QueueError::DedupeSuppressed(_)) => {}
                            Err(e) => {
                                error!(error = %e, "Failed to enqueue system-error alert job");
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => error!(error = %e, "System-error alert evaluation failed"),
                }
            });
        })
    };

    let worker = worker
        .with_final_failure_hook(hook)
        .with_dedupe(producer.dedupe());

    // Shutdown signal plumbing
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    // Queue health monitor (60s snapshots feeding the scheduler gate)
    let monitor = Arc::new(
        QueueHealthMonitor::new().register("airQuality", Arc::clone(&consumer), Arc::clone(&stats)),
    );
    tokio::spawn(Arc::clone(&monitor).run(shutdown_rx.clone()));

    // Cron schedule
    let runner = schedule::build_runner(schedule::ScheduleDeps {
        producer: producer.clone(),
        breaker: Arc::clone(&breaker),
        monitor: Arc::clone(&monitor),
        alerts: Arc::clone(&alerts),
        city: config.city.clone(),
        queue_max_attempts: config.queue.max_attempts,
        alert_max_attempts: config.email.retry_attempts,
        cleanup_retention_days: config.alerts.retention_days,
    })
    .await
    .wrap_err("Failed to build the cron schedule")?;
    let runner = Arc::new(runner);

    // Health + admin + pipeline API server
    let health_state = HealthState::new(
        Arc::new(redis.clone()),
        app_info.name,
        app_info.version,
        worker_config.clone(),
        Arc::clone(&monitor),
    );
    let api_state = api::ApiState {
        reads: Arc::clone(&reads),
        aggregator: Arc::clone(&aggregator),
        alerts: Arc::clone(&alerts),
        runner: Arc::clone(&runner),
    };
    let app = full_admin_router(health_state).merge(api::pipeline_router(api_state));

    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = serve_http(app, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    // Everything below the scheduler is ready; start firing ticks last
    runner.start().await.wrap_err("Failed to start scheduler")?;

    // Run the dispatcher until shutdown
    info!("Starting pipeline dispatcher...");
    let worker_rx = shutdown_rx.clone();
    let worker_task = tokio::spawn(async move { worker.run(worker_rx).await });

    // Wait for the shutdown signal
    let mut rx = shutdown_rx.clone();
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }

    // Shutdown order: scheduler first, then drain the dispatcher
    if let Err(e) = runner.shutdown().await {
        warn!(error = %e, "Scheduler shutdown reported an error");
    }

    match tokio::time::timeout(DRAIN_TIMEOUT, worker_task).await {
        Ok(joined) => {
            joined
                .wrap_err("Worker task panicked")?
                .map_err(|e| eyre::eyre!("{}", e))?;
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "Dispatcher did not drain in time; in-flight jobs will be recovered as stalled"
            );
        }
    }

    info!("Air-quality worker stopped");
    Ok(())
}

/// Serve the health/admin/API router.
async fn serve_http(app: axum::Router, port: u16) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health and admin server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
