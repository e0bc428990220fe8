//! Cron runner with time-zone-aware schedules and per-job bookkeeping.
//!
//! Wraps `tokio-cron-scheduler` with the operational surface the pipeline
//! needs:
//! - named jobs with 6-field cron expressions (seconds first) and a
//!   `chrono_tz::Tz` per job
//! - an optional async gate per job returning a skip reason (used for
//!   breaker-open and queue-health checks before enqueueing work)
//! - per-job stats: execution/failure counts, skips by reason, last run,
//!   last duration, last error, enabled flag
//! - `toggle(name, enabled)` to enable or disable a job live
//! - `run_manually(name)` running the same body synchronously, still
//!   subject to the gate
//!
//! Cron ticks never do the work inline; job bodies are expected to enqueue
//! onto the job queue and return.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut runner = CronRunner::new().await?;
//! runner
//!     .add(ScheduledJobSpec {
//!         name: "fetch-paris-data",
//!         schedule: "0 * * * * *",
//!         timezone: chrono_tz::Europe::Paris,
//!         gate: Some(breaker_gate.clone()),
//!         body: Arc::new(move || Box::pin(enqueue_fetch(producer.clone()))),
//!     })
//!     .await?;
//! runner.start().await?;
//! ```

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{debug, error, info, warn};

/// Error type for scheduler operations.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Cron scheduler error: {0}")]
    Cron(#[from] JobSchedulerError),

    #[error("Unknown job '{0}'")]
    UnknownJob(String),
}

/// Result of one job invocation (scheduled or manual).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Skipped(String),
    Failed(String),
}

/// Async job body. Returns an error string on failure (recorded in stats).
pub type JobBody = Arc<dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Async pre-run gate. `Some(reason)` skips this tick and records the reason.
pub type JobGate = Arc<dyn Fn() -> BoxFuture<'static, Option<String>> + Send + Sync>;

/// Specification of one named cron job.
pub struct ScheduledJobSpec {
    /// Unique job name.
    pub name: &'static str,
    /// 6-field cron expression (seconds first), e.g. `"0 */5 * * * *"`.
    pub schedule: &'static str,
    /// Time zone the expression is evaluated in.
    pub timezone: chrono_tz::Tz,
    /// Optional pre-run gate.
    pub gate: Option<JobGate>,
    /// The job body.
    pub body: JobBody,
}

/// Per-job bookkeeping, readable via `stats()`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct JobStats {
    pub execution_count: u64,
    pub failure_count: u64,
    /// Skips by reason, e.g. "breaker-open" or "queue-health".
    pub skip_counts: HashMap<String, u64>,
    pub last_execution: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_error: Option<String>,
    pub is_enabled: bool,
}

struct JobEntry {
    schedule: &'static str,
    timezone: chrono_tz::Tz,
    gate: Option<JobGate>,
    body: JobBody,
    stats: JobStats,
}

/// Shared registry driving both cron ticks and manual runs.
#[derive(Default)]
struct JobRegistry {
    jobs: Mutex<HashMap<&'static str, JobEntry>>,
}

impl JobRegistry {
    /// Execute a job by name: enabled check, gate, body, stats.
    async fn execute(&self, name: &str) -> Result<RunOutcome, SchedulerError> {
        let (gate, body, enabled) = {
            let jobs = self.jobs.lock().unwrap();
            let entry = jobs
                .get(name)
                .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;
            (entry.gate.clone(), entry.body.clone(), entry.stats.is_enabled)
        };

        if !enabled {
            debug!(job = name, "Job disabled, skipping tick");
            self.record_skip(name, "disabled");
            return Ok(RunOutcome::Skipped("disabled".to_string()));
        }

        if let Some(gate) = gate {
            if let Some(reason) = gate().await {
                info!(job = name, reason = %reason, "Skipping tick: gate closed");
                self.record_skip(name, &reason);
                return Ok(RunOutcome::Skipped(reason));
            }
        }

        let start = std::time::Instant::now();
        let result = body().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                self.record_run(name, duration_ms, None);
                debug!(job = name, duration_ms, "Job tick completed");
                Ok(RunOutcome::Completed)
            }
            Err(e) => {
                warn!(job = name, duration_ms, error = %e, "Job tick failed");
                self.record_run(name, duration_ms, Some(e.clone()));
                Ok(RunOutcome::Failed(e))
            }
        }
    }

    fn record_run(&self, name: &str, duration_ms: u64, error: Option<String>) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(entry) = jobs.get_mut(name) {
            entry.stats.execution_count += 1;
            entry.stats.last_execution = Some(Utc::now());
            entry.stats.last_duration_ms = Some(duration_ms);
            if let Some(e) = error {
                entry.stats.failure_count += 1;
                entry.stats.last_error = Some(e);
            } else {
                entry.stats.last_error = None;
            }
        }
    }

    fn record_skip(&self, name: &str, reason: &str) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(entry) = jobs.get_mut(name) {
            *entry
                .stats
                .skip_counts
                .entry(reason.to_string())
                .or_insert(0) += 1;
        }
    }
}

/// The cron runner.
pub struct CronRunner {
    sched: JobScheduler,
    registry: Arc<JobRegistry>,
}

impl CronRunner {
    pub async fn new() -> Result<Self, SchedulerError> {
        Ok(Self {
            sched: JobScheduler::new().await?,
            registry: Arc::new(JobRegistry::default()),
        })
    }

    /// Register a job with the underlying cron scheduler.
    pub async fn add(&mut self, spec: ScheduledJobSpec) -> Result<(), SchedulerError> {
        let ScheduledJobSpec {
            name,
            schedule,
            timezone,
            gate,
            body,
        } = spec;

        {
            let mut jobs = self.registry.jobs.lock().unwrap();
            jobs.insert(
                name,
                JobEntry {
                    schedule,
                    timezone,
                    gate,
                    body,
                    stats: JobStats {
                        is_enabled: true,
                        ..JobStats::default()
                    },
                },
            );
        }

        let registry = Arc::clone(&self.registry);
        let job = Job::new_async_tz(schedule, timezone, move |_uuid, _lock| {
            let registry = Arc::clone(&registry);
            Box::pin(async move {
                if let Err(e) = registry.execute(name).await {
                    error!(job = name, error = %e, "Scheduled execution error");
                }
            })
        })?;

        self.sched.add(job).await?;

        info!(job = name, schedule = schedule, timezone = %timezone, "Registered cron job");
        Ok(())
    }

    /// Start firing schedules.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.sched.start().await?;
        info!("Cron runner started");
        Ok(())
    }

    /// Stop the scheduler. Running bodies finish; no further ticks fire.
    ///
    /// The underlying scheduler handle is cloneable, so shutdown works from
    /// a shared reference (the runner is typically behind an Arc).
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let mut sched = self.sched.clone();
        sched.shutdown().await?;
        info!("Cron runner stopped");
        Ok(())
    }

    /// Run a job body now, bypassing the schedule but honoring the gate.
    pub async fn run_manually(&self, name: &str) -> Result<RunOutcome, SchedulerError> {
        info!(job = name, "Manual execution requested");
        self.registry.execute(name).await
    }

    /// Enable or disable a job live. Disabled jobs record skipped ticks.
    pub fn toggle(&self, name: &str, enabled: bool) -> Result<(), SchedulerError> {
        let mut jobs = self.registry.jobs.lock().unwrap();
        let entry = jobs
            .get_mut(name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;
        entry.stats.is_enabled = enabled;
        info!(job = name, enabled, "Toggled cron job");
        Ok(())
    }

    /// Stats for one job.
    pub fn stats(&self, name: &str) -> Option<JobStats> {
        self.registry
            .jobs
            .lock()
            .unwrap()
            .get(name)
            .map(|e| e.stats.clone())
    }

    /// Stats for every registered job, with schedule metadata.
    pub fn all_stats(&self) -> HashMap<String, (String, JobStats)> {
        self.registry
            .jobs
            .lock()
            .unwrap()
            .iter()
            .map(|(name, entry)| {
                (
                    name.to_string(),
                    (
                        format!("{} ({})", entry.schedule, entry.timezone),
                        entry.stats.clone(),
                    ),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn body_counting(counter: Arc<AtomicU32>) -> JobBody {
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    fn body_failing() -> JobBody {
        Arc::new(|| Box::pin(async { Err("boom".to_string()) }))
    }

    async fn runner_with(name: &'static str, body: JobBody, gate: Option<JobGate>) -> CronRunner {
        let mut runner = CronRunner::new().await.unwrap();
        runner
            .add(ScheduledJobSpec {
                name,
                // Far-future tick; tests drive the body manually
                schedule: "0 0 0 1 1 *",
                timezone: chrono_tz::UTC,
                gate,
                body,
            })
            .await
            .unwrap();
        runner
    }

    #[tokio::test]
    async fn test_manual_run_records_stats() {
        let counter = Arc::new(AtomicU32::new(0));
        let runner = runner_with("job-a", body_counting(Arc::clone(&counter)), None).await;

        let outcome = runner.run_manually("job-a").await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let stats = runner.stats("job-a").unwrap();
        assert_eq!(stats.execution_count, 1);
        assert_eq!(stats.failure_count, 0);
        assert!(stats.last_execution.is_some());
        assert!(stats.last_duration_ms.is_some());
        assert!(stats.is_enabled);
    }

    #[tokio::test]
    async fn test_failed_run_records_error() {
        let runner = runner_with("job-b", body_failing(), None).await;

        let outcome = runner.run_manually("job-b").await.unwrap();
        assert_eq!(outcome, RunOutcome::Failed("boom".to_string()));

        let stats = runner.stats("job-b").unwrap();
        assert_eq!(stats.execution_count, 1);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_gate_skip_records_reason() {
        let counter = Arc::new(AtomicU32::new(0));
        let gate: JobGate = Arc::new(|| Box::pin(async { Some("breaker-open".to_string()) }));
        let runner = runner_with("job-c", body_counting(Arc::clone(&counter)), Some(gate)).await;

        let outcome = runner.run_manually("job-c").await.unwrap();
        assert_eq!(outcome, RunOutcome::Skipped("breaker-open".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        let stats = runner.stats("job-c").unwrap();
        assert_eq!(stats.execution_count, 0);
        assert_eq!(stats.skip_counts.get("breaker-open"), Some(&1));
    }

    #[tokio::test]
    async fn test_toggle_disables_execution() {
        let counter = Arc::new(AtomicU32::new(0));
        let runner = runner_with("job-d", body_counting(Arc::clone(&counter)), None).await;

        runner.toggle("job-d", false).unwrap();
        let outcome = runner.run_manually("job-d").await.unwrap();
        assert_eq!(outcome, RunOutcome::Skipped("disabled".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        runner.toggle("job-d", true).unwrap();
        let outcome = runner.run_manually("job-d").await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_job_errors() {
        let runner = CronRunner::new().await.unwrap();
        assert!(matches!(
            runner.run_manually("missing").await,
            Err(SchedulerError::UnknownJob(_))
        ));
        assert!(matches!(
            runner.toggle("missing", true),
            Err(SchedulerError::UnknownJob(_))
        ));
    }

    #[tokio::test]
    async fn test_all_stats_includes_schedule() {
        let counter = Arc::new(AtomicU32::new(0));
        let runner = runner_with("job-e", body_counting(counter), None).await;

        let all = runner.all_stats();
        let (schedule, stats) = all.get("job-e").unwrap();
        assert!(schedule.contains("0 0 0 1 1 *"));
        assert!(schedule.contains("UTC"));
        assert_eq!(stats.execution_count, 0);
    }
}
