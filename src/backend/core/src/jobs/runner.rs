//! Concurrency-limited job runner.
//!
//! Background exports run on a fixed pool of permits:
//! - A job stays `Enqueued` until it holds a permit; waiters are admitted FIFO
//! - The deadline clock starts when the job starts running
//! - Every job ends with exactly one notification, whatever the outcome
//! - The terminal error is returned through the `JobHandle` so a supervisor
//!   can decide on a resubmission

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::JobsConfig;
use crate::error::{ErrorCode, ReportesError, Result};
use crate::export::{ExportMode, ExportOrchestrator};
use crate::jobs::job::{JobId, JobRegistry, JobSpec, JobState, JobStatusSnapshot, JobSummary};
use crate::jobs::notification::{CancelReason, JobNotifier, JobOutcome};
use crate::telemetry::JobMetrics;

/// Configuration for the job runner.
#[derive(Debug, Clone)]
pub struct JobRunnerConfig {
    /// Maximum number of jobs running at once
    pub max_concurrent_jobs: usize,
    /// Wall-clock limit per job, from the moment it starts running
    pub job_deadline: Duration,
    /// How long a finished job's status stays queryable
    pub status_retention: Duration,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self::from(&JobsConfig::default())
    }
}

impl From<&JobsConfig> for JobRunnerConfig {
    fn from(config: &JobsConfig) -> Self {
        Self {
            max_concurrent_jobs: config.max_concurrent_jobs.max(1),
            job_deadline: config.job_deadline,
            status_retention: config.status_retention,
        }
    }
}

impl JobRunnerConfig {
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_job_deadline(mut self, deadline: Duration) -> Self {
        self.job_deadline = deadline;
        self
    }

    pub fn with_status_retention(mut self, retention: Duration) -> Self {
        self.status_retention = retention;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Statistics
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct RunnerStats {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    total_wait_time_us: AtomicU64,
}

impl RunnerStats {
    fn record_admission(&self, waited: Duration) {
        let running = self.running.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_running.fetch_max(running, Ordering::Relaxed);
        self.total_wait_time_us
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_terminal(&self, state: JobState) {
        let counter = match state {
            JobState::Succeeded => &self.succeeded,
            JobState::Failed => &self.failed,
            _ => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time runner statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RunnerStatsSnapshot {
    pub max_concurrent_jobs: usize,
    pub available_permits: usize,
    pub running: usize,
    /// Jobs waiting for a permit
    pub queued: usize,
    pub peak_running: usize,
    /// Status records currently held, finished ones included
    pub tracked_jobs: usize,
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub avg_wait_time_ms: f64,
}

/// A held execution slot. Releases the permit and the running count on drop.
struct JobSlot {
    _permit: OwnedSemaphorePermit,
    stats: Arc<RunnerStats>,
}

impl Drop for JobSlot {
    fn drop(&mut self) {
        self.stats.running.fetch_sub(1, Ordering::Relaxed);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handle
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle to a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    pub id: JobId,
    join: JoinHandle<Result<JobSummary>>,
}

impl JobHandle {
    /// Wait for the job to finish. A failed or cancelled job returns the
    /// error that terminated it.
    pub async fn join(self) -> Result<JobSummary> {
        self.join
            .await
            .map_err(|e| ReportesError::internal(format!("Job task {} aborted: {}", self.id, e)))?
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Runner
// ═══════════════════════════════════════════════════════════════════════════════

struct RunnerShared {
    orchestrator: Arc<ExportOrchestrator>,
    notifier: JobNotifier,
    semaphore: Arc<Semaphore>,
    config: JobRunnerConfig,
    jobs: JobRegistry,
    stats: Arc<RunnerStats>,
    shutdown: CancellationToken,
}

/// Runs background exports with a bounded number in flight.
#[derive(Clone)]
pub struct ConcurrencyLimitedJobRunner {
    shared: Arc<RunnerShared>,
}

impl std::fmt::Debug for ConcurrencyLimitedJobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyLimitedJobRunner")
            .field("config", &self.shared.config)
            .field("jobs", &self.shared.jobs.len())
            .finish()
    }
}

impl ConcurrencyLimitedJobRunner {
    pub fn new(
        orchestrator: Arc<ExportOrchestrator>,
        notifier: JobNotifier,
        config: JobRunnerConfig,
    ) -> Self {
        tracing::info!(
            max_concurrent_jobs = config.max_concurrent_jobs,
            job_deadline_s = config.job_deadline.as_secs(),
            "Creating job runner"
        );

        Self {
            shared: Arc::new(RunnerShared {
                orchestrator,
                notifier,
                semaphore: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
                jobs: JobRegistry::with_retention(config.status_retention),
                config,
                stats: Arc::new(RunnerStats::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &JobRunnerConfig {
        &self.shared.config
    }

    pub fn orchestrator(&self) -> &Arc<ExportOrchestrator> {
        &self.shared.orchestrator
    }

    /// Submit a job. It is `Enqueued` as soon as this returns.
    pub fn submit(&self, spec: JobSpec) -> Result<JobHandle> {
        self.submit_with_cancellation(spec, CancellationToken::new())
    }

    /// Submit a job that also stops when `cancel` fires.
    pub fn submit_with_cancellation(
        &self,
        spec: JobSpec,
        cancel: CancellationToken,
    ) -> Result<JobHandle> {
        if self.shared.shutdown.is_cancelled() {
            return Err(ReportesError::new(
                ErrorCode::Cancelled,
                "The job runner is shutting down; job not accepted",
            ));
        }

        let id = JobId::new();
        self.shared.jobs.insert(id, &spec);
        self.shared.stats.submitted.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            job_id = %id,
            owner_id = %spec.owner_id,
            format = %spec.request.format,
            requested = spec.request.report_ids.len(),
            attempt = spec.attempt,
            "Job enqueued"
        );

        let shared = self.shared.clone();
        let join = tokio::spawn(async move { run_job(shared, id, spec, cancel).await });

        Ok(JobHandle { id, join })
    }

    /// Current status of a job. Unknown ids report `NotFound`.
    pub fn status(&self, id: JobId) -> JobStatusSnapshot {
        self.shared.jobs.snapshot(id)
    }

    pub fn stats(&self) -> RunnerStatsSnapshot {
        let stats = &self.shared.stats;
        let admitted = stats.running.load(Ordering::Relaxed) as u64
            + stats.succeeded.load(Ordering::Relaxed)
            + stats.failed.load(Ordering::Relaxed)
            + stats.cancelled.load(Ordering::Relaxed);
        let total_wait_us = stats.total_wait_time_us.load(Ordering::Relaxed);

        RunnerStatsSnapshot {
            max_concurrent_jobs: self.shared.config.max_concurrent_jobs,
            available_permits: self.shared.semaphore.available_permits(),
            running: stats.running.load(Ordering::Relaxed),
            queued: self.shared.jobs.count_in(JobState::Enqueued),
            peak_running: stats.peak_running.load(Ordering::Relaxed),
            tracked_jobs: self.shared.jobs.len(),
            submitted: stats.submitted.load(Ordering::Relaxed),
            succeeded: stats.succeeded.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            cancelled: stats.cancelled.load(Ordering::Relaxed),
            avg_wait_time_ms: if admitted > 0 {
                (total_wait_us as f64 / admitted as f64) / 1000.0
            } else {
                0.0
            },
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Stop accepting jobs and cancel everything in flight. Queued jobs are
    /// still admitted so each one records its cancellation and notifies.
    pub fn shutdown(&self) {
        tracing::info!(
            running = self.shared.stats.running.load(Ordering::Relaxed),
            "Shutting down job runner"
        );
        self.shared.shutdown.cancel();
    }
}

async fn run_job(
    shared: Arc<RunnerShared>,
    id: JobId,
    spec: JobSpec,
    caller: CancellationToken,
) -> Result<JobSummary> {
    // Admission
    let wait_start = Instant::now();
    let permit = shared.semaphore.clone().acquire_owned().await?;
    shared.stats.record_admission(wait_start.elapsed());
    let _slot = JobSlot {
        _permit: permit,
        stats: shared.stats.clone(),
    };

    shared
        .jobs
        .transition(id, JobState::Running, "Export in progress", None)?;
    JobMetrics::job_started();
    tracing::info!(job_id = %id, attempt = spec.attempt, "Job started");

    let started = Instant::now();
    let deadline = shared.config.job_deadline;
    let job_token = shared.shutdown.child_token();

    let export = shared.orchestrator.export_with(
        &spec.request,
        &spec.owner_id,
        true,
        ExportMode::Background,
        &job_token,
    );

    let outcome = tokio::select! {
        result = AssertUnwindSafe(export).catch_unwind() => match result {
            Ok(Ok(export)) => JobOutcome::Succeeded(export),
            Ok(Err(error)) if error.code() == ErrorCode::Cancelled => {
                JobOutcome::Cancelled(CancelReason::External)
            }
            Ok(Err(error)) => JobOutcome::Failed(error),
            Err(panic) => JobOutcome::Failed(ReportesError::internal(format!(
                "Export panicked: {}",
                panic_message(panic.as_ref())
            ))),
        },
        _ = tokio::time::sleep(deadline) => {
            JobOutcome::Cancelled(CancelReason::Deadline(deadline))
        }
        _ = caller.cancelled() => JobOutcome::Cancelled(CancelReason::External),
        _ = job_token.cancelled() => JobOutcome::Cancelled(CancelReason::External),
    };
    // Stop any work still observing the token.
    job_token.cancel();

    let elapsed = started.elapsed();
    let (state, message) = match &outcome {
        JobOutcome::Succeeded(export) => (
            JobState::Succeeded,
            format!("Exported {} report(s) to {}", export.report_count, export.filename),
        ),
        JobOutcome::Failed(error) => (JobState::Failed, error.describe()),
        JobOutcome::Cancelled(CancelReason::Deadline(limit)) => (
            JobState::Cancelled,
            format!("Cancelled after exceeding the {}s deadline", limit.as_secs()),
        ),
        JobOutcome::Cancelled(CancelReason::External) => {
            (JobState::Cancelled, "Cancelled before completion".to_string())
        }
    };

    match state {
        JobState::Succeeded => tracing::info!(
            job_id = %id,
            duration_ms = elapsed.as_millis() as u64,
            "Job succeeded"
        ),
        _ => tracing::warn!(
            job_id = %id,
            state = %state,
            duration_ms = elapsed.as_millis() as u64,
            reason = %message,
            "Job did not succeed"
        ),
    }

    // The outcome is notified before the job counts as finished.
    shared.notifier.notify(id, &spec.notify_address, &outcome).await;

    let result = match outcome {
        JobOutcome::Succeeded(export) => Ok(JobSummary::from(&export)),
        JobOutcome::Failed(error) => Err(error),
        JobOutcome::Cancelled(CancelReason::Deadline(limit)) => {
            Err(ReportesError::deadline_exceeded(limit))
        }
        JobOutcome::Cancelled(CancelReason::External) => Err(ReportesError::cancelled("Export job")),
    };

    let summary = result.as_ref().ok().cloned();
    shared.jobs.transition(id, state, message, summary)?;
    shared.stats.record_terminal(state);
    JobMetrics::job_finished(state.as_str(), elapsed);

    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
