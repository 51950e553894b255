//! Background export jobs.
//!
//! ```text
//! JobScheduler ──submit──▶ ConcurrencyLimitedJobRunner ──permit──▶ ExportOrchestrator
//!      ▲                          │
//!      └──── terminal error ──────┤
//!                                 └──outcome──▶ JobNotifier ──▶ ResilientDeliveryService
//! ```
//!
//! The scheduler owns resubmission; the runner owns admission, deadlines
//! and the single outcome notification per job.

pub mod job;
pub mod notification;
pub mod runner;
pub mod scheduler;

pub use job::{JobId, JobRecord, JobRegistry, JobSpec, JobState, JobStatus, JobStatusSnapshot, JobSummary};
pub use notification::{CancelReason, JobNotifier, JobOutcome};
pub use runner::{ConcurrencyLimitedJobRunner, JobHandle, JobRunnerConfig, RunnerStatsSnapshot};
pub use scheduler::{should_resubmit, JobScheduler};
