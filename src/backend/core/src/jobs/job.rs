//! Background export jobs: identity, lifecycle and the status registry.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{ErrorCode, ReportesError, Result};
use crate::export::{ExportFormat, ExportRequest, ExportResult};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for JobId {
    type Err = ReportesError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ReportesError::validation(format!("Invalid job id: {}", s)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job State
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle of a job: `Enqueued → Running → {Succeeded | Failed | Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a permit
    Enqueued,
    /// Holding a permit, export in flight
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Enqueued, Self::Running)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State reported by a status query. Unknown ids map to `NotFound`
/// instead of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Enqueued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    NotFound,
}

impl From<JobState> for JobStatus {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Enqueued => Self::Enqueued,
            JobState::Running => Self::Running,
            JobState::Succeeded => Self::Succeeded,
            JobState::Failed => Self::Failed,
            JobState::Cancelled => Self::Cancelled,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Records
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything needed to run one background export.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub owner_id: String,
    pub notify_address: String,
    pub request: ExportRequest,
    /// 1 for the first run, incremented on each infrastructure resubmission
    pub attempt: u32,
    pub retry_of: Option<JobId>,
}

impl JobSpec {
    pub fn new(
        owner_id: impl Into<String>,
        notify_address: impl Into<String>,
        request: ExportRequest,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            notify_address: notify_address.into(),
            request,
            attempt: 1,
            retry_of: None,
        }
    }

    /// The next infrastructure attempt after `previous` failed.
    pub fn resubmission(&self, previous: JobId) -> Self {
        Self {
            attempt: self.attempt + 1,
            retry_of: Some(previous),
            ..self.clone()
        }
    }
}

/// What a successful job produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub report_count: usize,
    pub format: ExportFormat,
    pub size_bytes: u64,
    pub filename: String,
    pub generated_at: DateTime<Utc>,
}

impl From<&ExportResult> for JobSummary {
    fn from(result: &ExportResult) -> Self {
        Self {
            report_count: result.report_count,
            format: result.format,
            size_bytes: result.size_bytes(),
            filename: result.filename.clone(),
            generated_at: result.generated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub owner_id: String,
    pub format: ExportFormat,
    pub requested: usize,
    pub state: JobState,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attempt: u32,
    pub retry_of: Option<JobId>,
    pub summary: Option<JobSummary>,
}

/// Read-only status view returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatusSnapshot {
    pub id: JobId,
    pub state: JobStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message: String,
    pub attempt: Option<u32>,
    pub retry_of: Option<JobId>,
    pub summary: Option<JobSummary>,
}

impl JobStatusSnapshot {
    fn not_found(id: JobId) -> Self {
        Self {
            id,
            state: JobStatus::NotFound,
            created_at: None,
            started_at: None,
            finished_at: None,
            message: format!("No job with id {}", id),
            attempt: None,
            retry_of: None,
            summary: None,
        }
    }
}

impl From<&JobRecord> for JobStatusSnapshot {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id,
            state: record.state.into(),
            created_at: Some(record.created_at),
            started_at: record.started_at,
            finished_at: record.finished_at,
            message: record.message.clone(),
            attempt: Some(record.attempt),
            retry_of: record.retry_of,
            summary: record.summary.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════════

const DEFAULT_STATUS_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Status of every job the runner has seen. Only the runner writes here.
///
/// Finished jobs stay queryable for `retention` after they finish; older
/// ones are swept when new jobs are inserted and then report `NotFound`.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: DashMap<JobId, JobRecord>,
    retention: Duration,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_STATUS_RETENTION)
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub(crate) fn insert(&self, id: JobId, spec: &JobSpec) {
        self.purge_expired(Utc::now());

        let record = JobRecord {
            id,
            owner_id: spec.owner_id.clone(),
            format: spec.request.format,
            requested: spec.request.report_ids.len(),
            state: JobState::Enqueued,
            message: "Waiting for a free export slot".to_string(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            attempt: spec.attempt,
            retry_of: spec.retry_of,
            summary: None,
        };
        self.jobs.insert(id, record);
    }

    /// Apply a legal state transition; anything else is an internal error.
    pub(crate) fn transition(
        &self,
        id: JobId,
        next: JobState,
        message: impl Into<String>,
        summary: Option<JobSummary>,
    ) -> Result<()> {
        let mut record = self.jobs.get_mut(&id).ok_or_else(|| {
            ReportesError::new(ErrorCode::JobNotFound, format!("No job with id {}", id))
        })?;

        if !record.state.can_transition_to(next) {
            return Err(ReportesError::internal(format!(
                "Illegal job transition {} -> {} for {}",
                record.state, next, id
            )));
        }

        let now = Utc::now();
        match next {
            JobState::Running => record.started_at = Some(now),
            _ if next.is_terminal() => record.finished_at = Some(now),
            _ => {}
        }
        record.state = next;
        record.message = message.into();
        if summary.is_some() {
            record.summary = summary;
        }
        Ok(())
    }

    /// Status query. Never mutates and never fails.
    pub fn snapshot(&self, id: JobId) -> JobStatusSnapshot {
        self.jobs
            .get(&id)
            .map(|record| JobStatusSnapshot::from(record.value()))
            .unwrap_or_else(|| JobStatusSnapshot::not_found(id))
    }

    pub fn state(&self, id: JobId) -> Option<JobState> {
        self.jobs.get(&id).map(|record| record.state)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of jobs currently in `state`.
    pub fn count_in(&self, state: JobState) -> usize {
        self.jobs.iter().filter(|r| r.state == state).count()
    }

    /// Drop finished jobs whose retention ran out by `now`. Jobs that are
    /// still enqueued or running are never removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return 0;
        };
        let cutoff = now - retention;

        let before = self.jobs.len();
        self.jobs.retain(|_, record| {
            !(record.state.is_terminal() && record.finished_at.is_some_and(|at| at < cutoff))
        });
        let purged = before.saturating_sub(self.jobs.len());

        if purged > 0 {
            tracing::debug!(purged, remaining = self.jobs.len(), "Expired job statuses purged");
        }
        purged
    }
}
