//! Background export scheduling with whole-job resubmission.

use crate::config::JobsConfig;
use crate::error::{ErrorCode, ReportesError, Result};
use crate::export::{ExportMode, ExportRequest};
use crate::jobs::job::{JobId, JobSpec, JobStatusSnapshot};
use crate::jobs::runner::{ConcurrencyLimitedJobRunner, JobHandle};
use crate::telemetry::JobMetrics;

/// Accepts background export requests and supervises their jobs.
///
/// A job that ends with an infrastructure error (anything other than a
/// rejected request or an external cancellation) is resubmitted as a new
/// job, linked to its predecessor, up to `infrastructure_retries` times.
#[derive(Debug, Clone)]
pub struct JobScheduler {
    runner: ConcurrencyLimitedJobRunner,
    infrastructure_retries: u32,
}

impl JobScheduler {
    pub fn new(runner: ConcurrencyLimitedJobRunner, config: &JobsConfig) -> Self {
        Self {
            runner,
            infrastructure_retries: config.infrastructure_retries,
        }
    }

    pub fn with_infrastructure_retries(mut self, retries: u32) -> Self {
        self.infrastructure_retries = retries;
        self
    }

    pub fn runner(&self) -> &ConcurrencyLimitedJobRunner {
        &self.runner
    }

    /// Schedule a background export and return its job id.
    ///
    /// An empty selection expands to every report the owner can access.
    /// The background ceiling is checked here so oversize requests fail
    /// before a job exists.
    pub async fn schedule(
        &self,
        mut request: ExportRequest,
        owner_id: &str,
        notify_address: &str,
    ) -> Result<JobId> {
        if notify_address.trim().is_empty() {
            return Err(ReportesError::validation("A notification address is required"));
        }

        if request.report_ids.is_empty() {
            request.report_ids = self
                .runner
                .orchestrator()
                .store()
                .accessible_ids(owner_id)
                .await?;
            tracing::debug!(
                owner_id = %owner_id,
                expanded = request.report_ids.len(),
                "Expanded empty selection to accessible reports"
            );
        }
        if request.report_ids.is_empty() {
            return Err(ReportesError::validation("Select at least one report to export"));
        }

        let limit = self
            .runner
            .orchestrator()
            .limits()
            .max_records(request.format, ExportMode::Background);
        if request.report_ids.len() > limit {
            return Err(ReportesError::selection_too_large(
                request.format,
                limit,
                request.report_ids.len(),
            ));
        }

        let spec = JobSpec::new(owner_id, notify_address, request);
        let handle = self.runner.submit(spec.clone())?;
        let id = handle.id;

        tokio::spawn(supervise(
            self.runner.clone(),
            handle,
            spec,
            self.infrastructure_retries,
        ));

        Ok(id)
    }

    pub fn status(&self, id: JobId) -> JobStatusSnapshot {
        self.runner.status(id)
    }
}

/// Whether a terminal error warrants running the whole job again.
pub fn should_resubmit(error: &ReportesError) -> bool {
    !matches!(
        error.code(),
        ErrorCode::ValidationError
            | ErrorCode::Unauthorized
            | ErrorCode::Forbidden
            | ErrorCode::RecordNotFound
            | ErrorCode::Cancelled
    )
}

async fn supervise(
    runner: ConcurrencyLimitedJobRunner,
    mut handle: JobHandle,
    mut spec: JobSpec,
    retries: u32,
) {
    loop {
        let id = handle.id;
        let error = match handle.join().await {
            Ok(_) => return,
            Err(error) => error,
        };

        let resubmissions = spec.attempt.saturating_sub(1);
        if resubmissions >= retries || !should_resubmit(&error) || runner.is_shutting_down() {
            tracing::warn!(
                job_id = %id,
                attempt = spec.attempt,
                error_code = %error.code(),
                "Job finished with error; not resubmitting"
            );
            return;
        }

        spec = spec.resubmission(id);
        handle = match runner.submit(spec.clone()) {
            Ok(next) => next,
            Err(submit_error) => {
                tracing::error!(
                    retry_of = %id,
                    error = %submit_error.describe(),
                    "Could not resubmit job"
                );
                return;
            }
        };

        JobMetrics::job_resubmitted();
        tracing::info!(
            job_id = %handle.id,
            retry_of = %id,
            attempt = spec.attempt,
            error_code = %error.code(),
            "Resubmitted failed job"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_request_errors_are_not_resubmitted() {
        assert!(!should_resubmit(&ReportesError::validation("empty")));
        assert!(!should_resubmit(&ReportesError::cancelled("Export job")));
        assert!(!should_resubmit(&ReportesError::not_found("Reports", "1")));
    }

    #[test]
    fn test_infrastructure_errors_are_resubmitted() {
        assert!(should_resubmit(&ReportesError::internal("panic")));
        assert!(should_resubmit(&ReportesError::deadline_exceeded(Duration::from_secs(120))));
        assert!(should_resubmit(&ReportesError::generation_failed("PDF", "io")));
    }
}
