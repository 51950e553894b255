//! Job outcome notifications.

use std::sync::Arc;
use std::time::Duration;

use crate::error::ReportesError;
use crate::export::ExportResult;
use crate::jobs::job::JobId;
use crate::resilience::{Attachment, DeliveryMessage, DeliveryOutcome, ResilientDeliveryService};

/// Why a running job was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The job outlived its deadline.
    Deadline(Duration),
    /// The caller or a shutdown cancelled it.
    External,
}

/// Terminal outcome of a background job, as the recipient sees it.
#[derive(Debug)]
pub enum JobOutcome {
    Succeeded(ExportResult),
    Failed(ReportesError),
    Cancelled(CancelReason),
}

impl JobOutcome {
    /// Build the message for `recipient` describing this outcome.
    pub fn to_message(&self, job_id: JobId, recipient: &str) -> DeliveryMessage {
        let to = vec![recipient.to_string()];
        match self {
            Self::Succeeded(result) => DeliveryMessage::new(
                to,
                format!("Your {} export is ready", result.format),
                format!(
                    "Your export of {} report(s) finished.\n\
                     File: {}\nSize: {} bytes\nJob: {}\n",
                    result.report_count,
                    result.filename,
                    result.size_bytes(),
                    job_id
                ),
            )
            .with_attachment(Attachment {
                filename: result.filename.clone(),
                content_type: result.content_type.to_string(),
                data: result.content.clone(),
            }),

            Self::Failed(error) => DeliveryMessage::new(
                to,
                "Your report export failed",
                format!(
                    "We could not complete your export.\nError: {}\nJob: {}\n\
                     Try again with fewer reports or contact support if the problem persists.\n",
                    error.describe(),
                    job_id
                ),
            ),

            Self::Cancelled(CancelReason::Deadline(limit)) => DeliveryMessage::new(
                to,
                "Your report export was cancelled",
                format!(
                    "Your export took longer than the allowed {}s and was cancelled.\nJob: {}\n\
                     Try exporting fewer reports at a time.\n",
                    limit.as_secs(),
                    job_id
                ),
            ),

            Self::Cancelled(CancelReason::External) => DeliveryMessage::new(
                to,
                "Your report export was cancelled",
                format!(
                    "Your export was cancelled before it finished.\nJob: {}\n",
                    job_id
                ),
            ),
        }
    }
}

/// Sends job outcome notifications. Never fails the job: delivery errors
/// are logged and swallowed.
#[derive(Debug, Clone)]
pub struct JobNotifier {
    delivery: Arc<ResilientDeliveryService>,
}

impl JobNotifier {
    pub fn new(delivery: Arc<ResilientDeliveryService>) -> Self {
        Self { delivery }
    }

    pub fn delivery(&self) -> &Arc<ResilientDeliveryService> {
        &self.delivery
    }

    /// Returns `true` when the message was delivered or queued.
    pub async fn notify(&self, job_id: JobId, recipient: &str, outcome: &JobOutcome) -> bool {
        let message = outcome.to_message(job_id, recipient);

        match self.delivery.send_with_retry(message).await {
            Ok(DeliveryOutcome::Delivered) => {
                tracing::debug!(job_id = %job_id, "Job notification delivered");
                true
            }
            Ok(DeliveryOutcome::Queued { queue_len }) => {
                tracing::info!(
                    job_id = %job_id,
                    queue_len = queue_len,
                    "Job notification queued for redelivery"
                );
                true
            }
            Err(error) => {
                tracing::error!(
                    job_id = %job_id,
                    error_code = %error.code(),
                    error = %error.describe(),
                    "Job notification lost"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportFormat;
    use chrono::Utc;

    #[test]
    fn test_success_message_carries_attachment() {
        let result = ExportResult {
            content: b"%PDF-1.4".to_vec(),
            filename: "reportes_3_20240101_120000.pdf".to_string(),
            content_type: "application/pdf",
            format: ExportFormat::Pdf,
            report_count: 3,
            generated_at: Utc::now(),
        };
        let message = JobOutcome::Succeeded(result).to_message(JobId::new(), "ana@example.com");

        let attachment = message.attachment.expect("attachment");
        assert_eq!(attachment.filename, "reportes_3_20240101_120000.pdf");
        assert_eq!(attachment.data, b"%PDF-1.4");
        assert!(message.body.contains("3 report(s)"));
    }

    #[test]
    fn test_failure_message_includes_error_text() {
        let error = ReportesError::generation_failed(ExportFormat::Json, "disk full");
        let message = JobOutcome::Failed(error).to_message(JobId::new(), "ana@example.com");

        assert!(message.body.contains("Failed to generate JSON export: disk full"));
        assert!(message.attachment.is_none());
    }

    #[test]
    fn test_deadline_and_external_cancellation_differ() {
        let id = JobId::new();
        let deadline = JobOutcome::Cancelled(CancelReason::Deadline(Duration::from_secs(120)))
            .to_message(id, "ana@example.com");
        let external = JobOutcome::Cancelled(CancelReason::External).to_message(id, "ana@example.com");

        assert!(deadline.body.contains("120s"));
        assert_ne!(deadline.body, external.body);
    }
}
