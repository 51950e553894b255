//! Export data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an incident report in the report store.
pub type ReportId = i64;

// ═══════════════════════════════════════════════════════════════════════════════
// Reports
// ═══════════════════════════════════════════════════════════════════════════════

/// An incident report as seen by the exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    /// Human-facing reference number, e.g. `INC-2024-000123`
    pub folio: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<ReportEvent>,
}

/// One entry in a report's follow-up history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEvent {
    pub at: DateTime<Utc>,
    pub author: String,
    pub note: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Formats
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Json => "json",
        }
    }

    /// Lowercase label used in metrics.
    pub fn as_str(&self) -> &'static str {
        self.extension()
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pdf => write!(f, "PDF"),
            Self::Json => write!(f, "JSON"),
        }
    }
}

/// Which ceiling applies to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    /// Synchronous request; per-format ceilings
    Interactive,
    /// Pre-authorized background job; the larger background ceiling
    Background,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Requests and Results
// ═══════════════════════════════════════════════════════════════════════════════

/// Rendering options passed through to the generators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Document title; generators fall back to a default
    #[serde(default)]
    pub title: Option<String>,
    /// Include the follow-up history of each report
    #[serde(default)]
    pub include_history: bool,
    /// Pretty-print JSON output
    #[serde(default)]
    pub pretty: bool,
}

/// A request to export a set of reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Reports to export. Empty means "all accessible" on the background path.
    #[serde(default)]
    pub report_ids: Vec<ReportId>,
    pub format: ExportFormat,
    #[serde(default)]
    pub options: ExportOptions,
}

impl ExportRequest {
    pub fn new(report_ids: Vec<ReportId>, format: ExportFormat) -> Self {
        Self {
            report_ids,
            format,
            options: ExportOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExportOptions) -> Self {
        self.options = options;
        self
    }
}

/// A generated export artifact.
#[derive(Clone, PartialEq, Eq)]
pub struct ExportResult {
    pub content: Vec<u8>,
    pub filename: String,
    pub content_type: &'static str,
    pub format: ExportFormat,
    pub report_count: usize,
    pub generated_at: DateTime<Utc>,
}

impl ExportResult {
    pub fn size_bytes(&self) -> u64 {
        self.content.len() as u64
    }
}

impl fmt::Debug for ExportResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportResult")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("report_count", &self.report_count)
            .field("size_bytes", &self.content.len())
            .field("generated_at", &self.generated_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_metadata() {
        assert_eq!(ExportFormat::Pdf.content_type(), "application/pdf");
        assert_eq!(ExportFormat::Json.extension(), "json");
        assert_eq!(ExportFormat::Pdf.to_string(), "PDF");
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: ExportRequest = serde_json::from_str(r#"{"format":"json"}"#).unwrap();

        assert!(request.report_ids.is_empty());
        assert_eq!(request.format, ExportFormat::Json);
        assert!(!request.options.include_history);
    }
}
