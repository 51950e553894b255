//! Integration tests for the export orchestrator with the built-in
//! generators.
//!
//! Tests cover:
//! - Authorization and selection validation
//! - Per-format interactive ceilings
//! - Single vs multi-record output and filenames
//! - Partially missing selections

mod common;

use common::{report, store_with};
use reportes_core::config::ExportConfig;
use reportes_core::error::ErrorCode;
use reportes_core::export::{
    ExportFormat, ExportOptions, ExportOrchestrator, ExportRequest, GeneratorRegistry,
    InMemoryReportStore,
};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn orchestrator(count: i64) -> ExportOrchestrator {
    ExportOrchestrator::new(
        store_with(count, "ana"),
        GeneratorRegistry::with_defaults(),
        ExportConfig::default(),
    )
}

fn is_timestamped(name: &str, prefix: &str, ext: &str) -> bool {
    let Some(rest) = name.strip_prefix(prefix) else {
        return false;
    };
    let Some(stamp) = rest.strip_suffix(ext) else {
        return false;
    };
    // YYYYMMDD_HHMMSS
    stamp.len() == 15
        && stamp.chars().enumerate().all(|(i, c)| if i == 8 { c == '_' } else { c.is_ascii_digit() })
}

// ============================================================================
// Validation Tests
// ============================================================================

#[tokio::test]
async fn test_pdf_over_limit_is_rejected() {
    let request = ExportRequest::new((1..=51).collect(), ExportFormat::Pdf);
    let error = orchestrator(60).export(&request, "ana", true).await.unwrap_err();

    assert_eq!(error.code(), ErrorCode::ValidationError);
    assert!(error.user_message().contains("50"));
    assert!(error.user_message().contains("51"));
}

#[tokio::test]
async fn test_json_over_limit_is_rejected() {
    let request = ExportRequest::new((1..=101).collect(), ExportFormat::Json);
    let error = orchestrator(120).export(&request, "ana", true).await.unwrap_err();

    assert_eq!(error.code(), ErrorCode::ValidationError);
    assert!(error.user_message().contains("100"));
    assert!(error.user_message().contains("101"));
}

#[tokio::test]
async fn test_limits_are_inclusive() {
    let exporter = orchestrator(100);

    let pdf = ExportRequest::new((1..=50).collect(), ExportFormat::Pdf);
    assert_eq!(assert_ok!(exporter.export(&pdf, "ana", true).await).report_count, 50);

    let json = ExportRequest::new((1..=100).collect(), ExportFormat::Json);
    assert_eq!(assert_ok!(exporter.export(&json, "ana", true).await).report_count, 100);
}

#[tokio::test]
async fn test_empty_selection_is_rejected() {
    let request = ExportRequest::new(vec![], ExportFormat::Json);
    let error = assert_err!(orchestrator(3).export(&request, "ana", true).await);

    assert_eq!(error.code(), ErrorCode::ValidationError);
    assert!(error.user_message().contains("at least one report"));
}

#[tokio::test]
async fn test_unprivileged_caller_is_forbidden() {
    let request = ExportRequest::new(vec![1], ExportFormat::Pdf);
    let error = orchestrator(3).export(&request, "luis", false).await.unwrap_err();

    assert_eq!(error.code(), ErrorCode::Forbidden);
}

#[tokio::test]
async fn test_nothing_resolvable_is_not_found() {
    let request = ExportRequest::new(vec![404, 405], ExportFormat::Pdf);
    let error = orchestrator(3).export(&request, "ana", true).await.unwrap_err();

    assert_eq!(error.code(), ErrorCode::RecordNotFound);
}

#[test]
fn test_requires_background() {
    let exporter = orchestrator(0);

    assert!(exporter.requires_background(&ExportRequest::new((1..=51).collect(), ExportFormat::Pdf)));
    assert!(!exporter.requires_background(&ExportRequest::new((1..=51).collect(), ExportFormat::Json)));
}

// ============================================================================
// Output Tests
// ============================================================================

#[tokio::test]
async fn test_multi_record_pdf() {
    let request = ExportRequest::new(vec![1, 2, 3], ExportFormat::Pdf);
    let result = orchestrator(3).export(&request, "ana", true).await.unwrap();

    assert_eq!(result.report_count, 3);
    assert_eq!(result.content_type, "application/pdf");
    assert!(result.content.starts_with(b"%PDF-"));
    assert!(
        is_timestamped(&result.filename, "reportes_3_", ".pdf"),
        "unexpected filename {}",
        result.filename
    );
}

#[tokio::test]
async fn test_single_record_json_uses_folio() {
    let request = ExportRequest::new(vec![7], ExportFormat::Json);
    let result = orchestrator(10).export(&request, "ana", true).await.unwrap();

    assert_eq!(result.report_count, 1);
    assert_eq!(result.content_type, "application/json");
    assert!(is_timestamped(&result.filename, "reporte_INC-000007_", ".json"));

    let body: serde_json::Value = serde_json::from_slice(&result.content).unwrap();
    assert_eq!(body["report"]["id"], 7);
    assert!(body.get("reports").is_none());
}

#[tokio::test]
async fn test_partially_missing_selection_exports_the_rest() {
    let request = ExportRequest::new(vec![1, 99, 2], ExportFormat::Json);
    let result = orchestrator(2).export(&request, "ana", true).await.unwrap();

    assert_eq!(result.report_count, 2);
    let body: serde_json::Value = serde_json::from_slice(&result.content).unwrap();
    let ids: Vec<i64> = body["reports"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn test_one_resolvable_of_many_takes_single_path() {
    let request = ExportRequest::new(vec![98, 3, 99], ExportFormat::Json);
    let result = orchestrator(3).export(&request, "ana", true).await.unwrap();

    assert_eq!(result.report_count, 1);
    assert!(result.filename.starts_with("reporte_INC-000003_"));
}

#[tokio::test]
async fn test_history_only_with_option() {
    let mut with_history = report(1, "ana");
    with_history.history.push(reportes_core::export::ReportEvent {
        at: chrono::Utc::now(),
        author: "crew-4".to_string(),
        note: "Patched".to_string(),
    });
    let store: InMemoryReportStore = vec![with_history].into_iter().collect();
    let exporter = ExportOrchestrator::new(
        Arc::new(store),
        GeneratorRegistry::with_defaults(),
        ExportConfig::default(),
    );

    let plain = ExportRequest::new(vec![1], ExportFormat::Json);
    let result = exporter.export(&plain, "ana", true).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&result.content).unwrap();
    assert!(body["report"].get("history").is_none());

    let detailed = plain.with_options(ExportOptions {
        include_history: true,
        ..ExportOptions::default()
    });
    let result = exporter.export(&detailed, "ana", true).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&result.content).unwrap();
    assert_eq!(body["report"]["history"][0]["note"], "Patched");
}
