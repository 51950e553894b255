//! Router-level tests for the HTTP API.
//!
//! Tests cover:
//! - Interactive export bytes and headers
//! - Caller identity and privilege checks
//! - Background scheduling and job status
//! - Delivery health, queue processing, health check and metrics

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{store_with, RecordingTransport};
use reportes_core::api::{build_router, AppState};
use reportes_core::config::Config;
use reportes_core::pipeline::ExportPipeline;
use reportes_core::telemetry::MetricsRegistry;

fn app() -> Router {
    let pipeline = ExportPipeline::with_transport(
        &Config::default(),
        store_with(60, "ana"),
        RecordingTransport::new(),
    );
    build_router(AppState::new(pipeline, MetricsRegistry::disabled()))
}

fn post_json(uri: &str, user: Option<&str>, privileged: bool, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    if privileged {
        builder = builder.header("x-user-privileged", "true");
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Interactive Export
// ============================================================================

#[tokio::test]
async fn test_export_returns_file_with_headers() {
    let response = app()
        .oneshot(post_json(
            "/api/v1/exports",
            Some("ana"),
            true,
            json!({"report_ids": [1, 2], "format": "json"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.starts_with("attachment; filename=\"reportes_2_"));
    assert!(disposition.ends_with(".json\""));
    assert!(response.headers().contains_key("x-api-version"));

    let body = json_body(response).await;
    assert_eq!(body["reports"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_export_without_identity_is_unauthorized() {
    let response = app()
        .oneshot(post_json(
            "/api/v1/exports",
            None,
            true,
            json!({"report_ids": [1], "format": "pdf"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_export_by_unprivileged_caller_is_forbidden() {
    let response = app()
        .oneshot(post_json(
            "/api/v1/exports",
            Some("luis"),
            false,
            json!({"report_ids": [1], "format": "pdf"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_export_over_limit_is_unprocessable() {
    let ids: Vec<i64> = (1..=51).collect();
    let response = app()
        .oneshot(post_json(
            "/api/v1/exports",
            Some("ana"),
            true,
            json!({"report_ids": ids, "format": "pdf"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

// ============================================================================
// Background Jobs
// ============================================================================

#[tokio::test]
async fn test_background_export_is_accepted_and_trackable() {
    let app = app();
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/exports/background",
            Some("ana"),
            true,
            json!({"report_ids": [1, 2, 3], "format": "pdf", "notify_address": "ana@example.com"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    let status_url = body["data"]["status_url"].as_str().unwrap().to_string();
    assert!(status_url.starts_with("/api/v1/jobs/"));

    let response = app.oneshot(get(&status_url, Some("ana"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_ne!(body["data"]["state"], "not_found");
}

#[tokio::test]
async fn test_background_export_requires_privilege() {
    let response = app()
        .oneshot(post_json(
            "/api/v1/exports/background",
            Some("luis"),
            false,
            json!({"report_ids": [1], "format": "json", "notify_address": "luis@example.com"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_job_reports_not_found_state() {
    let uri = format!("/api/v1/jobs/{}", uuid::Uuid::new_v4());
    let response = app().oneshot(get(&uri, Some("ana"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["state"], "not_found");
}

#[tokio::test]
async fn test_malformed_job_id_is_unprocessable() {
    let response = app().oneshot(get("/api/v1/jobs/not-a-uuid", Some("ana"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// ============================================================================
// Delivery and Health
// ============================================================================

#[tokio::test]
async fn test_delivery_health_snapshot() {
    let response = app().oneshot(get("/api/v1/delivery/health", Some("ana"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["dependency"], "recording");
    assert_eq!(body["data"]["circuit_state"], "closed");
    assert_eq!(body["data"]["queue_length"], 0);
    assert_eq!(body["data"]["healthy"], true);
}

#[tokio::test]
async fn test_queue_processing_requires_privilege() {
    let app = app();

    let response = app
        .clone()
        .oneshot(post_json("/api/v1/delivery/queue/process", Some("luis"), false, json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(post_json("/api/v1/delivery/queue/process", Some("ana"), true, json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["delivered"], 0);
}

#[tokio::test]
async fn test_health_check_reports_components() {
    let response = app().oneshot(get("/health", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["delivery"]["circuit_state"], "closed");
    assert_eq!(body["jobs"]["running"], 0);
    assert!(body["ai"].is_null());
}

#[tokio::test]
async fn test_metrics_endpoint_is_text() {
    let response = app().oneshot(get("/metrics", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
}
