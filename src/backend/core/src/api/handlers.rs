//! API request handlers.
//!
//! All handlers return `Result<impl IntoResponse, ReportesError>` so errors
//! map to HTTP status codes through `ReportesError`'s `IntoResponse`.

use axum::{
    extract::{Path, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        StatusCode,
    },
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::middleware::Caller;
use super::{ApiResponse, AppState};
use crate::error::ReportesError;
use crate::export::ExportRequest;
use crate::jobs::JobId;

// ═══════════════════════════════════════════════════════════════════════════════
// Health and Metrics
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let delivery = state.pipeline.get_delivery_health();

    Json(serde_json::json!({
        "status": if delivery.healthy { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "delivery": delivery,
        "jobs": state.pipeline.runner_stats(),
        "ai": state.pipeline.ai_metrics(),
    }))
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Exports
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn create_export(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<ExportRequest>,
) -> Result<impl IntoResponse, ReportesError> {
    let result = state
        .pipeline
        .submit_export(&request, &caller.user_id, caller.is_privileged)
        .await?;

    let disposition = format!("attachment; filename=\"{}\"", result.filename);
    Ok((
        [
            (CONTENT_TYPE, result.content_type.to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        result.content,
    ))
}

#[derive(Debug, Deserialize)]
pub struct BackgroundExportRequest {
    #[serde(flatten)]
    pub request: ExportRequest,
    /// Where the outcome is sent
    pub notify_address: String,
}

#[derive(Debug, Serialize)]
pub struct BackgroundExportResponse {
    pub job_id: JobId,
    pub status_url: String,
}

pub async fn create_background_export(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<BackgroundExportRequest>,
) -> Result<impl IntoResponse, ReportesError> {
    if !caller.is_privileged {
        return Err(ReportesError::forbidden(
            "You do not have permission to export reports",
        ));
    }

    let job_id = state
        .pipeline
        .schedule_background_export(body.request, &caller.user_id, &body.notify_address)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(BackgroundExportResponse {
            job_id,
            status_url: format!("/api/v1/jobs/{}", job_id),
        })),
    ))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Jobs
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn get_job_status(
    State(state): State<AppState>,
    _caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ReportesError> {
    let id: JobId = id.parse()?;
    Ok(Json(ApiResponse::success(state.pipeline.get_job_status(id))))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Delivery
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn delivery_health(
    State(state): State<AppState>,
    _caller: Caller,
) -> impl IntoResponse {
    Json(ApiResponse::success(state.pipeline.get_delivery_health()))
}

pub async fn process_delivery_queue(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<impl IntoResponse, ReportesError> {
    if !caller.is_privileged {
        return Err(ReportesError::forbidden(
            "Only administrators can drain the delivery queue",
        ));
    }

    let report = state.pipeline.process_delivery_queue().await;
    tracing::info!(
        caller_id = %caller.user_id,
        delivered = report.delivered,
        requeued = report.requeued,
        "Delivery queue drained on request"
    );
    Ok(Json(ApiResponse::success(report)))
}
