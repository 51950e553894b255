//! HTTP surface for the export pipeline.
//!
//! Routes:
//! - `POST /api/v1/exports` - interactive export, returns the file
//! - `POST /api/v1/exports/background` - schedule a background export (202)
//! - `GET  /api/v1/jobs/:id` - background job status
//! - `GET  /api/v1/delivery/health` - delivery health snapshot
//! - `POST /api/v1/delivery/queue/process` - drain the failure queue now
//! - `GET  /health`, `GET /metrics`
//!
//! Caller identity is taken from `X-User-Id` / `X-User-Privileged`, which
//! the fronting auth layer sets.

mod handlers;
pub mod middleware;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::pipeline::ExportPipeline;
use crate::telemetry::MetricsRegistry;

pub use middleware::Caller;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: ExportPipeline,
    pub metrics: MetricsRegistry,
}

impl AppState {
    pub fn new(pipeline: ExportPipeline, metrics: MetricsRegistry) -> Self {
        Self { pipeline, metrics }
    }
}

fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/exports", post(handlers::create_export))
        .route("/exports/background", post(handlers::create_background_export))
        .route("/jobs/:id", get(handlers::get_job_status))
        .route("/delivery/health", get(handlers::delivery_health))
        .route("/delivery/queue/process", post(handlers::process_delivery_queue))
}

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .nest("/api/v1", v1_router())
        .layer(axum_middleware::from_fn(middleware::track_request_duration))
        .layer(axum_middleware::from_fn(middleware::response_headers))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// API response wrapper.
#[derive(Debug, serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("test data");
        assert!(response.success);
        assert_eq!(response.data, Some("test data"));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_api_response_error() {
        let response: ApiResponse<()> = ApiResponse::error("test error");
        assert!(!response.success);
        assert!(response.data.is_none());
        assert_eq!(response.error, Some("test error".to_string()));
    }
}
