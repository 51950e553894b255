//! Request-level plumbing: caller identity, request metrics and standard
//! response headers.

use axum::{
    async_trait,
    extract::{FromRequestParts, MatchedPath, Request},
    http::{
        header::{HeaderName, HeaderValue},
        request::Parts,
    },
    middleware::Next,
    response::Response,
};
use tokio::time::Instant;

use crate::error::ReportesError;
use crate::telemetry::RequestDurationHistogram;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const PRIVILEGED_HEADER: &str = "x-user-privileged";

/// The authenticated caller, as asserted by the upstream auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub is_privileged: bool,
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ReportesError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ReportesError::unauthorized("Missing caller identity"))?
            .to_string();

        let is_privileged = parts
            .headers
            .get(PRIVILEGED_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            user_id,
            is_privileged,
        })
    }
}

/// Records `reportes_http_request_duration_seconds` per matched route.
pub async fn track_request_duration(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let started = Instant::now();
    let response = next.run(req).await;
    RequestDurationHistogram::record(&method, &path, response.status().as_u16(), started.elapsed());

    response
}

/// Adds a request id (echoed or generated) and API version headers.
pub async fn response_headers(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    let _ = headers.try_insert(
        HeaderName::from_static("x-api-version"),
        HeaderValue::from_static("1.0"),
    );
    if let Ok(val) = HeaderValue::from_str(&request_id) {
        let _ = headers.try_insert(HeaderName::from_static("x-request-id"), val);
    }

    response
}
