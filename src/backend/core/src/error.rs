//! Error handling for the report export pipeline.
//!
//! This module provides:
//! - A single crate error type with machine-readable codes
//! - HTTP status code mapping for API responses
//! - Transient vs. permanent classification used by the retry layer
//! - User-safe messages kept apart from internal detail
//! - Error logging and metrics integration
//!
//! # Usage
//!
//! ```rust,ignore
//! use reportes_core::error::{ReportesError, Result, ErrorContext};
//!
//! fn load() -> Result<Vec<u8>> {
//!     std::fs::read("report.json").context("Failed to read report")
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, ReportesError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authorization (1000-1099)
    Unauthorized,
    Forbidden,

    // Validation (1100-1199)
    ValidationError,

    // Lookup (1200-1299)
    RecordNotFound,
    JobNotFound,

    // Time limits (1300-1399)
    Timeout,
    DeadlineExceeded,
    Cancelled,

    // Delivery (2000-2099)
    TransientDelivery,
    NetworkError,
    DeliveryRejected,
    CircuitOpen,
    QueueFull,
    QueueingDisabled,

    // Export generation (3000-3099)
    GenerationFailed,
    SerializationError,

    // Configuration (5000-5099)
    ConfigurationError,

    // Internal (9000-9099)
    InternalError,
    UnknownError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::Unauthorized => 1000,
            Self::Forbidden => 1001,

            Self::ValidationError => 1100,

            Self::RecordNotFound => 1200,
            Self::JobNotFound => 1201,

            Self::Timeout => 1300,
            Self::DeadlineExceeded => 1301,
            Self::Cancelled => 1302,

            Self::TransientDelivery => 2000,
            Self::NetworkError => 2001,
            Self::DeliveryRejected => 2002,
            Self::CircuitOpen => 2003,
            Self::QueueFull => 2004,
            Self::QueueingDisabled => 2005,

            Self::GenerationFailed => 3000,
            Self::SerializationError => 3001,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
            Self::UnknownError => 9099,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,

            Self::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,

            Self::RecordNotFound | Self::JobNotFound => StatusCode::NOT_FOUND,

            Self::Timeout | Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,

            // Non-standard 499 "client closed request" is not in http's table
            Self::Cancelled => StatusCode::REQUEST_TIMEOUT,

            Self::QueueFull => StatusCode::TOO_MANY_REQUESTS,

            Self::CircuitOpen
            | Self::TransientDelivery
            | Self::QueueingDisabled => StatusCode::SERVICE_UNAVAILABLE,

            Self::NetworkError | Self::DeliveryRejected => StatusCode::BAD_GATEWAY,

            Self::GenerationFailed
            | Self::SerializationError
            | Self::ConfigurationError
            | Self::InternalError
            | Self::UnknownError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this error is transient and may be retried.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::TransientDelivery | Self::NetworkError
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "authorization",
            1100..=1199 => "validation",
            1200..=1299 => "not_found",
            1300..=1399 => "time_limit",
            2000..=2099 => "delivery",
            3000..=3099 => "export",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, missing privilege)
    Low,
    /// Operational issues (timeouts, open circuits, full queues)
    Medium,
    /// Failures inside the pipeline
    High,
    /// Errors requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::Unauthorized
            | ErrorCode::Forbidden
            | ErrorCode::ValidationError
            | ErrorCode::RecordNotFound
            | ErrorCode::JobNotFound
            | ErrorCode::Cancelled => Self::Low,

            ErrorCode::Timeout
            | ErrorCode::DeadlineExceeded
            | ErrorCode::TransientDelivery
            | ErrorCode::NetworkError
            | ErrorCode::CircuitOpen
            | ErrorCode::QueueFull
            | ErrorCode::QueueingDisabled => Self::Medium,

            ErrorCode::DeliveryRejected
            | ErrorCode::GenerationFailed
            | ErrorCode::SerializationError
            | ErrorCode::ConfigurationError => Self::High,

            ErrorCode::InternalError | ErrorCode::UnknownError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (report, job, message)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Retry information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for the pipeline.
#[derive(Error, Debug)]
pub struct ReportesError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for ReportesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl ReportesError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create a not found error.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(
            ErrorCode::RecordNotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create an unauthorized error.
    pub fn unauthorized(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Create a forbidden error.
    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Check if this error is transient.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// Human-readable description used in notifications: the user message,
    /// followed by the internal detail when one exists.
    pub fn describe(&self) -> String {
        match &self.internal_message {
            Some(internal) => format!("{}: {}", self.user_message, internal),
            None => self.user_message.to_string(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "reportes_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Domain Constructors
// ═══════════════════════════════════════════════════════════════════════════════

impl ReportesError {
    /// Selection exceeds the ceiling for the requested format.
    pub fn selection_too_large(format: impl fmt::Display, limit: usize, requested: usize) -> Self {
        Self::new(
            ErrorCode::ValidationError,
            format!(
                "{} exports are limited to {} reports per request, but {} were selected. \
                 Reduce the selection or schedule a background export.",
                format, limit, requested
            ),
        )
        .with_details(
            ErrorDetails::new()
                .with_context("limit", limit)
                .with_context("requested", requested)
                .with_suggestion("Reduce the selection or schedule a background export"),
        )
    }

    /// The overall call budget elapsed.
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        let operation = operation.into();
        Self::new(
            ErrorCode::Timeout,
            format!("{} timed out after {}ms", operation, limit.as_millis()),
        )
        .with_context("operation", &operation)
    }

    /// A job ran past its wall-clock deadline.
    pub fn deadline_exceeded(limit: Duration) -> Self {
        Self::new(
            ErrorCode::DeadlineExceeded,
            format!("Export exceeded its {}s deadline and was cancelled", limit.as_secs()),
        )
    }

    /// Work was cancelled by an external signal.
    pub fn cancelled(what: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, format!("{} was cancelled", what.into()))
    }

    /// A retryable transport failure.
    pub fn transient_delivery(dependency: impl Into<String>, reason: impl Into<String>) -> Self {
        let dependency = dependency.into();
        Self::with_internal(
            ErrorCode::TransientDelivery,
            format!("Temporary failure calling {}", dependency),
            reason,
        )
        .with_context("dependency", &dependency)
    }

    /// The dependency refused the request; retrying will not help.
    pub fn delivery_rejected(dependency: impl Into<String>, reason: impl Into<String>) -> Self {
        let dependency = dependency.into();
        Self::with_internal(
            ErrorCode::DeliveryRejected,
            format!("{} rejected the request", dependency),
            reason,
        )
        .with_context("dependency", &dependency)
    }

    /// The breaker rejected the call without attempting it.
    pub fn circuit_open(dependency: impl Into<String>, retry_after: Duration) -> Self {
        let dependency = dependency.into();
        Self::new(
            ErrorCode::CircuitOpen,
            format!("Circuit for {} is open; call not attempted", dependency),
        )
        .with_details(
            ErrorDetails::new()
                .with_entity("circuit", &dependency)
                .with_retry_after(retry_after.as_secs()),
        )
    }

    /// The failure queue has reached its hard ceiling.
    pub fn queue_full(capacity: usize) -> Self {
        Self::new(
            ErrorCode::QueueFull,
            format!("Delivery queue is full ({} messages); message not queued", capacity),
        )
        .with_context("capacity", capacity)
    }

    /// Delivery failed and queueing is turned off.
    pub fn queueing_disabled(reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::QueueingDisabled,
            "Delivery failed and the failure queue is disabled",
            reason,
        )
    }

    /// A format generator failed.
    pub fn generation_failed(format: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::GenerationFailed,
            format!("Failed to generate {} export", format),
            reason,
        )
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Whether the request was successful (always false for errors)
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code
    pub numeric_code: u32,

    /// User-friendly error message
    pub message: String,

    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&ReportesError> for ErrorResponse {
    fn from(error: &ReportesError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.context.is_empty()
                    && error.details.entity_id.is_none()
                    && error.details.retry_after_secs.is_none()
                {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

impl IntoResponse for ReportesError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| ReportesError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| ReportesError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| ReportesError::new(ErrorCode::RecordNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| ReportesError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for ReportesError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "Failed to serialize data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<reqwest::Error> for ReportesError {
    fn from(error: reqwest::Error) -> Self {
        let internal = error.to_string();
        if error.is_timeout() {
            return Self::with_internal(ErrorCode::Timeout, "Outbound request timed out", internal)
                .with_source(error);
        }
        if let Some(status) = error.status() {
            let code = if status.is_server_error() || status.as_u16() == 429 {
                ErrorCode::TransientDelivery
            } else {
                ErrorCode::DeliveryRejected
            };
            return Self::with_internal(
                code,
                format!("Outbound request failed with status {}", status.as_u16()),
                internal,
            )
            .with_source(error);
        }
        Self::with_internal(ErrorCode::NetworkError, "Outbound request failed", internal)
            .with_source(error)
    }
}

impl From<tokio::sync::AcquireError> for ReportesError {
    fn from(error: tokio::sync::AcquireError) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "Job permit pool is closed",
            error.to_string(),
        )
    }
}

impl From<tokio::time::error::Elapsed> for ReportesError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(ErrorCode::Timeout, "Operation timed out", error.to_string())
    }
}

impl From<std::io::Error> for ReportesError {
    fn from(error: std::io::Error) -> Self {
        let code = match error.kind() {
            std::io::ErrorKind::TimedOut => ErrorCode::Timeout,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => ErrorCode::NetworkError,
            _ => ErrorCode::InternalError,
        };
        Self::with_internal(code, "I/O error", error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for ReportesError {
    fn from(error: anyhow::Error) -> Self {
        Self::with_internal(
            ErrorCode::UnknownError,
            "An unexpected error occurred",
            format!("{:#}", error),
        )
    }
}

impl From<config::ConfigError> for ReportesError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Invalid configuration",
            error.to_string(),
        )
        .with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::Forbidden.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ErrorCode::ValidationError.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ErrorCode::RecordNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::CircuitOpen.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ErrorCode::QueueFull.http_status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_transient_classification() {
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(ErrorCode::TransientDelivery.is_retryable());
        assert!(ErrorCode::NetworkError.is_retryable());

        assert!(!ErrorCode::DeliveryRejected.is_retryable());
        assert!(!ErrorCode::CircuitOpen.is_retryable());
        assert!(!ErrorCode::ValidationError.is_retryable());
        assert!(!ErrorCode::DeadlineExceeded.is_retryable());
    }

    #[test]
    fn test_selection_too_large_mentions_both_numbers() {
        let error = ReportesError::selection_too_large("PDF", 50, 51);
        assert_eq!(error.code(), ErrorCode::ValidationError);
        assert!(error.user_message().contains("50"));
        assert!(error.user_message().contains("51"));
        assert!(error.details().suggested_action.is_some());
    }

    #[test]
    fn test_error_context() {
        let error = ReportesError::new(ErrorCode::ValidationError, "Invalid input")
            .with_context("field", "report_ids")
            .with_context("reason", "empty");

        assert!(error.details().context.contains_key("field"));
        assert!(error.details().context.contains_key("reason"));
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ReportesError::validation("Select at least one report");
        let response = ErrorResponse::from(&error);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("VALIDATION_ERROR"));
        assert!(json.contains("at least one report"));
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::ValidationError),
            ErrorSeverity::Low
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::CircuitOpen),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::GenerationFailed),
            ErrorSeverity::High
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::InternalError),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_describe_includes_internal_detail() {
        let error = ReportesError::transient_delivery("smtp", "connection reset by peer");
        let text = error.describe();
        assert!(text.contains("smtp"));
        assert!(text.contains("connection reset by peer"));
    }

    #[test]
    fn test_error_display() {
        let error = ReportesError::with_internal(
            ErrorCode::GenerationFailed,
            "Failed to generate PDF export",
            "font table missing",
        );

        let display = format!("{}", error);
        assert!(display.contains("GenerationFailed"));
        assert!(display.contains("Failed to generate PDF export"));
        assert!(display.contains("font table missing"));
    }
}
