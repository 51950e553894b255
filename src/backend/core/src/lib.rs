#![allow(clippy::result_large_err)]
//! # Reportes Core
//!
//! Export and delivery pipeline for incident reports.
//!
//! ## Architecture
//!
//! - **Export**: Authorization, per-format size ceilings, concurrent record
//!   resolution and PDF/JSON generation with duration and size alerts
//! - **Jobs**: Background exports on a bounded permit pool with per-job
//!   deadlines, one outcome notification per job and explicit resubmission
//! - **Resilience**: Circuit breaker, retry executor with backoff and a
//!   bounded failure queue behind the notification transport and AI client
//! - **Telemetry**: Structured logging and Prometheus metrics
//! - **API**: Axum HTTP surface over the pipeline facade

pub mod api;
pub mod config;
pub mod error;
pub mod export;
pub mod jobs;
pub mod pipeline;
pub mod resilience;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, ReportesError, Result};
pub use pipeline::ExportPipeline;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, ErrorContext, ReportesError, Result};
    pub use crate::export::{
        ExportFormat, ExportOptions, ExportOrchestrator, ExportRequest, ExportResult,
        InMemoryReportStore, Report, ReportId, ReportStore,
    };
    pub use crate::jobs::{
        ConcurrencyLimitedJobRunner, JobHandle, JobId, JobScheduler, JobState, JobStatus,
        JobStatusSnapshot,
    };
    pub use crate::pipeline::ExportPipeline;
    pub use crate::resilience::{
        CircuitBreaker, CircuitState, DeliveryMessage, DeliveryOutcome, DeliveryTransport,
        FailureQueue, ResilientDeliveryService, RetryExecutor, RetryPolicy,
    };
}
