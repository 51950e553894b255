//! Configuration management.
//!
//! Values come from an optional file and from `REPORTES__*` environment
//! variables (double underscore separates sections, e.g.
//! `REPORTES__JOBS__MAX_CONCURRENT_JOBS=5`). Durations accept humantime
//! strings such as `"30s"`, `"2m"` or `"24h"`.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{ReportesError, Result};
use crate::telemetry::{LoggingConfig, MetricsConfig};

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Export limits and alert thresholds
    #[serde(default)]
    pub export: ExportConfig,

    /// Background job runner
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Notification delivery
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// AI endpoint policy
    #[serde(default)]
    pub ai: AiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Interactive ceiling for PDF exports
    #[serde(default = "default_pdf_max_records")]
    pub pdf_max_records: usize,

    /// Interactive ceiling for JSON exports
    #[serde(default = "default_json_max_records")]
    pub json_max_records: usize,

    /// Ceiling applied to background jobs, any format
    #[serde(default = "default_background_max_records")]
    pub background_max_records: usize,

    /// Exports slower than this raise an operational alert
    #[serde(default = "default_slow_export_threshold", with = "humantime_serde")]
    pub slow_export_threshold: Duration,

    /// Exports larger than this raise an operational alert
    #[serde(default = "default_large_export_threshold_bytes")]
    pub large_export_threshold_bytes: u64,

    /// Filename prefix for single-report exports
    #[serde(default = "default_file_prefix_single")]
    pub file_prefix_single: String,

    /// Filename prefix for multi-report exports
    #[serde(default = "default_file_prefix_multi")]
    pub file_prefix_multi: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            pdf_max_records: default_pdf_max_records(),
            json_max_records: default_json_max_records(),
            background_max_records: default_background_max_records(),
            slow_export_threshold: default_slow_export_threshold(),
            large_export_threshold_bytes: default_large_export_threshold_bytes(),
            file_prefix_single: default_file_prefix_single(),
            file_prefix_multi: default_file_prefix_multi(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Size of the permit pool
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Wall-clock deadline measured from when a job starts running
    #[serde(default = "default_job_deadline", with = "humantime_serde")]
    pub job_deadline: Duration,

    /// Whole-job resubmissions after a terminal error
    #[serde(default = "default_infrastructure_retries")]
    pub infrastructure_retries: u32,

    /// How long finished jobs stay queryable by status
    #[serde(default = "default_status_retention", with = "humantime_serde")]
    pub status_retention: Duration,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            job_deadline: default_job_deadline(),
            infrastructure_retries: default_infrastructure_retries(),
            status_retention: default_status_retention(),
        }
    }
}

/// Retry settings shared by every protected dependency.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Budget for the whole attempt sequence, retries included
    #[serde(default = "default_overall_timeout", with = "humantime_serde")]
    pub overall_timeout: Duration,

    /// Optional budget for a single attempt
    #[serde(default, with = "humantime_serde")]
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            overall_timeout: default_overall_timeout(),
            attempt_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_cooldown", with = "humantime_serde")]
    pub cooldown: Duration,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown: default_cooldown(),
        }
    }
}

/// What happens when a message arrives at a full failure queue.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse the new message
    #[default]
    Reject,
    /// Evict the oldest queued message to make room
    DropOldest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_queue_enabled")]
    pub enabled: bool,

    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    #[serde(default = "default_queue_max_age", with = "humantime_serde")]
    pub max_age: Duration,

    #[serde(default = "default_queue_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_queue_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// How often the background processor drains the queue
    #[serde(default = "default_queue_process_interval", with = "humantime_serde")]
    pub process_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            enabled: default_queue_enabled(),
            capacity: default_queue_capacity(),
            max_age: default_queue_max_age(),
            max_attempts: default_queue_max_attempts(),
            batch_size: default_queue_batch_size(),
            overflow: OverflowPolicy::default(),
            process_interval: default_queue_process_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthSettings {
    /// Queue length at or above which the service reports unhealthy
    #[serde(default = "default_queue_warning_threshold")]
    pub queue_warning_threshold: usize,

    /// Window over which failures count as "recent"
    #[serde(default = "default_failure_window", with = "humantime_serde")]
    pub failure_window: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            queue_warning_threshold: default_queue_warning_threshold(),
            failure_window: default_failure_window(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Log messages instead of sending them
    #[default]
    Log,
    /// POST messages as JSON to a webhook
    Webhook,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportSettings {
    #[serde(default)]
    pub kind: TransportKind,

    /// Webhook URL (required for `webhook`)
    pub url: Option<String>,

    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Sender address stamped on outgoing messages
    #[serde(default = "default_sender")]
    pub sender: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            url: None,
            request_timeout: default_request_timeout(),
            sender: default_sender(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub circuit: CircuitSettings,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub transport: TransportSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_ai_retry")]
    pub retry: RetrySettings,

    #[serde(default = "default_ai_circuit")]
    pub circuit: CircuitSettings,

    /// Completion endpoint; AI calls are disabled when unset
    pub endpoint: Option<String>,

    pub api_key: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            retry: default_ai_retry(),
            circuit: default_ai_circuit(),
            endpoint: None,
            api_key: None,
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_pdf_max_records() -> usize { 50 }
fn default_json_max_records() -> usize { 100 }
fn default_background_max_records() -> usize { 1000 }
fn default_slow_export_threshold() -> Duration { Duration::from_secs(30) }
fn default_large_export_threshold_bytes() -> u64 { 500 * 1024 * 1024 }
fn default_file_prefix_single() -> String { "reporte".to_string() }
fn default_file_prefix_multi() -> String { "reportes".to_string() }
fn default_max_concurrent_jobs() -> usize { 3 }
fn default_job_deadline() -> Duration { Duration::from_secs(120) }
fn default_infrastructure_retries() -> u32 { 1 }
fn default_status_retention() -> Duration { Duration::from_secs(24 * 60 * 60) }
fn default_max_retries() -> u32 { 2 }
fn default_base_delay() -> Duration { Duration::from_secs(2) }
fn default_max_delay() -> Duration { Duration::from_secs(30) }
fn default_overall_timeout() -> Duration { Duration::from_secs(30) }
fn default_failure_threshold() -> u32 { 5 }
fn default_cooldown() -> Duration { Duration::from_secs(60) }
fn default_queue_enabled() -> bool { true }
fn default_queue_capacity() -> usize { 100 }
fn default_queue_max_age() -> Duration { Duration::from_secs(24 * 60 * 60) }
fn default_queue_max_attempts() -> u32 { 5 }
fn default_queue_batch_size() -> usize { 10 }
fn default_queue_process_interval() -> Duration { Duration::from_secs(60) }
fn default_queue_warning_threshold() -> usize { 50 }
fn default_failure_window() -> Duration { Duration::from_secs(5 * 60) }
fn default_request_timeout() -> Duration { Duration::from_secs(10) }
fn default_sender() -> String { "no-reply@reportes.local".to_string() }

fn default_ai_retry() -> RetrySettings {
    RetrySettings {
        max_retries: 3,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(16),
        overall_timeout: Duration::from_secs(90),
        attempt_timeout: Some(Duration::from_secs(30)),
    }
}

fn default_ai_circuit() -> CircuitSettings {
    CircuitSettings {
        failure_threshold: 5,
        cooldown: Duration::from_secs(30),
    }
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("REPORTES").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("REPORTES").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would wedge the pipeline.
    pub fn validate(&self) -> Result<()> {
        let checks: [(bool, &str); 8] = [
            (self.jobs.max_concurrent_jobs == 0, "jobs.max_concurrent_jobs must be at least 1"),
            (self.jobs.job_deadline.is_zero(), "jobs.job_deadline must be positive"),
            (self.export.pdf_max_records == 0, "export.pdf_max_records must be at least 1"),
            (self.export.json_max_records == 0, "export.json_max_records must be at least 1"),
            (self.delivery.queue.capacity == 0, "delivery.queue.capacity must be at least 1"),
            (self.delivery.queue.batch_size == 0, "delivery.queue.batch_size must be at least 1"),
            (
                self.delivery.circuit.failure_threshold == 0 || self.ai.circuit.failure_threshold == 0,
                "circuit failure_threshold must be at least 1",
            ),
            (
                self.delivery.transport.kind == TransportKind::Webhook
                    && self.delivery.transport.url.is_none(),
                "delivery.transport.url is required for the webhook transport",
            ),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ReportesError::configuration(*message)),
            None => Ok(()),
        }
    }
}
