//! Prometheus metrics for exports, jobs, deliveries and circuit breakers.
//!
//! Call sites record through the small facade types below (`ExportMetrics`,
//! `JobMetrics`, `DeliveryMetrics`, `CircuitMetrics`) so metric names and
//! label sets live in one place.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether a Prometheus recorder is installed
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Labels added to every metric
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
}

/// Handle to the installed recorder, or an empty one when metrics are off.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// A registry with no recorder behind it; `render` returns an empty body.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Install the global Prometheus recorder.
///
/// Only one recorder can exist per process; a second call fails.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let mut builder = PrometheusBuilder::new();
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;
    register_metric_descriptions();

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    describe_counter!("reportes_errors_total", "Errors constructed, by code and category");

    // Exports
    describe_counter!("reportes_exports_total", "Exports attempted, by format and outcome");
    describe_histogram!("reportes_export_duration_seconds", "Export generation time in seconds");
    describe_histogram!("reportes_export_bytes", "Size of generated export artifacts");
    describe_counter!("reportes_export_alerts_total", "Slow or oversized exports");

    // Jobs
    describe_counter!("reportes_jobs_total", "Jobs reaching a terminal state, by status");
    describe_gauge!("reportes_jobs_running", "Jobs currently holding a permit");
    describe_histogram!("reportes_job_duration_seconds", "Job run time in seconds");
    describe_counter!("reportes_job_resubmissions_total", "Jobs resubmitted after infrastructure errors");

    // Delivery
    describe_counter!("reportes_delivery_attempts_total", "Delivery attempts, by outcome");
    describe_counter!("reportes_delivery_retries_total", "Retries scheduled after transient failures");
    describe_gauge!("reportes_failure_queue_depth", "Messages waiting in the failure queue");
    describe_counter!("reportes_failure_queue_dropped_total", "Queued messages discarded, by reason");

    // Circuit breakers
    describe_gauge!("reportes_circuit_state", "Circuit state (0=closed, 1=half-open, 2=open)");
    describe_counter!("reportes_circuit_transitions_total", "Circuit state transitions");
    describe_counter!("reportes_circuit_rejections_total", "Calls refused by an open circuit");

    // HTTP
    describe_histogram!("http_request_duration_seconds", "HTTP request duration in seconds");
    describe_counter!("http_requests_total", "Total number of HTTP requests");
}

pub struct ExportMetrics;

impl ExportMetrics {
    pub fn record_success(format: &str, duration: Duration, bytes: u64) {
        counter!("reportes_exports_total", "format" => format.to_string(), "outcome" => "success")
            .increment(1);
        histogram!("reportes_export_duration_seconds", "format" => format.to_string())
            .record(duration.as_secs_f64());
        histogram!("reportes_export_bytes", "format" => format.to_string()).record(bytes as f64);
    }

    pub fn record_failure(format: &str, code: &str) {
        counter!(
            "reportes_exports_total",
            "format" => format.to_string(),
            "outcome" => "failure",
            "code" => code.to_string(),
        )
        .increment(1);
    }

    /// `kind` is `slow` or `large`.
    pub fn record_alert(format: &str, kind: &'static str) {
        counter!("reportes_export_alerts_total", "format" => format.to_string(), "kind" => kind)
            .increment(1);
    }
}

pub struct JobMetrics;

impl JobMetrics {
    pub fn job_started() {
        gauge!("reportes_jobs_running").increment(1.0);
    }

    pub fn job_finished(status: &'static str, duration: Duration) {
        gauge!("reportes_jobs_running").decrement(1.0);
        counter!("reportes_jobs_total", "status" => status).increment(1);
        histogram!("reportes_job_duration_seconds", "status" => status).record(duration.as_secs_f64());
    }

    pub fn job_resubmitted() {
        counter!("reportes_job_resubmissions_total").increment(1);
    }
}

pub struct DeliveryMetrics;

impl DeliveryMetrics {
    /// `outcome` is one of `delivered`, `failed`, `rejected`, `short_circuited`.
    pub fn record_attempt(dependency: &str, outcome: &'static str) {
        counter!(
            "reportes_delivery_attempts_total",
            "dependency" => dependency.to_string(),
            "outcome" => outcome,
        )
        .increment(1);
    }

    pub fn record_retry(dependency: &str) {
        counter!("reportes_delivery_retries_total", "dependency" => dependency.to_string()).increment(1);
    }

    pub fn set_queue_depth(depth: usize) {
        gauge!("reportes_failure_queue_depth").set(depth as f64);
    }

    /// `reason` is one of `expired`, `exhausted`, `overflow`.
    pub fn record_dropped(reason: &'static str, count: usize) {
        counter!("reportes_failure_queue_dropped_total", "reason" => reason).increment(count as u64);
    }
}

pub struct CircuitMetrics;

impl CircuitMetrics {
    /// Record the state a circuit just moved into.
    pub fn record_transition(dependency: &str, state_value: f64, state_label: &'static str) {
        gauge!("reportes_circuit_state", "dependency" => dependency.to_string()).set(state_value);
        counter!(
            "reportes_circuit_transitions_total",
            "dependency" => dependency.to_string(),
            "to" => state_label,
        )
        .increment(1);
    }

    pub fn record_rejection(dependency: &str) {
        counter!("reportes_circuit_rejections_total", "dependency" => dependency.to_string())
            .increment(1);
    }
}

pub struct RequestDurationHistogram;

impl RequestDurationHistogram {
    pub fn record(method: &str, path: &str, status_code: u16, duration: Duration) {
        histogram!(
            "http_request_duration_seconds",
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status_code" => status_code.to_string(),
        )
        .record(duration.as_secs_f64());

        counter!(
            "http_requests_total",
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status_code" => status_code.to_string(),
        )
        .increment(1);
    }
}
