//! Telemetry: structured logging and Prometheus metrics.
//!
//! # Example
//!
//! ```rust,no_run
//! use reportes_core::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::default();
//! let handle = init_telemetry(&config).expect("Failed to initialize telemetry");
//! println!("{}", handle.metrics.render());
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{
    init_logging, mask_email, LogFormat, LoggingConfig, RedactionConfig, RedactionPattern,
    SensitiveFieldRedactor,
};
pub use metrics::{
    init_metrics, CircuitMetrics, DeliveryMetrics, ExportMetrics, JobMetrics, MetricsConfig,
    MetricsRegistry, RequestDurationHistogram,
};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "reportes-core".to_string()
}

fn default_environment() -> String {
    std::env::var("REPORTES_ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
}

/// Initialize metrics and logging. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryHandle> {
    let metrics = init_metrics(&config.metrics, &config.service_name)?;
    init_logging(&config.logging, &config.environment)?;

    Ok(TelemetryHandle { metrics })
}

pub struct TelemetryHandle {
    pub metrics: MetricsRegistry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "reportes-core");
        assert!(config.metrics.enabled);
    }
}
