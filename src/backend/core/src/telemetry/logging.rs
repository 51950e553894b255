//! Structured logging and redaction of personal data in log fields.
//!
//! Delivery and export logs carry recipient addresses and AI keys; every
//! such value goes through [`SensitiveFieldRedactor`] before it reaches a
//! log line.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static REDACTOR: OnceLock<SensitiveFieldRedactor> = OnceLock::new();

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty or compact)
    #[serde(default)]
    pub format: LogFormat,

    /// Per-module log levels
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    /// Whether to include file/line information
    #[serde(default)]
    pub include_location: bool,

    /// Whether to include target (module path)
    #[serde(default = "default_include_target")]
    pub include_target: bool,

    #[serde(default)]
    pub redaction: RedactionConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            module_levels: HashMap::new(),
            include_location: false,
            include_target: default_include_target(),
            redaction: RedactionConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedactionConfig {
    #[serde(default = "default_redaction_enabled")]
    pub enabled: bool,

    #[serde(default = "default_redaction_patterns")]
    pub patterns: Vec<RedactionPattern>,

    #[serde(default = "default_redaction_replacement")]
    pub replacement: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: default_redaction_enabled(),
            patterns: default_redaction_patterns(),
            replacement: default_redaction_replacement(),
        }
    }
}

/// A pattern for identifying sensitive data to redact.
#[derive(Debug, Clone, Deserialize)]
pub struct RedactionPattern {
    pub name: String,

    /// Field names to match (case-insensitive substring)
    #[serde(default)]
    pub field_names: Vec<String>,

    /// Regex matched against values
    #[serde(default)]
    pub value_pattern: Option<String>,
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    field_names: Vec<String>,
    value_regex: Option<regex::Regex>,
}

/// Redactor for sensitive fields in log output.
#[derive(Debug, Clone)]
pub struct SensitiveFieldRedactor {
    patterns: Vec<CompiledPattern>,
    replacement: String,
    enabled: bool,
}

impl SensitiveFieldRedactor {
    pub fn new(config: &RedactionConfig) -> Self {
        let patterns = config
            .patterns
            .iter()
            .map(|p| CompiledPattern {
                field_names: p.field_names.iter().map(|s| s.to_lowercase()).collect(),
                value_regex: p
                    .value_pattern
                    .as_ref()
                    .and_then(|pat| regex::Regex::new(pat).ok()),
            })
            .collect();

        Self {
            patterns,
            replacement: config.replacement.clone(),
            enabled: config.enabled,
        }
    }

    pub fn should_redact_field(&self, field_name: &str) -> bool {
        if !self.enabled {
            return false;
        }

        let lower = field_name.to_lowercase();
        self.patterns
            .iter()
            .any(|p| p.field_names.iter().any(|f| lower.contains(f)))
    }

    /// Replace every value-pattern match in `value`.
    pub fn redact_value(&self, value: &str) -> String {
        if !self.enabled {
            return value.to_string();
        }

        self.patterns
            .iter()
            .filter_map(|p| p.value_regex.as_ref())
            .fold(value.to_string(), |acc, regex| {
                regex.replace_all(&acc, self.replacement.as_str()).into_owned()
            })
    }

    /// Redact a field value, checking both field name and value patterns.
    pub fn redact(&self, field_name: &str, value: &str) -> String {
        if self.should_redact_field(field_name) {
            return self.replacement.clone();
        }
        self.redact_value(value)
    }

    pub fn global() -> &'static SensitiveFieldRedactor {
        REDACTOR.get_or_init(|| SensitiveFieldRedactor::new(&RedactionConfig::default()))
    }
}

/// Mask an e-mail address for logs, keeping the first character and the domain.
///
/// `maria.lopez@example.com` becomes `m***@example.com`. Values without an
/// `@` are fully masked.
pub fn mask_email(address: &str) -> String {
    match address.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{first}***@{domain}")
        }
        _ => "***".to_string(),
    }
}

fn default_log_level() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

fn default_include_target() -> bool {
    true
}

fn default_redaction_enabled() -> bool {
    true
}

fn default_redaction_replacement() -> String {
    "[REDACTED]".to_string()
}

fn default_redaction_patterns() -> Vec<RedactionPattern> {
    vec![
        RedactionPattern {
            name: "emails".to_string(),
            field_names: vec![],
            value_pattern: Some(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}".to_string()),
        },
        RedactionPattern {
            name: "api_keys".to_string(),
            field_names: vec!["api_key".to_string(), "apikey".to_string(), "x-api-key".to_string()],
            value_pattern: Some(r"sk-[a-zA-Z0-9]{20,}".to_string()),
        },
        RedactionPattern {
            name: "credentials".to_string(),
            field_names: vec![
                "password".to_string(),
                "secret".to_string(),
                "token".to_string(),
                "authorization".to_string(),
            ],
            value_pattern: None,
        },
    ]
}

/// Initialize the global tracing subscriber.
///
/// In `development` the JSON default is swapped for the pretty format.
pub fn init_logging(config: &LoggingConfig, environment: &str) -> anyhow::Result<()> {
    let _ = REDACTOR.set(SensitiveFieldRedactor::new(&config.redaction));

    let mut filter = EnvFilter::try_new(&config.level)?;
    for (module, level) in &config.module_levels {
        filter = filter.add_directive(format!("{}={}", module, level).parse()?);
    }

    let format = if environment == "development" && config.format == LogFormat::Json {
        &LogFormat::Pretty
    } else {
        &config.format
    };

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_target(config.include_target),
            )
            .try_init()?,
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_target(config.include_target),
            )
            .try_init()?,
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_target(config.include_target),
            )
            .try_init()?,
    }

    Ok(())
}
