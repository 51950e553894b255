//! Resilient calls to the AI completion endpoint.
//!
//! Uses the same breaker and retry executor as e-mail delivery, but with
//! its own instances and its own policy: longer per-attempt budget, more
//! retries, shorter cooldown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::AiConfig;
use crate::error::{ErrorCode, ReportesError, Result};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics};
use crate::resilience::retry::{RetryExecutor, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl AiRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: None,
            context: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    pub text: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[async_trait]
pub trait AiClient: Send + Sync {
    async fn call(&self, request: &AiRequest) -> Result<AiResponse>;
}

/// Plain JSON-over-HTTP client; no retries of its own.
#[derive(Debug, Clone)]
pub struct HttpAiClient {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpAiClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        // Per-attempt deadlines come from the executor
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl AiClient for HttpAiClient {
    async fn call(&self, request: &AiRequest) -> Result<AiResponse> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let reason = format!("HTTP {}", status.as_u16());
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                ReportesError::transient_delivery("ai", reason)
            } else {
                ReportesError::delivery_rejected("ai", reason)
            });
        }

        Ok(response.json::<AiResponse>().await?)
    }
}

/// Counters kept per AI client.
#[derive(Debug, Default)]
pub struct AiServiceMetrics {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    circuit_rejections: AtomicU64,
    total_latency_ms: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiMetricsSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub circuit_rejections: u64,
    pub average_latency_ms: f64,
    pub circuit: CircuitBreakerMetrics,
}

impl AiServiceMetrics {
    fn record(&self, result: &Result<AiResponse>, latency: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);

        match result {
            Ok(_) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                match error.code() {
                    ErrorCode::Timeout => {
                        self.timeouts.fetch_add(1, Ordering::Relaxed);
                    }
                    ErrorCode::CircuitOpen => {
                        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
            }
        }
    }
}

/// An [`AiClient`] behind its own retry executor and circuit breaker.
pub struct ResilientAiClient<C: AiClient> {
    client: C,
    executor: RetryExecutor,
    metrics: AiServiceMetrics,
}

impl<C: AiClient> ResilientAiClient<C> {
    pub fn new(client: C, config: &AiConfig) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            "ai",
            CircuitBreakerConfig::from(&config.circuit),
        ));
        Self::with_executor(client, RetryExecutor::new(RetryPolicy::from(&config.retry), breaker))
    }

    pub fn with_executor(client: C, executor: RetryExecutor) -> Self {
        Self {
            client,
            executor,
            metrics: AiServiceMetrics::default(),
        }
    }

    pub async fn call(&self, request: &AiRequest) -> Result<AiResponse> {
        let started = Instant::now();
        let client = &self.client;
        let result = self.executor.execute(|_| client.call(request)).await;
        let latency = started.elapsed();

        self.metrics.record(&result, latency);
        match &result {
            Ok(_) => tracing::debug!(latency_ms = latency.as_millis() as u64, "AI call succeeded"),
            Err(error) => tracing::warn!(
                latency_ms = latency.as_millis() as u64,
                error_code = %error.code(),
                reason = %error.describe(),
                "AI call failed"
            ),
        }

        result
    }

    pub fn metrics(&self) -> AiMetricsSnapshot {
        let requests = self.metrics.requests.load(Ordering::Relaxed);
        let total_latency = self.metrics.total_latency_ms.load(Ordering::Relaxed);

        AiMetricsSnapshot {
            requests,
            successes: self.metrics.successes.load(Ordering::Relaxed),
            failures: self.metrics.failures.load(Ordering::Relaxed),
            timeouts: self.metrics.timeouts.load(Ordering::Relaxed),
            circuit_rejections: self.metrics.circuit_rejections.load(Ordering::Relaxed),
            average_latency_ms: if requests == 0 {
                0.0
            } else {
                total_latency as f64 / requests as f64
            },
            circuit: self.executor.breaker().metrics(),
        }
    }
}
