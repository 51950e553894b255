//! Retry with exponential backoff, bounded by an overall timeout.
//!
//! Composition order for one `execute` call:
//! overall timeout → retry loop → circuit breaker → optional per-attempt
//! timeout → the operation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetrySettings;
use crate::error::{ReportesError, Result};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::telemetry::DeliveryMetrics;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Budget for the whole sequence, backoff sleeps included
    pub overall_timeout: Duration,
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: settings.base_delay,
            max_delay: settings.max_delay,
            overall_timeout: settings.overall_timeout,
            attempt_timeout: settings.attempt_timeout,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`: `base × 2^attempt`, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Runs operations against one dependency under a retry policy and breaker.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self { policy, breaker }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `operation` until it succeeds, fails non-transiently, runs out of
    /// retries, or the overall timeout fires.
    ///
    /// The closure receives the zero-based attempt number. `CircuitOpen`
    /// ends the sequence immediately.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let limit = self.policy.overall_timeout;

        match tokio::time::timeout(limit, self.run_with_retries(&mut operation)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    dependency = %self.breaker.name(),
                    timeout_ms = limit.as_millis() as u64,
                    "Overall delivery timeout exceeded"
                );
                Err(ReportesError::timeout(
                    format!("{} call", self.breaker.name()),
                    limit,
                ))
            }
        }
    }

    async fn run_with_retries<T, F, Fut>(&self, operation: &mut F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let dependency = self.breaker.name();
        let mut attempt = 0u32;

        loop {
            match self.attempt_once(operation, attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(
                            dependency = %dependency,
                            attempts = attempt + 1,
                            "Call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) if error.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    tracing::warn!(
                        dependency = %dependency,
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        reason = %error.describe(),
                        "Transient failure, retrying"
                    );
                    DeliveryMetrics::record_retry(dependency);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        dependency = %dependency,
                        attempts = attempt + 1,
                        error_code = %error.code(),
                        reason = %error.describe(),
                        "Call failed, giving up"
                    );
                    return Err(error);
                }
            }
        }
    }

    async fn attempt_once<T, F, Fut>(&self, operation: &mut F, attempt: u32) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let dependency = self.breaker.name();
        let permit = self.breaker.try_acquire()?;

        let call = operation(attempt);
        let result = match self.policy.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(ReportesError::timeout(format!("{} attempt", dependency), limit)),
            },
            None => call.await,
        };

        // Only transient failures say anything about the dependency's health;
        // a rejected request still proves it is reachable.
        match &result {
            Err(error) if error.is_retryable() => {
                DeliveryMetrics::record_attempt(dependency, "failed");
                permit.record_failure();
            }
            Err(_) => {
                DeliveryMetrics::record_attempt(dependency, "rejected");
                permit.record_success();
            }
            Ok(_) => {
                DeliveryMetrics::record_attempt(dependency, "delivered");
                permit.record_success();
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::resilience::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(policy: RetryPolicy, threshold: u32) -> RetryExecutor {
        let breaker = Arc::new(CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_secs(60),
            },
        ));
        RetryExecutor::new(policy, breaker)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            overall_timeout: Duration::from_secs(30),
            attempt_timeout: None,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(10),
            ..policy()
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures_then_succeeds() {
        let executor = executor(policy(), 5);
        let calls = AtomicU32::new(0);

        let result = executor
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(ReportesError::transient_delivery("test", "503"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_failure_is_not_retried() {
        let executor = executor(policy(), 5);
        let calls = AtomicU32::new(0);

        let result: Result<()> = executor
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ReportesError::delivery_rejected("test", "400 Bad Request")) }
            })
            .await;

        assert_eq!(result.unwrap_err().code(), ErrorCode::DeliveryRejected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_error() {
        let executor = executor(policy(), 10);
        let calls = AtomicU32::new(0);

        let result: Result<()> = executor
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ReportesError::transient_delivery("test", "connection reset")) }
            })
            .await;

        assert_eq!(result.unwrap_err().code(), ErrorCode::TransientDelivery);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.breaker().metrics().consecutive_failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_timeout_wins_over_retry_budget() {
        let executor = executor(
            RetryPolicy {
                max_retries: 10,
                overall_timeout: Duration::from_secs(5),
                ..policy()
            },
            100,
        );

        let result: Result<()> = executor
            .execute(|_| async { Err(ReportesError::transient_delivery("test", "503")) })
            .await;

        assert_eq!(result.unwrap_err().code(), ErrorCode::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        let executor = executor(
            RetryPolicy {
                max_retries: 1,
                attempt_timeout: Some(Duration::from_secs(1)),
                ..policy()
            },
            5,
        );
        let calls = AtomicU32::new(0);

        let result = executor
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_short_circuits_without_calling() {
        let executor = executor(RetryPolicy { max_retries: 0, ..policy() }, 1);

        let _: Result<()> = executor
            .execute(|_| async { Err(ReportesError::transient_delivery("test", "503")) })
            .await;
        assert_eq!(executor.breaker().state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let result: Result<()> = executor
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert_eq!(result.unwrap_err().code(), ErrorCode::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
