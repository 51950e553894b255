//! Circuit breaker for unreliable downstream dependencies.
//!
//! Stops calling a dependency after too many consecutive failures, waits
//! out a cooldown, then lets exactly one probe call through to decide
//! whether to close again.
//!
//! Admission hands out a [`CircuitPermit`]. The permit must be settled with
//! [`CircuitPermit::record_success`] or [`CircuitPermit::record_failure`];
//! a permit dropped unsettled counts as a failure, so a probe whose future
//! is cancelled by a timeout still reopens the circuit instead of leaving
//! the half-open slot taken forever.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitSettings;
use crate::error::{ReportesError, Result};
use crate::telemetry::CircuitMetrics;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls pass through
    Closed,
    /// Too many failures - calls are rejected without touching the dependency
    Open,
    /// Cooldown elapsed - a single probe call is allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a probe
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl From<&CircuitSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            cooldown: settings.cooldown,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker shared by every caller of one dependency.
///
/// All state changes happen under a single mutex, so the failure counter,
/// the state enum and the probe slot always move together.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask for admission.
    ///
    /// Fails with `CircuitOpen` while the breaker is open, and while a
    /// half-open probe is already in flight.
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_>> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Ok(CircuitPermit::new(self, false)),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(self.config.cooldown);

                if elapsed >= self.config.cooldown {
                    self.transition(&mut inner, CircuitState::HalfOpen, "cooldown elapsed");
                    inner.probe_in_flight = true;
                    Ok(CircuitPermit::new(self, true))
                } else {
                    Err(self.reject(self.config.cooldown - elapsed))
                }
            }
            CircuitState::HalfOpen if inner.probe_in_flight => Err(self.reject(Duration::ZERO)),
            CircuitState::HalfOpen => {
                inner.probe_in_flight = true;
                Ok(CircuitPermit::new(self, true))
            }
        }
    }

    fn reject(&self, retry_after: Duration) -> ReportesError {
        self.total_rejections.fetch_add(1, Ordering::Relaxed);
        CircuitMetrics::record_rejection(&self.name);
        tracing::debug!(
            breaker = %self.name,
            retry_after_ms = retry_after.as_millis() as u64,
            "Circuit breaker rejected call"
        );
        ReportesError::circuit_open(self.name.clone(), retry_after)
    }

    fn on_success(&self, probe: bool) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::HalfOpen if probe => {
                inner.probe_in_flight = false;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                self.transition(&mut inner, CircuitState::Closed, "probe succeeded");
            }
            CircuitState::Closed => inner.consecutive_failures = 0,
            // Stale permit from before the breaker opened
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::HalfOpen if probe => {
                inner.probe_in_flight = false;
                inner.opened_at = Some(Instant::now());
                self.transition(&mut inner, CircuitState::Open, "probe failed");
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.opened_at = Some(Instant::now());
                    self.transition(&mut inner, CircuitState::Open, "failure threshold reached");
                }
            }
            _ => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState, reason: &'static str) {
        let from = inner.state;
        inner.state = to;

        CircuitMetrics::record_transition(&self.name, to.gauge_value(), to.as_str());

        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                from = %from,
                to = %to,
                consecutive_failures = inner.consecutive_failures,
                threshold = self.config.failure_threshold,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                reason,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                breaker = %self.name,
                from = %from,
                to = %to,
                consecutive_failures = inner.consecutive_failures,
                reason,
                "Circuit breaker state changed"
            ),
        }
    }

    /// Effective state. An open breaker whose cooldown has elapsed reports
    /// `HalfOpen`, since the next call will be admitted as the probe.
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        self.effective_state(&inner)
    }

    fn effective_state(&self, inner: &BreakerState) -> CircuitState {
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(at)) if at.elapsed() < self.config.cooldown => CircuitState::Open,
            (CircuitState::Open, _) => CircuitState::HalfOpen,
            (state, _) => state,
        }
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        let state = self.effective_state(&inner);
        let cooldown_remaining = match (state, inner.opened_at) {
            (CircuitState::Open, Some(at)) => Some(self.config.cooldown.saturating_sub(at.elapsed())),
            _ => None,
        };

        CircuitBreakerMetrics {
            name: self.name.clone(),
            state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            cooldown_remaining,
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed, "manual reset");
        }
    }
}

/// Snapshot of a breaker's counters.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub cooldown_remaining: Option<Duration>,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

/// Admission ticket for one call through a [`CircuitBreaker`].
#[must_use = "a permit dropped without an outcome counts as a failure"]
#[derive(Debug)]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> CircuitPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    /// Whether this permit holds the half-open probe slot.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_failure(self.probe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn breaker(threshold: u32, cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "email",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown,
            },
        )
    }

    fn fail(breaker: &CircuitBreaker) {
        breaker.try_acquire().unwrap().record_failure();
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_after_consecutive_failures() {
        let breaker = breaker(3, Duration::from_secs(60));

        fail(&breaker);
        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Closed);

        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = breaker.try_acquire().unwrap_err();
        assert_eq!(err.code(), ErrorCode::CircuitOpen);
        assert_eq!(breaker.metrics().total_rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breaker = breaker(3, Duration::from_secs(60));

        fail(&breaker);
        fail(&breaker);
        breaker.try_acquire().unwrap().record_success();
        fail(&breaker);
        fail(&breaker);

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_after_cooldown() {
        let breaker = breaker(1, Duration::from_secs(60));
        fail(&breaker);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(breaker.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        let probe = breaker.try_acquire().unwrap();
        assert!(probe.is_probe());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Second caller is refused while the probe is in flight
        assert_eq!(breaker.try_acquire().unwrap_err().code(), ErrorCode::CircuitOpen);

        probe.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_reports_half_open_once_cooldown_elapses() {
        let breaker = breaker(1, Duration::from_secs(60));
        fail(&breaker);
        assert_eq!(breaker.metrics().cooldown_remaining, Some(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(60)).await;

        // No caller has asked for admission yet
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        let metrics = breaker.metrics();
        assert_eq!(metrics.state, CircuitState::HalfOpen);
        assert!(metrics.cooldown_remaining.is_none());

        let probe = breaker.try_acquire().unwrap();
        assert!(probe.is_probe());
        probe.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_restarts_cooldown() {
        let breaker = breaker(1, Duration::from_secs(10));
        fail(&breaker);

        tokio::time::advance(Duration::from_secs(10)).await;
        breaker.try_acquire().unwrap().record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(breaker.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(breaker.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_counts_as_failure() {
        let breaker = breaker(1, Duration::from_secs(10));
        fail(&breaker);
        tokio::time::advance(Duration::from_secs(10)).await;

        {
            let _probe = breaker.try_acquire().unwrap();
        }

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.metrics().total_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_breaker() {
        let breaker = breaker(1, Duration::from_secs(60));
        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().consecutive_failures, 0);
    }

    #[test]
    fn test_config_from_settings() {
        let settings = CircuitSettings {
            failure_threshold: 0,
            cooldown: Duration::from_secs(30),
        };
        let config = CircuitBreakerConfig::from(&settings);

        assert_eq!(config.failure_threshold, 1);
        assert_eq!(config.cooldown, Duration::from_secs(30));
    }
}
