//! Resilient notification delivery.
//!
//! [`ResilientDeliveryService`] tries an immediate send through the retry
//! executor and circuit breaker. Anything that still fails is parked in the
//! [`FailureQueue`] for a later [`process_queue`](ResilientDeliveryService::process_queue)
//! pass, so callers are never blocked on a flaky transport.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{DeliveryConfig, HealthSettings};
use crate::error::{ErrorCode, ReportesError, Result};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::resilience::failure_queue::{FailureQueue, FailureQueueConfig};
use crate::resilience::retry::{RetryExecutor, RetryPolicy};
use crate::resilience::transport::{DeliveryMessage, DeliveryTransport};
use crate::telemetry::DeliveryMetrics;

/// What happened to a message handed to `send_with_retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    /// Immediate delivery failed; the message waits in the failure queue.
    Queued { queue_len: usize },
}

/// Result of one `process_queue` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueProcessingReport {
    pub delivered: usize,
    pub requeued: usize,
    pub expired: usize,
    pub exhausted: usize,
}

/// Derived view of delivery health; recomputed on every call.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealthSnapshot {
    pub dependency: String,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub queue_length: usize,
    pub queue_capacity: usize,
    pub recent_failures: usize,
    pub last_success_at: Option<DateTime<Utc>>,
    pub healthy: bool,
}

pub struct ResilientDeliveryService {
    transport: Arc<dyn DeliveryTransport>,
    executor: RetryExecutor,
    queue: FailureQueue,
    queue_enabled: bool,
    health: HealthSettings,
    recent_failures: Mutex<VecDeque<Instant>>,
    last_success_at: Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for ResilientDeliveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientDeliveryService")
            .field("transport", &self.transport.name())
            .field("queue_len", &self.queue.len())
            .field("queue_enabled", &self.queue_enabled)
            .finish()
    }
}

impl ResilientDeliveryService {
    pub fn new(
        transport: Arc<dyn DeliveryTransport>,
        executor: RetryExecutor,
        queue: FailureQueue,
        queue_enabled: bool,
        health: HealthSettings,
    ) -> Self {
        Self {
            transport,
            executor,
            queue,
            queue_enabled,
            health,
            recent_failures: Mutex::new(VecDeque::new()),
            last_success_at: Mutex::new(None),
        }
    }

    /// Wire a service with its own breaker from the delivery config.
    pub fn from_config(config: &DeliveryConfig, transport: Arc<dyn DeliveryTransport>) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            transport.name().to_string(),
            CircuitBreakerConfig::from(&config.circuit),
        ));
        let executor = RetryExecutor::new(RetryPolicy::from(&config.retry), breaker);
        let queue = FailureQueue::new(FailureQueueConfig::from(&config.queue));

        Self::new(
            transport,
            executor,
            queue,
            config.queue.enabled,
            config.health.clone(),
        )
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.executor.breaker()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Deliver now, or park the message in the failure queue.
    ///
    /// Errors only when the message could not be delivered *and* could not
    /// be queued (`QueueFull`, `QueueingDisabled`).
    pub async fn send_with_retry(&self, message: DeliveryMessage) -> Result<DeliveryOutcome> {
        let failure = match self.deliver(&message).await {
            Ok(()) => return Ok(DeliveryOutcome::Delivered),
            Err(error) => error,
        };

        if !self.queue_enabled {
            tracing::error!(
                message_id = %message.id,
                recipients = %message.masked_recipients(),
                error_code = %failure.code(),
                "Delivery failed and queueing is disabled"
            );
            return Err(ReportesError::queueing_disabled(failure.describe()).with_source(failure));
        }

        let message_id = message.id;
        let recipients = message.masked_recipients();
        match self.queue.enqueue(message, failure.describe()) {
            Ok(queue_len) => {
                tracing::warn!(
                    message_id = %message_id,
                    recipients = %recipients,
                    queue_len,
                    reason = %failure.describe(),
                    "Delivery failed, message queued for retry"
                );
                Ok(DeliveryOutcome::Queued { queue_len })
            }
            Err(queue_error) => {
                tracing::error!(
                    message_id = %message_id,
                    recipients = %recipients,
                    reason = %failure.describe(),
                    "Delivery failed and the failure queue is full"
                );
                Err(queue_error.with_internal_message(failure.describe()))
            }
        }
    }

    async fn deliver(&self, message: &DeliveryMessage) -> Result<()> {
        let transport = self.transport.as_ref();
        let result = self.executor.execute(|_| transport.send(message)).await;

        match &result {
            Ok(()) => {
                *self.last_success_at.lock() = Some(Utc::now());
                tracing::info!(
                    message_id = %message.id,
                    recipients = %message.masked_recipients(),
                    transport = %transport.name(),
                    "Message delivered"
                );
            }
            Err(error) => {
                if error.code() == ErrorCode::CircuitOpen {
                    DeliveryMetrics::record_attempt(transport.name(), "short_circuited");
                }
                self.record_failure(Instant::now());
            }
        }

        result
    }

    fn record_failure(&self, now: Instant) {
        let mut failures = self.recent_failures.lock();
        failures.push_back(now);
        Self::prune(&mut failures, now, self.health.failure_window);
    }

    fn prune(failures: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while failures
            .front()
            .is_some_and(|at| now.saturating_duration_since(*at) > window)
        {
            failures.pop_front();
        }
    }

    /// One redelivery pass over the failure queue.
    ///
    /// Once the breaker reports open, the rest of the batch goes back
    /// untouched and without spending an attempt.
    pub async fn process_queue(&self) -> QueueProcessingReport {
        let batch = self.queue.take_batch(Instant::now());
        let mut report = QueueProcessingReport {
            expired: batch.expired,
            exhausted: batch.exhausted,
            ..QueueProcessingReport::default()
        };
        let max_attempts = self.queue.config().max_attempts;
        let mut circuit_open = false;

        for mut entry in batch.messages {
            if !circuit_open {
                match self.deliver(&entry.message).await {
                    Ok(()) => {
                        self.queue.settle();
                        report.delivered += 1;
                        continue;
                    }
                    Err(error) if error.code() == ErrorCode::CircuitOpen => circuit_open = true,
                    Err(error) => {
                        entry.attempts += 1;
                        entry.last_error = error.describe();
                    }
                }
            }

            if entry.attempts >= max_attempts {
                self.queue.settle();
                report.exhausted += 1;
                DeliveryMetrics::record_dropped("exhausted", 1);
                tracing::warn!(
                    message_id = %entry.message.id,
                    attempts = entry.attempts,
                    last_error = %entry.last_error,
                    "Queued message exhausted its attempts and was discarded"
                );
                continue;
            }

            self.queue.requeue(entry);
            report.requeued += 1;
        }

        if report != QueueProcessingReport::default() {
            tracing::info!(
                delivered = report.delivered,
                requeued = report.requeued,
                expired = report.expired,
                exhausted = report.exhausted,
                queue_len = self.queue.len(),
                "Failure queue processed"
            );
        }

        report
    }

    /// Number of messages delivered by one `process_queue` pass.
    pub async fn process_queue_count(&self) -> usize {
        self.process_queue().await.delivered
    }

    /// Drain the queue every `interval` until `shutdown` fires.
    pub fn spawn_queue_processor(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Failure queue processor stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if !self.queue.is_empty() {
                            self.process_queue().await;
                        }
                    }
                }
            }
        })
    }

    pub fn health(&self) -> ServiceHealthSnapshot {
        let metrics = self.breaker().metrics();
        let queue_length = self.queue.len();

        let recent_failures = {
            let mut failures = self.recent_failures.lock();
            Self::prune(&mut failures, Instant::now(), self.health.failure_window);
            failures.len()
        };

        ServiceHealthSnapshot {
            dependency: self.transport.name().to_string(),
            circuit_state: metrics.state,
            consecutive_failures: metrics.consecutive_failures,
            queue_length,
            queue_capacity: self.queue.config().capacity,
            recent_failures,
            last_success_at: *self.last_success_at.lock(),
            healthy: metrics.state == CircuitState::Closed
                && queue_length < self.health.queue_warning_threshold,
        }
    }
}
