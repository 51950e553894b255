//! Bounded, time-limited holding area for messages that failed delivery.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::{OverflowPolicy, QueueSettings};
use crate::error::{ReportesError, Result};
use crate::resilience::transport::DeliveryMessage;
use crate::telemetry::DeliveryMetrics;

#[derive(Debug, Clone)]
pub struct FailureQueueConfig {
    pub capacity: usize,
    pub max_age: Duration,
    /// Redelivery attempts a message gets before it is discarded
    pub max_attempts: u32,
    pub batch_size: usize,
    pub overflow: OverflowPolicy,
}

impl Default for FailureQueueConfig {
    fn default() -> Self {
        Self::from(&QueueSettings::default())
    }
}

impl From<&QueueSettings> for FailureQueueConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            capacity: settings.capacity,
            max_age: settings.max_age,
            max_attempts: settings.max_attempts,
            batch_size: settings.batch_size,
            overflow: settings.overflow,
        }
    }
}

/// A message waiting for redelivery.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message: DeliveryMessage,
    pub enqueued_at: Instant,
    pub enqueued_at_utc: DateTime<Utc>,
    /// Redelivery attempts made from the queue so far
    pub attempts: u32,
    pub last_error: String,
}

/// Entries handed out by [`FailureQueue::take_batch`], plus what was purged.
#[derive(Debug, Default)]
pub struct QueueBatch {
    pub messages: Vec<QueuedMessage>,
    pub expired: usize,
    pub exhausted: usize,
}

/// FIFO queue with a hard capacity.
///
/// Under [`OverflowPolicy::Reject`] a full queue refuses new messages and
/// never touches existing ones. Entries handed out by
/// [`take_batch`](Self::take_batch) keep their slot until they are
/// requeued or settled, so a redelivery pass never loses its own entries to
/// messages enqueued while it runs.
#[derive(Debug)]
pub struct FailureQueue {
    config: FailureQueueConfig,
    state: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<QueuedMessage>,
    /// Slots reserved by entries currently out for redelivery
    in_flight: usize,
}

impl QueueState {
    fn occupied(&self) -> usize {
        self.entries.len() + self.in_flight
    }
}

impl FailureQueue {
    pub fn new(config: FailureQueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::with_capacity(config.capacity.min(1024)),
                in_flight: 0,
            }),
            config,
        }
    }

    pub fn config(&self) -> &FailureQueueConfig {
        &self.config
    }

    /// Messages waiting for the next pass.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Messages taken by a pass and not yet requeued or settled.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Add a freshly failed message. Returns the queue length after insertion.
    pub fn enqueue(&self, message: DeliveryMessage, last_error: impl Into<String>) -> Result<usize> {
        let entry = QueuedMessage {
            message,
            enqueued_at: Instant::now(),
            enqueued_at_utc: Utc::now(),
            attempts: 0,
            last_error: last_error.into(),
        };

        let mut state = self.state.lock();
        if state.occupied() >= self.config.capacity {
            let evicted = match self.config.overflow {
                OverflowPolicy::Reject => None,
                OverflowPolicy::DropOldest => state.entries.pop_front(),
            };
            match evicted {
                Some(evicted) => {
                    DeliveryMetrics::record_dropped("overflow", 1);
                    tracing::warn!(
                        evicted_id = %evicted.message.id,
                        message_id = %entry.message.id,
                        "Failure queue full, oldest message evicted"
                    );
                }
                None => {
                    DeliveryMetrics::record_dropped("overflow", 1);
                    tracing::warn!(
                        message_id = %entry.message.id,
                        capacity = self.config.capacity,
                        in_flight = state.in_flight,
                        "Failure queue full, message rejected"
                    );
                    return Err(ReportesError::queue_full(self.config.capacity));
                }
            }
        }

        state.entries.push_back(entry);
        let len = state.entries.len();
        DeliveryMetrics::set_queue_depth(len);
        Ok(len)
    }

    /// Put a message back after a failed redelivery, keeping its original
    /// enqueue time so the age limit still applies. Reuses the slot the
    /// entry held while in flight, so it cannot be refused.
    pub fn requeue(&self, entry: QueuedMessage) -> usize {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.entries.push_back(entry);
        let len = state.entries.len();
        DeliveryMetrics::set_queue_depth(len);
        len
    }

    /// Release the slot of an in-flight entry that was delivered or discarded.
    pub fn settle(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    /// Purge expired and exhausted entries, then take up to `batch_size`
    /// of the oldest remaining ones for redelivery. Every returned entry must
    /// later be passed to [`requeue`](Self::requeue) or
    /// [`settle`](Self::settle).
    pub fn take_batch(&self, now: Instant) -> QueueBatch {
        let mut state = self.state.lock();
        let mut batch = QueueBatch::default();

        let max_age = self.config.max_age;
        let max_attempts = self.config.max_attempts;
        state.entries.retain(|entry| {
            if now.saturating_duration_since(entry.enqueued_at) > max_age {
                batch.expired += 1;
                false
            } else if entry.attempts >= max_attempts {
                batch.exhausted += 1;
                false
            } else {
                true
            }
        });

        let take = self.config.batch_size.min(state.entries.len());
        batch.messages = state.entries.drain(..take).collect();
        state.in_flight += batch.messages.len();

        DeliveryMetrics::set_queue_depth(state.entries.len());
        if batch.expired > 0 {
            DeliveryMetrics::record_dropped("expired", batch.expired);
        }
        if batch.exhausted > 0 {
            DeliveryMetrics::record_dropped("exhausted", batch.exhausted);
        }

        batch
    }
}
