//! Resilience layer for outbound calls: circuit breaker, retry executor,
//! failure queue and the delivery service built on them.

pub mod ai;
pub mod circuit_breaker;
pub mod delivery;
pub mod failure_queue;
pub mod retry;
pub mod transport;

pub use ai::{AiClient, AiMetricsSnapshot, AiRequest, AiResponse, HttpAiClient, ResilientAiClient};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitPermit, CircuitState,
};
pub use delivery::{
    DeliveryOutcome, QueueProcessingReport, ResilientDeliveryService, ServiceHealthSnapshot,
};
pub use failure_queue::{FailureQueue, FailureQueueConfig, QueueBatch, QueuedMessage};
pub use retry::{RetryExecutor, RetryPolicy};
pub use transport::{
    build_transport, Attachment, DeliveryMessage, DeliveryTransport, LogTransport,
    WebhookTransport,
};
