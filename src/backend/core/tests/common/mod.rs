//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use reportes_core::error::{ReportesError, Result};
use reportes_core::export::{
    ExportFormat, ExportOptions, InMemoryReportStore, Report, ReportGenerator, ReportId,
};
use reportes_core::resilience::{DeliveryMessage, DeliveryTransport};

pub fn report(id: ReportId, owner: &str) -> Report {
    Report {
        id,
        folio: format!("INC-{id:06}"),
        title: format!("Pothole #{id}"),
        description: "Deep pothole in the right lane".to_string(),
        status: "open".to_string(),
        category: "roads".to_string(),
        location: Some("Av. Juárez 100".to_string()),
        owner_id: owner.to_string(),
        created_at: Utc::now(),
        history: vec![],
    }
}

/// Store holding reports `1..=count`, all owned by `owner`.
pub fn store_with(count: i64, owner: &str) -> Arc<InMemoryReportStore> {
    Arc::new((1..=count).map(|id| report(id, owner)).collect())
}

// ============================================================================
// Transports
// ============================================================================

/// Records every message; fails transiently while `down` is set.
#[derive(Default)]
pub struct RecordingTransport {
    pub down: AtomicBool,
    pub reject: AtomicBool,
    pub calls: AtomicUsize,
    delay: Mutex<Duration>,
    sent: Mutex<Vec<DeliveryMessage>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let transport = Self::default();
        transport.down.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Make every send take `delay` before it resolves.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn sent(&self) -> Vec<DeliveryMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl DeliveryTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &DeliveryMessage) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(ReportesError::transient_delivery("recording", "connection refused"));
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(ReportesError::delivery_rejected("recording", "HTTP 400"));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

// ============================================================================
// Generators
// ============================================================================

/// How a `ScriptedGenerator` behaves.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Sleep this long per record, honoring cancellation
    Slow(Duration),
    Fail(&'static str),
    Panic,
}

/// PDF generator with scripted behavior that tracks concurrent calls.
pub struct ScriptedGenerator {
    behavior: Behavior,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
    pub calls: AtomicUsize,
    pub observed_cancel: AtomicBool,
}

impl ScriptedGenerator {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            observed_cancel: AtomicBool::new(false),
        })
    }

    async fn run(&self, records: usize, cancel: &CancellationToken) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = match &self.behavior {
            Behavior::Slow(per_record) => {
                let mut outcome = Ok(vec![b'%'; records]);
                for _ in 0..records {
                    tokio::select! {
                        _ = tokio::time::sleep(*per_record) => {}
                        _ = cancel.cancelled() => {
                            self.observed_cancel.store(true, Ordering::SeqCst);
                            outcome = Err(ReportesError::cancelled("Export generation"));
                            break;
                        }
                    }
                }
                outcome
            }
            Behavior::Fail(reason) => Err(ReportesError::generation_failed(ExportFormat::Pdf, *reason)),
            Behavior::Panic => panic!("generator blew up"),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl ReportGenerator for ScriptedGenerator {
    fn format(&self) -> ExportFormat {
        ExportFormat::Pdf
    }

    async fn generate_single(
        &self,
        _report: &Report,
        _options: &ExportOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        self.run(1, cancel).await
    }

    async fn generate_multiple(
        &self,
        reports: &[Report],
        _options: &ExportOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        self.run(reports.len(), cancel).await
    }
}

/// Poll `check` on the (possibly paused) clock until it holds.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
