//! Public facade over the export pipeline.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::export::{ExportOrchestrator, ExportRequest, ExportResult, GeneratorRegistry, ReportStore};
use crate::jobs::{
    ConcurrencyLimitedJobRunner, JobId, JobNotifier, JobRunnerConfig, JobScheduler,
    JobStatusSnapshot, RunnerStatsSnapshot,
};
use crate::resilience::{
    build_transport, AiMetricsSnapshot, DeliveryTransport, HttpAiClient, QueueProcessingReport,
    ResilientAiClient, ResilientDeliveryService, ServiceHealthSnapshot,
};

/// Owns every component and exposes the operations the HTTP surface needs.
#[derive(Clone)]
pub struct ExportPipeline {
    orchestrator: Arc<ExportOrchestrator>,
    delivery: Arc<ResilientDeliveryService>,
    scheduler: JobScheduler,
    ai: Option<Arc<ResilientAiClient<HttpAiClient>>>,
    queue_interval: Duration,
}

impl std::fmt::Debug for ExportPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportPipeline")
            .field("delivery", &self.delivery)
            .field("runner", self.scheduler.runner())
            .field("ai", &self.ai.is_some())
            .finish()
    }
}

impl ExportPipeline {
    /// Wire the pipeline from configuration, building the transport it names.
    pub fn from_config(config: &Config, store: Arc<dyn ReportStore>) -> Result<Self> {
        let transport = build_transport(&config.delivery.transport)?;
        let mut pipeline = Self::with_transport(config, store, transport);

        if let Some(endpoint) = &config.ai.endpoint {
            let client = HttpAiClient::new(endpoint.clone(), config.ai.api_key.clone())?;
            pipeline.ai = Some(Arc::new(ResilientAiClient::new(client, &config.ai)));
            tracing::info!(endpoint = %endpoint, "AI client enabled");
        }

        Ok(pipeline)
    }

    /// Wire the pipeline around an explicit transport.
    pub fn with_transport(
        config: &Config,
        store: Arc<dyn ReportStore>,
        transport: Arc<dyn DeliveryTransport>,
    ) -> Self {
        let orchestrator = Arc::new(ExportOrchestrator::new(
            store,
            GeneratorRegistry::with_defaults(),
            config.export.clone(),
        ));
        let delivery = Arc::new(ResilientDeliveryService::from_config(&config.delivery, transport));
        let runner = ConcurrencyLimitedJobRunner::new(
            orchestrator.clone(),
            JobNotifier::new(delivery.clone()),
            JobRunnerConfig::from(&config.jobs),
        );

        Self {
            orchestrator,
            delivery,
            scheduler: JobScheduler::new(runner, &config.jobs),
            ai: None,
            queue_interval: config.delivery.queue.process_interval,
        }
    }

    pub fn orchestrator(&self) -> &Arc<ExportOrchestrator> {
        &self.orchestrator
    }

    pub fn delivery(&self) -> &Arc<ResilientDeliveryService> {
        &self.delivery
    }

    pub fn ai(&self) -> Option<&Arc<ResilientAiClient<HttpAiClient>>> {
        self.ai.as_ref()
    }

    /// Interactive export; the caller waits for the file.
    pub async fn submit_export(
        &self,
        request: &ExportRequest,
        caller_id: &str,
        is_privileged: bool,
    ) -> Result<ExportResult> {
        self.orchestrator.export(request, caller_id, is_privileged).await
    }

    /// Schedule a background export; the outcome is sent to `notify_address`.
    pub async fn schedule_background_export(
        &self,
        request: ExportRequest,
        owner_id: &str,
        notify_address: &str,
    ) -> Result<JobId> {
        self.scheduler.schedule(request, owner_id, notify_address).await
    }

    pub fn get_job_status(&self, id: JobId) -> JobStatusSnapshot {
        self.scheduler.status(id)
    }

    pub fn get_delivery_health(&self) -> ServiceHealthSnapshot {
        self.delivery.health()
    }

    pub async fn process_delivery_queue(&self) -> QueueProcessingReport {
        self.delivery.process_queue().await
    }

    pub fn runner_stats(&self) -> RunnerStatsSnapshot {
        self.scheduler.runner().stats()
    }

    pub fn ai_metrics(&self) -> Option<AiMetricsSnapshot> {
        self.ai.as_ref().map(|ai| ai.metrics())
    }

    /// Start the periodic failure-queue drain.
    pub fn spawn_queue_processor(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.delivery
            .clone()
            .spawn_queue_processor(self.queue_interval, shutdown)
    }

    /// Stop accepting jobs and cancel those in flight.
    pub fn shutdown(&self) {
        self.scheduler.runner().shutdown();
    }
}
