//! Export orchestration: authorization, size limits, record resolution,
//! generator dispatch and duration/size alerts.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ExportConfig;
use crate::error::{ReportesError, Result};
use crate::export::generator::GeneratorRegistry;
use crate::export::model::{ExportFormat, ExportMode, ExportRequest, ExportResult, Report, ReportId};
use crate::export::store::ReportStore;
use crate::telemetry::ExportMetrics;

/// Record ceilings per format and mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportLimits {
    pub pdf_max_records: usize,
    pub json_max_records: usize,
    pub background_max_records: usize,
}

impl From<&ExportConfig> for ExportLimits {
    fn from(config: &ExportConfig) -> Self {
        Self {
            pdf_max_records: config.pdf_max_records,
            json_max_records: config.json_max_records,
            background_max_records: config.background_max_records,
        }
    }
}

impl ExportLimits {
    pub fn max_records(&self, format: ExportFormat, mode: ExportMode) -> usize {
        match (mode, format) {
            (ExportMode::Background, _) => self.background_max_records,
            (ExportMode::Interactive, ExportFormat::Pdf) => self.pdf_max_records,
            (ExportMode::Interactive, ExportFormat::Json) => self.json_max_records,
        }
    }
}

pub struct ExportOrchestrator {
    store: Arc<dyn ReportStore>,
    generators: GeneratorRegistry,
    config: ExportConfig,
    limits: ExportLimits,
}

impl std::fmt::Debug for ExportOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportOrchestrator")
            .field("generators", &self.generators)
            .field("limits", &self.limits)
            .finish()
    }
}

impl ExportOrchestrator {
    pub fn new(store: Arc<dyn ReportStore>, generators: GeneratorRegistry, config: ExportConfig) -> Self {
        Self {
            store,
            generators,
            limits: ExportLimits::from(&config),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn ReportStore> {
        &self.store
    }

    pub fn limits(&self) -> ExportLimits {
        self.limits
    }

    /// Whether `request` is over the interactive ceiling and must go
    /// through the background path.
    pub fn requires_background(&self, request: &ExportRequest) -> bool {
        request.report_ids.len() > self.limits.max_records(request.format, ExportMode::Interactive)
    }

    /// Synchronous export with interactive limits.
    pub async fn export(
        &self,
        request: &ExportRequest,
        caller_id: &str,
        is_privileged: bool,
    ) -> Result<ExportResult> {
        self.export_with(
            request,
            caller_id,
            is_privileged,
            ExportMode::Interactive,
            &CancellationToken::new(),
        )
        .await
    }

    pub async fn export_with(
        &self,
        request: &ExportRequest,
        caller_id: &str,
        is_privileged: bool,
        mode: ExportMode,
        cancel: &CancellationToken,
    ) -> Result<ExportResult> {
        let format = request.format;
        let result = self.run(request, caller_id, is_privileged, mode, cancel).await;

        if let Err(error) = &result {
            ExportMetrics::record_failure(format.as_str(), &error.code().to_string());
            tracing::warn!(
                caller_id = %caller_id,
                format = %format,
                requested = request.report_ids.len(),
                error_code = %error.code(),
                reason = %error.describe(),
                "Export failed"
            );
        }
        result
    }

    async fn run(
        &self,
        request: &ExportRequest,
        caller_id: &str,
        is_privileged: bool,
        mode: ExportMode,
        cancel: &CancellationToken,
    ) -> Result<ExportResult> {
        if !is_privileged {
            return Err(ReportesError::forbidden(
                "You do not have permission to export reports",
            ));
        }

        let format = request.format;
        if request.report_ids.is_empty() {
            return Err(ReportesError::validation("Select at least one report to export"));
        }

        let limit = self.limits.max_records(format, mode);
        if request.report_ids.len() > limit {
            return Err(ReportesError::selection_too_large(format, limit, request.report_ids.len()));
        }

        let reports = self.resolve(&request.report_ids).await?;
        if reports.is_empty() {
            return Err(ReportesError::not_found("Reports", join_ids(&request.report_ids)));
        }
        if cancel.is_cancelled() {
            return Err(ReportesError::cancelled("Export"));
        }

        let generator = self.generators.get(format)?;
        let started = Instant::now();

        // Exactly one resolved record always takes the single-record path
        let content = match reports.as_slice() {
            [report] => generator.generate_single(report, &request.options, cancel).await?,
            many => generator.generate_multiple(many, &request.options, cancel).await?,
        };

        let elapsed = started.elapsed();
        let generated_at = Utc::now();
        let result = ExportResult {
            filename: self.filename(format, &reports, generated_at),
            content_type: format.content_type(),
            format,
            report_count: reports.len(),
            generated_at,
            content,
        };

        ExportMetrics::record_success(format.as_str(), elapsed, result.size_bytes());
        self.check_alerts(&result, elapsed, caller_id);

        tracing::info!(
            caller_id = %caller_id,
            format = %format,
            mode = ?mode,
            requested = request.report_ids.len(),
            exported = result.report_count,
            size_bytes = result.size_bytes(),
            duration_ms = elapsed.as_millis() as u64,
            filename = %result.filename,
            "Export generated"
        );

        Ok(result)
    }

    /// Resolve ids concurrently, in request order, skipping duplicates and
    /// ids the store does not know.
    async fn resolve(&self, ids: &[ReportId]) -> Result<Vec<Report>> {
        let mut seen = HashSet::with_capacity(ids.len());
        let unique: Vec<ReportId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let lookups = unique.iter().map(|id| self.store.resolve_by_id(*id));
        let resolved = join_all(lookups).await;

        let mut reports = Vec::with_capacity(resolved.len());
        for (id, lookup) in unique.iter().zip(resolved) {
            match lookup? {
                Some(report) => reports.push(report),
                None => tracing::debug!(report_id = *id, "Report not found, skipping"),
            }
        }
        Ok(reports)
    }

    fn filename(&self, format: ExportFormat, reports: &[Report], at: DateTime<Utc>) -> String {
        let timestamp = at.format("%Y%m%d_%H%M%S");
        match reports {
            [report] => format!(
                "{}_{}_{}.{}",
                self.config.file_prefix_single,
                sanitize(&report.folio),
                timestamp,
                format.extension()
            ),
            many => format!(
                "{}_{}_{}.{}",
                self.config.file_prefix_multi,
                many.len(),
                timestamp,
                format.extension()
            ),
        }
    }

    fn check_alerts(&self, result: &ExportResult, elapsed: std::time::Duration, caller_id: &str) {
        if elapsed > self.config.slow_export_threshold {
            ExportMetrics::record_alert(result.format.as_str(), "slow");
            tracing::warn!(
                caller_id = %caller_id,
                format = %result.format,
                report_count = result.report_count,
                duration_ms = elapsed.as_millis() as u64,
                threshold_ms = self.config.slow_export_threshold.as_millis() as u64,
                "ALERT: export exceeded duration threshold"
            );
        }
        if result.size_bytes() > self.config.large_export_threshold_bytes {
            ExportMetrics::record_alert(result.format.as_str(), "large");
            tracing::warn!(
                caller_id = %caller_id,
                format = %result.format,
                report_count = result.report_count,
                size_bytes = result.size_bytes(),
                threshold_bytes = self.config.large_export_threshold_bytes,
                "ALERT: export exceeded size threshold"
            );
        }
    }
}

fn sanitize(folio: &str) -> String {
    folio
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn join_ids(ids: &[ReportId]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::export::generator::ReportGenerator;
    use crate::export::model::{ExportOptions, Report};
    use crate::export::store::InMemoryReportStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn report(id: ReportId) -> Report {
        Report {
            id,
            folio: format!("INC/{id}"),
            title: format!("Report {id}"),
            description: "desc".to_string(),
            status: "open".to_string(),
            category: "roads".to_string(),
            location: None,
            owner_id: "ana".to_string(),
            created_at: Utc::now(),
            history: vec![],
        }
    }

    /// Records which entry point was used.
    #[derive(Default)]
    struct CountingGenerator {
        singles: AtomicUsize,
        multiples: AtomicUsize,
    }

    #[async_trait]
    impl ReportGenerator for CountingGenerator {
        fn format(&self) -> ExportFormat {
            ExportFormat::Json
        }

        async fn generate_single(
            &self,
            _report: &Report,
            _options: &ExportOptions,
            _cancel: &CancellationToken,
        ) -> Result<Vec<u8>> {
            self.singles.fetch_add(1, Ordering::SeqCst);
            Ok(b"single".to_vec())
        }

        async fn generate_multiple(
            &self,
            reports: &[Report],
            _options: &ExportOptions,
            _cancel: &CancellationToken,
        ) -> Result<Vec<u8>> {
            self.multiples.fetch_add(1, Ordering::SeqCst);
            Ok(vec![b'x'; reports.len()])
        }
    }

    fn orchestrator_with(generator: Arc<CountingGenerator>, config: ExportConfig) -> ExportOrchestrator {
        let store: InMemoryReportStore = (1..=3).map(report).collect();
        ExportOrchestrator::new(
            Arc::new(store),
            GeneratorRegistry::with_defaults().with_generator(generator),
            config,
        )
    }

    #[tokio::test]
    async fn test_single_resolved_record_uses_single_path() {
        let generator = Arc::new(CountingGenerator::default());
        let orchestrator = orchestrator_with(generator.clone(), ExportConfig::default());

        // 99 does not resolve, leaving exactly one record
        let request = ExportRequest::new(vec![2, 99], ExportFormat::Json);
        let result = orchestrator.export(&request, "ana", true).await.unwrap();

        assert_eq!(result.report_count, 1);
        assert_eq!(generator.singles.load(Ordering::SeqCst), 1);
        assert_eq!(generator.multiples.load(Ordering::SeqCst), 0);
        assert!(result.filename.starts_with("reporte_INC_2_"));
        assert!(result.filename.ends_with(".json"));
    }

    #[tokio::test]
    async fn test_duplicates_are_exported_once() {
        let generator = Arc::new(CountingGenerator::default());
        let orchestrator = orchestrator_with(generator.clone(), ExportConfig::default());

        let request = ExportRequest::new(vec![1, 3, 1, 3], ExportFormat::Json);
        let result = orchestrator.export(&request, "ana", true).await.unwrap();

        assert_eq!(result.report_count, 2);
        assert_eq!(result.content.len(), 2);
    }

    #[tokio::test]
    async fn test_background_mode_uses_larger_ceiling() {
        let orchestrator = orchestrator_with(Arc::new(CountingGenerator::default()), ExportConfig::default());
        let mut ids: Vec<ReportId> = (1..=3).collect();
        ids.extend(1000..1200);
        let request = ExportRequest::new(ids, ExportFormat::Json);

        assert!(orchestrator.requires_background(&request));
        assert_eq!(
            orchestrator.export(&request, "ana", true).await.unwrap_err().code(),
            ErrorCode::ValidationError
        );

        let result = orchestrator
            .export_with(&request, "ana", true, ExportMode::Background, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.report_count, 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_generation() {
        let generator = Arc::new(CountingGenerator::default());
        let orchestrator = orchestrator_with(generator.clone(), ExportConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator
            .export_with(
                &ExportRequest::new(vec![1, 2], ExportFormat::Json),
                "ana",
                true,
                ExportMode::Background,
                &cancel,
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::Cancelled);
        assert_eq!(generator.multiples.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sanitize_folio() {
        assert_eq!(sanitize("INC/2024 #7"), "INC_2024__7");
    }
}
