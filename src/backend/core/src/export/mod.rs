//! Report export: data model, store boundary, format generators and the
//! orchestrator that ties them together.

pub mod generator;
pub mod model;
pub mod orchestrator;
pub mod store;

pub use generator::{GeneratorRegistry, JsonReportGenerator, PdfReportGenerator, ReportGenerator};
pub use model::{
    ExportFormat, ExportMode, ExportOptions, ExportRequest, ExportResult, Report, ReportEvent,
    ReportId,
};
pub use orchestrator::{ExportLimits, ExportOrchestrator};
pub use store::{InMemoryReportStore, ReportStore};
