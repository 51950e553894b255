//! Format generators and the format → generator table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{ReportesError, Result};
use crate::export::model::{ExportFormat, ExportOptions, Report};

/// Renders reports into one export format.
///
/// Generators have no side effects. Multi-record generation checks the
/// cancellation token between records and stops with `Cancelled`.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    fn format(&self) -> ExportFormat;

    async fn generate_single(
        &self,
        report: &Report,
        options: &ExportOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>>;

    async fn generate_multiple(
        &self,
        reports: &[Report],
        options: &ExportOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>>;
}

/// Strategy table from format to generator.
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    generators: HashMap<ExportFormat, Arc<dyn ReportGenerator>>,
}

impl std::fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorRegistry")
            .field("formats", &self.generators.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in PDF and JSON generators.
    pub fn with_defaults() -> Self {
        Self::new()
            .with_generator(Arc::new(PdfReportGenerator))
            .with_generator(Arc::new(JsonReportGenerator))
    }

    /// Register a generator, replacing any existing one for its format.
    pub fn with_generator(mut self, generator: Arc<dyn ReportGenerator>) -> Self {
        self.generators.insert(generator.format(), generator);
        self
    }

    pub fn get(&self, format: ExportFormat) -> Result<Arc<dyn ReportGenerator>> {
        self.generators
            .get(&format)
            .cloned()
            .ok_or_else(|| ReportesError::generation_failed(format, "no generator registered"))
    }
}

async fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ReportesError::cancelled("Export generation"));
    }
    tokio::task::yield_now().await;
    Ok(())
}

fn view(report: &Report, options: &ExportOptions) -> Report {
    let mut report = report.clone();
    if !options.include_history {
        report.history.clear();
    }
    report
}

// ═══════════════════════════════════════════════════════════════════════════════
// JSON
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReportGenerator;

#[derive(Serialize)]
struct JsonEnvelope<'a, T: Serialize> {
    title: &'a str,
    generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
    #[serde(flatten)]
    body: T,
}

#[derive(Serialize)]
struct SingleBody {
    report: Report,
}

#[derive(Serialize)]
struct MultiBody {
    reports: Vec<Report>,
}

impl JsonReportGenerator {
    fn encode<T: Serialize>(value: &T, options: &ExportOptions) -> Result<Vec<u8>> {
        let bytes = if options.pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        Ok(bytes)
    }
}

#[async_trait]
impl ReportGenerator for JsonReportGenerator {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    async fn generate_single(
        &self,
        report: &Report,
        options: &ExportOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        checkpoint(cancel).await?;
        let envelope = JsonEnvelope {
            title: options.title.as_deref().unwrap_or("Incident report"),
            generated_at: Utc::now(),
            count: None,
            body: SingleBody {
                report: view(report, options),
            },
        };
        Self::encode(&envelope, options)
    }

    async fn generate_multiple(
        &self,
        reports: &[Report],
        options: &ExportOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let mut views = Vec::with_capacity(reports.len());
        for report in reports {
            checkpoint(cancel).await?;
            views.push(view(report, options));
        }

        let envelope = JsonEnvelope {
            title: options.title.as_deref().unwrap_or("Incident reports"),
            generated_at: Utc::now(),
            count: Some(views.len()),
            body: MultiBody { reports: views },
        };
        Self::encode(&envelope, options)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PDF
// ═══════════════════════════════════════════════════════════════════════════════

/// Plain-text PDF: one or more Helvetica pages per report.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfReportGenerator;

const LINES_PER_PAGE: usize = 50;
const WRAP_COLUMNS: usize = 90;

impl PdfReportGenerator {
    fn report_lines(report: &Report, options: &ExportOptions) -> Vec<String> {
        let mut lines = vec![
            format!("Report {}", report.folio),
            format!("Title: {}", report.title),
            format!("Status: {}    Category: {}", report.status, report.category),
            format!("Created: {}", report.created_at.format("%Y-%m-%d %H:%M UTC")),
        ];
        if let Some(location) = &report.location {
            lines.push(format!("Location: {}", location));
        }
        lines.push(String::new());
        lines.extend(wrap(&report.description, WRAP_COLUMNS));

        if options.include_history && !report.history.is_empty() {
            lines.push(String::new());
            lines.push("History".to_string());
            for event in &report.history {
                let entry = format!(
                    "{} {}: {}",
                    event.at.format("%Y-%m-%d %H:%M"),
                    event.author,
                    event.note
                );
                lines.extend(wrap(&entry, WRAP_COLUMNS));
            }
        }
        lines
    }

    fn pages_for(report: &Report, options: &ExportOptions, header: &str) -> Vec<Vec<String>> {
        let mut lines = vec![header.to_string(), String::new()];
        lines.extend(Self::report_lines(report, options));
        lines
            .chunks(LINES_PER_PAGE)
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}

#[async_trait]
impl ReportGenerator for PdfReportGenerator {
    fn format(&self) -> ExportFormat {
        ExportFormat::Pdf
    }

    async fn generate_single(
        &self,
        report: &Report,
        options: &ExportOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        checkpoint(cancel).await?;
        let header = options.title.as_deref().unwrap_or("Incident report");
        Ok(render_pdf(&Self::pages_for(report, options, header)))
    }

    async fn generate_multiple(
        &self,
        reports: &[Report],
        options: &ExportOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let title = options.title.as_deref().unwrap_or("Incident reports");
        let mut pages = Vec::new();
        for (index, report) in reports.iter().enumerate() {
            checkpoint(cancel).await?;
            let header = format!("{} ({} of {})", title, index + 1, reports.len());
            pages.extend(Self::pages_for(report, options, &header));
        }
        Ok(render_pdf(&pages))
    }
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            if !current.is_empty() && current.chars().count() + word.chars().count() + 1 > width {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        lines.push(current);
    }
    lines
}

/// Escape text for a PDF literal string. Helvetica's base encoding has no
/// glyphs beyond ASCII, so anything else becomes `?`.
fn pdf_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' | '(' | ')' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            ' '..='~' => escaped.push(ch),
            _ => escaped.push('?'),
        }
    }
    escaped
}

fn render_pdf(pages: &[Vec<String>]) -> Vec<u8> {
    let mut out: Vec<u8> = b"%PDF-1.4\n".to_vec();
    let mut offsets: Vec<usize> = Vec::new();

    let mut write_object = |out: &mut Vec<u8>, body: &str| {
        offsets.push(out.len());
        let number = offsets.len();
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", number, body).as_bytes());
    };

    // 1 catalog, 2 page tree, 3 font, then a (page, contents) pair per page
    let kids: Vec<String> = (0..pages.len()).map(|i| format!("{} 0 R", 4 + 2 * i)).collect();
    write_object(&mut out, "<< /Type /Catalog /Pages 2 0 R >>");
    write_object(
        &mut out,
        &format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), pages.len()),
    );
    write_object(&mut out, "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>");

    for (i, lines) in pages.iter().enumerate() {
        let contents_id = 5 + 2 * i;
        write_object(
            &mut out,
            &format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
                 /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
                contents_id
            ),
        );

        let mut stream = String::from("BT\n/F1 10 Tf\n14 TL\n50 750 Td\n");
        for line in lines {
            stream.push_str(&format!("({}) Tj T*\n", pdf_escape(line)));
        }
        stream.push_str("ET");
        write_object(
            &mut out,
            &format!("<< /Length {} >>\nstream\n{}\nendstream", stream.len(), stream),
        );
    }

    let xref_offset = out.len();
    let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", offsets.len() + 1);
    for offset in &offsets {
        xref.push_str(&format!("{:010} 00000 n \n", offset));
    }
    xref.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        offsets.len() + 1,
        xref_offset
    ));
    out.extend_from_slice(xref.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::export::model::ReportEvent;

    fn report(id: i64) -> Report {
        Report {
            id,
            folio: format!("INC-{id:06}"),
            title: "Pothole (large)".to_string(),
            description: "Deep pothole near the school entrance".to_string(),
            status: "open".to_string(),
            category: "roads".to_string(),
            location: Some("Av. Juárez 12".to_string()),
            owner_id: "ana".to_string(),
            created_at: Utc::now(),
            history: vec![ReportEvent {
                at: Utc::now(),
                author: "crew-7".to_string(),
                note: "Inspected".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_json_multiple_has_count_and_drops_history() {
        let bytes = JsonReportGenerator
            .generate_multiple(
                &[report(1), report(2)],
                &ExportOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["count"], 2);
        assert_eq!(value["reports"].as_array().unwrap().len(), 2);
        assert!(value["reports"][0].get("history").is_none());
    }

    #[tokio::test]
    async fn test_json_single_has_report_key() {
        let options = ExportOptions {
            include_history: true,
            ..ExportOptions::default()
        };
        let bytes = JsonReportGenerator
            .generate_single(&report(7), &options, &CancellationToken::new())
            .await
            .unwrap();

        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["report"]["folio"], "INC-000007");
        assert_eq!(value["report"]["history"].as_array().unwrap().len(), 1);
        assert!(value.get("count").is_none());
    }

    #[tokio::test]
    async fn test_pdf_structure() {
        let bytes = PdfReportGenerator
            .generate_multiple(
                &[report(1), report(2)],
                &ExportOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.ends_with("%%EOF\n"));
        assert!(text.contains("/Count 2"));
        assert!(text.contains("(Title: Pothole \\(large\\)) Tj"));
        assert!(text.contains("Av. Ju?rez 12"));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_generation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = PdfReportGenerator
            .generate_multiple(&[report(1)], &ExportOptions::default(), &cancel)
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::Cancelled);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = GeneratorRegistry::with_defaults();
        assert_eq!(registry.get(ExportFormat::Pdf).unwrap().format(), ExportFormat::Pdf);

        let empty = GeneratorRegistry::new();
        assert_eq!(
            empty.get(ExportFormat::Json).err().map(|e| e.code()),
            Some(ErrorCode::GenerationFailed)
        );
    }

    #[test]
    fn test_wrap_respects_width() {
        let lines = wrap("one two three four", 9);
        assert_eq!(lines, vec!["one two", "three", "four"]);
    }
}
