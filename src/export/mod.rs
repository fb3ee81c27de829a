//! Markdown export to html, pdf, docx, txt and md.
//!
//! | Format | Handler | MIME type |
//! |--------|---------|-----------|
//! | `html` | [`html::render_page`] | `text/html` |
//! | `pdf` | [`pdf::PdfRenderer`] over the print-styled page | `application/pdf` |
//! | `docx` | [`docx::markdown_to_docx`] | WordprocessingML |
//! | `txt` | [`text::markdown_to_text`] | `text/plain` |
//! | `md` | passthrough | `text/markdown` |

pub mod docx;
pub mod html;
pub mod pdf;
pub mod text;

use std::sync::Arc;
use tracing::debug;

use crate::config::ExportConfig;
use crate::error::ConvertError;
use crate::import::{MIME_DOCX, MIME_HTML, MIME_MARKDOWN, MIME_PDF, MIME_TEXT};
use crate::models::ExportResult;
use pdf::{ChromiumRenderer, PdfRenderer};

pub const SUPPORTED_FORMATS: &[&str] = &["html", "pdf", "docx", "txt", "md"];

const DEFAULT_TITLE: &str = "Untitled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Html,
    Pdf,
    Docx,
    Text,
    Markdown,
}

impl ExportFormat {
    pub fn parse(format: &str) -> Option<Self> {
        match format.trim().to_ascii_lowercase().as_str() {
            "html" => Some(Self::Html),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::Text),
            "md" => Some(Self::Markdown),
            _ => None,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Html => MIME_HTML,
            Self::Pdf => MIME_PDF,
            Self::Docx => MIME_DOCX,
            Self::Text => MIME_TEXT,
            Self::Markdown => MIME_MARKDOWN,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Text => "txt",
            Self::Markdown => "md",
        }
    }
}

pub fn is_format_supported(format: &str) -> bool {
    ExportFormat::parse(format).is_some()
}

pub fn supported_formats() -> &'static [&'static str] {
    SUPPORTED_FORMATS
}

/// Renders markdown into every export format.
#[derive(Clone)]
pub struct FormatExporter {
    renderer: Arc<dyn PdfRenderer>,
}

impl FormatExporter {
    pub fn new(config: &ExportConfig) -> Self {
        Self::with_renderer(Arc::new(ChromiumRenderer::new(config)))
    }

    pub fn with_renderer(renderer: Arc<dyn PdfRenderer>) -> Self {
        Self { renderer }
    }

    pub async fn export_document(
        &self,
        markdown: &str,
        format: &str,
        title: Option<&str>,
    ) -> Result<ExportResult, ConvertError> {
        let format = ExportFormat::parse(format)
            .ok_or_else(|| ConvertError::UnsupportedExportFormat(format.to_string()))?;
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TITLE);

        let buffer = match format {
            ExportFormat::Html => html::render_page(markdown, title, None).into_bytes(),
            ExportFormat::Pdf => {
                let page = html::render_page(markdown, title, Some(html::PRINT_STYLESHEET));
                self.renderer.render(&page).await?
            }
            ExportFormat::Docx => {
                let markdown = markdown.to_string();
                let title = title.to_string();
                tokio::task::spawn_blocking(move || docx::markdown_to_docx(&markdown, &title))
                    .await
                    .map_err(|e| ConvertError::conversion("docx", e))??
            }
            ExportFormat::Text => text::markdown_to_text(markdown).into_bytes(),
            ExportFormat::Markdown => markdown.as_bytes().to_vec(),
        };

        debug!(
            format = format.extension(),
            bytes = buffer.len(),
            "Exported document"
        );

        Ok(ExportResult {
            buffer,
            mime_type: format.mime_type(),
            extension: format.extension(),
        })
    }
}
