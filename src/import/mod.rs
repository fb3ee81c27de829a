//! Multi-format import: HTML, plain text, PDF, DOCX and EPUB → markdown.
//!
//! Format detection is by file extension, falling back to the MIME type the
//! caller supplies. Parsing of binary containers runs on the blocking pool.
//!
//! | Extension | Handler |
//! |-----------|---------|
//! | `md`, `markdown` | passthrough |
//! | `html`, `htm` | [`html::html_to_markdown`] |
//! | `txt` | [`text_to_markdown`] |
//! | `pdf` | [`pdf::pdf_to_markdown`] |
//! | `docx` | [`docx::docx_to_markdown`] |
//! | `epub` | [`epub::epub_to_markdown`] |

pub mod docx;
pub mod epub;
pub mod html;
pub mod pdf;
pub mod upload;

use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{Read, Seek};
use std::path::Path;

use crate::config::EpubConfig;
use crate::error::ConvertError;
use crate::models::ImportedDocument;
use html::HtmlToMarkdownOptions;

pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["md", "markdown", "html", "htm", "txt", "pdf", "docx", "epub"];

pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_HTML: &str = "text/html";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_EPUB: &str = "application/epub+zip";

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_ZIP_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

static BLANK_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Markdown,
    Html,
    Text,
    Pdf,
    Docx,
    Epub,
}

impl ImportFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Some(Self::Markdown),
            "html" | "htm" => Some(Self::Html),
            "txt" => Some(Self::Text),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "epub" => Some(Self::Epub),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or(mime).trim();
        match essence.to_ascii_lowercase().as_str() {
            MIME_MARKDOWN | "text/x-markdown" => Some(Self::Markdown),
            MIME_HTML | "application/xhtml+xml" => Some(Self::Html),
            MIME_TEXT => Some(Self::Text),
            MIME_PDF => Some(Self::Pdf),
            MIME_DOCX => Some(Self::Docx),
            MIME_EPUB => Some(Self::Epub),
            _ => None,
        }
    }

    /// Extension first, then MIME type.
    pub fn detect(filename: &str, mime_type: Option<&str>) -> Option<Self> {
        extension_of(filename)
            .and_then(|ext| Self::from_extension(&ext))
            .or_else(|| mime_type.and_then(Self::from_mime))
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Html => "html",
            Self::Text => "txt",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Epub => "epub",
        }
    }
}

/// Lowercased extension of `filename`, if any.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_supported(filename: &str) -> bool {
    extension_of(filename).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

pub fn supported_extensions() -> &'static [&'static str] {
    SUPPORTED_EXTENSIONS
}

/// Converts foreign documents into markdown.
#[derive(Debug, Clone, Default)]
pub struct FormatImporter {
    epub: EpubConfig,
    html: HtmlToMarkdownOptions,
}

impl FormatImporter {
    pub fn new(epub: EpubConfig) -> Self {
        Self {
            epub,
            html: HtmlToMarkdownOptions::default(),
        }
    }

    pub fn with_html_options(mut self, html: HtmlToMarkdownOptions) -> Self {
        self.html = html;
        self
    }

    pub async fn convert_to_markdown(
        &self,
        path: &Path,
        mime_type: Option<&str>,
    ) -> Result<ImportedDocument, ConvertError> {
        let filename = path.to_string_lossy();
        let format = ImportFormat::detect(&filename, mime_type).ok_or_else(|| {
            ConvertError::UnsupportedFormat(
                extension_of(&filename)
                    .or_else(|| mime_type.map(str::to_string))
                    .unwrap_or_else(|| filename.to_string()),
            )
        })?;

        let bytes = tokio::fs::read(path).await?;
        self.convert_bytes(format, bytes).await
    }

    pub async fn convert_bytes(
        &self,
        format: ImportFormat,
        bytes: Vec<u8>,
    ) -> Result<ImportedDocument, ConvertError> {
        match format {
            ImportFormat::Markdown => Ok(ImportedDocument::markdown(utf8(format, bytes)?)),
            ImportFormat::Text => Ok(ImportedDocument::markdown(text_to_markdown(&utf8(
                format, bytes,
            )?))),
            ImportFormat::Html => {
                let html = String::from_utf8_lossy(&bytes);
                Ok(ImportedDocument::markdown(html::html_to_markdown(
                    &html, &self.html,
                )))
            }
            ImportFormat::Pdf => {
                let markdown = blocking(format, move || pdf::pdf_to_markdown(&bytes)).await?;
                Ok(ImportedDocument::markdown(markdown))
            }
            ImportFormat::Docx => {
                let options = self.html.clone();
                let converted =
                    blocking(format, move || docx::docx_to_markdown(&bytes, &options)).await?;
                Ok(ImportedDocument::markdown(converted.markdown))
            }
            ImportFormat::Epub => epub::epub_to_markdown(bytes, &self.epub, &self.html).await,
        }
    }
}

/// Paragraphs split on blank lines, trimmed, empties dropped.
pub fn text_to_markdown(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    BLANK_LINE_RE
        .split(&normalized)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn utf8(format: ImportFormat, bytes: Vec<u8>) -> Result<String, ConvertError> {
    String::from_utf8(bytes).map_err(|e| ConvertError::conversion(format.label(), e))
}

async fn blocking<T, F>(format: ImportFormat, f: F) -> Result<T, ConvertError>
where
    F: FnOnce() -> Result<T, ConvertError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ConvertError::conversion(format.label(), e))?
}

/// Reads one ZIP entry, refusing entries that decompress past the size limit.
pub(crate) fn read_zip_entry<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
    format: &'static str,
) -> Result<Vec<u8>, ConvertError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ConvertError::conversion(format, format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_ZIP_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ConvertError::conversion(format, e))?;
    if out.len() as u64 >= MAX_ZIP_ENTRY_BYTES {
        return Err(ConvertError::conversion(
            format,
            format!("ZIP entry {} exceeds size limit ({} bytes)", name, MAX_ZIP_ENTRY_BYTES),
        ));
    }
    Ok(out)
}
