//! Core data models used throughout Markdown Studio.
//!
//! These types represent the indexed documents, import/export results, and
//! search hits that flow between the indexer, the converters, and the store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Content type recorded for every file produced by the indexer.
pub const CONTENT_TYPE_MARKDOWN: &str = "markdown";

/// Indexed markdown document, keyed by its path relative to the watch root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub path: String,
    pub title: String,
    /// Plain text with all markup stripped, used for search.
    pub content: String,
    /// Markdown body with the frontmatter removed.
    pub raw_content: String,
    pub frontmatter: Map<String, Value>,
    pub tags: Vec<String>,
    pub topics: Vec<String>,
    pub content_type: String,
    pub word_count: usize,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Milliseconds since the Unix epoch.
    pub modified_at: i64,
}

/// Raw image bytes pulled out of an imported container (EPUB).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedImage {
    pub id: String,
    pub href: String,
    pub media_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// Bibliographic metadata read from an EPUB package document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BookMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
}

impl BookMetadata {
    pub fn is_empty(&self) -> bool {
        self == &BookMetadata::default()
    }
}

/// Result of converting a foreign file into markdown. Not persisted.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedDocument {
    pub markdown: String,
    pub embedded_images: Vec<EmbeddedImage>,
    pub metadata: Option<BookMetadata>,
}

impl ImportedDocument {
    pub fn markdown(markdown: String) -> Self {
        Self {
            markdown,
            ..Default::default()
        }
    }
}

/// A markdown image reference that was rewritten to point at the image store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedImage {
    pub image_id: String,
    pub original_src: String,
    pub original_name: String,
    pub new_reference: String,
}

/// A fully rendered export.
#[derive(Debug, Clone)]
pub struct ExportResult {
    pub buffer: Vec<u8>,
    pub mime_type: &'static str,
    pub extension: &'static str,
}

/// A search result returned from the document store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub path: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
    pub tags: Vec<String>,
    pub modified_at: i64,
}
