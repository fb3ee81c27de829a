//! Upload entrypoint: validate, stage to a temp file, convert, localize.
//!
//! The staged file lives in [`UploadPolicy::dir`] only for the duration of
//! the conversion. It is removed on every exit path; a failed removal is
//! logged and never replaces the conversion result or error.

use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{extension_of, FormatImporter};
use crate::config::UploadConfig;
use crate::error::ConvertError;
use crate::localize::ImageLocalizer;
use crate::models::{BookMetadata, ImportedDocument, LocalizedImage};

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub dir: PathBuf,
    pub max_bytes: usize,
    pub allowed_extensions: Vec<String>,
}

impl From<&UploadConfig> for UploadPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            max_bytes: config.max_bytes,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }
}

impl UploadPolicy {
    /// Returns the lowercased extension when the upload is acceptable.
    pub fn validate(&self, filename: &str, size: usize) -> Result<String, ConvertError> {
        if size > self.max_bytes {
            return Err(ConvertError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        match extension_of(filename) {
            Some(ext) if self.allowed_extensions.contains(&ext) => Ok(ext),
            Some(ext) => Err(ConvertError::UnsupportedFormat(ext)),
            None => Err(ConvertError::UnsupportedFormat(filename.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub markdown: String,
    pub images: Vec<LocalizedImage>,
    pub metadata: Option<BookMetadata>,
}

/// Removes the staged file when dropped.
struct StagedUpload {
    file: Option<NamedTempFile>,
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let path = file.path().to_path_buf();
            match file.close() {
                Ok(()) => debug!(path = %path.display(), "Removed staged upload"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staged upload"),
            }
        }
    }
}

pub async fn import_upload(
    policy: &UploadPolicy,
    converter: &FormatImporter,
    localizer: &ImageLocalizer,
    filename: &str,
    bytes: &[u8],
    document_id: &str,
) -> Result<ImportOutcome, ConvertError> {
    let ext = policy.validate(filename, bytes.len())?;

    tokio::fs::create_dir_all(&policy.dir).await?;
    let mut file = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&format!(".{}", ext))
        .tempfile_in(&policy.dir)?;
    file.write_all(bytes)?;
    file.flush()?;
    let path = file.path().to_path_buf();
    let staged = StagedUpload { file: Some(file) };

    let imported = converter.convert_to_markdown(&path, None).await;
    drop(staged);
    let imported = imported?;

    let outcome = localize_imported(localizer, imported, document_id).await;
    info!(
        filename,
        document_id,
        bytes = bytes.len(),
        images = outcome.images.len(),
        "Imported upload"
    );
    Ok(outcome)
}

/// Stores embedded images first, then inline and remote references.
pub async fn localize_imported(
    localizer: &ImageLocalizer,
    imported: ImportedDocument,
    document_id: &str,
) -> ImportOutcome {
    let embedded = localizer
        .localize_embedded(&imported.markdown, &imported.embedded_images, document_id)
        .await;
    let localized = localizer.localize_images(&embedded.markdown, document_id).await;

    let mut images = embedded.images;
    images.extend(localized.images);

    ImportOutcome {
        markdown: localized.markdown,
        images,
        metadata: imported.metadata,
    }
}
