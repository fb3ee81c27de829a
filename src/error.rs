//! Error taxonomy for the conversion and indexing layers.
//!
//! Conversion errors propagate to the caller as a single failure per request.
//! Indexing and image-localization failures are recovered where they occur
//! and only reach the logs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    /// Unrecognized file extension on import.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Unrecognized format name on export.
    #[error("unsupported export format: {0}")]
    UnsupportedExportFormat(String),

    /// Upload rejected before conversion.
    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    /// A format-specific parse or transform failure.
    #[error("{format} conversion failed: {message}")]
    Conversion {
        format: &'static str,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    pub fn conversion(format: &'static str, err: impl std::fmt::Display) -> Self {
        ConvertError::Conversion {
            format,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("indexer is already running")]
    AlreadyRunning,

    #[error("watch root does not exist: {0}")]
    MissingRoot(String),

    #[error("file watch failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("initial scan failed: {0:#}")]
    Scan(anyhow::Error),
}
