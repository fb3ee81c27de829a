//! Storage abstraction for Markdown Studio.
//!
//! The indexer and the image localizer only compute records; persisting
//! them is delegated to the traits defined here so that the SQLite backend
//! and the in-memory test backend are interchangeable.
//!
//! | Trait | Method | Purpose |
//! |-------|--------|---------|
//! | [`DocumentStore`] | [`upsert_document`](DocumentStore::upsert_document) | Insert or replace a document by path |
//! | | [`delete_document`](DocumentStore::delete_document) | Remove a document by path |
//! | | [`get_document`](DocumentStore::get_document) | Fetch one document |
//! | | [`list_documents`](DocumentStore::list_documents) | All documents, newest first |
//! | | [`search`](DocumentStore::search) | Native full-text search |
//! | [`ImageRepository`] | [`store_image`](ImageRepository::store_image) | Content-addressed image write |
//! | | [`get_image`](ImageRepository::get_image) | Image bytes by id |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::models::{Document, SearchHit};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the document keyed by `doc.path`.
    async fn upsert_document(&self, doc: &Document) -> Result<()>;

    /// Remove the document at `path`. Returns whether a record existed.
    async fn delete_document(&self, path: &str) -> Result<bool>;

    async fn get_document(&self, path: &str) -> Result<Option<Document>>;

    async fn list_documents(&self) -> Result<Vec<Document>>;

    async fn search(&self, query: &str, limit: i64) -> Result<Vec<SearchHit>>;
}

/// Identifier returned by [`ImageRepository::store_image`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub image_id: String,
}

/// Image bytes and their declared type, as read back from the repository.
#[derive(Debug, Clone)]
pub struct ImageBlob {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait ImageRepository: Send + Sync {
    async fn store_image(
        &self,
        data: &[u8],
        filename: &str,
        mime_type: &str,
        document_id: &str,
    ) -> Result<StoredImage>;

    async fn get_image(&self, id: &str) -> Result<Option<ImageBlob>>;
}

/// Content address used by the bundled image repositories.
pub fn content_id(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_id_is_stable_sha256() {
        assert_eq!(
            content_id(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
