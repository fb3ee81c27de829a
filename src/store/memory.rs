//! In-memory store for tests and dry runs.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. A poisoned lock is recovered,
//! since every write leaves the maps consistent. Search is a case-insensitive
//! substring match over title, content, and tags.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use super::{content_id, DocumentStore, ImageBlob, ImageRepository, StoredImage};
use crate::models::{Document, SearchHit};

/// Length of the snippet returned by [`InMemoryStore::search`].
const SNIPPET_CHARS: usize = 160;

#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    images: RwLock<HashMap<String, (ImageBlob, Vec<String>)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document_count(&self) -> usize {
        self.docs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn image_count(&self) -> usize {
        self.images.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Documents that referenced the image with `id`, in store order.
    pub fn image_owners(&self, id: &str) -> Vec<String> {
        self.images
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|(_, owners)| owners.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        self.docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(doc.path.clone(), doc.clone());
        Ok(())
    }

    async fn delete_document(&self, path: &str) -> Result<bool> {
        Ok(self
            .docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .is_some())
    }

    async fn get_document(&self, path: &str) -> Result<Option<Document>> {
        Ok(self
            .docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .docs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        docs.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(docs)
    }

    async fn search(&self, query: &str, limit: i64) -> Result<Vec<SearchHit>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        let mut hits: Vec<SearchHit> = docs
            .values()
            .filter_map(|doc| {
                let title_hit = doc.title.to_lowercase().contains(&needle);
                let content = doc.content.to_lowercase();
                let content_hits = content.matches(&needle).count();
                let tag_hit = doc.tags.iter().any(|t| t.contains(&needle));
                if !title_hit && content_hits == 0 && !tag_hit {
                    return None;
                }
                let score = content_hits as f64
                    + if title_hit { 2.0 } else { 0.0 }
                    + if tag_hit { 1.0 } else { 0.0 };
                Some(SearchHit {
                    path: doc.path.clone(),
                    title: doc.title.clone(),
                    snippet: doc.content.chars().take(SNIPPET_CHARS).collect(),
                    score,
                    tags: doc.tags.clone(),
                    modified_at: doc.modified_at,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
        });
        hits.truncate(limit.max(0) as usize);
        Ok(hits)
    }
}

#[async_trait]
impl ImageRepository for InMemoryStore {
    async fn store_image(
        &self,
        data: &[u8],
        filename: &str,
        mime_type: &str,
        document_id: &str,
    ) -> Result<StoredImage> {
        let id = content_id(data);
        let mut images = self.images.write().unwrap_or_else(PoisonError::into_inner);
        let entry = images.entry(id.clone()).or_insert_with(|| {
            (
                ImageBlob {
                    id: id.clone(),
                    filename: filename.to_string(),
                    mime_type: mime_type.to_string(),
                    data: data.to_vec(),
                },
                Vec::new(),
            )
        });
        if !entry.1.iter().any(|owner| owner == document_id) {
            entry.1.push(document_id.to_string());
        }
        Ok(StoredImage { image_id: id })
    }

    async fn get_image(&self, id: &str) -> Result<Option<ImageBlob>> {
        Ok(self
            .images
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|(blob, _)| blob.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn doc(path: &str, title: &str, content: &str, modified_at: i64) -> Document {
        Document {
            path: path.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            raw_content: content.to_string(),
            frontmatter: Map::new(),
            tags: vec![],
            topics: vec![],
            content_type: "markdown".to_string(),
            word_count: 0,
            created_at: 0,
            modified_at,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_path() {
        let store = InMemoryStore::new();
        store.upsert_document(&doc("a.md", "One", "x", 1)).await.unwrap();
        store.upsert_document(&doc("a.md", "Two", "y", 2)).await.unwrap();
        assert_eq!(store.document_count(), 1);
        let got = store.get_document("a.md").await.unwrap().unwrap();
        assert_eq!(got.title, "Two");
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = InMemoryStore::new();
        store.upsert_document(&doc("a.md", "One", "x", 1)).await.unwrap();
        assert!(store.delete_document("a.md").await.unwrap());
        assert!(!store.delete_document("a.md").await.unwrap());
    }

    #[tokio::test]
    async fn search_ranks_title_matches_higher() {
        let store = InMemoryStore::new();
        store
            .upsert_document(&doc("a.md", "Rust notes", "about borrowing", 1))
            .await
            .unwrap();
        store
            .upsert_document(&doc("b.md", "Misc", "a rust mention", 2))
            .await
            .unwrap();
        let hits = store.search("rust", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "a.md");
    }

    #[tokio::test]
    async fn identical_images_share_an_id() {
        let store = InMemoryStore::new();
        let a = store.store_image(b"png", "a.png", "image/png", "d1").await.unwrap();
        let b = store.store_image(b"png", "b.png", "image/png", "d2").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.image_count(), 1);
        assert_eq!(store.image_owners(&a.image_id), vec!["d1", "d2"]);
    }

    #[tokio::test]
    async fn poisoned_store_keeps_serving() {
        let store = std::sync::Arc::new(InMemoryStore::new());
        store.upsert_document(&doc("a.md", "One", "x", 1)).await.unwrap();

        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _docs = poisoner.docs.write().unwrap();
            panic!("poisoning the document map");
        })
        .join();
        assert!(store.docs.is_poisoned());

        assert_eq!(store.document_count(), 1);
        store.upsert_document(&doc("b.md", "Two", "y", 2)).await.unwrap();
        assert_eq!(store.list_documents().await.unwrap().len(), 2);
    }
}
