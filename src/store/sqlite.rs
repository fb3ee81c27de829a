//! SQLite-backed [`DocumentStore`] and [`ImageRepository`].
//!
//! Documents live in `documents` with a mirrored FTS5 row in `documents_fts`;
//! both are rewritten in one transaction per upsert. Images are keyed by the
//! SHA-256 of their bytes, so storing the same image twice is a no-op apart
//! from recording the additional owner.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{content_id, DocumentStore, ImageBlob, ImageRepository, StoredImage};
use crate::models::{Document, SearchHit};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const DOCUMENT_COLUMNS: &str = "path, title, content, raw_content, frontmatter_json, tags_json, \
     topics_json, content_type, word_count, created_at, modified_at";

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let frontmatter_json: String = row.get("frontmatter_json");
    let tags_json: String = row.get("tags_json");
    let topics_json: String = row.get("topics_json");
    let word_count: i64 = row.get("word_count");

    let frontmatter: Map<String, Value> = serde_json::from_str(&frontmatter_json)?;

    Ok(Document {
        path: row.get("path"),
        title: row.get("title"),
        content: row.get("content"),
        raw_content: row.get("raw_content"),
        frontmatter,
        tags: serde_json::from_str(&tags_json)?,
        topics: serde_json::from_str(&topics_json)?,
        content_type: row.get("content_type"),
        word_count: word_count.max(0) as usize,
        created_at: row.get("created_at"),
        modified_at: row.get("modified_at"),
    })
}

/// Quotes every whitespace-separated term so user input can never be
/// parsed as FTS5 query syntax. Terms are implicitly AND-ed.
pub fn fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        let frontmatter_json = serde_json::to_string(&doc.frontmatter)?;
        let tags_json = serde_json::to_string(&doc.tags)?;
        let topics_json = serde_json::to_string(&doc.topics)?;
        let now = chrono::Utc::now().timestamp_millis();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (path, title, content, raw_content, frontmatter_json,
                                   tags_json, topics_json, content_type, word_count,
                                   created_at, modified_at, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                raw_content = excluded.raw_content,
                frontmatter_json = excluded.frontmatter_json,
                tags_json = excluded.tags_json,
                topics_json = excluded.topics_json,
                content_type = excluded.content_type,
                word_count = excluded.word_count,
                created_at = excluded.created_at,
                modified_at = excluded.modified_at,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&doc.path)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.raw_content)
        .bind(&frontmatter_json)
        .bind(&tags_json)
        .bind(&topics_json)
        .bind(&doc.content_type)
        .bind(doc.word_count as i64)
        .bind(doc.created_at)
        .bind(doc.modified_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM documents_fts WHERE path = ?")
            .bind(&doc.path)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO documents_fts (path, title, content, tags) VALUES (?, ?, ?, ?)")
            .bind(&doc.path)
            .bind(&doc.title)
            .bind(&doc.content)
            .bind(doc.tags.join(" "))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_document(&self, path: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM documents_fts WHERE path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM documents WHERE path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_document(&self, path: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE path = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents ORDER BY modified_at DESC, path ASC",
            DOCUMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }

    async fn search(&self, query: &str, limit: i64) -> Result<Vec<SearchHit>> {
        let match_expr = fts_query(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT d.path, d.title, d.tags_json, d.modified_at, f.rank,
                   snippet(documents_fts, 2, '>>>', '<<<', '...', 24) AS snippet
            FROM documents_fts f
            JOIN documents d ON d.path = f.path
            WHERE documents_fts MATCH ?
            ORDER BY f.rank
            LIMIT ?
            "#,
        )
        .bind(&match_expr)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                let tags_json: String = row.get("tags_json");
                Ok(SearchHit {
                    path: row.get("path"),
                    title: row.get("title"),
                    snippet: row.get("snippet"),
                    score: -rank, // negate so higher = better
                    tags: serde_json::from_str(&tags_json)?,
                    modified_at: row.get("modified_at"),
                })
            })
            .collect()
    }
}

#[async_trait]
impl ImageRepository for SqliteStore {
    async fn store_image(
        &self,
        data: &[u8],
        filename: &str,
        mime_type: &str,
        document_id: &str,
    ) -> Result<StoredImage> {
        let id = content_id(data);
        let now = chrono::Utc::now().timestamp_millis();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO images (id, filename, mime_type, size, data, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(filename)
        .bind(mime_type)
        .bind(data.len() as i64)
        .bind(data)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO image_owners (image_id, document_id) VALUES (?, ?)")
            .bind(&id)
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(StoredImage { image_id: id })
    }

    async fn get_image(&self, id: &str) -> Result<Option<ImageBlob>> {
        let row = sqlx::query("SELECT id, filename, mime_type, data FROM images WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| ImageBlob {
            id: row.get("id"),
            filename: row.get("filename"),
            mime_type: row.get("mime_type"),
            data: row.get("data"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("test.sqlite"))
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn doc(path: &str, title: &str, content: &str) -> Document {
        Document {
            path: path.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            raw_content: content.to_string(),
            frontmatter: serde_json::json!({ "author": "me" })
                .as_object()
                .cloned()
                .unwrap(),
            tags: vec!["notes".to_string()],
            topics: vec!["kernel".to_string()],
            content_type: "markdown".to_string(),
            word_count: 3,
            created_at: 1_000,
            modified_at: 2_000,
        }
    }

    #[test]
    fn fts_query_quotes_terms() {
        assert_eq!(fts_query(r#"rust "async" OR"#), r#""rust" """async""" "OR""#);
        assert_eq!(fts_query("   "), "");
    }

    #[tokio::test]
    async fn round_trips_documents() {
        let (_tmp, store) = store().await;
        let original = doc("notes/a.md", "Alpha", "kernel scheduling notes");
        store.upsert_document(&original).await.unwrap();
        let loaded = store.get_document("notes/a.md").await.unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn upsert_replaces_fts_row() {
        let (_tmp, store) = store().await;
        store
            .upsert_document(&doc("a.md", "Alpha", "first version"))
            .await
            .unwrap();
        store
            .upsert_document(&doc("a.md", "Alpha", "second version"))
            .await
            .unwrap();

        assert!(store.search("first", 10).await.unwrap().is_empty());
        let hits = store.search("second", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "a.md");
        assert_eq!(store.list_documents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_from_search() {
        let (_tmp, store) = store().await;
        store
            .upsert_document(&doc("a.md", "Alpha", "ephemeral text"))
            .await
            .unwrap();
        assert!(store.delete_document("a.md").await.unwrap());
        assert!(store.search("ephemeral", 10).await.unwrap().is_empty());
        assert!(store.get_document("a.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn images_are_content_addressed() {
        let (_tmp, store) = store().await;
        let a = store
            .store_image(b"\x89PNG", "a.png", "image/png", "doc1")
            .await
            .unwrap();
        let b = store
            .store_image(b"\x89PNG", "copy.png", "image/png", "doc2")
            .await
            .unwrap();
        assert_eq!(a, b);

        let blob = store.get_image(&a.image_id).await.unwrap().unwrap();
        assert_eq!(blob.filename, "a.png");
        assert_eq!(blob.data, b"\x89PNG");
    }
}
