//! Full-text search over the indexed library.
//!
//! Backs the `mds search` command; the HTTP server calls the store directly.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::models::SearchHit;
use crate::store::{DocumentStore, SqliteStore};

pub const DEFAULT_LIMIT: i64 = 10;

/// Opens the configured database and runs one query.
pub async fn search_documents(config: &Config, query: &str, limit: i64) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let hits = store.search(query, limit.max(1)).await;
    pool.close().await;
    hits
}

pub async fn run_search(config: &Config, query: &str, limit: Option<i64>) -> Result<()> {
    let hits = search_documents(config, query, limit.unwrap_or(DEFAULT_LIMIT)).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, hit.score, hit.title);
        println!("    path: {}", hit.path);
        println!("    modified: {}", format_ts_iso(hit.modified_at));
        if !hit.tags.is_empty() {
            println!("    tags: {}", hit.tags.join(", "));
        }
        println!(
            "    excerpt: \"{}\"",
            hit.snippet.replace('\n', " ").trim()
        );
        println!();
    }

    Ok(())
}

/// Millisecond timestamp → `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_ts_iso(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ms.to_string())
}
