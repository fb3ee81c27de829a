//! Document retrieval by path, for `mds get`.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::models::Document;
use crate::search::format_ts_iso;
use crate::store::{DocumentStore, SqliteStore};

pub async fn get_document(config: &Config, path: &str) -> Result<Document> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let doc = store.get_document(path).await;
    pool.close().await;

    match doc? {
        Some(doc) => Ok(doc),
        None => bail!("document not found: {}", path),
    }
}

pub async fn run_get(config: &Config, path: &str) -> Result<()> {
    let doc = get_document(config, path).await?;

    println!("--- Document ---");
    println!("path:         {}", doc.path);
    println!("title:        {}", doc.title);
    println!("created_at:   {}", format_ts_iso(doc.created_at));
    println!("modified_at:  {}", format_ts_iso(doc.modified_at));
    println!("content_type: {}", doc.content_type);
    println!("word_count:   {}", doc.word_count);
    println!("tags:         {}", doc.tags.join(", "));
    println!("topics:       {}", doc.topics.join(", "));
    if !doc.frontmatter.is_empty() {
        println!(
            "frontmatter:  {}",
            serde_json::Value::Object(doc.frontmatter.clone())
        );
    }
    println!();

    println!("--- Body ---");
    println!("{}", doc.raw_content);

    Ok(())
}
