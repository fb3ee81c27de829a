//! `mds index` and `mds watch`.

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::indexer::FileIndexer;
use crate::migrate;
use crate::store::SqliteStore;

async fn open_indexer(config: &Config) -> Result<FileIndexer> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));
    FileIndexer::new(&config.watch, config.topics.clone(), store)
}

/// One full scan of the watch root.
pub async fn run_index(config: &Config) -> Result<()> {
    let indexer = open_indexer(config).await?;
    let report = indexer.index_existing_files().await?;

    println!("Index complete: {}", indexer.root().display());
    println!("  indexed: {}", report.indexed);
    println!("  failed:  {}", report.failed);
    Ok(())
}

/// Scans, then keeps the library in sync until Ctrl-C.
pub async fn run_watch(config: &Config) -> Result<()> {
    let indexer = open_indexer(config).await?;
    let report = indexer.start().await?;

    println!(
        "Watching {} ({} indexed, {} failed). Press Ctrl-C to stop.",
        indexer.root().display(),
        report.indexed,
        report.failed
    );

    tokio::signal::ctrl_c().await?;
    indexer.stop().await;
    println!("Stopped.");
    Ok(())
}
