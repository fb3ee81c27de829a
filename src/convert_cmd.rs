//! `mds import` and `mds export`.
//!
//! Import writes localized images into the configured database so the
//! `/api/images/{id}` references in the output resolve once `mds serve` runs.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::export::{is_format_supported, supported_formats, FormatExporter};
use crate::frontmatter::split_frontmatter;
use crate::import::upload::localize_imported;
use crate::import::{is_supported, supported_extensions, FormatImporter};
use crate::localize::ImageLocalizer;
use crate::migrate;
use crate::normalize::extract_title;
use crate::store::SqliteStore;

pub async fn run_import(config: &Config, file: &Path, out: Option<PathBuf>) -> Result<()> {
    if !is_supported(&file.to_string_lossy()) {
        bail!(
            "unsupported file type: {} (supported: {})",
            file.display(),
            supported_extensions().join(", ")
        );
    }

    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let localizer = ImageLocalizer::new(store, &config.images)?;

    let importer = FormatImporter::new(config.epub.clone());
    let imported = importer
        .convert_to_markdown(file, None)
        .await
        .with_context(|| format!("Failed to import {}", file.display()))?;

    let document_id = uuid::Uuid::new_v4().to_string();
    let outcome = localize_imported(&localizer, imported, &document_id).await;
    pool.close().await;

    match out {
        Some(out) => {
            write_output(&out, outcome.markdown.as_bytes()).await?;
            println!("Imported {} → {}", file.display(), out.display());
            println!("  images localized: {}", outcome.images.len());
            if let Some(title) = outcome.metadata.as_ref().and_then(|m| m.title.as_deref()) {
                println!("  title: {}", title);
            }
        }
        None => println!("{}", outcome.markdown),
    }

    Ok(())
}

pub async fn run_export(
    config: &Config,
    file: &Path,
    format: &str,
    title: Option<String>,
    out: Option<PathBuf>,
) -> Result<()> {
    if !is_format_supported(format) {
        bail!(
            "unsupported export format: {} (supported: {})",
            format,
            supported_formats().join(", ")
        );
    }

    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let parsed = split_frontmatter(&raw)?;
    let title = title.unwrap_or_else(|| extract_title(&parsed.content, &parsed.data));

    let exporter = FormatExporter::new(&config.export);
    let result = exporter
        .export_document(&parsed.content, format, Some(&title))
        .await?;

    let out = out.unwrap_or_else(|| file.with_extension(result.extension));
    if out == file {
        bail!("refusing to overwrite the source file: {}", file.display());
    }
    write_output(&out, &result.buffer).await?;

    println!(
        "Exported {} → {} ({}, {} bytes)",
        file.display(),
        out.display(),
        result.mime_type,
        result.buffer.len()
    );
    Ok(())
}

async fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
