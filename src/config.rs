use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub watch: WatchConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub epub: EpubConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

/// How long the TF-IDF corpus behind topic extraction lives.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CorpusScope {
    /// A fresh corpus for every document.
    Document,
    /// Reset at the start of each full scan.
    #[default]
    Run,
    /// Never reset for the life of the process.
    Cumulative,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TopicsConfig {
    #[serde(default)]
    pub scope: CorpusScope,
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_min_term_len")]
    pub min_term_len: usize,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            scope: CorpusScope::default(),
            max_documents: default_max_documents(),
            top_n: default_top_n(),
            min_score: default_min_score(),
            min_term_len: default_min_term_len(),
        }
    }
}

fn default_max_documents() -> usize {
    10_000
}
fn default_top_n() -> usize {
    5
}
fn default_min_score() -> f64 {
    0.5
}
fn default_min_term_len() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImagesConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Largest remote image that will be downloaded.
    #[serde(default = "default_image_max_bytes")]
    pub max_bytes: usize,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
            max_bytes: default_image_max_bytes(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_image_max_bytes() -> usize {
    20 * 1024 * 1024
}
fn default_user_agent() -> String {
    format!(
        "markdown-studio/{} (image localizer; +https://github.com/markdown-studio)",
        env!("CARGO_PKG_VERSION")
    )
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_upload_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
            max_bytes: default_max_bytes(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    std::env::temp_dir()
}
fn default_max_bytes() -> usize {
    50 * 1024 * 1024
}
fn default_allowed_extensions() -> Vec<String> {
    crate::import::SUPPORTED_EXTENSIONS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EpubConfig {
    #[serde(default = "default_epub_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_true")]
    pub include_metadata: bool,
}

impl Default for EpubConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_epub_concurrency(),
            include_metadata: true,
        }
    }
}

fn default_epub_concurrency() -> usize {
    4
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_browser_path")]
    pub browser_path: PathBuf,
    #[serde(default = "default_render_timeout")]
    pub render_timeout_secs: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            browser_path: default_browser_path(),
            render_timeout_secs: default_render_timeout(),
        }
    }
}

fn default_browser_path() -> PathBuf {
    PathBuf::from("chromium")
}
fn default_render_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.watch.include_globs.is_empty() {
        anyhow::bail!("watch.include_globs must not be empty");
    }

    if config.topics.max_documents == 0 {
        anyhow::bail!("topics.max_documents must be > 0");
    }

    if config.images.fetch_timeout_secs == 0 {
        anyhow::bail!("images.fetch_timeout_secs must be > 0");
    }

    if config.images.max_bytes == 0 {
        anyhow::bail!("images.max_bytes must be > 0");
    }

    if config.upload.max_bytes == 0 {
        anyhow::bail!("upload.max_bytes must be > 0");
    }

    if config.epub.max_concurrency == 0 {
        anyhow::bail!("epub.max_concurrency must be >= 1");
    }

    if config.export.render_timeout_secs == 0 {
        anyhow::bail!("export.render_timeout_secs must be > 0");
    }

    for ext in &config.upload.allowed_extensions {
        if !crate::import::is_supported(&format!("file.{}", ext)) {
            anyhow::bail!(
                "upload.allowed_extensions contains '{}', which has no importer",
                ext
            );
        }
    }

    Ok(())
}
