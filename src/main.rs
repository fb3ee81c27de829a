//! # Markdown Studio CLI (`mds`)
//!
//! ## Usage
//!
//! ```bash
//! mds --config ./config/mds.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mds init` | Create the SQLite database and run schema migrations |
//! | `mds index` | Scan the watch root once and index every markdown file |
//! | `mds watch` | Scan, then keep the index in sync with the filesystem |
//! | `mds search "<query>"` | Full-text search over indexed documents |
//! | `mds get <path>` | Show one indexed document |
//! | `mds import <file>` | Convert html/txt/pdf/docx/epub to markdown |
//! | `mds export <file> --format <fmt>` | Render markdown as html/pdf/docx/txt/md |
//! | `mds serve` | Start the HTTP API |
//!
//! Logs go to stderr and honour `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use markdown_studio::{config, convert_cmd, get, index_cmd, migrate, search, server};

/// Markdown Studio: a local-first markdown library with import/export
/// converters, a file-watching indexer and full-text search.
#[derive(Parser)]
#[command(
    name = "mds",
    about = "Markdown Studio: index, search, import and export markdown",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mds.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Index every matching file under the watch root once.
    Index,

    /// Index, then follow filesystem changes until Ctrl-C.
    Watch,

    /// Search indexed documents.
    Search {
        /// Search query text.
        query: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Show a document by its path relative to the watch root.
    Get {
        path: String,
    },

    /// Convert a foreign document to markdown.
    ///
    /// Images are stored in the database and referenced as
    /// `/api/images/{id}`. Prints the markdown unless `--out` is given.
    Import {
        file: PathBuf,

        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Export a markdown file to another format.
    Export {
        file: PathBuf,

        /// One of: html, pdf, docx, txt, md.
        #[arg(long)]
        format: String,

        /// Document title; defaults to the frontmatter title or first heading.
        #[arg(long)]
        title: Option<String>,

        /// Output path; defaults to the input path with the format's extension.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve {
        /// Also run the file watcher.
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index => {
            index_cmd::run_index(&cfg).await?;
        }
        Commands::Watch => {
            index_cmd::run_watch(&cfg).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Get { path } => {
            get::run_get(&cfg, &path).await?;
        }
        Commands::Import { file, out } => {
            convert_cmd::run_import(&cfg, &file, out).await?;
        }
        Commands::Export {
            file,
            format,
            title,
            out,
        } => {
            convert_cmd::run_export(&cfg, &file, &format, title, out).await?;
        }
        Commands::Serve { watch } => {
            server::run_server(&cfg, watch).await?;
        }
    }

    Ok(())
}
