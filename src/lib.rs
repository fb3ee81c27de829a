//! # Markdown Studio
//!
//! A local-first markdown library. A folder of markdown files is indexed
//! into SQLite (title, tags, topics, plain text, full-text search) and kept
//! in sync by a filesystem watcher. Foreign documents (HTML, plain text,
//! PDF, DOCX, EPUB) are converted into markdown with their images moved
//! into a local image store, and markdown can be exported back out as
//! HTML, PDF, DOCX, plain text or markdown.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌────────────┐
//! │  Watcher   │──▶│  Indexer   │──▶│   SQLite   │
//! │  (notify)  │   │ Normalizer │   │ FTS5+images│
//! └────────────┘   └────────────┘   └─────┬──────┘
//!                                         │
//! ┌────────────┐   ┌────────────┐         │
//! │  Import    │──▶│ Localizer  │─────────┤
//! │ html..epub │   │  (images)  │         │
//! └────────────┘   └────────────┘   ┌─────┴──────┐
//!                                   ▼            ▼
//! ┌────────────┐              ┌──────────┐ ┌──────────┐
//! │  Export    │◀─────────────│   CLI    │ │   HTTP   │
//! │ html..docx │              │  (mds)   │ │  (axum)  │
//! └────────────┘              └──────────┘ └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Conversion and indexer error types |
//! | [`frontmatter`] | YAML frontmatter splitting |
//! | [`normalize`] | Plain text, title, tags and TF-IDF topics |
//! | [`watcher`] | Filtered filesystem events |
//! | [`indexer`] | Scan + watch lifecycle, per-path serialization |
//! | [`import`] | html/txt/pdf/docx/epub → markdown, uploads |
//! | [`localize`] | Rewrites image references to the local store |
//! | [`export`] | markdown → html/pdf/docx/txt/md |
//! | [`store`] | Document and image persistence |
//! | [`search`] / [`get`] | CLI queries |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod convert_cmd;
pub mod db;
pub mod error;
pub mod export;
pub mod frontmatter;
pub mod get;
pub mod import;
pub mod index_cmd;
pub mod indexer;
pub mod localize;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod search;
pub mod server;
pub mod store;
pub mod watcher;
