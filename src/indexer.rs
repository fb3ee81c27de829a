//! File indexer.
//!
//! Walks the watch root, turns every matching markdown file into a
//! [`Document`], and keeps the store in sync with filesystem events.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start()──▶ Scanning ──▶ Watching ──stop()──▶ Stopped
//!   ▲                                                    │
//!   └────────────────────── start() ─────────────────────┘
//! ```
//!
//! Per-file failures never abort a scan or the watch loop: they are logged
//! and counted in the [`IndexReport`].
//!
//! Operations on the same relative path are serialized through
//! [`PathLocks`], so an `index_file` triggered by a watch event queues behind
//! one triggered by a manual save instead of racing it.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::SystemTime;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::{TopicsConfig, WatchConfig};
use crate::error::IndexerError;
use crate::frontmatter::split_frontmatter;
use crate::models::{Document, CONTENT_TYPE_MARKDOWN};
use crate::normalize::MarkdownNormalizer;
use crate::store::DocumentStore;
use crate::watcher::{self, FileWatcher, PathFilter, WatchEvent, IGNORED_DIRS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerState {
    Idle,
    Scanning,
    Watching,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub indexed: usize,
    pub failed: usize,
}

/// Map from relative path to the mutex guarding operations on it.
#[derive(Default)]
pub struct PathLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub async fn lock(&self, key: &str) -> PathGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key.to_string()).or_default().clone()
        };
        PathGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the path lock and prunes the entry once nobody else holds it.
pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = locks.get(&self.key) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&self.key);
            }
        }
    }
}

struct WatchHandle {
    watcher: FileWatcher,
    task: JoinHandle<()>,
}

struct Inner {
    filter: Arc<PathFilter>,
    follow_symlinks: bool,
    store: Arc<dyn DocumentStore>,
    normalizer: Mutex<MarkdownNormalizer>,
    locks: PathLocks,
    scan_lock: Mutex<()>,
    state: StdMutex<IndexerState>,
    watch: Mutex<Option<WatchHandle>>,
}

/// Cheaply cloneable handle; clones share state.
#[derive(Clone)]
pub struct FileIndexer {
    inner: Arc<Inner>,
}

impl FileIndexer {
    pub fn new(
        watch: &WatchConfig,
        topics: TopicsConfig,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                filter: Arc::new(PathFilter::new(watch)?),
                follow_symlinks: watch.follow_symlinks,
                store,
                normalizer: Mutex::new(MarkdownNormalizer::new(topics)),
                locks: PathLocks::default(),
                scan_lock: Mutex::new(()),
                state: StdMutex::new(IndexerState::Idle),
                watch: Mutex::new(None),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        self.inner.filter.root()
    }

    pub fn state(&self) -> IndexerState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: IndexerState) {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn path_locks(&self) -> &PathLocks {
        &self.inner.locks
    }

    /// Every indexable file under the root, sorted for deterministic order.
    pub fn discover_files(&self) -> Result<Vec<PathBuf>> {
        let root = self.root();
        if !root.exists() {
            return Err(IndexerError::MissingRoot(root.display().to_string()).into());
        }

        let walker = WalkDir::new(root)
            .follow_links(self.inner.follow_symlinks)
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir()
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| IGNORED_DIRS.contains(&name)))
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            if entry.file_type().is_file() && self.inner.filter.matches(entry.path()) {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Indexes every matching file sequentially. Individual failures are
    /// logged and counted; only an unusable root is an error.
    pub async fn index_existing_files(&self) -> Result<IndexReport> {
        let _scan = self.inner.scan_lock.lock().await;
        let files = self.discover_files()?;

        self.inner.normalizer.lock().await.begin_run();

        let mut report = IndexReport::default();
        for path in &files {
            match self.index_file(path).await {
                Ok(_) => report.indexed += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(path = %path.display(), error = %format!("{:#}", e), "Failed to index file");
                }
            }
        }

        info!(
            root = %self.root().display(),
            indexed = report.indexed,
            failed = report.failed,
            "Initial scan complete"
        );
        Ok(report)
    }

    /// Reads, normalizes, and upserts one file. `path` may be absolute or
    /// relative to the watch root.
    pub async fn index_file(&self, path: &Path) -> Result<Document> {
        let abs = self.absolute(path);
        let rel = self
            .inner
            .filter
            .relative(&abs)
            .ok_or_else(|| anyhow!("{} is outside the watch root", abs.display()))?;

        let _guard = self.inner.locks.lock(&rel).await;

        let metadata = tokio::fs::metadata(&abs)
            .await
            .with_context(|| format!("Failed to stat {}", abs.display()))?;
        let raw = tokio::fs::read_to_string(&abs)
            .await
            .with_context(|| format!("Failed to read {}", abs.display()))?;
        let parsed = split_frontmatter(&raw)
            .with_context(|| format!("Failed to parse frontmatter in {}", rel))?;

        let normalized = self
            .inner
            .normalizer
            .lock()
            .await
            .process_keyed(&rel, &parsed.content, &parsed.data);

        let modified_at = metadata.modified().map(system_time_ms).unwrap_or(0);
        let created_at = metadata
            .created()
            .map(system_time_ms)
            .unwrap_or(modified_at);

        let document = Document {
            path: rel,
            title: normalized.title,
            content: normalized.plain_text,
            raw_content: parsed.content,
            frontmatter: parsed.data,
            tags: normalized.tags,
            topics: normalized.topics,
            content_type: CONTENT_TYPE_MARKDOWN.to_string(),
            word_count: normalized.word_count,
            created_at,
            modified_at,
        };

        self.inner.store.upsert_document(&document).await?;
        debug!(path = %document.path, words = document.word_count, "Indexed document");
        Ok(document)
    }

    /// Removes the record for a file that no longer exists.
    pub async fn remove_file(&self, path: &Path) -> Result<bool> {
        let abs = self.absolute(path);
        let rel = self
            .inner
            .filter
            .relative(&abs)
            .ok_or_else(|| anyhow!("{} is outside the watch root", abs.display()))?;

        let _guard = self.inner.locks.lock(&rel).await;
        let existed = self.inner.store.delete_document(&rel).await?;
        debug!(path = %rel, existed, "Removed document");
        Ok(existed)
    }

    /// Scans the root, then follows filesystem events until [`stop`](Self::stop).
    pub async fn start(&self) -> Result<IndexReport, IndexerError> {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                IndexerState::Idle | IndexerState::Stopped => *state = IndexerState::Scanning,
                IndexerState::Scanning | IndexerState::Watching => {
                    return Err(IndexerError::AlreadyRunning)
                }
            }
        }

        let report = match self.index_existing_files().await {
            Ok(report) => report,
            Err(e) => {
                self.set_state(IndexerState::Idle);
                return Err(match e.downcast::<IndexerError>() {
                    Ok(indexer_error) => indexer_error,
                    Err(other) => IndexerError::Scan(other),
                });
            }
        };

        let (file_watcher, events_rx) = match watcher::watch(self.inner.filter.clone()) {
            Ok(pair) => pair,
            Err(e) => {
                self.set_state(IndexerState::Idle);
                return Err(e.into());
            }
        };

        let task = tokio::spawn(self.clone().run_event_loop(events_rx));
        *self.inner.watch.lock().await = Some(WatchHandle {
            watcher: file_watcher,
            task,
        });
        self.set_state(IndexerState::Watching);
        info!(root = %self.root().display(), "Watching for changes");

        Ok(report)
    }

    /// Releases the watch subscription and waits for the event loop to drain.
    pub async fn stop(&self) {
        let handle = self.inner.watch.lock().await.take();
        if let Some(WatchHandle { watcher, task }) = handle {
            drop(watcher);
            if let Err(e) = task.await {
                error!(?e, "Watch event loop ended abnormally");
            }
            info!("Stopped watching");
        }
        self.set_state(IndexerState::Stopped);
    }

    async fn run_event_loop(self, mut events_rx: mpsc::UnboundedReceiver<WatchEvent>) {
        while let Some(event) = events_rx.recv().await {
            self.handle_event(event).await;
        }
    }

    pub async fn handle_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::Add(path) | WatchEvent::Change(path) => {
                if let Err(e) = self.index_file(&path).await {
                    warn!(path = %path.display(), error = %format!("{:#}", e), "Failed to re-index file");
                }
            }
            WatchEvent::Unlink(path) => {
                if let Err(e) = self.remove_file(&path).await {
                    warn!(path = %path.display(), error = %format!("{:#}", e), "Failed to remove document");
                }
            }
            WatchEvent::Error(message) => {
                error!(%message, "File watcher error");
            }
        }
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root().join(path)
        }
    }
}

fn system_time_ms(time: SystemTime) -> i64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
