//! Filesystem watch service.
//!
//! Wraps a recursive [`notify::RecommendedWatcher`] and reduces its raw
//! events to [`WatchEvent`]s for files accepted by a [`PathFilter`]. Events
//! are forwarded over an unbounded tokio channel in emission order.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, trace};

use crate::config::WatchConfig;

/// Directories that are never scanned or watched.
pub const IGNORED_DIRS: &[&str] = &["node_modules", ".git"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Add(PathBuf),
    Change(PathBuf),
    Unlink(PathBuf),
    Error(String),
}

/// Include/exclude rules shared by the initial scan and the watcher.
#[derive(Debug, Clone)]
pub struct PathFilter {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
}

impl PathFilter {
    pub fn new(config: &WatchConfig) -> Result<Self> {
        let mut excludes: Vec<String> = IGNORED_DIRS
            .iter()
            .map(|dir| format!("**/{}/**", dir))
            .collect();
        excludes.extend(config.exclude_globs.iter().cloned());

        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path relative to the root with `/` separators, if `path` is inside it.
    pub fn relative(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        match self.relative(path) {
            Some(rel) => self.matches_relative(&rel),
            None => false,
        }
    }

    pub fn matches_relative(&self, rel: &str) -> bool {
        if rel.split('/').any(|part| IGNORED_DIRS.contains(&part)) {
            return false;
        }
        !self.exclude.is_match(rel) && self.include.is_match(rel)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Keeps the OS watch alive. Dropping it closes the event channel.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher").finish_non_exhaustive()
    }
}

pub fn watch(
    filter: Arc<PathFilter>,
) -> Result<(FileWatcher, mpsc::UnboundedReceiver<WatchEvent>), notify::Error> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let root = filter.root().to_path_buf();

    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| {
            let events = match result {
                Ok(event) => translate(event, &filter),
                Err(e) => vec![WatchEvent::Error(e.to_string())],
            };
            for event in events {
                trace!(?event, "watch event");
                if events_tx.send(event).is_err() {
                    error!("Tried to send file system events to a closed channel;");
                    return;
                }
            }
        },
        Config::default(),
    )?;
    watcher.watch(&root, RecursiveMode::Recursive)?;

    Ok((FileWatcher { _watcher: watcher }, events_rx))
}

/// Maps one raw notify event to zero or more filtered [`WatchEvent`]s.
pub fn translate(event: Event, filter: &PathFilter) -> Vec<WatchEvent> {
    let mut out = Vec::new();

    let by_existence = |path: &PathBuf| {
        if path.exists() {
            WatchEvent::Add(path.clone())
        } else {
            WatchEvent::Unlink(path.clone())
        }
    };

    match event.kind {
        EventKind::Create(_) => {
            out.extend(event.paths.iter().cloned().map(WatchEvent::Add));
        }
        EventKind::Remove(_) => {
            out.extend(event.paths.iter().cloned().map(WatchEvent::Unlink));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                out.push(WatchEvent::Unlink(from.clone()));
                out.push(WatchEvent::Add(to.clone()));
            } else {
                out.extend(event.paths.iter().map(by_existence));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            out.extend(event.paths.iter().cloned().map(WatchEvent::Unlink));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            out.extend(event.paths.iter().cloned().map(WatchEvent::Add));
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            out.extend(event.paths.iter().map(by_existence));
        }
        EventKind::Modify(_) => {
            for path in &event.paths {
                if path.exists() {
                    out.push(WatchEvent::Change(path.clone()));
                } else {
                    out.push(WatchEvent::Unlink(path.clone()));
                }
            }
        }
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
    }

    out.retain(|event| match event {
        WatchEvent::Add(p) | WatchEvent::Change(p) | WatchEvent::Unlink(p) => filter.matches(p),
        WatchEvent::Error(_) => true,
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn filter(root: &Path) -> PathFilter {
        PathFilter::new(&WatchConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec!["drafts/**".to_string()],
            follow_symlinks: false,
        })
        .unwrap()
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        let f = filter(Path::new("/notes"));
        assert_eq!(
            f.relative(Path::new("/notes/a/b.md")).as_deref(),
            Some("a/b.md")
        );
        assert_eq!(f.relative(Path::new("/elsewhere/b.md")), None);
    }

    #[test]
    fn filter_skips_ignored_dirs_and_excludes() {
        let f = filter(Path::new("/notes"));
        assert!(f.matches(Path::new("/notes/readme.md")));
        assert!(f.matches(Path::new("/notes/deep/dir/x.md")));
        assert!(!f.matches(Path::new("/notes/readme.txt")));
        assert!(!f.matches(Path::new("/notes/node_modules/pkg/readme.md")));
        assert!(!f.matches(Path::new("/notes/.git/info.md")));
        assert!(!f.matches(Path::new("/notes/drafts/wip.md")));
    }

    #[test]
    fn translate_maps_kinds() {
        let f = filter(Path::new("/notes"));
        let create = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/notes/a.md"));
        assert_eq!(
            translate(create, &f),
            vec![WatchEvent::Add(PathBuf::from("/notes/a.md"))]
        );

        let remove = Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(PathBuf::from("/notes/a.md"));
        assert_eq!(
            translate(remove, &f),
            vec![WatchEvent::Unlink(PathBuf::from("/notes/a.md"))]
        );

        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/notes/old.md"))
            .add_path(PathBuf::from("/notes/new.md"));
        assert_eq!(
            translate(rename, &f),
            vec![
                WatchEvent::Unlink(PathBuf::from("/notes/old.md")),
                WatchEvent::Add(PathBuf::from("/notes/new.md")),
            ]
        );
    }

    #[test]
    fn translate_drops_unmatched_paths() {
        let f = filter(Path::new("/notes"));
        let event = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/notes/image.png"));
        assert!(translate(event, &f).is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn watch_reports_real_file_events() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let (_watcher, mut events_rx) = watch(Arc::new(filter(&root))).unwrap();

        let note = root.join("live.md");
        fs::write(root.join("skip.txt"), "ignored").unwrap();
        fs::write(&note, "# Live").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        fs::remove_file(&note).unwrap();

        let mut seen = Vec::new();
        let collected = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = events_rx.recv().await {
                let done = event == WatchEvent::Unlink(note.clone());
                seen.push(event);
                if done {
                    break;
                }
            }
        })
        .await;
        assert!(collected.is_ok(), "no unlink event, saw {:?}", seen);

        assert!(
            matches!(seen.first(), Some(WatchEvent::Add(p) | WatchEvent::Change(p)) if *p == note),
            "first event should be for the new note: {:?}",
            seen
        );
        assert!(seen.iter().all(|event| match event {
            WatchEvent::Add(p) | WatchEvent::Change(p) | WatchEvent::Unlink(p) => *p == note,
            WatchEvent::Error(_) => false,
        }));
    }
}
