//! Which files exist under the served folder, kept current by a watcher.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Directory names that are never watched or served.
const IGNORED_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Presence cache of root-relative, `/`-separated file paths.
#[derive(Debug, Clone)]
pub struct FileIndex {
    root: PathBuf,
    files: Arc<Mutex<HashSet<String>>>,
}

impl FileIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.files.lock().await.contains(path)
    }

    pub async fn len(&self) -> usize {
        self.files.lock().await.len()
    }

    /// Index every file below `dir` and return the directories found,
    /// `dir` included.
    pub async fn scan(&self, dir: &Path) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        let mut found = Vec::new();

        let walker = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| !self.is_ignored(entry.path()));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                dirs.push(entry.into_path());
            } else if let Some(relative) = self.relative(entry.path()) {
                found.push(relative);
            }
        }

        let mut files = self.files.lock().await;
        files.extend(found);
        dirs
    }

    /// Record an absolute path as present.
    pub async fn insert(&self, path: &Path) {
        if let Some(relative) = self.relative(path) {
            trace!("indexed {}", relative);
            self.files.lock().await.insert(relative);
        }
    }

    /// Forget an absolute path and anything indexed below it.
    pub async fn remove(&self, path: &Path) {
        let Some(relative) = self.relative(path) else {
            return;
        };
        let prefix = format!("{relative}/");
        let mut files = self.files.lock().await;
        files.remove(&relative);
        files.retain(|f| !f.starts_with(&prefix));
        trace!("unindexed {}", relative);
    }

    /// Root-relative, slash separated form of `path`.
    fn relative(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    /// Whether `path` lies in a version-control directory below the root.
    fn is_ignored(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative.components().any(|c| match c {
            Component::Normal(part) => IGNORED_DIRS.iter().any(|ignored| part == *ignored),
            _ => false,
        })
    }
}

/// Index the folder, then keep the index current until `shutdown`.
///
/// The initial scan completes before this returns.
pub async fn watch(
    index: FileIndex,
    shutdown: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
        // The receiver only goes away on shutdown.
        let _ = tx.send(event);
    })
    .context("Failed to create filesystem watcher")?;

    let root = index.root().to_path_buf();
    let dirs = index.scan(&root).await;
    for dir in &dirs {
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", dir))?;
    }
    debug!("watching {} directories, {} files", dirs.len(), index.len().await);

    Ok(tokio::spawn(apply_events(index, watcher, rx, shutdown)))
}

async fn apply_events(
    index: FileIndex,
    mut watcher: RecommendedWatcher,
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = shutdown.cancelled() => break,
        };
        match event {
            Some(Ok(event)) => apply(&index, &mut watcher, event).await,
            Some(Err(e)) => warn!("watch error: {}", e),
            None => break,
        }
    }
    debug!("watcher stopped");
}

async fn apply(index: &FileIndex, watcher: &mut RecommendedWatcher, event: Event) {
    trace!("fs event: {:?}", event);
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in event.paths {
                added(index, watcher, &path).await;
            }
        }
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for path in event.paths {
                index.remove(&path).await;
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                index.remove(from).await;
                added(index, watcher, to).await;
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // Platforms that cannot tell the side of a rename.
            for path in event.paths {
                if path.exists() {
                    added(index, watcher, &path).await;
                } else {
                    index.remove(&path).await;
                }
            }
        }
        _ => {}
    }
}

async fn added(index: &FileIndex, watcher: &mut RecommendedWatcher, path: &Path) {
    if index.is_ignored(path) {
        return;
    }
    if path.is_dir() {
        for dir in index.scan(path).await {
            if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
                warn!("failed to watch {:?}: {}", dir, e);
            }
        }
    } else {
        index.insert(path).await;
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use super::*;

    async fn eventually(index: &FileIndex, path: &str, present: bool) -> bool {
        for _ in 0..100 {
            if index.contains(path).await == present {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_scan_indexes_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "hi").unwrap();
        fs::create_dir_all(dir.path().join("css/deep")).unwrap();
        fs::write(dir.path().join("css/deep/site.css"), "body{}").unwrap();
        fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();

        let index = FileIndex::new(dir.path());
        let dirs = index.scan(dir.path()).await;

        assert!(index.contains("index.html").await);
        assert!(index.contains("css/deep/site.css").await);
        assert!(!index.contains(".git/HEAD").await);
        assert!(!index.contains("css").await, "directories are not files");
        assert_eq!(index.len().await, 2);
        assert_eq!(dirs.len(), 3);
        assert!(dirs.iter().all(|d| !index.is_ignored(d)));
    }

    #[tokio::test]
    async fn test_remove_drops_subtree() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("docs/api")).unwrap();
        fs::write(dir.path().join("docs/a.md"), "a").unwrap();
        fs::write(dir.path().join("docs/api/b.md"), "b").unwrap();
        fs::write(dir.path().join("docsify.md"), "c").unwrap();

        let index = FileIndex::new(dir.path());
        index.scan(dir.path()).await;
        index.remove(&dir.path().join("docs")).await;

        assert!(!index.contains("docs/a.md").await);
        assert!(!index.contains("docs/api/b.md").await);
        assert!(index.contains("docsify.md").await);
    }

    #[test]
    fn test_relative_outside_root() {
        let index = FileIndex::new("/srv/site");
        assert_eq!(index.relative(Path::new("/srv/site/a/b.txt")).as_deref(), Some("a/b.txt"));
        assert_eq!(index.relative(Path::new("/srv/site")), None);
        assert_eq!(index.relative(Path::new("/etc/passwd")), None);
    }

    #[tokio::test]
    async fn test_watch_tracks_create_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let index = FileIndex::new(&root);
        let shutdown = CancellationToken::new();
        let task = watch(index.clone(), shutdown.clone()).await.unwrap();

        assert!(!index.contains("late.txt").await);
        fs::write(root.join("late.txt"), "hello").unwrap();
        assert!(eventually(&index, "late.txt", true).await);

        fs::create_dir(root.join("sub")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        fs::write(root.join("sub/inner.txt"), "x").unwrap();
        assert!(eventually(&index, "sub/inner.txt", true).await);

        fs::remove_file(root.join("late.txt")).unwrap();
        assert!(eventually(&index, "late.txt", false).await);

        shutdown.cancel();
        task.await.unwrap();
    }
}
