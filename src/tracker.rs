//! Keeping cell declarations current while files are edited.
//!
//! A [`FileTracker`] owns the registry of tracked files. Each tracked file
//! gets one background task that waits for change notifications on the
//! file, and when the content really changed, re-declares the file's cells
//! into its scope. Nothing is executed.
//!
//! A loop stops when its cancellation token fires or, after any wake, when
//! its path is no longer in the registry.

use crate::cell::Scope;
use crate::config::WatchSettings;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use xxhash_rust::xxh3::xxh3_64;

#[derive(Error, Debug)]
pub enum TrackError {
    #[error("cannot track {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("tracking {path} requires a running tokio runtime")]
    NoRuntime { path: PathBuf },
}

struct TrackedFile {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    files: Mutex<HashMap<PathBuf, TrackedFile>>,
    loop_starts: AtomicUsize,
    redeclarations: AtomicUsize,
}

impl Registry {
    fn contains(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }
}

/// Registry of tracked files and their watch loops.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct FileTracker {
    registry: Arc<Registry>,
    settings: WatchSettings,
}

impl std::fmt::Debug for FileTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTracker")
            .field("tracked", &self.tracked_paths())
            .field("settings", &self.settings)
            .finish()
    }
}

impl FileTracker {
    pub fn new(settings: WatchSettings) -> Self {
        Self {
            registry: Arc::default(),
            settings,
        }
    }

    /// Start watching `path` and re-declaring its cells into `scope`.
    ///
    /// Returns `Ok(false)` when the path is already tracked; the existing
    /// loop keeps running and `scope` is ignored.
    pub fn track(&self, path: impl AsRef<Path>, scope: Arc<Scope>) -> Result<bool, TrackError> {
        let path = path.as_ref();
        let path = path.canonicalize().map_err(|source| TrackError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut files = self.registry.files.lock();
        if files.contains_key(&path) {
            tracing::debug!(path = %path.display(), "already tracked");
            return Ok(false);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| TrackError::NoRuntime { path: path.clone() })?;
        let snapshot = std::fs::read(&path).map_err(|source| TrackError::Io {
            path: path.clone(),
            source,
        })?;
        let (events, debouncer) = self.subscribe(&path)?;

        let cancel = CancellationToken::new();
        let watch = WatchLoop {
            path: path.clone(),
            scope,
            registry: Arc::clone(&self.registry),
            settings: self.settings.clone(),
            cancel: cancel.clone(),
            snapshot: xxh3_64(&snapshot),
        };
        let task = runtime.spawn(watch.run(events, debouncer));
        self.registry.loop_starts.fetch_add(1, Ordering::SeqCst);

        tracing::info!(path = %path.display(), "tracking file");
        files.insert(path, TrackedFile { cancel, task });
        Ok(true)
    }

    /// Stop tracking `path`. Returns whether it was tracked.
    pub fn untrack(&self, path: impl AsRef<Path>) -> bool {
        let key = registry_key(path.as_ref());

        let removed = self.registry.files.lock().remove(&key);
        match removed {
            Some(tracked) => {
                tracked.cancel.cancel();
                tracing::info!(path = %key.display(), "untracked file");
                true
            }
            None => false,
        }
    }

    pub fn is_tracked(&self, path: impl AsRef<Path>) -> bool {
        self.registry.contains(&registry_key(path.as_ref()))
    }

    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.registry.files.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of watch loops ever started by this registry.
    pub fn loop_starts(&self) -> usize {
        self.registry.loop_starts.load(Ordering::SeqCst)
    }

    /// Number of successful re-declarations across all loops.
    pub fn redeclarations(&self) -> usize {
        self.registry.redeclarations.load(Ordering::SeqCst)
    }

    /// Untrack everything and wait for every loop to finish.
    pub async fn shutdown(&self) {
        let drained: Vec<(PathBuf, TrackedFile)> =
            self.registry.files.lock().drain().collect();
        for (_, tracked) in &drained {
            tracked.cancel.cancel();
        }
        for (path, tracked) in drained {
            if let Err(err) = tracked.task.await {
                tracing::warn!(path = %path.display(), error = %err, "watch loop ended abnormally");
            }
        }
    }

    /// Watch the parent directory and forward events that touch `path`.
    fn subscribe(
        &self,
        path: &Path,
    ) -> Result<(mpsc::UnboundedReceiver<()>, Debouncer<RecommendedWatcher>), TrackError>
    {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let name: Option<OsString> = path.file_name().map(ToOwned::to_owned);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut debouncer = new_debouncer(
            self.settings.debounce(),
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    if events
                        .iter()
                        .any(|event| event.path.file_name() == name.as_deref())
                    {
                        let _ = tx.send(());
                    }
                }
                Err(err) => tracing::warn!(error = %err, "file watcher error"),
            },
        )
        .map_err(|source| TrackError::Watch {
            path: path.to_path_buf(),
            source,
        })?;

        debouncer
            .watcher()
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| TrackError::Watch {
                path: path.to_path_buf(),
                source,
            })?;

        Ok((rx, debouncer))
    }
}

/// The canonical path `track` would have registered for `path`, also when
/// the file itself is gone.
fn registry_key(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match (parent.canonicalize(), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

struct WatchLoop {
    path: PathBuf,
    scope: Arc<Scope>,
    registry: Arc<Registry>,
    settings: WatchSettings,
    cancel: CancellationToken,
    snapshot: u64,
}

impl WatchLoop {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<()>,
        // Dropped with the loop, which ends the subscription.
        _debouncer: Debouncer<RecommendedWatcher>,
    ) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = events.recv() => {
                    if event.is_none() {
                        break;
                    }
                }
            }
            if !self.registry.contains(&self.path) {
                break;
            }
            let Some(content) = self.read_current().await else {
                continue;
            };
            self.reconcile(&content);
        }
        tracing::debug!(path = %self.path.display(), "watch loop finished");
    }

    /// Read the file, waiting out the window where a rewrite left it missing.
    async fn read_current(&self) -> Option<Vec<u8>> {
        for attempt in 0..=self.settings.missing_retries {
            match tokio::fs::read(&self.path).await {
                Ok(content) => return Some(content),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(path = %self.path.display(), attempt, "file missing, backing off");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return None,
                        _ = tokio::time::sleep(self.settings.missing_backoff()) => {}
                    }
                }
                Err(err) => {
                    tracing::warn!(path = %self.path.display(), error = %err, "failed to read tracked file");
                    return None;
                }
            }
        }
        tracing::warn!(
            path = %self.path.display(),
            retries = self.settings.missing_retries,
            "tracked file is still missing"
        );
        None
    }

    fn reconcile(&mut self, content: &[u8]) {
        let hash = xxh3_64(content);
        if hash == self.snapshot {
            return;
        }
        let Ok(text) = std::str::from_utf8(content) else {
            tracing::warn!(path = %self.path.display(), "tracked file is not valid UTF-8");
            return;
        };

        match self.scope.redeclare(&self.path, text) {
            Ok(redeclared) => {
                self.snapshot = hash;
                self.registry.redeclarations.fetch_add(1, Ordering::SeqCst);
                let names: Vec<&str> =
                    redeclared.declared.iter().map(|d| d.name.as_str()).collect();
                tracing::info!(
                    path = %self.path.display(),
                    cells = ?names,
                    unbound = ?redeclared.unbound,
                    "re-declared cells"
                );
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "re-declaration failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn settings() -> WatchSettings {
        WatchSettings {
            debounce_ms: 20,
            missing_backoff_ms: 10,
            missing_retries: 5,
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn track_twice_starts_one_loop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nb.py");
        fs::write(&path, "# @cell a\na = 1\n").unwrap();

        let tracker = FileTracker::new(settings());
        let scope = Arc::new(Scope::new());

        assert!(tracker.track(&path, Arc::clone(&scope)).unwrap());
        assert!(!tracker.track(&path, Arc::clone(&scope)).unwrap());
        assert_eq!(tracker.loop_starts(), 1);
        assert!(tracker.is_tracked(&path));
        assert_eq!(tracker.tracked_paths(), vec![path.canonicalize().unwrap()]);

        tracker.shutdown().await;
        assert!(tracker.tracked_paths().is_empty());
    }

    #[tokio::test]
    async fn external_edit_redeclares() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nb.py");
        fs::write(&path, "# @cell a\na = 1\n").unwrap();

        let scope = Arc::new(Scope::new());
        scope.define("a", || Ok(1_i32));
        scope.load(&path).unwrap();
        assert_eq!(scope.cell("a").unwrap().line, 2);

        let tracker = FileTracker::new(settings());
        tracker.track(&path, Arc::clone(&scope)).unwrap();

        fs::write(&path, "import os\n\n# @cell a\na = 1\n").unwrap();
        assert!(wait_for(|| scope.cell("a").map(|c| c.line) == Some(4)).await);
        assert!(tracker.redeclarations() >= 1);

        tracker.shutdown().await;
    }

    #[tokio::test]
    async fn untrack_deleted_file_through_other_spelling() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let path = dir.path().join("nb.py");
        fs::write(&path, "# @cell a\na = 1\n").unwrap();

        let tracker = FileTracker::new(settings());
        tracker.track(&path, Arc::new(Scope::new())).unwrap();
        fs::remove_file(&path).unwrap();

        let roundabout = dir.path().join("sub").join("..").join("nb.py");
        assert!(tracker.is_tracked(&roundabout));
        assert!(tracker.untrack(&roundabout));
        assert!(tracker.tracked_paths().is_empty());
    }

    #[tokio::test]
    async fn untracked_file_is_not_redeclared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nb.py");
        fs::write(&path, "# @cell a\na = 1\n").unwrap();

        let tracker = FileTracker::new(settings());
        let scope = Arc::new(Scope::new());
        tracker.track(&path, Arc::clone(&scope)).unwrap();

        assert!(tracker.untrack(&path));
        assert!(!tracker.untrack(&path));
        fs::write(&path, "\n\n# @cell a\na = 2\n").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(tracker.redeclarations(), 0);
        assert!(!tracker.is_tracked(&path));
    }

    #[tokio::test]
    async fn malformed_save_does_not_stop_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nb.py");
        fs::write(&path, "# @cell a\na = 1\n").unwrap();

        let scope = Arc::new(Scope::new());
        scope.define("a", || Ok(1_i32));
        scope.load(&path).unwrap();

        let tracker = FileTracker::new(settings());
        tracker.track(&path, Arc::clone(&scope)).unwrap();

        fs::write(&path, "# @cell a\n").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(scope.cell("a").unwrap().line, 2);

        fs::write(&path, "\n# @cell a\na = 1\n").unwrap();
        assert!(wait_for(|| scope.cell("a").map(|c| c.line) == Some(3)).await);

        tracker.shutdown().await;
    }

    #[test]
    fn track_without_runtime_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nb.py");
        fs::write(&path, "x = 1\n").unwrap();

        let tracker = FileTracker::default();
        let err = tracker.track(&path, Arc::new(Scope::new())).unwrap_err();
        assert!(matches!(err, TrackError::NoRuntime { .. }));
        assert!(!tracker.is_tracked(&path));
    }
}
