//! Recursive filesystem subscription producing ordered change batches.
//!
//! Raw `notify` events are mapped to [`ChangeKind`]s, filtered, and coalesced
//! per path until the tree has been quiet for the debounce window. Each flush
//! yields one [`ChangeBatch`].

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::RegexSet;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, trace};
use walkdir::WalkDir;

use crate::core::error::HotError;

/// Kind of change reported for a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 3] = [ChangeKind::Added, ChangeKind::Modified, ChangeKind::Deleted];

    /// Name of the per-event handler and notification for this kind.
    pub fn handler_name(self) -> &'static str {
        match self {
            ChangeKind::Added => "file_added",
            ChangeKind::Modified => "file_modified",
            ChangeKind::Deleted => "file_deleted",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

impl FileChange {
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// One group of changes, in the order their paths were first seen.
pub type ChangeBatch = Vec<FileChange>;

/// Map a raw `notify` event to zero or more changes.
pub fn changes_from_event(event: &Event) -> Vec<FileChange> {
    let all = |kind: ChangeKind| {
        event
            .paths
            .iter()
            .map(|p| FileChange::new(kind, p.clone()))
            .collect::<Vec<_>>()
    };

    match event.kind {
        EventKind::Create(_) => all(ChangeKind::Added),
        EventKind::Remove(_) => all(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(ChangeKind::Added),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut changes = Vec::new();
            if let Some(from) = event.paths.first() {
                changes.push(FileChange::new(ChangeKind::Deleted, from.clone()));
            }
            if let Some(to) = event.paths.get(1) {
                changes.push(FileChange::new(ChangeKind::Added, to.clone()));
            }
            changes
        }
        // Backends that cannot tell which side of a rename they saw
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                let kind = if p.exists() {
                    ChangeKind::Added
                } else {
                    ChangeKind::Deleted
                };
                FileChange::new(kind, p.clone())
            })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => all(ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Coalesces changes per path between two flushes.
#[derive(Debug, Default)]
pub struct ChangeBatcher {
    pending: Vec<FileChange>,
}

impl ChangeBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Record a change, merging it with any pending change for the same path.
    pub fn record(&mut self, change: FileChange) {
        let Some(idx) = self.pending.iter().position(|c| c.path == change.path) else {
            self.pending.push(change);
            return;
        };

        let merged = match (self.pending[idx].kind, change.kind) {
            (ChangeKind::Added, ChangeKind::Modified) => Some(ChangeKind::Added),
            (ChangeKind::Added, ChangeKind::Deleted) => None,
            (ChangeKind::Deleted, ChangeKind::Added) => Some(ChangeKind::Modified),
            (ChangeKind::Deleted, ChangeKind::Modified) => Some(ChangeKind::Modified),
            (_, later) => Some(later),
        };

        match merged {
            Some(kind) => self.pending[idx].kind = kind,
            None => {
                self.pending.remove(idx);
            }
        }
    }

    /// Take everything recorded so far as one batch.
    pub fn flush(&mut self) -> ChangeBatch {
        std::mem::take(&mut self.pending)
    }
}

/// Regular files known to exist under the watch root.
///
/// Editors that save by renaming a scratch file over the target report a
/// rename onto a path that already existed. Such an add is an edit.
#[derive(Debug, Default)]
pub struct KnownFiles {
    paths: HashSet<PathBuf>,
}

impl KnownFiles {
    /// Record every file under `root` outside the filter's ignored directories.
    pub fn scan(root: &Path, filter: &WatchFilter) -> Self {
        let paths = WalkDir::new(root)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !filter.ignores_dir(&entry.file_name().to_string_lossy())
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();

        Self { paths }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Track a change, turning an add over a known file into a modification.
    pub fn observe(&mut self, mut change: FileChange) -> FileChange {
        match change.kind {
            ChangeKind::Added => {
                if !self.paths.insert(change.path.clone()) {
                    trace!("{:?} replaced in place", change.path);
                    change.kind = ChangeKind::Modified;
                }
            }
            ChangeKind::Modified => {
                self.paths.insert(change.path.clone());
            }
            ChangeKind::Deleted => {
                self.paths.remove(&change.path);
            }
        }
        change
    }
}

/// Drops changes inside ignored directories and editor scratch files.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    ignore_dirs: Vec<String>,
    ignore_files: RegexSet,
}

/// File name patterns left behind by editors and OS tooling.
const IGNORED_FILE_PATTERNS: &[&str] = &[r"\.sw.$", r"~$", r"^\.#", r"^\.DS_Store$", r"^flycheck_"];

impl WatchFilter {
    pub fn new(ignore_dirs: Vec<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            ignore_dirs,
            ignore_files: RegexSet::new(IGNORED_FILE_PATTERNS)?,
        })
    }

    pub fn ignores_dir(&self, name: &str) -> bool {
        self.ignore_dirs.iter().any(|d| d == name)
    }

    /// Whether a path (relative to the watch root) should be reported.
    pub fn allows(&self, path: &Path) -> bool {
        let in_ignored_dir = path.parent().is_some_and(|parent| {
            parent
                .components()
                .any(|c| self.ignores_dir(&c.as_os_str().to_string_lossy()))
        });
        if in_ignored_dir {
            return false;
        }

        match path.file_name() {
            Some(name) => !self.ignore_files.is_match(&name.to_string_lossy()),
            None => false,
        }
    }
}

/// A live recursive subscription. Dropping it stops the underlying watcher.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Start watching `root` recursively, returning the batch stream.
    pub fn subscribe(
        root: &Path,
        filter: WatchFilter,
        debounce: Duration,
    ) -> Result<(Self, ReceiverStream<ChangeBatch>), HotError> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Err(e) = raw_tx.send(res) {
                    error!("Failed to send file watch event: {}", e);
                }
            },
            Config::default(),
        )?;
        let known = KnownFiles::scan(root, &filter);
        debug!("📂 {} existing files under {:?}", known.len(), root);
        watcher.watch(root, RecursiveMode::Recursive)?;
        info!("👀 Watching {:?} recursively", root);

        let (batch_tx, batch_rx) = mpsc::channel(16);
        tokio::spawn(batch_events(
            raw_rx,
            batch_tx,
            root.to_path_buf(),
            filter,
            known,
            debounce,
        ));

        Ok((
            Self {
                _watcher: watcher,
                root: root.to_path_buf(),
            },
            ReceiverStream::new(batch_rx),
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Collect raw events into batches, flushing after a quiet period.
async fn batch_events(
    mut raw_rx: mpsc::UnboundedReceiver<Result<Event, notify::Error>>,
    batch_tx: mpsc::Sender<ChangeBatch>,
    root: PathBuf,
    filter: WatchFilter,
    mut known: KnownFiles,
    debounce: Duration,
) {
    let mut batcher = ChangeBatcher::new();

    loop {
        let next = if batcher.is_empty() {
            raw_rx.recv().await
        } else {
            match tokio::time::timeout(debounce, raw_rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    let batch = batcher.flush();
                    debug!("📦 Flushing batch of {} changes", batch.len());
                    if batch_tx.send(batch).await.is_err() {
                        debug!("🔍 Batch receiver dropped, stopping");
                        return;
                    }
                    continue;
                }
            }
        };

        match next {
            Some(Ok(event)) => {
                trace!("🔍 File event received: {:?}", event);
                for change in changes_from_event(&event) {
                    let relative = change.path.strip_prefix(&root).unwrap_or(&change.path);
                    if filter.allows(relative) {
                        batcher.record(known.observe(change));
                    }
                }
            }
            Some(Err(e)) => error!("File watch error: {}", e),
            None => {
                debug!("🔍 File watcher channel closed");
                if !batcher.is_empty() {
                    let _ = batch_tx.send(batcher.flush()).await;
                }
                return;
            }
        }
    }
}
