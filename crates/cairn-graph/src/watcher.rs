//! Debounced filesystem watching.
//!
//! The watcher only reports which project files changed. The caller decides
//! what to do about it, normally by running one update cycle per batch; the
//! update cycle re-walks the tree, so a spurious path here costs a no-op
//! cycle, never a wrong graph.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, channel};
use std::time::Duration;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebouncedEvent, Debouncer, new_debouncer};
use tracing::{debug, warn};

use crate::walker::{IGNORE_FILE_NAME, WalkOptions, relative_id};

/// Quiet period before a burst of events is delivered.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("filesystem watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("invalid ignore rules: {0}")]
    Ignore(#[from] ignore::Error),
}

pub type Result<T> = std::result::Result<T, WatchError>;

type EventResult = std::result::Result<Vec<DebouncedEvent>, notify::Error>;

/// Outcome of waiting for changes with a timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchPoll {
    /// Relevant project paths changed (sorted, `/`-separated, root-relative).
    Changed(Vec<String>),
    /// Nothing relevant happened before the timeout.
    Idle,
    /// The watcher has stopped.
    Closed,
}

/// Watches a project tree and reports changed source files in batches.
pub struct FileWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    rx: Receiver<EventResult>,
    root: PathBuf,
    options: WalkOptions,
    ignore: Gitignore,
}

impl FileWatcher {
    pub fn new(root: &Path, options: WalkOptions, debounce: Duration) -> Result<Self> {
        let (tx, rx) = channel();
        let mut debouncer = new_debouncer(debounce, tx)?;
        debouncer.watcher().watch(root, RecursiveMode::Recursive)?;

        let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let ignore = build_ignore(&root, &options.ignore_patterns)?;

        debug!(root = %root.display(), "Watching for changes");
        Ok(Self {
            _debouncer: debouncer,
            rx,
            root,
            options,
            ignore,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Block until relevant files change. `None` once the watcher stops.
    pub fn next_batch(&self) -> Option<Vec<String>> {
        loop {
            match self.rx.recv() {
                Ok(events) => {
                    if let Some(batch) = self.relevant(events) {
                        return Some(batch);
                    }
                }
                Err(_) => return None,
            }
        }
    }

    /// Wait at most `timeout` for relevant changes.
    pub fn poll(&self, timeout: Duration) -> WatchPoll {
        match self.rx.recv_timeout(timeout) {
            Ok(events) => match self.relevant(events) {
                Some(batch) => WatchPoll::Changed(batch),
                None => WatchPoll::Idle,
            },
            Err(RecvTimeoutError::Timeout) => WatchPoll::Idle,
            Err(RecvTimeoutError::Disconnected) => WatchPoll::Closed,
        }
    }

    /// Whether a root-relative path would be indexed.
    pub fn is_relevant(&self, relative: &Path) -> bool {
        self.options.accepts_path(relative)
            && !self
                .ignore
                .matched_path_or_any_parents(relative, false)
                .is_ignore()
    }

    fn relevant(&self, events: EventResult) -> Option<Vec<String>> {
        let events = match events {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Watcher reported an error");
                return None;
            }
        };

        let changed: BTreeSet<String> = events
            .into_iter()
            .filter_map(|event| self.relative(&event.path))
            .filter(|rel| self.is_relevant(Path::new(rel)))
            .collect();

        (!changed.is_empty()).then(|| changed.into_iter().collect())
    }

    fn relative(&self, path: &Path) -> Option<String> {
        relative_id(&self.root, path).or_else(|| {
            let canonical = fs::canonicalize(path).ok()?;
            relative_id(&self.root, &canonical)
        })
    }
}

fn build_ignore(root: &Path, extra_patterns: &[String]) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new(root);
    for name in [".gitignore", IGNORE_FILE_NAME] {
        let path = root.join(name);
        if path.exists() {
            if let Some(e) = builder.add(&path) {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable ignore file");
            }
        }
    }
    for pattern in extra_patterns {
        builder.add_line(None, pattern)?;
    }
    Ok(builder.build()?)
}
