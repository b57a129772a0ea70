//! Project file enumeration.
//!
//! Ignore rules are layered: built-in directory defaults, then `.gitignore`
//! (honoured even outside a git checkout), then `.cairnignore`, then caller
//! override patterns.

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::language;
use crate::node::FileRecord;

/// Project-level ignore file, same syntax as `.gitignore`.
pub const IGNORE_FILE_NAME: &str = ".cairnignore";

/// Directories never descended into.
pub const DEFAULT_IGNORED_DIRS: &[&str] = &[
    ".git",
    ".cairn",
    "target",
    "node_modules",
    "__pycache__",
    ".venv",
    "dist",
    "build",
];

/// Default size limit for indexed files (1 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error("project root does not exist: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("invalid ignore pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Options controlling which files [`walk`] reports.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Lowercase extensions without the dot.
    pub extensions: Vec<String>,
    /// Extra gitignore-style patterns to exclude.
    pub ignore_patterns: Vec<String>,
    /// Files larger than this are skipped.
    pub max_file_size: u64,
    pub follow_links: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            extensions: language::grammars()
                .iter()
                .flat_map(|g| g.extensions.iter().map(|e| e.to_string()))
                .collect(),
            ignore_patterns: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            follow_links: false,
        }
    }
}

impl WalkOptions {
    /// Cheap pre-filter for a root-relative path: extension allow-list and
    /// built-in directory defaults only. Ignore files are not consulted.
    pub fn accepts_path(&self, relative: &Path) -> bool {
        let in_default_dir = relative.components().any(|c| match c {
            Component::Normal(name) => name
                .to_str()
                .is_some_and(|n| DEFAULT_IGNORED_DIRS.contains(&n)),
            _ => false,
        });
        !in_default_dir && self.has_allowed_extension(relative)
    }

    fn has_allowed_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .is_some_and(|e| self.extensions.iter().any(|allowed| *allowed == e))
    }
}

/// Enumerate indexable files under `root`, sorted by relative path.
pub fn walk(root: &Path, options: &WalkOptions) -> Result<Vec<FileRecord>, WalkError> {
    if !root.is_dir() {
        return Err(WalkError::RootNotFound(root.to_path_buf()));
    }

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(true)
        .require_git(false)
        .follow_links(options.follow_links)
        .add_custom_ignore_filename(IGNORE_FILE_NAME)
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            !(is_dir
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|n| DEFAULT_IGNORED_DIRS.contains(&n)))
        });

    if !options.ignore_patterns.is_empty() {
        let mut overrides = OverrideBuilder::new(root);
        for pattern in &options.ignore_patterns {
            // A leading `!` turns an override glob into an exclusion.
            overrides
                .add(&format!("!{pattern}"))
                .map_err(|e| WalkError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
        }
        let overrides = overrides.build().map_err(|e| WalkError::InvalidPattern {
            pattern: options.ignore_patterns.join(", "),
            message: e.to_string(),
        })?;
        builder.overrides(overrides);
    }

    let mut records = Vec::new();
    let mut seen = HashSet::new();

    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable walk entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }

        let path = entry.path();
        if !options.has_allowed_extension(path) {
            continue;
        }

        let Some(relative) = relative_id(root, path) else {
            continue;
        };
        if !seen.insert(relative.clone()) {
            continue;
        }

        match file_record(path, relative, options.max_file_size) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable file"),
        }
    }

    records.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(root = %root.display(), files = records.len(), "Walked project");
    Ok(records)
}

/// `root`-relative id for `path` using `/` separators.
pub fn relative_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Fingerprint used for change detection.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("xxh3:{:016x}", xxh3_64(bytes))
}

/// Roughly four bytes per token, rounded up.
pub fn token_estimate(size: u64) -> u64 {
    size.div_ceil(4)
}

fn file_record(
    path: &Path,
    relative: String,
    max_file_size: u64,
) -> std::io::Result<Option<FileRecord>> {
    let size = fs::metadata(path)?.len();
    if size > max_file_size {
        debug!(path = %relative, size, limit = max_file_size, "Skipping oversized file");
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    Ok(Some(FileRecord {
        path: relative,
        size: bytes.len() as u64,
        token_estimate: token_estimate(bytes.len() as u64),
        content_hash: content_hash(&bytes),
    }))
}
