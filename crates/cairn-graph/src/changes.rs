//! Content-hash change detection.

use std::collections::{HashMap, HashSet};

use crate::node::FileRecord;
use crate::store::GraphStore;

/// Every path from the baseline and the current file set, classified.
///
/// Each list is sorted and the four lists are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ChangeSet {
    /// True when nothing was added, modified or deleted.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Paths whose structure must be (re)extracted.
    pub fn to_parse(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(self.modified.iter())
    }

    /// Paths whose existing structure must be purged.
    pub fn to_purge(&self) -> impl Iterator<Item = &String> {
        self.modified.iter().chain(self.deleted.iter())
    }
}

/// Compares a baseline of per-file hashes against a fresh file set.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    baseline: HashMap<String, String>,
}

impl ChangeDetector {
    pub fn new(baseline: HashMap<String, String>) -> Self {
        Self { baseline }
    }

    /// Use the hashes recorded on the graph's file nodes as the baseline.
    pub fn from_store(store: &GraphStore) -> Self {
        Self::new(store.file_hashes())
    }

    pub fn detect(&self, current: &[FileRecord]) -> ChangeSet {
        let mut changes = ChangeSet::default();
        let mut seen = HashSet::with_capacity(current.len());

        for record in current {
            if !seen.insert(record.path.as_str()) {
                continue;
            }
            match self.baseline.get(&record.path) {
                None => changes.added.push(record.path.clone()),
                Some(hash) if *hash == record.content_hash => {
                    changes.unchanged.push(record.path.clone())
                }
                Some(_) => changes.modified.push(record.path.clone()),
            }
        }

        changes.deleted = self
            .baseline
            .keys()
            .filter(|path| !seen.contains(path.as_str()))
            .cloned()
            .collect();

        changes.added.sort();
        changes.modified.sort();
        changes.deleted.sort();
        changes.unchanged.sort();
        changes
    }
}
