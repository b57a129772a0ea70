//! Incremental graph maintenance.
//!
//! One update cycle walks the project, diffs content hashes against the
//! persisted graph, purges stale structure, re-extracts added and modified
//! files, re-resolves imports and saves the result. Files that cannot be read
//! or parsed are reported as skipped and left out of the graph, so they are
//! retried on the next cycle.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::changes::{ChangeDetector, ChangeSet};
use crate::metadata::BuildMetadata;
use crate::node::FileRecord;
use crate::query::{QueryEngine, RawImport};
use crate::reader::{ContentReader, FsContentReader};
use crate::resolve::ImportResolver;
use crate::store::{GraphStore, StoreError};
use crate::walker::{self, WalkError, WalkOptions};

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("failed to enumerate project files: {0}")]
    Walk(#[from] WalkError),

    #[error("failed to load baseline graph: {0}")]
    Baseline(#[source] StoreError),

    #[error("graph integrity violation: {0}")]
    Store(#[source] StoreError),

    #[error("failed to save graph: {0}")]
    Save(#[source] StoreError),
}

pub type Result<T> = std::result::Result<T, UpdateError>;

/// Where the updater reads from and writes to.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    pub project_root: PathBuf,
    pub graph_path: PathBuf,
    pub walk: WalkOptions,
}

/// A file left out of this cycle and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Outcome of one update cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub skipped: Vec<SkippedFile>,
    /// Imports across all files that matched no indexed file.
    pub unresolved_imports: usize,
}

impl UpdateSummary {
    pub fn has_changes(&self) -> bool {
        self.added + self.modified + self.deleted > 0
    }
}

impl fmt::Display for UpdateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} modified, {} deleted, {} unchanged, {} skipped, {} unresolved imports",
            self.added,
            self.modified,
            self.deleted,
            self.unchanged,
            self.skipped.len(),
            self.unresolved_imports
        )
    }
}

/// Applies minimal patches to the graph as the project changes.
pub struct GraphUpdater<R = FsContentReader> {
    config: UpdaterConfig,
    engine: QueryEngine,
    reader: R,
}

impl GraphUpdater<FsContentReader> {
    pub fn new(config: UpdaterConfig, engine: QueryEngine) -> Self {
        Self {
            config,
            engine,
            reader: FsContentReader,
        }
    }
}

impl<R: ContentReader> GraphUpdater<R> {
    /// Swap the content reader, e.g. for an in-memory one in tests.
    pub fn with_reader<R2: ContentReader>(self, reader: R2) -> GraphUpdater<R2> {
        GraphUpdater {
            config: self.config,
            engine: self.engine,
            reader,
        }
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Load the persisted graph. A missing document is an empty baseline; a
    /// corrupt one is an error.
    pub fn load_baseline(&self) -> Result<GraphStore> {
        match GraphStore::load(&self.config.graph_path) {
            Ok(store) => Ok(store),
            Err(StoreError::NotFound(path)) => {
                info!(path = %path.display(), "No existing graph, starting from scratch");
                Ok(GraphStore::new())
            }
            Err(e) => Err(UpdateError::Baseline(e)),
        }
    }

    /// Run a full cycle: load, patch, save. Returns the patched graph.
    pub fn update(&mut self) -> Result<(GraphStore, UpdateSummary)> {
        let mut store = self.load_baseline()?;
        let summary = self.apply(&mut store)?;
        store
            .save(&self.config.graph_path)
            .map_err(UpdateError::Save)?;
        Ok((store, summary))
    }

    /// Patch `store` in memory to match the project on disk.
    pub fn apply(&mut self, store: &mut GraphStore) -> Result<UpdateSummary> {
        let start = Instant::now();

        let files = walker::walk(&self.config.project_root, &self.config.walk)?;
        let changes = ChangeDetector::from_store(store).detect(&files);

        let mut summary = UpdateSummary {
            added: changes.added.len(),
            modified: changes.modified.len(),
            deleted: changes.deleted.len(),
            unchanged: changes.unchanged.len(),
            ..UpdateSummary::default()
        };

        if !changes.is_empty() {
            self.patch(store, &files, &changes, &mut summary)?;
        }
        summary.unresolved_imports = store
            .file_nodes()
            .iter()
            .map(|f| f.unresolved_imports.len())
            .sum();

        store.set_metadata(BuildMetadata::now(&self.config.project_root));

        info!(
            added = summary.added,
            modified = summary.modified,
            deleted = summary.deleted,
            unchanged = summary.unchanged,
            skipped = summary.skipped.len(),
            unresolved = summary.unresolved_imports,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Graph update complete"
        );
        Ok(summary)
    }

    fn patch(
        &mut self,
        store: &mut GraphStore,
        files: &[FileRecord],
        changes: &ChangeSet,
        summary: &mut UpdateSummary,
    ) -> Result<()> {
        for path in changes.to_purge() {
            store.remove_file(path);
        }

        let records: HashMap<&str, &FileRecord> =
            files.iter().map(|r| (r.path.as_str(), r)).collect();

        for path in changes.to_parse() {
            let Some(record) = records.get(path.as_str()) else {
                continue;
            };
            if let Err(reason) = self.index_file(store, record)? {
                warn!(path = %path, reason = %reason, "Skipping file");
                summary.skipped.push(SkippedFile {
                    path: path.clone(),
                    reason,
                });
            }
        }

        self.resolve_imports(store)
    }

    /// Extract one file into the graph. The outer error is a graph integrity
    /// violation; the inner one is a per-file failure that skips the file.
    fn index_file(
        &mut self,
        store: &mut GraphStore,
        record: &FileRecord,
    ) -> Result<std::result::Result<(), String>> {
        let relative = Path::new(&record.path);
        let Some(language) = self.engine.language_for_path(relative) else {
            return Ok(Err("no supported language for this file".to_string()));
        };

        let text = match self.reader.read(&self.config.project_root.join(relative)) {
            Ok(text) => text,
            Err(e) => return Ok(Err(e.to_string())),
        };
        let output = match self.engine.parse(&text, language) {
            Ok(output) => output,
            Err(e) => return Ok(Err(e.to_string())),
        };

        store.add_file(record);
        for decl in &output.declarations {
            store
                .add_code(&record.path, decl)
                .map_err(UpdateError::Store)?;
        }

        let mut seen = HashSet::new();
        let imports: Vec<String> = output
            .imports
            .iter()
            .map(RawImport::to_path_string)
            .filter(|raw| seen.insert(raw.clone()))
            .collect();
        store
            .set_file_imports(&record.path, imports)
            .map_err(UpdateError::Store)?;

        debug!(
            path = %record.path,
            language,
            declarations = output.declarations.len(),
            imports = output.imports.len(),
            "Indexed file"
        );
        Ok(Ok(()))
    }

    /// Rebuild every IMPORTS edge from the raw imports recorded on file nodes.
    fn resolve_imports(&self, store: &mut GraphStore) -> Result<()> {
        let files: Vec<(String, Vec<String>)> = store
            .file_nodes()
            .into_iter()
            .map(|f| (f.id.clone(), f.imports.clone()))
            .collect();
        let resolver = ImportResolver::new(files.iter().map(|(id, _)| id.clone()));

        for (id, imports) in files {
            store.clear_dependencies(&id);
            let mut unresolved = Vec::new();
            for raw in imports {
                let targets = resolver.resolve_all(&id, &raw);
                if targets.is_empty() {
                    debug!(file = %id, import = %raw, "Unresolved import");
                    unresolved.push(raw);
                    continue;
                }
                for target in targets {
                    store
                        .add_dependency(&id, &target)
                        .map_err(UpdateError::Store)?;
                }
            }
            store
                .set_unresolved_imports(&id, unresolved)
                .map_err(UpdateError::Store)?;
        }
        Ok(())
    }
}
