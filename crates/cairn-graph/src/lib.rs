//! cairn-graph: incremental code dependency graph
//!
//! This crate builds and maintains the structural graph behind cairn:
//! - Declaration and import extraction via tree-sitter queries
//! - A File/Code node graph with node-link JSON persistence
//! - Content-hash change detection and incremental update cycles
//! - Project walking, content reading and file watching

pub mod changes;
pub mod language;
pub mod metadata;
pub mod node;
pub mod query;
pub mod reader;
pub mod resolve;
pub mod store;
pub mod updater;
pub mod walker;
pub mod watcher;

pub use changes::{ChangeDetector, ChangeSet};
pub use language::{Grammar, grammar, grammar_for_path, grammars};
pub use metadata::{BuildMetadata, git_revision};
pub use node::{
    CodeKind, CodeNode, Edge, FileNode, FileRecord, GraphNode, Relation, code_node_id,
};
pub use query::{Declaration, QueryEngine, QueryError, QueryOutput, RawImport};
pub use reader::{ContentReadError, ContentReader, FsContentReader};
pub use resolve::ImportResolver;
pub use store::{GraphStats, GraphStore, StoreError};
pub use updater::{GraphUpdater, SkippedFile, UpdateError, UpdateSummary, UpdaterConfig};
pub use walker::{WalkError, WalkOptions, walk};
pub use watcher::{DEFAULT_DEBOUNCE, FileWatcher, WatchError, WatchPoll};
