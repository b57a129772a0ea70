//! In-memory code graph with node-link JSON persistence.
//!
//! The graph is a `StableDiGraph` so node indices survive removals, plus an
//! id → index map. All referential-integrity checks live here: code nodes
//! need their file, edges need both endpoints, and re-inserting an id or an
//! edge replaces it in place.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metadata::BuildMetadata;
use crate::node::{
    CODE_ID_SEPARATOR, CodeKind, CodeNode, Edge, FileNode, FileRecord, GraphNode, Relation,
    code_node_id,
};
use crate::query::Declaration;

/// Error type for graph store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("parent file node '{0}' does not exist")]
    MissingParent(String),

    #[error("node '{0}' does not exist")]
    MissingNode(String),

    #[error("node '{0}' is not a {1} node")]
    WrongKind(String, &'static str),

    #[error("graph document not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("graph document {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize graph: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Node and edge counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    /// Counts keyed by `file`, `function`, `class`.
    pub nodes_by_kind: BTreeMap<String, usize>,
    /// Counts keyed by `CONTAINS`, `IMPORTS`.
    pub edges_by_relation: BTreeMap<String, usize>,
}

/// The code graph.
#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    graph: StableDiGraph<GraphNode, Edge>,
    index: HashMap<String, NodeIndex>,
    metadata: Option<BuildMetadata>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a file node. Existing attributes are replaced
    /// wholesale, including recorded imports.
    pub fn add_file(&mut self, record: &FileRecord) {
        self.upsert_node(GraphNode::File(FileNode::from(record)));
    }

    /// Insert or replace a declaration under `file_id` and link it with a
    /// CONTAINS edge. Returns the code node id.
    pub fn add_code(&mut self, file_id: &str, decl: &Declaration) -> Result<String> {
        let parent = self
            .file_index(file_id)
            .ok_or_else(|| StoreError::MissingParent(file_id.to_string()))?;

        let id = code_node_id(file_id, &decl.name);
        let child = self.upsert_node(GraphNode::Code(CodeNode {
            id: id.clone(),
            kind: decl.kind,
            name: decl.name.clone(),
            start_line: decl.start_line,
            end_line: decl.end_line,
            summary: None,
            risks: None,
        }));
        self.upsert_edge(parent, child, Edge::new(Relation::Contains));
        Ok(id)
    }

    /// Insert or replace an IMPORTS edge between two existing nodes.
    pub fn add_dependency(&mut self, source_id: &str, target_id: &str) -> Result<()> {
        let source = self.lookup(source_id)?;
        let target = self.lookup(target_id)?;
        self.upsert_edge(source, target, Edge::new(Relation::Imports));
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// All file nodes, sorted by id.
    pub fn file_nodes(&self) -> Vec<&FileNode> {
        let mut files: Vec<_> = self
            .graph
            .node_weights()
            .filter_map(GraphNode::as_file)
            .collect();
        files.sort_by(|a, b| a.id.cmp(&b.id));
        files
    }

    /// All code nodes, sorted by id.
    pub fn code_nodes(&self) -> Vec<&CodeNode> {
        let mut code: Vec<_> = self
            .graph
            .node_weights()
            .filter_map(GraphNode::as_code)
            .collect();
        code.sort_by(|a, b| a.id.cmp(&b.id));
        code
    }

    /// Code nodes contained in `file_id`, in source order.
    pub fn code_nodes_in_file(&self, file_id: &str) -> Vec<&CodeNode> {
        let Some(idx) = self.file_index(file_id) else {
            return Vec::new();
        };
        let mut code: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|e| e.weight().relation == Relation::Contains)
            .filter_map(|e| self.graph[e.target()].as_code())
            .collect();
        code.sort_by_key(|c| (c.start_line, c.end_line));
        code
    }

    /// Ids of files imported by `file_id`, sorted.
    pub fn imports_of(&self, file_id: &str) -> Vec<&str> {
        self.neighbors(file_id, Direction::Outgoing)
    }

    /// Ids of files that import `file_id`, sorted.
    pub fn importers_of(&self, file_id: &str) -> Vec<&str> {
        self.neighbors(file_id, Direction::Incoming)
    }

    /// Content hash of every file node, keyed by file id.
    pub fn file_hashes(&self) -> HashMap<String, String> {
        self.graph
            .node_weights()
            .filter_map(GraphNode::as_file)
            .map(|f| (f.id.clone(), f.content_hash.clone()))
            .collect()
    }

    /// Record the raw import strings captured for a file.
    pub fn set_file_imports(&mut self, file_id: &str, imports: Vec<String>) -> Result<()> {
        self.file_mut(file_id)?.imports = imports;
        Ok(())
    }

    /// Record which of a file's imports did not resolve.
    pub fn set_unresolved_imports(&mut self, file_id: &str, unresolved: Vec<String>) -> Result<()> {
        self.file_mut(file_id)?.unresolved_imports = unresolved;
        Ok(())
    }

    /// Drop every IMPORTS edge leaving `file_id`. Returns how many were removed.
    pub fn clear_dependencies(&mut self, file_id: &str) -> usize {
        let Some(idx) = self.file_index(file_id) else {
            return 0;
        };
        let edges: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|e| e.weight().relation == Relation::Imports)
            .map(|e| e.id())
            .collect();
        for edge in &edges {
            self.graph.remove_edge(*edge);
        }
        edges.len()
    }

    /// Remove a file node, every code node under it, and every edge touching
    /// any of them. Returns the number of nodes removed.
    pub fn remove_file(&mut self, file_id: &str) -> usize {
        let prefix = format!("{file_id}{CODE_ID_SEPARATOR}");
        let doomed: Vec<String> = self
            .index
            .keys()
            .filter(|id| id.as_str() == file_id || id.starts_with(&prefix))
            .cloned()
            .collect();

        for id in &doomed {
            if let Some(idx) = self.index.remove(id) {
                self.graph.remove_node(idx);
            }
        }

        if !doomed.is_empty() {
            debug!(file = file_id, removed = doomed.len(), "Removed file from graph");
        }
        doomed.len()
    }

    /// Attach enrichment results to a code node.
    pub fn set_enrichment(&mut self, id: &str, summary: String, risks: Vec<String>) -> Result<()> {
        let idx = self.lookup(id)?;
        match &mut self.graph[idx] {
            GraphNode::Code(code) => {
                code.summary = Some(summary);
                code.risks = Some(risks);
                Ok(())
            }
            GraphNode::File(_) => Err(StoreError::WrongKind(id.to_string(), "code")),
        }
    }

    pub fn metadata(&self) -> Option<&BuildMetadata> {
        self.metadata.as_ref()
    }

    pub fn set_metadata(&mut self, metadata: BuildMetadata) {
        self.metadata = Some(metadata);
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            nodes: self.graph.node_count(),
            edges: self.graph.edge_count(),
            ..GraphStats::default()
        };
        for node in self.graph.node_weights() {
            *stats.nodes_by_kind.entry(node.kind_label().to_string()).or_default() += 1;
        }
        for edge in self.graph.edge_weights() {
            *stats
                .edges_by_relation
                .entry(edge.relation.as_str().to_string())
                .or_default() += 1;
        }
        stats
    }

    /// One node and every edge touching it, in the persisted document shape.
    pub fn describe(&self, id: &str) -> Result<serde_json::Value> {
        let idx = self.lookup(id)?;
        let mut edges: Vec<EdgeDocument> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .chain(self.graph.edges_directed(idx, Direction::Incoming))
            .map(|e| EdgeDocument {
                source: self.graph[e.source()].id().to_string(),
                target: self.graph[e.target()].id().to_string(),
                edge: e.weight().clone(),
            })
            .collect();
        edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));

        let node = serde_json::to_value(NodeDocument::from(&self.graph[idx]))?;
        let edges = serde_json::to_value(edges)?;
        Ok(serde_json::json!({ "node": node, "edges": edges }))
    }

    /// Write the graph as a node-link JSON document.
    ///
    /// The document is written to a sibling temp file and renamed over
    /// `path`, so readers never observe a half-written graph.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(&self.to_document())?;

        let mut tmp = OsString::from(path.as_os_str());
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), nodes = self.graph.node_count(), "Saved graph");
        Ok(())
    }

    /// Read a graph previously written by [`GraphStore::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(path.to_path_buf()));
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let corrupt = |reason: String| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };

        let doc: GraphDocument = serde_json::from_str(&text).map_err(|e| corrupt(e.to_string()))?;
        let store = Self::from_document(doc).map_err(|e| corrupt(e.to_string()))?;

        debug!(path = %path.display(), nodes = store.graph.node_count(), "Loaded graph");
        Ok(store)
    }

    fn from_document(doc: GraphDocument) -> Result<Self> {
        let mut store = Self {
            metadata: doc.graph,
            ..Self::default()
        };

        // Files first so code nodes always find their parent.
        let (files, code): (Vec<_>, Vec<_>) = doc
            .nodes
            .into_iter()
            .partition(|n| matches!(n, NodeDocument::File(_)));

        for node in files.into_iter().chain(code) {
            let node = GraphNode::from(node);
            if let GraphNode::Code(c) = &node {
                if store.file_index(c.file_id()).is_none() {
                    return Err(StoreError::MissingParent(c.file_id().to_string()));
                }
            }
            store.upsert_node(node);
        }

        for edge in doc.edges {
            let source = store.lookup(&edge.source)?;
            let target = store.lookup(&edge.target)?;
            store.upsert_edge(source, target, edge.edge);
        }

        Ok(store)
    }

    fn to_document(&self) -> GraphDocument {
        let mut nodes: Vec<NodeDocument> =
            self.graph.node_weights().map(NodeDocument::from).collect();
        nodes.sort_by(|a, b| a.id().cmp(b.id()));

        let mut edges: Vec<EdgeDocument> = self
            .graph
            .edge_references()
            .map(|e| EdgeDocument {
                source: self.graph[e.source()].id().to_string(),
                target: self.graph[e.target()].id().to_string(),
                edge: e.weight().clone(),
            })
            .collect();
        edges.sort_by(|a, b| {
            (&a.source, &a.target, a.edge.relation).cmp(&(&b.source, &b.target, b.edge.relation))
        });

        GraphDocument {
            directed: true,
            multigraph: false,
            graph: self.metadata.clone(),
            nodes,
            edges,
        }
    }

    fn upsert_node(&mut self, node: GraphNode) -> NodeIndex {
        if let Some(&idx) = self.index.get(node.id()) {
            self.graph[idx] = node;
            return idx;
        }
        let id = node.id().to_string();
        let idx = self.graph.add_node(node);
        self.index.insert(id, idx);
        idx
    }

    fn upsert_edge(&mut self, source: NodeIndex, target: NodeIndex, edge: Edge) {
        let existing = self
            .graph
            .edges_directed(source, Direction::Outgoing)
            .find(|e| e.target() == target && e.weight().relation == edge.relation)
            .map(|e| e.id());

        match existing {
            Some(id) => self.graph[id] = edge,
            None => {
                self.graph.add_edge(source, target, edge);
            }
        }
    }

    fn lookup(&self, id: &str) -> Result<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| StoreError::MissingNode(id.to_string()))
    }

    fn file_index(&self, file_id: &str) -> Option<NodeIndex> {
        let idx = *self.index.get(file_id)?;
        matches!(self.graph[idx], GraphNode::File(_)).then_some(idx)
    }

    fn file_mut(&mut self, file_id: &str) -> Result<&mut FileNode> {
        let idx = self.lookup(file_id)?;
        match &mut self.graph[idx] {
            GraphNode::File(file) => Ok(file),
            GraphNode::Code(_) => Err(StoreError::WrongKind(file_id.to_string(), "file")),
        }
    }

    fn neighbors(&self, file_id: &str, direction: Direction) -> Vec<&str> {
        let Some(idx) = self.file_index(file_id) else {
            return Vec::new();
        };
        let mut ids: Vec<&str> = self
            .graph
            .edges_directed(idx, direction)
            .filter(|e| e.weight().relation == Relation::Imports)
            .map(|e| {
                let other = match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                self.graph[other].id()
            })
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Graphs are equal when their documents are: same nodes with the same
/// attributes, same edges, same metadata. Insertion order is irrelevant.
impl PartialEq for GraphStore {
    fn eq(&self, other: &Self) -> bool {
        self.to_document() == other.to_document()
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct GraphDocument {
    #[serde(default = "default_directed")]
    directed: bool,
    #[serde(default)]
    multigraph: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    graph: Option<BuildMetadata>,
    nodes: Vec<NodeDocument>,
    edges: Vec<EdgeDocument>,
}

fn default_directed() -> bool {
    true
}

/// A node flattened to `{"kind": ..., "id": ..., ...attributes}`.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum NodeDocument {
    File(FileNode),
    Function(CodeAttributes),
    Class(CodeAttributes),
}

impl NodeDocument {
    fn id(&self) -> &str {
        match self {
            NodeDocument::File(f) => &f.id,
            NodeDocument::Function(c) | NodeDocument::Class(c) => &c.id,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct CodeAttributes {
    id: String,
    name: String,
    start_line: usize,
    end_line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    risks: Option<Vec<String>>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct EdgeDocument {
    source: String,
    target: String,
    #[serde(flatten)]
    edge: Edge,
}

impl From<&GraphNode> for NodeDocument {
    fn from(node: &GraphNode) -> Self {
        match node {
            GraphNode::File(f) => NodeDocument::File(f.clone()),
            GraphNode::Code(c) => {
                let attrs = CodeAttributes {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    start_line: c.start_line,
                    end_line: c.end_line,
                    summary: c.summary.clone(),
                    risks: c.risks.clone(),
                };
                match c.kind {
                    CodeKind::Function => NodeDocument::Function(attrs),
                    CodeKind::Class => NodeDocument::Class(attrs),
                }
            }
        }
    }
}

impl From<NodeDocument> for GraphNode {
    fn from(doc: NodeDocument) -> Self {
        let (kind, attrs) = match doc {
            NodeDocument::File(f) => return GraphNode::File(f),
            NodeDocument::Function(attrs) => (CodeKind::Function, attrs),
            NodeDocument::Class(attrs) => (CodeKind::Class, attrs),
        };
        GraphNode::Code(CodeNode {
            id: attrs.id,
            kind,
            name: attrs.name,
            start_line: attrs.start_line,
            end_line: attrs.end_line,
            summary: attrs.summary,
            risks: attrs.risks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, hash: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            size: 120,
            token_estimate: 30,
            content_hash: hash.to_string(),
        }
    }

    fn decl(name: &str, kind: CodeKind, start: usize, end: usize) -> Declaration {
        Declaration {
            kind,
            name: name.to_string(),
            start_line: start,
            end_line: end,
        }
    }

    fn sample_store() -> GraphStore {
        let mut store = GraphStore::new();
        store.add_file(&record("pkg/a.py", "xxh3:000000000000000a"));
        store.add_file(&record("pkg/b.py", "xxh3:000000000000000b"));
        store
            .add_code("pkg/a.py", &decl("Parser", CodeKind::Class, 1, 20))
            .unwrap();
        store
            .add_code("pkg/a.py", &decl("parse", CodeKind::Function, 3, 8))
            .unwrap();
        store
            .add_code("pkg/b.py", &decl("main", CodeKind::Function, 1, 4))
            .unwrap();
        store.add_dependency("pkg/b.py", "pkg/a.py").unwrap();
        store
    }

    #[test]
    fn test_add_file_is_idempotent() {
        let mut store = GraphStore::new();
        store.add_file(&record("a.py", "xxh3:0000000000000001"));
        store.add_file(&record("a.py", "xxh3:0000000000000002"));

        assert_eq!(store.stats().nodes, 1);
        let file = store.node("a.py").and_then(GraphNode::as_file).unwrap();
        assert_eq!(file.content_hash, "xxh3:0000000000000002");
    }

    #[test]
    fn test_add_code_creates_contains_edge() {
        let mut store = GraphStore::new();
        store.add_file(&record("a.py", "h"));
        let id = store
            .add_code("a.py", &decl("f", CodeKind::Function, 1, 1))
            .unwrap();

        assert_eq!(id, "a.py::f");
        let stats = store.stats();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.edges, 1);
        assert_eq!(stats.edges_by_relation.get("CONTAINS"), Some(&1));

        let code = store.code_nodes_in_file("a.py");
        assert_eq!(code.len(), 1);
        assert_eq!(code[0].id, "a.py::f");
    }

    #[test]
    fn test_add_code_twice_replaces_node_and_edge() {
        let mut store = GraphStore::new();
        store.add_file(&record("a.py", "h"));
        store
            .add_code("a.py", &decl("f", CodeKind::Function, 1, 2))
            .unwrap();
        store
            .add_code("a.py", &decl("f", CodeKind::Function, 5, 9))
            .unwrap();

        let stats = store.stats();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.edges, 1);
        let code = store.node("a.py::f").and_then(GraphNode::as_code).unwrap();
        assert_eq!((code.start_line, code.end_line), (5, 9));
    }

    #[test]
    fn test_add_code_missing_parent() {
        let mut store = GraphStore::new();
        store.add_file(&record("a.py", "h"));
        let before = store.stats();

        let err = store
            .add_code("missing.py", &decl("f", CodeKind::Function, 1, 1))
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingParent(ref id) if id == "missing.py"));
        assert_eq!(store.stats(), before);
        assert!(!store.contains("missing.py::f"));
    }

    #[test]
    fn test_add_dependency_missing_node() {
        let mut store = GraphStore::new();
        store.add_file(&record("a.py", "h"));

        let err = store.add_dependency("a.py", "b.py").unwrap_err();
        assert!(matches!(err, StoreError::MissingNode(ref id) if id == "b.py"));
        let err = store.add_dependency("c.py", "a.py").unwrap_err();
        assert!(matches!(err, StoreError::MissingNode(ref id) if id == "c.py"));
        assert_eq!(store.stats().edges, 0);
        assert!(!store.contains("b.py"));
    }

    #[test]
    fn test_add_dependency_is_idempotent() {
        let mut store = sample_store();
        let before = store.stats().edges;
        store.add_dependency("pkg/b.py", "pkg/a.py").unwrap();
        assert_eq!(store.stats().edges, before);
        assert_eq!(store.imports_of("pkg/b.py"), vec!["pkg/a.py"]);
        assert_eq!(store.importers_of("pkg/a.py"), vec!["pkg/b.py"]);
    }

    #[test]
    fn test_clear_dependencies() {
        let mut store = sample_store();
        assert_eq!(store.clear_dependencies("pkg/b.py"), 1);
        assert!(store.imports_of("pkg/b.py").is_empty());
        assert_eq!(store.stats().edges_by_relation.get("CONTAINS"), Some(&3));
        assert_eq!(store.clear_dependencies("missing.py"), 0);
    }

    #[test]
    fn test_remove_file_purges_code_and_edges() {
        let mut store = sample_store();
        let removed = store.remove_file("pkg/a.py");

        assert_eq!(removed, 3);
        assert!(!store.contains("pkg/a.py"));
        assert!(!store.contains("pkg/a.py::parse"));
        assert!(store.contains("pkg/b.py::main"));
        assert!(store.imports_of("pkg/b.py").is_empty());

        let stats = store.stats();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.edges, 1);
    }

    #[test]
    fn test_remove_file_does_not_touch_prefix_siblings() {
        let mut store = GraphStore::new();
        store.add_file(&record("a.py", "h"));
        store.add_file(&record("a.pyi", "h"));
        store
            .add_code("a.pyi", &decl("f", CodeKind::Function, 1, 1))
            .unwrap();

        assert_eq!(store.remove_file("a.py"), 1);
        assert!(store.contains("a.pyi::f"));
    }

    #[test]
    fn test_stats_by_kind() {
        let stats = sample_store().stats();
        assert_eq!(stats.nodes, 5);
        assert_eq!(stats.edges, 4);
        assert_eq!(stats.nodes_by_kind.get("file"), Some(&2));
        assert_eq!(stats.nodes_by_kind.get("function"), Some(&2));
        assert_eq!(stats.nodes_by_kind.get("class"), Some(&1));
        assert_eq!(stats.edges_by_relation.get("IMPORTS"), Some(&1));
    }

    #[test]
    fn test_enrichment_set_and_clear() {
        let mut store = sample_store();
        store
            .set_enrichment("pkg/a.py::parse", "Parses input".into(), vec!["panics on empty".into()])
            .unwrap();

        let code = store
            .node("pkg/a.py::parse")
            .and_then(GraphNode::as_code)
            .unwrap();
        assert_eq!(code.summary.as_deref(), Some("Parses input"));
        assert!(code.is_enriched());

        assert!(matches!(
            store.set_enrichment("pkg/a.py", "x".into(), vec![]),
            Err(StoreError::WrongKind(..))
        ));
        assert!(matches!(
            store.set_enrichment("nope", "x".into(), vec![]),
            Err(StoreError::MissingNode(_))
        ));

    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/graph.json");

        let mut store = sample_store();
        store
            .set_enrichment("pkg/b.py::main", "Entry point".into(), vec![])
            .unwrap();
        store.set_file_imports("pkg/b.py", vec!["pkg.a".into(), "os".into()]).unwrap();
        store.set_unresolved_imports("pkg/b.py", vec!["os".into()]).unwrap();
        store.set_metadata(BuildMetadata {
            last_build: chrono::Utc::now(),
            revision: Some("abc123".into()),
        });
        store.save(&path).unwrap();

        let loaded = GraphStore::load(&path).unwrap();
        assert_eq!(loaded, store);
        assert_eq!(loaded.stats(), store.stats());
        assert!(!dir.path().join("nested/graph.json.tmp").exists());
    }

    #[test]
    fn test_round_trip_independent_of_insertion_order() {
        let mut reversed = GraphStore::new();
        reversed.add_file(&record("pkg/b.py", "xxh3:000000000000000b"));
        reversed.add_file(&record("pkg/a.py", "xxh3:000000000000000a"));
        reversed.add_dependency("pkg/b.py", "pkg/a.py").unwrap();
        reversed
            .add_code("pkg/b.py", &decl("main", CodeKind::Function, 1, 4))
            .unwrap();
        reversed
            .add_code("pkg/a.py", &decl("parse", CodeKind::Function, 3, 8))
            .unwrap();
        reversed
            .add_code("pkg/a.py", &decl("Parser", CodeKind::Class, 1, 20))
            .unwrap();

        assert_eq!(reversed, sample_store());
    }

    #[test]
    fn test_saved_document_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        sample_store().save(&path).unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["directed"], true);
        assert_eq!(doc["nodes"][0]["id"], "pkg/a.py");
        assert_eq!(doc["nodes"][0]["kind"], "file");
        assert_eq!(doc["nodes"][1]["kind"], "class");
        let edge = &doc["edges"][0];
        assert!(edge["source"].is_string());
        assert!(edge["relation"].is_string());
    }

    #[test]
    fn test_describe_node() {
        let store = sample_store();

        let file = store.describe("pkg/a.py").unwrap();
        assert_eq!(file["node"]["kind"], "file");
        let edges = file["edges"].as_array().unwrap();
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[0]["source"], "pkg/a.py");
        assert_eq!(edges[0]["target"], "pkg/a.py::Parser");
        assert_eq!(edges[2]["source"], "pkg/b.py");
        assert_eq!(edges[2]["relation"], "IMPORTS");

        let code = store.describe("pkg/b.py::main").unwrap();
        assert_eq!(code["node"]["kind"], "function");
        assert_eq!(code["node"]["start_line"], 1);
        assert_eq!(code["edges"][0]["relation"], "CONTAINS");

        assert!(matches!(
            store.describe("pkg/c.py"),
            Err(StoreError::MissingNode(_))
        ));
    }

    #[test]
    fn test_load_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = GraphStore::load(&dir.path().join("graph.json")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_load_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");

        fs::write(&path, "not json").unwrap();
        assert!(matches!(GraphStore::load(&path), Err(StoreError::Corrupt { .. })));

        fs::write(&path, r#"{"nodes": []}"#).unwrap();
        assert!(matches!(GraphStore::load(&path), Err(StoreError::Corrupt { .. })));

        fs::write(
            &path,
            r#"{"nodes": [{"kind": "function", "id": "x.py::f", "name": "f", "start_line": 1, "end_line": 1}], "edges": []}"#,
        )
        .unwrap();
        assert!(matches!(GraphStore::load(&path), Err(StoreError::Corrupt { .. })));

        fs::write(
            &path,
            r#"{"nodes": [{"kind": "file", "id": "x.py", "size": 1, "token_estimate": 1, "content_hash": "h"}], "edges": [{"source": "x.py", "target": "y.py", "relation": "IMPORTS"}]}"#,
        )
        .unwrap();
        assert!(matches!(GraphStore::load(&path), Err(StoreError::Corrupt { .. })));
    }
}
