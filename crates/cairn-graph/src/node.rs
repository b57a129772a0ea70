//! Graph node and edge types.
//!
//! Nodes are a tagged union of [`FileNode`] and [`CodeNode`]; both are keyed
//! by a string id that is unique across the whole graph. Code node ids are
//! always `{file_id}::{name}`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between a file id and a declaration name in a code node id.
pub const CODE_ID_SEPARATOR: &str = "::";

/// Build the id of a code node declared in `file_id`.
pub fn code_node_id(file_id: &str, name: &str) -> String {
    format!("{file_id}{CODE_ID_SEPARATOR}{name}")
}

/// A file as reported by the walker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Project-root-relative path with `/` separators.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Rough token count used for context budgeting.
    pub token_estimate: u64,
    /// Deterministic fingerprint of the file's bytes.
    pub content_hash: String,
}

/// Kind of a declaration-level code node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeKind {
    Function,
    Class,
}

impl CodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeKind::Function => "function",
            CodeKind::Class => "class",
        }
    }
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source file in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub id: String,
    pub size: u64,
    pub token_estimate: u64,
    pub content_hash: String,
    /// Raw import strings captured on the last parse.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
    /// Imports that did not resolve to an indexed file.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved_imports: Vec<String>,
}

impl From<&FileRecord> for FileNode {
    fn from(record: &FileRecord) -> Self {
        Self {
            id: record.path.clone(),
            size: record.size,
            token_estimate: record.token_estimate,
            content_hash: record.content_hash.clone(),
            imports: Vec::new(),
            unresolved_imports: Vec::new(),
        }
    }
}

/// A function or class declared inside a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeNode {
    pub id: String,
    pub kind: CodeKind,
    pub name: String,
    /// First line, 1-indexed.
    pub start_line: usize,
    /// Last line, 1-indexed and inclusive.
    pub end_line: usize,
    pub summary: Option<String>,
    pub risks: Option<Vec<String>>,
}

impl CodeNode {
    /// Id of the file node that contains this declaration.
    pub fn file_id(&self) -> &str {
        self.id
            .rsplit_once(CODE_ID_SEPARATOR)
            .map(|(file, _)| file)
            .unwrap_or(&self.id)
    }

    /// Whether enrichment has already produced a summary for this node.
    pub fn is_enriched(&self) -> bool {
        self.summary.is_some()
    }
}

/// A node in the code graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphNode {
    File(FileNode),
    Code(CodeNode),
}

impl GraphNode {
    pub fn id(&self) -> &str {
        match self {
            GraphNode::File(f) => &f.id,
            GraphNode::Code(c) => &c.id,
        }
    }

    /// Kind label as persisted: `file`, `function` or `class`.
    pub fn kind_label(&self) -> &'static str {
        match self {
            GraphNode::File(_) => "file",
            GraphNode::Code(c) => c.kind.as_str(),
        }
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            GraphNode::File(f) => Some(f),
            GraphNode::Code(_) => None,
        }
    }

    pub fn as_code(&self) -> Option<&CodeNode> {
        match self {
            GraphNode::Code(c) => Some(c),
            GraphNode::File(_) => None,
        }
    }
}

/// Relationship carried by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relation {
    /// File to code node structural containment.
    Contains,
    /// File to file dependency.
    Imports,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Contains => "CONTAINS",
            Relation::Imports => "IMPORTS",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge weight. At most one edge exists per (source, target, relation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub relation: Relation,
}

impl Edge {
    pub fn new(relation: Relation) -> Self {
        Self { relation }
    }
}
