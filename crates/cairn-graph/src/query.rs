//! Structural query engine.
//!
//! Each supported language has a tree-sitter query resource (`<id>.scm`)
//! whose captures use a fixed vocabulary:
//!
//! | Capture                | Meaning                                   |
//! |------------------------|-------------------------------------------|
//! | `function.name`        | name of a function declaration            |
//! | `class.name`           | name of a class-like declaration          |
//! | `function.definition`  | optional, the whole function node         |
//! | `class.definition`     | optional, the whole class node            |
//! | `import.module`        | module path of an import                  |
//! | `import.name`          | optional, item imported from that module  |
//!
//! Resources are registered when the engine is built (embedded defaults,
//! then an optional directory of overrides) and compiled lazily, at most once
//! per language per engine.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use streaming_iterator::StreamingIterator;
use thiserror::Error;
use tracing::{debug, trace};

use crate::language::{self, Grammar};
use crate::node::CodeKind;

/// Errors raised by the query engine.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(
        "unsupported language '{language}': no query resource '{resource}' (available: {})",
        .available.join(", ")
    )]
    UnsupportedLanguage {
        language: String,
        resource: String,
        available: Vec<String>,
    },

    #[error("query resource for '{0}' exists but no grammar is compiled in for it")]
    NoGrammar(String),

    #[error("failed to read query resource {path}: {source}")]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compile query for '{language}': {message}")]
    Compile { language: String, message: String },

    #[error("failed to set parser language '{language}': {message}")]
    Language { language: String, message: String },

    #[error("parser produced no tree for '{0}'")]
    ParseFailed(String),
}

pub type Result<T> = std::result::Result<T, QueryError>;

/// A declaration extracted from a syntax tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub kind: CodeKind,
    pub name: String,
    /// 1-indexed.
    pub start_line: usize,
    /// 1-indexed, inclusive.
    pub end_line: usize,
}

/// An import as captured, before resolution against the project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImport {
    pub module: String,
    pub name: Option<String>,
    pub line: usize,
}

impl RawImport {
    /// Single-string form, e.g. `os.path`, `pkg.mod.func` or `..sibling`.
    pub fn to_path_string(&self) -> String {
        match &self.name {
            Some(name) if self.module.ends_with('.') => format!("{}{}", self.module, name),
            Some(name) => format!("{}.{}", self.module, name),
            None => self.module.clone(),
        }
    }
}

/// Result of running a language query over one source text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOutput {
    /// Declarations ordered by position in the source.
    pub declarations: Vec<Declaration>,
    /// Import captures in source order.
    pub imports: Vec<RawImport>,
}

#[derive(Debug, Clone)]
enum QuerySource {
    Embedded(&'static str),
    File(PathBuf),
}

const EMBEDDED_QUERIES: &[(&str, &str)] = &[
    ("c", include_str!("queries/c.scm")),
    ("cpp", include_str!("queries/cpp.scm")),
    ("python", include_str!("queries/python.scm")),
    ("rust", include_str!("queries/rust.scm")),
];

/// Parses source text and runs the language's structural query over it.
pub struct QueryEngine {
    parser: tree_sitter::Parser,
    resources: BTreeMap<String, QuerySource>,
    cache: HashMap<String, tree_sitter::Query>,
}

impl QueryEngine {
    /// Create an engine with the embedded query resources.
    pub fn new() -> Self {
        let resources = EMBEDDED_QUERIES
            .iter()
            .map(|&(id, text)| (id.to_string(), QuerySource::Embedded(text)))
            .collect();

        Self {
            parser: tree_sitter::Parser::new(),
            resources,
            cache: HashMap::new(),
        }
    }

    /// Create an engine whose resources are the embedded ones plus every
    /// `<id>.scm` file in `dir`. Files in `dir` win over embedded resources.
    pub fn with_queries_dir(dir: &Path) -> Result<Self> {
        let mut engine = Self::new();
        let entries = fs::read_dir(dir).map_err(|source| QueryError::Resource {
            path: dir.to_path_buf(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| QueryError::Resource {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("scm") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            debug!(language = id, path = %path.display(), "Registered query resource");
            engine
                .resources
                .insert(id.to_string(), QuerySource::File(path.clone()));
        }

        Ok(engine)
    }

    /// Language ids with both a query resource and a compiled-in grammar,
    /// sorted.
    pub fn list_supported_languages(&self) -> Vec<String> {
        self.resources
            .keys()
            .filter(|id| language::grammar(id).is_some())
            .cloned()
            .collect()
    }

    /// Map a path to a supported language id by its extension.
    pub fn language_for_path(&self, path: &Path) -> Option<&'static str> {
        let grammar = language::grammar_for_path(path)?;
        self.resources.contains_key(grammar.id).then_some(grammar.id)
    }

    /// Number of queries compiled so far.
    pub fn compiled_count(&self) -> usize {
        self.cache.len()
    }

    /// Parse `source` as `language` and extract declarations and imports.
    ///
    /// Syntax errors do not fail the parse; tree-sitter recovers and the
    /// query yields whatever structure survived.
    pub fn parse(&mut self, source: &str, language: &str) -> Result<QueryOutput> {
        let resource = self.resources.get(language).ok_or_else(|| {
            QueryError::UnsupportedLanguage {
                language: language.to_string(),
                resource: format!("{language}.scm"),
                available: self.list_supported_languages(),
            }
        })?;
        let grammar =
            language::grammar(language).ok_or_else(|| QueryError::NoGrammar(language.to_string()))?;

        let query = compiled_query(&mut self.cache, language, resource, grammar)?;

        let ts_language = grammar.tree_sitter_language();
        self.parser
            .set_language(&ts_language)
            .map_err(|e| QueryError::Language {
                language: language.to_string(),
                message: e.to_string(),
            })?;
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| QueryError::ParseFailed(language.to_string()))?;

        if tree.root_node().has_error() {
            debug!(language, "Source has syntax errors, extracting partial structure");
        }

        Ok(run_query(query, &tree, source.as_bytes()))
    }
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetch the compiled query for `language`, compiling it on first use.
fn compiled_query<'c>(
    cache: &'c mut HashMap<String, tree_sitter::Query>,
    language: &str,
    resource: &QuerySource,
    grammar: &Grammar,
) -> Result<&'c tree_sitter::Query> {
    if !cache.contains_key(language) {
        let text = match resource {
            QuerySource::Embedded(text) => (*text).to_string(),
            QuerySource::File(path) => {
                fs::read_to_string(path).map_err(|source| QueryError::Resource {
                    path: path.clone(),
                    source,
                })?
            }
        };
        let query = tree_sitter::Query::new(&grammar.tree_sitter_language(), &text).map_err(
            |e| QueryError::Compile {
                language: language.to_string(),
                message: e.to_string(),
            },
        )?;
        debug!(language, patterns = query.pattern_count(), "Compiled query");
        cache.insert(language.to_string(), query);
    }

    cache
        .get(language)
        .ok_or_else(|| QueryError::ParseFailed(language.to_string()))
}

fn run_query(query: &tree_sitter::Query, tree: &tree_sitter::Tree, source: &[u8]) -> QueryOutput {
    let mut output = QueryOutput::default();
    let names = query.capture_names();

    let mut cursor = tree_sitter::QueryCursor::new();
    let mut matches = cursor.matches(query, tree.root_node(), source);

    while let Some(match_) = matches.next() {
        let mut definition = None;
        let mut declared: Option<(CodeKind, tree_sitter::Node)> = None;
        let mut module = None;
        let mut imported_name = None;

        for capture in match_.captures {
            let node = capture.node;
            match names[capture.index as usize] {
                "function.name" => declared = Some((CodeKind::Function, node)),
                "class.name" => declared = Some((CodeKind::Class, node)),
                "function.definition" | "class.definition" => definition = Some(node),
                "import.module" => module = Some(node),
                "import.name" => imported_name = Some(node),
                other => trace!(capture = other, "Ignoring capture"),
            }
        }

        if let Some((kind, name_node)) = declared {
            let span = definition.or_else(|| name_node.parent()).unwrap_or(name_node);
            let name = node_text(name_node, source);
            if !name.is_empty() {
                let (start_line, end_line) = line_range(span);
                output.declarations.push(Declaration {
                    kind,
                    name,
                    start_line,
                    end_line,
                });
            }
        }

        if let Some(module_node) = module {
            let module = node_text(module_node, source);
            if !module.is_empty() {
                output.imports.push(RawImport {
                    module,
                    name: imported_name.map(|n| node_text(n, source)),
                    line: module_node.start_position().row + 1,
                });
            }
        }
    }

    output
        .declarations
        .sort_by_key(|d| (d.start_line, d.end_line));
    output.declarations.dedup();
    output.imports.sort_by_key(|i| i.line);
    output.imports.dedup();
    output
}

/// 1-indexed inclusive line range of a node. A node ending at column 0 has
/// its last content on the previous row.
fn line_range(node: tree_sitter::Node) -> (usize, usize) {
    let start = node.start_position().row;
    let end = node.end_position();
    let end_row = if end.column == 0 && end.row > start {
        end.row - 1
    } else {
        end.row
    };
    (start + 1, end_row + 1)
}

fn node_text(node: tree_sitter::Node, source: &[u8]) -> String {
    node.utf8_text(source).unwrap_or("").trim().to_string()
}
