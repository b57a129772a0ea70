//! Prompt construction for enrichment batches.

use std::collections::HashMap;
use std::path::Path;

use cairn_graph::{CodeNode, ContentReader, grammar_for_path};
use tracing::debug;

/// System instruction sent with every batch.
pub const SYSTEM_INSTRUCTION: &str = "\
You document source code for engineers who are new to a codebase. \
For every node below, write a one or two sentence summary of what it does \
and list concrete risks a maintainer should know about (error handling gaps, \
concurrency hazards, unchecked input, surprising side effects). Use an empty \
list when there are none.

Reply with a JSON array only, one object per node, shaped as:
[{\"node_id\": \"<id exactly as given>\", \"summary\": \"...\", \"risks\": [\"...\"]}]";

/// Prefix of the line that names a node in a prompt block.
pub const NODE_LINE_PREFIX: &str = "Node: ";

const MISSING_SOURCE: &str = "(source unavailable)";

/// One node as it is described to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptNode {
    pub id: String,
    pub kind: &'static str,
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
    /// Fence label for the snippet, usually the language id.
    pub language: Option<&'static str>,
    pub snippet: Option<String>,
}

impl PromptNode {
    /// Describe `node` without source text.
    pub fn metadata_only(node: &CodeNode) -> Self {
        Self {
            id: node.id.clone(),
            kind: node.kind.as_str(),
            name: node.name.clone(),
            start_line: node.start_line,
            end_line: node.end_line,
            language: grammar_for_path(Path::new(node.file_id())).map(|g| g.id),
            snippet: None,
        }
    }

    fn render(&self, out: &mut String) {
        out.push_str(NODE_LINE_PREFIX);
        out.push_str(&self.id);
        out.push('\n');
        out.push_str(&format!("Kind: {}\n", self.kind));
        out.push_str(&format!("Name: {}\n", self.name));
        out.push_str(&format!("Lines: {}-{}\n", self.start_line, self.end_line));
        out.push_str("Source:\n");
        match &self.snippet {
            Some(snippet) => {
                out.push_str("```");
                out.push_str(self.language.unwrap_or_default());
                out.push('\n');
                out.push_str(snippet);
                if !snippet.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str("```\n");
            }
            None => {
                out.push_str(MISSING_SOURCE);
                out.push('\n');
            }
        }
    }
}

/// Describes nodes with their source lines, reading each owning file at
/// most once.
///
/// Never fails: anything that prevents reading a snippet is logged and the
/// node is described by its metadata alone.
pub struct SnippetSource<'r> {
    reader: &'r dyn ContentReader,
    project_root: Option<&'r Path>,
    max_lines: usize,
    /// File id → decoded content, `None` when the read failed.
    files: HashMap<String, Option<String>>,
}

impl<'r> SnippetSource<'r> {
    pub fn new(
        reader: &'r dyn ContentReader,
        project_root: Option<&'r Path>,
        max_lines: usize,
    ) -> Self {
        Self {
            reader,
            project_root,
            max_lines,
            files: HashMap::new(),
        }
    }

    pub fn describe(&mut self, node: &CodeNode) -> PromptNode {
        let mut prompt_node = PromptNode::metadata_only(node);
        let max_lines = self.max_lines;
        let Some(content) = self.content(node.file_id()) else {
            return prompt_node;
        };

        match slice_lines(content, node.start_line, node.end_line) {
            Some(lines) => prompt_node.snippet = Some(truncate_lines(&lines, max_lines)),
            None => debug!(
                node = %node.id,
                start = node.start_line,
                end = node.end_line,
                "Line range outside file, describing node without source"
            ),
        }
        prompt_node
    }

    /// Number of distinct files looked up so far.
    pub fn files_loaded(&self) -> usize {
        self.files.len()
    }

    fn content(&mut self, file_id: &str) -> Option<&str> {
        let root = self.project_root?;
        let reader = self.reader;
        self.files
            .entry(file_id.to_string())
            .or_insert_with(|| match reader.read(&root.join(file_id)) {
                Ok(content) => Some(content),
                Err(e) => {
                    debug!(
                        file = file_id,
                        error = %e,
                        "Source unreadable, describing its nodes without source"
                    );
                    None
                }
            })
            .as_deref()
    }
}

/// Render the user prompt for one batch.
pub fn build_prompt(nodes: &[PromptNode]) -> String {
    let mut out = format!("Describe these {} code nodes.\n", nodes.len());
    for node in nodes {
        out.push('\n');
        node.render(&mut out);
    }
    out
}

/// Lines `start..=end` (1-indexed) of `content`. The end is clamped to the
/// file; a start past the end of the file yields `None`.
fn slice_lines(content: &str, start: usize, end: usize) -> Option<Vec<&str>> {
    if start == 0 || end < start {
        return None;
    }
    let lines: Vec<&str> = content
        .lines()
        .skip(start - 1)
        .take(end - start + 1)
        .collect();
    (!lines.is_empty()).then_some(lines)
}

/// Join `lines`, cutting anything past `max_lines` and saying how much was cut.
/// A cap of zero keeps everything.
fn truncate_lines(lines: &[&str], max_lines: usize) -> String {
    if max_lines == 0 || lines.len() <= max_lines {
        return lines.join("\n");
    }
    let omitted = lines.len() - max_lines;
    let mut kept = lines[..max_lines].join("\n");
    kept.push_str(&format!("\n(truncated, {omitted} more lines)"));
    kept
}
