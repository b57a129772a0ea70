//! Resolution of raw import strings to indexed file ids.
//!
//! Resolution is best effort and purely textual. A raw import is either a
//! literal path (`"util.h"`, `<sys/types.h>`) or a module path
//! (`pkg.mod.func`, `crate::store::GraphStore`, `.sibling`). Module paths are
//! tried against the importing file's directory, then the project root, then
//! any file whose path ends with the candidate, each time from the longest
//! prefix down so `pkg.mod.func` finds `pkg/mod.py`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::language;

/// Path segments that carry no location information.
const NOISE_SEGMENTS: &[&str] = &["crate", "self", "super", "*"];

/// Files that stand for their directory as a module.
const PACKAGE_FILES: &[&str] = &["__init__.py", "mod.rs"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// A path with an extension, relative to some base.
    Literal(String),
    /// Extension-less module segments. `up` is set for Python-style
    /// relative imports: 0 is the importer's own package.
    Module {
        up: Option<usize>,
        segments: Vec<String>,
    },
}

/// Resolves imports against a fixed set of file ids.
#[derive(Debug, Clone, Default)]
pub struct ImportResolver {
    files: BTreeSet<String>,
    /// Module path (no extension) → file id.
    by_module: BTreeMap<String, String>,
}

impl ImportResolver {
    pub fn new<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let files: BTreeSet<String> = files.into_iter().map(Into::into).collect();
        let mut by_module = BTreeMap::new();
        for file in &files {
            let (dir, name) = split_dir(file);
            let stem = match name.rsplit_once('.') {
                Some((stem, _)) => stem,
                None => name,
            };
            by_module
                .entry(join(dir, stem))
                .or_insert_with(|| file.clone());
            if PACKAGE_FILES.contains(&name) && !dir.is_empty() {
                by_module
                    .entry(dir.to_string())
                    .or_insert_with(|| file.clone());
            }
        }
        Self { files, by_module }
    }

    /// Resolve `raw`, imported by `importer`, to a file id. Imports of the
    /// importer itself resolve to `None`.
    pub fn resolve(&self, importer: &str, raw: &str) -> Option<String> {
        let (importer_dir, _) = split_dir(importer);
        let resolved = match parse_import(raw)? {
            Target::Literal(path) => self.resolve_literal(importer_dir, &path),
            Target::Module {
                up: Some(up),
                segments,
            } => {
                let base = ancestor(importer_dir, up)?;
                self.lookup_module(&base, &segments)
            }
            Target::Module { up: None, segments } => self
                .lookup_module(importer_dir, &segments)
                .or_else(|| self.lookup_module("", &segments))
                .or_else(|| self.lookup_module_suffix(&segments)),
        }?;
        (resolved != importer).then_some(resolved)
    }

    /// Resolve every path `raw` names, sorted and deduplicated. A grouped
    /// Rust import such as `crate::{store::GraphStore, walker}` names
    /// several, each resolved on its own.
    pub fn resolve_all(&self, importer: &str, raw: &str) -> Vec<String> {
        let mut targets: Vec<String> = expand_groups(raw)
            .iter()
            .filter_map(|path| self.resolve(importer, path))
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }

    fn resolve_literal(&self, importer_dir: &str, path: &str) -> Option<String> {
        [importer_dir, ""]
            .iter()
            .filter_map(|base| normalize(&join(base, path)))
            .find(|candidate| self.files.contains(candidate))
            .or_else(|| {
                let path = normalize(path)?;
                let suffix = format!("/{path}");
                self.files.iter().find(|f| f.ends_with(&suffix)).cloned()
            })
    }

    fn lookup_module(&self, base: &str, segments: &[String]) -> Option<String> {
        (1..=segments.len()).rev().find_map(|len| {
            let key = join(base, &segments[..len].join("/"));
            self.by_module.get(&key).cloned()
        })
    }

    fn lookup_module_suffix(&self, segments: &[String]) -> Option<String> {
        (1..=segments.len()).rev().find_map(|len| {
            let suffix = format!("/{}", segments[..len].join("/"));
            self.by_module
                .iter()
                .find(|(module, _)| module.ends_with(&suffix))
                .map(|(_, file)| file.clone())
        })
    }
}

/// Expand `{...}` lists into one path per item, recursively. `self` inside
/// a list stands for the prefix itself. Text without braces is returned as is.
fn expand_groups(raw: &str) -> Vec<String> {
    let Some(open) = raw.find('{') else {
        return vec![raw.trim().to_string()];
    };
    let prefix = raw[..open].trim();
    let body = &raw[open + 1..];
    let close = matching_brace(body).unwrap_or(body.len());

    split_top_level(&body[..close])
        .into_iter()
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .flat_map(|item| {
            if item == "self" {
                vec![prefix.trim_end_matches("::").to_string()]
            } else {
                expand_groups(&format!("{prefix}{item}"))
            }
        })
        .filter(|path| !path.is_empty())
        .collect()
}

/// Byte offset of the `}` closing a group whose `{` precedes `text`.
fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Split on commas that are not nested inside braces.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&text[start..]);
    items
}

fn parse_import(raw: &str) -> Option<Target> {
    let text = raw
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '<' | '>'))
        .trim();
    if text.is_empty() {
        return None;
    }

    if text.contains('/') || language::grammar_for_path(Path::new(text)).is_some() {
        return Some(Target::Literal(text.to_string()));
    }

    // `a::b::{C, D}` and `a::b as c`
    let text = text.split('{').next().unwrap_or(text);
    let text = text.split_whitespace().next()?;
    let text = text.trim_end_matches(':');

    let dots = text.chars().take_while(|&c| c == '.').count();
    let segments: Vec<String> = text[dots..]
        .replace("::", ".")
        .split('.')
        .filter(|s| !s.is_empty() && !NOISE_SEGMENTS.contains(s))
        .map(str::to_string)
        .collect();
    if segments.is_empty() {
        return None;
    }

    Some(Target::Module {
        up: dots.checked_sub(1),
        segments,
    })
}

/// Split a file id into its directory (possibly empty) and file name.
fn split_dir(id: &str) -> (&str, &str) {
    match id.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", id),
    }
}

fn join(base: &str, rest: &str) -> String {
    if base.is_empty() {
        rest.to_string()
    } else {
        format!("{base}/{rest}")
    }
}

/// Walk `levels` directories up from `dir`.
fn ancestor(dir: &str, levels: usize) -> Option<String> {
    let mut parts: Vec<&str> = dir.split('/').filter(|p| !p.is_empty()).collect();
    if levels > parts.len() {
        return None;
    }
    parts.truncate(parts.len() - levels);
    Some(parts.join("/"))
}

/// Collapse `.` and `..` segments. `None` if the path escapes the root.
fn normalize(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ImportResolver {
        ImportResolver::new([
            "app.py",
            "pkg/__init__.py",
            "pkg/mod.py",
            "pkg/sub/leaf.py",
            "src/lib.rs",
            "src/store.rs",
            "src/walker/mod.rs",
            "include/util.h",
            "src/main.c",
            "src/local.h",
        ])
    }

    #[test]
    fn test_python_absolute_imports() {
        let r = resolver();
        assert_eq!(r.resolve("app.py", "pkg.mod").as_deref(), Some("pkg/mod.py"));
        assert_eq!(
            r.resolve("app.py", "pkg.mod.func").as_deref(),
            Some("pkg/mod.py")
        );
        assert_eq!(r.resolve("app.py", "pkg").as_deref(), Some("pkg/__init__.py"));
        assert_eq!(r.resolve("app.py", "os.path"), None);
    }

    #[test]
    fn test_python_relative_imports() {
        let r = resolver();
        assert_eq!(
            r.resolve("pkg/sub/leaf.py", "..mod").as_deref(),
            Some("pkg/mod.py")
        );
        assert_eq!(r.resolve("pkg/mod.py", ".sub.leaf").as_deref(), Some("pkg/sub/leaf.py"));
        assert_eq!(r.resolve("app.py", "...far"), None);
    }

    #[test]
    fn test_rust_paths() {
        let r = resolver();
        assert_eq!(
            r.resolve("src/lib.rs", "crate::store::GraphStore").as_deref(),
            Some("src/store.rs")
        );
        assert_eq!(
            r.resolve("src/lib.rs", "crate::store::{GraphStore, StoreError}")
                .as_deref(),
            Some("src/store.rs")
        );
        assert_eq!(r.resolve("src/lib.rs", "walker").as_deref(), Some("src/walker/mod.rs"));
        assert_eq!(
            r.resolve("src/lib.rs", "self::walker::walk as w").as_deref(),
            Some("src/walker/mod.rs")
        );
    }

    #[test]
    fn test_grouped_rust_uses() {
        let r = resolver();
        assert_eq!(
            r.resolve_all("src/lib.rs", "crate::{store::GraphStore, walker}"),
            vec!["src/store.rs", "src/walker/mod.rs"]
        );
        assert_eq!(
            r.resolve_all(
                "src/lib.rs",
                "crate::{\n    store::{self, StoreError},\n    walker::{walk, WalkOptions as Opts},\n}"
            ),
            vec!["src/store.rs", "src/walker/mod.rs"]
        );
        assert!(r.resolve_all("src/lib.rs", "std::{fmt, io}").is_empty());
        assert_eq!(
            r.resolve_all("app.py", "pkg.mod.func"),
            vec!["pkg/mod.py"]
        );
    }

    #[test]
    fn test_expand_groups() {
        assert_eq!(
            expand_groups("a::{b, c::{self, D}, }"),
            vec!["a::b", "a::c", "a::c::D"]
        );
        assert_eq!(expand_groups("{x, y}"), vec!["x", "y"]);
        assert_eq!(expand_groups(" pkg.mod "), vec!["pkg.mod"]);
    }

    #[test]
    fn test_c_includes() {
        let r = resolver();
        assert_eq!(r.resolve("src/main.c", "\"local.h\"").as_deref(), Some("src/local.h"));
        assert_eq!(r.resolve("src/main.c", "\"util.h\"").as_deref(), Some("include/util.h"));
        assert_eq!(
            r.resolve("src/main.c", "\"../include/util.h\"").as_deref(),
            Some("include/util.h")
        );
        assert_eq!(r.resolve("src/main.c", "<stdio.h>"), None);
    }

    #[test]
    fn test_self_import_ignored() {
        let r = resolver();
        assert_eq!(r.resolve("pkg/mod.py", "pkg.mod"), None);
        assert_eq!(r.resolve("src/store.rs", "crate::store"), None);
    }

    #[test]
    fn test_garbage_imports() {
        let r = resolver();
        assert_eq!(r.resolve("app.py", ""), None);
        assert_eq!(r.resolve("app.py", "\"\""), None);
        assert_eq!(r.resolve("src/lib.rs", "crate::*"), None);
    }
}
