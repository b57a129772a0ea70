//! Compiled-in tree-sitter grammars.
//!
//! Grammars are the only part of language support that must be linked at
//! build time. Which languages are actually usable is decided by the query
//! registry: a grammar without a discoverable query resource is inert.

use std::path::Path;

/// A grammar linked into the binary, keyed by language id.
#[derive(Debug, Clone, Copy)]
pub struct Grammar {
    /// Language id, also the stem of the query resource (`<id>.scm`).
    pub id: &'static str,
    /// File extensions associated with this language.
    pub extensions: &'static [&'static str],
    loader: fn() -> tree_sitter::Language,
}

impl Grammar {
    /// Get the tree-sitter language for this grammar.
    pub fn tree_sitter_language(&self) -> tree_sitter::Language {
        (self.loader)()
    }

    /// Returns true if `ext` (without the dot) belongs to this grammar.
    pub fn matches_extension(&self, ext: &str) -> bool {
        let ext = ext.to_ascii_lowercase();
        self.extensions.iter().any(|e| *e == ext)
    }
}

fn rust_language() -> tree_sitter::Language {
    tree_sitter_rust::LANGUAGE.into()
}

fn python_language() -> tree_sitter::Language {
    tree_sitter_python::LANGUAGE.into()
}

fn c_language() -> tree_sitter::Language {
    tree_sitter_c::LANGUAGE.into()
}

fn cpp_language() -> tree_sitter::Language {
    tree_sitter_cpp::LANGUAGE.into()
}

static GRAMMARS: &[Grammar] = &[
    Grammar {
        id: "rust",
        extensions: &["rs"],
        loader: rust_language,
    },
    Grammar {
        id: "python",
        extensions: &["py", "pyi"],
        loader: python_language,
    },
    Grammar {
        id: "c",
        extensions: &["c", "h"],
        loader: c_language,
    },
    Grammar {
        id: "cpp",
        extensions: &["cpp", "cc", "cxx", "c++", "hpp", "hh", "hxx", "h++"],
        loader: cpp_language,
    },
];

/// All grammars linked into this build.
pub fn grammars() -> &'static [Grammar] {
    GRAMMARS
}

/// Look up a grammar by language id.
pub fn grammar(id: &str) -> Option<&'static Grammar> {
    GRAMMARS.iter().find(|g| g.id == id)
}

/// Detect a grammar from a file path's extension.
pub fn grammar_for_path(path: &Path) -> Option<&'static Grammar> {
    let ext = path.extension()?.to_str()?;
    GRAMMARS.iter().find(|g| g.matches_extension(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grammar_lookup() {
        assert_eq!(grammar("rust").map(|g| g.id), Some("rust"));
        assert_eq!(grammar("python").map(|g| g.id), Some("python"));
        assert!(grammar("cobol").is_none());
    }

    #[test]
    fn test_grammar_for_path() {
        assert_eq!(
            grammar_for_path(Path::new("src/main.rs")).map(|g| g.id),
            Some("rust")
        );
        assert_eq!(
            grammar_for_path(Path::new("pkg/mod.PY")).map(|g| g.id),
            Some("python")
        );
        assert_eq!(
            grammar_for_path(Path::new("include/util.hpp")).map(|g| g.id),
            Some("cpp")
        );
        assert!(grammar_for_path(Path::new("README")).is_none());
        assert!(grammar_for_path(Path::new("notes.txt")).is_none());
    }

    #[test]
    fn test_grammars_load() {
        for g in grammars() {
            let lang = g.tree_sitter_language();
            assert!(lang.node_kind_count() > 0, "{} grammar is empty", g.id);
        }
    }
}
