//! Shared fixtures for cross-crate tests.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use cairn_graph::{UpdaterConfig, WalkOptions};

/// Write `files` (relative path, contents) under `root`, creating directories.
pub fn write_files(root: &Path, files: &[(&str, &str)]) -> io::Result<()> {
    for (path, contents) in files {
        let path = root.join(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
    }
    Ok(())
}

/// Where fixtures keep their graph document.
pub fn graph_path(root: &Path) -> PathBuf {
    root.join(".cairn").join("graph.json")
}

/// Updater settings for a project rooted at `root` with default walking.
pub fn updater_config(root: &Path) -> UpdaterConfig {
    UpdaterConfig {
        project_root: root.to_path_buf(),
        graph_path: graph_path(root),
        walk: WalkOptions::default(),
    }
}

