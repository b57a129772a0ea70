//! Build metadata persisted alongside the graph.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// When the graph was last built and from which revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMetadata {
    pub last_build: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl BuildMetadata {
    /// Metadata stamped with the current time and the project's git revision,
    /// if it has one.
    pub fn now(project_root: &Path) -> Self {
        Self {
            last_build: Utc::now(),
            revision: git_revision(project_root),
        }
    }
}

/// Read the commit id `HEAD` points at without shelling out to git.
///
/// `.git` may be a directory or a `gitdir:` file, as in worktrees and
/// submodules. A symbolic ref is looked up as a loose ref file, first in the
/// git dir and then in its common dir, falling back to `packed-refs`.
/// Returns `None` outside a repository or on any read error.
pub fn git_revision(project_root: &Path) -> Option<String> {
    let git_dir = locate_git_dir(project_root)?;
    let common_dir = common_dir(&git_dir);
    let head = fs::read_to_string(git_dir.join("HEAD")).ok()?;
    let head = head.trim();

    let Some(reference) = head.strip_prefix("ref:") else {
        return (!head.is_empty()).then(|| head.to_string());
    };
    let reference = reference.trim();

    for dir in [&git_dir, &common_dir] {
        if let Ok(loose) = fs::read_to_string(dir.join(reference)) {
            let loose = loose.trim();
            if !loose.is_empty() {
                return Some(loose.to_string());
            }
        }
    }

    let packed = fs::read_to_string(common_dir.join("packed-refs")).ok()?;
    packed
        .lines()
        .filter(|line| !line.starts_with('#') && !line.starts_with('^'))
        .find_map(|line| {
            let (id, name) = line.split_once(' ')?;
            (name.trim() == reference).then(|| id.to_string())
        })
}

fn locate_git_dir(project_root: &Path) -> Option<PathBuf> {
    let dot_git = project_root.join(".git");
    if dot_git.is_dir() {
        return Some(dot_git);
    }
    let pointer = fs::read_to_string(&dot_git).ok()?;
    let target = pointer.trim().strip_prefix("gitdir:")?.trim();
    if target.is_empty() {
        return None;
    }
    Some(project_root.join(target))
}

/// Worktree git dirs keep shared refs in the directory named by `commondir`.
fn common_dir(git_dir: &Path) -> PathBuf {
    match fs::read_to_string(git_dir.join("commondir")) {
        Ok(common) if !common.trim().is_empty() => git_dir.join(common.trim()),
        _ => git_dir.to_path_buf(),
    }
}
