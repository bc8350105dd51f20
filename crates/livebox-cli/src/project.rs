//! Loading a project directory into a [`VirtualFileTree`].

use anyhow::Context;
use livebox_core::{FileContents, VirtualFileTree};
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

/// Directories never copied into the sandbox. The sandbox installs its own
/// dependencies and produces its own build output.
const SKIPPED_DIRS: [&str; 4] = ["node_modules", ".git", "dist", "build"];

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

/// Read every file below `dir` into a tree keyed by `/`-separated
/// project-relative paths.
///
/// Symlinks and non-UTF-8 paths are skipped.
pub fn load_tree(dir: &Path) -> anyhow::Result<VirtualFileTree> {
    let mut tree = VirtualFileTree::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
    {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        let relative = entry.path().strip_prefix(dir)?;

        let Some(segments) = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()
        else {
            tracing::warn!(path = %relative.display(), "Skipping non-UTF-8 path");
            continue;
        };
        let path = segments.join("/");

        let file_type = entry.file_type();
        if file_type.is_dir() {
            tree.insert_dir(&path)?;
        } else if file_type.is_file() {
            let raw = std::fs::read(entry.path())
                .with_context(|| format!("failed to read {}", entry.path().display()))?;
            tree.insert(&path, FileContents::from_raw(raw))?;
        } else {
            tracing::debug!(path = %path, "Skipping non-regular file");
        }
    }

    tracing::debug!(root = %dir.display(), files = tree.len(), "Project loaded");
    Ok(tree)
}
