//! Working directory file operations.

use livebox_core::{split_path, CoreError, Entry, FileContents, Result, VirtualFileTree};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Maximum file size for `read_file` (10 MB).
const MAX_READ_SIZE: u64 = 10 * 1024 * 1024;

/// Map a sandbox path onto the working directory.
///
/// `split_path` rejects `..` segments, so the result never leaves `root`.
pub(crate) fn resolve(root: &Path, path: &str) -> Result<PathBuf> {
    let mut target = root.to_path_buf();
    target.extend(split_path(path)?);
    Ok(target)
}

fn mount_error(path: &str, err: io::Error) -> CoreError {
    CoreError::Mount {
        path: path.to_string(),
        message: err.to_string(),
    }
}

/// Write every entry of `tree` below `root`, parents first.
pub(crate) async fn materialize(root: &Path, tree: &VirtualFileTree) -> Result<()> {
    let entries = tree.entries();
    debug!(root = %root.display(), entries = entries.len(), "Materializing tree");

    for entry in entries {
        let target = resolve(root, entry.path())?;
        match entry {
            Entry::Directory(path) => {
                tokio::fs::create_dir_all(&target)
                    .await
                    .map_err(|e| mount_error(&path, e))?;
            }
            Entry::File(path, contents) => {
                trace!(path = %path, bytes = contents.len(), "Writing file");
                tokio::fs::write(&target, contents.as_bytes())
                    .await
                    .map_err(|e| mount_error(&path, e))?;
            }
        }
    }
    Ok(())
}

/// Replace one file, creating parent directories if needed.
pub(crate) async fn write_file(root: &Path, path: &str, contents: &FileContents) -> Result<()> {
    let target = resolve(root, path)?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| mount_error(path, e))?;
    }
    tokio::fs::write(&target, contents.as_bytes())
        .await
        .map_err(|e| mount_error(path, e))
}

/// Read one file back. Files over 10 MB are rejected.
pub(crate) async fn read_file(root: &Path, path: &str) -> Result<FileContents> {
    let target = resolve(root, path)?;
    let metadata = match tokio::fs::metadata(&target).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(CoreError::NotFound(path.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_file() {
        return Err(CoreError::NotFound(path.to_string()));
    }
    if metadata.len() > MAX_READ_SIZE {
        return Err(CoreError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "file '{}' is too large ({} bytes, max {} bytes)",
                path,
                metadata.len(),
                MAX_READ_SIZE
            ),
        )));
    }
    let raw = tokio::fs::read(&target).await?;
    Ok(FileContents::from_raw(raw))
}
