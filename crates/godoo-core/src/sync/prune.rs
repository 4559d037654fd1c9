//! Removal of third-party folders that the manifest no longer declares.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{SyncError, SyncResult};

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Delete directories under `root` that are neither declared nor kept.
///
/// Hidden entries (lock file, staging dirs) and plain files are never touched.
/// Returns the removed paths in sorted order.
pub fn remove_unspecified(
    root: &Path,
    declared: &HashSet<String>,
    keep: &[PathBuf],
) -> SyncResult<Vec<PathBuf>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(root).map_err(|e| SyncError::io(root, e))? {
        let entry = entry.map_err(|e| SyncError::io(root, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let file_type = entry.file_type().map_err(|e| SyncError::io(entry.path(), e))?;
        if !file_type.is_dir() {
            continue;
        }
        let path = entry.path();
        if declared.contains(&name) || keep.iter().any(|k| same_dir(&path, k)) {
            continue;
        }
        candidates.push(path);
    }
    candidates.sort();

    for path in &candidates {
        info!(path = %path.display(), "removing unspecified addon folder");
        std::fs::remove_dir_all(path).map_err(|e| SyncError::io(path, e))?;
    }
    Ok(candidates)
}
