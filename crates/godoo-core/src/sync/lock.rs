//! Exclusive lock over a managed source root.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

/// Lock file name inside the third-party root.
pub const LOCK_FILE: &str = ".godoo.lock";

/// Held for the duration of a sync; the file is removed on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    /// Create `<root>/.godoo.lock`, failing with [`SyncError::Locked`] if it exists.
    pub fn acquire(root: &Path) -> SyncResult<Self> {
        std::fs::create_dir_all(root).map_err(|e| SyncError::io(root, e))?;
        let path = root.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(SyncError::Locked(path)),
            Err(e) => return Err(SyncError::io(&path, e)),
        };
        // Informational only; a stale lock must be removed by hand.
        let _ = writeln!(file, "{}", std::process::id());
        debug!(path = %path.display(), "workspace lock acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release workspace lock");
        }
    }
}
