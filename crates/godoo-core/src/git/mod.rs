//! Git plumbing for source synchronization.
//!
//! [`SourceBackend`] is the seam between the synchronizer and the actual
//! version-control tool. [`CliGit`] shells out to the `git` binary; tests
//! plug in recording fakes.

pub mod cli;
pub mod url;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::manifest::RepositorySpec;

pub use cli::{classify_git_failure, CliGit, GitFailureKind};
pub use url::{GitUrl, RemoteHost, UrlScheme};

/// Stamp file recording the ref of an archive-mode snapshot.
pub const ARCHIVE_STAMP: &str = ".godoo_archive";

/// How a local source directory was materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutKind {
    Git,
    Archive,
}

/// Observed state of a source directory on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalCheckout {
    pub path: PathBuf,
    /// HEAD commit for git checkouts, stamped ref for archive snapshots.
    pub current_ref: Option<String>,
    pub is_dirty: bool,
    pub kind: CheckoutKind,
}

/// Version-control operations needed by the synchronizer.
///
/// Only `clone_fresh` and `fetch` touch the network.
#[async_trait]
pub trait SourceBackend: Send + Sync {
    /// Describe `path`; `None` when it does not exist or is empty.
    async fn inspect(&self, path: &Path) -> SyncResult<Option<LocalCheckout>>;

    /// Resolve `reference` to a commit using local objects only.
    async fn resolve_local(&self, path: &Path, reference: &str) -> SyncResult<Option<String>>;

    /// Partial clone of `spec` into `dest`, which must not exist.
    async fn clone_fresh(&self, spec: &RepositorySpec, dest: &Path) -> SyncResult<()>;

    /// Fetch a single ref from the remote; returns the fetched commit.
    async fn fetch(&self, spec: &RepositorySpec, path: &Path, reference: &str)
        -> SyncResult<String>;

    /// Detached checkout of `commit`.
    async fn checkout_detached(
        &self,
        spec: &RepositorySpec,
        path: &Path,
        commit: &str,
    ) -> SyncResult<()>;

    /// Point `branch` at `commit` and check it out.
    async fn checkout_branch(
        &self,
        spec: &RepositorySpec,
        path: &Path,
        branch: &str,
        commit: &str,
    ) -> SyncResult<()>;

    /// Throw away modifications to tracked files.
    async fn discard_changes(&self, spec: &RepositorySpec, path: &Path) -> SyncResult<()>;
}

/// Inspect a directory that is not a git work tree.
///
/// Non-empty directories without `.git` are taken to be archive-mode
/// snapshots; their ref comes from the stamp file, if any.
pub(crate) fn inspect_plain_dir(path: &Path) -> std::io::Result<Option<LocalCheckout>> {
    if !path.is_dir() {
        return Ok(None);
    }
    if std::fs::read_dir(path)?.next().is_none() {
        return Ok(None);
    }
    let current_ref = match std::fs::read_to_string(path.join(ARCHIVE_STAMP)) {
        Ok(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };
    Ok(Some(LocalCheckout {
        path: path.to_path_buf(),
        current_ref,
        is_dirty: false,
        kind: CheckoutKind::Archive,
    }))
}
