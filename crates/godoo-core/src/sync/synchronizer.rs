//! Applying a [`SyncDecision`] to one source directory.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::archive::ArchiveSource;
use super::resolver::{self, SyncDecision, TargetRef};
use super::{DirtyPolicy, SyncJob, SyncOptions};
use crate::error::{SyncError, SyncResult};
use crate::git::{CheckoutKind, LocalCheckout, SourceBackend, ARCHIVE_STAMP};

/// What the synchronizer did to a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Skipped,
    Cloned,
    Updated,
    Downloaded,
}

/// Brings one source directory to the state its manifest entry asks for.
///
/// Fresh clones and archive snapshots are staged in a hidden sibling
/// directory and renamed onto the target only once complete.
pub struct RepoSynchronizer {
    backend: Arc<dyn SourceBackend>,
    archive: Arc<dyn ArchiveSource>,
    options: SyncOptions,
}

impl RepoSynchronizer {
    pub fn new(
        backend: Arc<dyn SourceBackend>,
        archive: Arc<dyn ArchiveSource>,
        options: SyncOptions,
    ) -> Self {
        Self {
            backend,
            archive,
            options,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Resolve and apply in one step.
    pub async fn ensure(&self, job: &SyncJob) -> SyncResult<(SyncAction, LocalCheckout)> {
        let (existing, decision) =
            resolver::resolve(self.backend.as_ref(), &job.spec, &job.path).await?;
        let decision = match (decision, job.spec.commit.as_deref()) {
            (SyncDecision::Skip, Some(pin)) if self.options.force_fetch => {
                info!(repo = %job.spec.name, "at pin, fetching anyway");
                SyncDecision::FetchAndCheckout(TargetRef::Commit(pin.to_string()))
            }
            (decision, _) => decision,
        };
        self.sync(job, &decision, existing.as_ref()).await
    }

    /// Apply `decision` to `job.path`.
    pub async fn sync(
        &self,
        job: &SyncJob,
        decision: &SyncDecision,
        existing: Option<&LocalCheckout>,
    ) -> SyncResult<(SyncAction, LocalCheckout)> {
        let repo = job.spec.name.as_str();
        match decision {
            SyncDecision::Skip => {
                info!(repo = %repo, commit = ?existing.and_then(|c| c.current_ref.as_deref()), "up to date, skipping");
                let checkout = match existing {
                    Some(co) => co.clone(),
                    None => self.checkout_at(job).await?,
                };
                Ok((SyncAction::Skipped, checkout))
            }
            SyncDecision::CloneFresh => {
                if let Some(url) = self.archive_url(job, existing) {
                    let co = self.download(job, &url, existing).await?;
                    return Ok((SyncAction::Downloaded, co));
                }
                let co = self.clone_into_place(job, existing).await?;
                Ok((SyncAction::Cloned, co))
            }
            SyncDecision::FetchAndCheckout(target) => {
                if let Some(url) = self.archive_url(job, existing) {
                    let co = self.download(job, &url, existing).await?;
                    return Ok((SyncAction::Downloaded, co));
                }
                match existing {
                    Some(co) if co.kind == CheckoutKind::Git => {
                        let co = self.update_git(job, co, target).await?;
                        Ok((SyncAction::Updated, co))
                    }
                    // Archive snapshot that can no longer be refreshed as an archive.
                    _ => {
                        let co = self.clone_into_place(job, existing).await?;
                        Ok((SyncAction::Cloned, co))
                    }
                }
            }
        }
    }

    /// Archive URL when this job should be materialized as a snapshot.
    fn archive_url(&self, job: &SyncJob, existing: Option<&LocalCheckout>) -> Option<String> {
        let is_snapshot = existing.is_some_and(|c| c.kind == CheckoutKind::Archive);
        if !self.options.archive_mode && !is_snapshot {
            return None;
        }
        let url = job
            .spec
            .git_url()
            .and_then(|u| u.archive_url(job.spec.effective_ref()));
        if url.is_none() {
            info!(repo = %job.spec.name, "no archive endpoint for remote, using git");
        }
        url
    }

    fn check_dirty(&self, job: &SyncJob, existing: Option<&LocalCheckout>) -> SyncResult<bool> {
        match existing {
            Some(co) if co.is_dirty => match self.options.dirty_policy {
                DirtyPolicy::Abort => Err(SyncError::DirtyWorktree {
                    repo: job.spec.name.clone(),
                    path: job.path.clone(),
                }),
                DirtyPolicy::Discard => {
                    warn!(repo = %job.spec.name, path = %job.path.display(), "discarding local changes");
                    Ok(true)
                }
            },
            _ => Ok(false),
        }
    }

    async fn checkout_at(&self, job: &SyncJob) -> SyncResult<LocalCheckout> {
        self.backend
            .inspect(&job.path)
            .await?
            .ok_or_else(|| SyncError::Git {
                repo: job.spec.name.clone(),
                command: "inspect".to_string(),
                detail: format!("{} is missing after sync", job.path.display()),
            })
    }

    async fn update_git(
        &self,
        job: &SyncJob,
        existing: &LocalCheckout,
        target: &TargetRef,
    ) -> SyncResult<LocalCheckout> {
        let spec = &job.spec;
        let path = job.path.as_path();
        if self.check_dirty(job, Some(existing))? {
            self.backend.discard_changes(spec, path).await?;
        }

        match target {
            TargetRef::Commit(pin) => {
                let local = if self.options.force_fetch {
                    None
                } else {
                    self.backend.resolve_local(path, pin).await?
                };
                let commit = match local {
                    Some(sha) => sha,
                    None => self.backend.fetch(spec, path, pin).await?,
                };
                self.backend.checkout_detached(spec, path, &commit).await?;
            }
            TargetRef::BranchHead(branch) => {
                let commit = self.backend.fetch(spec, path, branch).await?;
                self.backend
                    .checkout_branch(spec, path, branch, &commit)
                    .await?;
            }
        }

        let co = self.checkout_at(job).await?;
        info!(repo = %spec.name, commit = ?co.current_ref, "updated");
        Ok(co)
    }

    async fn clone_into_place(
        &self,
        job: &SyncJob,
        existing: Option<&LocalCheckout>,
    ) -> SyncResult<LocalCheckout> {
        let spec = &job.spec;
        let staging = staging_dir(&job.path, ".godoo-clone-")?;
        let tmp_repo = staging.path().join(&spec.name);

        info!(repo = %spec.name, url = %spec.url, reference = %spec.effective_ref(), "cloning");
        self.backend.clone_fresh(spec, &tmp_repo).await?;
        if let Some(pin) = spec.commit.as_deref() {
            let commit = match self.backend.resolve_local(&tmp_repo, pin).await? {
                Some(sha) => sha,
                None => self.backend.fetch(spec, &tmp_repo, pin).await?,
            };
            self.backend
                .checkout_detached(spec, &tmp_repo, &commit)
                .await?;
        }

        if existing.is_some() {
            // Only archive snapshots are replaced wholesale by a clone.
            self.check_dirty(job, existing)?;
        }
        swap_into_place(staging.path(), &tmp_repo, &job.path).await?;

        let co = self.checkout_at(job).await?;
        info!(repo = %spec.name, commit = ?co.current_ref, "cloned");
        Ok(co)
    }

    async fn download(
        &self,
        job: &SyncJob,
        url: &str,
        existing: Option<&LocalCheckout>,
    ) -> SyncResult<LocalCheckout> {
        self.check_dirty(job, existing)?;
        let spec = &job.spec;
        let staging = staging_dir(&job.path, ".godoo-archive-")?;
        let snapshot = staging.path().join(&spec.name);

        self.archive.fetch_snapshot(spec, url, &snapshot).await?;
        let stamp = snapshot.join(ARCHIVE_STAMP);
        tokio::fs::write(&stamp, format!("{}\n", spec.effective_ref()))
            .await
            .map_err(|e| SyncError::io(&stamp, e))?;
        swap_into_place(staging.path(), &snapshot, &job.path).await?;

        let co = self.checkout_at(job).await?;
        info!(repo = %spec.name, reference = %spec.effective_ref(), "archive snapshot installed");
        Ok(co)
    }
}

/// Hidden temporary sibling of `target`, removed on drop.
fn staging_dir(target: &Path, prefix: &str) -> SyncResult<tempfile::TempDir> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in(parent)
        .map_err(|e| SyncError::io(parent, e))
}

/// Move `ready` onto `target`, parking any previous content in `staging`.
async fn swap_into_place(staging: &Path, ready: &Path, target: &Path) -> SyncResult<()> {
    if tokio::fs::symlink_metadata(target).await.is_ok() {
        let parked = staging.join(".previous");
        tokio::fs::rename(target, &parked)
            .await
            .map_err(|e| SyncError::io(target, e))?;
    }
    tokio::fs::rename(ready, target)
        .await
        .map_err(|e| SyncError::io(target, e))
}
