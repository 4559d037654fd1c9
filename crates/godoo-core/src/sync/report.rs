//! Per-run sync report.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::synchronizer::SyncAction;
use super::zip_addons::ZipDropOutcome;
use crate::error::{SyncError, SyncResult};

/// Result of one source in a sync run.
#[derive(Debug, Clone, Serialize)]
pub struct RepoOutcome {
    pub name: String,
    pub path: PathBuf,
    pub mandatory: bool,
    /// `None` when the source failed.
    pub action: Option<SyncAction>,
    pub current_ref: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl RepoOutcome {
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregated outcome of a sync run, serializable for `--json-report`.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub repos: Vec<RepoOutcome>,
    pub zip_addons: Vec<ZipDropOutcome>,
    pub removed: Vec<PathBuf>,
    /// Commit pins or compare links were written back to the manifest.
    pub manifest_updated: bool,
}

impl SyncReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            cancelled: false,
            repos: Vec::new(),
            zip_addons: Vec::new(),
            removed: Vec::new(),
            manifest_updated: false,
        }
    }

    pub fn count(&self, action: SyncAction) -> usize {
        self.repos
            .iter()
            .filter(|r| r.action == Some(action))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &RepoOutcome> {
        self.repos.iter().filter(|r| r.is_failed())
    }

    pub fn outcome(&self, name: &str) -> Option<&RepoOutcome> {
        self.repos.iter().find(|r| r.name == name)
    }

    /// First failed mandatory source, if any.
    pub fn mandatory_failure(&self) -> Option<&RepoOutcome> {
        self.failures().find(|r| r.mandatory)
    }

    /// Fail when the run was cancelled or a mandatory source failed.
    ///
    /// Optional failures are tolerated and only logged.
    pub fn check(&self) -> SyncResult<()> {
        if self.cancelled {
            return Err(SyncError::Cancelled);
        }
        if let Some(failed) = self.mandatory_failure() {
            return Err(SyncError::MandatoryFailed {
                repo: failed.name.clone(),
                detail: failed.error.clone().unwrap_or_default(),
            });
        }
        Ok(())
    }

    pub fn log_summary(&self) {
        let failed: Vec<&str> = self.failures().map(|r| r.name.as_str()).collect();
        info!(
            total = self.repos.len(),
            cloned = self.count(SyncAction::Cloned),
            updated = self.count(SyncAction::Updated),
            downloaded = self.count(SyncAction::Downloaded),
            skipped = self.count(SyncAction::Skipped),
            failed = failed.len(),
            removed = self.removed.len(),
            elapsed_ms = (self.finished_at - self.started_at).num_milliseconds(),
            "sync finished"
        );
        if !failed.is_empty() && self.mandatory_failure().is_none() {
            warn!(failed = ?failed, "partial sync: optional sources failed");
        }
    }
}
