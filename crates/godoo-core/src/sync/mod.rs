//! Source synchronization: resolve, fetch and lay out every manifest entry.

pub mod archive;
pub mod lock;
pub mod pins;
pub mod prune;
pub mod report;
pub mod resolver;
pub mod runner;
pub mod synchronizer;
pub mod zip_addons;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use archive::{ArchiveSource, HttpArchive};
pub use lock::WorkspaceLock;
pub use pins::PinOptions;
pub use report::{RepoOutcome, SyncReport};
pub use resolver::{SyncDecision, TargetRef};
pub use runner::SyncRunner;
pub use synchronizer::{RepoSynchronizer, SyncAction};
pub use zip_addons::{ZipDropOutcome, ZipDropStatus};

use crate::addons;
use crate::config::GodooConfig;
use crate::error::{SyncError, SyncResult};
use crate::git::SourceBackend;
use crate::manifest::{Manifest, RepositorySpec};

/// What to do with uncommitted changes in a checkout that must move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyPolicy {
    #[default]
    Abort,
    Discard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub archive_mode: bool,
    pub dirty_policy: DirtyPolicy,
    pub concurrency: usize,
    pub timeout: Duration,
    /// Contact the remote even when a checkout is already at its pin.
    pub force_fetch: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            archive_mode: false,
            dirty_policy: DirtyPolicy::Abort,
            force_fetch: false,
            concurrency: 8,
            timeout: Duration::from_secs(900),
        }
    }
}

/// One source to materialize at `path`.
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub spec: RepositorySpec,
    pub path: PathBuf,
    /// A failed mandatory job fails the whole run.
    pub mandatory: bool,
}

/// Which parts of the workspace a sync touches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    All,
    Odoo,
    Thirdparty,
    Zip,
}

impl SyncMode {
    fn includes_main(self) -> bool {
        matches!(self, SyncMode::All | SyncMode::Odoo)
    }

    fn includes_thirdparty(self) -> bool {
        matches!(self, SyncMode::All | SyncMode::Thirdparty)
    }

    fn includes_zip(self) -> bool {
        matches!(self, SyncMode::All | SyncMode::Zip)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncMode::All => "all",
            SyncMode::Odoo => "odoo",
            SyncMode::Thirdparty => "thirdparty",
            SyncMode::Zip => "zip",
        };
        f.write_str(s)
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(SyncMode::All),
            "odoo" => Ok(SyncMode::Odoo),
            "thirdparty" => Ok(SyncMode::Thirdparty),
            "zip" => Ok(SyncMode::Zip),
            other => Err(format!("unknown sync mode '{other}'")),
        }
    }
}

/// Flags of one `sync-sources` run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncRequest {
    pub mode: SyncMode,
    pub remove_unspecified: bool,
    pub dirty_policy: DirtyPolicy,
    pub force_fetch: bool,
    /// Manifest write-back after the run.
    pub pins: PinOptions,
}

/// Jobs for `manifest` under `mode`: main source first, then groups in order.
pub fn plan_jobs(config: &GodooConfig, manifest: &Manifest, mode: SyncMode) -> Vec<SyncJob> {
    let mut jobs = Vec::new();
    if mode.includes_main() {
        jobs.push(SyncJob {
            spec: manifest.main.clone(),
            path: config.odoo_main.clone(),
            mandatory: true,
        });
    }
    if mode.includes_thirdparty() {
        jobs.extend(manifest.thirdparty().map(|spec| SyncJob {
            spec: spec.clone(),
            path: config.thirdparty_root.join(&spec.name),
            mandatory: false,
        }));
    }
    jobs
}

/// Whole-workspace sync: lock, zip drops, fan-out, pruning, `odoo.conf`.
pub struct SourceSync<'a> {
    config: &'a GodooConfig,
    backend: Arc<dyn SourceBackend>,
    archive: Arc<dyn ArchiveSource>,
}

impl<'a> SourceSync<'a> {
    pub fn new(
        config: &'a GodooConfig,
        backend: Arc<dyn SourceBackend>,
        archive: Arc<dyn ArchiveSource>,
    ) -> Self {
        Self {
            config,
            backend,
            archive,
        }
    }

    /// Run a sync. The returned report may still contain failures; see
    /// [`SyncReport::check`].
    pub async fn run(&self, manifest: &Manifest, request: SyncRequest) -> SyncResult<SyncReport> {
        let config = self.config;
        let _lock = WorkspaceLock::acquire(&config.thirdparty_root)?;
        info!(mode = %request.mode, archive = config.archive_mode, "syncing sources");

        let synchronizer = Arc::new(RepoSynchronizer::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.archive),
            SyncOptions {
                force_fetch: request.force_fetch,
                ..config.sync_options(request.dirty_policy)
            },
        ));
        let jobs = plan_jobs(config, manifest, request.mode);
        let mut report = SyncRunner::new(synchronizer).run(jobs).await;

        if request.mode.includes_zip() && !report.cancelled {
            if let Some(drop_dir) = config.zip_drop.clone() {
                let target = config.zip_target();
                report.zip_addons = tokio::task::spawn_blocking(move || {
                    zip_addons::install_zip_addons(&drop_dir, &target)
                })
                .await
                .map_err(|e| SyncError::Archive {
                    repo: "zip addons".to_string(),
                    detail: e.to_string(),
                })??;
            }
        }

        let main_ok = report
            .outcome(&manifest.main.name)
            .is_some_and(|o| !o.is_failed());
        if main_ok {
            make_executable(&config.odoo_bin());
        }

        if request.remove_unspecified
            && request.mode.includes_thirdparty()
            && !report.cancelled
        {
            report.removed = prune::remove_unspecified(
                &config.thirdparty_root,
                &manifest.declared_folders(),
                &[config.zip_target()],
            )?;
        }

        if request.pins.is_enabled() && request.mode.includes_thirdparty() && !report.cancelled {
            report.manifest_updated =
                pins::write_back(&config.manifest_path, manifest, &report, request.pins)?;
        }

        if !report.cancelled {
            let paths = addons::addon_paths(config);
            addons::update_conf_addons_path(&config.conf_path, &paths)
                .map_err(|e| SyncError::io(&config.conf_path, e))?;
        }

        report.finished_at = chrono::Utc::now();
        report.log_summary();
        Ok(report)
    }
}

#[cfg(unix)]
fn make_executable(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;

    if !path.is_file() {
        return;
    }
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)) {
        warn!(path = %path.display(), error = %e, "cannot make odoo-bin executable");
    }
}

#[cfg(not(unix))]
fn make_executable(_path: &std::path::Path) {}
