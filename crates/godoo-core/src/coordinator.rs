//! Launch coordinator: sync, bootstrap, migrate, hand over.
//!
//! Steps run strictly in sequence; the first failing step ends the run with
//! a [`LaunchError`] whose [`exit_code`](LaunchError::exit_code) is stable.

use std::sync::Arc;

use godoo_state::{BootstrapMarkerStore, PgMarkerStore};
use tracing::{info, warn};

use crate::addons;
use crate::bootstrap::{observe, BootstrapMachine, BootstrapRun, BootstrapState};
use crate::config::GodooConfig;
use crate::error::{BootstrapError, LaunchError, LaunchResult};
use crate::git::{CliGit, SourceBackend};
use crate::manifest::Manifest;
use crate::migrations::{MigrationApplier, MigrationStage};
use crate::runtime::{
    flag_values, install_python_requirements, launch_command, AppShell, BootstrapOptions,
    ExecSupervisor, LaunchOptions, OdooShell, ProcessRunner, Supervisor, TokioProcessRunner,
};
use crate::sync::{
    ArchiveSource, DirtyPolicy, HttpArchive, PinOptions, SourceSync, SyncMode, SyncReport,
    SyncRequest,
};

/// The external systems a coordinator talks to.
#[derive(Clone)]
pub struct Services {
    pub backend: Arc<dyn SourceBackend>,
    pub archive: Arc<dyn ArchiveSource>,
    pub store: Arc<dyn BootstrapMarkerStore>,
    pub runner: Arc<dyn ProcessRunner>,
    pub shell: Arc<dyn AppShell>,
    pub supervisor: Arc<dyn Supervisor>,
}

impl Services {
    /// git CLI, HTTPS archives, PostgreSQL, odoo-bin and `exec`.
    pub fn production(config: &GodooConfig) -> Self {
        Self {
            backend: Arc::new(CliGit::new()),
            archive: Arc::new(HttpArchive::new()),
            store: Arc::new(PgMarkerStore::new(config.db.clone())),
            runner: Arc::new(TokioProcessRunner),
            shell: Arc::new(OdooShell::new(
                config.odoo_bin(),
                config.conf_path.clone(),
                config.db.clone(),
            )),
            supervisor: Arc::new(ExecSupervisor::new(config.supervisor_cmd.clone())),
        }
    }
}

/// Flags of one `launch` run.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub dev_mode: bool,
    pub update_source: bool,
    pub install_workspace_modules: bool,
    pub dirty_policy: DirtyPolicy,
    pub force_fetch: bool,
    pub extra_args: Vec<String>,
}

impl Default for LaunchRequest {
    fn default() -> Self {
        Self {
            dev_mode: false,
            update_source: true,
            install_workspace_modules: true,
            dirty_policy: DirtyPolicy::Abort,
            force_fetch: false,
            extra_args: Vec::new(),
        }
    }
}

pub struct LaunchCoordinator<'a> {
    config: &'a GodooConfig,
    services: Services,
}

impl<'a> LaunchCoordinator<'a> {
    pub fn new(config: &'a GodooConfig, services: Services) -> Self {
        Self { config, services }
    }

    fn machine(&self) -> BootstrapMachine<'_> {
        BootstrapMachine::new(
            self.config,
            self.services.store.as_ref(),
            self.services.runner.as_ref(),
            self.services.shell.as_ref(),
        )
    }

    /// Load the manifest and sync. Failures of individual sources are in
    /// the report; call [`SyncReport::check`] to enforce mandatory ones.
    pub async fn sync_sources(&self, request: SyncRequest) -> LaunchResult<SyncReport> {
        let manifest = Manifest::load(&self.config.manifest_path)?;
        let sync = SourceSync::new(
            self.config,
            Arc::clone(&self.services.backend),
            Arc::clone(&self.services.archive),
        );
        Ok(sync.run(&manifest, request).await?)
    }

    /// Run the bootstrap state machine without launching.
    pub async fn bootstrap(&self, options: &BootstrapOptions) -> LaunchResult<BootstrapRun> {
        self.reset_log_file();
        Ok(self.machine().run(options).await?)
    }

    /// Start a fresh odoo-bin log for this run.
    fn reset_log_file(&self) {
        let Some(path) = self.config.log_file.as_deref() else {
            return;
        };
        match std::fs::remove_file(path) {
            Ok(()) => info!(path = %path.display(), "previous odoo log removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "cannot remove previous odoo log"),
        }
    }

    /// Probe the marker; anything but bootstrapped is an error with its own exit code.
    pub async fn bootstrap_status(&self) -> LaunchResult<BootstrapState> {
        let state = observe(self.services.store.as_ref()).await?;
        info!(db = %self.config.db.display_target(), state = %state, "bootstrap status");
        let db = self.config.db.db_name.clone();
        match state {
            BootstrapState::DatabaseExistsBootstrapped => Ok(state),
            BootstrapState::NoDatabase => Err(LaunchError::NoDatabase(db)),
            BootstrapState::DatabaseExistsNotBootstrapped => Err(LaunchError::NotBootstrapped(db)),
            BootstrapState::Error(reason) => {
                Err(BootstrapError::Connectivity(reason).into())
            }
        }
    }

    /// Apply one migration stage on demand.
    pub async fn migrate(&self, stage: MigrationStage) -> LaunchResult<usize> {
        let applier = MigrationApplier::new(self.services.shell.as_ref(), &self.config.migrations_dir);
        Ok(applier.apply(stage).await?)
    }

    /// Bootstrap options for `launch` and the `bootstrap` command.
    pub fn bootstrap_options(
        &self,
        install_workspace_modules: bool,
        demo: bool,
        extra_args: Vec<String>,
    ) -> BootstrapOptions {
        let init_modules = if install_workspace_modules {
            addons::init_modules(self.config)
        } else {
            addons::DEFAULT_INIT_MODULES
                .iter()
                .map(|m| m.to_string())
                .collect()
        };
        BootstrapOptions {
            demo,
            init_modules,
            extra_args,
        }
    }

    /// sync → bootstrap → handoff.
    ///
    /// With a real supervisor a successful call does not return.
    pub async fn launch(&self, request: &LaunchRequest) -> LaunchResult<()> {
        if request.update_source {
            let report = self
                .sync_sources(SyncRequest {
                    mode: SyncMode::All,
                    remove_unspecified: false,
                    dirty_policy: request.dirty_policy,
                    force_fetch: request.force_fetch,
                    pins: PinOptions::default(),
                })
                .await?;
            report.check()?;
        } else {
            info!("source update disabled");
        }

        let options = self.bootstrap_options(request.install_workspace_modules, false, Vec::new());
        let run = self.bootstrap(&options).await?;

        let paths = addons::addon_paths(self.config);
        if let Err(e) = addons::update_conf_addons_path(&self.config.conf_path, &paths) {
            warn!(conf = %self.config.conf_path.display(), error = %e, "cannot update odoo.conf");
        }

        let major = addons::odoo_major_version(&self.config.odoo_main);
        // A fresh bootstrap just installed the workspace modules.
        let update_modules = if request.install_workspace_modules && !run.bootstrapped {
            addons::workspace_modules(&self.config.workspace_addons, major)
        } else {
            Vec::new()
        };
        let command = launch_command(
            self.config,
            &paths,
            major,
            &LaunchOptions {
                dev_mode: request.dev_mode,
                update_modules,
                extra_args: request.extra_args.clone(),
            },
        );

        if !run.bootstrapped {
            let mut modules = addons::init_modules(self.config);
            modules.extend(flag_values(&command.args, &["-u", "--update", "-i", "--init"]));
            install_python_requirements(self.config, self.services.runner.as_ref(), &modules)
                .await?;
        }

        info!(bootstrapped = run.bootstrapped, "launching odoo");
        self.services
            .supervisor
            .handoff(command)
            .map_err(LaunchError::Handoff)
    }
}
