//! Bootstrap state machine.
//!
//! Each run observes the database marker once, decides, and acts:
//!
//! ```text
//! probe ─┬─ exists-marked ────────────────► plain launch
//!        ├─ exists-unmarked / missing ────► bootstrap ─► one_time
//!        │                                   └─ staging: admin reset ─► staging
//!        │                                   └─ development: development
//!        │                                  ─► marker ─► re-probe (unset ⇒ fatal)
//!        └─ unreachable ──────────────────► abort
//! ```
//!
//! The marker is written last, so a failed migration leaves the database
//! unmarked and the next run bootstraps and migrates again. There is no
//! retry loop: a marker that is still unset after a successful bootstrap is
//! fatal.
//!
//! Python requirements of the modules passed to `--init` are installed
//! right before the bootstrap procedure.

use std::fmt;

use godoo_state::{BootstrapMarkerStore, MarkerProbe, StateError};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::addons;
use crate::config::{GodooConfig, Stage};
use crate::error::{BootstrapError, BootstrapResult};
use crate::migrations::{MigrationApplier, MigrationStage};
use crate::runtime::{
    admin_password_script, bootstrap_command, flag_values, install_python_requirements, AppShell,
    BootstrapOptions, ProcessRunner,
};

/// Database state derived from one marker probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum BootstrapState {
    NoDatabase,
    DatabaseExistsNotBootstrapped,
    DatabaseExistsBootstrapped,
    Error(String),
}

impl From<MarkerProbe> for BootstrapState {
    fn from(probe: MarkerProbe) -> Self {
        match probe {
            MarkerProbe::DoesNotExist => BootstrapState::NoDatabase,
            MarkerProbe::ExistsUnmarked => BootstrapState::DatabaseExistsNotBootstrapped,
            MarkerProbe::ExistsMarked => BootstrapState::DatabaseExistsBootstrapped,
        }
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapState::NoDatabase => f.write_str("no-database"),
            BootstrapState::DatabaseExistsNotBootstrapped => f.write_str("not-bootstrapped"),
            BootstrapState::DatabaseExistsBootstrapped => f.write_str("bootstrapped"),
            BootstrapState::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// What the coordinator does next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "reason")]
pub enum LaunchDecision {
    RunFreshBootstrap,
    RunBootstrapThenStagingMigrations,
    RunPlainLaunch,
    Abort(String),
}

/// Pure decision table.
pub fn decide(state: &BootstrapState, stage: Stage) -> LaunchDecision {
    match state {
        BootstrapState::DatabaseExistsBootstrapped => LaunchDecision::RunPlainLaunch,
        BootstrapState::NoDatabase | BootstrapState::DatabaseExistsNotBootstrapped => match stage {
            Stage::Staging => LaunchDecision::RunBootstrapThenStagingMigrations,
            Stage::Production | Stage::Development => LaunchDecision::RunFreshBootstrap,
        },
        BootstrapState::Error(reason) => LaunchDecision::Abort(reason.clone()),
    }
}

/// Observe the marker, mapping connectivity failures to [`BootstrapState::Error`].
///
/// Any other store failure is returned as an error.
pub async fn observe(store: &dyn BootstrapMarkerStore) -> BootstrapResult<BootstrapState> {
    match store.probe().await {
        Ok(probe) => Ok(probe.into()),
        Err(e) if e.is_connectivity() => Ok(BootstrapState::Error(e.to_string())),
        Err(e) => Err(state_error(e)),
    }
}

/// What a [`BootstrapMachine::run`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapRun {
    pub initial: BootstrapState,
    pub decision: LaunchDecision,
    /// The bootstrap procedure ran in this invocation.
    pub bootstrapped: bool,
    pub migrations_applied: usize,
}

fn state_error(e: StateError) -> BootstrapError {
    match e {
        StateError::Connection(_) => BootstrapError::Connectivity(e.to_string()),
        StateError::Query(_) => BootstrapError::Query(e.to_string()),
        StateError::MarkerWrite { .. } => BootstrapError::Fatal {
            observed: e.to_string(),
        },
    }
}

pub struct BootstrapMachine<'a> {
    config: &'a GodooConfig,
    store: &'a dyn BootstrapMarkerStore,
    runner: &'a dyn ProcessRunner,
    shell: &'a dyn AppShell,
}

impl<'a> BootstrapMachine<'a> {
    pub fn new(
        config: &'a GodooConfig,
        store: &'a dyn BootstrapMarkerStore,
        runner: &'a dyn ProcessRunner,
        shell: &'a dyn AppShell,
    ) -> Self {
        Self {
            config,
            store,
            runner,
            shell,
        }
    }

    /// Observe, decide and, when needed, bootstrap and migrate.
    pub async fn run(&self, options: &BootstrapOptions) -> BootstrapResult<BootstrapRun> {
        let initial = observe(self.store).await?;
        let decision = decide(&initial, self.config.stage);
        info!(
            db = %self.config.db.display_target(),
            state = %initial,
            stage = %self.config.stage,
            ?decision,
            "bootstrap state observed"
        );

        match &decision {
            LaunchDecision::Abort(reason) => {
                error!(reason = %reason, "database unreachable, aborting");
                Err(BootstrapError::Connectivity(reason.clone()))
            }
            LaunchDecision::RunPlainLaunch => Ok(BootstrapRun {
                initial,
                decision,
                bootstrapped: false,
                migrations_applied: 0,
            }),
            LaunchDecision::RunFreshBootstrap | LaunchDecision::RunBootstrapThenStagingMigrations => {
                let applied = self.bootstrap(options, &decision).await?;
                Ok(BootstrapRun {
                    initial,
                    decision,
                    bootstrapped: true,
                    migrations_applied: applied,
                })
            }
        }
    }

    async fn bootstrap(
        &self,
        options: &BootstrapOptions,
        decision: &LaunchDecision,
    ) -> BootstrapResult<usize> {
        self.run_procedure(options).await?;

        let applier = MigrationApplier::new(self.shell, &self.config.migrations_dir);
        let mut applied = applier.apply(MigrationStage::OneTime).await?;

        if *decision == LaunchDecision::RunBootstrapThenStagingMigrations {
            self.reset_admin_password().await?;
            applied += applier.apply(MigrationStage::Staging).await?;
        } else if self.config.stage == Stage::Development {
            applied += applier.apply(MigrationStage::Development).await?;
        }

        self.store.write_marker().await.map_err(state_error)?;
        info!(migrations = applied, "bootstrap marker written");

        match self.store.probe().await.map_err(state_error)? {
            MarkerProbe::ExistsMarked => Ok(applied),
            observed => {
                error!(observed = %observed, "marker unset after bootstrap");
                Err(BootstrapError::Fatal {
                    observed: observed.to_string(),
                })
            }
        }
    }

    async fn run_procedure(&self, options: &BootstrapOptions) -> BootstrapResult<()> {
        let paths = addons::addon_paths(self.config);
        let command = bootstrap_command(self.config, &paths, options);
        let modules = flag_values(&command.args, &["-i", "--init"]);
        install_python_requirements(self.config, self.runner, &modules).await?;
        info!(modules = ?modules, demo = options.demo, "running bootstrap procedure");

        let exit_code = self
            .runner
            .run(&command)
            .await
            .map_err(|detail| BootstrapError::Procedure {
                exit_code: -1,
                detail,
            })?;
        if exit_code != 0 {
            error!(exit_code, "odoo-bin bootstrap failed");
            return Err(BootstrapError::Procedure {
                exit_code,
                detail: format!("{} exited with {exit_code}", command.program.display()),
            });
        }
        Ok(())
    }

    async fn reset_admin_password(&self) -> BootstrapResult<()> {
        let Some(password) = self.config.admin_password.as_deref() else {
            warn!("no admin password configured, keeping bootstrap credentials");
            return Ok(());
        };
        let outcome = self
            .shell
            .run_script("reset_admin_password", &admin_password_script(password))
            .await
            .map_err(BootstrapError::Shell)?;
        if !outcome.success {
            return Err(BootstrapError::Shell(format!(
                "admin password reset failed: {}",
                outcome.output.trim()
            )));
        }
        info!("admin password reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_table() {
        use BootstrapState::*;
        assert_eq!(
            decide(&DatabaseExistsBootstrapped, Stage::Staging),
            LaunchDecision::RunPlainLaunch
        );
        assert_eq!(
            decide(&NoDatabase, Stage::Production),
            LaunchDecision::RunFreshBootstrap
        );
        assert_eq!(
            decide(&DatabaseExistsNotBootstrapped, Stage::Staging),
            LaunchDecision::RunBootstrapThenStagingMigrations
        );
        assert_eq!(
            decide(&NoDatabase, Stage::Development),
            LaunchDecision::RunFreshBootstrap
        );
        assert_eq!(
            decide(&Error("refused".into()), Stage::Production),
            LaunchDecision::Abort("refused".into())
        );
    }

    #[test]
    fn state_from_probe() {
        assert_eq!(
            BootstrapState::from(MarkerProbe::DoesNotExist),
            BootstrapState::NoDatabase
        );
        assert_eq!(
            BootstrapState::from(MarkerProbe::ExistsMarked).to_string(),
            "bootstrapped"
        );
    }

    #[test]
    fn connectivity_errors_stay_connectivity() {
        let err = state_error(StateError::Connection("refused".into()));
        assert!(matches!(err, BootstrapError::Connectivity(_)));
        let err = state_error(StateError::Query("syntax".into()));
        assert!(matches!(err, BootstrapError::Query(_)));
        let err = state_error(StateError::MarkerWrite {
            key: "godoo.bootstrapped".into(),
            reason: "read-only".into(),
        });
        assert!(matches!(err, BootstrapError::Fatal { .. }));
    }
}
