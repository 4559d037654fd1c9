//! godoo core library
//!
//! Manifest-driven source synchronization and the bootstrap/launch state
//! machine for Odoo workspaces.

pub mod addons;
pub mod bootstrap;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fakes;
pub mod git;
pub mod manifest;
pub mod migrations;
pub mod runtime;
pub mod sync;
pub mod telemetry;

pub use bootstrap::{decide, BootstrapMachine, BootstrapRun, BootstrapState, LaunchDecision};
pub use config::{split_args, GodooConfig, Stage};
pub use coordinator::{LaunchCoordinator, LaunchRequest, Services};
pub use error::{
    BootstrapError, BootstrapResult, LaunchError, LaunchResult, ManifestError, ManifestResult,
    MigrationError, MigrationResult, SyncError, SyncResult,
};
pub use git::{CliGit, LocalCheckout, SourceBackend};
pub use manifest::{Manifest, RepositorySpec};
pub use migrations::{MigrationApplier, MigrationStage};
pub use runtime::{
    AppShell, BootstrapOptions, LaunchCommand, LaunchOptions, ProcessRunner, ScriptOutcome,
    Supervisor,
};
pub use sync::{
    DirtyPolicy, PinOptions, RepoSynchronizer, SourceSync, SyncAction, SyncDecision, SyncJob,
    SyncMode, SyncOptions, SyncReport, SyncRequest, SyncRunner, TargetRef,
};
pub use telemetry::init_tracing;

pub use godoo_state::{BootstrapMarkerStore, DbConnection, MarkerProbe, PgMarkerStore};
