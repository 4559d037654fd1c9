//! Error types for manifest loading, source sync, bootstrap and launch.

use std::path::PathBuf;

use thiserror::Error;

use crate::migrations::MigrationStage;

/// Errors produced while reading `odoo_manifest.yml`.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("cannot read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Structural problem in the document.
    #[error("malformed manifest: {0}")]
    Malformed(String),

    /// The mandatory `odoo` entry is absent.
    #[error("manifest has no 'odoo' entry")]
    MissingMain,
}

pub type ManifestResult<T> = std::result::Result<T, ManifestError>;

/// Errors produced while synchronizing a single source.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Remote unreachable, DNS failure or rejected credentials.
    #[error("network or authentication failure for {repo}: {detail}")]
    NetworkOrAuth { repo: String, detail: String },

    /// The branch or commit does not exist on the remote.
    #[error("ref '{reference}' not found for {repo}")]
    InvalidRef { repo: String, reference: String },

    /// Local modifications would be destroyed.
    #[error("{repo} has local modifications at {path}; refusing to overwrite (use --discard-local-changes)")]
    DirtyWorktree { repo: String, path: PathBuf },

    /// The per-repository deadline elapsed.
    #[error("sync of {repo} timed out after {secs}s")]
    Timeout { repo: String, secs: u64 },

    /// Any other git failure.
    #[error("git {command} failed for {repo}: {detail}")]
    Git {
        repo: String,
        command: String,
        detail: String,
    },

    /// Archive download or extraction failed.
    #[error("archive error for {repo}: {detail}")]
    Archive { repo: String, detail: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The run was interrupted.
    #[error("sync cancelled")]
    Cancelled,

    /// Another invocation holds the workspace lock.
    #[error("another godoo run holds the lock at {0}")]
    Locked(PathBuf),

    /// One or more mandatory sources failed; carries the first failure.
    #[error("mandatory source {repo} failed: {detail}")]
    MandatoryFailed { repo: String, detail: String },
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Errors produced by the migration applier.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A unit exited unsuccessfully; later units were not run.
    #[error("migration {stage}/{unit} failed: {detail}")]
    UnitFailed {
        stage: MigrationStage,
        unit: String,
        detail: String,
    },

    /// The application shell could not be started.
    #[error("application shell unavailable: {0}")]
    Shell(String),

    #[error("cannot read migrations at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type MigrationResult<T> = std::result::Result<T, MigrationError>;

/// Errors produced by the bootstrap state machine.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The database server could not be reached. Surfaced verbatim.
    #[error("database connectivity error: {0}")]
    Connectivity(String),

    /// The server answered but the marker could not be queried.
    #[error("database query failed: {0}")]
    Query(String),

    /// The bootstrap procedure exited unsuccessfully.
    #[error("bootstrap procedure failed with exit code {exit_code}: {detail}")]
    Procedure { exit_code: i32, detail: String },

    /// The marker is still unset after a bootstrap that reported success.
    #[error("bootstrap completed but marker is not set (observed: {observed})")]
    Fatal { observed: String },

    /// The application shell failed outside a migration unit.
    #[error("application shell failed: {0}")]
    Shell(String),

    /// Python packages required by the modules could not be installed.
    #[error("python requirements install failed: {0}")]
    Requirements(String),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

pub type BootstrapResult<T> = std::result::Result<T, BootstrapError>;

/// Top-level error of a coordinator run, mapped onto stable exit codes.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Reported by status queries: the database does not exist.
    #[error("database '{0}' does not exist")]
    NoDatabase(String),

    /// Reported by status queries: the database exists without marker.
    #[error("database '{0}' exists but is not bootstrapped")]
    NotBootstrapped(String),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// Exec into the supervisor or application failed.
    #[error("launch handoff failed: {0}")]
    Handoff(String),
}

impl LaunchError {
    /// Stable process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::Manifest(_) | LaunchError::Sync(_) => 10,
            LaunchError::NoDatabase(_) => 20,
            LaunchError::NotBootstrapped(_) => 21,
            LaunchError::Bootstrap(e) => match e {
                BootstrapError::Connectivity(_) => 22,
                BootstrapError::Query(_) => 23,
                BootstrapError::Procedure { .. }
                | BootstrapError::Shell(_)
                | BootstrapError::Requirements(_) => 30,
                BootstrapError::Fatal { .. } => 31,
                BootstrapError::Migration(_) => 40,
            },
            LaunchError::Migration(_) => 40,
            LaunchError::Handoff(_) => 50,
        }
    }
}

pub type LaunchResult<T> = std::result::Result<T, LaunchError>;
