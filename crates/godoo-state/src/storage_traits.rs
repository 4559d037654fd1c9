//! Storage trait definitions for godoo
//!
//! The engine never implements a database. It only needs two things from
//! the database side:
//! - a probe answering does-not-exist / exists-unmarked / exists-marked
//! - a command writing the "bootstrapped" marker
//!
//! In-memory fakes are provided for testing via the `fakes` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Result type for marker store operations
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Default `ir_config_parameter` key holding the bootstrap marker.
pub const DEFAULT_MARKER_KEY: &str = "godoo.bootstrapped";

/// Observable outcome of a marker probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerProbe {
    /// The target database does not exist on the server.
    DoesNotExist,
    /// The database exists but carries no (valid) bootstrap marker.
    ExistsUnmarked,
    /// The database exists and the bootstrap marker is set.
    ExistsMarked,
}

impl std::fmt::Display for MarkerProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MarkerProbe::DoesNotExist => "does-not-exist",
            MarkerProbe::ExistsUnmarked => "exists-unmarked",
            MarkerProbe::ExistsMarked => "exists-marked",
        };
        f.write_str(label)
    }
}

/// Database boundary consumed by the bootstrap state machine.
///
/// Guarantees:
/// - `probe()` distinguishes "database does not exist" (a legitimate first
///   run) from connectivity failures, which come back as
///   `StateError::Connection`.
/// - after a successful `write_marker()`, `probe()` reports `ExistsMarked`.
#[async_trait]
pub trait BootstrapMarkerStore: Send + Sync {
    /// Query the bootstrap marker of the target database.
    async fn probe(&self) -> StateResult<MarkerProbe>;

    /// Persist the bootstrap marker in the target database.
    async fn write_marker(&self) -> StateResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_probe_display() {
        assert_eq!(MarkerProbe::DoesNotExist.to_string(), "does-not-exist");
        assert_eq!(MarkerProbe::ExistsUnmarked.to_string(), "exists-unmarked");
        assert_eq!(MarkerProbe::ExistsMarked.to_string(), "exists-marked");
    }
}
