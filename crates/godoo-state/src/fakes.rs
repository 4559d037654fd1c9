//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryMarkerStore`, which satisfies the `BootstrapMarkerStore`
//! contract without a PostgreSQL server and counts every call so tests can
//! assert how often the state machine touched the database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StateError;
use crate::storage_traits::{BootstrapMarkerStore, MarkerProbe, StateResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FakeDb {
    Missing,
    Unmarked,
    Marked,
    Unreachable,
    QueryFails,
}

/// In-memory marker store.
///
/// `write_marker()` flips a missing or unmarked database to marked, unless
/// the store was built with [`MemoryMarkerStore::ignoring_writes`], which
/// simulates a bootstrap that silently failed to persist its marker.
#[derive(Debug)]
pub struct MemoryMarkerStore {
    state: Mutex<FakeDb>,
    ignore_writes: bool,
    probes: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryMarkerStore {
    fn with_state(state: FakeDb) -> Self {
        Self {
            state: Mutex::new(state),
            ignore_writes: false,
            probes: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// The database does not exist yet.
    pub fn missing() -> Self {
        Self::with_state(FakeDb::Missing)
    }

    /// The database exists without marker.
    pub fn unmarked() -> Self {
        Self::with_state(FakeDb::Unmarked)
    }

    /// The database exists and is bootstrapped.
    pub fn marked() -> Self {
        Self::with_state(FakeDb::Marked)
    }

    /// Every call fails with a connectivity error.
    pub fn unreachable() -> Self {
        Self::with_state(FakeDb::Unreachable)
    }

    /// The server answers but the marker query fails.
    pub fn failing_query() -> Self {
        Self::with_state(FakeDb::QueryFails)
    }

    /// Accept `write_marker()` calls without changing state.
    pub fn ignoring_writes(mut self) -> Self {
        self.ignore_writes = true;
        self
    }

    /// Number of `probe()` calls so far.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Number of `write_marker()` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BootstrapMarkerStore for MemoryMarkerStore {
    async fn probe(&self) -> StateResult<MarkerProbe> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let state = *self.state.lock().unwrap();
        match state {
            FakeDb::Missing => Ok(MarkerProbe::DoesNotExist),
            FakeDb::Unmarked => Ok(MarkerProbe::ExistsUnmarked),
            FakeDb::Marked => Ok(MarkerProbe::ExistsMarked),
            FakeDb::Unreachable => Err(StateError::Connection(
                "connection refused (fake)".to_string(),
            )),
            FakeDb::QueryFails => Err(StateError::Query(
                "relation \"ir_config_parameter\" is corrupt (fake)".to_string(),
            )),
        }
    }

    async fn write_marker(&self) -> StateResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if *state == FakeDb::Unreachable {
            return Err(StateError::Connection(
                "connection refused (fake)".to_string(),
            ));
        }
        if *state == FakeDb::QueryFails {
            return Err(StateError::Query("read-only transaction (fake)".to_string()));
        }
        if !self.ignore_writes {
            *state = FakeDb::Marked;
        }
        Ok(())
    }
}
