//! godoo-state: database boundary for the godoo bootstrapper
//!
//! The engine does not manage the application database itself. It asks one
//! question ("does the database exist, and is it bootstrapped?") and issues
//! one command ("record that bootstrap completed").
//!
//! ## Key Components
//!
//! - `BootstrapMarkerStore`: the trait the bootstrap state machine consumes
//! - `PgMarkerStore`: PostgreSQL implementation over sqlx
//! - `fakes::MemoryMarkerStore`: in-memory implementation for tests

mod connection;
mod error;
pub mod fakes;
mod postgres;
pub mod storage_traits;

pub use connection::DbConnection;
pub use error::StateError;
pub use postgres::PgMarkerStore;
pub use storage_traits::{BootstrapMarkerStore, MarkerProbe, StateResult, DEFAULT_MARKER_KEY};
