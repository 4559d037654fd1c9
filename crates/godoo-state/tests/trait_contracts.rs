//! Trait contract tests for BootstrapMarkerStore.
//!
//! The in-memory fake must honour the same contract as the PostgreSQL
//! store. When `GODOO_TEST_DB_HOST` (plus optional port/user/password) is set
//! in the environment or a `.env` file, the live store is exercised as well.

use godoo_state::fakes::MemoryMarkerStore;
use godoo_state::{BootstrapMarkerStore, DbConnection, MarkerProbe, PgMarkerStore};

// ===========================================================================
// Fake contract tests
// ===========================================================================

#[tokio::test]
async fn probe_reports_each_database_state() {
    assert_eq!(
        MemoryMarkerStore::missing().probe().await.unwrap(),
        MarkerProbe::DoesNotExist
    );
    assert_eq!(
        MemoryMarkerStore::unmarked().probe().await.unwrap(),
        MarkerProbe::ExistsUnmarked
    );
    assert_eq!(
        MemoryMarkerStore::marked().probe().await.unwrap(),
        MarkerProbe::ExistsMarked
    );
}

#[tokio::test]
async fn unreachable_probe_is_connectivity_error() {
    let store = MemoryMarkerStore::unreachable();
    let err = store.probe().await.unwrap_err();
    assert!(err.is_connectivity());
}

#[tokio::test]
async fn failing_query_is_not_a_connectivity_error() {
    let store = MemoryMarkerStore::failing_query();
    let err = store.probe().await.unwrap_err();
    assert!(!err.is_connectivity());
    assert!(matches!(err, godoo_state::StateError::Query(_)));
    assert!(store.write_marker().await.is_err());
}

#[tokio::test]
async fn write_marker_then_probe_is_marked() {
    let store = MemoryMarkerStore::unmarked();
    store.write_marker().await.unwrap();
    assert_eq!(store.probe().await.unwrap(), MarkerProbe::ExistsMarked);
    assert_eq!(store.write_count(), 1);
    assert_eq!(store.probe_count(), 1);
}

#[tokio::test]
async fn write_marker_is_idempotent() {
    let store = MemoryMarkerStore::marked();
    store.write_marker().await.unwrap();
    store.write_marker().await.unwrap();
    assert_eq!(store.probe().await.unwrap(), MarkerProbe::ExistsMarked);
}

#[tokio::test]
async fn ignoring_writes_keeps_database_unmarked() {
    let store = MemoryMarkerStore::missing().ignoring_writes();
    store.write_marker().await.unwrap();
    assert_eq!(store.probe().await.unwrap(), MarkerProbe::DoesNotExist);
}

#[tokio::test]
async fn store_usable_as_trait_object() {
    let store: Box<dyn BootstrapMarkerStore> = Box::new(MemoryMarkerStore::missing());
    store.write_marker().await.unwrap();
    assert_eq!(store.probe().await.unwrap(), MarkerProbe::ExistsMarked);
}

// ===========================================================================
// Live PostgreSQL (opt-in)
// ===========================================================================

fn live_connection() -> Option<DbConnection> {
    dotenvy::dotenv().ok();
    let host = std::env::var("GODOO_TEST_DB_HOST").ok()?;
    let port = std::env::var("GODOO_TEST_DB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5432);
    let user = std::env::var("GODOO_TEST_DB_USER").unwrap_or_else(|_| "odoo".to_string());
    let password = std::env::var("GODOO_TEST_DB_PASSWORD").unwrap_or_else(|_| "odoo".to_string());
    Some(
        DbConnection::new("postgres")
            .with_host(host)
            .with_port(port)
            .with_credentials(user, password),
    )
}

#[tokio::test]
async fn live_missing_database_reports_does_not_exist() {
    let Some(conn) = live_connection() else {
        eprintln!("GODOO_TEST_DB_HOST not set; skipping live PostgreSQL test");
        return;
    };
    let mut conn = conn;
    conn.db_name = format!("godoo_missing_{}", std::process::id());

    let store = PgMarkerStore::new(conn);
    assert_eq!(store.probe().await.unwrap(), MarkerProbe::DoesNotExist);
}

#[tokio::test]
async fn live_database_without_odoo_tables_is_unmarked() {
    let Some(conn) = live_connection() else {
        eprintln!("GODOO_TEST_DB_HOST not set; skipping live PostgreSQL test");
        return;
    };
    // The maintenance database exists but has no ir_config_parameter table.
    let store = PgMarkerStore::new(conn);
    assert_eq!(store.probe().await.unwrap(), MarkerProbe::ExistsUnmarked);
}
