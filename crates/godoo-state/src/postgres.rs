//! PostgreSQL implementation of [`BootstrapMarkerStore`]
//!
//! The marker lives in Odoo's own `ir_config_parameter` table so it is
//! dropped together with the database and survives container rebuilds.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};
use tracing::{debug, info, instrument, warn};

use crate::connection::DbConnection;
use crate::error::StateError;
use crate::storage_traits::{BootstrapMarkerStore, MarkerProbe, StateResult, DEFAULT_MARKER_KEY};

/// SQLSTATE `invalid_catalog_name`: the requested database does not exist.
const SQLSTATE_INVALID_CATALOG: &str = "3D000";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Marker store backed by a live PostgreSQL server.
///
/// Each call opens a short-lived connection; the engine probes at most a
/// handful of times per run so there is no pool.
#[derive(Debug, Clone)]
pub struct PgMarkerStore {
    conn: DbConnection,
    marker_key: String,
    connect_timeout: Duration,
}

impl PgMarkerStore {
    pub fn new(conn: DbConnection) -> Self {
        Self {
            conn,
            marker_key: DEFAULT_MARKER_KEY.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the `ir_config_parameter` key used as marker
    pub fn with_marker_key(mut self, key: impl Into<String>) -> Self {
        self.marker_key = key.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn marker_key(&self) -> &str {
        &self.marker_key
    }

    fn connect_options(&self) -> PgConnectOptions {
        let mut opts = PgConnectOptions::new().database(&self.conn.db_name);
        if !self.conn.host.is_empty() {
            opts = opts.host(&self.conn.host);
        }
        if self.conn.port != 0 {
            opts = opts.port(self.conn.port);
        }
        if !self.conn.user.is_empty() {
            opts = opts.username(&self.conn.user);
        }
        if !self.conn.password.is_empty() {
            opts = opts.password(&self.conn.password);
        }
        opts
    }

    /// Open a connection. `Ok(None)` means the server answered but the
    /// database does not exist.
    async fn open(&self) -> StateResult<Option<PgConnection>> {
        let target = self.conn.display_target();
        let opts = self.connect_options();
        let attempt = tokio::time::timeout(self.connect_timeout, opts.connect());
        match attempt.await {
            Err(_) => Err(StateError::Connection(format!(
                "timed out after {:?} connecting to {}",
                self.connect_timeout, target
            ))),
            Ok(Ok(conn)) => Ok(Some(conn)),
            Ok(Err(sqlx::Error::Database(db_err)))
                if db_err.code().as_deref() == Some(SQLSTATE_INVALID_CATALOG) =>
            {
                debug!(target = %target, "database does not exist");
                Ok(None)
            }
            Ok(Err(e)) => Err(StateError::Connection(format!("{}: {}", target, e))),
        }
    }
}

#[async_trait]
impl BootstrapMarkerStore for PgMarkerStore {
    #[instrument(skip(self), fields(db = %self.conn.db_name))]
    async fn probe(&self) -> StateResult<MarkerProbe> {
        let Some(mut conn) = self.open().await? else {
            return Ok(MarkerProbe::DoesNotExist);
        };

        let has_table: bool = sqlx::query_scalar(
            "SELECT to_regclass('public.ir_config_parameter') IS NOT NULL",
        )
        .fetch_one(&mut conn)
        .await?;

        let probe = if !has_table {
            MarkerProbe::ExistsUnmarked
        } else {
            let value: Option<String> =
                sqlx::query_scalar("SELECT value FROM ir_config_parameter WHERE key = $1")
                    .bind(&self.marker_key)
                    .fetch_optional(&mut conn)
                    .await?;
            match value {
                Some(v) if !v.trim().is_empty() => MarkerProbe::ExistsMarked,
                _ => MarkerProbe::ExistsUnmarked,
            }
        };

        if let Err(e) = conn.close().await {
            warn!(error = %e, "closing probe connection failed");
        }
        debug!(probe = %probe, "marker probed");
        Ok(probe)
    }

    #[instrument(skip(self), fields(db = %self.conn.db_name))]
    async fn write_marker(&self) -> StateResult<()> {
        let Some(mut conn) = self.open().await? else {
            return Err(StateError::MarkerWrite {
                key: self.marker_key.clone(),
                reason: format!("database '{}' does not exist", self.conn.db_name),
            });
        };

        let stamp = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO ir_config_parameter (key, value, create_date, write_date) \
             VALUES ($1, $2, now() at time zone 'UTC', now() at time zone 'UTC') \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, write_date = EXCLUDED.write_date",
        )
        .bind(&self.marker_key)
        .bind(&stamp)
        .execute(&mut conn)
        .await
        .map_err(|e| StateError::MarkerWrite {
            key: self.marker_key.clone(),
            reason: e.to_string(),
        })?;

        if let Err(e) = conn.close().await {
            warn!(error = %e, "closing marker connection failed");
        }
        info!(key = %self.marker_key, at = %stamp, "bootstrap marker written");
        Ok(())
    }
}
