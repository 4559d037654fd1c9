//! Connection settings for the application database

use serde::{Deserialize, Serialize};

/// Connection parameters for the PostgreSQL server hosting the Odoo database.
///
/// Empty strings and a zero port mean "let libpq defaults decide"
/// (`PGHOST`, `PGPORT`, unix socket, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConnection {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Name of the main database (`ODOO_MAIN_DB`)
    pub db_name: String,
}

impl DbConnection {
    /// Create settings for a database name, everything else defaulted.
    pub fn new(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            ..Default::default()
        }
    }

    /// Set the server host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set credentials
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// The `--db_host/--db_port/...` flags understood by odoo-bin, omitting unset values.
    pub fn odoo_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if !self.host.is_empty() {
            flags.push(format!("--db_host={}", self.host));
        }
        if self.port != 0 {
            flags.push(format!("--db_port={}", self.port));
        }
        if !self.user.is_empty() {
            flags.push(format!("--db_user={}", self.user));
        }
        if !self.password.is_empty() {
            flags.push(format!("--db_password={}", self.password));
        }
        if !self.db_name.is_empty() {
            flags.push(format!("--database={}", self.db_name));
        }
        flags
    }

    /// Human-readable target for log lines; never includes the password.
    pub fn display_target(&self) -> String {
        let host = if self.host.is_empty() {
            "<default>"
        } else {
            self.host.as_str()
        };
        if self.port == 0 {
            format!("{}/{}", host, self.db_name)
        } else {
            format!("{}:{}/{}", host, self.port, self.db_name)
        }
    }
}
