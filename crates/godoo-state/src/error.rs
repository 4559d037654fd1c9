//! Error types for godoo-state

use thiserror::Error;

/// Errors that can occur at the database boundary
#[derive(Error, Debug)]
pub enum StateError {
    /// The server could not be reached or refused the session.
    ///
    /// Transient from the engine's point of view: the caller's
    /// infrastructure decides whether and when to retry the whole run.
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Writing the bootstrap marker failed
    #[error("Writing bootstrap marker '{key}' failed: {reason}")]
    MarkerWrite { key: String, reason: String },
}

impl StateError {
    /// Whether this error means the database could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StateError::Connection(_))
    }
}

impl From<sqlx::Error> for StateError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => StateError::Connection(err.to_string()),
            other => StateError::Query(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_is_connectivity() {
        let err = StateError::Connection("timeout".to_string());
        assert!(err.is_connectivity());
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_query_error_is_not_connectivity() {
        let err = StateError::Query("syntax error".to_string());
        assert!(!err.is_connectivity());
    }

    #[test]
    fn test_marker_write_error_names_key() {
        let err = StateError::MarkerWrite {
            key: "godoo.bootstrapped".to_string(),
            reason: "read-only transaction".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("godoo.bootstrapped"));
        assert!(msg.contains("read-only"));
    }

    #[test]
    fn test_sqlx_io_error_maps_to_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: StateError = sqlx::Error::Io(io).into();
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_query() {
        let err: StateError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StateError::Query(_)));
    }
}
