//! Error types for the Postgres MCP Server.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Each variant renders as a short, specific message, because the text is what the
//! calling agent sees at the tool boundary.

use crate::models::QueryVerdict;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection pool exhausted: no connection became available within {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("Connection failed: {message}")]
    ConnectFailed { message: String, suggestion: String },

    /// Failure of the session itself (I/O, TLS, protocol). The session must not be reused.
    #[error("Connection lost: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Execution {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Schema introspection failed: {message}")]
    IntrospectionFailed { message: String },

    #[error("Query rejected: {0}")]
    Rejected(QueryVerdict),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a pool exhausted error.
    pub fn pool_exhausted(waited: Duration) -> Self {
        Self::PoolExhausted {
            waited_ms: waited.as_millis() as u64,
        }
    }

    /// Create a connect error with a helpful suggestion.
    pub fn connect_failed(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConnectFailed {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a connection-level error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn execution(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs: timeout.as_secs(),
        }
    }

    /// Create an introspection error.
    pub fn introspection_failed(message: impl Into<String>) -> Self {
        Self::IntrospectionFailed {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::ConnectFailed { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { .. } => {
                Some("All connections are busy; retry later or raise --pool-max-size")
            }
            Self::Timeout { .. } => {
                Some("Narrow the query or pass a larger timeout_secs (up to the server limit)")
            }
            _ => None,
        }
    }

    /// SQLSTATE reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Execution { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// True when the session that produced this error can no longer be trusted.
    ///
    /// A timed-out statement may still be running server-side, so it counts as
    /// connection-level. SQL errors leave the session reusable.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connect_failed(
                msg.to_string(),
                "Check the connection settings (host, port, dbname, user, sslmode)",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                // Class 08 (connection exception) and 57P0x (operator intervention)
                // mean the backend is gone.
                match code.as_deref() {
                    Some(c) if c.starts_with("08") || c.starts_with("57P0") => {
                        DbError::connection(db_err.message())
                    }
                    _ => DbError::execution(db_err.message(), code),
                }
            }
            sqlx::Error::RowNotFound => DbError::execution("No rows returned", None),
            sqlx::Error::Io(io_err) => DbError::connection(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => DbError::connection(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => DbError::connection(format!("Protocol error: {}", msg)),
            sqlx::Error::WorkerCrashed => DbError::connection("Database worker crashed"),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::execution(format!("Type not found: {}", type_name), None)
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::execution(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connect_failed("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_pool_exhausted_display() {
        let err = DbError::pool_exhausted(Duration::from_millis(250));
        assert_eq!(
            err.to_string(),
            "Connection pool exhausted: no connection became available within 250ms"
        );
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::connect_failed("refused", "Check that the server is running");
        assert_eq!(err.suggestion(), Some("Check that the server is running"));
        assert_eq!(DbError::internal("x").suggestion(), None);
    }

    #[test]
    fn test_connection_level_classification() {
        assert!(DbError::connection("reset by peer").is_connection_level());
        assert!(DbError::timeout("query", Duration::from_secs(30)).is_connection_level());
        assert!(!DbError::execution("syntax error", Some("42601".into())).is_connection_level());
        assert!(!DbError::internal("decode").is_connection_level());
    }

    #[test]
    fn test_sql_state() {
        let err = DbError::execution("relation does not exist", Some("42P01".to_string()));
        assert_eq!(err.sql_state(), Some("42P01"));
        assert_eq!(DbError::connection("gone").sql_state(), None);
    }

    #[test]
    fn test_io_error_is_connection_level() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: DbError = sqlx::Error::Io(io).into();
        assert!(err.is_connection_level());
    }

    #[test]
    fn test_row_not_found_is_execution() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbError::Execution { .. }));
    }

    #[test]
    fn test_rejected_display_carries_reason() {
        let err = DbError::Rejected(QueryVerdict::RejectedMultiStatement { count: 2 });
        let msg = err.to_string();
        assert!(msg.starts_with("Query rejected:"));
        assert!(msg.contains("2 statements"), "{}", msg);
    }
}
