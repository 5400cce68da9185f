//! Error types for the session facade.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Each variant names the stage that failed (pool construction, acquisition, statement
//! execution, payload conversion) so callers can decide whether a retry makes sense.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Pool initialization failed for {identity}: {message}")]
    PoolInitialization {
        identity: String,
        message: String,
        suggestion: String,
    },

    #[error("Connection pool not initialized: {identity}")]
    PoolNotInitialized { identity: String },

    #[error("Timed out after {timeout_ms}ms acquiring a connection for {identity}")]
    AcquisitionTimeout { identity: String, timeout_ms: u64 },

    #[error("Connection unavailable: {message}")]
    ConnectionUnavailable { message: String, suggestion: String },

    #[error("Statement execution failed: {message}")]
    StatementExecution {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Invalid callback: {message}")]
    InvalidCallback { message: String },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl DbError {
    /// Create a pool initialization error with a helpful suggestion.
    pub fn pool_initialization(
        identity: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::PoolInitialization {
            identity: identity.into(),
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn pool_not_initialized(identity: impl Into<String>) -> Self {
        Self::PoolNotInitialized {
            identity: identity.into(),
        }
    }

    pub fn acquisition_timeout(identity: impl Into<String>, timeout_ms: u64) -> Self {
        Self::AcquisitionTimeout {
            identity: identity.into(),
            timeout_ms,
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection_unavailable(
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::ConnectionUnavailable {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a statement error with optional SQL state.
    pub fn statement(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::StatementExecution {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn invalid_callback(message: impl Into<String>) -> Self {
        Self::InvalidCallback {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::PoolInitialization { suggestion, .. } => Some(suggestion),
            Self::ConnectionUnavailable { suggestion, .. } => Some(suggestion),
            Self::StatementExecution { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Acquisition and initialization failures invalidate the pool slot, so the
    /// next attempt builds a fresh pool.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolInitialization { .. }
                | Self::AcquisitionTimeout { .. }
                | Self::ConnectionUnavailable { .. }
        )
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::invalid_config(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::statement(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::statement(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::connection_unavailable(
                "Timed out waiting for a pooled connection",
                "Increase maxpool/maxsize or the acquisition timeout",
            ),
            sqlx::Error::PoolClosed => DbError::connection_unavailable(
                "Connection pool is closed",
                "Re-create the pool for this database",
            ),
            sqlx::Error::Io(io_err) => DbError::connection_unavailable(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection_unavailable(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection_unavailable(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::serialization(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => {
                DbError::serialization(format!("Decode error: {}", source))
            }
            sqlx::Error::WorkerCrashed => DbError::connection_unavailable(
                "Database worker crashed",
                "Re-acquire a connection",
            ),
            _ => DbError::statement(
                format!("Unknown database error: {}", err),
                None,
                "Check the statement and the database server logs",
            ),
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::serialization(err.to_string())
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
