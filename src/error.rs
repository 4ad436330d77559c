//! Error types for the SQL gateway.
//!
//! This module defines all error types using `thiserror`. Variants follow the
//! failure classes the gateway reacts to differently: validation failures are
//! raised before any network activity, transient connection failures are
//! retried once during acquisition, and query failures are rolled back by the
//! caller before the lease is released.

use thiserror::Error;

/// MySQL error numbers that mean the physical connection is gone.
///
/// 1053 server shutdown, 1927 connection killed, 2006 server has gone away,
/// 2013 lost connection during query, 2055 lost connection (client side).
const CONNECTION_LOST_ERRNOS: &[u16] = &[1053, 1927, 2006, 2013, 2055];

/// Network-level failure classes expected to clear after reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    ConnectionLost,
    ConnectionReset,
    Timeout,
}

impl TransientKind {
    /// Lost and reset connections poison the whole pool; timeouts do not.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionLost | Self::ConnectionReset)
    }
}

impl std::fmt::Display for TransientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::ConnectionReset => write!(f, "connection reset"),
            Self::Timeout => write!(f, "timed out"),
        }
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid input: {message}")]
    Validation { message: String },

    #[error("Connection error ({kind}): {message}")]
    TransientConnection { kind: TransientKind, message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Connection pool saturated: {message}")]
    Backpressure { message: String },

    #[error("{message}")]
    QueryExecution {
        message: String,
        /// e.g., "42S02" for unknown table
        sql_state: Option<String>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Release failed: {message}")]
    Release { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a transient connection error of the given class.
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        Self::TransientConnection {
            kind,
            message: message.into(),
        }
    }

    /// Create a non-transient connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn backpressure(message: impl Into<String>) -> Self {
        Self::Backpressure {
            message: message.into(),
        }
    }

    /// Create a query execution error with optional SQL state.
    pub fn query(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::QueryExecution {
            message: message.into(),
            sql_state,
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    pub fn release(message: impl Into<String>) -> Self {
        Self::Release {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The transient class of this error, if any.
    pub fn transient_kind(&self) -> Option<TransientKind> {
        match self {
            Self::TransientConnection { kind, .. } => Some(*kind),
            Self::Timeout { .. } => Some(TransientKind::Timeout),
            _ => None,
        }
    }

    /// Check if this error may clear after rebuilding the pool.
    pub fn is_transient(&self) -> bool {
        self.transient_kind().is_some()
    }

    /// Check if this error means the pool's connections can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        self.transient_kind().is_some_and(|kind| kind.is_fatal())
    }
}

/// Map an I/O error kind onto a transient class.
fn classify_io(kind: std::io::ErrorKind) -> Option<TransientKind> {
    use std::io::ErrorKind;

    match kind {
        ErrorKind::ConnectionReset => Some(TransientKind::ConnectionReset),
        ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof
        | ErrorKind::NotConnected => Some(TransientKind::ConnectionLost),
        ErrorKind::TimedOut => Some(TransientKind::Timeout),
        _ => None,
    }
}

/// Convert sqlx errors to GatewayError.
impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => GatewayError::validation(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let errno = db_err
                    .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                    .map(|e| e.number());
                if errno.is_some_and(|n| CONNECTION_LOST_ERRNOS.contains(&n)) {
                    return GatewayError::transient(
                        TransientKind::ConnectionLost,
                        db_err.message(),
                    );
                }
                let sql_state = db_err.code().map(|c| c.to_string());
                GatewayError::query(db_err.message(), sql_state)
            }
            sqlx::Error::Io(io_err) => match classify_io(io_err.kind()) {
                Some(kind) => GatewayError::transient(kind, io_err.to_string()),
                None => GatewayError::connection(format!("I/O error: {}", io_err)),
            },
            sqlx::Error::PoolTimedOut => GatewayError::transient(
                TransientKind::Timeout,
                "timed out waiting for a pooled connection",
            ),
            sqlx::Error::PoolClosed => {
                GatewayError::transient(TransientKind::ConnectionLost, "connection pool is closed")
            }
            sqlx::Error::Tls(tls_err) => GatewayError::connection(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => {
                GatewayError::connection(format!("Protocol error: {}", msg))
            }
            sqlx::Error::RowNotFound => GatewayError::query("No rows returned", None),
            sqlx::Error::ColumnNotFound(col) => {
                GatewayError::query(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnDecode { index, source } => {
                GatewayError::query(format!("Failed to decode column {}: {}", index, source), None)
            }
            sqlx::Error::Decode(source) => {
                GatewayError::query(format!("Decode error: {}", source), None)
            }
            sqlx::Error::WorkerCrashed => {
                GatewayError::transient(TransientKind::ConnectionLost, "database worker crashed")
            }
            _ => GatewayError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
