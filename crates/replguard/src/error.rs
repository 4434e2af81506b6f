//! Error types for replguard
//!
//! Run-aborting failures are `Err` values of [`Error`]. Per-object failures
//! that a batch recovers from (a lock that could not be taken in time) are
//! never errors; they are reported as [`crate::report::SkippedObject`]s.

use thiserror::Error;

/// Result type alias for replguard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for replguard
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Database error (connection loss, failed statement, ...)
    #[error(transparent)]
    Database(#[from] replguard_rdbc::Error),

    /// Stored definitions disagree with discovered ones; nothing was dropped
    #[error(
        "backup consistency mismatch for {namespace}.{table}: expected {expected} stored \
         definition(s), found {actual}; aborting without dropping any index or constraint"
    )]
    BackupConsistencyMismatch {
        namespace: String,
        table: String,
        expected: i64,
        actual: i64,
    },

    /// The replication engine CLI could not be spawned or failed
    #[error("replication engine command '{command}' failed: {message}")]
    Engine { command: String, message: String },

    /// A post-condition check failed
    #[error("check failed: {check}: {message}")]
    CheckFailed { check: String, message: String },

    /// Operator interrupted a governed mutation
    #[error("interrupted by operator")]
    Interrupted,

    /// Operation name not present in the registry
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    /// IO error (pid files, process control)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an engine error
    pub fn engine(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a check failure
    pub fn check_failed(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CheckFailed {
            check: check.into(),
            message: message.into(),
        }
    }

    /// Whether the database connection itself failed
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Database(e) if e.category() == replguard_rdbc::error::ErrorCategory::Connection
        )
    }
}
