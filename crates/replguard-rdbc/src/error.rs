//! Error types for replguard-rdbc
//!
//! Driver errors are classified so callers can tell a recoverable per-object
//! failure (a lock that could not be acquired within `lock_timeout`) from a
//! failure that must abort the whole operation (connection loss, bad SQL).

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// SQLSTATE raised when `lock_timeout` expires or `NOWAIT` fails
pub const SQLSTATE_LOCK_NOT_AVAILABLE: &str = "55P03";

/// SQLSTATEs raised when a relation or constraint of that name exists
pub const SQLSTATE_DUPLICATE_TABLE: &str = "42P07";
pub const SQLSTATE_DUPLICATE_OBJECT: &str = "42710";

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The session could not be opened or was lost
    Connection,
    /// The server rejected a statement
    Query,
    /// BEGIN, COMMIT or ROLLBACK failed
    Transaction,
    /// A lock could not be acquired in time
    LockTimeout,
    /// A result row did not have the expected shape
    Decode,
    /// Caller supplied an unusable name
    Input,
}

impl ErrorCategory {
    /// Only a lock timeout is confined to the object being mutated
    #[inline]
    pub const fn is_recoverable(self) -> bool {
        matches!(self, Self::LockTimeout)
    }

    /// Short name used in logs
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Query => "query",
            Self::Transaction => "transaction",
            Self::LockTimeout => "lock_timeout",
            Self::Decode => "decode",
            Self::Input => "input",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database error
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Session could not be opened, or the server went away
    #[error("database unreachable: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Statement rejected by the server
    #[error("statement failed: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        /// SQLSTATE reported by the server
        code: Option<String>,
        #[source]
        source: Option<BoxedSource>,
    },

    /// SQLSTATE 55P03
    #[error("lock not available: {message}")]
    LockNotAvailable { message: String, sql: Option<String> },

    #[error("transaction control failed: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Column missing from a row or of an unexpected type
    #[error("cannot read column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Name rejected before it reached the server
    #[error("invalid identifier '{name}': {reason}")]
    InvalidIdentifier { name: String, reason: String },
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::LockNotAvailable { .. } => ErrorCategory::LockTimeout,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Decode { .. } => ErrorCategory::Decode,
            Self::InvalidIdentifier { .. } => ErrorCategory::Input,
        }
    }

    /// Whether the failure is confined to the object being mutated
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        self.category().is_recoverable()
    }

    #[inline]
    pub fn is_lock_not_available(&self) -> bool {
        matches!(self, Self::LockNotAvailable { .. })
    }

    /// The statement tried to create something that is already there
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self.sqlstate(),
            Some(SQLSTATE_DUPLICATE_TABLE | SQLSTATE_DUPLICATE_OBJECT)
        )
    }

    /// SQLSTATE reported for this error, if any
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. } => code.as_deref(),
            Self::LockNotAvailable { .. } => Some(SQLSTATE_LOCK_NOT_AVAILABLE),
            _ => None,
        }
    }

    /// Statement that failed, when known
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Query { sql, .. } | Self::LockNotAvailable { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Rejected statement without SQL or SQLSTATE attached
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            code: None,
            source: None,
        }
    }

    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            code: None,
            source: None,
        }
    }

    /// Rejected statement with the server's SQLSTATE
    pub fn query_with_code(
        message: impl Into<String>,
        sql: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            code: Some(code.into()),
            source: None,
        }
    }

    pub fn lock_not_available(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::LockNotAvailable {
            message: message.into(),
            sql: Some(sql.into()),
        }
    }

    pub fn transaction(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transaction {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn invalid_identifier(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_lock_timeout_is_recoverable() {
        assert!(ErrorCategory::LockTimeout.is_recoverable());

        for category in [
            ErrorCategory::Connection,
            ErrorCategory::Query,
            ErrorCategory::Transaction,
            ErrorCategory::Decode,
            ErrorCategory::Input,
        ] {
            assert!(!category.is_recoverable(), "{category}");
        }
    }

    #[test]
    fn test_lock_not_available_keeps_statement() {
        let err = Error::lock_not_available("canceling statement due to lock timeout", "ALTER");
        assert!(err.is_lock_not_available());
        assert!(err.is_recoverable());
        assert_eq!(err.sqlstate(), Some(SQLSTATE_LOCK_NOT_AVAILABLE));
        assert_eq!(err.sql(), Some("ALTER"));
    }

    #[test]
    fn test_query_code_is_exposed() {
        let err = Error::query_with_code("relation does not exist", "SELECT 1", "42P01");
        assert_eq!(err.sqlstate(), Some("42P01"));
        assert!(!err.is_lock_not_available());
        assert!(!err.is_already_exists());
    }
}
