//! # replguard-rdbc
//!
//! The database layer under the replguard coordinator. It stays
//! small: replguard opens one PostgreSQL session per step, runs catalog
//! queries and short DDL transactions, and needs to know exactly one thing
//! about failures, namely whether the server gave up waiting for a lock
//! (SQLSTATE `55P03`). That case is recoverable for the object at hand;
//! every other error aborts the operation.
//!
//! ```rust,ignore
//! use replguard_rdbc::prelude::*;
//!
//! let config = ConnectionConfig::new("db-a", "app", "app_owner");
//! let conn = PgConnectionFactory.connect(&config).await?;
//!
//! let sql = format!("ALTER TABLE {} ENABLE ALWAYS TRIGGER {}",
//!     quote_qualified("public", "orders"), quote_ident("bucardo_kick_app_sync"));
//! match execute_in_transaction(conn.as_ref(), &sql).await {
//!     Err(e) if e.is_recoverable() => { /* skip this table */ }
//!     other => { other?; }
//! }
//! ```
//!
//! The `postgres` feature (on by default) provides the tokio-postgres backend.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod dialect;
pub mod error;
pub mod security;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Common imports
pub mod prelude {
    pub use crate::connection::{
        execute_in_transaction, Connection, ConnectionConfig, ConnectionFactory, Transaction,
    };
    pub use crate::dialect::{quote_ident, quote_qualified};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::types::{Row, Value};

    #[cfg(feature = "postgres")]
    pub use crate::postgres::PgConnectionFactory;
}

pub use connection::{execute_in_transaction, Connection, ConnectionConfig};
pub use error::{Error, Result};
pub use types::{Row, Value};
