//! Connection abstractions
//!
//! Everything above this crate talks to [`Connection`] and [`Transaction`]
//! trait objects, which lets the coordinator run against scripted doubles
//! in tests and against tokio-postgres in production.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Row, Value};

/// One database session. Statements outside [`Connection::begin`] autocommit.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Returns the affected row count
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run an unparameterized script, possibly several statements
    async fn batch_execute(&self, sql: &str) -> Result<()>;

    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// First row of the result, if any
    async fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// Drain the server notices (`RAISE NOTICE`, `WARNING`) seen so far
    async fn take_notices(&self) -> Vec<String> {
        Vec::new()
    }
}

/// An open transaction.
///
/// Must be finished with [`Transaction::commit`] or
/// [`Transaction::rollback`]; dropping it leaves the server-side transaction
/// open until the session ends.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Run a single statement in a transaction of its own.
///
/// On failure the transaction is rolled back and the statement's error is
/// returned. A rollback that fails as well is logged and otherwise ignored.
pub async fn execute_in_transaction(conn: &dyn Connection, sql: &str) -> Result<u64> {
    let tx = conn.begin().await?;
    let outcome = tx.execute(sql, &[]).await;
    match outcome {
        Ok(affected) => tx.commit().await.map(|()| affected),
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(%rollback, "rollback after failed statement also failed");
            }
            Err(e)
        }
    }
}

/// Where and as whom to connect
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    /// `None` for trust, peer or `.pgpass` authentication
    pub password: Option<String>,
    pub connect_timeout_ms: u64,
    /// Reported in `pg_stat_activity`
    pub application_name: Option<String>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("target", &self.describe())
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish_non_exhaustive()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            dbname: "postgres".into(),
            user: "postgres".into(),
            password: None,
            connect_timeout_ms: 10_000,
            application_name: Some("replguard".into()),
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, dbname: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            dbname: dbname.into(),
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Same server and credentials, another database
    pub fn with_dbname(mut self, dbname: impl Into<String>) -> Self {
        self.dbname = dbname.into();
        self
    }

    /// `user@host:port/dbname`, safe to log
    pub fn describe(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.dbname)
    }
}

/// Opens connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;
}
