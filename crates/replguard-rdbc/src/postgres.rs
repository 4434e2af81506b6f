//! tokio-postgres backend
//!
//! A connection owns one client; its background task forwards server
//! notices into a buffer the caller drains with
//! [`Connection::take_notices`]. Transactions are plain `BEGIN`/`COMMIT`
//! statements on the same client, so lock waits are governed by whatever
//! `lock_timeout` the session inherited from its role.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{AsyncMessage, Client, NoTls};
use tracing::{debug, error};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, Transaction};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

type Param = Box<dyn ToSql + Sync + Send>;

fn to_param(value: &Value) -> Param {
    match value {
        // tokio-postgres rejects this for non-text parameter types.
        Value::Null => Box::new(Option::<String>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Int32(n) => Box::new(*n),
        Value::Int64(n) => Box::new(*n),
        Value::String(s) => Box::new(s.clone()),
        Value::Array(items) => Box::new(
            items
                .iter()
                .map(|item| item.as_str().map(str::to_owned))
                .collect::<Vec<Option<String>>>(),
        ),
    }
}

/// Map a driver error onto [`Error`], keeping SQLSTATE and statement
fn classify(e: tokio_postgres::Error, sql: &str) -> Error {
    let Some(db) = e.as_db_error() else {
        return if e.is_closed() {
            Error::connection_with_source("connection closed", e)
        } else {
            Error::query_with_sql(e.to_string(), sql)
        };
    };

    if *db.code() == SqlState::LOCK_NOT_AVAILABLE {
        return Error::lock_not_available(db.message(), sql);
    }
    Error::Query {
        message: db.message().to_owned(),
        sql: Some(sql.to_owned()),
        code: Some(db.code().code().to_owned()),
        source: Some(Box::new(e)),
    }
}

fn decode_column(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Value {
    fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
        row: &'a tokio_postgres::Row,
        idx: usize,
    ) -> Option<T> {
        row.try_get::<_, Option<T>>(idx).ok().flatten()
    }

    let value = match *ty {
        Type::BOOL => get::<bool>(row, idx).map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx).map(|n| Value::Int32(n.into())),
        Type::INT4 => get::<i32>(row, idx).map(Value::Int32),
        Type::INT8 => get::<i64>(row, idx).map(Value::Int64),
        Type::TEXT_ARRAY | Type::NAME_ARRAY | Type::VARCHAR_ARRAY => {
            get::<Vec<Option<String>>>(row, idx)
                .map(|items| Value::Array(items.into_iter().map(Value::from).collect()))
        }
        // text, name, "char", and anything else that has a text form
        _ => get::<String>(row, idx).map(Value::String),
    };
    value.unwrap_or(Value::Null)
}

fn decode_row(row: &tokio_postgres::Row) -> Row {
    let (columns, values) = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| (col.name().to_owned(), decode_column(row, idx, col.type_())))
        .unzip();
    Row::new(columns, values)
}

async fn run_query(client: &Client, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let owned: Vec<Param> = params.iter().map(to_param).collect();
    let refs: Vec<&(dyn ToSql + Sync)> = owned
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect();
    let rows = client.query(sql, &refs).await.map_err(|e| classify(e, sql))?;
    Ok(rows.iter().map(decode_row).collect())
}

async fn run_execute(client: &Client, sql: &str, params: &[Value]) -> Result<u64> {
    let owned: Vec<Param> = params.iter().map(to_param).collect();
    let refs: Vec<&(dyn ToSql + Sync)> = owned
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect();
    client.execute(sql, &refs).await.map_err(|e| classify(e, sql))
}

/// One session on a PostgreSQL server
pub struct PgConnection {
    client: Arc<Client>,
    notices: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        run_query(&self.client, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        run_execute(&self.client, sql, params).await
    }

    async fn batch_execute(&self, sql: &str) -> Result<()> {
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| classify(e, sql))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| Error::transaction("BEGIN failed", e))?;
        Ok(Box::new(PgTransaction {
            client: Arc::clone(&self.client),
        }))
    }

    async fn take_notices(&self) -> Vec<String> {
        std::mem::take(&mut *self.notices.lock().await)
    }
}

/// Open transaction on a [`PgConnection`]
pub struct PgTransaction {
    client: Arc<Client>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        run_query(&self.client, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        run_execute(&self.client, sql, params).await
    }

    // A COMMIT can still fail on deferred constraints, so it is classified
    // like any other statement.
    async fn commit(self: Box<Self>) -> Result<()> {
        self.client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| classify(e, "COMMIT"))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.client
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| Error::transaction("ROLLBACK failed", e))
    }
}

/// Driver settings for a [`ConnectionConfig`]
pub fn pg_config(config: &ConnectionConfig) -> tokio_postgres::Config {
    let mut pg = tokio_postgres::Config::new();
    pg.host(&config.host)
        .port(config.port)
        .dbname(&config.dbname)
        .user(&config.user)
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    if let Some(password) = &config.password {
        pg.password(password);
    }
    if let Some(name) = &config.application_name {
        pg.application_name(name);
    }
    pg
}

/// Opens [`PgConnection`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let target = config.describe();
        let (client, mut connection) = pg_config(config).connect(NoTls).await.map_err(|e| {
            Error::connection_with_source(format!("failed to connect to {target}"), e)
        })?;

        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);
        let task_target = target.clone();

        // Ends when the client is dropped and the socket closes.
        tokio::spawn(async move {
            let mut messages = futures::stream::poll_fn(move |cx| connection.poll_message(cx));
            while let Some(message) = messages.next().await {
                match message {
                    Ok(AsyncMessage::Notice(notice)) => {
                        debug!(db = %task_target, severity = notice.severity(), "{}", notice.message());
                        sink.lock()
                            .await
                            .push(format!("{}:  {}", notice.severity(), notice.message()));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(db = %task_target, "connection error: {}", e);
                        break;
                    }
                }
            }
        });

        debug!(db = %target, "connected");
        Ok(Box::new(PgConnection {
            client: Arc::new(client),
            notices,
        }))
    }
}

/// Shorthand for `PgConnectionFactory.connect(config)`
pub async fn connect(config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
    PgConnectionFactory.connect(config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_value_binds() {
        for value in [
            Value::Null,
            Value::Bool(false),
            Value::Int32(7),
            Value::Int64(1 << 40),
            Value::from("orders"),
            Value::text_array(["public", "sales"]),
        ] {
            let _ = to_param(&value);
        }
    }

    #[test]
    fn test_null_binds_as_text() {
        let null = to_param(&Value::Null);
        assert_eq!(format!("{null:?}"), "None");
        assert_eq!(format!("{:?}", to_param(&Value::from("x"))), "\"x\"");
    }

    #[test]
    fn test_pg_config_carries_target_and_credentials() {
        let config = ConnectionConfig::new("db1", "orders", "owner")
            .with_port(6543)
            .with_password("pw");
        let pg = pg_config(&config);
        assert_eq!(pg.get_dbname(), Some("orders"));
        assert_eq!(pg.get_user(), Some("owner"));
        assert_eq!(pg.get_ports(), &[6543]);
        assert_eq!(pg.get_password(), Some(&b"pw"[..]));
        assert_eq!(pg.get_application_name(), Some("replguard"));
    }
}
