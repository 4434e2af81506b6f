//! Backup store for dropped index and constraint DDL
//!
//! Lives in the engine's metadata database. Rows are keyed on
//! `(schemaname, indexname, repl_name)`; storing the same definition twice
//! is a no-op.

use replguard_rdbc::{Connection, Value};

use crate::catalog::IndexDefinition;
use crate::error::Result;

/// Schema and table of the store
pub const INSTALL_SQL: &str = "CREATE SCHEMA IF NOT EXISTS manage_indexes;
CREATE TABLE IF NOT EXISTS manage_indexes.index_definitions (
    schemaname text NOT NULL,
    tablename  text NOT NULL,
    indexname  text NOT NULL,
    create_ddl text NOT NULL,
    drop_ddl   text NOT NULL,
    repl_name  text NOT NULL,
    UNIQUE (schemaname, indexname, repl_name)
);";

const INSERT_SQL: &str = "INSERT INTO manage_indexes.index_definitions (
    schemaname, tablename, indexname, create_ddl, drop_ddl, repl_name
) VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (schemaname, indexname, repl_name) DO NOTHING";

const COUNT_SQL: &str = "SELECT count(*) AS n
FROM manage_indexes.index_definitions
WHERE repl_name = $1
    AND schemaname = $2
    AND tablename = $3";

const SELECT_SQL: &str = "SELECT schemaname, tablename, indexname, create_ddl, drop_ddl
FROM manage_indexes.index_definitions
WHERE repl_name = $1
ORDER BY schemaname, tablename, indexname";

/// Access to `manage_indexes.index_definitions`
pub struct BackupStore<'a> {
    conn: &'a dyn Connection,
}

impl<'a> BackupStore<'a> {
    pub fn new(conn: &'a dyn Connection) -> Self {
        Self { conn }
    }

    /// Create the schema and table if absent
    pub async fn install(&self) -> Result<()> {
        self.conn.batch_execute(INSTALL_SQL).await?;
        Ok(())
    }

    /// Whether the store table exists
    pub async fn is_installed(&self) -> Result<bool> {
        let row = self
            .conn
            .query_one(
                "SELECT to_regclass('manage_indexes.index_definitions') IS NOT NULL AS installed",
                &[],
            )
            .await?;
        Ok(row
            .and_then(|r| r.get_by_name("installed").and_then(|v| v.as_bool()))
            .unwrap_or(false))
    }

    /// Insert a definition unless one with the same key exists; returns rows inserted
    pub async fn store(&self, definition: &IndexDefinition) -> Result<u64> {
        let inserted = self
            .conn
            .execute(
                INSERT_SQL,
                &[
                    Value::from(definition.namespace.as_str()),
                    Value::from(definition.table.as_str()),
                    Value::from(definition.name.as_str()),
                    Value::from(definition.create_ddl.as_str()),
                    Value::from(definition.drop_ddl.as_str()),
                    Value::from(definition.replication_name.as_str()),
                ],
            )
            .await?;
        Ok(inserted)
    }

    /// Number of definitions stored for a table
    pub async fn count_for_table(
        &self,
        replication_name: &str,
        namespace: &str,
        table: &str,
    ) -> Result<i64> {
        let row = self
            .conn
            .query_one(
                COUNT_SQL,
                &[
                    Value::from(replication_name),
                    Value::from(namespace),
                    Value::from(table),
                ],
            )
            .await?;
        Ok(row.map(|r| r.require_i64("n")).transpose()?.unwrap_or(0))
    }

    /// All definitions for a replication name, ordered by namespace, table and name
    pub async fn definitions(&self, replication_name: &str) -> Result<Vec<IndexDefinition>> {
        let rows = self
            .conn
            .query(SELECT_SQL, &[Value::from(replication_name)])
            .await?;
        let definitions = rows
            .iter()
            .map(|row| IndexDefinition::from_row(row, replication_name))
            .collect::<replguard_rdbc::Result<Vec<_>>>()?;
        Ok(definitions)
    }
}
