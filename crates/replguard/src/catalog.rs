//! Object catalog gateway
//!
//! Read-only queries against the primary's system catalogs. Results are
//! recomputed on every call; the catalog can change between calls.

use std::fmt;

use replguard_rdbc::dialect::quote_qualified;
use replguard_rdbc::{Connection, Row, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::size::SizeThreshold;

/// Kind of a replicated relation, mapped to `pg_class.relkind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Plain table (`r`)
    Table,
    /// Partitioned table (`p`)
    Partition,
    /// Sequence (`S`)
    Sequence,
    /// Index (`i`)
    Index,
}

impl ObjectKind {
    /// `pg_class.relkind` code
    pub const fn relkind(self) -> &'static str {
        match self {
            Self::Table => "r",
            Self::Partition => "p",
            Self::Sequence => "S",
            Self::Index => "i",
        }
    }
}

/// A relation selected for replication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplicatedObject {
    pub namespace: String,
    pub name: String,
    pub kind: ObjectKind,
}

impl ReplicatedObject {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind,
        }
    }

    /// Shorthand for a plain table
    pub fn table(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(namespace, name, ObjectKind::Table)
    }

    /// Quoted `"namespace"."name"` for use in DDL
    pub fn quoted(&self) -> String {
        quote_qualified(&self.namespace, &self.name)
    }
}

impl fmt::Display for ReplicatedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Namespace/table include and exclude lists
///
/// An absent or empty list adds no predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReplicationObjects {
    #[serde(default)]
    pub namespace_include: Option<Vec<String>>,
    #[serde(default)]
    pub namespace_exclude: Option<Vec<String>>,
    #[serde(default)]
    pub table_include: Option<Vec<String>>,
    #[serde(default)]
    pub table_exclude: Option<Vec<String>>,
}

impl ReplicationObjects {
    /// Build the `AND ...` predicates for this filter.
    ///
    /// Placeholders start at `$first_param`; the returned values are bound in
    /// order after the caller's own parameters.
    pub fn predicates(&self, first_param: usize) -> (String, Vec<Value>) {
        let lists = [
            (&self.namespace_include, "pn.nspname::text = ANY"),
            (&self.namespace_exclude, "pn.nspname::text <> ALL"),
            (&self.table_include, "pc.relname::text = ANY"),
            (&self.table_exclude, "pc.relname::text <> ALL"),
        ];

        let mut clause = String::new();
        let mut params = Vec::new();
        for (list, predicate) in lists {
            let Some(names) = list.as_ref().filter(|names| !names.is_empty()) else {
                continue;
            };
            params.push(Value::text_array(names.iter().cloned()));
            clause.push_str(&format!(
                "\n    AND {}(${}::text[])",
                predicate,
                first_param + params.len() - 1
            ));
        }
        (clause, params)
    }
}

/// Find the relations of `kind` selected by `filter`.
///
/// Relations that are the parent of an inheritance relationship are left
/// out; their children are matched on their own.
pub async fn find_objects(
    conn: &dyn Connection,
    kind: ObjectKind,
    filter: &ReplicationObjects,
) -> Result<Vec<ReplicatedObject>> {
    let (predicates, filter_params) = filter.predicates(2);
    let sql = format!(
        "SELECT pn.nspname::text AS nspname, pc.relname::text AS relname
FROM pg_catalog.pg_class pc
    JOIN pg_catalog.pg_namespace pn ON pn.oid = pc.relnamespace
    LEFT JOIN pg_catalog.pg_inherits pi ON pi.inhparent = pc.oid
WHERE pc.relkind::text = $1
    AND pi.inhrelid IS NULL{predicates}
ORDER BY pn.nspname, pc.relname"
    );

    let mut params = vec![Value::from(kind.relkind())];
    params.extend(filter_params);

    let rows = conn.query(&sql, &params).await?;
    let objects = rows
        .iter()
        .map(|row| {
            Ok(ReplicatedObject::new(
                row.require_str("nspname")?,
                row.require_str("relname")?,
                kind,
            ))
        })
        .collect::<replguard_rdbc::Result<Vec<_>>>()?;

    debug!(kind = ?kind, count = objects.len(), "found replication objects");
    Ok(objects)
}

/// Whether a stored definition is a plain index or a unique constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    /// Secondary index, dropped with `DROP INDEX IF EXISTS`
    Index,
    /// Unique constraint, dropped with `ALTER TABLE ... DROP CONSTRAINT`
    UniqueConstraint,
}

impl DefinitionKind {
    /// Derive the kind from the drop statement captured at backup time
    pub fn from_drop_ddl(drop_ddl: &str) -> Self {
        if drop_ddl.trim_start().to_ascii_uppercase().starts_with("DROP INDEX") {
            Self::Index
        } else {
            Self::UniqueConstraint
        }
    }
}

/// DDL needed to drop and later recreate one index or unique constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub namespace: String,
    pub table: String,
    /// Index or constraint name
    pub name: String,
    pub create_ddl: String,
    pub drop_ddl: String,
    pub replication_name: String,
    pub kind: DefinitionKind,
}

impl IndexDefinition {
    /// Decode a row with `schemaname, tablename, indexname, create_ddl, drop_ddl`
    pub fn from_row(row: &Row, replication_name: &str) -> replguard_rdbc::Result<Self> {
        let drop_ddl = row.require_str("drop_ddl")?.to_string();
        Ok(Self {
            namespace: row.require_str("schemaname")?.to_string(),
            table: row.require_str("tablename")?.to_string(),
            name: row.require_str("indexname")?.to_string(),
            create_ddl: row.require_str("create_ddl")?.to_string(),
            kind: DefinitionKind::from_drop_ddl(&drop_ddl),
            drop_ddl,
            replication_name: replication_name.to_string(),
        })
    }

    /// `namespace.table` this definition belongs to
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.namespace, self.table)
    }
}

const INDEX_CANDIDATES_SQL: &str = "SELECT pi.schemaname::text AS schemaname,
    pi.tablename::text AS tablename,
    pi.indexname::text AS indexname,
    pi.indexdef AS create_ddl,
    format('DROP INDEX IF EXISTS %I.%I', pi.schemaname, pi.indexname) AS drop_ddl
FROM pg_catalog.pg_indexes pi
WHERE pi.schemaname = $1
    AND pi.tablename = $2
    AND NOT EXISTS (
        SELECT 1
        FROM pg_catalog.pg_constraint pc
        WHERE pc.conindid = format('%I.%I', pi.schemaname, pi.indexname)::regclass
            AND pc.contype IN ('p', 'u')
    )
    AND pg_catalog.pg_relation_size(format('%I.%I', pi.schemaname, pi.tablename)::regclass) > $3
ORDER BY pi.indexname";

const CONSTRAINT_CANDIDATES_SQL: &str = "SELECT pn.nspname::text AS schemaname,
    prel.relname::text AS tablename,
    pc.conname::text AS indexname,
    format('ALTER TABLE %I.%I ADD CONSTRAINT %I ', pn.nspname, prel.relname, pc.conname)
        || pg_catalog.pg_get_constraintdef(pc.oid) AS create_ddl,
    format('ALTER TABLE %I.%I DROP CONSTRAINT %I', pn.nspname, prel.relname, pc.conname) AS drop_ddl
FROM pg_catalog.pg_constraint pc
    JOIN pg_catalog.pg_class prel ON prel.oid = pc.conrelid
    JOIN pg_catalog.pg_namespace pn ON pn.oid = prel.relnamespace
WHERE pn.nspname = $1
    AND prel.relname = $2
    AND pc.contype = 'u'
    AND pg_catalog.pg_relation_size(prel.oid) > $3
ORDER BY pc.conname";

async fn find_candidates(
    conn: &dyn Connection,
    sql: &str,
    table: &ReplicatedObject,
    threshold: SizeThreshold,
    replication_name: &str,
) -> Result<Vec<IndexDefinition>> {
    let params = [
        Value::from(table.namespace.as_str()),
        Value::from(table.name.as_str()),
        Value::Int64(threshold.bytes()),
    ];
    let rows = conn.query(sql, &params).await?;
    let definitions = rows
        .iter()
        .map(|row| IndexDefinition::from_row(row, replication_name))
        .collect::<replguard_rdbc::Result<Vec<_>>>()?;
    Ok(definitions)
}

/// Secondary indexes on `table` when the table is larger than `threshold`.
///
/// Indexes backing a primary key or unique constraint are never returned.
pub async fn find_index_candidates(
    conn: &dyn Connection,
    table: &ReplicatedObject,
    threshold: SizeThreshold,
    replication_name: &str,
) -> Result<Vec<IndexDefinition>> {
    find_candidates(conn, INDEX_CANDIDATES_SQL, table, threshold, replication_name).await
}

/// Unique constraints on `table` when the table is larger than `threshold`.
pub async fn find_unique_constraint_candidates(
    conn: &dyn Connection,
    table: &ReplicatedObject,
    threshold: SizeThreshold,
    replication_name: &str,
) -> Result<Vec<IndexDefinition>> {
    find_candidates(
        conn,
        CONSTRAINT_CANDIDATES_SQL,
        table,
        threshold,
        replication_name,
    )
    .await
}
