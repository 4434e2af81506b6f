//! Connections per logical target
//!
//! Every step opens its own connection for the role it needs and drops it
//! when done. Tests substitute [`crate::testing::MockConnector`].

use std::fmt;

use async_trait::async_trait;
use replguard_rdbc::connection::ConnectionFactory;
use replguard_rdbc::postgres::PgConnectionFactory;
use replguard_rdbc::{Connection, ConnectionConfig};

use crate::config::Config;
use crate::error::Result;

/// Database and role a connection is opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Primary as its database owner (ALTER ROLE, catalog reads)
    Primary,
    /// Primary as the owner of the replicated tables (trigger DDL)
    PrimarySchemaOwner,
    /// Secondary as its database owner
    SecondaryOwner,
    /// Secondary as the owner of the replicated tables (index DDL)
    SecondarySchemaOwner,
    /// Engine metadata database
    Metadata,
    /// Maintenance database next to the metadata database
    MetadataFallback,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Primary => "primary",
            Self::PrimarySchemaOwner => "primary (schema owner)",
            Self::SecondaryOwner => "secondary",
            Self::SecondarySchemaOwner => "secondary (schema owner)",
            Self::Metadata => "metadata",
            Self::MetadataFallback => "metadata fallback",
        };
        f.write_str(name)
    }
}

/// Opens connections to the configured targets
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: Target) -> Result<Box<dyn Connection>>;
}

/// Connection settings for `target`
pub fn connection_config(config: &Config, target: Target) -> ConnectionConfig {
    match target {
        Target::Primary => config.primary.connection_as(&config.primary.database_owner),
        Target::PrimarySchemaOwner => config.primary.connection_as(&config.primary.schema_owner),
        Target::SecondaryOwner => config
            .secondary
            .connection_as(&config.secondary.database_owner),
        Target::SecondarySchemaOwner => config
            .secondary
            .connection_as(&config.secondary.schema_owner),
        Target::Metadata => config
            .metadata
            .connection_as(&config.metadata.database_owner),
        Target::MetadataFallback => config
            .metadata
            .connection_as(&config.metadata.database_owner)
            .with_dbname(&config.metadata.fallback_db),
    }
}

/// PostgreSQL connector built from the resolved config
pub struct PgConnector {
    config: Config,
    factory: PgConnectionFactory,
}

impl PgConnector {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            factory: PgConnectionFactory,
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self, target: Target) -> Result<Box<dyn Connection>> {
        let settings = connection_config(&self.config, target);
        tracing::debug!(target_db = %target, db = %settings.describe(), "opening connection");
        Ok(self.factory.connect(&settings).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
plugins: [bucardo]
databases:
  primary: { host: db-a, dbname: app, user: app, database_owner: owner, schema_owner: app_owner }
  secondary: { host: db-b, dbname: app, user: app, database_owner: owner2 }
  bucardo: { host: db-c, port: 6432, user: bucardo, database_owner: bucardo, fallback_db: postgres }
bucardo:
  replication_name: app_sync
"#;

    #[test]
    fn test_connection_config_per_target() {
        let config = Config::from_yaml(YAML).unwrap();
        let describe = |target| connection_config(&config, target).describe();

        assert_eq!(describe(Target::Primary), "owner@db-a:5432/app");
        assert_eq!(describe(Target::PrimarySchemaOwner), "app_owner@db-a:5432/app");
        assert_eq!(describe(Target::SecondaryOwner), "owner2@db-b:5432/app");
        assert_eq!(describe(Target::SecondarySchemaOwner), "owner2@db-b:5432/app");
        assert_eq!(describe(Target::Metadata), "bucardo@db-c:6432/bucardo");
        assert_eq!(describe(Target::MetadataFallback), "bucardo@db-c:6432/postgres");
    }
}
