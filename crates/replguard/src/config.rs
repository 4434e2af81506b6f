//! Configuration for replguard
//!
//! The YAML file is read once at startup, environment variables are
//! expanded, fields are validated and inheritable settings are resolved into
//! an immutable [`Config`] that every operation borrows.
//!
//! ```yaml
//! plugins: [bucardo, indexes, retry]
//! databases:
//!   primary:   { host: db-a, dbname: app, user: app, database_owner: owner, schema_owner: app_owner }
//!   secondary: { host: db-b, dbname: app, user: app, database_owner: owner, schema_owner: app_owner }
//!   bucardo:   { host: db-b, user: bucardo, database_owner: bucardo, fallback_db: postgres }
//! bucardo:
//!   replication_name: app_sync
//!   replication_objects:
//!     namespace_include: [public]
//!   copy_data: empty
//! indexes:
//!   larger_than: 500 MB
//! retry:
//!   timeout: 5000
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use replguard_rdbc::security::validate_sql_identifier;
use replguard_rdbc::ConnectionConfig;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::catalog::ReplicationObjects;
use crate::engine::CopyMode;
use crate::error::{Error, Result};
use crate::size::{SizeThreshold, DEFAULT_THRESHOLD};
use crate::triggers::TopologyFlags;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Metadata database name the engine requires
pub const DEFAULT_METADATA_DBNAME: &str = "bucardo";

/// Plugins a config may enable
pub const KNOWN_PLUGINS: &[&str] = &["bucardo", "concurrency", "indexes", "retry"];

// ============================================================================
// File format
// ============================================================================

/// Root of the YAML file
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ConfigFile {
    /// Plugins whose operations are offered
    #[serde(default)]
    pub plugins: Vec<String>,

    #[validate(nested)]
    pub databases: DatabasesSection,

    #[validate(nested)]
    pub bucardo: BucardoSection,

    #[serde(default)]
    pub indexes: Option<IndexesSection>,

    #[serde(default)]
    #[validate(nested)]
    pub retry: Option<RetrySection>,

    #[serde(default)]
    pub concurrency: Option<ConcurrencySection>,
}

/// `databases` section
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DatabasesSection {
    #[validate(nested)]
    pub primary: DatabaseSection,
    #[validate(nested)]
    pub secondary: DatabaseSection,
    #[validate(nested)]
    pub bucardo: DatabaseSection,
}

/// One database server entry
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DatabaseSection {
    #[validate(length(min = 1))]
    pub host: String,

    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Required for primary and secondary; forced for the metadata database
    #[serde(default)]
    pub dbname: Option<String>,

    #[validate(length(min = 1))]
    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    /// Role with database-level privileges (ALTER ROLE, CREATE SCHEMA)
    #[validate(length(min = 1))]
    pub database_owner: String,

    /// Role that owns the replicated tables; defaults to `database_owner`
    #[serde(default)]
    pub schema_owner: Option<String>,

    /// Database used when the metadata database does not exist yet
    #[serde(default)]
    pub fallback_db: Option<String>,

    /// Whether this tier re-publishes changes downstream (A -> B -> C)
    #[serde(default)]
    pub cascade: bool,
}

/// `bucardo` section
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct BucardoSection {
    #[validate(custom(function = "validate_replication_name"))]
    pub replication_name: String,

    #[serde(default)]
    pub replication_objects: Option<ReplicationObjects>,

    #[serde(default)]
    pub copy_data: CopyMode,

    #[serde(default)]
    pub asynchronous_kicking: bool,

    /// Engine executable
    #[serde(default = "default_program")]
    pub program: PathBuf,

    /// Directory for engine log files
    #[serde(default = "default_logdir")]
    pub logdir: PathBuf,

    /// Directory for engine pid files; defaults to `/var/run/bucardo/<name>_piddir`
    #[serde(default)]
    pub piddir: Option<PathBuf>,
}

/// `indexes` section
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IndexesSection {
    /// Overrides `bucardo.replication_objects`
    #[serde(default)]
    pub replication_objects: Option<ReplicationObjects>,

    /// Tables larger than this have their indexes dropped
    #[serde(default)]
    pub larger_than: Option<String>,
}

/// `retry` section
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RetrySection {
    /// Lock wait ceiling in milliseconds
    #[validate(range(min = 1))]
    pub timeout: u64,

    /// Role whose `lock_timeout` is set on the primary; defaults to the
    /// primary's schema owner, the role the trigger DDL runs as
    #[serde(default)]
    pub role: Option<String>,

    /// Same for the secondary, where index DDL runs; defaults to the
    /// secondary's schema owner
    #[serde(default)]
    pub secondary_role: Option<String>,
}

/// `concurrency` section
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConcurrencySection {
    /// Metadata database name used when the concurrency plugin is enabled
    #[serde(default)]
    pub bucardo_dbname: Option<String>,
}

fn default_port() -> u16 {
    5432
}

fn default_program() -> PathBuf {
    PathBuf::from("bucardo")
}

fn default_logdir() -> PathBuf {
    PathBuf::from("/var/log/bucardo")
}

fn validate_replication_name(name: &str) -> std::result::Result<(), ValidationError> {
    validate_sql_identifier(name).map_err(|e| {
        let mut err = ValidationError::new("replication_name");
        err.message = Some(e.to_string().into());
        err
    })
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Connection settings of one database server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    pub database_owner: String,
    pub schema_owner: String,
    pub fallback_db: String,
    pub cascade: bool,
}

impl DatabaseConfig {
    fn resolve(section: &DatabaseSection, dbname: String) -> Self {
        Self {
            host: section.host.clone(),
            port: section.port,
            dbname,
            user: section.user.clone(),
            password: section.password.clone(),
            database_owner: section.database_owner.clone(),
            schema_owner: section
                .schema_owner
                .clone()
                .unwrap_or_else(|| section.database_owner.clone()),
            fallback_db: section
                .fallback_db
                .clone()
                .unwrap_or_else(|| "postgres".to_string()),
            cascade: section.cascade,
        }
    }

    /// Connection settings logging in as `user`
    pub fn connection_as(&self, user: &str) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(&self.host, &self.dbname, user).with_port(self.port);
        if let Some(password) = &self.password {
            config = config.with_password(password);
        }
        config
    }
}

/// Resolved engine settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucardoSettings {
    pub replication_name: String,
    pub replication_objects: Option<ReplicationObjects>,
    pub copy_mode: CopyMode,
    pub asynchronous_kicking: bool,
    pub program: PathBuf,
    pub logdir: PathBuf,
    pub piddir: PathBuf,
}

/// Resolved index workflow settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSettings {
    pub replication_objects: ReplicationObjects,
    pub larger_than: SizeThreshold,
}

/// Resolved lock-wait governor settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    pub timeout_ms: u64,
    /// Role of the sessions mutating the primary
    pub role: String,
    /// Role of the sessions mutating the secondary
    pub secondary_role: String,
}

/// Immutable, fully resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub plugins: Vec<String>,
    pub primary: DatabaseConfig,
    pub secondary: DatabaseConfig,
    /// Engine metadata database
    pub metadata: DatabaseConfig,
    pub bucardo: BucardoSettings,
    /// Present when the `indexes` plugin is enabled
    pub indexes: Option<IndexSettings>,
    /// Present when the `retry` plugin is enabled
    pub retry: Option<RetrySettings>,
}

impl Config {
    /// Load, expand, validate and resolve a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let file: ConfigFile = serde_yaml::from_str(&expanded)
            .map_err(|e| Error::config(format!("failed to parse config: {}", e)))?;
        Self::resolve(file)
    }

    /// Validate a parsed file and resolve inherited settings
    pub fn resolve(file: ConfigFile) -> Result<Self> {
        file.validate()
            .map_err(|e| Error::config(format!("invalid config: {}", e)))?;

        for plugin in &file.plugins {
            if !KNOWN_PLUGINS.contains(&plugin.as_str()) {
                return Err(Error::config(format!(
                    "unknown plugin '{}' (known: {})",
                    plugin,
                    KNOWN_PLUGINS.join(", ")
                )));
            }
        }
        let enabled = |name: &str| file.plugins.iter().any(|p| p == name);

        let primary = DatabaseConfig::resolve(
            &file.databases.primary,
            required_dbname(&file.databases.primary, "primary")?,
        );
        let secondary = DatabaseConfig::resolve(
            &file.databases.secondary,
            required_dbname(&file.databases.secondary, "secondary")?,
        );

        // The engine only works with its own database name unless the
        // concurrency plugin provides a custom one.
        let metadata_dbname = match (&file.concurrency, enabled("concurrency")) {
            (Some(ConcurrencySection { bucardo_dbname: Some(name) }), true) => name.clone(),
            _ => DEFAULT_METADATA_DBNAME.to_string(),
        };
        let metadata = DatabaseConfig::resolve(&file.databases.bucardo, metadata_dbname);

        let replication_name = file.bucardo.replication_name.clone();
        let bucardo = BucardoSettings {
            piddir: file.bucardo.piddir.clone().unwrap_or_else(|| {
                PathBuf::from(format!("/var/run/bucardo/{}_piddir", replication_name))
            }),
            replication_name,
            replication_objects: file.bucardo.replication_objects.clone(),
            copy_mode: file.bucardo.copy_data,
            asynchronous_kicking: file.bucardo.asynchronous_kicking,
            program: file.bucardo.program.clone(),
            logdir: file.bucardo.logdir.clone(),
        };

        let indexes = if enabled("indexes") {
            let section = file.indexes.clone().unwrap_or_default();
            let replication_objects = section
                .replication_objects
                .or_else(|| bucardo.replication_objects.clone())
                .ok_or_else(|| missing_replication_objects("indexes"))?;
            let larger_than = section
                .larger_than
                .as_deref()
                .unwrap_or(DEFAULT_THRESHOLD)
                .parse()?;
            Some(IndexSettings {
                replication_objects,
                larger_than,
            })
        } else {
            None
        };

        let retry = if enabled("retry") {
            let section = file.retry.as_ref().ok_or_else(|| {
                Error::config("the retry plugin is enabled but the config has no 'retry' section")
            })?;
            Some(RetrySettings {
                timeout_ms: section.timeout,
                role: section
                    .role
                    .clone()
                    .unwrap_or_else(|| primary.schema_owner.clone()),
                secondary_role: section
                    .secondary_role
                    .clone()
                    .unwrap_or_else(|| secondary.schema_owner.clone()),
            })
        } else {
            None
        };

        Ok(Self {
            plugins: file.plugins,
            primary,
            secondary,
            metadata,
            bucardo,
            indexes,
            retry,
        })
    }

    /// Topology flags of the primary tier
    pub fn topology(&self) -> TopologyFlags {
        TopologyFlags {
            cascade: self.primary.cascade,
            asynchronous_kicking: self.bucardo.asynchronous_kicking,
        }
    }

    /// Filter for engine-managed tables; required by trigger and install operations
    pub fn bucardo_objects(&self) -> Result<&ReplicationObjects> {
        self.bucardo
            .replication_objects
            .as_ref()
            .ok_or_else(|| missing_replication_objects("bucardo"))
    }

    /// Index workflow settings; required by `indexes.*` operations
    pub fn index_settings(&self) -> Result<&IndexSettings> {
        self.indexes
            .as_ref()
            .ok_or_else(|| Error::config("the indexes plugin is not enabled"))
    }

    /// Governor settings; required by `retry.*` operations
    pub fn retry_settings(&self) -> Result<&RetrySettings> {
        self.retry
            .as_ref()
            .ok_or_else(|| Error::config("the retry plugin is not enabled"))
    }
}

fn required_dbname(section: &DatabaseSection, which: &str) -> Result<String> {
    section
        .dbname
        .clone()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::config(format!("databases.{}.dbname is required", which)))
}

fn missing_replication_objects(plugin: &str) -> Error {
    Error::config(format!(
        "either \"bucardo\" or \"{}\" must have a \"replication_objects\" value",
        plugin
    ))
}

/// Expand environment variables in the format ${VAR} or ${VAR:-default}
fn expand_env_vars(content: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str());

            std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
        })
        .to_string()
}
