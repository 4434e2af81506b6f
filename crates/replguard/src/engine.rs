//! Replication engine adapter
//!
//! Bucardo is driven through its command line tool (always an argument
//! vector, never a shell string) and observed through its metadata tables.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use replguard_rdbc::{Connection, Value};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::catalog::ReplicatedObject;
use crate::config::{Config, DatabaseConfig};
use crate::error::{Error, Result};

/// Initial bulk copy behaviour of a new sync (`onetimecopy`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyMode {
    /// No initial copy
    #[default]
    Never = 0,
    /// Always copy
    Always = 1,
    /// Copy only into empty target tables
    Empty = 2,
}

impl CopyMode {
    /// Numeric value passed as `onetimecopy=<n>`
    pub const fn onetimecopy(self) -> u8 {
        self as u8
    }

    /// Whether the engine runs an initial copy at all
    pub const fn copies(self) -> bool {
        !matches!(self, Self::Never)
    }
}

/// Captured output of one engine invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    /// Exit code; `None` when terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl EngineOutput {
    /// Output of a successful invocation
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Something that can run engine commands
#[async_trait]
pub trait ReplicationEngine: Send + Sync {
    /// Run the engine with `args` after the global options, feeding `stdin`
    async fn invoke(&self, args: &[String], stdin: Option<&str>) -> Result<EngineOutput>;
}

/// The `bucardo` executable
#[derive(Debug, Clone)]
pub struct BucardoCli {
    program: PathBuf,
    global_args: Vec<String>,
}

impl BucardoCli {
    /// Global options shared by every invocation for this replication name
    pub fn global_args(replication_name: &str, metadata: &DatabaseConfig) -> Vec<String> {
        vec![
            "--no-bucardorc".to_string(),
            "--logextension".to_string(),
            replication_name.to_string(),
            format!("--dbname={}", metadata.dbname),
            format!("--dbuser={}", metadata.database_owner),
            format!("--dbhost={}", metadata.host),
            format!("--dbport={}", metadata.port),
        ]
    }

    pub fn new(program: impl Into<PathBuf>, global_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            global_args,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.bucardo.program.clone(),
            Self::global_args(&config.bucardo.replication_name, &config.metadata),
        )
    }
}

#[async_trait]
impl ReplicationEngine for BucardoCli {
    async fn invoke(&self, args: &[String], stdin: Option<&str>) -> Result<EngineOutput> {
        let command_line = args.join(" ");
        debug!(program = %self.program.display(), "bucardo {}", command_line);

        let mut child = Command::new(&self.program)
            .args(&self.global_args)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::engine(&command_line, format!("failed to spawn: {}", e)))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| Error::engine(&command_line, format!("failed to write stdin: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::engine(&command_line, e.to_string()))?;

        Ok(EngineOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Typed Bucardo commands for one replication name
pub struct Bucardo<'a> {
    engine: &'a dyn ReplicationEngine,
    replication_name: &'a str,
}

impl<'a> Bucardo<'a> {
    pub fn new(engine: &'a dyn ReplicationEngine, replication_name: &'a str) -> Self {
        Self {
            engine,
            replication_name,
        }
    }

    /// Run a command and require exit status 0
    pub async fn run(&self, args: Vec<String>) -> Result<EngineOutput> {
        self.run_with_input(args, None).await
    }

    async fn run_with_input(&self, args: Vec<String>, stdin: Option<&str>) -> Result<EngineOutput> {
        let output = self.engine.invoke(&args, stdin).await?;
        if !output.stdout.is_empty() {
            print!("{}", output.stdout);
        }
        if output.is_success() {
            Ok(output)
        } else {
            let message = match output.status {
                Some(code) => format!("exit status {}: {}", code, output.stderr.trim()),
                None => format!("terminated by signal: {}", output.stderr.trim()),
            };
            Err(Error::engine(args.join(" "), message))
        }
    }

    /// `install`, accepting the default answers to its prompts
    pub async fn install(&self) -> Result<()> {
        self.run_with_input(vec!["install".into()], Some("P\nP\n"))
            .await
            .map(|_| ())
    }

    /// `set name=value`
    pub async fn set(&self, name: &str, value: &str) -> Result<()> {
        self.run(vec!["set".into(), format!("{}={}", name, value)])
            .await
            .map(|_| ())
    }

    /// `add db <name> dbname=.. dbuser=.. dbhost=.. dbport=.. [makedelta=1]`
    pub async fn add_db(&self, name: &str, db: &DatabaseConfig, makedelta: bool) -> Result<()> {
        let mut args = vec![
            "add".into(),
            "db".into(),
            name.into(),
            format!("dbname={}", db.dbname),
            format!("dbuser={}", db.database_owner),
            format!("dbhost={}", db.host),
            format!("dbport={}", db.port),
        ];
        if makedelta {
            args.push("makedelta=1".into());
        }
        self.run(args).await.map(|_| ())
    }

    /// `add tables <ns.table>... db=primary_db`
    pub async fn add_tables(&self, tables: &[ReplicatedObject]) -> Result<()> {
        self.add_relations("tables", tables).await
    }

    /// `add sequences <ns.seq>... db=primary_db`
    pub async fn add_sequences(&self, sequences: &[ReplicatedObject]) -> Result<()> {
        self.add_relations("sequences", sequences).await
    }

    async fn add_relations(&self, what: &str, objects: &[ReplicatedObject]) -> Result<()> {
        if objects.is_empty() {
            info!("no {} to add", what);
            return Ok(());
        }
        let mut args = vec!["add".to_string(), what.to_string()];
        args.extend(objects.iter().map(ToString::to_string));
        args.push("db=primary_db".into());
        self.run(args).await.map(|_| ())
    }

    /// `add herd <name> <relations>...`
    pub async fn add_herd(&self, relations: &[ReplicatedObject]) -> Result<()> {
        let mut args = vec![
            "add".to_string(),
            "herd".to_string(),
            self.replication_name.to_string(),
        ];
        args.extend(relations.iter().map(ToString::to_string));
        self.run(args).await.map(|_| ())
    }

    /// `add sync <name> relgroup=<name> dbs=primary_db:source,secondary_db:target onetimecopy=<n>`
    pub async fn add_sync(&self, copy_mode: CopyMode) -> Result<()> {
        self.run(vec![
            "add".into(),
            "sync".into(),
            self.replication_name.into(),
            format!("relgroup={}", self.replication_name),
            "dbs=primary_db:source,secondary_db:target".into(),
            format!("onetimecopy={}", copy_mode.onetimecopy()),
        ])
        .await
        .map(|_| ())
    }

    /// Daemon control: `start`, `stop`, `restart`, `reload_config`
    pub async fn control(&self, command: &str) -> Result<()> {
        self.run(vec![command.to_string()]).await.map(|_| ())
    }

    /// `status`; the output is shown whatever the exit code
    pub async fn status(&self) -> Result<EngineOutput> {
        let output = self.engine.invoke(&["status".to_string()], None).await?;
        print!("{}", output.stdout);
        Ok(output)
    }
}

// ============================================================================
// Metadata queries
// ============================================================================

/// Whether the named sync is registered in the metadata database
pub async fn sync_exists(conn: &dyn Connection, replication_name: &str) -> Result<bool> {
    let rows = conn
        .query(
            "SELECT 1 FROM bucardo.sync WHERE name = $1 LIMIT 1",
            &[Value::from(replication_name)],
        )
        .await?;
    Ok(!rows.is_empty())
}

/// Run `bucardo.validate_sync(name, 0)` and return the notices it raised
pub async fn validate_sync(conn: &dyn Connection, replication_name: &str) -> Result<Vec<String>> {
    conn.query(
        "SELECT bucardo.validate_sync($1, 0)",
        &[Value::from(replication_name)],
    )
    .await?;
    Ok(conn.take_notices().await)
}

/// `bucardo.sync.onetimecopy` of the named sync; 0 once the copy is done
pub async fn onetimecopy_pending(conn: &dyn Connection, replication_name: &str) -> Result<i64> {
    let row = conn
        .query_one(
            "SELECT onetimecopy::bigint AS onetimecopy FROM bucardo.sync WHERE name = $1",
            &[Value::from(replication_name)],
        )
        .await?;
    match row {
        Some(row) => Ok(row.require_i64("onetimecopy")?),
        None => Err(Error::config(format!(
            "sync '{}' is not registered",
            replication_name
        ))),
    }
}

/// Number of finished runs recorded for the named sync
pub async fn completed_copy_count(conn: &dyn Connection, replication_name: &str) -> Result<i64> {
    let row = conn
        .query_one(
            "SELECT count(*) AS n FROM bucardo.syncrun WHERE sync = $1 AND ended IS NOT NULL",
            &[Value::from(replication_name)],
        )
        .await?;
    Ok(row.map(|r| r.require_i64("n")).transpose()?.unwrap_or(0))
}
