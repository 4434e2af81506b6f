//! Index migration workflow
//!
//! Bulk loads into the secondary run much faster without large indexes.
//! The workflow backs up the DDL of every large index and unique constraint
//! into the backup store, verifies the backup, drops the objects on the
//! secondary and later recreates them from the stored DDL.
//!
//! Nothing is dropped unless every table in the run has exactly as many
//! stored definitions as were discovered for it.

use std::io::Write;
use std::time::Duration;

use replguard_rdbc::execute_in_transaction;
use tracing::{info, warn};

use crate::backup::BackupStore;
use crate::catalog::{
    find_index_candidates, find_unique_constraint_candidates, IndexDefinition, ReplicatedObject,
};
use crate::connector::{Connector, Target};
use crate::engine::completed_copy_count;
use crate::error::{Error, Result};
use crate::report::SkippedObject;
use crate::size::SizeThreshold;

/// Interval between checks of the copy-completion marker
pub const COPY_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Result of [`IndexWorkflow::drop`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropReport {
    /// Definitions backed up and verified, in drop order
    pub backed_up: Vec<IndexDefinition>,
    /// Drop statements that committed
    pub dropped: Vec<IndexDefinition>,
    pub skipped: Vec<SkippedObject>,
}

/// Result of [`IndexWorkflow::recreate`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecreateReport {
    pub recreated: Vec<IndexDefinition>,
    /// Still on the secondary, typically because their drop was skipped
    pub already_present: Vec<IndexDefinition>,
    pub skipped: Vec<SkippedObject>,
}

/// Backup, drop and recreate of large indexes and unique constraints
pub struct IndexWorkflow<'a> {
    connector: &'a dyn Connector,
    replication_name: &'a str,
    poll_interval: Duration,
}

impl<'a> IndexWorkflow<'a> {
    pub fn new(connector: &'a dyn Connector, replication_name: &'a str) -> Self {
        Self {
            connector,
            replication_name,
            poll_interval: COPY_POLL_INTERVAL,
        }
    }

    /// Override the copy-completion poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Create the backup store in the metadata database
    pub async fn install(&self) -> Result<()> {
        let conn = self.connector.connect(Target::Metadata).await?;
        BackupStore::new(conn.as_ref()).install().await?;
        info!("backup store installed");
        Ok(())
    }

    /// Large indexes and unique constraints of `table`, discovered on the primary
    pub async fn discover(
        &self,
        table: &ReplicatedObject,
        threshold: SizeThreshold,
    ) -> Result<Vec<IndexDefinition>> {
        let conn = self.connector.connect(Target::Primary).await?;
        let mut definitions =
            find_index_candidates(conn.as_ref(), table, threshold, self.replication_name).await?;
        definitions.extend(
            find_unique_constraint_candidates(
                conn.as_ref(),
                table,
                threshold,
                self.replication_name,
            )
            .await?,
        );
        Ok(definitions)
    }

    /// Back up and verify every table, then drop on the secondary.
    ///
    /// A verification mismatch on any table aborts before the first drop.
    pub async fn drop(
        &self,
        tables: &[ReplicatedObject],
        threshold: SizeThreshold,
    ) -> Result<DropReport> {
        let mut report = DropReport::default();
        if tables.is_empty() {
            println!("No tables found.");
            return Ok(report);
        }

        let metadata = self.connector.connect(Target::Metadata).await?;
        let store = BackupStore::new(metadata.as_ref());

        for table in tables {
            let definitions = self.discover(table, threshold).await?;
            if definitions.is_empty() {
                println!("No large indexes or uniqueness constraints found on {table}.");
                continue;
            }

            for definition in &definitions {
                store.store(definition).await?;
            }

            let expected = definitions.len() as i64;
            let actual = store
                .count_for_table(self.replication_name, &table.namespace, &table.name)
                .await?;
            if expected != actual {
                return Err(Error::BackupConsistencyMismatch {
                    namespace: table.namespace.clone(),
                    table: table.name.clone(),
                    expected,
                    actual,
                });
            }

            println!("DDL for {table} backed up in the metadata database.");
            report.backed_up.extend(definitions);
        }

        if report.backed_up.is_empty() {
            return Ok(report);
        }

        println!("\nDropping large indexes and constraints...");
        let secondary = self.connector.connect(Target::SecondarySchemaOwner).await?;
        for definition in &report.backed_up {
            match execute_in_transaction(secondary.as_ref(), &definition.drop_ddl).await {
                Ok(_) => {
                    info!(table = %definition.qualified_table(), name = %definition.name, "dropped");
                    report.dropped.push(definition.clone());
                }
                Err(e) if e.is_lock_not_available() => {
                    warn!(name = %definition.name, "could not drop: {}", e);
                    report.skipped.push(SkippedObject::lock_timeout(
                        definition.qualified_table(),
                        &definition.name,
                        e.to_string(),
                    ));
                }
                Err(e) => {
                    warn!(name = %definition.name, "drop failed: {}", e);
                    report.skipped.push(SkippedObject::failed(
                        definition.qualified_table(),
                        &definition.name,
                        e.to_string(),
                    ));
                }
            }
        }

        println!("Indexes and uniqueness constraints dropped.");
        Ok(report)
    }

    /// Recreate every stored definition on the secondary.
    ///
    /// Objects that still exist, because their drop was skipped or an
    /// earlier recreate got to them, are recorded as already present.
    ///
    /// With `wait_for_copy`, first block until the engine records another
    /// completed run. The marker is read once and then polled, so a copy that
    /// finishes between the first read and the first poll is only noticed at
    /// the next completion.
    pub async fn recreate(&self, wait_for_copy: bool) -> Result<RecreateReport> {
        if wait_for_copy {
            self.wait_for_copy().await?;
        }

        let definitions = {
            let metadata = self.connector.connect(Target::Metadata).await?;
            BackupStore::new(metadata.as_ref())
                .definitions(self.replication_name)
                .await?
        };

        let mut report = RecreateReport::default();
        let secondary = self.connector.connect(Target::SecondarySchemaOwner).await?;
        for definition in definitions {
            match execute_in_transaction(secondary.as_ref(), &definition.create_ddl).await {
                Ok(_) => {
                    info!(table = %definition.qualified_table(), name = %definition.name, "recreated");
                    report.recreated.push(definition);
                }
                Err(e) if e.is_already_exists() => {
                    info!(table = %definition.qualified_table(), name = %definition.name, "already present");
                    report.already_present.push(definition);
                }
                Err(e) if e.is_lock_not_available() => {
                    warn!(name = %definition.name, "could not recreate: {}", e);
                    report.skipped.push(SkippedObject::lock_timeout(
                        definition.qualified_table(),
                        &definition.name,
                        e.to_string(),
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }

        println!("Indexes and uniqueness constraints recreated.");
        Ok(report)
    }

    async fn wait_for_copy(&self) -> Result<()> {
        let start = self.completed_runs().await?;
        print!("Waiting for the data copy to complete.");
        let _ = std::io::stdout().flush();
        loop {
            tokio::time::sleep(self.poll_interval).await;
            let now = self.completed_runs().await?;
            if now > start {
                println!();
                info!(completed = now, "copy completion observed");
                return Ok(());
            }
            print!(".");
            let _ = std::io::stdout().flush();
        }
    }

    async fn completed_runs(&self) -> Result<i64> {
        let conn = self.connector.connect(Target::Metadata).await?;
        completed_copy_count(conn.as_ref(), self.replication_name).await
    }
}
