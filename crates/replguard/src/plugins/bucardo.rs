//! `bucardo.*` operations

use std::io::Write;

use replguard_rdbc::dialect::quote_ident;
use tracing::{info, warn};

use super::Runtime;
use crate::catalog::{ObjectKind, ReplicatedObject};
use crate::checks;
use crate::connector::Target;
use crate::engine::onetimecopy_pending;
use crate::error::Result;
use crate::report::print_skipped_summary;
use crate::triggers::{Mode, ReconcileReport, TriggerCoordinator};

/// Plain tables in scope for trigger management
pub(crate) async fn trigger_tables(rt: &Runtime<'_>) -> Result<Vec<ReplicatedObject>> {
    rt.objects(ObjectKind::Table, rt.config.bucardo_objects()?)
        .await
}

/// Register the sync, which installs the triggers, then reconcile their states
pub(crate) async fn add_sync_and_reconcile(rt: &Runtime<'_>) -> Result<ReconcileReport> {
    println!("Adding triggers. Warning: this may cause an outage.");
    let tables = trigger_tables(rt).await?;
    rt.bucardo().add_sync(rt.config.bucardo.copy_mode).await?;
    reconcile(rt, &tables, Mode::Add).await
}

pub(crate) async fn reconcile(
    rt: &Runtime<'_>,
    tables: &[ReplicatedObject],
    mode: Mode,
) -> Result<ReconcileReport> {
    let report = TriggerCoordinator::new(rt.connector, rt.replication_name())
        .reconcile(tables, rt.config.topology(), mode)
        .await?;
    for (table, trigger) in &report.missing {
        println!("WARNING: trigger {} is missing on {}", trigger, table);
    }
    print_skipped_summary(&report.skipped);
    Ok(report)
}

pub async fn add_triggers(rt: &Runtime<'_>) -> Result<()> {
    let report = add_sync_and_reconcile(rt).await?;
    println!("Done adding triggers.");
    checks::trigger_count(rt.connector, &trigger_tables(rt).await?, 3).await?;
    info!(changed = report.changed.len(), "add_triggers finished");
    Ok(())
}

pub async fn drop_triggers(rt: &Runtime<'_>) -> Result<()> {
    println!("Dropping triggers. Warning: this may cause an outage.");
    let tables = trigger_tables(rt).await?;
    reconcile(rt, &tables, Mode::Drop).await?;
    println!("Triggers dropped.");
    checks::trigger_count(rt.connector, &tables, 0).await
}

pub async fn change_config(rt: &Runtime<'_>, name: &str, value: &str) -> Result<()> {
    rt.bucardo().set(name, value).await?;
    println!("You will need to reload or restart bucardo for the change to take effect.");
    Ok(())
}

/// Point the engine's log, pid and stop files at per-replication paths
async fn configure(rt: &Runtime<'_>) -> Result<()> {
    let settings = &rt.config.bucardo;
    let repl = rt.replication_name();
    let bucardo = rt.bucardo();

    for file in ["reason_file", "log_conflict_file", "warning_file"] {
        let path = settings.logdir.join(format!("{}_{}", repl, file));
        bucardo.set(file, &path.display().to_string()).await?;
    }

    tokio::fs::create_dir_all(&settings.piddir).await?;
    bucardo
        .set("piddir", &settings.piddir.display().to_string())
        .await?;
    bucardo.set("stopfile", &format!("{}_stopfile", repl)).await
}

pub async fn install(rt: &Runtime<'_>) -> Result<()> {
    println!("Installing bucardo.");
    let bucardo = rt.bucardo();
    bucardo.install().await?;

    println!("Configuring logging.");
    configure(rt).await?;

    println!("Storing database connection info.");
    bucardo.add_db("primary_db", &rt.config.primary, false).await?;
    bucardo
        .add_db("secondary_db", &rt.config.secondary, rt.config.secondary.cascade)
        .await?;

    println!("Adding metadata about the tables and sequences that will be replicated.");
    let filter = rt.config.bucardo_objects()?;
    let mut tables = rt.objects(ObjectKind::Table, filter).await?;
    tables.extend(rt.objects(ObjectKind::Partition, filter).await?);
    let sequences = rt.objects(ObjectKind::Sequence, filter).await?;

    bucardo.add_tables(&tables).await?;
    bucardo.add_sequences(&sequences).await?;
    let herd: Vec<_> = tables.into_iter().chain(sequences).collect();
    bucardo.add_herd(&herd).await?;

    println!("Bucardo installed.");
    checks::engine_installed(rt.connector).await
}

pub async fn uninstall(rt: &Runtime<'_>) -> Result<()> {
    println!("Uninstalling bucardo.");
    let dbname = &rt.config.metadata.dbname;

    println!("Dropping the bucardo database.");
    {
        // DROP DATABASE cannot run inside a transaction block.
        let fallback = rt.connector.connect(Target::MetadataFallback).await?;
        fallback
            .execute(&format!("DROP DATABASE IF EXISTS {}", quote_ident(dbname)), &[])
            .await?;
    }

    println!("Dropping the bucardo schema inside the primary database.");
    {
        let primary = rt.connector.connect(Target::Primary).await?;
        primary
            .execute("DROP SCHEMA IF EXISTS bucardo CASCADE", &[])
            .await?;
    }

    if rt.config.primary.cascade {
        warn!("the primary cascades; replication into it may now be broken");
        println!(
            "\nWarning: you may have just broken replication from A to B in your A->B->C setup."
        );
    }

    println!("Uninstalled bucardo.");
    checks::engine_uninstalled(rt.connector, dbname).await
}

pub async fn start(rt: &Runtime<'_>) -> Result<()> {
    println!("Starting daemon.");
    // The pid directory does not survive a server restart.
    tokio::fs::create_dir_all(&rt.config.bucardo.piddir).await?;
    rt.bucardo().control("start").await?;
    println!("Daemon started.");
    checks::daemon_running(&rt.config.bucardo.piddir).await
}

pub async fn stop(rt: &Runtime<'_>) -> Result<()> {
    println!("Stopping daemon.");
    rt.bucardo().control("stop").await?;
    println!("Daemon stopped.");
    checks::daemon_stopped(&rt.config.bucardo.piddir, rt.stop_grace).await
}

pub async fn restart(rt: &Runtime<'_>) -> Result<()> {
    println!("Restarting daemon.");
    rt.bucardo().control("restart").await?;
    println!("Daemon restarted.");
    checks::daemon_running(&rt.config.bucardo.piddir).await
}

pub async fn reload(rt: &Runtime<'_>) -> Result<()> {
    rt.bucardo().control("reload_config").await
}

pub async fn status(rt: &Runtime<'_>) -> Result<()> {
    println!("Checking status of bucardo.");
    rt.bucardo().status().await.map(|_| ())
}

/// Block until the engine reports the initial copy finished
pub async fn wait_for_copy(rt: &Runtime<'_>) -> Result<()> {
    if !rt.config.bucardo.copy_mode.copies() {
        println!("Not configured to do a data copy.");
        return Ok(());
    }

    print!("Checking to see if the data copy is complete.");
    let _ = std::io::stdout().flush();
    loop {
        let pending = {
            let conn = rt.connector.connect(Target::Metadata).await?;
            onetimecopy_pending(conn.as_ref(), rt.replication_name()).await?
        };
        if pending == 0 {
            break;
        }
        print!(".");
        let _ = std::io::stdout().flush();
        tokio::time::sleep(rt.poll_interval).await;
    }
    println!("\nData copy is complete.");
    Ok(())
}
