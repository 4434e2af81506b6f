//! `retry.*` operations
//!
//! The trigger operations of the bucardo plugin, run under a bounded lock
//! wait. Objects whose lock could not be taken are reported as skipped; run
//! the operation again to pick them up.

use super::bucardo::{add_sync_and_reconcile, reconcile, trigger_tables};
use super::Runtime;
use crate::checks;
use crate::connector::Target;
use crate::engine::{sync_exists, validate_sync};
use crate::error::Result;
use crate::governor::{LockWaitPolicy, RetryGovernor};
use crate::triggers::Mode;

fn policy(rt: &Runtime<'_>) -> Result<LockWaitPolicy> {
    let settings = rt.config.retry_settings()?;
    Ok(LockWaitPolicy::new(&settings.role, settings.timeout_ms))
}

/// Add triggers, or finish a previous attempt that timed out partway
pub async fn add_triggers(rt: &Runtime<'_>) -> Result<()> {
    println!("Adding triggers.");
    let policy = policy(rt)?;

    RetryGovernor::new(rt.connector)
        .with_bounded_wait(&policy, || async {
            let existing = {
                let conn = rt.connector.connect(Target::Metadata).await?;
                if sync_exists(conn.as_ref(), rt.replication_name()).await? {
                    // Re-validating the sync recreates any trigger missing
                    // from an earlier, partially failed attempt.
                    for notice in validate_sync(conn.as_ref(), rt.replication_name()).await? {
                        println!("{}", notice);
                    }
                    true
                } else {
                    false
                }
            };
            if existing {
                let tables = trigger_tables(rt).await?;
                reconcile(rt, &tables, Mode::Add).await
            } else {
                add_sync_and_reconcile(rt).await
            }
        })
        .await?;

    println!(
        "Attempted to add triggers. If any were skipped or reported missing, \
         run retry.add_triggers again."
    );
    checks::trigger_count(rt.connector, &trigger_tables(rt).await?, 3).await
}

pub async fn drop_triggers(rt: &Runtime<'_>) -> Result<()> {
    println!("Dropping triggers.");
    let policy = policy(rt)?;
    let tables = trigger_tables(rt).await?;

    RetryGovernor::new(rt.connector)
        .with_bounded_wait(&policy, || reconcile(rt, &tables, Mode::Drop))
        .await?;

    println!(
        "Attempted to drop triggers. If any were skipped, run retry.drop_triggers again."
    );
    checks::trigger_count(rt.connector, &tables, 0).await
}
