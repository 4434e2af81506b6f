//! `indexes.*` operations
//!
//! Drop and recreate run under the lock-wait governor on the secondary when
//! the retry plugin is configured. Otherwise index DDL waits for locks
//! without a ceiling.

use std::future::Future;

use super::Runtime;
use crate::catalog::ObjectKind;
use crate::checks;
use crate::connector::Target;
use crate::error::Result;
use crate::governor::{LockWaitPolicy, RetryGovernor};
use crate::indexes::IndexWorkflow;
use crate::report::print_skipped_summary;

fn workflow<'a>(rt: &'a Runtime<'_>) -> IndexWorkflow<'a> {
    IndexWorkflow::new(rt.connector, rt.replication_name()).with_poll_interval(rt.poll_interval)
}

async fn on_secondary<T, F, Fut>(rt: &Runtime<'_>, operation: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match &rt.config.retry {
        Some(settings) => {
            let policy = LockWaitPolicy::new(&settings.secondary_role, settings.timeout_ms);
            RetryGovernor::new(rt.connector)
                .with_target(Target::SecondaryOwner)
                .with_bounded_wait(&policy, operation)
                .await
        }
        None => operation().await,
    }
}

pub async fn install(rt: &Runtime<'_>) -> Result<()> {
    workflow(rt).install().await?;
    checks::backup_store_installed(rt.connector).await
}

pub async fn drop(rt: &Runtime<'_>) -> Result<()> {
    let settings = rt.config.index_settings()?;
    let tables = rt
        .objects(ObjectKind::Table, &settings.replication_objects)
        .await?;

    let workflow = workflow(rt);
    let report = on_secondary(rt, || workflow.drop(&tables, settings.larger_than)).await?;
    print_skipped_summary(&report.skipped);
    checks::index_spot_check(rt.connector, rt.replication_name(), false).await
}

pub async fn recreate(rt: &Runtime<'_>, wait_for_copy: bool) -> Result<()> {
    let workflow = workflow(rt);
    let report = on_secondary(rt, || workflow.recreate(wait_for_copy)).await?;
    if !report.already_present.is_empty() {
        println!(
            "{} index(es) or constraint(s) were already present on the secondary.",
            report.already_present.len()
        );
    }
    print_skipped_summary(&report.skipped);
    checks::index_spot_check(rt.connector, rt.replication_name(), true).await
}
