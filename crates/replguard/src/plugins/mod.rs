//! Operation handlers
//!
//! One module per plugin. Every handler prints progress for the operator,
//! performs its mutation and finishes with the checks for that operation.

pub mod bucardo;
pub mod indexes;
pub mod retry;

use std::time::Duration;

use tracing::info;

use crate::catalog::{find_objects, ObjectKind, ReplicatedObject, ReplicationObjects};
use crate::checks::STOP_GRACE;
use crate::config::Config;
use crate::connector::{Connector, Target};
use crate::engine::{Bucardo, ReplicationEngine};
use crate::error::{Error, Result};
use crate::indexes::COPY_POLL_INTERVAL;
use crate::registry::Operation;

/// Per-invocation arguments from the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// `indexes.recreate`: wait for the next completed copy first
    pub wait_for_copy: bool,
    /// `bucardo.change_config`: setting name
    pub setting: Option<String>,
    /// `bucardo.change_config`: new value
    pub value: Option<String>,
}

/// Everything a handler needs
pub struct Runtime<'a> {
    pub config: &'a Config,
    pub connector: &'a dyn Connector,
    pub engine: &'a dyn ReplicationEngine,
    /// Interval between copy-completion polls
    pub poll_interval: Duration,
    /// Time the daemon gets to exit before the stop check
    pub stop_grace: Duration,
}

impl<'a> Runtime<'a> {
    pub fn new(
        config: &'a Config,
        connector: &'a dyn Connector,
        engine: &'a dyn ReplicationEngine,
    ) -> Self {
        Self {
            config,
            connector,
            engine,
            poll_interval: COPY_POLL_INTERVAL,
            stop_grace: STOP_GRACE,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn replication_name(&self) -> &str {
        &self.config.bucardo.replication_name
    }

    /// Typed engine commands for the configured replication name
    pub fn bucardo(&self) -> Bucardo<'_> {
        Bucardo::new(self.engine, self.replication_name())
    }

    /// Relations of `kind` on the primary matching `filter`
    pub async fn objects(
        &self,
        kind: ObjectKind,
        filter: &ReplicationObjects,
    ) -> Result<Vec<ReplicatedObject>> {
        let conn = self.connector.connect(Target::Primary).await?;
        find_objects(conn.as_ref(), kind, filter).await
    }
}

/// Run one registered operation
pub async fn dispatch(rt: &Runtime<'_>, operation: Operation, args: &Invocation) -> Result<()> {
    info!(operation = %operation, "running operation");
    match operation {
        Operation::BucardoAddTriggers => bucardo::add_triggers(rt).await,
        Operation::BucardoChangeConfig => {
            let (Some(name), Some(value)) = (&args.setting, &args.value) else {
                return Err(Error::config(
                    "bucardo.change_config needs --setting NAME and --value VALUE",
                ));
            };
            bucardo::change_config(rt, name, value).await
        }
        Operation::BucardoDropTriggers => bucardo::drop_triggers(rt).await,
        Operation::BucardoInstall => bucardo::install(rt).await,
        Operation::BucardoReload => bucardo::reload(rt).await,
        Operation::BucardoRestart => bucardo::restart(rt).await,
        Operation::BucardoStart => bucardo::start(rt).await,
        Operation::BucardoStatus => bucardo::status(rt).await,
        Operation::BucardoStop => bucardo::stop(rt).await,
        Operation::BucardoUninstall => bucardo::uninstall(rt).await,
        Operation::BucardoWaitForCopy => bucardo::wait_for_copy(rt).await,
        Operation::IndexesDrop => indexes::drop(rt).await,
        Operation::IndexesInstall => indexes::install(rt).await,
        Operation::IndexesRecreate => indexes::recreate(rt, args.wait_for_copy).await,
        Operation::RetryAddTriggers => retry::add_triggers(rt).await,
        Operation::RetryDropTriggers => retry::drop_triggers(rt).await,
    }
}
