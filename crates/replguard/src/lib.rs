//! replguard - operator coordinator for Bucardo replication artifacts
//!
//! Mutating triggers, indexes and constraints on a live primary/secondary
//! pair takes locks that compete with application traffic. replguard makes
//! those mutations safe to run during business hours:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ OperationRegistry ── plugin.operation ──▶ plugins::dispatch      │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ RetryGovernor        bounded lock_timeout around a mutation      │
//! │ TriggerCoordinator   kick / truncate trigger firing modes        │
//! │ IndexWorkflow        back up, verify, drop and recreate indexes  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ catalog  backup  engine  checks                                  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ replguard-rdbc (tokio-postgres)        bucardo CLI               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every object is changed in its own transaction. An object whose lock
//! cannot be taken in time is skipped and reported; any other failure aborts
//! the run.
//!
//! # CLI Usage
//!
//! ```bash
//! # Show the operations of the configured plugins
//! replguard -c config.yml list
//!
//! # Add triggers with a bounded lock wait
//! replguard -c config.yml run retry.add_triggers
//!
//! # Recreate indexes once the initial copy is done
//! replguard -c config.yml run indexes.recreate --wait-for-copy
//! ```

pub mod backup;
pub mod catalog;
pub mod checks;
pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod governor;
pub mod indexes;
pub mod plugins;
pub mod registry;
pub mod report;
pub mod size;
pub mod testing;
pub mod triggers;

pub use config::Config;
pub use connector::{Connector, PgConnector, Target};
pub use engine::{Bucardo, BucardoCli, CopyMode, ReplicationEngine};
pub use error::{Error, Result};
pub use governor::{LockWaitPolicy, RetryGovernor};
pub use indexes::{DropReport, IndexWorkflow, RecreateReport};
pub use plugins::{dispatch, Invocation, Runtime};
pub use registry::{Operation, OperationRegistry, Plugin};
pub use report::{SkipReason, SkippedObject};
pub use size::SizeThreshold;
pub use triggers::{
    desired_states, Mode, ReconcileReport, TopologyFlags, TriggerCoordinator, TriggerKind,
    TriggerState,
};
