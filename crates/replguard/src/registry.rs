//! Operation registry
//!
//! Maps `plugin.operation` names to a typed [`Operation`]. Only operations
//! of enabled plugins are registered, so an operator can never reach code for
//! a plugin the config does not configure.
//!
//! ```text
//! plugins: [retry, bucardo, indexes]
//!
//!   bucardo.add_triggers  ──▶ Operation::BucardoAddTriggers
//!   ...
//!   indexes.drop          ──▶ Operation::IndexesDrop
//!   retry.add_triggers    ──▶ Operation::RetryAddTriggers
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A configurable plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Plugin {
    Bucardo,
    /// Custom metadata database name; contributes configuration only
    Concurrency,
    Indexes,
    Retry,
}

impl Plugin {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bucardo => "bucardo",
            Self::Concurrency => "concurrency",
            Self::Indexes => "indexes",
            Self::Retry => "retry",
        }
    }

    /// One-line description shown as the menu header
    pub const fn summary(self) -> &'static str {
        match self {
            Self::Bucardo => "Replication functionality built into the open source Bucardo tool.",
            Self::Concurrency => "Run several replications against one metadata server.",
            Self::Indexes => {
                "Temporarily drop large indexes on the secondary while the initial copy runs."
            }
            Self::Retry => "Add or remove bucardo triggers with a bounded lock wait.",
        }
    }

    /// Operations the plugin exposes, in menu order
    pub fn operations(self) -> &'static [Operation] {
        use Operation::*;
        match self {
            Self::Bucardo => &[
                BucardoAddTriggers,
                BucardoChangeConfig,
                BucardoDropTriggers,
                BucardoInstall,
                BucardoReload,
                BucardoRestart,
                BucardoStart,
                BucardoStatus,
                BucardoStop,
                BucardoUninstall,
                BucardoWaitForCopy,
            ],
            Self::Concurrency => &[],
            Self::Indexes => &[IndexesDrop, IndexesInstall, IndexesRecreate],
            Self::Retry => &[RetryAddTriggers, RetryDropTriggers],
        }
    }
}

impl FromStr for Plugin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bucardo" => Ok(Self::Bucardo),
            "concurrency" => Ok(Self::Concurrency),
            "indexes" => Ok(Self::Indexes),
            "retry" => Ok(Self::Retry),
            other => Err(Error::config(format!("unknown plugin '{}'", other))),
        }
    }
}

impl fmt::Display for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An operator-invokable operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    BucardoAddTriggers,
    BucardoChangeConfig,
    BucardoDropTriggers,
    BucardoInstall,
    BucardoReload,
    BucardoRestart,
    BucardoStart,
    BucardoStatus,
    BucardoStop,
    BucardoUninstall,
    BucardoWaitForCopy,
    IndexesDrop,
    IndexesInstall,
    IndexesRecreate,
    RetryAddTriggers,
    RetryDropTriggers,
}

impl Operation {
    pub const fn plugin(self) -> Plugin {
        use Operation::*;
        match self {
            IndexesDrop | IndexesInstall | IndexesRecreate => Plugin::Indexes,
            RetryAddTriggers | RetryDropTriggers => Plugin::Retry,
            _ => Plugin::Bucardo,
        }
    }

    /// Name within the plugin
    pub const fn short_name(self) -> &'static str {
        use Operation::*;
        match self {
            BucardoAddTriggers | RetryAddTriggers => "add_triggers",
            BucardoChangeConfig => "change_config",
            BucardoDropTriggers | RetryDropTriggers => "drop_triggers",
            BucardoInstall | IndexesInstall => "install",
            BucardoReload => "reload",
            BucardoRestart => "restart",
            BucardoStart => "start",
            BucardoStatus => "status",
            BucardoStop => "stop",
            BucardoUninstall => "uninstall",
            BucardoWaitForCopy => "wait_for_copy",
            IndexesDrop => "drop",
            IndexesRecreate => "recreate",
        }
    }

    /// `plugin.operation`
    pub fn qualified_name(self) -> String {
        format!("{}.{}", self.plugin(), self.short_name())
    }

    pub const fn description(self) -> &'static str {
        use Operation::*;
        match self {
            BucardoAddTriggers => "Add the sync and set trigger states for the topology.",
            BucardoChangeConfig => "Change a bucardo setting (--setting NAME --value VALUE).",
            BucardoDropTriggers => "Drop bucardo triggers from every replicated table.",
            BucardoInstall => "Install bucardo metadata, databases, tables, sequences and herd.",
            BucardoReload => "Reload the bucardo configuration.",
            BucardoRestart => "Restart bucardo.",
            BucardoStart => "Start bucardo.",
            BucardoStatus => "Show bucardo status.",
            BucardoStop => "Stop bucardo.",
            BucardoUninstall => "Drop the bucardo metadata database and primary schema.",
            BucardoWaitForCopy => "Wait for the initial data copy to finish.",
            IndexesDrop => "Back up and drop large indexes and unique constraints on the secondary.",
            IndexesInstall => "Create the index definition backup store.",
            IndexesRecreate => "Recreate backed up indexes (--wait-for-copy to wait first).",
            RetryAddTriggers => "Add triggers with a bounded lock wait.",
            RetryDropTriggers => "Drop triggers with a bounded lock wait.",
        }
    }

    /// Whether the operation runs under the lock-wait governor when the
    /// retry plugin is configured. `retry.*` operations require it.
    pub const fn is_governed(self) -> bool {
        matches!(
            self,
            Self::RetryAddTriggers
                | Self::RetryDropTriggers
                | Self::IndexesDrop
                | Self::IndexesRecreate
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.plugin(), self.short_name())
    }
}

/// Operations of the enabled plugins, keyed by qualified name
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    plugins: Vec<Plugin>,
    entries: Vec<(String, Operation)>,
}

impl OperationRegistry {
    /// Build from the configured plugin names; `bucardo` first, the rest alphabetical
    pub fn from_plugins<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut plugins = names
            .iter()
            .map(|name| name.as_ref().parse::<Plugin>())
            .collect::<Result<Vec<_>>>()?;
        plugins.sort();
        plugins.dedup();

        let entries = plugins
            .iter()
            .flat_map(|plugin| plugin.operations())
            .map(|op| (op.qualified_name(), *op))
            .collect();
        Ok(Self { plugins, entries })
    }

    /// Look up an operation by qualified name
    pub fn get(&self, name: &str) -> Result<Operation> {
        self.entries
            .iter()
            .find(|(qualified, _)| qualified == name)
            .map(|(_, op)| *op)
            .ok_or_else(|| Error::UnknownOperation(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    /// Registered operations in menu order
    pub fn iter(&self) -> impl Iterator<Item = Operation> + '_ {
        self.entries.iter().map(|(_, op)| *op)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Operator menu grouped by plugin
    pub fn menu(&self) -> String {
        let mut menu = String::new();
        for plugin in &self.plugins {
            if plugin.operations().is_empty() {
                continue;
            }
            menu.push_str(&format!("Commands for {}: {}\n", plugin, plugin.summary()));
            for op in plugin.operations() {
                menu.push_str(&format!("  {}: {}\n", op, op.description()));
            }
            menu.push('\n');
        }
        menu.trim_end().to_string()
    }
}
