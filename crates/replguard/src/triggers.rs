//! Trigger state coordinator
//!
//! Bucardo installs three triggers on every replicated table. The kick and
//! truncate triggers must fire differently depending on where the tier sits
//! in the topology; the delta trigger is left to the engine.
//!
//! Reconciliation is table by table and trigger by trigger. Each change runs
//! in its own transaction, so a table whose lock cannot be taken within
//! `lock_timeout` is skipped without touching the rest of the batch.

use std::fmt;

use replguard_rdbc::dialect::quote_ident;
use replguard_rdbc::{execute_in_transaction, Connection, Value};
use tracing::{debug, info, warn};

use crate::catalog::ReplicatedObject;
use crate::connector::{Connector, Target};
use crate::error::Result;
use crate::report::SkippedObject;

/// Firing mode of a trigger, as stored in `pg_trigger.tgenabled`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerState {
    /// `O`: fires in origin and local sessions
    Enabled,
    /// `D`
    Disabled,
    /// `A`: fires regardless of `session_replication_role`
    Always,
    /// `R`: replica sessions only; never a reconciliation target
    Replica,
}

impl TriggerState {
    /// Decode a `tgenabled` value
    pub fn from_tgenabled(code: &str) -> Option<Self> {
        match code {
            "O" => Some(Self::Enabled),
            "D" => Some(Self::Disabled),
            "A" => Some(Self::Always),
            "R" => Some(Self::Replica),
            _ => None,
        }
    }

    /// `tgenabled` code
    pub const fn tgenabled(self) -> &'static str {
        match self {
            Self::Enabled => "O",
            Self::Disabled => "D",
            Self::Always => "A",
            Self::Replica => "R",
        }
    }

    /// `ALTER TABLE ... <clause> TRIGGER` keyword for reaching this state
    pub const fn alter_clause(self) -> &'static str {
        match self {
            Self::Enabled => "ENABLE",
            Self::Disabled => "DISABLE",
            Self::Always => "ENABLE ALWAYS",
            Self::Replica => "ENABLE REPLICA",
        }
    }
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Always => "always",
            Self::Replica => "replica",
        };
        f.write_str(name)
    }
}

/// Triggers the engine puts on each replicated table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// `bucardo_kick_<name>`: notifies the daemon that new rows arrived
    Kick,
    /// `bucardo_note_trunc_<name>`: records TRUNCATE for propagation
    TruncatePropagation,
    /// `bucardo_delta`: row change capture, owned by the engine
    DeltaCapture,
}

impl TriggerKind {
    /// Every trigger the engine installs
    pub const ALL: [Self; 3] = [Self::DeltaCapture, Self::Kick, Self::TruncatePropagation];

    /// Triggers whose firing mode is reconciled
    pub const MANAGED: [Self; 2] = [Self::Kick, Self::TruncatePropagation];

    /// Trigger name for a replication name
    pub fn trigger_name(self, replication_name: &str) -> String {
        match self {
            Self::Kick => format!("bucardo_kick_{}", replication_name),
            Self::TruncatePropagation => format!("bucardo_note_trunc_{}", replication_name),
            Self::DeltaCapture => "bucardo_delta".to_string(),
        }
    }
}

/// Topology of the tier being mutated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopologyFlags {
    /// The tier re-publishes what it receives (B in A -> B -> C)
    pub cascade: bool,
    /// Syncs are kicked by an external process instead of the kick trigger
    pub asynchronous_kicking: bool,
}

/// Target firing modes of the managed triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesiredStates {
    pub kick: TriggerState,
    pub truncate: TriggerState,
}

impl DesiredStates {
    /// Target state of a managed trigger
    pub fn for_kind(&self, kind: TriggerKind) -> Option<TriggerState> {
        match kind {
            TriggerKind::Kick => Some(self.kick),
            TriggerKind::TruncatePropagation => Some(self.truncate),
            TriggerKind::DeltaCapture => None,
        }
    }
}

/// Desired trigger states for a topology.
///
/// Asynchronous kicking always disables the kick trigger. A cascading tier
/// must fire its triggers even while applying replicated rows, so they are
/// set to `ALWAYS`.
pub const fn desired_states(flags: TopologyFlags) -> DesiredStates {
    let kick = match (flags.cascade, flags.asynchronous_kicking) {
        (_, true) => TriggerState::Disabled,
        (true, false) => TriggerState::Always,
        (false, false) => TriggerState::Enabled,
    };
    let truncate = if flags.cascade {
        TriggerState::Always
    } else {
        TriggerState::Enabled
    };
    DesiredStates { kick, truncate }
}

/// What a reconciliation run should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Move managed triggers to their desired state
    Add,
    /// Remove all engine triggers
    Drop,
}

/// One trigger that was changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerChange {
    pub table: String,
    pub trigger: String,
    /// `None` when the trigger was dropped
    pub from: Option<TriggerState>,
    pub to: Option<TriggerState>,
}

/// Outcome of a reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub changed: Vec<TriggerChange>,
    /// Triggers already in their desired state
    pub unchanged: usize,
    /// `(table, trigger)` pairs where the trigger does not exist
    pub missing: Vec<(String, String)>,
    pub skipped: Vec<SkippedObject>,
}

const TRIGGER_STATE_SQL: &str = "SELECT pt.tgenabled::text AS tgenabled
FROM pg_catalog.pg_trigger pt
    JOIN pg_catalog.pg_class pc ON pc.oid = pt.tgrelid
    JOIN pg_catalog.pg_namespace pn ON pn.oid = pc.relnamespace
WHERE pn.nspname = $1
    AND pc.relname = $2
    AND pt.tgname = $3";

/// Reconciles engine triggers on the primary
pub struct TriggerCoordinator<'a> {
    connector: &'a dyn Connector,
    replication_name: &'a str,
}

impl<'a> TriggerCoordinator<'a> {
    pub fn new(connector: &'a dyn Connector, replication_name: &'a str) -> Self {
        Self {
            connector,
            replication_name,
        }
    }

    /// Run `mode` over `tables`
    pub async fn reconcile(
        &self,
        tables: &[ReplicatedObject],
        flags: TopologyFlags,
        mode: Mode,
    ) -> Result<ReconcileReport> {
        match mode {
            Mode::Add => self.apply_desired_states(tables, flags).await,
            Mode::Drop => self.drop_triggers(tables).await,
        }
    }

    /// Move the kick and truncate triggers of every table to their desired state
    pub async fn apply_desired_states(
        &self,
        tables: &[ReplicatedObject],
        flags: TopologyFlags,
    ) -> Result<ReconcileReport> {
        let desired = desired_states(flags);
        info!(
            kick = %desired.kick,
            truncate = %desired.truncate,
            tables = tables.len(),
            "reconciling trigger states"
        );

        let conn = self.connector.connect(Target::PrimarySchemaOwner).await?;
        let mut report = ReconcileReport::default();

        for table in tables {
            for kind in TriggerKind::MANAGED {
                let Some(target) = desired.for_kind(kind) else {
                    continue;
                };
                let trigger = kind.trigger_name(self.replication_name);
                self.reconcile_trigger(conn.as_ref(), table, &trigger, target, &mut report)
                    .await?;
            }
        }

        info!(
            changed = report.changed.len(),
            unchanged = report.unchanged,
            missing = report.missing.len(),
            skipped = report.skipped.len(),
            "trigger reconciliation finished"
        );
        Ok(report)
    }

    async fn reconcile_trigger(
        &self,
        conn: &dyn Connection,
        table: &ReplicatedObject,
        trigger: &str,
        target: TriggerState,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let rows = conn
            .query(
                TRIGGER_STATE_SQL,
                &[
                    Value::from(table.namespace.as_str()),
                    Value::from(table.name.as_str()),
                    Value::from(trigger),
                ],
            )
            .await?;

        let Some(row) = rows.first() else {
            warn!(table = %table, trigger = %trigger, "trigger is missing");
            report.missing.push((table.to_string(), trigger.to_string()));
            return Ok(());
        };

        let current = TriggerState::from_tgenabled(row.require_str("tgenabled")?);
        if current == Some(target) {
            debug!(table = %table, trigger = %trigger, state = %target, "already in desired state");
            report.unchanged += 1;
            return Ok(());
        }

        let sql = format!(
            "ALTER TABLE {} {} TRIGGER {}",
            table.quoted(),
            target.alter_clause(),
            quote_ident(trigger)
        );
        match execute_in_transaction(conn, &sql).await {
            Ok(_) => {
                info!(table = %table, trigger = %trigger, state = %target, "trigger updated");
                report.changed.push(TriggerChange {
                    table: table.to_string(),
                    trigger: trigger.to_string(),
                    from: current,
                    to: Some(target),
                });
                Ok(())
            }
            Err(e) if e.is_lock_not_available() => {
                warn!(table = %table, trigger = %trigger, "could not modify trigger: {}", e);
                report
                    .skipped
                    .push(SkippedObject::lock_timeout(table.to_string(), trigger, e.to_string()));
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drop every engine trigger from every table
    pub async fn drop_triggers(&self, tables: &[ReplicatedObject]) -> Result<ReconcileReport> {
        info!(tables = tables.len(), "dropping replication triggers");
        let conn = self.connector.connect(Target::PrimarySchemaOwner).await?;
        let mut report = ReconcileReport::default();

        for table in tables {
            for kind in TriggerKind::ALL {
                let trigger = kind.trigger_name(self.replication_name);
                let sql = format!(
                    "DROP TRIGGER IF EXISTS {} ON {}",
                    quote_ident(&trigger),
                    table.quoted()
                );
                match execute_in_transaction(conn.as_ref(), &sql).await {
                    Ok(_) => report.changed.push(TriggerChange {
                        table: table.to_string(),
                        trigger,
                        from: None,
                        to: None,
                    }),
                    Err(e) if e.is_lock_not_available() => {
                        warn!(table = %table, trigger = %trigger, "could not drop trigger: {}", e);
                        report.skipped.push(SkippedObject::lock_timeout(
                            table.to_string(),
                            trigger,
                            e.to_string(),
                        ));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        info!(
            dropped = report.changed.len(),
            skipped = report.skipped.len(),
            "trigger drop finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(cascade: bool, asynchronous_kicking: bool) -> TopologyFlags {
        TopologyFlags {
            cascade,
            asynchronous_kicking,
        }
    }

    #[test]
    fn test_desired_state_table() {
        use TriggerState::*;

        let cases = [
            (flags(false, false), Enabled, Enabled),
            (flags(false, true), Disabled, Enabled),
            (flags(true, false), Always, Always),
            (flags(true, true), Disabled, Always),
        ];
        for (input, kick, truncate) in cases {
            assert_eq!(
                desired_states(input),
                DesiredStates { kick, truncate },
                "{input:?}"
            );
        }
    }

    #[test]
    fn test_tgenabled_round_trip() {
        for state in [
            TriggerState::Enabled,
            TriggerState::Disabled,
            TriggerState::Always,
            TriggerState::Replica,
        ] {
            assert_eq!(TriggerState::from_tgenabled(state.tgenabled()), Some(state));
        }
        assert_eq!(TriggerState::from_tgenabled("x"), None);
    }

    #[test]
    fn test_trigger_names() {
        assert_eq!(TriggerKind::Kick.trigger_name("s1"), "bucardo_kick_s1");
        assert_eq!(
            TriggerKind::TruncatePropagation.trigger_name("s1"),
            "bucardo_note_trunc_s1"
        );
        assert_eq!(TriggerKind::DeltaCapture.trigger_name("s1"), "bucardo_delta");
        assert!(!TriggerKind::MANAGED.contains(&TriggerKind::DeltaCapture));
    }

    #[test]
    fn test_delta_capture_has_no_target() {
        let desired = desired_states(flags(true, false));
        assert_eq!(desired.for_kind(TriggerKind::DeltaCapture), None);
        assert_eq!(desired.for_kind(TriggerKind::Kick), Some(TriggerState::Always));
    }
}
