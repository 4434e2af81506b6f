//! Index migration workflow tests against an in-memory primary, store and secondary

mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use common::{lock_error, tables, REPL};
use parking_lot::Mutex;
use replguard::catalog::IndexDefinition;
use replguard::testing::{MockConnector, MockQuery};
use replguard::{Error, IndexWorkflow, SizeThreshold, SkipReason, Target};
use replguard_rdbc::{Row, Value};

#[derive(Clone)]
struct Candidate {
    table: String,
    name: String,
    create_ddl: String,
    drop_ddl: String,
}

#[derive(Default)]
struct State {
    /// Candidates on the primary
    candidates: Vec<Candidate>,
    /// `(schemaname, indexname)` -> stored row
    store: BTreeMap<(String, String), Candidate>,
    /// Tables whose inserts are silently lost
    lossy_tables: BTreeSet<String>,
    /// Objects present on the secondary
    secondary: BTreeSet<String>,
    /// Objects whose DDL hits a lock timeout on the secondary
    locked: BTreeSet<String>,
    /// Size threshold values seen by candidate queries
    thresholds: Vec<Value>,
    /// `bucardo.syncrun` completed count, advanced on every read
    completed_runs: i64,
}

#[derive(Clone, Default)]
struct FakeIndexes {
    state: Arc<Mutex<State>>,
}

fn param(q: &MockQuery, idx: usize) -> String {
    q.params[idx].as_str().unwrap_or_default().to_string()
}

fn definition_row(c: &Candidate) -> Row {
    Row::from_pairs([
        ("schemaname", c_str("public")),
        ("tablename", c_str(&c.table)),
        ("indexname", c_str(&c.name)),
        ("create_ddl", c_str(&c.create_ddl)),
        ("drop_ddl", c_str(&c.drop_ddl)),
    ])
}

fn c_str(s: &str) -> Value {
    Value::from(s)
}

impl FakeIndexes {
    fn index(self, table: &str, name: &str) -> Self {
        self.add(Candidate {
            table: table.into(),
            name: name.into(),
            create_ddl: format!(
                "CREATE INDEX {name} ON public.{table} USING btree (created_at) WHERE (archived IS FALSE)"
            ),
            drop_ddl: format!("DROP INDEX IF EXISTS public.{name}"),
        })
    }

    fn constraint(self, table: &str, name: &str) -> Self {
        self.add(Candidate {
            table: table.into(),
            name: name.into(),
            create_ddl: format!("ALTER TABLE public.{table} ADD CONSTRAINT {name} UNIQUE (ref)"),
            drop_ddl: format!("ALTER TABLE public.{table} DROP CONSTRAINT {name}"),
        })
    }

    fn add(self, candidate: Candidate) -> Self {
        {
            let mut state = self.state.lock();
            state.secondary.insert(candidate.name.clone());
            state.candidates.push(candidate);
        }
        self
    }

    fn lossy(self, table: &str) -> Self {
        self.state.lock().lossy_tables.insert(table.into());
        self
    }

    fn locked(self, name: &str) -> Self {
        self.state.lock().locked.insert(name.into());
        self
    }

    fn on_secondary(&self, name: &str) -> bool {
        self.state.lock().secondary.contains(name)
    }

    fn connector(&self) -> MockConnector {
        let fake = self.clone();
        MockConnector::new().with_responder(move |q| fake.respond(q))
    }

    fn respond(&self, q: &MockQuery) -> replguard_rdbc::Result<Vec<Row>> {
        let mut state = self.state.lock();
        match q.target {
            Target::Primary if q.sql.contains("pg_relation_size") => {
                state.thresholds.push(q.params[2].clone());
                let table = param(q, 1);
                let constraints = q.sql.contains("contype = 'u'");
                Ok(state
                    .candidates
                    .iter()
                    .filter(|c| c.table == table)
                    .filter(|c| c.drop_ddl.starts_with("ALTER") == constraints)
                    .map(definition_row)
                    .collect())
            }
            Target::Metadata if q.sql.starts_with("INSERT INTO manage_indexes") => {
                let table = param(q, 1);
                if state.lossy_tables.contains(&table) {
                    return Ok(vec![]);
                }
                let candidate = Candidate {
                    table,
                    name: param(q, 2),
                    create_ddl: param(q, 3),
                    drop_ddl: param(q, 4),
                };
                state
                    .store
                    .entry((param(q, 0), candidate.name.clone()))
                    .or_insert(candidate);
                Ok(vec![])
            }
            Target::Metadata if q.sql.contains("count(*) AS n\nFROM manage_indexes") => {
                let table = param(q, 2);
                let n = state.store.values().filter(|c| c.table == table).count() as i64;
                Ok(vec![Row::from_pairs([("n", n)])])
            }
            Target::Metadata if q.sql.starts_with("SELECT schemaname, tablename, indexname") => {
                let mut rows: Vec<_> = state.store.values().cloned().collect();
                rows.sort_by(|a, b| (&a.table, &a.name).cmp(&(&b.table, &b.name)));
                Ok(rows.iter().map(definition_row).collect())
            }
            Target::Metadata if q.sql.contains("bucardo.syncrun") => {
                state.completed_runs += 1;
                Ok(vec![Row::from_pairs([("n", state.completed_runs / 3)])])
            }
            Target::SecondarySchemaOwner
                if q.sql.starts_with("DROP INDEX")
                    || q.sql.starts_with("ALTER TABLE")
                    || q.sql.starts_with("CREATE") =>
            {
                let name = state
                    .candidates
                    .iter()
                    .find(|c| q.sql == c.drop_ddl || q.sql == c.create_ddl)
                    .map(|c| c.name.clone())
                    .expect("statement matches a captured definition");
                if state.locked.contains(&name) {
                    return Err(lock_error(&q.sql));
                }
                if q.sql.contains(" DROP ") || q.sql.starts_with("DROP") {
                    state.secondary.remove(&name);
                } else if !state.secondary.insert(name.clone()) {
                    return Err(replguard_rdbc::Error::query_with_code(
                        format!("relation \"{name}\" already exists"),
                        &q.sql,
                        "42P07",
                    ));
                }
                Ok(vec![])
            }
            _ => Ok(vec![]),
        }
    }
}

fn threshold() -> SizeThreshold {
    "10 GB".parse().unwrap()
}

#[tokio::test]
async fn test_drop_backs_up_then_drops_everything() {
    let fake = FakeIndexes::default()
        .index("orders", "orders_created_idx")
        .constraint("orders", "orders_ref_key")
        .index("items", "items_sku_idx");
    let connector = fake.connector();

    let report = IndexWorkflow::new(&connector, REPL)
        .drop(&tables(&["orders", "items"]), threshold())
        .await
        .unwrap();

    assert_eq!(report.backed_up.len(), 3);
    assert_eq!(report.dropped.len(), 3);
    assert!(report.skipped.is_empty());
    assert!(!fake.on_secondary("orders_created_idx"));
    assert!(!fake.on_secondary("orders_ref_key"));
    assert!(!fake.on_secondary("items_sku_idx"));

    // Every backup happens before the first drop.
    let statements = connector.statements();
    let last_insert = statements
        .iter()
        .rposition(|q| q.sql.starts_with("INSERT"))
        .unwrap();
    let first_drop = statements
        .iter()
        .position(|q| q.target == Target::SecondarySchemaOwner && q.sql != "BEGIN")
        .unwrap();
    assert!(last_insert < first_drop);
}

#[tokio::test]
async fn test_backup_mismatch_issues_no_drop() {
    let fake = FakeIndexes::default()
        .index("orders", "orders_created_idx")
        .index("items", "items_sku_idx")
        .lossy("items");
    let connector = fake.connector();

    let err = IndexWorkflow::new(&connector, REPL)
        .drop(&tables(&["orders", "items"]), threshold())
        .await
        .unwrap_err();

    match err {
        Error::BackupConsistencyMismatch {
            table,
            expected,
            actual,
            ..
        } => {
            assert_eq!(table, "items");
            assert_eq!(expected, 1);
            assert_eq!(actual, 0);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(connector
        .statements_for(Target::SecondarySchemaOwner)
        .is_empty());
    assert!(fake.on_secondary("orders_created_idx"));
}

#[tokio::test]
async fn test_threshold_bound_in_bytes() {
    let fake = FakeIndexes::default().index("orders", "orders_created_idx");
    let connector = fake.connector();

    IndexWorkflow::new(&connector, REPL)
        .discover(&tables(&["orders"])[0], threshold())
        .await
        .unwrap();

    let seen = fake.state.lock().thresholds.clone();
    assert_eq!(seen, vec![Value::Int64(10_000_000_000); 2]);
}

#[tokio::test]
async fn test_recreate_replays_captured_ddl_verbatim() {
    let fake = FakeIndexes::default()
        .index("orders", "orders_created_idx")
        .constraint("orders", "orders_ref_key");
    let connector = fake.connector();
    let workflow = IndexWorkflow::new(&connector, REPL);

    let dropped = workflow
        .drop(&tables(&["orders"]), threshold())
        .await
        .unwrap();
    connector.clear();

    let report = workflow.recreate(false).await.unwrap();
    assert_eq!(report.recreated.len(), 2);
    assert!(fake.on_secondary("orders_created_idx"));
    assert!(fake.on_secondary("orders_ref_key"));

    let executed: BTreeSet<_> = connector
        .statements_for(Target::SecondarySchemaOwner)
        .into_iter()
        .filter(|sql| sql != "BEGIN" && sql != "COMMIT")
        .collect();
    let captured: BTreeSet<_> = dropped
        .backed_up
        .iter()
        .map(|d| d.create_ddl.clone())
        .collect();
    assert_eq!(executed, captured);
}

#[tokio::test]
async fn test_locked_object_is_skipped_and_rest_dropped() {
    let fake = FakeIndexes::default()
        .index("t1", "t1_idx")
        .index("t2", "t2_idx")
        .index("t3", "t3_idx")
        .locked("t2_idx");
    let connector = fake.connector();

    let report = IndexWorkflow::new(&connector, REPL)
        .drop(&tables(&["t1", "t2", "t3"]), threshold())
        .await
        .unwrap();

    assert_eq!(report.dropped.len(), 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].detail, "t2_idx");
    assert_eq!(report.skipped[0].reason, SkipReason::LockTimeoutExceeded);
    assert!(!fake.on_secondary("t1_idx"));
    assert!(fake.on_secondary("t2_idx"));
    assert!(!fake.on_secondary("t3_idx"));
}

#[tokio::test]
async fn test_recreate_after_partial_drop_restores_every_object() {
    let fake = FakeIndexes::default()
        .index("t1", "t1_idx")
        .index("t2", "t2_idx")
        .index("t3", "t3_idx")
        .locked("t2_idx");
    let connector = fake.connector();
    let workflow = IndexWorkflow::new(&connector, REPL);

    let dropped = workflow
        .drop(&tables(&["t1", "t2", "t3"]), threshold())
        .await
        .unwrap();
    assert_eq!(dropped.skipped.len(), 1);
    fake.state.lock().locked.clear();
    connector.clear();

    let report = workflow.recreate(false).await.unwrap();

    let names = |defs: &[IndexDefinition]| {
        defs.iter().map(|d| d.name.clone()).collect::<Vec<_>>()
    };
    assert_eq!(names(&report.recreated), ["t1_idx", "t3_idx"]);
    assert_eq!(names(&report.already_present), ["t2_idx"]);
    assert!(report.skipped.is_empty());
    assert!(fake.on_secondary("t1_idx"));
    assert!(fake.on_secondary("t2_idx"));
    assert!(fake.on_secondary("t3_idx"));
    // The failed CREATE for t2_idx rolled back its own transaction only.
    assert_eq!(
        connector
            .statements_for(Target::SecondarySchemaOwner)
            .iter()
            .filter(|sql| *sql == "ROLLBACK")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_rerunning_drop_does_not_duplicate_backups() {
    let fake = FakeIndexes::default().index("orders", "orders_created_idx");
    let connector = fake.connector();
    let workflow = IndexWorkflow::new(&connector, REPL);

    workflow.drop(&tables(&["orders"]), threshold()).await.unwrap();
    workflow.drop(&tables(&["orders"]), threshold()).await.unwrap();

    assert_eq!(fake.state.lock().store.len(), 1);
}

#[tokio::test]
async fn test_wait_for_copy_polls_until_a_new_run_completes() {
    let fake = FakeIndexes::default();
    let connector = fake.connector();

    let report = IndexWorkflow::new(&connector, REPL)
        .with_poll_interval(Duration::from_millis(1))
        .recreate(true)
        .await
        .unwrap();

    assert!(report.recreated.is_empty());
    let polls = connector
        .statements_for(Target::Metadata)
        .iter()
        .filter(|sql| sql.contains("bucardo.syncrun"))
        .count();
    assert!(polls >= 2);
}
