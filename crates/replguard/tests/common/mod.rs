//! Shared fixtures for replguard integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use replguard::catalog::ReplicatedObject;
use replguard::testing::{MockConnector, MockQuery};
use replguard::Config;
use replguard_rdbc::{Row, Value};

pub const REPL: &str = "app_sync";

pub const CONFIG_YAML: &str = r#"
plugins: [bucardo, indexes, retry]
databases:
  primary: { host: db-a, dbname: app, user: app, database_owner: owner, schema_owner: app_owner }
  secondary: { host: db-b, dbname: app, user: app, database_owner: owner, schema_owner: app_owner }
  bucardo: { host: db-c, user: bucardo, database_owner: bucardo }
bucardo:
  replication_name: app_sync
  replication_objects:
    namespace_include: [public]
  copy_data: always
indexes:
  larger_than: 10 GB
retry:
  timeout: 2000
"#;

pub fn config() -> Config {
    Config::from_yaml(CONFIG_YAML).expect("fixture config is valid")
}

pub fn tables(names: &[&str]) -> Vec<ReplicatedObject> {
    names
        .iter()
        .map(|name| ReplicatedObject::table("public", *name))
        .collect()
}

pub fn lock_error(sql: &str) -> replguard_rdbc::Error {
    replguard_rdbc::Error::lock_not_available(
        "canceling statement due to lock timeout",
        sql,
    )
}

fn text(value: &Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}

/// In-memory `pg_trigger` that answers state lookups and applies
/// `ALTER TABLE ... TRIGGER` and `DROP TRIGGER` statements.
#[derive(Clone, Default)]
pub struct FakeTriggers {
    /// `(ns.table, trigger)` -> `tgenabled`
    pub states: Arc<Mutex<HashMap<(String, String), String>>>,
    /// Tables whose DDL fails with lock-not-available
    pub locked: Arc<Mutex<Vec<String>>>,
}

impl FakeTriggers {
    /// Every table gets all three engine triggers in state `code`
    pub fn with_all(tables: &[ReplicatedObject], code: &str) -> Self {
        let fake = Self::default();
        for table in tables {
            for trigger in [
                "bucardo_delta".to_string(),
                format!("bucardo_kick_{}", REPL),
                format!("bucardo_note_trunc_{}", REPL),
            ] {
                fake.states
                    .lock()
                    .insert((table.to_string(), trigger), code.to_string());
            }
        }
        fake
    }

    pub fn lock(self, table: &str) -> Self {
        self.locked.lock().push(table.to_string());
        self
    }

    pub fn state(&self, table: &str, trigger: &str) -> Option<String> {
        self.states
            .lock()
            .get(&(table.to_string(), trigger.to_string()))
            .cloned()
    }

    pub fn connector(&self) -> MockConnector {
        let fake = self.clone();
        MockConnector::new().with_responder(move |q| fake.respond(q))
    }

    pub fn respond(&self, q: &MockQuery) -> replguard_rdbc::Result<Vec<Row>> {
        // Post-condition check: tables whose engine trigger count is off
        if q.sql.contains("HAVING count(pt.oid)") {
            let Value::Array(names) = &q.params[0] else {
                panic!("trigger check binds a table array");
            };
            let expected = q.params[1].as_i64().unwrap_or_default() as usize;
            let states = self.states.lock();
            return Ok(names
                .iter()
                .map(text)
                .filter(|name| states.keys().filter(|(t, _)| t == name).count() != expected)
                .map(|name| Row::from_pairs([("qualified", name)]))
                .collect());
        }

        if q.sql.contains("FROM pg_catalog.pg_trigger") {
            let table = format!("{}.{}", text(&q.params[0]), text(&q.params[1]));
            let trigger = text(&q.params[2]);
            return Ok(self
                .state(&table, &trigger)
                .map(|code| vec![Row::from_pairs([("tgenabled", code)])])
                .unwrap_or_default());
        }

        if let Some(rest) = q.sql.strip_prefix("ALTER TABLE ") {
            let (table_and_clause, trigger) = rest
                .rsplit_once(" TRIGGER ")
                .expect("ALTER TABLE ... TRIGGER statement");
            let (table, clause) = table_and_clause
                .split_once(' ')
                .expect("table followed by clause");
            let table = table.replace('"', "");
            if self.locked.lock().contains(&table) {
                return Err(lock_error(&q.sql));
            }
            let code = match clause {
                "ENABLE" => "O",
                "DISABLE" => "D",
                "ENABLE ALWAYS" => "A",
                "ENABLE REPLICA" => "R",
                other => panic!("unexpected clause {other}"),
            };
            self.states
                .lock()
                .insert((table, trigger.replace('"', "")), code.to_string());
            return Ok(vec![]);
        }

        if let Some(rest) = q.sql.strip_prefix("DROP TRIGGER IF EXISTS ") {
            let (trigger, table) = rest.split_once(" ON ").expect("DROP TRIGGER ... ON");
            let table = table.replace('"', "");
            if self.locked.lock().contains(&table) {
                return Err(lock_error(&q.sql));
            }
            self.states
                .lock()
                .remove(&(table, trigger.replace('"', "")));
            return Ok(vec![]);
        }

        Ok(vec![])
    }
}
