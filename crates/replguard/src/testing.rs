//! Testing utilities
//!
//! Scripted stand-ins for the database and the engine CLI so coordinators
//! and workflows can be exercised without a PostgreSQL pair or a Bucardo
//! install.
//!
//! # Example
//!
//! ```rust,ignore
//! use replguard::testing::*;
//!
//! let connector = MockConnector::new().with_responder(|q| {
//!     if q.sql.contains("pg_trigger") {
//!         Ok(vec![Row::from_pairs([("tgenabled", "D")])])
//!     } else {
//!         Ok(vec![])
//!     }
//! });
//!
//! let report = TriggerCoordinator::new(&connector, "app_sync")
//!     .apply_desired_states(&tables, TopologyFlags::default())
//!     .await?;
//!
//! assert_eq!(connector.statements_matching("ALTER TABLE").len(), 2);
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use replguard_rdbc::connection::Transaction;
use replguard_rdbc::{Connection, Row, Value};

use crate::connector::{Connector, Target};
use crate::engine::{EngineOutput, ReplicationEngine};
use crate::error::Result;

// ============================================================================
// Mock database
// ============================================================================

/// A statement seen by the mock database
#[derive(Debug, Clone, PartialEq)]
pub struct MockQuery {
    pub target: Target,
    pub sql: String,
    pub params: Vec<Value>,
}

type Responder = dyn Fn(&MockQuery) -> replguard_rdbc::Result<Vec<Row>> + Send + Sync;

/// A connector whose connections answer through a responder closure
///
/// Every statement, including `BEGIN`, `COMMIT` and `ROLLBACK`, is recorded
/// with the target it was sent to. Transaction control statements never
/// reach the responder.
#[derive(Clone)]
pub struct MockConnector {
    responder: Arc<Mutex<Arc<Responder>>>,
    statements: Arc<Mutex<Vec<MockQuery>>>,
    notices: Arc<Mutex<Vec<String>>>,
    unreachable: Arc<Mutex<Vec<Target>>>,
    connections_opened: Arc<Mutex<usize>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// Connector answering every query with no rows
    pub fn new() -> Self {
        Self {
            responder: Arc::new(Mutex::new(Arc::new(|_: &MockQuery| Ok(Vec::new())))),
            statements: Arc::new(Mutex::new(Vec::new())),
            notices: Arc::new(Mutex::new(Vec::new())),
            unreachable: Arc::new(Mutex::new(Vec::new())),
            connections_opened: Arc::new(Mutex::new(0)),
        }
    }

    /// Answer statements with `responder`
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: Fn(&MockQuery) -> replguard_rdbc::Result<Vec<Row>> + Send + Sync + 'static,
    {
        *self.responder.lock() = Arc::new(responder);
        self
    }

    /// Server notices handed out by the next `take_notices`
    pub fn with_notices(self, notices: Vec<String>) -> Self {
        *self.notices.lock() = notices;
        self
    }

    /// Make connecting to `target` fail
    pub fn fail_connect(self, target: Target) -> Self {
        self.unreachable.lock().push(target);
        self
    }

    /// Every statement in the order it was issued
    pub fn statements(&self) -> Vec<MockQuery> {
        self.statements.lock().clone()
    }

    /// SQL sent to one target
    pub fn statements_for(&self, target: Target) -> Vec<String> {
        self.statements
            .lock()
            .iter()
            .filter(|q| q.target == target)
            .map(|q| q.sql.clone())
            .collect()
    }

    /// SQL starting with `prefix`, on any target
    pub fn statements_matching(&self, prefix: &str) -> Vec<String> {
        self.statements
            .lock()
            .iter()
            .filter(|q| q.sql.starts_with(prefix))
            .map(|q| q.sql.clone())
            .collect()
    }

    /// Forget recorded statements
    pub fn clear(&self) {
        self.statements.lock().clear();
    }

    pub fn connections_opened(&self) -> usize {
        *self.connections_opened.lock()
    }

    fn run(&self, target: Target, sql: &str, params: &[Value]) -> replguard_rdbc::Result<Vec<Row>> {
        let query = MockQuery {
            target,
            sql: sql.to_string(),
            params: params.to_vec(),
        };
        self.statements.lock().push(query.clone());
        let responder = self.responder.lock().clone();
        responder(&query)
    }

    fn record(&self, target: Target, sql: &str) {
        self.statements.lock().push(MockQuery {
            target,
            sql: sql.to_string(),
            params: Vec::new(),
        });
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: Target) -> Result<Box<dyn Connection>> {
        if self.unreachable.lock().contains(&target) {
            return Err(replguard_rdbc::Error::connection(format!(
                "mock connection to {} refused",
                target
            ))
            .into());
        }
        *self.connections_opened.lock() += 1;
        Ok(Box::new(MockConnection {
            target,
            connector: self.clone(),
        }))
    }
}

/// A connection to one mock target
pub struct MockConnection {
    target: Target,
    connector: MockConnector,
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> replguard_rdbc::Result<Vec<Row>> {
        self.connector.run(self.target, sql, params)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> replguard_rdbc::Result<u64> {
        let rows = self.connector.run(self.target, sql, params)?;
        Ok(rows.len() as u64)
    }

    async fn batch_execute(&self, sql: &str) -> replguard_rdbc::Result<()> {
        self.connector.run(self.target, sql, &[]).map(|_| ())
    }

    async fn begin(&self) -> replguard_rdbc::Result<Box<dyn Transaction>> {
        self.connector.record(self.target, "BEGIN");
        Ok(Box::new(MockTransaction {
            target: self.target,
            connector: self.connector.clone(),
        }))
    }

    async fn take_notices(&self) -> Vec<String> {
        std::mem::take(&mut *self.connector.notices.lock())
    }
}

/// A transaction on a mock connection
pub struct MockTransaction {
    target: Target,
    connector: MockConnector,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> replguard_rdbc::Result<Vec<Row>> {
        self.connector.run(self.target, sql, params)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> replguard_rdbc::Result<u64> {
        let rows = self.connector.run(self.target, sql, params)?;
        Ok(rows.len() as u64)
    }

    async fn commit(self: Box<Self>) -> replguard_rdbc::Result<()> {
        self.connector.record(self.target, "COMMIT");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> replguard_rdbc::Result<()> {
        self.connector.record(self.target, "ROLLBACK");
        Ok(())
    }
}

// ============================================================================
// Mock engine
// ============================================================================

/// A scripted engine CLI
///
/// Every invocation succeeds with empty output unless its first argument
/// was registered with [`MockEngine::fail_on`] or [`MockEngine::respond_to`].
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    invocations: Arc<Mutex<Vec<Vec<String>>>>,
    stdin: Arc<Mutex<Vec<Option<String>>>>,
    outputs: Arc<Mutex<Vec<(String, EngineOutput)>>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make commands starting with `command` exit with `code`
    pub fn fail_on(self, command: &str, code: i32, stderr: &str) -> Self {
        self.respond_to(
            command,
            EngineOutput {
                status: Some(code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        )
    }

    /// Answer commands starting with `command` with `output`
    pub fn respond_to(self, command: &str, output: EngineOutput) -> Self {
        self.outputs.lock().push((command.to_string(), output));
        self
    }

    /// Argument vectors in invocation order
    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations.lock().clone()
    }

    /// Input fed to each invocation
    pub fn stdin_inputs(&self) -> Vec<Option<String>> {
        self.stdin.lock().clone()
    }
}

#[async_trait]
impl ReplicationEngine for MockEngine {
    async fn invoke(&self, args: &[String], stdin: Option<&str>) -> Result<EngineOutput> {
        self.invocations.lock().push(args.to_vec());
        self.stdin.lock().push(stdin.map(str::to_string));

        let command = args.first().map(String::as_str).unwrap_or_default();
        let output = self
            .outputs
            .lock()
            .iter()
            .find(|(name, _)| name == command)
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| EngineOutput::success(""));
        Ok(output)
    }
}
