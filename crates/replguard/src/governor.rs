//! Lock-timeout retry governor
//!
//! Bounds how long the engine's sessions may wait for a lock while a
//! mutation runs: `lock_timeout` is set on the role before the operation and
//! reset to the role default afterwards, whether the operation succeeds,
//! fails, panics or is interrupted with Ctrl-C.
//!
//! `ALTER ROLE ... SET` applies to sessions opened afterwards, so every
//! connection the operation opens inherits the ceiling.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use replguard_rdbc::dialect::quote_ident;
use tracing::{error, info, warn};

use crate::connector::{Connector, Target};
use crate::error::{Error, Result};

/// Lock wait ceiling for one role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockWaitPolicy {
    pub role: String,
    pub timeout_ms: u64,
}

impl LockWaitPolicy {
    pub fn new(role: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            role: role.into(),
            timeout_ms,
        }
    }

    /// Statement applying the ceiling
    pub fn set_sql(&self) -> String {
        format!(
            "ALTER ROLE {} SET lock_timeout = {}",
            quote_ident(&self.role),
            self.timeout_ms
        )
    }

    /// Statement restoring the role default
    pub fn reset_sql(&self) -> String {
        format!(
            "ALTER ROLE {} SET lock_timeout = DEFAULT",
            quote_ident(&self.role)
        )
    }
}

enum Outcome<T> {
    Completed(Result<T>),
    Panicked(Box<dyn std::any::Any + Send>),
    Interrupted,
}

/// Applies a [`LockWaitPolicy`] around operations
pub struct RetryGovernor<'a> {
    connector: &'a dyn Connector,
    target: Target,
}

impl<'a> RetryGovernor<'a> {
    /// Governor issuing `ALTER ROLE` on the primary as its database owner
    pub fn new(connector: &'a dyn Connector) -> Self {
        Self {
            connector,
            target: Target::Primary,
        }
    }

    /// Issue the `ALTER ROLE` statements on another target
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Run `operation` with the policy applied; Ctrl-C interrupts it
    pub async fn with_bounded_wait<T, F, Fut>(
        &self,
        policy: &LockWaitPolicy,
        operation: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ctrl_c = async {
            if tokio::signal::ctrl_c().await.is_err() {
                // No signal handler could be installed; never interrupt.
                std::future::pending::<()>().await;
            }
        };
        self.with_bounded_wait_until(policy, operation, ctrl_c).await
    }

    /// Like [`Self::with_bounded_wait`], interrupted when `interrupt` resolves
    pub async fn with_bounded_wait_until<T, F, Fut, I>(
        &self,
        policy: &LockWaitPolicy,
        operation: F,
        interrupt: I,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        I: Future<Output = ()>,
    {
        self.apply(&policy.set_sql()).await?;
        info!(role = %policy.role, timeout_ms = policy.timeout_ms, "lock_timeout set");

        let guarded = AssertUnwindSafe(operation()).catch_unwind();
        let outcome = tokio::select! {
            result = guarded => match result {
                Ok(result) => Outcome::Completed(result),
                Err(payload) => Outcome::Panicked(payload),
            },
            _ = interrupt => Outcome::Interrupted,
        };

        let reset = self.apply(&policy.reset_sql()).await;
        match &reset {
            Ok(()) => info!(role = %policy.role, "lock_timeout reset to default"),
            Err(e) => error!(role = %policy.role, "failed to reset lock_timeout: {}", e),
        }

        match outcome {
            Outcome::Completed(Ok(value)) => reset.map(|()| value),
            Outcome::Completed(Err(e)) => Err(e),
            Outcome::Panicked(payload) => std::panic::resume_unwind(payload),
            Outcome::Interrupted => {
                warn!("operation interrupted");
                Err(Error::Interrupted)
            }
        }
    }

    async fn apply(&self, sql: &str) -> Result<()> {
        let conn = self.connector.connect(self.target).await?;
        conn.execute(sql, &[]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_statements_quote_role() {
        let policy = LockWaitPolicy::new("app owner", 5000);
        assert_eq!(
            policy.set_sql(),
            "ALTER ROLE \"app owner\" SET lock_timeout = 5000"
        );
        assert_eq!(
            policy.reset_sql(),
            "ALTER ROLE \"app owner\" SET lock_timeout = DEFAULT"
        );
    }
}
