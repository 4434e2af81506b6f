//! Lock-wait governor tests: the role default is restored on every exit path

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use replguard::testing::MockConnector;
use replguard::{Error, LockWaitPolicy, RetryGovernor, Target};

const SET: &str = "ALTER ROLE \"owner\" SET lock_timeout = 2000";
const RESET: &str = "ALTER ROLE \"owner\" SET lock_timeout = DEFAULT";

fn policy() -> LockWaitPolicy {
    LockWaitPolicy::new("owner", 2000)
}

fn role_statements(connector: &MockConnector) -> Vec<String> {
    connector
        .statements_for(Target::Primary)
        .into_iter()
        .filter(|sql| sql.starts_with("ALTER ROLE"))
        .collect()
}

#[tokio::test]
async fn test_reset_after_success() {
    let connector = MockConnector::new();
    let value = RetryGovernor::new(&connector)
        .with_bounded_wait(&policy(), || async { Ok(42) })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(role_statements(&connector), vec![SET, RESET]);
}

#[tokio::test]
async fn test_reset_after_error_keeps_operation_error() {
    let connector = MockConnector::new();
    let err = RetryGovernor::new(&connector)
        .with_bounded_wait(&policy(), || async {
            Err::<(), _>(Error::config("operation failed"))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Config(ref m) if m == "operation failed"));
    assert_eq!(role_statements(&connector), vec![SET, RESET]);
}

#[tokio::test]
async fn test_reset_after_panic_then_resumes() {
    let connector = MockConnector::new();
    let governor = RetryGovernor::new(&connector);
    let policy = policy();

    let outcome = AssertUnwindSafe(governor.with_bounded_wait(&policy, || async {
        if true {
            panic!("boom");
        }
        Ok(())
    }))
    .catch_unwind()
    .await;

    assert!(outcome.is_err());
    assert_eq!(role_statements(&connector), vec![SET, RESET]);
}

#[tokio::test]
async fn test_interrupt_resets_and_reports() {
    let connector = MockConnector::new();
    let err = RetryGovernor::new(&connector)
        .with_bounded_wait_until(
            &policy(),
            || std::future::pending::<replguard::Result<()>>(),
            async {},
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Interrupted));
    assert_eq!(role_statements(&connector), vec![SET, RESET]);
}

#[tokio::test]
async fn test_operation_sees_the_ceiling() {
    let connector = MockConnector::new();
    let observed = RetryGovernor::new(&connector)
        .with_bounded_wait(&policy(), || async { Ok(role_statements(&connector)) })
        .await
        .unwrap();

    assert_eq!(observed, vec![SET]);
}

#[tokio::test]
async fn test_reset_failure_is_surfaced_after_success() {
    let connector = MockConnector::new().with_responder(|q| {
        if q.sql.ends_with("DEFAULT") {
            Err(replguard_rdbc::Error::connection("server closed the connection"))
        } else {
            Ok(vec![])
        }
    });

    let err = RetryGovernor::new(&connector)
        .with_bounded_wait(&policy(), || async { Ok(()) })
        .await
        .unwrap_err();
    assert!(err.is_connection_failure());
}

#[tokio::test]
async fn test_set_failure_skips_operation() {
    let connector = MockConnector::new().fail_connect(Target::Primary);
    let ran = AtomicBool::new(false);

    let result = RetryGovernor::new(&connector)
        .with_bounded_wait(&policy(), || {
            let ran = &ran;
            async move {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

    assert!(result.is_err());
    assert!(!ran.load(Ordering::SeqCst));
}
