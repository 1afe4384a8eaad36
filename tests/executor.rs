mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{config, FlakyConnector, RefusingConnector, HOST};
use persistent_ssh::{CommandExecutor, ConnectionManager, ErrorKind, SshError};

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn printf_ok_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FlakyConnector::new(dir.path());
    let manager = connector.manager();
    let executor = CommandExecutor::new(manager.clone());

    let result = executor.execute("printf ok", TIMEOUT).await.unwrap();
    assert_eq!(result.output, "ok");
    assert_eq!(result.error, "");
    assert_eq!(result.exit_status, 0);
    assert!(manager.is_connected().await);
}

#[tokio::test]
async fn non_zero_exit_is_a_result_not_a_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FlakyConnector::new(dir.path());
    let executor = CommandExecutor::new(connector.manager());

    let result = executor
        .execute("echo nope >&2; exit 7", TIMEOUT)
        .await
        .unwrap();
    assert_eq!(result.exit_status, 7);
    assert_eq!(result.error, "nope\n");
    assert_eq!(connector.opens(), 1);
    assert_eq!(connector.runs(), 1);
}

#[tokio::test]
async fn dropped_transport_is_replaced_before_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FlakyConnector::new(dir.path());
    let manager = connector.manager();
    let executor = CommandExecutor::new(manager.clone());

    executor.execute("true", TIMEOUT).await.unwrap();
    assert_eq!(manager.generation(), 1);

    connector.sever().await;
    assert!(!manager.is_connected().await);

    let result = executor.execute("printf back", TIMEOUT).await.unwrap();
    assert_eq!(result.output, "back");
    assert_eq!(connector.opens(), 2);
    assert_eq!(manager.generation(), 2);
}

#[tokio::test]
async fn mid_command_failure_is_retried_once() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FlakyConnector::new(dir.path());
    let manager = connector.manager();
    let executor = CommandExecutor::new(manager.clone());
    manager.connect().await.unwrap();

    connector.fail_next_runs(1);
    let result = executor.execute("printf recovered", TIMEOUT).await.unwrap();

    assert_eq!(result.output, "recovered");
    assert_eq!(connector.runs(), 2);
    assert_eq!(connector.opens(), 2);
}

#[tokio::test]
async fn retry_happens_at_most_once() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FlakyConnector::new(dir.path());
    let manager = connector.manager();
    let executor = CommandExecutor::new(manager.clone());
    manager.connect().await.unwrap();

    connector.fail_next_runs(5);
    let err = executor.execute("true", TIMEOUT).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.to_string().contains("after reconnect"));
    assert_eq!(err.host(), Some(HOST));
    assert_eq!(connector.runs(), 2);
    assert_eq!(connector.opens(), 2);
}

#[tokio::test]
async fn authentication_failure_is_not_retried() {
    let connector = Arc::new(RefusingConnector::default());
    let err = ConnectionManager::open(config(), connector.clone())
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(!err.is_retryable());

    let manager = ConnectionManager::new(config(), connector.clone()).unwrap();
    let err = CommandExecutor::new(manager)
        .execute("true", TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, SshError::AuthenticationFailed { .. }));
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn timeout_abandons_the_command() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FlakyConnector::new(dir.path());
    let executor = CommandExecutor::new(connector.manager());

    let started = Instant::now();
    let err = executor
        .execute("sleep 5", Duration::from_millis(200))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.to_string().contains("sleep 5"));
    assert!(started.elapsed() < Duration::from_secs(4));

    // The session is still usable afterwards.
    let result = executor.execute("printf ok", TIMEOUT).await.unwrap();
    assert_eq!(result.output, "ok");
}

#[tokio::test]
async fn unbounded_timeout_runs_normally() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FlakyConnector::new(dir.path());
    let executor = CommandExecutor::new(connector.manager());

    let result = executor.execute("printf ok", Duration::MAX).await.unwrap();
    assert_eq!(result.output, "ok");

    connector.fail_next_runs(1);
    let result = executor.execute("printf again", Duration::MAX).await.unwrap();
    assert_eq!(result.output, "again");
}

#[tokio::test]
async fn is_connected_is_false_after_close() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FlakyConnector::new(dir.path());
    let manager = connector.manager();
    manager.connect().await.unwrap();
    assert!(manager.is_connected().await);

    manager.close().await;
    assert!(!manager.is_connected().await);
    manager.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_commands_do_not_interleave() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FlakyConnector::new(dir.path());
    let executor = CommandExecutor::new(connector.manager());

    let mut tasks = Vec::new();
    for id in 0..4 {
        let executor = executor.clone();
        tasks.push(tokio::spawn(async move {
            let command = format!(
                "echo start {id} >> log; sleep 0.1; echo end {id} >> log",
                id = id
            );
            executor.execute(&command, TIMEOUT).await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().exit_status, 0);
    }

    let log = std::fs::read_to_string(dir.path().join("log")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 8);
    for pair in lines.chunks(2) {
        let id = pair[0].strip_prefix("start ").unwrap();
        assert_eq!(pair[1], format!("end {}", id));
    }
}
