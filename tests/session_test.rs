//! Integration tests for query sessions against SQLite.
//!
//! Tests verify that:
//! - Prepared reads deliver rows and fire start, finish, then the callback
//! - Failing statements still fire finish and reach the callback as errors
//! - Transactions commit or roll back and restore auto-commit mode
//! - Closing a session returns its connection to the pool

use sqlsession::config::PoolConfig;
use sqlsession::db::PoolRegistry;
use sqlsession::error::DbError;
use sqlsession::models::{QueryParam, StatementOutput};
use sqlsession::session::{Session, SessionListeners, TransactionOutcome, completion};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

type Log = Arc<Mutex<Vec<String>>>;

async fn setup() -> (TempDir, PoolRegistry, PoolConfig) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.db");
    let config = PoolConfig::sqlite(path.to_string_lossy());
    let registry = PoolRegistry::new();

    let mut session = registry.session(&config, None).await.unwrap();
    session
        .run(
            "CREATE TABLE accounts (id INTEGER PRIMARY KEY, name TEXT NOT NULL, balance REAL)",
            None,
        )
        .await
        .unwrap();
    session
        .run(
            "INSERT INTO accounts (id, name, balance) VALUES (?, ?, ?), (?, ?, ?)",
            Some(&[
                QueryParam::Int(42),
                QueryParam::from("alice"),
                QueryParam::Float(10.5),
                QueryParam::Int(7),
                QueryParam::from("bob"),
                QueryParam::Null,
            ]),
        )
        .await
        .unwrap();
    session.close().await.unwrap();

    (dir, registry, config)
}

fn recording_listeners(log: &Log) -> SessionListeners {
    let (start, finish, close) = (Arc::clone(log), Arc::clone(log), Arc::clone(log));
    SessionListeners::new()
        .on_start(move |sql| start.lock().unwrap().push(format!("start:{sql}")))
        .on_finish(move |result| {
            let entry = if result.is_ok() { "finish:ok" } else { "finish:err" };
            finish.lock().unwrap().push(entry.to_string());
        })
        .on_close(move || close.lock().unwrap().push("close".to_string()))
}

async fn balance_rows(session: &mut Session) -> usize {
    session
        .run("SELECT * FROM accounts", None)
        .await
        .unwrap()
        .into_rows()
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_prepared_select_with_callback() {
    let (_dir, registry, config) = setup().await;
    let log: Log = Arc::default();
    let rows = Arc::new(Mutex::new(None));

    let mut session = registry
        .session(&config, Some(recording_listeners(&log)))
        .await
        .unwrap();

    let (cb_log, cb_rows) = (Arc::clone(&log), Arc::clone(&rows));
    let sql = "select id, name, balance from accounts where id = ?";
    session
        .submit(
            sql,
            completion(move |result| {
                cb_log.lock().unwrap().push("callback".to_string());
                *cb_rows.lock().unwrap() = result.ok().and_then(StatementOutput::into_rows);
            }),
            None,
        )
        .unwrap()
        .execute(Some(&[QueryParam::Int(42)]))
        .await
        .unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            format!("start:{sql}"),
            "finish:ok".to_string(),
            "callback".to_string()
        ]
    );

    let rows = rows.lock().unwrap().take().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], 42);
    assert_eq!(rows[0]["name"], "alice");
    assert_eq!(rows[0]["balance"], 10.5);

    session.close().await.unwrap();
    assert_eq!(log.lock().unwrap().last().unwrap(), "close");
    registry.shutdown().await;
}

#[tokio::test]
async fn test_null_and_empty_results() {
    let (_dir, registry, config) = setup().await;
    let mut session = registry.session(&config, None).await.unwrap();

    let rows = session
        .run("SELECT balance FROM accounts WHERE id = 7", None)
        .await
        .unwrap()
        .into_rows()
        .unwrap();
    assert!(rows[0]["balance"].is_null());

    let output = session
        .run("SELECT * FROM accounts WHERE id = ?", Some(&[QueryParam::Int(-1)]))
        .await
        .unwrap();
    assert_eq!(output, StatementOutput::Rows(vec![]));

    session.close().await.unwrap();
    registry.shutdown().await;
}

#[tokio::test]
async fn test_update_reports_affected_rows() {
    let (_dir, registry, config) = setup().await;
    let mut session = registry.session(&config, None).await.unwrap();

    let output = session
        .run("UPDATE accounts SET balance = 0", None)
        .await
        .unwrap();
    assert_eq!(output.rows_affected(), Some(2));

    let output = session
        .run("delete from accounts where id = ?", Some(&[QueryParam::Int(7)]))
        .await
        .unwrap();
    assert_eq!(output, StatementOutput::Affected(1));

    session.close().await.unwrap();
    registry.shutdown().await;
}

#[tokio::test]
async fn test_failing_update_reaches_callback() {
    let (_dir, registry, config) = setup().await;
    let log: Log = Arc::default();
    let mut session = registry
        .session(&config, Some(recording_listeners(&log)))
        .await
        .unwrap();

    let outcome = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&outcome);
    session
        .submit(
            "UPDATE missing_table SET a = 1",
            completion(move |result| *seen.lock().unwrap() = Some(result)),
            None,
        )
        .unwrap();
    session.execute(None).await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "start:UPDATE missing_table SET a = 1".to_string(),
            "finish:err".to_string()
        ]
    );
    let result = outcome.lock().unwrap().take().unwrap();
    assert!(matches!(result, Err(DbError::StatementExecution { .. })));

    // The session stays usable
    assert_eq!(balance_rows(&mut session).await, 2);

    session.close().await.unwrap();
    registry.shutdown().await;
}

#[tokio::test]
async fn test_transaction_commit_and_rollback() {
    let (_dir, registry, config) = setup().await;
    let mut session = registry.session(&config, None).await.unwrap();

    session.begin().await.unwrap();
    assert!(!session.auto_commit());
    session
        .run("INSERT INTO accounts (id, name) VALUES (1, 'carol')", None)
        .await
        .unwrap();
    let cause = DbError::statement("later step failed", None, "retry");
    assert_eq!(
        session.end(Some(&cause)).await.unwrap(),
        TransactionOutcome::RolledBack
    );
    assert!(session.auto_commit());
    assert_eq!(balance_rows(&mut session).await, 2);

    session.begin().await.unwrap();
    session
        .run("INSERT INTO accounts (id, name) VALUES (2, 'dave')", None)
        .await
        .unwrap();
    assert_eq!(
        session.end(None).await.unwrap(),
        TransactionOutcome::Committed
    );
    assert_eq!(balance_rows(&mut session).await, 3);

    assert!(matches!(
        session.end(None).await,
        Err(DbError::Transaction { .. })
    ));

    session.close().await.unwrap();
    registry.shutdown().await;
}

#[tokio::test]
async fn test_closing_session_returns_connection() {
    let (_dir, registry, config) = setup().await;
    let handle = registry.get_or_create(&config).await.unwrap();

    // SQLite pools hold a single connection by default
    let mut first = registry.session(&config, None).await.unwrap();
    first.close().await.unwrap();
    first.close().await.unwrap();

    let conn = registry
        .acquire(handle.identity(), Duration::from_millis(500))
        .await
        .unwrap();
    let mut second = Session::new(conn);
    assert_eq!(balance_rows(&mut second).await, 2);
    second.close().await.unwrap();

    assert!(matches!(
        first.run("SELECT 1", None).await,
        Err(DbError::ConnectionUnavailable { .. })
    ));
    registry.shutdown().await;
}
