//! Query sessions.
//!
//! A [`Session`] is bound to one borrowed connection for its whole life. It
//! classifies each statement (read or mutation), routes it to the plain or
//! prepared executor operation, converts parameters and rows through their JSON
//! payloads and reports the outcome to listeners and to the caller.
//!
//! Two calling styles are supported:
//!
//! ```ignore
//! // Future style
//! let output = session.run("select * from accounts where id = ?", Some(&[42.into()])).await?;
//!
//! // Callback style
//! session
//!     .submit(sql, Some(completion(|result| println!("{result:?}"))), None)?
//!     .execute(None)
//!     .await?;
//! ```
//!
//! For one statement, `start` fires before dispatch and `finish` fires before the
//! callback runs or the future resolves. `finish` fires for failed statements too.

mod events;
mod transaction;

pub use events::{CloseListener, ErrorListener, FinishListener, SessionListeners, StartListener};
pub use transaction::TransactionOutcome;

use crate::db::connection::PooledConnection;
use crate::db::executor::StatementExecutor;
use crate::db::params::{decode_rows, encode_params};
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, StatementKind, StatementOutput, classify};
use tracing::{debug, info};
use uuid::Uuid;

/// Completion callback of a submitted statement.
pub type Completion = Box<dyn FnOnce(DbResult<StatementOutput>) + Send>;

/// Box a closure as a completion callback.
pub fn completion<F>(f: F) -> Option<Completion>
where
    F: FnOnce(DbResult<StatementOutput>) + Send + 'static,
{
    Some(Box::new(f))
}

struct PendingStatement {
    sql: String,
    callback: Completion,
}

/// A unit of work on one pooled connection.
pub struct Session<C = PooledConnection> {
    id: Uuid,
    conn: C,
    pending: Option<PendingStatement>,
    listeners: SessionListeners,
}

impl<C> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("pending_sql", &self.pending.as_ref().map(|p| p.sql.as_str()))
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl<C: StatementExecutor> Session<C> {
    pub fn new(conn: C) -> Self {
        Self::with_listeners(conn, SessionListeners::default())
    }

    pub fn with_listeners(conn: C, listeners: SessionListeners) -> Self {
        let id = Uuid::new_v4();
        debug!(session_id = %id, "Session opened");
        Self {
            id,
            conn,
            pending: None,
            listeners,
        }
    }

    /// Identifier used in log records.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn listeners(&self) -> &SessionListeners {
        &self.listeners
    }

    /// Register more listeners for the rest of the session.
    pub fn add_listeners(&mut self, listeners: SessionListeners) {
        self.listeners.extend(listeners);
    }

    /// The trimmed SQL waiting for `execute`, if any.
    pub fn pending_sql(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.sql.as_str())
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    pub fn auto_commit(&self) -> bool {
        self.conn.auto_commit()
    }

    /// Queue a statement for [`execute`](Self::execute).
    ///
    /// `listeners` are added to the session before anything else happens. A
    /// missing callback is reported to the `error` listeners and returned as
    /// `InvalidCallback`; nothing is queued in that case.
    pub fn submit(
        &mut self,
        sql: &str,
        callback: Option<Completion>,
        listeners: Option<SessionListeners>,
    ) -> DbResult<&mut Self> {
        if let Some(listeners) = listeners {
            self.listeners.extend(listeners);
        }

        let Some(callback) = callback else {
            self.pending = None;
            let err = DbError::invalid_callback("A completion callback is required");
            self.listeners.emit_error(&err);
            return Err(err);
        };

        self.pending = Some(PendingStatement {
            sql: sql.trim().to_string(),
            callback,
        });
        Ok(self)
    }

    /// Execute the submitted statement and hand the outcome to its callback.
    ///
    /// Statement failures go to the callback; the returned error only reports that
    /// nothing was submitted.
    pub async fn execute(&mut self, params: Option<&[QueryParam]>) -> DbResult<()> {
        let Some(PendingStatement { sql, callback }) = self.pending.take() else {
            let err = DbError::statement(
                "No statement is pending",
                None,
                "Call submit before execute",
            );
            self.listeners.emit_error(&err);
            return Err(err);
        };

        let result = self.dispatch(&sql, params).await;
        callback(result);
        Ok(())
    }

    /// Execute `sql` and return its outcome.
    pub async fn run(
        &mut self,
        sql: &str,
        params: Option<&[QueryParam]>,
    ) -> DbResult<StatementOutput> {
        self.dispatch(sql.trim(), params).await
    }

    async fn dispatch(
        &mut self,
        sql: &str,
        params: Option<&[QueryParam]>,
    ) -> DbResult<StatementOutput> {
        if self.conn.is_closed() {
            return Err(DbError::connection_unavailable(
                "Session connection is closed",
                "Open a new session",
            ));
        }

        let kind = classify(sql);
        debug!(
            session_id = %self.id,
            kind = %kind,
            prepared = params.is_some(),
            sql = %sql,
            "Dispatching statement"
        );

        self.listeners.emit_start(sql);
        let result = self.route(kind, sql, params).await;
        if let Err(e) = &result {
            debug!(session_id = %self.id, error = %e, "Statement failed");
        }
        self.listeners.emit_finish(&result);
        result
    }

    async fn route(
        &mut self,
        kind: StatementKind,
        sql: &str,
        params: Option<&[QueryParam]>,
    ) -> DbResult<StatementOutput> {
        match (kind, params) {
            (StatementKind::Read, None) => {
                let payload = self.conn.execute_query(sql).await?;
                Ok(StatementOutput::Rows(decode_rows(&payload)?))
            }
            (StatementKind::Read, Some(params)) => {
                let params = encode_params(params)?;
                let payload = self.conn.execute_prepared_query(sql, &params).await?;
                Ok(StatementOutput::Rows(decode_rows(&payload)?))
            }
            (StatementKind::Mutation, None) => {
                Ok(StatementOutput::Affected(self.conn.execute_update(sql).await?))
            }
            (StatementKind::Mutation, Some(params)) => {
                let params = encode_params(params)?;
                Ok(StatementOutput::Affected(
                    self.conn.execute_prepared_update(sql, &params).await?,
                ))
            }
        }
    }

    /// Release the connection and emit `close`. No-op when already closed.
    ///
    /// A pending transaction is rolled back first.
    pub async fn close(&mut self) -> DbResult<()> {
        if self.conn.is_closed() {
            return Ok(());
        }
        self.pending = None;
        self.conn.close().await?;
        info!(session_id = %self.id, "Session closed");
        self.listeners.emit_close();
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable in-memory executor.

    use super::*;

    #[derive(Debug)]
    pub struct MockExecutor {
        pub calls: Vec<String>,
        /// Payload returned by reads.
        pub rows: String,
        pub affected: u64,
        /// When set, statements fail with this message.
        pub fail_with: Option<String>,
        pub fail_commit: bool,
        pub auto_commit: bool,
        pub closed: bool,
    }

    impl MockExecutor {
        pub fn new() -> Self {
            Self {
                calls: Vec::new(),
                rows: "[]".to_string(),
                affected: 0,
                fail_with: None,
                fail_commit: false,
                auto_commit: true,
                closed: false,
            }
        }

        fn statement(&mut self, call: String) -> DbResult<()> {
            self.calls.push(call);
            match &self.fail_with {
                Some(message) => Err(DbError::statement(message.clone(), None, "fix it")),
                None => Ok(()),
            }
        }
    }

    impl StatementExecutor for MockExecutor {
        async fn execute_query(&mut self, sql: &str) -> DbResult<String> {
            self.statement(format!("query:{sql}"))?;
            Ok(self.rows.clone())
        }

        async fn execute_prepared_query(&mut self, sql: &str, params: &str) -> DbResult<String> {
            self.statement(format!("prepared_query:{sql}:{params}"))?;
            Ok(self.rows.clone())
        }

        async fn execute_update(&mut self, sql: &str) -> DbResult<u64> {
            self.statement(format!("update:{sql}"))?;
            Ok(self.affected)
        }

        async fn execute_prepared_update(&mut self, sql: &str, params: &str) -> DbResult<u64> {
            self.statement(format!("prepared_update:{sql}:{params}"))?;
            Ok(self.affected)
        }

        async fn begin(&mut self) -> DbResult<()> {
            self.calls.push("begin".to_string());
            self.auto_commit = false;
            Ok(())
        }

        async fn commit(&mut self) -> DbResult<()> {
            self.calls.push("commit".to_string());
            self.auto_commit = true;
            if self.fail_commit {
                self.calls.push("rollback".to_string());
                return Err(DbError::statement("commit failed", None, "retry"));
            }
            Ok(())
        }

        async fn rollback(&mut self) -> DbResult<()> {
            self.calls.push("rollback".to_string());
            self.auto_commit = true;
            Ok(())
        }

        fn auto_commit(&self) -> bool {
            self.auto_commit
        }

        fn is_closed(&self) -> bool {
            self.closed
        }

        async fn close(&mut self) -> DbResult<()> {
            if !self.auto_commit {
                self.calls.push("rollback".to_string());
                self.auto_commit = true;
            }
            self.calls.push("close".to_string());
            self.closed = true;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockExecutor;
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording_listeners(log: &Log) -> SessionListeners {
        let (start, finish, error, close) = (
            Arc::clone(log),
            Arc::clone(log),
            Arc::clone(log),
            Arc::clone(log),
        );
        SessionListeners::new()
            .on_start(move |sql| start.lock().unwrap().push(format!("start:{sql}")))
            .on_finish(move |result| {
                let entry = match result {
                    Ok(output) => format!("finish:ok:{}", output.kind()),
                    Err(_) => "finish:err".to_string(),
                };
                finish.lock().unwrap().push(entry);
            })
            .on_error(move |e| error.lock().unwrap().push(format!("error:{e}")))
            .on_close(move || close.lock().unwrap().push("close".to_string()))
    }

    fn recording_callback(log: &Log) -> Option<Completion> {
        let log = Arc::clone(log);
        completion(move |result| {
            let entry = match result {
                Ok(StatementOutput::Rows(rows)) => format!("callback:rows:{}", rows.len()),
                Ok(StatementOutput::Affected(n)) => format!("callback:affected:{n}"),
                Err(_) => "callback:err".to_string(),
            };
            log.lock().unwrap().push(entry);
        })
    }

    #[tokio::test]
    async fn test_prepared_read_event_order() {
        let log: Log = Arc::default();
        let mut conn = MockExecutor::new();
        conn.rows = r#"[{"id":42,"name":"alice"}]"#.to_string();
        let mut session = Session::new(conn);

        let sql = "select * from accounts where id = ?";
        session
            .submit(sql, recording_callback(&log), Some(recording_listeners(&log)))
            .unwrap()
            .execute(Some(&[QueryParam::Int(42)]))
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                format!("start:{sql}"),
                "finish:ok:read".to_string(),
                "callback:rows:1".to_string(),
            ]
        );
        assert_eq!(
            session.connection().calls,
            vec![format!("prepared_query:{sql}:[42]")]
        );
    }

    #[tokio::test]
    async fn test_routing_by_kind_and_params() {
        let mut session = Session::new(MockExecutor::new());
        session.run("SELECT 1", None).await.unwrap();
        session.run("select ?", Some(&[])).await.unwrap();
        session.run("  Insert into t values (1)", None).await.unwrap();
        session
            .run("delete from t where id = ?", Some(&[QueryParam::Int(1)]))
            .await
            .unwrap();
        session.run("create table t (id int)", None).await.unwrap();

        assert_eq!(
            session.connection().calls,
            vec![
                "query:SELECT 1".to_string(),
                "prepared_query:select ?:[]".to_string(),
                "update:Insert into t values (1)".to_string(),
                "prepared_update:delete from t where id = ?:[1]".to_string(),
                "update:create table t (id int)".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_mutation_returns_affected_count() {
        let mut conn = MockExecutor::new();
        conn.affected = 3;
        let mut session = Session::new(conn);
        let output = session.run("update t set a = 1", None).await.unwrap();
        assert_eq!(output, StatementOutput::Affected(3));
    }

    #[tokio::test]
    async fn test_failed_update_still_emits_finish() {
        let log: Log = Arc::default();
        let mut conn = MockExecutor::new();
        conn.fail_with = Some("disk full".to_string());
        let mut session = Session::with_listeners(conn, recording_listeners(&log));

        session
            .submit("update accounts set balance = 0", recording_callback(&log), None)
            .unwrap();
        session.execute(None).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "start:update accounts set balance = 0".to_string(),
                "finish:err".to_string(),
                "callback:err".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_submit_without_callback() {
        let log: Log = Arc::default();
        let mut session = Session::new(MockExecutor::new());

        let err = session
            .submit("select 1", None, Some(recording_listeners(&log)))
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidCallback { .. }));
        assert!(session.pending_sql().is_none());
        assert_eq!(log.lock().unwrap().len(), 1);
        assert!(log.lock().unwrap()[0].starts_with("error:"));
        assert!(session.connection().calls.is_empty());
    }

    #[tokio::test]
    async fn test_execute_consumes_pending_statement() {
        let log: Log = Arc::default();
        let mut session = Session::with_listeners(MockExecutor::new(), recording_listeners(&log));

        session
            .submit("  select 1  ", recording_callback(&log), None)
            .unwrap();
        assert_eq!(session.pending_sql(), Some("select 1"));
        session.execute(None).await.unwrap();
        assert!(session.pending_sql().is_none());

        let err = session.execute(None).await.unwrap_err();
        assert!(matches!(err, DbError::StatementExecution { .. }));
        assert_eq!(session.connection().calls.len(), 1);
        assert!(log.lock().unwrap().last().unwrap().starts_with("error:"));
    }

    #[tokio::test]
    async fn test_malformed_row_payload_is_serialization_error() {
        let mut conn = MockExecutor::new();
        conn.rows = "not json".to_string();
        let mut session = Session::new(conn);
        let err = session.run("select 1", None).await.unwrap_err();
        assert!(matches!(err, DbError::Serialization { .. }));
    }

    #[tokio::test]
    async fn test_non_finite_param_never_reaches_executor() {
        let log: Log = Arc::default();
        let mut session = Session::with_listeners(MockExecutor::new(), recording_listeners(&log));
        let err = session
            .run("select ?", Some(&[QueryParam::Float(f64::NAN)]))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Serialization { .. }));
        assert!(session.connection().calls.is_empty());
        assert_eq!(log.lock().unwrap().last().unwrap(), "finish:err");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_execution() {
        let log: Log = Arc::default();
        let mut session = Session::with_listeners(MockExecutor::new(), recording_listeners(&log));

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(session.is_closed());
        assert_eq!(*log.lock().unwrap(), vec!["close".to_string()]);

        let err = session.run("select 1", None).await.unwrap_err();
        assert!(matches!(err, DbError::ConnectionUnavailable { .. }));
        assert_eq!(session.connection().calls, vec!["close".to_string()]);
    }

    #[tokio::test]
    async fn test_callback_receives_closed_connection_error() {
        let log: Log = Arc::default();
        let mut session = Session::new(MockExecutor::new());
        session.close().await.unwrap();

        session
            .submit("select 1", recording_callback(&log), None)
            .unwrap()
            .execute(None)
            .await
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["callback:err".to_string()]);
    }
}
