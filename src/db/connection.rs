//! Pooled connection adapter.
//!
//! [`PooledConnection`] wraps one borrowed sqlx connection and implements
//! [`StatementExecutor`] on top of it: parameters arrive as a JSON payload, rows
//! leave as one. Transactions are driven with plain `BEGIN`/`COMMIT`/`ROLLBACK`
//! so the connection itself carries the commit mode.

use crate::db::executor::{StatementExecutor, mysql, postgres, rows_to_json, sqlite};
use crate::db::params::{decode_params, encode_rows};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseIdentity, QueryParam, Row};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, Executor, MySql, Postgres, Sqlite};
use tracing::{debug, warn};

/// A connection borrowed from one of the backend pools.
#[derive(Debug)]
pub enum DbConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl DbConnection {
    async fn fetch_rows(&mut self, sql: &str, params: Option<&[QueryParam]>) -> DbResult<Vec<Row>> {
        impl_db_dispatch!(DbConnection, self, {
            MySql(c) => rows_to_json(&mysql::fetch_rows(c, sql, params).await?),
            Postgres(c) => rows_to_json(&postgres::fetch_rows(c, sql, params).await?),
            SQLite(c) => rows_to_json(&sqlite::fetch_rows(c, sql, params).await?),
        })
    }

    async fn execute(&mut self, sql: &str, params: Option<&[QueryParam]>) -> DbResult<u64> {
        impl_db_dispatch!(DbConnection, self, {
            MySql(c) => mysql::execute(c, sql, params).await,
            Postgres(c) => postgres::execute(c, sql, params).await,
            SQLite(c) => sqlite::execute(c, sql, params).await,
        })
    }

    /// Run a transaction control statement.
    async fn control(&mut self, sql: &'static str) -> Result<(), sqlx::Error> {
        impl_db_dispatch!(DbConnection, self, {
            MySql(c) => (&mut **c).execute(sql).await.map(|_| ()),
            Postgres(c) => (&mut **c).execute(sql).await.map(|_| ()),
            SQLite(c) => (&mut **c).execute(sql).await.map(|_| ()),
        })
    }

    /// Take the connection out of its pool and close it.
    async fn discard(self) {
        let result = impl_db_dispatch!(DbConnection, self, {
            MySql(c) => c.detach().close().await,
            Postgres(c) => c.detach().close().await,
            SQLite(c) => c.detach().close().await,
        });
        if let Err(e) = result {
            debug!(error = %e, "Error closing discarded connection");
        }
    }

    /// Take the connection out of its pool without a graceful close.
    fn detach(self) {
        impl_db_dispatch!(DbConnection, self, {
            MySql(c) => drop(c.detach()),
            Postgres(c) => drop(c.detach()),
            SQLite(c) => drop(c.detach()),
        })
    }
}

/// The driver adapter a session is bound to.
///
/// Dropping it returns the connection to the pool, unless a transaction is still
/// open, in which case the physical connection is discarded.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<DbConnection>,
    identity: DatabaseIdentity,
    auto_commit: bool,
    /// Set when a rollback failed and the connection state is unknown.
    broken: bool,
}

impl PooledConnection {
    pub fn new(conn: DbConnection, identity: DatabaseIdentity) -> Self {
        Self {
            conn: Some(conn),
            identity,
            auto_commit: true,
            broken: false,
        }
    }

    pub fn identity(&self) -> &DatabaseIdentity {
        &self.identity
    }

    fn open(&mut self) -> DbResult<&mut DbConnection> {
        self.conn.as_mut().ok_or_else(|| {
            DbError::connection_unavailable(
                format!("Connection to {} is closed", self.identity),
                "Acquire a new connection from the pool",
            )
        })
    }

    async fn query(&mut self, sql: &str, params: Option<&[QueryParam]>) -> DbResult<String> {
        let rows = self.open()?.fetch_rows(sql, params).await?;
        debug!(identity = %self.identity, rows = rows.len(), "Fetched rows");
        encode_rows(&rows)
    }

    async fn update(&mut self, sql: &str, params: Option<&[QueryParam]>) -> DbResult<u64> {
        let affected = self.open()?.execute(sql, params).await?;
        debug!(identity = %self.identity, affected, "Executed update");
        Ok(affected)
    }

    async fn finish_transaction(&mut self, statement: &'static str) -> DbResult<()> {
        if self.auto_commit {
            return Err(DbError::transaction("No transaction is pending"));
        }
        let result = self.open()?.control(statement).await;
        self.auto_commit = true;
        result.map_err(DbError::from)
    }
}

impl StatementExecutor for PooledConnection {
    async fn execute_query(&mut self, sql: &str) -> DbResult<String> {
        self.query(sql, None).await
    }

    async fn execute_prepared_query(&mut self, sql: &str, params: &str) -> DbResult<String> {
        let params = decode_params(params)?;
        self.query(sql, Some(&params)).await
    }

    async fn execute_update(&mut self, sql: &str) -> DbResult<u64> {
        self.update(sql, None).await
    }

    async fn execute_prepared_update(&mut self, sql: &str, params: &str) -> DbResult<u64> {
        let params = decode_params(params)?;
        self.update(sql, Some(&params)).await
    }

    async fn begin(&mut self) -> DbResult<()> {
        if !self.auto_commit {
            return Err(DbError::transaction("A transaction is already pending"));
        }
        self.open()?.control("BEGIN").await?;
        self.auto_commit = false;
        debug!(identity = %self.identity, "Transaction started");
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        match self.finish_transaction("COMMIT").await {
            Ok(()) => {
                debug!(identity = %self.identity, "Transaction committed");
                Ok(())
            }
            Err(e @ DbError::Transaction { .. }) => Err(e),
            Err(e) => {
                warn!(identity = %self.identity, error = %e, "Commit failed, rolling back");
                let rollback = match self.open() {
                    Ok(conn) => conn.control("ROLLBACK").await,
                    Err(_) => Ok(()),
                };
                if let Err(rollback_err) = rollback {
                    warn!(error = %rollback_err, "Rollback after failed commit also failed");
                    self.broken = true;
                }
                Err(e)
            }
        }
    }

    async fn rollback(&mut self) -> DbResult<()> {
        let result = self.finish_transaction("ROLLBACK").await;
        match &result {
            Ok(()) => debug!(identity = %self.identity, "Transaction rolled back"),
            Err(DbError::Transaction { .. }) => {}
            Err(e) => {
                warn!(identity = %self.identity, error = %e, "Rollback failed");
                self.broken = true;
            }
        }
        result
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    async fn close(&mut self) -> DbResult<()> {
        if self.conn.is_none() {
            return Ok(());
        }
        if !self.auto_commit {
            // Errors are recorded in `broken`
            let _ = self.rollback().await;
        }
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        if self.broken {
            warn!(identity = %self.identity, "Discarding connection in unknown state");
            conn.discard().await;
        } else {
            debug!(identity = %self.identity, "Returning connection to pool");
            drop(conn);
        }
        Ok(())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if !self.auto_commit || self.broken {
            warn!(
                identity = %self.identity,
                "Connection dropped with an open transaction, discarding it"
            );
            conn.detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::db::params::{decode_rows, encode_params};
    use crate::db::pool::PoolHandle;
    use std::time::Duration;

    async fn sqlite_handle(dir: &tempfile::TempDir) -> PoolHandle {
        let path = dir.path().join("conn.db");
        let handle = PoolHandle::connect(&PoolConfig::sqlite(path.to_string_lossy()))
            .await
            .unwrap();
        let mut conn = handle.get_connection(Duration::from_secs(1)).await.unwrap();
        conn.execute_update("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT)")
            .await
            .unwrap();
        conn.close().await.unwrap();
        handle
    }

    async fn count(conn: &mut PooledConnection) -> i64 {
        let rows = decode_rows(
            &conn
                .execute_query("SELECT COUNT(*) AS n FROM items")
                .await
                .unwrap(),
        )
        .unwrap();
        rows[0]["n"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_prepared_payload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let handle = sqlite_handle(&dir).await;
        let mut conn = handle.get_connection(Duration::from_secs(1)).await.unwrap();

        let params = encode_params(&[QueryParam::Int(7), QueryParam::from("seven")]).unwrap();
        let affected = conn
            .execute_prepared_update("INSERT INTO items (id, label) VALUES (?, ?)", &params)
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let payload = conn
            .execute_prepared_query("SELECT id, label FROM items WHERE id = ?", "[7]")
            .await
            .unwrap();
        assert_eq!(payload, r#"[{"id":7,"label":"seven"}]"#);
    }

    #[tokio::test]
    async fn test_malformed_params_payload() {
        let dir = tempfile::tempdir().unwrap();
        let handle = sqlite_handle(&dir).await;
        let mut conn = handle.get_connection(Duration::from_secs(1)).await.unwrap();

        let err = conn
            .execute_prepared_query("SELECT * FROM items WHERE id = ?", "{")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Serialization { .. }));
    }

    #[tokio::test]
    async fn test_begin_rollback_restores_auto_commit() {
        let dir = tempfile::tempdir().unwrap();
        let handle = sqlite_handle(&dir).await;
        let mut conn = handle.get_connection(Duration::from_secs(1)).await.unwrap();

        conn.begin().await.unwrap();
        assert!(!conn.auto_commit());
        assert!(matches!(
            conn.begin().await,
            Err(DbError::Transaction { .. })
        ));
        conn.execute_update("INSERT INTO items VALUES (1, 'a')")
            .await
            .unwrap();
        conn.rollback().await.unwrap();
        assert!(conn.auto_commit());
        assert_eq!(count(&mut conn).await, 0);

        conn.begin().await.unwrap();
        conn.execute_update("INSERT INTO items VALUES (2, 'b')")
            .await
            .unwrap();
        conn.commit().await.unwrap();
        assert!(conn.auto_commit());
        assert_eq!(count(&mut conn).await, 1);
    }

    #[tokio::test]
    async fn test_commit_without_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let handle = sqlite_handle(&dir).await;
        let mut conn = handle.get_connection(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(
            conn.commit().await,
            Err(DbError::Transaction { .. })
        ));
        assert!(matches!(
            conn.rollback().await,
            Err(DbError::Transaction { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_rolls_back_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let handle = sqlite_handle(&dir).await;
        let mut conn = handle.get_connection(Duration::from_secs(1)).await.unwrap();

        conn.begin().await.unwrap();
        conn.execute_update("INSERT INTO items VALUES (3, 'c')")
            .await
            .unwrap();
        conn.close().await.unwrap();
        assert!(conn.is_closed());
        assert!(conn.auto_commit());
        conn.close().await.unwrap();

        let err = conn.execute_query("SELECT 1").await.unwrap_err();
        assert!(matches!(err, DbError::ConnectionUnavailable { .. }));

        let mut conn = handle.get_connection(Duration::from_secs(1)).await.unwrap();
        assert_eq!(count(&mut conn).await, 0);
    }
}
