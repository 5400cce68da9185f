//! Statement execution.
//!
//! This module defines the contract a session drives ([`StatementExecutor`]) and the
//! backend-specific statement runners used by the pooled connection adapter.
//!
//! # Architecture
//!
//! The runners are organized in submodules:
//! - `mysql`: MySQL-specific fetch and execute operations
//! - `postgres`: PostgreSQL-specific fetch and execute operations
//! - `sqlite`: SQLite-specific fetch and execute operations
//!
//! Each submodule provides identical functionality adapted to the database's type
//! system. Without parameters the SQL is sent as-is through the simple query path;
//! with parameters (even an empty list) it is prepared and bound.

use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, Row};
use futures_util::TryStreamExt;
use std::future::Future;

/// Operations a session needs from the connection it is bound to.
///
/// Parameter and row payloads are JSON documents: parameters as an array of
/// values, rows as an array of objects keyed by column name.
pub trait StatementExecutor: Send {
    /// Run a read without parameters and return the row payload.
    fn execute_query(&mut self, sql: &str) -> impl Future<Output = DbResult<String>> + Send;

    /// Run a read as a prepared statement and return the row payload.
    fn execute_prepared_query(
        &mut self,
        sql: &str,
        params: &str,
    ) -> impl Future<Output = DbResult<String>> + Send;

    /// Run a mutation without parameters and return the affected-row count.
    fn execute_update(&mut self, sql: &str) -> impl Future<Output = DbResult<u64>> + Send;

    /// Run a mutation as a prepared statement and return the affected-row count.
    fn execute_prepared_update(
        &mut self,
        sql: &str,
        params: &str,
    ) -> impl Future<Output = DbResult<u64>> + Send;

    /// Switch to manual-commit mode.
    fn begin(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Commit the pending transaction and return to auto-commit mode.
    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Roll back the pending transaction and return to auto-commit mode.
    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn auto_commit(&self) -> bool;

    fn is_closed(&self) -> bool;

    /// Release the connection. Closing twice is a no-op.
    fn close(&mut self) -> impl Future<Output = DbResult<()>> + Send;
}

// =============================================================================
// Common Helper Functions
// =============================================================================

/// Convert fetched rows into JSON rows, failing on the first undecodable value.
pub(crate) fn rows_to_json<R: RowToJson>(rows: &[R]) -> DbResult<Vec<Row>> {
    rows.iter().map(RowToJson::to_json_map).collect()
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

pub(crate) mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use sqlx::mysql::{MySqlConnection, MySqlRow};
    use sqlx::Executor;

    pub async fn fetch_rows(
        conn: &mut MySqlConnection,
        sql: &str,
        params: Option<&[QueryParam]>,
    ) -> DbResult<Vec<MySqlRow>> {
        match params {
            None => (&mut *conn).fetch(sql).try_collect::<Vec<_>>().await,
            Some(params) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql_param(query, param);
                }
                query.fetch(&mut *conn).try_collect::<Vec<_>>().await
            }
        }
        .map_err(DbError::from)
    }

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        params: Option<&[QueryParam]>,
    ) -> DbResult<u64> {
        // Raw SQL when unparameterized (some statements, e.g. CREATE PROCEDURE,
        // cannot be prepared)
        let result = match params {
            None => (&mut *conn).execute(sql).await,
            Some(params) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_mysql_param(query, param);
                }
                query.execute(&mut *conn).await
            }
        };
        result.map(|r| r.rows_affected()).map_err(DbError::from)
    }
}

pub(crate) mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use sqlx::postgres::{PgConnection, PgRow};
    use sqlx::Executor;

    pub async fn fetch_rows(
        conn: &mut PgConnection,
        sql: &str,
        params: Option<&[QueryParam]>,
    ) -> DbResult<Vec<PgRow>> {
        match params {
            None => (&mut *conn).fetch(sql).try_collect::<Vec<_>>().await,
            Some(params) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_postgres_param(query, param);
                }
                query.fetch(&mut *conn).try_collect::<Vec<_>>().await
            }
        }
        .map_err(DbError::from)
    }

    pub async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        params: Option<&[QueryParam]>,
    ) -> DbResult<u64> {
        let result = match params {
            None => (&mut *conn).execute(sql).await,
            Some(params) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_postgres_param(query, param);
                }
                query.execute(&mut *conn).await
            }
        };
        result.map(|r| r.rows_affected()).map_err(DbError::from)
    }
}

pub(crate) mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::sqlite::{SqliteConnection, SqliteRow};
    use sqlx::Executor;

    pub async fn fetch_rows(
        conn: &mut SqliteConnection,
        sql: &str,
        params: Option<&[QueryParam]>,
    ) -> DbResult<Vec<SqliteRow>> {
        match params {
            None => (&mut *conn).fetch(sql).try_collect::<Vec<_>>().await,
            Some(params) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite_param(query, param);
                }
                query.fetch(&mut *conn).try_collect::<Vec<_>>().await
            }
        }
        .map_err(DbError::from)
    }

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        params: Option<&[QueryParam]>,
    ) -> DbResult<u64> {
        let result = match params {
            None => (&mut *conn).execute(sql).await,
            Some(params) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = bind_sqlite_param(query, param);
                }
                query.execute(&mut *conn).await
            }
        };
        result.map(|r| r.rows_affected()).map_err(DbError::from)
    }
}
