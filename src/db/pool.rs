//! Connection pool management.
//!
//! This module provides connection pooling using database-specific pools
//! (MySqlPool, PgPool, SqlitePool) to ensure full type support. A [`PoolHandle`]
//! owns one pool for one database identity and hands out [`PooledConnection`]s.

use crate::config::{MAX_ACQUIRE_TIMEOUT_MS, PoolConfig, PoolOptions};
use crate::db::connection::{DbConnection, PooledConnection};
use crate::db::driver::register_driver;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseIdentity, DatabaseType};
use sqlx::{
    Database, Executor, MySqlPool, PgPool, SqlitePool, mysql::MySqlConnectOptions,
    postgres::PgConnectOptions, sqlite::SqliteConnectOptions,
};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(DbPool, self, {
            MySql(pool) => pool.close().await,
            Postgres(pool) => pool.close().await,
            SQLite(pool) => pool.close().await,
        })
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Open connections, idle or in use.
    pub fn size(&self) -> u32 {
        impl_db_dispatch!(DbPool, self, {
            MySql(pool) => pool.size(),
            Postgres(pool) => pool.size(),
            SQLite(pool) => pool.size(),
        })
    }

    pub fn num_idle(&self) -> usize {
        impl_db_dispatch!(DbPool, self, {
            MySql(pool) => pool.num_idle(),
            Postgres(pool) => pool.num_idle(),
            SQLite(pool) => pool.num_idle(),
        })
    }

    pub fn is_closed(&self) -> bool {
        impl_db_dispatch!(DbPool, self, {
            MySql(pool) => pool.is_closed(),
            Postgres(pool) => pool.is_closed(),
            SQLite(pool) => pool.is_closed(),
        })
    }

    async fn acquire(&self) -> Result<DbConnection, sqlx::Error> {
        Ok(impl_db_dispatch!(DbPool, self, {
            MySql(pool) => DbConnection::MySql(pool.acquire().await?),
            Postgres(pool) => DbConnection::Postgres(pool.acquire().await?),
            SQLite(pool) => DbConnection::SQLite(pool.acquire().await?),
        }))
    }
}

/// The pool for one database identity.
#[derive(Debug)]
pub struct PoolHandle {
    identity: DatabaseIdentity,
    pool: DbPool,
    /// Acquisition timeout used when the caller doesn't pass one.
    default_timeout: Duration,
    cleanup_registered: AtomicBool,
}

impl PoolHandle {
    /// Build the pool for `config`.
    ///
    /// Construction (including the first connection) is bounded by the configured
    /// `timeout`. Any failure, invalid options included, is reported as
    /// `PoolInitialization`.
    pub async fn connect(config: &PoolConfig) -> DbResult<Self> {
        let identity = config.identity();
        if let Err(e) = config.validate() {
            warn!(identity = %identity, error = %e, "Rejected pool configuration");
            let detail = match e {
                DbError::InvalidConfig { message } => message,
                other => other.to_string(),
            };
            return Err(DbError::pool_initialization(
                identity.to_string(),
                "Invalid pool configuration",
                format!("Fix the configuration: {}", detail),
            ));
        }
        register_driver(config.db_type);

        let timeout = config.pool_options.timeout_or_default();
        info!(
            identity = %identity,
            url = %config.masked_url(),
            min = config.pool_options.minpool_or_default(),
            max = config.pool_options.max_connections(config.db_type == DatabaseType::SQLite),
            "Creating connection pool"
        );

        let pool = match tokio::time::timeout(timeout, create_pool(config)).await {
            Ok(Ok(pool)) => pool,
            Ok(Err(e)) => {
                warn!(identity = %identity, error = %e, "Failed to create connection pool");
                let suggestion = match &e {
                    InitError::Sqlx(err) => connection_suggestion(config.db_type, err),
                    InitError::Config(err) => err
                        .suggestion()
                        .unwrap_or("Check the pool configuration")
                        .to_string(),
                };
                return Err(DbError::pool_initialization(
                    identity.to_string(),
                    e.to_string(),
                    suggestion,
                ));
            }
            Err(_) => {
                warn!(
                    identity = %identity,
                    timeout_ms = millis(timeout),
                    "Timed out creating connection pool"
                );
                return Err(DbError::pool_initialization(
                    identity.to_string(),
                    format!("Timed out after {}ms", timeout.as_millis()),
                    format!(
                        "Check that the {} server is reachable or raise the timeout",
                        config.db_type
                    ),
                ));
            }
        };

        info!(identity = %identity, "Connection pool ready");
        Ok(Self {
            identity,
            pool,
            default_timeout: timeout,
            cleanup_registered: AtomicBool::new(false),
        })
    }

    /// Borrow a connection, waiting at most `timeout`.
    ///
    /// The wait is capped at `MAX_ACQUIRE_TIMEOUT_MS`. An exhausted pool yields
    /// `AcquisitionTimeout`, never before `timeout` has elapsed.
    pub async fn get_connection(&self, timeout: Duration) -> DbResult<PooledConnection> {
        let timeout = timeout.min(Duration::from_millis(MAX_ACQUIRE_TIMEOUT_MS));
        let timeout_ms = millis(timeout);

        debug!(identity = %self.identity, timeout_ms, "Acquiring connection");
        match tokio::time::timeout(timeout, self.pool.acquire()).await {
            Ok(Ok(conn)) => Ok(PooledConnection::new(conn, self.identity.clone())),
            Ok(Err(sqlx::Error::PoolTimedOut)) | Err(_) => Err(DbError::acquisition_timeout(
                self.identity.to_string(),
                timeout_ms,
            )),
            Ok(Err(e)) => Err(DbError::connection_unavailable(
                format!("Failed to acquire connection for {}: {}", self.identity, e),
                connection_suggestion(self.identity.db_type, &e),
            )),
        }
    }

    /// Mark this pool as registered for shutdown cleanup.
    /// Returns true only the first time.
    pub fn register_shutdown_cleanup(&self) -> bool {
        !self.cleanup_registered.swap(true, Ordering::AcqRel)
    }

    pub fn identity(&self) -> &DatabaseIdentity {
        &self.identity
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn size(&self) -> u32 {
        self.pool.size()
    }

    pub fn num_idle(&self) -> usize {
        self.pool.num_idle()
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Close the pool, waiting for borrowed connections to come back.
    pub async fn close(&self) {
        if self.pool.is_closed() {
            return;
        }
        info!(identity = %self.identity, "Closing connection pool");
        self.pool.close().await;
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug)]
enum InitError {
    Sqlx(sqlx::Error),
    Config(DbError),
}

impl std::fmt::Display for InitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitError::Sqlx(e) => write!(f, "Failed to connect: {}", e),
            InitError::Config(e) => write!(f, "{}", e),
        }
    }
}

impl From<sqlx::Error> for InitError {
    fn from(err: sqlx::Error) -> Self {
        InitError::Sqlx(err)
    }
}

/// Shared sizing and validation settings for every backend.
fn pool_options<DB: Database>(opts: &PoolOptions, is_sqlite: bool) -> sqlx::pool::PoolOptions<DB>
where
    for<'c> &'c mut DB::Connection: Executor<'c, Database = DB>,
{
    let mut options = sqlx::pool::PoolOptions::<DB>::new()
        .min_connections(opts.minpool_or_default())
        .max_connections(opts.max_connections(is_sqlite))
        .acquire_timeout(Duration::from_millis(MAX_ACQUIRE_TIMEOUT_MS))
        .idle_timeout(Some(opts.idle_timeout_or_default()))
        .max_lifetime(opts.max_connection_age())
        .test_before_acquire(true);

    if let Some(query) = &opts.validation_query {
        let query: Arc<str> = Arc::from(query.as_str());
        let interval = opts.validation_interval_or_default();
        options = options.before_acquire(move |conn, meta| {
            let query = Arc::clone(&query);
            Box::pin(async move {
                if meta.idle_for < interval {
                    return Ok(true);
                }
                match conn.execute(&*query).await {
                    Ok(_) => Ok(true),
                    Err(e) => {
                        warn!(error = %e, "Validation query failed, discarding connection");
                        Ok(false)
                    }
                }
            })
        });
    }
    options
}

/// Create a connection pool for the given configuration.
async fn create_pool(config: &PoolConfig) -> Result<DbPool, InitError> {
    let url = config.connection_url().map_err(InitError::Config)?;
    let opts = &config.pool_options;

    match config.db_type {
        DatabaseType::MySQL => {
            let options = MySqlConnectOptions::from_str(&url)?.charset("utf8mb4");
            let pool = pool_options::<sqlx::MySql>(opts, false)
                .connect_with(options)
                .await?;
            Ok(DbPool::MySql(pool))
        }
        DatabaseType::PostgreSQL => {
            let options = PgConnectOptions::from_str(&url)?;
            let pool = pool_options::<sqlx::Postgres>(opts, false)
                .connect_with(options)
                .await?;
            Ok(DbPool::Postgres(pool))
        }
        DatabaseType::SQLite => {
            let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
            let pool = pool_options::<sqlx::Sqlite>(opts, true)
                .connect_with(options)
                .await?;
            Ok(DbPool::SQLite(pool))
        }
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the user and password".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match db_type {
        DatabaseType::PostgreSQL => "Verify host, port and database of the PostgreSQL server".to_string(),
        DatabaseType::MySQL => "Verify host, port and database of the MySQL server".to_string(),
        DatabaseType::SQLite => {
            "Verify the file path exists and is accessible".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::executor::StatementExecutor;

    fn temp_config(dir: &tempfile::TempDir) -> PoolConfig {
        let path = dir.path().join("pool.db");
        PoolConfig::sqlite(path.to_string_lossy())
    }

    #[tokio::test]
    async fn test_connect_sqlite_and_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let handle = PoolHandle::connect(&temp_config(&dir)).await.unwrap();
        assert_eq!(handle.identity().db_type, DatabaseType::SQLite);
        assert_eq!(handle.default_timeout(), Duration::from_millis(30_000));

        let conn = handle.get_connection(Duration::from_secs(1)).await.unwrap();
        assert!(conn.auto_commit());
        assert!(handle.size() >= 1);
        drop(conn);

        handle.close().await;
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_register_shutdown_cleanup_once() {
        let dir = tempfile::tempdir().unwrap();
        let handle = PoolHandle::connect(&temp_config(&dir)).await.unwrap();
        assert!(handle.register_shutdown_cleanup());
        assert!(!handle.register_shutdown_cleanup());
        handle.close().await;
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_options() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(&dir).with_pool_options(PoolOptions {
            maxpool: Some(0),
            ..PoolOptions::default()
        });
        let err = PoolHandle::connect(&config).await.unwrap_err();
        assert!(matches!(err, DbError::PoolInitialization { .. }));
        assert!(err.suggestion().unwrap().contains("maxpool"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_pool_initialization() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file
        let config = PoolConfig::sqlite(dir.path().to_string_lossy());
        let err = PoolHandle::connect(&config).await.unwrap_err();
        assert!(matches!(err, DbError::PoolInitialization { .. }));
        assert!(err.suggestion().is_some());
    }

    async fn count_validations(handle: &PoolHandle) -> i64 {
        let mut conn = handle.get_connection(Duration::from_secs(1)).await.unwrap();
        let payload = conn
            .execute_query("SELECT COUNT(*) AS n FROM validations")
            .await
            .unwrap();
        conn.close().await.unwrap();
        let rows = crate::db::params::decode_rows(&payload).unwrap();
        rows[0]["n"].as_i64().unwrap()
    }

    fn validating_config(dir: &tempfile::TempDir, interval_ms: u64) -> PoolConfig {
        temp_config(dir).with_pool_options(PoolOptions {
            validation_query: Some("INSERT INTO validations DEFAULT VALUES".to_string()),
            validation_interval_ms: Some(interval_ms),
            ..PoolOptions::default()
        })
    }

    async fn create_validations_table(handle: &PoolHandle) {
        let mut conn = handle.get_connection(Duration::from_secs(1)).await.unwrap();
        conn.execute_update("CREATE TABLE validations (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_validation_query_runs_on_idle_connections() {
        let dir = tempfile::tempdir().unwrap();
        let handle = PoolHandle::connect(&validating_config(&dir, 1)).await.unwrap();
        create_validations_table(&handle).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        // Borrowing the idle connection ran the validation insert
        assert!(count_validations(&handle).await >= 1);
        handle.close().await;
    }

    #[tokio::test]
    async fn test_validation_skipped_within_interval() {
        let dir = tempfile::tempdir().unwrap();
        let handle = PoolHandle::connect(&validating_config(&dir, 60_000))
            .await
            .unwrap();
        create_validations_table(&handle).await;

        assert_eq!(count_validations(&handle).await, 0);
        handle.close().await;
    }

    #[tokio::test]
    async fn test_failed_validation_replaces_connection() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(&dir).with_pool_options(PoolOptions {
            validation_query: Some("SELECT * FROM missing_table".to_string()),
            validation_interval_ms: Some(1),
            ..PoolOptions::default()
        });
        let handle = PoolHandle::connect(&config).await.unwrap();

        // Temp tables live and die with their physical connection
        let mut conn = handle.get_connection(Duration::from_secs(1)).await.unwrap();
        conn.execute_update("CREATE TEMP TABLE marker (x INTEGER)")
            .await
            .unwrap();
        conn.close().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut conn = handle.get_connection(Duration::from_secs(1)).await.unwrap();
        assert!(conn.execute_query("SELECT * FROM marker").await.is_err());
        conn.close().await.unwrap();
        handle.close().await;
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(250)), 250);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_connection_suggestion() {
        let err = sqlx::Error::Protocol("connection refused".to_string());
        assert!(connection_suggestion(DatabaseType::MySQL, &err).contains("MySQL"));
        let err = sqlx::Error::Protocol("something else".to_string());
        assert!(connection_suggestion(DatabaseType::SQLite, &err).contains("file path"));
    }
}
