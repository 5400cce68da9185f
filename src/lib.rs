//! sqlsession library
//!
//! Pooled SQL sessions for PostgreSQL, MySQL and SQLite: a registry that owns one
//! connection pool per database identity, sessions that classify and route
//! statements over a borrowed connection, and explicit transaction control.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod session;

pub use config::{Config, PoolConfig, PoolOptions};
pub use db::{PoolRegistry, StatementExecutor};
pub use error::{DbError, DbResult};
pub use session::{Session, SessionListeners, TransactionOutcome, completion};
