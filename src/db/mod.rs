//! Database layer.
//!
//! - Database dispatch macros for reducing code duplication
//! - Driver registration
//! - Per-identity connection pools and the registry that owns them
//! - The pooled connection adapter sessions execute through
//! - Parameter binding and row conversion

#[macro_use]
pub mod macros;
pub mod connection;
pub mod driver;
pub mod executor;
pub mod params;
pub mod pool;
pub mod registry;
pub mod types;

pub use connection::{DbConnection, PooledConnection};
pub use driver::{is_registered, register_driver};
pub use executor::StatementExecutor;
pub use pool::{DbPool, PoolHandle};
pub use registry::PoolRegistry;
