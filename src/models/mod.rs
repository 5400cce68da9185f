//! Data models for the session facade.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{DatabaseIdentity, DatabaseType};
pub use query::{QueryParam, Row, StatementKind, StatementOutput, classify};
