//! Backend dispatch macro.
//!
//! Pools and pooled connections are both enums with one variant per backend
//! (`MySql`, `Postgres`, `SQLite`). This macro generates the match so each
//! call site reads as three parallel arms.

/// Macro for generating backend dispatch match arms.
///
/// The first argument names the enum (which must be in scope), the second is the
/// value to match on.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(DbPool, &self.pool, {
///     MySql(p) => p.size(),
///     Postgres(p) => p.size(),
///     SQLite(p) => p.size(),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($enum:ident, $value:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $enum::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
