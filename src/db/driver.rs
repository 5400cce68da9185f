//! Process-wide driver registration.
//!
//! Registering a backend installs sqlx's runtime drivers (the `Any` driver
//! table) once per process and records the backend as registered. Registration
//! is idempotent and safe to call from concurrent tasks.

use crate::models::DatabaseType;
use std::collections::HashSet;
use std::sync::{Mutex, Once};
use tracing::{debug, info};

static INSTALL_DRIVERS: Once = Once::new();

static REGISTERED: Mutex<Option<HashSet<DatabaseType>>> = Mutex::new(None);

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
        debug!("Installed sqlx runtime drivers");
    });
}

/// Register the driver for `db_type`. Returns true only for the first call.
pub fn register_driver(db_type: DatabaseType) -> bool {
    install_drivers();
    let mut registered = REGISTERED.lock().unwrap_or_else(|e| e.into_inner());
    let first = registered.get_or_insert_with(HashSet::new).insert(db_type);
    if first {
        info!(db_type = %db_type, "Registered database driver");
    }
    first
}

/// Whether the driver for `db_type` has been registered.
pub fn is_registered(db_type: DatabaseType) -> bool {
    REGISTERED
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .as_ref()
        .is_some_and(|set| set.contains(&db_type))
}
