//! Pool registry.
//!
//! [`PoolRegistry`] owns at most one [`PoolHandle`] per [`DatabaseIdentity`].
//! Pools are created lazily on first use, removed when acquisition from them
//! fails, and closed together on [`PoolRegistry::shutdown`].
//!
//! # Concurrency
//!
//! - The map lock is never held across pool construction or pool close.
//! - Two callers racing to create the same pool both build one; the first to
//!   store wins and the other closes its copy and returns the stored pool.
//! - Invalidation only removes the exact pool that failed, never a replacement
//!   created in the meantime.

use crate::config::PoolConfig;
use crate::db::connection::PooledConnection;
use crate::db::pool::PoolHandle;
use crate::error::{DbError, DbResult};
use crate::models::DatabaseIdentity;
use crate::session::{Session, SessionListeners};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Callback invoked with registry-level failures (pool construction, acquisition).
pub type ErrorListener = Arc<dyn Fn(&DbError) + Send + Sync>;

#[derive(Clone, Default)]
pub struct PoolRegistry {
    pools: Arc<RwLock<HashMap<DatabaseIdentity, Arc<PoolHandle>>>>,
    /// Pools closed on shutdown. Uses std Mutex; never held across an await.
    cleanup: Arc<Mutex<Vec<Arc<PoolHandle>>>>,
    error_listeners: Arc<Mutex<Vec<ErrorListener>>>,
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("cleanup_registered", &self.cleanup_count())
            .finish_non_exhaustive()
    }
}

impl PoolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error listener (builder form).
    pub fn with_error_listener<F>(self, listener: F) -> Self
    where
        F: Fn(&DbError) + Send + Sync + 'static,
    {
        self.on_error(listener);
        self
    }

    /// Add an error listener.
    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&DbError) + Send + Sync + 'static,
    {
        self.error_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(listener));
    }

    fn emit_error(&self, err: &DbError) {
        let listeners = self
            .error_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in &listeners {
            listener(err);
        }
    }

    /// Get the pool for the configuration's identity, creating it on first use.
    pub async fn get_or_create(&self, config: &PoolConfig) -> DbResult<Arc<PoolHandle>> {
        let identity = config.identity();

        // Early check for existing pool
        if let Some(handle) = self.get(&identity).await {
            return Ok(handle);
        }

        let handle = match PoolHandle::connect(config).await {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                self.emit_error(&e);
                return Err(e);
            }
        };

        // Re-check after async work to prevent TOCTOU race
        // If duplicate detected, close ours outside the lock
        let (stored, duplicate) = {
            let mut pools = self.pools.write().await;
            match pools.get(&identity) {
                Some(existing) => (Arc::clone(existing), Some(handle)),
                None => {
                    pools.insert(identity.clone(), Arc::clone(&handle));
                    (handle, None)
                }
            }
        }; // Lock released here

        if let Some(duplicate) = duplicate {
            debug!(identity = %identity, "Pool created concurrently, closing duplicate");
            duplicate.close().await;
            return Ok(stored);
        }

        if stored.register_shutdown_cleanup() {
            self.cleanup
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(Arc::clone(&stored));
        }
        info!(identity = %identity, "Registered connection pool");
        Ok(stored)
    }

    /// Borrow a connection from the identity's pool, waiting at most `timeout`.
    ///
    /// On acquisition failure the pool is invalidated so the next
    /// `get_or_create` builds a fresh one.
    pub async fn acquire(
        &self,
        identity: &DatabaseIdentity,
        timeout: Duration,
    ) -> DbResult<PooledConnection> {
        let Some(handle) = self.get(identity).await else {
            let err = DbError::pool_not_initialized(identity.to_string());
            self.emit_error(&err);
            return Err(err);
        };

        match handle.get_connection(timeout).await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                warn!(identity = %identity, error = %e, "Connection acquisition failed");
                self.invalidate_handle(&handle).await;
                self.emit_error(&e);
                Err(e)
            }
        }
    }

    /// Get or create the pool, borrow a connection with the pool's configured
    /// timeout and bind a session to it.
    pub async fn session(
        &self,
        config: &PoolConfig,
        listeners: Option<SessionListeners>,
    ) -> DbResult<Session> {
        let handle = self.get_or_create(config).await?;
        let conn = self
            .acquire(handle.identity(), handle.default_timeout())
            .await?;
        Ok(Session::with_listeners(conn, listeners.unwrap_or_default()))
    }

    /// Get the pool for an identity, if one exists.
    pub async fn get(&self, identity: &DatabaseIdentity) -> Option<Arc<PoolHandle>> {
        let pools = self.pools.read().await;
        pools.get(identity).cloned()
    }

    /// Check if a pool exists for the identity.
    pub async fn contains(&self, identity: &DatabaseIdentity) -> bool {
        let pools = self.pools.read().await;
        pools.contains_key(identity)
    }

    /// Get the number of live pools.
    pub async fn pool_count(&self) -> usize {
        let pools = self.pools.read().await;
        pools.len()
    }

    /// List the identities that currently have a pool.
    pub async fn identities(&self) -> Vec<DatabaseIdentity> {
        let pools = self.pools.read().await;
        pools.keys().cloned().collect()
    }

    /// Number of pools registered for shutdown cleanup.
    pub fn cleanup_count(&self) -> usize {
        self.cleanup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Remove the identity's pool and close it in the background.
    /// Returns false if there was no pool.
    pub async fn invalidate(&self, identity: &DatabaseIdentity) -> bool {
        let removed = {
            let mut pools = self.pools.write().await;
            pools.remove(identity)
        };
        match removed {
            Some(handle) => {
                self.retire(handle);
                true
            }
            None => false,
        }
    }

    /// Remove `handle` only if it is still the stored pool for its identity.
    async fn invalidate_handle(&self, handle: &Arc<PoolHandle>) {
        let removed = {
            let mut pools = self.pools.write().await;
            match pools.get(handle.identity()) {
                Some(stored) if Arc::ptr_eq(stored, handle) => pools.remove(handle.identity()),
                _ => None,
            }
        };
        if let Some(handle) = removed {
            self.retire(handle);
        }
    }

    fn retire(&self, handle: Arc<PoolHandle>) {
        self.cleanup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|h| !Arc::ptr_eq(h, &handle));
        info!(identity = %handle.identity(), "Invalidated connection pool");
        // Borrowed connections may still be out; don't wait for them here
        tokio::spawn(async move {
            handle.close().await;
        });
    }

    /// Close every registered pool and clear the registry.
    pub async fn shutdown(&self) {
        {
            let mut pools = self.pools.write().await;
            pools.clear();
        }
        let handles: Vec<Arc<PoolHandle>> = std::mem::take(
            &mut *self.cleanup.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for handle in handles {
            handle.close().await;
        }
        info!("All connection pools closed");
    }
}
