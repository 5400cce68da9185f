//! Transaction control for a session.

use super::Session;
use crate::db::executor::StatementExecutor;
use crate::error::{DbError, DbResult};
use serde::Serialize;
use tracing::{debug, info};

/// How [`Session::end`] finished the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionOutcome {
    Committed,
    RolledBack,
}

impl<C: StatementExecutor> Session<C> {
    /// True between a successful `begin` and the matching `end`.
    pub fn in_transaction(&self) -> bool {
        !self.conn.auto_commit()
    }

    /// Switch the session's connection to manual-commit mode.
    pub async fn begin(&mut self) -> DbResult<()> {
        if self.conn.is_closed() {
            return Err(DbError::connection_unavailable(
                "Session connection is closed",
                "Open a new session",
            ));
        }
        if self.in_transaction() {
            return Err(DbError::transaction("A transaction is already pending"));
        }
        self.conn.begin().await?;
        debug!(session_id = %self.id, "Transaction started");
        Ok(())
    }

    /// Finish the pending transaction.
    ///
    /// Commits when `error` is `None`, rolls back otherwise. Auto-commit mode is
    /// restored on every path, including a failed commit.
    pub async fn end(&mut self, error: Option<&DbError>) -> DbResult<TransactionOutcome> {
        if !self.in_transaction() {
            return Err(DbError::transaction("No transaction is pending"));
        }

        match error {
            Some(cause) => {
                info!(session_id = %self.id, cause = %cause, "Rolling back transaction");
                self.conn.rollback().await?;
                Ok(TransactionOutcome::RolledBack)
            }
            None => {
                self.conn.commit().await?;
                debug!(session_id = %self.id, "Transaction committed");
                Ok(TransactionOutcome::Committed)
            }
        }
    }
}
