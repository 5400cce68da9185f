//! Session lifecycle listeners.

use crate::error::{DbError, DbResult};
use crate::models::StatementOutput;
use std::sync::Arc;

pub type StartListener = Arc<dyn Fn(&str) + Send + Sync>;
pub type FinishListener = Arc<dyn Fn(&DbResult<StatementOutput>) + Send + Sync>;
pub type ErrorListener = Arc<dyn Fn(&DbError) + Send + Sync>;
pub type CloseListener = Arc<dyn Fn() + Send + Sync>;

/// Observers of a session's lifecycle.
///
/// - `start(sql)`: before a statement is dispatched
/// - `finish(result)`: after a statement completed, successfully or not, and
///   before its completion callback runs
/// - `error(err)`: failures that have no callback to go to
/// - `close()`: after the session released its connection
///
/// Any number of listeners can be registered per event.
#[derive(Clone, Default)]
pub struct SessionListeners {
    start: Vec<StartListener>,
    finish: Vec<FinishListener>,
    error: Vec<ErrorListener>,
    close: Vec<CloseListener>,
}

impl SessionListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start<F>(mut self, listener: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.start.push(Arc::new(listener));
        self
    }

    pub fn on_finish<F>(mut self, listener: F) -> Self
    where
        F: Fn(&DbResult<StatementOutput>) + Send + Sync + 'static,
    {
        self.finish.push(Arc::new(listener));
        self
    }

    pub fn on_error<F>(mut self, listener: F) -> Self
    where
        F: Fn(&DbError) + Send + Sync + 'static,
    {
        self.error.push(Arc::new(listener));
        self
    }

    pub fn on_close<F>(mut self, listener: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.close.push(Arc::new(listener));
        self
    }

    /// Append all of `other`'s listeners.
    pub fn extend(&mut self, other: SessionListeners) {
        self.start.extend(other.start);
        self.finish.extend(other.finish);
        self.error.extend(other.error);
        self.close.extend(other.close);
    }

    /// Total number of registered listeners across all events.
    pub fn len(&self) -> usize {
        self.start.len() + self.finish.len() + self.error.len() + self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn emit_start(&self, sql: &str) {
        for listener in &self.start {
            listener(sql);
        }
    }

    pub(crate) fn emit_finish(&self, result: &DbResult<StatementOutput>) {
        for listener in &self.finish {
            listener(result);
        }
    }

    pub(crate) fn emit_error(&self, err: &DbError) {
        for listener in &self.error {
            listener(err);
        }
    }

    pub(crate) fn emit_close(&self) {
        for listener in &self.close {
            listener();
        }
    }
}

impl std::fmt::Debug for SessionListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionListeners")
            .field("start", &self.start.len())
            .field("finish", &self.finish.len())
            .field("error", &self.error.len())
            .field("close", &self.close.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_listeners_fire_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&log), Arc::clone(&log));
        let listeners = SessionListeners::new()
            .on_start(move |sql| a.lock().unwrap().push(format!("first:{sql}")))
            .on_start(move |sql| b.lock().unwrap().push(format!("second:{sql}")));

        listeners.emit_start("select 1");
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:select 1".to_string(), "second:select 1".to_string()]
        );
    }

    #[test]
    fn test_no_listener_ceiling() {
        let mut listeners = SessionListeners::new();
        for _ in 0..100 {
            listeners.extend(SessionListeners::new().on_close(|| {}));
        }
        assert_eq!(listeners.len(), 100);
    }

    #[test]
    fn test_extend_merges_every_event() {
        let mut listeners = SessionListeners::new().on_start(|_| {});
        assert!(!listeners.is_empty());
        listeners.extend(
            SessionListeners::new()
                .on_finish(|_| {})
                .on_error(|_| {})
                .on_close(|| {}),
        );
        assert_eq!(listeners.len(), 4);
        assert_eq!(
            format!("{:?}", listeners),
            "SessionListeners { start: 1, finish: 1, error: 1, close: 1 }"
        );
    }
}
