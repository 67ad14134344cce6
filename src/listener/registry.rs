use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;
use tracing::trace;

use crate::metrics::ACTIVE_LISTENERS;
use crate::DmlEvent;
use crate::ListenError;

/// Capability shared by every listener the dispatcher holds.
pub trait EventListener: Send + Sync {
    /// Once true the listener is skipped and eventually purged.
    fn is_done(&self) -> bool;

    fn on_event(
        &self,
        message_id: Option<i64>,
        dml: &Arc<DmlEvent>,
    );

    /// No stream is left that could deliver events.
    fn on_failure(
        &self,
        _error: &ListenError,
    ) {
    }
}

/// Concurrent listener collection with snapshot dispatch.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<Arc<dyn EventListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events dispatched after this call returns reach `listener`.
    pub fn listen(
        &self,
        listener: Arc<dyn EventListener>,
    ) {
        let mut listeners = self.listeners.lock();
        listeners.push(listener);
        ACTIVE_LISTENERS.set(listeners.len() as i64);
    }

    /// Delivers one event to every listener that is not done yet.
    ///
    /// Runs over a snapshot so listeners may register or finish concurrently.
    /// A panicking listener is logged and does not affect the others.
    pub fn dispatch(
        &self,
        message_id: Option<i64>,
        dml: &Arc<DmlEvent>,
    ) {
        for listener in self.snapshot() {
            if listener.is_done() {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(message_id, dml))).is_err() {
                error!(?message_id, table = %dml.table_name, "listener panicked while handling event");
            }
        }
    }

    /// Fails every pending listener with `error`.
    pub fn fail_all(
        &self,
        error: &ListenError,
    ) {
        for listener in self.snapshot() {
            if listener.is_done() {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| listener.on_failure(error))).is_err() {
                error!("listener panicked while handling failure");
            }
        }
    }

    /// Drops finished listeners, returns how many were removed.
    pub fn purge_done(&self) -> usize {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !l.is_done());
        let removed = before - listeners.len();
        ACTIVE_LISTENERS.set(listeners.len() as i64);
        if removed > 0 {
            trace!(removed, remaining = listeners.len(), "purged finished listeners");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn EventListener>> {
        self.listeners.lock().clone()
    }
}
