use std::mem;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::completion::CompletionSlot;
use super::EventListener;
use super::ListenFuture;
use super::ListenResponse;
use super::RowFilter;
use crate::metrics::LISTEN_COST_MS;
use crate::utils::Scheduler;
use crate::DmlEvent;
use crate::ListenError;

/// Waits for `row_count` events accepted by its filter.
pub struct RowListener {
    filter: Box<dyn RowFilter>,
    row_count: usize,
    start: Instant,
    hits: Mutex<Vec<Arc<DmlEvent>>>,
    slot: Arc<CompletionSlot>,
}

impl RowListener {
    /// Creates the listener and arms its timeout; a zero `timeout` waits
    /// forever and a zero `row_count` resolves immediately.
    pub(crate) fn new(
        filter: Box<dyn RowFilter>,
        row_count: usize,
        timeout: Duration,
        scheduler: &Scheduler,
    ) -> (Arc<Self>, ListenFuture) {
        let (slot, future) = CompletionSlot::new();
        let start = Instant::now();
        let listener = Arc::new(Self {
            filter,
            row_count,
            start,
            hits: Mutex::new(Vec::with_capacity(row_count)),
            slot,
        });

        if row_count == 0 {
            listener.slot.complete(Ok(ListenResponse::empty(start)));
        } else if !timeout.is_zero() {
            let slot = listener.slot.clone();
            let timer = scheduler.schedule(timeout, move || {
                if slot.complete(Err(ListenError::Timeout(timeout))) {
                    debug!(?timeout, "row listener timed out");
                }
            });
            listener.slot.arm_timer(timer);
        }
        (listener, future)
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    /// Resolves with whatever was collected so far.
    pub(crate) fn resolve_now(&self) -> bool {
        let mut hits = self.hits.lock();
        let hit_list = mem::take(&mut *hits);
        self.slot.complete(Ok(ListenResponse::new(hit_list, self.start, Instant::now())))
    }
}

impl EventListener for RowListener {
    fn is_done(&self) -> bool {
        self.slot.is_finished()
    }

    fn on_event(
        &self,
        message_id: Option<i64>,
        dml: &Arc<DmlEvent>,
    ) {
        if self.slot.is_completed() || !self.filter.test(message_id, dml) {
            return;
        }
        let mut hits = self.hits.lock();
        if self.slot.is_completed() {
            return;
        }
        hits.push(dml.clone());
        if hits.len() >= self.row_count {
            let response = ListenResponse::new(mem::take(&mut *hits), self.start, Instant::now());
            let cost = response.cost();
            if self.slot.complete(Ok(response)) {
                LISTEN_COST_MS.observe(cost.as_secs_f64() * 1000.0);
            }
        }
    }

    fn on_failure(
        &self,
        error: &ListenError,
    ) {
        self.slot.complete(Err(error.clone()));
    }
}
