use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::utils::TimerHandle;
use crate::DmlEvent;
use crate::ListenError;

pub type ListenResult = std::result::Result<ListenResponse, ListenError>;

/// Rows collected by a resolved listener.
#[derive(Debug, Clone)]
pub struct ListenResponse {
    hit_list: Vec<Arc<DmlEvent>>,
    start: Instant,
    end: Instant,
}

impl ListenResponse {
    pub(crate) fn new(
        hit_list: Vec<Arc<DmlEvent>>,
        start: Instant,
        end: Instant,
    ) -> Self {
        Self { hit_list, start, end }
    }

    pub(crate) fn empty(at: Instant) -> Self {
        Self::new(Vec::new(), at, at)
    }

    pub fn hit_list(&self) -> &[Arc<DmlEvent>] {
        &self.hit_list
    }

    pub fn into_hit_list(self) -> Vec<Arc<DmlEvent>> {
        self.hit_list
    }

    /// When the earliest contributing listener was registered
    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn end(&self) -> Instant {
        self.end
    }

    /// Elapsed time from registration to completion
    pub fn cost(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }
}

/// Single-writer-wins result slot.
///
/// Matching and the timeout timer race to [`CompletionSlot::complete`]; the
/// compare-and-set on `done` picks one winner and the winner cancels the timer.
pub(crate) struct CompletionSlot {
    done: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<ListenResult>>>,
    timer: Mutex<Option<TimerHandle>>,
}

impl CompletionSlot {
    pub(crate) fn new() -> (Arc<Self>, ListenFuture) {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Self {
            done: AtomicBool::new(false),
            sender: Mutex::new(Some(tx)),
            timer: Mutex::new(None),
        });
        (slot, ListenFuture { rx })
    }

    /// Attaches the timeout timer. Cancelled right away if already completed.
    pub(crate) fn arm_timer(
        &self,
        timer: TimerHandle,
    ) {
        *self.timer.lock() = Some(timer);
        if self.is_completed() {
            self.cancel_timer();
        }
    }

    /// Returns false when another writer already completed the slot.
    pub(crate) fn complete(
        &self,
        result: ListenResult,
    ) -> bool {
        if self
            .done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.cancel_timer();
        if let Some(tx) = self.sender.lock().take() {
            // Receiver gone means nobody is waiting any more.
            let _ = tx.send(result);
        }
        true
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Completed, or the caller dropped its future.
    pub(crate) fn is_finished(&self) -> bool {
        if self.is_completed() {
            return true;
        }
        match self.sender.lock().as_ref() {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.cancel();
        }
    }
}

/// Resolves once with the listener's outcome.
#[must_use = "futures do nothing unless awaited"]
pub struct ListenFuture {
    rx: oneshot::Receiver<ListenResult>,
}

impl ListenFuture {
    /// Future that is already resolved with `result`.
    pub(crate) fn ready(result: ListenResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for ListenFuture {
    type Output = ListenResult;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ListenError::Cancelled)))
    }
}
