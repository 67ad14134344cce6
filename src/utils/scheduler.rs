//! Shared timer service for row timeouts, discovery heartbeats and the
//! listener purge.
//!
//! Every scheduled task owns a child of the scheduler's shutdown token, so a
//! single [`Scheduler::shutdown`] stops all outstanding work while each
//! [`TimerHandle`] can still be cancelled on its own.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::Result;

#[derive(Clone, Debug)]
pub struct Scheduler {
    handle: Handle,
    shutdown: CancellationToken,
}

/// Cancels a scheduled task. Dropping the handle leaves the task running.
#[derive(Clone, Debug)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Scheduler {
    /// Binds the scheduler to the current tokio runtime.
    ///
    /// # Panics
    /// Outside of a tokio runtime context.
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            shutdown: CancellationToken::new(),
        }
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Runs `task` once after `delay` unless cancelled first.
    pub fn schedule<F>(
        &self,
        delay: Duration,
        task: F,
    ) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let token = self.shutdown.child_token();
        let guard = token.clone();
        self.handle.spawn(async move {
            tokio::select! {
                biased;
                _ = guard.cancelled() => {}
                _ = sleep(delay) => task(),
            }
        });
        TimerHandle { token }
    }

    /// Runs `task` after `initial_delay`, then again `period` after each run
    /// completes. A failed run is logged and does not stop the schedule.
    pub fn schedule_with_fixed_delay<F, Fut>(
        &self,
        name: &str,
        initial_delay: Duration,
        period: Duration,
        mut task: F,
    ) -> TimerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let token = self.shutdown.child_token();
        let guard = token.clone();
        let name = name.to_string();
        self.handle.spawn(async move {
            let mut delay = initial_delay;
            loop {
                tokio::select! {
                    biased;
                    _ = guard.cancelled() => break,
                    _ = sleep(delay) => {}
                }
                if let Err(e) = task().await {
                    warn!(task = %name, "periodic task failed: {:?}", e);
                }
                delay = period;
            }
            debug!(task = %name, "periodic task stopped");
        });
        TimerHandle { token }
    }

    /// Cancels every task scheduled so far and any scheduled afterwards.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
