use std::collections::HashSet;
use std::mem;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::completion::CompletionSlot;
use super::EventListener;
use super::ListenFuture;
use super::ListenResponse;
use super::RowFilter;
use super::RowListener;
use super::UniquePrimaryKey;
use super::UnionPrimaryKey;
use crate::utils::Scheduler;
use crate::DmlEvent;
use crate::Error;
use crate::ListenError;
use crate::Result;
use crate::RowKey;

/// Composes several row listeners into one future that resolves when all of
/// them have.
///
/// The builder starts collecting events the moment it is created. A listener
/// added later first replays what was collected, then receives live events,
/// so rows written while the builder is being filled are not missed.
///
/// ```ignore
/// let builder = client.new_row_future_builder(None, ["orders", "order_items"]);
/// builder
///     .add_primary_key(Some("orders"), 42, None)?
///     .add_primary_keys(Some("order_items"), [7, 8, 9], None)?;
/// let response = builder.build()?.await?;
/// ```
pub struct RowFutureBuilder {
    collector: Arc<Collector>,
    scheduler: Scheduler,
    row_timeout: Duration,
}

struct Collector {
    /// Lower-cased allow-set of buffered tables, `None` buffers everything
    tables: Option<HashSet<String>>,
    built: AtomicBool,
    state: Mutex<CollectorState>,
}

#[derive(Default)]
struct CollectorState {
    buffer: Vec<(Option<i64>, Arc<DmlEvent>)>,
    listeners: Vec<Arc<RowListener>>,
    futures: Vec<ListenFuture>,
    start: Option<Instant>,
}

impl RowFutureBuilder {
    /// The caller registers [`RowFutureBuilder::collector`] with the dispatcher.
    pub(crate) fn new<I, S>(
        scheduler: Scheduler,
        row_timeout: Duration,
        tables: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tables: HashSet<String> = tables.into_iter().map(|t| t.as_ref().to_lowercase()).collect();
        let collector = Collector {
            tables: (!tables.is_empty()).then_some(tables),
            built: AtomicBool::new(false),
            state: Mutex::new(CollectorState::default()),
        };
        Self {
            collector: Arc::new(collector),
            scheduler,
            row_timeout,
        }
    }

    pub(crate) fn collector(&self) -> Arc<dyn EventListener> {
        self.collector.clone()
    }

    pub fn row_timeout(&self) -> Duration {
        self.row_timeout
    }

    /// Waits for one row; `table_name` `None` matches any table.
    pub fn add_primary_key(
        &self,
        table_name: Option<&str>,
        id: impl Into<RowKey>,
        timeout: Option<Duration>,
    ) -> Result<&Self> {
        let filter = UniquePrimaryKey::new(table_name, id);
        let row_count = filter.row_count();
        self.add_listener(filter, row_count, timeout)
    }

    /// Waits for one matching event per distinct id, counted like
    /// [`crate::DtsClient::listen_rows`].
    pub fn add_primary_keys<I, K>(
        &self,
        table_name: Option<&str>,
        ids: I,
        timeout: Option<Duration>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = K>,
        K: Into<RowKey>,
    {
        let filter = UniquePrimaryKey::with_ids(table_name, ids);
        let row_count = filter.row_count();
        self.add_listener(filter, row_count, timeout)
    }

    pub fn add_union_primary_key<T, K>(
        &self,
        table_name: Option<&str>,
        id: T,
        timeout: Option<Duration>,
    ) -> Result<&Self>
    where
        T: IntoIterator<Item = K>,
        K: Into<RowKey>,
    {
        let filter = UnionPrimaryKey::with_ids(table_name, [id]);
        let row_count = filter.row_count();
        self.add_listener(filter, row_count, timeout)
    }

    pub fn add_union_primary_keys<I, T, K>(
        &self,
        table_name: Option<&str>,
        ids: I,
        timeout: Option<Duration>,
    ) -> Result<&Self>
    where
        I: IntoIterator<Item = T>,
        T: IntoIterator<Item = K>,
        K: Into<RowKey>,
    {
        let filter = UnionPrimaryKey::with_ids(table_name, ids);
        let row_count = filter.row_count();
        self.add_listener(filter, row_count, timeout)
    }

    /// Adds a row listener over an arbitrary filter.
    ///
    /// # Errors
    /// [`Error::IllegalState`] once [`RowFutureBuilder::build`] was called.
    pub fn add_listener(
        &self,
        filter: impl RowFilter + 'static,
        row_count: usize,
        timeout: Option<Duration>,
    ) -> Result<&Self> {
        let mut state = self.collector.state.lock();
        if self.collector.built.load(Ordering::Acquire) {
            return Err(Error::IllegalState("row listener added after build".to_string()));
        }

        let timeout = timeout.unwrap_or(self.row_timeout);
        let (listener, future) = RowListener::new(Box::new(filter), row_count, timeout, &self.scheduler);
        state.start.get_or_insert(listener.start());

        for (message_id, dml) in state.buffer.iter() {
            if listener.is_done() {
                break;
            }
            listener.on_event(*message_id, dml);
        }
        if listener.is_done() {
            debug!("row listener satisfied from buffered events");
        }

        state.listeners.push(listener);
        state.futures.push(future);
        Ok(self)
    }

    /// Finalizes the builder; events are no longer buffered afterwards.
    ///
    /// The aggregate resolves with the hit lists of all listeners in the order
    /// they were added, or fails with the first listener failure.
    ///
    /// # Errors
    /// [`Error::IllegalState`] when called twice.
    pub fn build(&self) -> Result<ListenFuture> {
        let (futures, start) = {
            let mut state = self.collector.state.lock();
            if self.collector.built.swap(true, Ordering::AcqRel) {
                return Err(Error::IllegalState("row future already built".to_string()));
            }
            state.buffer = Vec::new();
            (mem::take(&mut state.futures), state.start)
        };

        let Some(start) = start else {
            return Ok(ListenFuture::ready(Ok(ListenResponse::empty(Instant::now()))));
        };

        let (slot, aggregate) = CompletionSlot::new();
        self.scheduler.handle().spawn(async move {
            let result = try_join_all(futures).await.map(|responses| {
                let end = responses.iter().map(ListenResponse::end).max().unwrap_or(start);
                let hit_list = responses.into_iter().flat_map(ListenResponse::into_hit_list).collect();
                ListenResponse::new(hit_list, start, end)
            });
            slot.complete(result);
        });
        Ok(aggregate)
    }
}

/// An unbuilt builder releases its buffer and cancels its row listeners, so
/// the dispatcher can purge the collector.
impl Drop for RowFutureBuilder {
    fn drop(&mut self) {
        let listeners = {
            let mut state = self.collector.state.lock();
            if self.collector.built.swap(true, Ordering::AcqRel) {
                return;
            }
            state.buffer = Vec::new();
            state.futures.clear();
            mem::take(&mut state.listeners)
        };
        debug!(listeners = listeners.len(), "row future builder dropped before build");
        for listener in listeners {
            listener.on_failure(&ListenError::Cancelled);
        }
    }
}

impl Collector {
    fn buffers(
        &self,
        dml: &DmlEvent,
    ) -> bool {
        match &self.tables {
            Some(tables) => tables.contains(&dml.table_name.to_lowercase()),
            None => true,
        }
    }
}

impl EventListener for Collector {
    fn is_done(&self) -> bool {
        if !self.built.load(Ordering::Acquire) {
            return false;
        }
        self.state.lock().listeners.iter().all(|l| l.is_done())
    }

    fn on_event(
        &self,
        message_id: Option<i64>,
        dml: &Arc<DmlEvent>,
    ) {
        let mut state = self.state.lock();
        if !self.built.load(Ordering::Acquire) && self.buffers(dml) {
            state.buffer.push((message_id, dml.clone()));
        }
        for listener in state.listeners.iter() {
            if !listener.is_done() {
                listener.on_event(message_id, dml);
            }
        }
    }

    fn on_failure(
        &self,
        error: &ListenError,
    ) {
        let state = self.state.lock();
        for listener in state.listeners.iter() {
            listener.on_failure(error);
        }
    }
}
