use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ClientBuilder;
use crate::discovery::DiscoveryService;
use crate::metrics::LIVE_STREAMS;
use crate::stream::ServerInstanceClient;
use crate::utils::async_task::spawn_task;
use crate::EventListener;
use crate::ListenError;
use crate::ListenFuture;
use crate::ListenerRegistry;
use crate::Result;
use crate::RowFilter;
use crate::RowFutureBuilder;
use crate::RowKey;
use crate::RowListener;
use crate::Scheduler;
use crate::SdkConfig;
use crate::SdkInstance;
use crate::ServerChangeEvent;
use crate::ServerListener;
use crate::TimerHandle;
use crate::UniquePrimaryKey;
use crate::UnionPrimaryKey;

/// Waits for rows to appear in the change streams of every discovered server.
///
/// Cloning is cheap; clones share the same streams and listeners.
#[derive(Clone)]
pub struct DtsClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: SdkConfig,
    registry: Arc<ListenerRegistry>,
    scheduler: Scheduler,
    discovery: Arc<dyn DiscoveryService>,
    /// Streams being dumped, by client id
    streams: DashMap<u64, Arc<ServerInstanceClient>>,
    purge_timer: parking_lot::Mutex<Option<TimerHandle>>,
    shutdown: AtomicBool,
}

/// Starts a dump for every server discovery adds.
struct StreamStarter {
    inner: Weak<ClientInner>,
}

impl ServerListener for StreamStarter {
    fn on_change(
        &self,
        event: &ServerChangeEvent,
    ) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        for client in event.insert_list.iter() {
            inner.start_dump(client.clone());
        }
    }
}

impl ClientInner {
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn start_dump(
        self: &Arc<Self>,
        client: Arc<ServerInstanceClient>,
    ) {
        if self.is_shutdown() || client.is_closed() {
            return;
        }
        if self.streams.insert(client.id(), client.clone()).is_some() {
            return;
        }
        LIVE_STREAMS.set(self.streams.len() as i64);

        let inner = self.clone();
        spawn_task(self.scheduler.handle(), "stream-dump", async move {
            let registry = inner.registry.clone();
            let result = client
                .dump(
                    &inner.config.stream.event_type,
                    inner.config.stream.retry_policy(),
                    move |message_id, dml| registry.dispatch(message_id, &dml),
                )
                .await;

            inner.streams.remove(&client.id());
            LIVE_STREAMS.set(inner.streams.len() as i64);
            if let Err(e) = result {
                if inner.streams.is_empty() && !inner.is_shutdown() {
                    warn!(account = %client.account(), "last event stream failed, failing pending listeners");
                    inner.registry.fail_all(&ListenError::Transport(e.to_string()));
                }
                return Err(e.into());
            }
            Ok(())
        });
    }
}

impl DtsClient {
    pub fn builder(config: SdkConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Registers with discovery and starts one dump per known server.
    pub(crate) async fn start(
        config: SdkConfig,
        discovery: Arc<dyn DiscoveryService>,
        scheduler: Scheduler,
    ) -> Result<Self> {
        let inner = Arc::new(ClientInner {
            config,
            registry: Arc::new(ListenerRegistry::new()),
            scheduler,
            discovery,
            streams: DashMap::new(),
            purge_timer: parking_lot::Mutex::new(None),
            shutdown: AtomicBool::new(false),
        });

        inner.discovery.add_server_listener(Arc::new(StreamStarter {
            inner: Arc::downgrade(&inner),
        }));
        inner.discovery.register_sdk_instance().await?;
        for client in inner.discovery.server_list_ref().iter() {
            inner.start_dump(client.clone());
        }

        let interval = inner.config.listen.cleanup_interval();
        let registry = inner.registry.clone();
        let timer = inner
            .scheduler
            .schedule_with_fixed_delay("listener-cleanup", interval, interval, move || {
                let registry = registry.clone();
                async move {
                    registry.purge_done();
                    Ok(())
                }
            });
        *inner.purge_timer.lock() = Some(timer);

        info!(
            account = %inner.discovery.sdk_instance().account,
            streams = inner.streams.len(),
            "dts client started"
        );
        Ok(Self { inner })
    }

    /// Waits for one row of `table_name`.
    ///
    /// `timeout` defaults to `listen.default_row_timeout_ms`; a zero timeout
    /// waits until the row arrives or the client shuts down.
    pub fn listen_row(
        &self,
        table_name: &str,
        id: impl Into<RowKey>,
        timeout: Option<Duration>,
    ) -> ListenFuture {
        let filter = UniquePrimaryKey::new(Some(table_name), id);
        let row_count = filter.row_count();
        self.listen_filter(filter, row_count, timeout)
    }

    /// Waits for as many matching events as `ids` has distinct values.
    ///
    /// Events are counted, not rows: two changes of the same id count twice,
    /// so the response may resolve before every id was seen.
    pub fn listen_rows<I, K>(
        &self,
        table_name: &str,
        ids: I,
        timeout: Option<Duration>,
    ) -> ListenFuture
    where
        I: IntoIterator<Item = K>,
        K: Into<RowKey>,
    {
        let filter = UniquePrimaryKey::with_ids(Some(table_name), ids);
        let row_count = filter.row_count();
        self.listen_filter(filter, row_count, timeout)
    }

    /// Waits for one row identified by a composite primary key.
    pub fn listen_union_row<T, K>(
        &self,
        table_name: &str,
        id: T,
        timeout: Option<Duration>,
    ) -> ListenFuture
    where
        T: IntoIterator<Item = K>,
        K: Into<RowKey>,
    {
        let filter = UnionPrimaryKey::new(Some(table_name), id);
        let row_count = filter.row_count();
        self.listen_filter(filter, row_count, timeout)
    }

    pub fn listen_union_rows<I, T, K>(
        &self,
        table_name: &str,
        ids: I,
        timeout: Option<Duration>,
    ) -> ListenFuture
    where
        I: IntoIterator<Item = T>,
        T: IntoIterator<Item = K>,
        K: Into<RowKey>,
    {
        let filter = UnionPrimaryKey::with_ids(Some(table_name), ids);
        let row_count = filter.row_count();
        self.listen_filter(filter, row_count, timeout)
    }

    /// Waits until `filter` accepted `row_count` events.
    ///
    /// Resolves at once with an empty hit list when no stream is live.
    pub fn listen_filter(
        &self,
        filter: impl RowFilter + 'static,
        row_count: usize,
        timeout: Option<Duration>,
    ) -> ListenFuture {
        if self.inner.is_shutdown() {
            return ListenFuture::ready(Err(ListenError::Cancelled));
        }
        let timeout = timeout.unwrap_or(self.inner.config.listen.default_row_timeout());
        let (listener, future) = RowListener::new(Box::new(filter), row_count, timeout, &self.inner.scheduler);
        if self.live_connections() == 0 {
            debug!("no live event stream, resolving row listener empty");
            listener.resolve_now();
            return future;
        }
        self.inner.registry.listen(listener);
        future
    }

    /// Builder that starts buffering events of `tables` right away; no
    /// tables buffers every table.
    pub fn new_row_future_builder<I, S>(
        &self,
        timeout: Option<Duration>,
        tables: I,
    ) -> RowFutureBuilder
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let timeout = timeout.unwrap_or(self.inner.config.listen.default_row_timeout());
        let builder = RowFutureBuilder::new(self.inner.scheduler.clone(), timeout, tables);
        self.inner.registry.listen(builder.collector());
        builder
    }

    /// Taps every event until `listener` reports done.
    pub fn add_listener(
        &self,
        listener: Arc<dyn EventListener>,
    ) {
        self.inner.registry.listen(listener);
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn sdk_instance(&self) -> Arc<SdkInstance> {
        self.inner.discovery.sdk_instance()
    }

    /// Streams currently being dumped
    pub fn live_connections(&self) -> usize {
        self.inner.streams.len()
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &ListenerRegistry {
        &self.inner.registry
    }

    /// Closes every stream, withdraws from discovery and stops all timers.
    /// Pending listeners fail with [`ListenError::Cancelled`].
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(timer) = inner.purge_timer.lock().take() {
            timer.cancel();
        }

        let streams: Vec<Arc<ServerInstanceClient>> = inner.streams.iter().map(|e| e.value().clone()).collect();
        for client in streams.iter() {
            client.close();
        }
        for client in inner.discovery.server_list_ref().iter() {
            client.close();
        }
        inner.discovery.shutdown().await;
        inner.scheduler.shutdown();
        inner.registry.fail_all(&ListenError::Cancelled);
        inner.registry.purge_done();
        info!(closed = streams.len(), "dts client shut down");
    }
}
