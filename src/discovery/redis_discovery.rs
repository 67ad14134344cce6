use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::apply_membership;
use super::CoordinationBackend;
use super::DiscoveryService;
use super::ServerClientFactory;
use crate::constants::MIN_HEARTBEAT_DELAY_MS;
use crate::constants::MIN_INSTANCE_EXPIRE_SEC;
use crate::constants::SDK_INSTANCE_KEY;
use crate::constants::SDK_SUBSCRIBE_CHANNEL;
use crate::constants::SERVER_INSTANCE_KEY_PATTERN;
use crate::constants::SERVER_SUBSCRIBE_CHANNEL;
use crate::constants::SERVER_UNSUBSCRIBE_CHANNEL;
use crate::utils::async_task::spawn_task;
use crate::DiscoveryError;
use crate::InstanceMap;
use crate::MembershipStore;
use crate::RedisConfig;
use crate::Result;
use crate::Scheduler;
use crate::SdkInstance;
use crate::ServerChangeEvent;
use crate::ServerInstance;
use crate::ServerListRef;
use crate::ServerListener;
use crate::TimerHandle;

/// Discovery through a coordination backend.
///
/// This client keeps a self record alive under a TTL and announces itself on
/// the sdk channel. The server set is read by scanning the server key space,
/// on every server channel notification and on a fixed period.
pub struct RedisDiscoveryService {
    inner: Arc<Inner>,
}

struct Keys {
    sdk_instance: String,
    server_pattern: String,
    sdk_subscribe: String,
    server_subscribe: String,
    server_unsubscribe: String,
}

impl Keys {
    fn new(
        prefix: &str,
        sdk_account: &str,
    ) -> Self {
        Self {
            sdk_instance: format!("{prefix}{SDK_INSTANCE_KEY}{sdk_account}"),
            server_pattern: format!("{prefix}{SERVER_INSTANCE_KEY_PATTERN}"),
            sdk_subscribe: format!("{prefix}{SDK_SUBSCRIBE_CHANNEL}"),
            server_subscribe: format!("{prefix}{SERVER_SUBSCRIBE_CHANNEL}"),
            server_unsubscribe: format!("{prefix}{SERVER_UNSUBSCRIBE_CHANNEL}"),
        }
    }
}

struct Inner {
    backend: Arc<dyn CoordinationBackend>,
    store: MembershipStore,
    factory: ServerClientFactory,
    scheduler: Scheduler,
    keys: Keys,
    sdk_payload: String,
    expire: Duration,
    refresh_period: Duration,
    registered: AtomicBool,
    destroyed: AtomicBool,
    timers: Mutex<Vec<TimerHandle>>,
    subscription: Mutex<Option<JoinHandle<()>>>,
    // Serializes refreshes so diffs apply in fetch order.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl RedisDiscoveryService {
    pub fn new(
        backend: Arc<dyn CoordinationBackend>,
        config: &RedisConfig,
        factory: ServerClientFactory,
        scheduler: Scheduler,
    ) -> Result<Self> {
        let sdk_payload = serde_json::to_string(factory.sdk().as_ref()).map_err(DiscoveryError::from)?;
        let keys = Keys::new(&config.key_root_prefix, &factory.sdk().account);
        Ok(Self {
            inner: Arc::new(Inner {
                backend,
                store: MembershipStore::new(),
                factory,
                scheduler,
                keys,
                sdk_payload,
                expire: config.instance_expire(),
                refresh_period: Duration::from_millis(config.update_instance_timer_ms),
                registered: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                timers: Mutex::new(Vec::new()),
                subscription: Mutex::new(None),
                refresh_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Re-reads the server set now.
    ///
    /// Returns the accepted change, or `None` when nothing changed or the
    /// backend could not be read.
    pub async fn refresh(&self) -> Option<ServerChangeEvent> {
        self.inner.refresh().await
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }
}

/// TTL renewal period: a third of the TTL, 500ms at the TTL floor.
pub(crate) fn heartbeat_delay(expire: Duration) -> Duration {
    if expire <= Duration::from_secs(MIN_INSTANCE_EXPIRE_SEC) {
        Duration::from_millis(MIN_HEARTBEAT_DELAY_MS)
    } else {
        Duration::from_millis(expire.as_millis() as u64 / 3)
    }
}

impl Inner {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    async fn refresh(&self) -> Option<ServerChangeEvent> {
        let _guard = self.refresh_lock.lock().await;
        if self.is_destroyed() {
            return None;
        }
        let fetched = match self.fetch().await {
            Ok(instances) => Some(instances),
            Err(e) => {
                warn!("discovery backend unavailable, treating as stale data: {}", e);
                None
            }
        };
        let event = apply_membership(&self.store, fetched, &self.factory, &self.scheduler)?;
        info!(generation = event.generation, "server list refreshed");
        Some(event)
    }

    async fn fetch(&self) -> std::result::Result<InstanceMap, DiscoveryError> {
        let values = self.backend.scan_values(&self.keys.server_pattern).await?;
        let mut instances = InstanceMap::new();
        for value in values {
            match serde_json::from_str::<ServerInstance>(&value) {
                Ok(instance) if instance.account.is_empty() => {
                    warn!(record = %value, "skip server instance without account");
                }
                Ok(instance) => {
                    instances.insert(instance.account.clone(), instance);
                }
                Err(e) => warn!(record = %value, "skip undecodable server instance: {}", e),
            }
        }
        Ok(instances)
    }

    async fn heartbeat(&self) -> Result<()> {
        let renewed = self.backend.expire(&self.keys.sdk_instance, self.expire).await?;
        if !renewed {
            debug!(key = %self.keys.sdk_instance, "sdk instance key missing, rewriting");
            self.backend
                .set_with_ttl(&self.keys.sdk_instance, &self.sdk_payload, self.expire)
                .await?;
        }
        debug!(key = %self.keys.sdk_instance, "heartbeat");
        Ok(())
    }

    async fn subscribe(self: &Arc<Self>) -> Result<()> {
        let mut notifications = self
            .backend
            .subscribe(vec![
                self.keys.server_subscribe.clone(),
                self.keys.server_unsubscribe.clone(),
            ])
            .await?;
        let inner = self.clone();
        let handle = spawn_task(self.scheduler.handle(), "discovery-subscription", async move {
            while let Some(channel) = notifications.next().await {
                if inner.is_destroyed() {
                    break;
                }
                debug!(%channel, "server set notification");
                inner.refresh().await;
            }
            Ok(())
        });
        *self.subscription.lock() = Some(handle);
        Ok(())
    }

    fn start_timers(self: &Arc<Self>) {
        let mut timers = self.timers.lock();
        if !self.refresh_period.is_zero() {
            let inner = self.clone();
            timers.push(self.scheduler.schedule_with_fixed_delay(
                "discovery-refresh",
                self.refresh_period,
                self.refresh_period,
                move || {
                    let inner = inner.clone();
                    async move {
                        inner.refresh().await;
                        Ok(())
                    }
                },
            ));
        }

        let delay = heartbeat_delay(self.expire);
        let inner = self.clone();
        timers.push(
            self.scheduler
                .schedule_with_fixed_delay("discovery-heartbeat", delay, delay, move || {
                    let inner = inner.clone();
                    async move { inner.heartbeat().await }
                }),
        );
    }
}

#[async_trait]
impl DiscoveryService for RedisDiscoveryService {
    async fn register_sdk_instance(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.is_destroyed() {
            return Err(crate::Error::IllegalState("discovery is shut down".to_string()));
        }
        if inner.registered.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        inner
            .backend
            .set_with_ttl(&inner.keys.sdk_instance, &inner.sdk_payload, inner.expire)
            .await?;
        inner
            .backend
            .publish(&inner.keys.sdk_subscribe, &inner.sdk_payload)
            .await?;
        info!(account = %inner.factory.sdk().account, key = %inner.keys.sdk_instance, "sdk instance registered");

        inner.subscribe().await?;
        inner.refresh().await;
        inner.start_timers();
        Ok(())
    }

    fn server_list_ref(&self) -> ServerListRef {
        self.inner.store.server_list_ref()
    }

    fn add_server_listener(
        &self,
        listener: Arc<dyn ServerListener>,
    ) {
        self.inner.store.add_listener(listener);
    }

    fn sdk_instance(&self) -> Arc<SdkInstance> {
        self.inner.factory.sdk().clone()
    }

    async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        for timer in inner.timers.lock().drain(..) {
            timer.cancel();
        }
        if let Some(subscription) = inner.subscription.lock().take() {
            subscription.abort();
        }

        if let Err(e) = inner.backend.expire(&inner.keys.sdk_instance, Duration::ZERO).await {
            warn!(key = %inner.keys.sdk_instance, "expire sdk instance key failed: {}", e);
        }
        if let Err(e) = inner
            .backend
            .publish(&inner.keys.server_unsubscribe, &inner.sdk_payload)
            .await
        {
            warn!("publish sdk unsubscribe failed: {}", e);
        }
        info!(account = %inner.factory.sdk().account, "discovery shut down");
    }
}
