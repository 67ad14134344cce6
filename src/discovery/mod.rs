//! Server discovery.
//!
//! A [`DiscoveryService`] owns the [`MembershipStore`] and keeps it in line
//! with the authoritative server set: a coordination backend for
//! [`RedisDiscoveryService`], the configuration for [`StaticDiscoveryService`].
mod backend;
mod redis_backend;
mod redis_discovery;
mod static_discovery;

pub use backend::*;
pub use redis_backend::*;
pub use redis_discovery::*;
pub use static_discovery::*;


use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::stream::ServerInstanceClient;
use crate::stream::Transport;
use crate::utils::async_task::spawn_task;
use crate::DiscoveryConfig;
use crate::InstanceMap;
use crate::MembershipStore;
use crate::Result;
use crate::Scheduler;
use crate::SdkInstance;
use crate::ServerChangeEvent;
use crate::ServerInstance;
use crate::ServerListRef;
use crate::ServerListener;

#[async_trait]
pub trait DiscoveryService: Send + Sync {
    /// Announces this client and starts tracking the server set.
    async fn register_sdk_instance(&self) -> Result<()>;

    fn server_list_ref(&self) -> ServerListRef;

    /// `listener` sees every accepted membership change from now on.
    fn add_server_listener(
        &self,
        listener: Arc<dyn ServerListener>,
    );

    fn sdk_instance(&self) -> Arc<SdkInstance>;

    /// Withdraws this client. Idempotent.
    async fn shutdown(&self);
}

/// Builds and probes the stream client of a newly discovered server.
#[derive(Clone)]
pub struct ServerClientFactory {
    sdk: Arc<SdkInstance>,
    context_path: String,
    transport: Arc<dyn Transport>,
    probe_timeout: Duration,
}

impl ServerClientFactory {
    pub fn new(
        sdk: Arc<SdkInstance>,
        config: &DiscoveryConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            sdk,
            context_path: config.remote_context_path.clone(),
            transport,
            probe_timeout: config.test_socket_timeout(),
        }
    }

    pub fn sdk(&self) -> &Arc<SdkInstance> {
        &self.sdk
    }

    pub(crate) fn create(
        &self,
        server: &ServerInstance,
    ) -> Result<Arc<ServerInstanceClient>> {
        let client =
            ServerInstanceClient::new(server.clone(), self.sdk.clone(), &self.context_path, self.transport.clone())?;
        Ok(Arc::new(client))
    }

    /// Records reachability of `clients` in the background.
    pub(crate) fn probe_all(
        &self,
        clients: &[Arc<ServerInstanceClient>],
        scheduler: &Scheduler,
    ) {
        for client in clients {
            let client = client.clone();
            let timeout = self.probe_timeout;
            spawn_task(scheduler.handle(), "reachability-probe", async move {
                client.probe(timeout).await;
                Ok(())
            });
        }
    }
}

/// Shared by both services: apply a fetched map and probe the new clients.
pub(crate) fn apply_membership(
    store: &MembershipStore,
    fetched: Option<InstanceMap>,
    factory: &ServerClientFactory,
    scheduler: &Scheduler,
) -> Option<ServerChangeEvent> {
    let event = store.apply(fetched, |instance| factory.create(instance))?;
    factory.probe_all(&event.insert_list, scheduler);
    Some(event)
}
