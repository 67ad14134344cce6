use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::apply_membership;
use super::DiscoveryService;
use super::ServerClientFactory;
use crate::DiscoveryError;
use crate::InstanceMap;
use crate::MembershipStore;
use crate::Result;
use crate::Scheduler;
use crate::SdkInstance;
use crate::ServerInstance;
use crate::ServerListRef;
use crate::ServerListener;
use crate::StaticConfig;

/// Fixed server list taken from configuration.
///
/// The list is resolved once at construction; no change events are emitted
/// afterwards.
pub struct StaticDiscoveryService {
    store: MembershipStore,
    factory: ServerClientFactory,
}

impl StaticDiscoveryService {
    pub fn new(
        config: &StaticConfig,
        factory: ServerClientFactory,
        scheduler: &Scheduler,
    ) -> Result<Self> {
        let instances = static_instances(config)?;
        let store = MembershipStore::new();
        apply_membership(&store, Some(instances), &factory, scheduler);
        info!(servers = store.server_list_ref().len(), "static discovery initialized");
        Ok(Self { store, factory })
    }
}

fn static_instances(config: &StaticConfig) -> std::result::Result<InstanceMap, DiscoveryError> {
    if config.account.trim().is_empty() || config.password.trim().is_empty() {
        return Err(DiscoveryError::InvalidAccount(
            "static discovery requires an account and a password".to_string(),
        ));
    }
    let mut instances = InstanceMap::new();
    for server in config.servers.iter() {
        if server.ip.trim().is_empty() {
            return Err(DiscoveryError::InvalidServer("ip is empty".to_string()));
        }
        let Some(port) = server.port else {
            return Err(DiscoveryError::InvalidServer(format!("port is empty for {}", server.ip)));
        };
        let instance = ServerInstance::from_address(server.ip.trim(), port);
        instances.insert(instance.account.clone(), instance);
    }
    Ok(instances)
}

#[async_trait]
impl DiscoveryService for StaticDiscoveryService {
    async fn register_sdk_instance(&self) -> Result<()> {
        Ok(())
    }

    fn server_list_ref(&self) -> ServerListRef {
        self.store.server_list_ref()
    }

    fn add_server_listener(
        &self,
        listener: Arc<dyn ServerListener>,
    ) {
        self.store.add_listener(listener);
    }

    fn sdk_instance(&self) -> Arc<SdkInstance> {
        self.factory.sdk().clone()
    }

    async fn shutdown(&self) {}
}
