use std::sync::Arc;

use tracing::info;

use super::DtsClient;
use crate::discovery::CoordinationBackend;
use crate::discovery::DiscoveryService;
use crate::discovery::RedisBackend;
use crate::discovery::RedisDiscoveryService;
use crate::discovery::ServerClientFactory;
use crate::discovery::StaticDiscoveryService;
use crate::stream::HttpTransport;
use crate::stream::Transport;
use crate::utils::net;
use crate::DiscoveryKind;
use crate::IdGenerator;
use crate::Result;
use crate::Scheduler;
use crate::SdkConfig;
use crate::SdkInstance;

/// Resolves an [`SdkConfig`] into a running [`DtsClient`].
///
/// Every collaborator defaults to what the configuration selects; the
/// setters swap one out, e.g. to reuse an existing Redis connection.
pub struct ClientBuilder {
    config: SdkConfig,
    discovery: Option<Arc<dyn DiscoveryService>>,
    transport: Option<Arc<dyn Transport>>,
    backend: Option<Arc<dyn CoordinationBackend>>,
}

impl ClientBuilder {
    pub fn new(config: SdkConfig) -> Self {
        Self {
            config,
            discovery: None,
            transport: None,
            backend: None,
        }
    }

    /// Uses `discovery` as is; transport and backend settings are ignored.
    pub fn discovery(
        mut self,
        discovery: Arc<dyn DiscoveryService>,
    ) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn transport(
        mut self,
        transport: Arc<dyn Transport>,
    ) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn coordination_backend(
        mut self,
        backend: Arc<dyn CoordinationBackend>,
    ) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Validates the configuration, connects discovery and starts streaming.
    ///
    /// Must be called within a tokio runtime.
    pub async fn build(self) -> Result<DtsClient> {
        let config = self.config.validate()?;
        let scheduler = Scheduler::new();

        let discovery: Arc<dyn DiscoveryService> = match self.discovery {
            Some(discovery) => discovery,
            None => {
                let transport: Arc<dyn Transport> = match self.transport {
                    Some(transport) => transport,
                    None => Arc::new(HttpTransport::new(&config.stream)?),
                };
                let ids = IdGenerator::random();
                let ip = match config.discovery.sdk_ip.as_deref() {
                    Some(ip) => ip.to_string(),
                    None => net::detect_local_ip().await,
                };
                let port = config.discovery.sdk_port;

                match config.discovery.resolved_kind() {
                    DiscoveryKind::Static => {
                        let fixed = &config.discovery.fixed;
                        let sdk = SdkInstance::with_account(&ids, &fixed.account, &fixed.password, ip, port);
                        let factory = ServerClientFactory::new(Arc::new(sdk), &config.discovery, transport);
                        info!(servers = fixed.servers.len(), "using static discovery");
                        Arc::new(StaticDiscoveryService::new(fixed, factory, &scheduler)?)
                    }
                    DiscoveryKind::Redis | DiscoveryKind::Auto => {
                        let sdk = SdkInstance::generate(&ids, ip, port);
                        let factory = ServerClientFactory::new(Arc::new(sdk), &config.discovery, transport);
                        let backend: Arc<dyn CoordinationBackend> = match self.backend {
                            Some(backend) => backend,
                            None => Arc::new(RedisBackend::connect(&config.discovery.redis.url).await?),
                        };
                        info!(prefix = %config.discovery.redis.key_root_prefix, "using redis discovery");
                        Arc::new(RedisDiscoveryService::new(
                            backend,
                            &config.discovery.redis,
                            factory,
                            scheduler.clone(),
                        )?)
                    }
                }
            }
        };

        DtsClient::start(config, discovery, scheduler).await
    }
}
