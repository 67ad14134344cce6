use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;
use crate::constants::MIN_INSTANCE_EXPIRE_SEC;

/// Discovery backend, resolved once at startup
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryKind {
    /// Pick `Static` when servers and an account are configured, else `Redis`
    Auto,
    /// Shared key/value + pub/sub coordination store
    #[default]
    Redis,
    /// Fixed server list from configuration
    Static,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub kind: DiscoveryKind,

    /// Timeout of the best-effort reachability probe (unit: milliseconds)
    #[serde(default = "default_test_socket_timeout_ms")]
    pub test_socket_timeout_ms: u64,

    /// HTTP context path the servers are mounted under, e.g. `/dts`
    #[serde(default)]
    pub remote_context_path: String,

    /// Advertised address of this client; detected when absent
    #[serde(default)]
    pub sdk_ip: Option<String>,

    #[serde(default = "default_sdk_port")]
    pub sdk_port: u16,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default, rename = "static")]
    pub fixed: StaticConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            kind: DiscoveryKind::default(),
            test_socket_timeout_ms: default_test_socket_timeout_ms(),
            remote_context_path: String::new(),
            sdk_ip: None,
            sdk_port: default_sdk_port(),
            redis: RedisConfig::default(),
            fixed: StaticConfig::default(),
        }
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.remote_context_path.is_empty() && !self.remote_context_path.starts_with('/') {
            return Err(invalid(format!(
                "discovery.remote_context_path must start with '/': {}",
                self.remote_context_path
            )));
        }
        match self.resolved_kind() {
            DiscoveryKind::Redis => self.redis.validate(),
            DiscoveryKind::Static => self.fixed.validate(),
            DiscoveryKind::Auto => Ok(()),
        }
    }

    /// Collapses [`DiscoveryKind::Auto`] into a concrete backend
    pub fn resolved_kind(&self) -> DiscoveryKind {
        match self.kind {
            DiscoveryKind::Auto if self.fixed.is_configured() => DiscoveryKind::Static,
            DiscoveryKind::Auto => DiscoveryKind::Redis,
            kind => kind,
        }
    }

    pub fn test_socket_timeout(&self) -> Duration {
        Duration::from_millis(self.test_socket_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Root prefix every discovery key and channel is appended to
    #[serde(default = "default_key_root_prefix")]
    pub key_root_prefix: String,

    /// TTL of this client's self record (unit: seconds, floor 2)
    #[serde(default = "default_instance_expire_sec")]
    pub instance_expire_sec: u64,

    /// Period of the full refresh backing up pub/sub (unit: milliseconds, 0 disables)
    #[serde(default = "default_update_instance_timer_ms")]
    pub update_instance_timer_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_root_prefix: default_key_root_prefix(),
            instance_expire_sec: default_instance_expire_sec(),
            update_instance_timer_ms: default_update_instance_timer_ms(),
        }
    }
}

impl RedisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(invalid("discovery.redis.url cannot be empty"));
        }
        Ok(())
    }

    pub fn instance_expire(&self) -> Duration {
        Duration::from_secs(self.instance_expire_sec.max(MIN_INSTANCE_EXPIRE_SEC))
    }
}

/// One statically configured server
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StaticServer {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StaticConfig {
    #[serde(default)]
    pub servers: Vec<StaticServer>,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub password: String,
}

impl StaticConfig {
    pub fn validate(&self) -> Result<()> {
        for server in &self.servers {
            if server.ip.trim().is_empty() {
                return Err(invalid("discovery.static.servers: ip is empty"));
            }
            if server.port.is_none() {
                return Err(invalid(format!("discovery.static.servers: port is empty for {}", server.ip)));
            }
        }
        if self.account.trim().is_empty() {
            return Err(invalid("discovery.static.account is empty"));
        }
        if self.password.trim().is_empty() {
            return Err(invalid("discovery.static.password is empty"));
        }
        Ok(())
    }

    pub(crate) fn is_configured(&self) -> bool {
        !self.servers.is_empty() && !self.account.trim().is_empty() && !self.password.trim().is_empty()
    }
}

fn default_test_socket_timeout_ms() -> u64 {
    500
}
fn default_sdk_port() -> u16 {
    8080
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_key_root_prefix() -> String {
    "dts:def".to_string()
}
fn default_instance_expire_sec() -> u64 {
    10
}
fn default_update_instance_timer_ms() -> u64 {
    5000
}
