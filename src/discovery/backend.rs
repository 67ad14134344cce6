use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
#[cfg(test)]
use mockall::automock;

use crate::DiscoveryError;

/// Channel names of received pub/sub notifications
pub type NotificationStream = BoxStream<'static, String>;

/// Key/value store with TTLs and pub/sub that discovery coordinates through.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CoordinationBackend: Send + Sync {
    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> std::result::Result<(), DiscoveryError>;

    /// Renews the TTL of `key`; false if the key does not exist.
    /// A zero `ttl` expires the key immediately.
    async fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> std::result::Result<bool, DiscoveryError>;

    async fn publish(
        &self,
        channel: &str,
        message: &str,
    ) -> std::result::Result<(), DiscoveryError>;

    /// Values of every live key matching the glob `pattern`
    async fn scan_values(
        &self,
        pattern: &str,
    ) -> std::result::Result<Vec<String>, DiscoveryError>;

    async fn subscribe(
        &self,
        channels: Vec<String>,
    ) -> std::result::Result<NotificationStream, DiscoveryError>;
}
