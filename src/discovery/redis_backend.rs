use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::Client;
use tracing::debug;

use super::CoordinationBackend;
use super::NotificationStream;
use crate::constants::SCAN_COUNT;
use crate::DiscoveryError;

/// [`CoordinationBackend`] over a Redis server.
///
/// Commands share one multiplexed connection; every subscription opens its
/// own pub/sub connection.
#[derive(Clone)]
pub struct RedisBackend {
    client: Client,
    connection: MultiplexedConnection,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> std::result::Result<Self, DiscoveryError> {
        let client = Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        debug!(%url, "redis backend connected");
        Ok(Self { client, connection })
    }
}

#[async_trait]
impl CoordinationBackend for RedisBackend {
    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> std::result::Result<(), DiscoveryError> {
        let mut con = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut con)
            .await?;
        Ok(())
    }

    async fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> std::result::Result<bool, DiscoveryError> {
        let mut con = self.connection.clone();
        let renewed: bool = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs())
            .query_async(&mut con)
            .await?;
        Ok(renewed)
    }

    async fn publish(
        &self,
        channel: &str,
        message: &str,
    ) -> std::result::Result<(), DiscoveryError> {
        let mut con = self.connection.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(message)
            .query_async(&mut con)
            .await?;
        debug!(%channel, receivers, "published");
        Ok(())
    }

    async fn scan_values(
        &self,
        pattern: &str,
    ) -> std::result::Result<Vec<String>, DiscoveryError> {
        let mut con = self.connection.clone();
        // SCAN may return a key more than once.
        let mut keys = BTreeSet::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut con)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = keys.into_iter().collect();
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut con).await?;
        // Keys that expired between SCAN and MGET come back as nil.
        Ok(values.into_iter().flatten().collect())
    }

    async fn subscribe(
        &self,
        channels: Vec<String>,
    ) -> std::result::Result<NotificationStream, DiscoveryError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for channel in channels.iter() {
            pubsub.subscribe(channel.as_str()).await?;
        }
        debug!(?channels, "subscribed");
        Ok(pubsub
            .into_on_message()
            .map(|msg| msg.get_channel_name().to_string())
            .boxed())
    }
}
