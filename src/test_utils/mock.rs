use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::constants::SERVER_SUBSCRIBE_CHANNEL;
use crate::discovery::CoordinationBackend;
use crate::discovery::NotificationStream;
use crate::discovery::ServerClientFactory;
use crate::stream::LineStream;
use crate::stream::MockTransport;
use crate::stream::ServerInstanceClient;
use crate::stream::StreamLine;
use crate::DiscoveryConfig;
use crate::DiscoveryError;
use crate::IdGenerator;
use crate::SdkInstance;
use crate::ServerInstance;
use crate::StreamError;

pub(crate) const TEST_PREFIX: &str = "dts:test:";

/// Open stream yielding `lines`, then idle forever.
pub(crate) fn line_stream(lines: Vec<String>) -> LineStream {
    stream::iter(lines.into_iter().map(|line| Ok(StreamLine::Text(line))))
        .chain(stream::pending())
        .boxed()
}

/// Stream that yields `lines` and then fails like a dropped connection.
pub(crate) fn broken_stream(lines: Vec<String>) -> LineStream {
    stream::iter(lines.into_iter().map(|line| Ok(StreamLine::Text(line))))
        .chain(stream::once(async {
            Err(StreamError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            )))
        }))
        .boxed()
}

/// Transport whose first stream carries the lines sent through the returned
/// sender; later opens fail until the test ends.
pub(crate) fn channel_transport() -> (mpsc::UnboundedSender<String>, MockTransport) {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let first = Mutex::new(Some(
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|line| (Ok::<_, StreamError>(StreamLine::Text(line)), rx)) }).boxed(),
    ));
    let mut transport = MockTransport::new();
    transport.expect_open().returning(move |url, _, _| match first.lock().take() {
        Some(lines) => Ok(lines),
        None => Err(StreamError::Status {
            url: url.to_string(),
            status: 503,
        }),
    });
    (tx, transport)
}

pub(crate) fn test_sdk() -> Arc<SdkInstance> {
    Arc::new(SdkInstance::generate(&IdGenerator::new(1), "127.0.0.1".to_string(), 8080))
}

/// Transport whose every stream stays open without data.
pub(crate) fn idle_transport() -> MockTransport {
    let mut transport = MockTransport::new();
    transport
        .expect_open()
        .returning(|_, _, _| Ok(line_stream(Vec::new())));
    transport
}

pub(crate) fn test_factory(transport: MockTransport) -> ServerClientFactory {
    let config = DiscoveryConfig {
        test_socket_timeout_ms: 50,
        ..Default::default()
    };
    ServerClientFactory::new(test_sdk(), &config, Arc::new(transport))
}

pub(crate) fn server(
    account: &str,
    port: u16,
) -> ServerInstance {
    ServerInstance {
        ip: "127.0.0.1".to_string(),
        port: Some(port),
        device_id: Some(format!("dev-{account}")),
        account: account.to_string(),
        password: Some("pwd".to_string()),
    }
}

pub(crate) fn server_client(
    account: &str,
    port: u16,
    transport: MockTransport,
) -> Arc<ServerInstanceClient> {
    Arc::new(ServerInstanceClient::new(server(account, port), test_sdk(), "", Arc::new(transport)).unwrap())
}

struct Entry {
    value: String,
    deadline: Instant,
}

/// In-process [`CoordinationBackend`] with TTLs on tokio time.
pub(crate) struct InMemoryBackend {
    values: Mutex<BTreeMap<String, Entry>>,
    published: Mutex<Vec<(String, String)>>,
    notifications: broadcast::Sender<String>,
    fail_scan: AtomicBool,
}

impl InMemoryBackend {
    pub(crate) fn new() -> Arc<Self> {
        let (notifications, _) = broadcast::channel(64);
        Arc::new(Self {
            values: Mutex::new(BTreeMap::new()),
            published: Mutex::new(Vec::new()),
            notifications,
            fail_scan: AtomicBool::new(false),
        })
    }

    /// Makes every scan fail until reset.
    pub(crate) fn set_fail_scan(
        &self,
        fail: bool,
    ) {
        self.fail_scan.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn put_server(
        &self,
        instance: &ServerInstance,
    ) {
        self.values.lock().insert(
            format!("{TEST_PREFIX}svr:ls:{}", instance.account),
            Entry {
                value: serde_json::to_string(instance).unwrap(),
                deadline: Instant::now() + Duration::from_secs(3600),
            },
        );
    }

    pub(crate) fn put_raw(
        &self,
        key: &str,
        value: &str,
    ) {
        self.values.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                deadline: Instant::now() + Duration::from_secs(3600),
            },
        );
    }

    pub(crate) fn remove_server(
        &self,
        account: &str,
    ) {
        self.values.lock().remove(&format!("{TEST_PREFIX}svr:ls:{account}"));
    }

    pub(crate) fn remove(
        &self,
        key: &str,
    ) {
        self.values.lock().remove(key);
    }

    /// Live value of `key`
    pub(crate) fn value(
        &self,
        key: &str,
    ) -> Option<String> {
        let now = Instant::now();
        self.values
            .lock()
            .get(key)
            .filter(|entry| entry.deadline > now)
            .map(|entry| entry.value.clone())
    }

    pub(crate) fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    /// Announces a server set change the way a server would.
    pub(crate) fn notify_server_change(&self) {
        let _ = self
            .notifications
            .send(format!("{TEST_PREFIX}{SERVER_SUBSCRIBE_CHANNEL}"));
    }
}

fn glob_match(
    pattern: &str,
    key: &str,
) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[async_trait]
impl CoordinationBackend for InMemoryBackend {
    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), DiscoveryError> {
        self.values.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                deadline: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<bool, DiscoveryError> {
        let now = Instant::now();
        let mut values = self.values.lock();
        if !values.get(key).is_some_and(|entry| entry.deadline > now) {
            return Ok(false);
        }
        if ttl.is_zero() {
            values.remove(key);
        } else if let Some(entry) = values.get_mut(key) {
            entry.deadline = now + ttl;
        }
        Ok(true)
    }

    async fn publish(
        &self,
        channel: &str,
        message: &str,
    ) -> Result<(), DiscoveryError> {
        self.published
            .lock()
            .push((channel.to_string(), message.to_string()));
        let _ = self.notifications.send(channel.to_string());
        Ok(())
    }

    async fn scan_values(
        &self,
        pattern: &str,
    ) -> Result<Vec<String>, DiscoveryError> {
        if self.fail_scan.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Backend(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "backend unavailable",
            ))));
        }
        let now = Instant::now();
        Ok(self
            .values
            .lock()
            .iter()
            .filter(|(key, entry)| entry.deadline > now && glob_match(pattern, key))
            .map(|(_, entry)| entry.value.clone())
            .collect())
    }

    async fn subscribe(
        &self,
        channels: Vec<String>,
    ) -> Result<NotificationStream, DiscoveryError> {
        let receiver = self.notifications.subscribe();
        Ok(stream::unfold((receiver, channels), |(mut receiver, channels)| async move {
            loop {
                match receiver.recv().await {
                    Ok(channel) if channels.contains(&channel) => return Some((channel, (receiver, channels))),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed())
    }
}
