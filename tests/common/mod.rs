use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dts_sdk::ClientBuilder;
use dts_sdk::DiscoveryKind;
use dts_sdk::DtsClient;
use dts_sdk::SdkConfig;
use dts_sdk::StaticServer;
use parking_lot::Mutex;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::Instant;

pub const ACCOUNT: &str = "sdk-reader";
pub const PASSWORD: &str = "secret";
pub const EVENT_TYPE: &str = "es-dml";

const RESPONSE_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n";

/// Minimal event-stream server: every accepted subscriber receives every
/// chunk pushed through [`EventServer::push`] after it connected.
pub struct EventServer {
    port: u16,
    chunks: broadcast::Sender<Vec<u8>>,
    subscribers: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl EventServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (chunks, _) = broadcast::channel(1024);
        let subscribers = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let accept_chunks = chunks.clone();
        let accept_subscribers = subscribers.clone();
        let accept_requests = requests.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(
                    socket,
                    accept_chunks.subscribe(),
                    accept_subscribers.clone(),
                    accept_requests.clone(),
                ));
            }
        });

        Self {
            port,
            chunks,
            subscribers,
            requests,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn push(
        &self,
        chunk: impl Into<String>,
    ) {
        self.push_bytes(chunk.into().as_bytes());
    }

    /// Pushes raw bytes, which need not be valid UTF-8.
    pub fn push_bytes(
        &self,
        chunk: &[u8],
    ) {
        let _ = self.chunks.send(chunk.to_vec());
    }

    /// Pushes one change record of `table` keyed by `id`.
    pub fn push_row(
        &self,
        message_id: i64,
        table: &str,
        id: i64,
    ) {
        let data = json!({
            "tableName": table,
            "database": "shop",
            "pkNames": ["id"],
            "type": "INSERT",
            "es": 1_700_000_000_000i64,
            "ts": 1_700_000_000_100i64,
            "data": {"id": id, "status": "PAID"},
        });
        self.push(format!("id:{message_id}\nevent:{EVENT_TYPE}\ndata:{data}\n\n"));
    }

    pub async fn wait_for_subscribers(
        &self,
        count: usize,
    ) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.subscribers.load(Ordering::SeqCst) < count {
            assert!(Instant::now() < deadline, "no subscriber connected");
            sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for EventServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut socket: TcpStream,
    mut chunks: broadcast::Receiver<Vec<u8>>,
    subscribers: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    // Reachability probes connect and close without a request.
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    requests.lock().push(String::from_utf8_lossy(&head).to_lowercase());
    if socket.write_all(RESPONSE_HEAD).await.is_err() {
        return;
    }
    subscribers.fetch_add(1, Ordering::SeqCst);

    loop {
        match chunks.recv().await {
            Ok(chunk) => {
                if socket.write_all(&chunk).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

pub fn static_config(ports: &[u16]) -> SdkConfig {
    let mut config = SdkConfig::default();
    config.stream.request_retry_sleep_ms = 50;
    config.stream.request_max_retry = 2;
    config.listen.cleanup_interval_ms = 50;
    config.discovery.kind = DiscoveryKind::Static;
    config.discovery.sdk_ip = Some("127.0.0.1".to_string());
    config.discovery.fixed.account = ACCOUNT.to_string();
    config.discovery.fixed.password = PASSWORD.to_string();
    config.discovery.fixed.servers = ports
        .iter()
        .map(|port| StaticServer {
            ip: "127.0.0.1".to_string(),
            port: Some(*port),
        })
        .collect();
    config
}

pub async fn connected_client(server: &EventServer) -> DtsClient {
    let client = ClientBuilder::new(static_config(&[server.port()]))
        .build()
        .await
        .unwrap();
    server.wait_for_subscribers(1).await;
    client
}
