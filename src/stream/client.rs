use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::LineStream;
use super::StreamLine;
use super::Transport;
use crate::constants::SUBSCRIBER_PATH;
use crate::event::Flushed;
use crate::event::RecordBuffer;
use crate::metrics::EVENTS_RECEIVED;
use crate::metrics::RECONNECT_ATTEMPTS;
use crate::metrics::RECORDS_DROPPED;
use crate::utils::net;
use crate::DmlEvent;
use crate::RetryPolicy;
use crate::SdkInstance;
use crate::ServerInstance;
use crate::StreamError;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Connection lifecycle of a [`ServerInstanceClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Streaming,
    Retrying,
    Closed,
}

/// Event stream of one server.
///
/// [`ServerInstanceClient::dump`] drives the connection: it reads records,
/// reconnects within the retry policy and returns when the client is closed
/// or retries are exhausted. `close` may be called from any task at any time.
pub struct ServerInstanceClient {
    id: u64,
    server: ServerInstance,
    sdk: Arc<SdkInstance>,
    url: String,
    transport: Arc<dyn Transport>,
    socket_connected: AtomicBool,
    closed: AtomicBool,
    discovery_closed: AtomicBool,
    cancel: CancellationToken,
    state: Mutex<StreamState>,
}

enum ReadOutcome {
    Closed,
    Failed(StreamError),
}

impl ServerInstanceClient {
    pub fn new(
        server: ServerInstance,
        sdk: Arc<SdkInstance>,
        context_path: &str,
        transport: Arc<dyn Transport>,
    ) -> std::result::Result<Self, StreamError> {
        if server.ip.trim().is_empty() {
            return Err(StreamError::InvalidUrl(format!("server {} has no ip", server.account)));
        }
        let Some(port) = server.port else {
            return Err(StreamError::InvalidUrl(format!("server {} has no port", server.account)));
        };
        let url = net::http_url(&server.ip, port, context_path, SUBSCRIBER_PATH);
        Ok(Self {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            server,
            sdk,
            url,
            transport,
            socket_connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            discovery_closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            state: Mutex::new(StreamState::Connecting),
        })
    }

    /// Process-unique id of this client object
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn account(&self) -> &str {
        &self.server.account
    }

    pub fn server(&self) -> &ServerInstance {
        &self.server
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    /// Result of the last reachability probe
    pub fn is_socket_connected(&self) -> bool {
        self.socket_connected.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Discovery removed this server
    pub fn is_discovery_closed(&self) -> bool {
        self.discovery_closed.load(Ordering::Acquire)
    }

    /// Best-effort TCP connect, recorded for [`Self::is_socket_connected`].
    pub async fn probe(
        &self,
        timeout: Duration,
    ) -> bool {
        let Some(addr) = self.server.socket_addr() else {
            return false;
        };
        let reachable = net::probe(&addr, timeout).await;
        self.socket_connected.store(reachable, Ordering::Release);
        reachable
    }

    /// Streams events into `on_event` until closed or out of retries.
    ///
    /// A failed read or connect enters the retry loop: sleep, reconnect, up to
    /// `policy.max_retries` times. Events missed while reconnecting are not
    /// replayed.
    ///
    /// # Errors
    /// The error that started the retry loop once every retry failed. Closing
    /// the client, including a discovery-driven close, returns `Ok`.
    pub async fn dump<F>(
        &self,
        event_type: &str,
        policy: RetryPolicy,
        on_event: F,
    ) -> std::result::Result<(), StreamError>
    where
        F: Fn(Option<i64>, Arc<DmlEvent>) + Send + Sync,
    {
        if self.should_stop() {
            return Ok(());
        }
        info!(url = %self.url, account = %self.account(), "start dump");
        let mut lines = match self.connect().await {
            Ok(Some(lines)) => lines,
            Ok(None) => {
                info!(url = %self.url, "dump closed while connecting");
                self.set_state(StreamState::Closed);
                return Ok(());
            }
            Err(e) => {
                warn!(url = %self.url, "dump connect fail: {}", e);
                match self.reconnect(e, policy).await? {
                    Some(lines) => lines,
                    None => return Ok(()),
                }
            }
        };

        loop {
            let error = match self.read(&mut lines, event_type, &on_event).await {
                ReadOutcome::Closed => {
                    info!(url = %self.url, "dump closed");
                    self.set_state(StreamState::Closed);
                    return Ok(());
                }
                ReadOutcome::Failed(e) => e,
            };
            if self.should_stop() {
                info!(url = %self.url, "dump close: {}", error);
                self.set_state(StreamState::Closed);
                return Ok(());
            }
            warn!(url = %self.url, "dump fail: {}", error);

            match self.reconnect(error, policy).await? {
                Some(next) => {
                    warn!(url = %self.url, "dump reconnection success");
                    lines = next;
                }
                None => return Ok(()),
            }
        }
    }

    /// Stops the stream; returns false if it was already closed.
    pub fn close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        info!(account = %self.account(), url = %self.url, "server client close");
        self.cancel.cancel();
        self.set_state(StreamState::Closed);
        true
    }

    /// Close requested because discovery no longer lists this server.
    pub fn discovery_close(&self) {
        self.discovery_closed.store(true, Ordering::Release);
        self.close();
    }

    fn should_stop(&self) -> bool {
        self.is_closed() || self.is_discovery_closed()
    }

    fn set_state(
        &self,
        state: StreamState,
    ) {
        let mut current = self.state.lock();
        // Closed is terminal.
        if *current != StreamState::Closed {
            *current = state;
        }
    }

    /// `Ok(None)` when the client was closed before the stream opened.
    async fn connect(&self) -> std::result::Result<Option<LineStream>, StreamError> {
        self.set_state(StreamState::Connecting);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(None),
            opened = self.transport.open(&self.url, &self.sdk.account, &self.sdk.password) => opened.map(Some),
        }
    }

    /// `Ok(None)` when the client was closed while retrying.
    async fn reconnect(
        &self,
        error: StreamError,
        policy: RetryPolicy,
    ) -> std::result::Result<Option<LineStream>, StreamError> {
        for attempt in 1..=policy.max_retries {
            if self.should_stop() {
                break;
            }
            self.set_state(StreamState::Retrying);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = sleep(policy.retry_sleep) => {}
            }
            RECONNECT_ATTEMPTS.inc();
            match self.connect().await {
                Ok(Some(lines)) if !self.should_stop() => return Ok(Some(lines)),
                Ok(_) => break,
                Err(e) => debug!(url = %self.url, attempt, "reconnect fail: {}", e),
            }
        }

        if self.should_stop() {
            info!(url = %self.url, "dump closed while retrying");
            self.set_state(StreamState::Closed);
            return Ok(None);
        }
        error!(url = %self.url, max_retries = policy.max_retries, "dump retries exhausted: {}", error);
        self.set_state(StreamState::Closed);
        Err(error)
    }

    async fn read<F>(
        &self,
        lines: &mut LineStream,
        event_type: &str,
        on_event: &F,
    ) -> ReadOutcome
    where
        F: Fn(Option<i64>, Arc<DmlEvent>) + Send + Sync,
    {
        self.set_state(StreamState::Streaming);
        let mut buffer = RecordBuffer::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return ReadOutcome::Closed,
                next = lines.next() => next,
            };
            let line = match next {
                Some(Ok(StreamLine::Text(line))) => line,
                Some(Ok(StreamLine::Malformed)) => {
                    buffer.reject_undecodable();
                    continue;
                }
                Some(Err(e)) => return ReadOutcome::Failed(e),
                None => return ReadOutcome::Failed(StreamError::EndOfStream(self.url.clone())),
            };
            match buffer.push_line(&line, event_type) {
                Some(Flushed::Event { message_id, dml }) => {
                    EVENTS_RECEIVED.with_label_values(&[self.account()]).inc();
                    on_event(message_id, Arc::new(dml));
                }
                Some(Flushed::Dropped(reason)) => {
                    RECORDS_DROPPED.with_label_values(&[reason.as_str()]).inc();
                }
                None => {}
            }
        }
    }
}

impl fmt::Debug for ServerInstanceClient {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ServerInstanceClient")
            .field("id", &self.id)
            .field("account", &self.server.account)
            .field("url", &self.url)
            .field("state", &self.state())
            .finish()
    }
}
