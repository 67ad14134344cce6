use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::time::timeout;
use tokio_util::codec::Decoder;
use tracing_test::traced_test;

use super::*;
use crate::test_utils::broken_stream;
use crate::test_utils::dml_event;
use crate::test_utils::line_stream;
use crate::test_utils::record_lines;
use crate::test_utils::server;
use crate::test_utils::test_sdk;
use crate::RetryPolicy;
use crate::StreamError;

const EVENT_TYPE: &str = "es-dml";

fn policy(max_retries: usize) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        retry_sleep: Duration::from_millis(10),
    }
}

fn refused(url: &str) -> StreamError {
    StreamError::Status {
        url: url.to_string(),
        status: 503,
    }
}

fn client_with(transport: MockTransport) -> Arc<ServerInstanceClient> {
    Arc::new(ServerInstanceClient::new(server("svr-1", 9000), test_sdk(), "/ctx", Arc::new(transport)).unwrap())
}

fn collector() -> (
    Arc<Mutex<Vec<(Option<i64>, String)>>>,
    impl Fn(Option<i64>, Arc<crate::DmlEvent>) + Send + Sync + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |message_id, dml: Arc<crate::DmlEvent>| {
        sink.lock().push((message_id, dml.id_string().unwrap_or_default()));
    })
}

#[test]
fn new_should_build_subscriber_url() {
    let client = client_with(MockTransport::new());

    assert_eq!(client.url(), "http://127.0.0.1:9000/ctx/dts/sdk/subscriber");
    assert_eq!(client.account(), "svr-1");
    assert_eq!(client.state(), StreamState::Connecting);
    assert!(!client.is_socket_connected());
}

#[test]
fn new_should_reject_server_without_port() {
    let mut instance = server("svr-1", 9000);
    instance.port = None;

    let result = ServerInstanceClient::new(instance, test_sdk(), "", Arc::new(MockTransport::new()));

    assert!(matches!(result, Err(StreamError::InvalidUrl(_))));
}

#[test]
fn client_ids_should_be_unique() {
    let a = client_with(MockTransport::new());
    let b = client_with(MockTransport::new());

    assert_ne!(a.id(), b.id());
}

#[tokio::test]
async fn dump_should_authenticate_with_sdk_credentials() {
    let sdk = test_sdk();
    let account = sdk.account.clone();
    let password = sdk.password.clone();
    let mut transport = MockTransport::new();
    transport
        .expect_open()
        .withf(move |url, a, p| url == "http://127.0.0.1:9000/dts/sdk/subscriber" && a == account && p == password)
        .times(1)
        .returning(|_, _, _| Ok(line_stream(Vec::new())));
    let client = Arc::new(ServerInstanceClient::new(server("svr-1", 9000), sdk, "", Arc::new(transport)).unwrap());

    let dumping = client.clone();
    let task = tokio::spawn(async move { dumping.dump(EVENT_TYPE, policy(0), |_, _| {}).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.state(), StreamState::Streaming);

    assert!(client.close());
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn dump_should_deliver_records_in_order() {
    let mut lines = Vec::new();
    lines.extend(record_lines(1, EVENT_TYPE, &dml_event("orders", 1)));
    lines.extend(record_lines(2, "heartbeat", &dml_event("orders", 99)));
    lines.extend(record_lines(3, EVENT_TYPE, &dml_event("orders", 2)));
    lines.push("data:{not json".to_string());
    lines.push("event:es-dml".to_string());
    lines.push(String::new());
    lines.extend(record_lines(5, EVENT_TYPE, &dml_event("orders", 3)));

    let mut transport = MockTransport::new();
    transport
        .expect_open()
        .times(1)
        .returning(move |_, _, _| Ok(line_stream(lines.clone())));
    let client = client_with(transport);
    let (seen, on_event) = collector();

    let dumping = client.clone();
    let task = tokio::spawn(async move { dumping.dump(EVENT_TYPE, policy(0), on_event).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.close();
    task.await.unwrap().unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            (Some(1), "1".to_string()),
            (Some(3), "2".to_string()),
            (Some(5), "3".to_string())
        ]
    );
}

#[test]
fn codec_should_split_lines_and_strip_terminators() {
    let mut codec = EventLineCodec::new(64);
    let mut buf = BytesMut::from(&b"id:1\r\nevent:es-dml\n\ndata:{\"ta"[..]);

    assert_eq!(codec.decode(&mut buf).unwrap(), Some(StreamLine::Text("id:1".to_string())));
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(StreamLine::Text("event:es-dml".to_string())));
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(StreamLine::Text(String::new())));
    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(b"ble\"}\n");
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(StreamLine::Text("data:{\"table\"}".to_string()))
    );
    assert!(buf.is_empty());
}

#[test]
fn codec_should_isolate_invalid_utf8_lines() {
    let mut codec = EventLineCodec::new(64);
    let mut buf = BytesMut::from(&b"data:\xff\xfe\nid:3\n"[..]);

    assert_eq!(codec.decode(&mut buf).unwrap(), Some(StreamLine::Malformed));
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(StreamLine::Text("id:3".to_string())));
}

#[test]
fn codec_should_skip_oversized_lines_and_resume() {
    let mut codec = EventLineCodec::new(8);
    let mut buf = BytesMut::from(&b"data:0123456789"[..]);

    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    buf.extend_from_slice(b"abcdef\nid:7\n");

    assert_eq!(codec.decode(&mut buf).unwrap(), Some(StreamLine::Malformed));
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(StreamLine::Text("id:7".to_string())));
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
}

#[test]
fn codec_should_flush_unterminated_tail_at_eof() {
    let mut codec = EventLineCodec::new(64);
    let mut buf = BytesMut::from(&b"id:9"[..]);

    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(StreamLine::Text("id:9".to_string())));
    assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
}

#[tokio::test]
async fn dump_should_keep_streaming_past_undecodable_lines() {
    let mut items: Vec<std::result::Result<StreamLine, StreamError>> = Vec::new();
    let text = |lines: Vec<String>| lines.into_iter().map(|l| Ok(StreamLine::Text(l))).collect::<Vec<_>>();
    items.extend(text(record_lines(1, EVENT_TYPE, &dml_event("orders", 1))));
    items.push(Ok(StreamLine::Text("id:2".to_string())));
    items.push(Ok(StreamLine::Text("event:es-dml".to_string())));
    items.push(Ok(StreamLine::Malformed));
    items.push(Ok(StreamLine::Text(String::new())));
    items.extend(text(record_lines(3, EVENT_TYPE, &dml_event("orders", 3))));
    let lines = Mutex::new(Some(items));

    let mut transport = MockTransport::new();
    transport.expect_open().times(1).returning(move |_, _, _| {
        let items = lines.lock().take().unwrap_or_default();
        Ok(stream::iter(items).chain(stream::pending()).boxed())
    });
    let client = client_with(transport);
    let (seen, on_event) = collector();

    let dumping = client.clone();
    let task = tokio::spawn(async move { dumping.dump(EVENT_TYPE, policy(0), on_event).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(client.state(), StreamState::Streaming);
    client.close();
    task.await.unwrap().unwrap();
    assert_eq!(
        *seen.lock(),
        vec![(Some(1), "1".to_string()), (Some(3), "3".to_string())]
    );
}

/// Transport whose connect never completes.
struct StalledTransport;

#[async_trait]
impl Transport for StalledTransport {
    async fn open(
        &self,
        _url: &str,
        _account: &str,
        _password: &str,
    ) -> std::result::Result<LineStream, StreamError> {
        futures::future::pending().await
    }
}

#[tokio::test]
async fn close_should_interrupt_pending_connect() {
    let client = Arc::new(
        ServerInstanceClient::new(server("svr-1", 9000), test_sdk(), "", Arc::new(StalledTransport)).unwrap(),
    );

    let dumping = client.clone();
    let task = tokio::spawn(async move { dumping.dump(EVENT_TYPE, policy(3), |_, _| {}).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.state(), StreamState::Connecting);

    client.close();

    let result = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(client.state(), StreamState::Closed);
}

#[tokio::test]
#[traced_test]
async fn dump_should_return_first_error_after_retries_exhausted() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let mut transport = MockTransport::new();
    transport.expect_open().returning(move |url, _, _| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            Ok(broken_stream(Vec::new()))
        } else {
            Err(refused(url))
        }
    });
    let client = client_with(transport);

    let result = timeout(Duration::from_secs(1), client.dump(EVENT_TYPE, policy(3), |_, _| {}))
        .await
        .unwrap();

    assert!(matches!(result, Err(StreamError::Io(_))));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(client.state(), StreamState::Closed);
    assert!(logs_contain("dump retries exhausted"));
}

#[tokio::test]
async fn dump_should_retry_initial_connect_failure() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let mut transport = MockTransport::new();
    transport.expect_open().returning(move |url, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(refused(url))
    });
    let client = client_with(transport);

    let result = client.dump(EVENT_TYPE, policy(2), |_, _| {}).await;

    assert!(matches!(result, Err(StreamError::Status { status: 503, .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
#[traced_test]
async fn dump_should_resume_on_reconnect() {
    let first = record_lines(1, EVENT_TYPE, &dml_event("orders", 1));
    let second = record_lines(2, EVENT_TYPE, &dml_event("orders", 2));
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let mut transport = MockTransport::new();
    transport.expect_open().returning(move |url, _, _| match counter.fetch_add(1, Ordering::SeqCst) {
        0 => Ok(broken_stream(first.clone())),
        1 => Err(refused(url)),
        _ => Ok(line_stream(second.clone())),
    });
    let client = client_with(transport);
    let (seen, on_event) = collector();

    let dumping = client.clone();
    let task = tokio::spawn(async move { dumping.dump(EVENT_TYPE, policy(5), on_event).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        *seen.lock(),
        vec![(Some(1), "1".to_string()), (Some(2), "2".to_string())]
    );
    assert_eq!(client.state(), StreamState::Streaming);
    assert!(logs_contain("dump reconnection success"));

    client.close();
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn dump_should_exit_quietly_when_closed_during_retry() {
    let mut transport = MockTransport::new();
    transport
        .expect_open()
        .returning(|url, _, _| Err(refused(url)));
    let client = client_with(transport);

    let dumping = client.clone();
    let task = tokio::spawn(async move {
        dumping
            .dump(
                EVENT_TYPE,
                RetryPolicy {
                    max_retries: 100,
                    retry_sleep: Duration::from_millis(50),
                },
                |_, _| {},
            )
            .await
    });
    tokio::time::sleep(Duration::from_millis(120)).await;
    client.discovery_close();

    let result = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert!(client.is_discovery_closed());
    assert_eq!(client.state(), StreamState::Closed);
}

#[tokio::test]
async fn close_should_be_idempotent() {
    let client = client_with(MockTransport::new());

    assert!(client.close());
    assert!(!client.close());
    assert!(client.is_closed());
    assert_eq!(client.state(), StreamState::Closed);
}

#[tokio::test]
async fn dump_should_not_open_transport_after_close() {
    let client = client_with(MockTransport::new());
    client.close();

    let result = timeout(Duration::from_secs(1), client.dump(EVENT_TYPE, policy(3), |_, _| {}))
        .await
        .unwrap();

    assert!(result.is_ok());
    assert_eq!(client.state(), StreamState::Closed);
}

#[tokio::test]
async fn probe_should_record_reachability() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client =
        ServerInstanceClient::new(server("svr-1", port), test_sdk(), "", Arc::new(MockTransport::new())).unwrap();

    assert!(client.probe(Duration::from_millis(200)).await);
    assert!(client.is_socket_connected());

    drop(listener);
    assert!(!client.probe(Duration::from_millis(200)).await);
    assert!(!client.is_socket_connected());
}
