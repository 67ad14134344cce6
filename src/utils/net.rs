use std::time::Duration;

use tokio::net::TcpStream;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

const LOOPBACK: &str = "127.0.0.1";

/// Builds `http://{ip}:{port}{context}{path}`; `context` is either empty or starts with `/`.
pub(crate) fn http_url(
    ip: &str,
    port: u16,
    context: &str,
    path: &str,
) -> String {
    let host = ip.trim_start_matches("http://").trim_start_matches("https://");
    format!("http://{}:{}{}{}", host, port, context.trim_end_matches('/'), path)
}

/// Best-effort TCP connect used to record reachability. Never fails.
pub(crate) async fn probe(
    addr: &str,
    connect_timeout: Duration,
) -> bool {
    match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(%addr, "reachability probe failed: {}", e);
            false
        }
        Err(_) => {
            debug!(%addr, "reachability probe timed out after {:?}", connect_timeout);
            false
        }
    }
}

/// Address of the outbound interface, falling back to loopback.
///
/// Connecting a UDP socket sends nothing; it only makes the kernel pick a route.
pub(crate) async fn detect_local_ip() -> String {
    let detect = async {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect("8.8.8.8:80").await?;
        socket.local_addr()
    };
    match detect.await {
        Ok(addr) if !addr.ip().is_unspecified() => addr.ip().to_string(),
        Ok(_) => LOOPBACK.to_string(),
        Err(e) => {
            debug!("local ip detection failed, using loopback: {}", e);
            LOOPBACK.to_string()
        }
    }
}
