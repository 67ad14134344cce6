use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use futures::TryStreamExt;
#[cfg(test)]
use mockall::automock;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tracing::debug;

use super::EventLineCodec;
use super::StreamLine;
use crate::constants::AUTHORIZATION_FETCH_HEADER;
use crate::StreamConfig;
use crate::StreamError;

/// Upper bound of one protocol line (1 MiB)
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Lines of an open event stream; an `Err` item ends the connection
pub type LineStream = BoxStream<'static, std::result::Result<StreamLine, StreamError>>;

/// Opens authenticated event streams.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        url: &str,
        account: &str,
        password: &str,
    ) -> std::result::Result<LineStream, StreamError>;
}

/// Streaming HTTP GET with basic auth.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &StreamConfig) -> std::result::Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| StreamError::Request {
                url: String::new(),
                source: Box::new(e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(
        &self,
        url: &str,
        account: &str,
        password: &str,
    ) -> std::result::Result<LineStream, StreamError> {
        let response = self
            .client
            .get(url)
            .basic_auth(account, Some(password))
            .header(AUTHORIZATION_FETCH_HEADER, "true")
            .send()
            .await
            .map_err(|e| StreamError::Request {
                url: url.to_string(),
                source: Box::new(e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        debug!(%url, "event stream opened");

        let body = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        let lines = FramedRead::new(StreamReader::new(body), EventLineCodec::new(MAX_LINE_LENGTH)).map_err(StreamError::Io);
        Ok(lines.boxed())
    }
}
