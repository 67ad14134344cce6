//! DTS SDK Error Hierarchy
//!
//! Errors are grouped by the subsystem that raises them. Only [`ListenError`]
//! ever reaches a caller's future; the others surface from construction,
//! configuration and background tasks.

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// SDK configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Event stream transport failures
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Service discovery failures
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Row listening failures
    #[error(transparent)]
    Listen(#[from] ListenError),

    /// Precondition violation by the caller, e.g. mutating a finalized builder
    #[error("Illegal state: {0}")]
    IllegalState(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// HTTP client failures (connect, TLS, request building)
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: Box<reqwest::Error>,
    },

    /// Server answered with a non-success status
    #[error("Server {url} responded with status {status}")]
    Status { url: String, status: u16 },

    /// Failures while reading the line stream
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The server ended the stream
    #[error("Event stream from {0} ended")]
    EndOfStream(String),

    /// Malformed server endpoint
    #[error("Invalid server endpoint: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Coordination backend is unreachable or rejected a command
    #[error(transparent)]
    Backend(#[from] redis::RedisError),

    /// Instance payload could not be encoded or decoded
    #[error(transparent)]
    Codec(#[from] serde_json::Error),

    /// Statically configured server entry is incomplete
    #[error("Invalid server definition: {0}")]
    InvalidServer(String),

    /// Statically configured sdk account is incomplete
    #[error("Invalid sdk account: {0}")]
    InvalidAccount(String),
}

/// Terminal failure of a [`ListenFuture`](crate::ListenFuture)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenError {
    /// Expected rows were not observed before the deadline
    #[error("DtsSdkListenTimeout after {0:?}")]
    Timeout(Duration),

    /// No stream is left that could deliver the expected rows
    #[error("Event transport failed: {0}")]
    Transport(String),

    /// The producing side was dropped before completion
    #[error("Listener was dropped before completion")]
    Cancelled,
}

impl ListenError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ListenError::Timeout(_))
    }
}
