use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

/// Event stream connection and reconnect policy
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StreamConfig {
    /// Sleep between two reconnect attempts (unit: milliseconds)
    #[serde(default = "default_request_retry_sleep_ms")]
    pub request_retry_sleep_ms: u64,

    /// Maximum reconnect attempts after a stream failure
    #[serde(default = "default_request_max_retry")]
    pub request_max_retry: usize,

    /// TCP connect timeout of the HTTP transport (unit: milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Event type tag of change records; other records are dropped
    #[serde(default = "default_event_type")]
    pub event_type: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            request_retry_sleep_ms: default_request_retry_sleep_ms(),
            request_max_retry: default_request_max_retry(),
            connect_timeout_ms: default_connect_timeout_ms(),
            event_type: default_event_type(),
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<()> {
        if self.event_type.trim().is_empty() {
            return Err(invalid("stream.event_type cannot be empty"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(invalid("stream.connect_timeout_ms must be greater than 0"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.request_max_retry,
            retry_sleep: Duration::from_millis(self.request_retry_sleep_ms),
        }
    }
}

/// Bounded reconnect policy of a single stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub retry_sleep: Duration,
}

fn default_request_retry_sleep_ms() -> u64 {
    6000
}
fn default_request_max_retry() -> usize {
    10
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_event_type() -> String {
    "es-dml".to_string()
}
