use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

/// Row listening defaults
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ListenConfig {
    /// Timeout applied when the caller does not pass one (unit: milliseconds)
    #[serde(default = "default_row_timeout_ms")]
    pub default_row_timeout_ms: u64,

    /// Period of the finished-listener purge (unit: milliseconds)
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            default_row_timeout_ms: default_row_timeout_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
        }
    }
}

impl ListenConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cleanup_interval_ms == 0 {
            return Err(invalid("listen.cleanup_interval_ms must be greater than 0"));
        }
        Ok(())
    }

    pub fn default_row_timeout(&self) -> Duration {
        Duration::from_millis(self.default_row_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

fn default_row_timeout_ms() -> u64 {
    500
}
fn default_cleanup_interval_ms() -> u64 {
    100
}
