//! Configuration management module for the DTS SDK.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Component-wise validation
mod discovery;
mod listen;
mod stream;
pub use discovery::*;
pub use listen::*;
pub use stream::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "DTS_SDK";

/// Main configuration container for the SDK
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables prefixed with `DTS_SDK__` (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct SdkConfig {
    /// Event stream connection and reconnect parameters
    #[serde(default)]
    pub stream: StreamConfig,
    /// Server discovery backend selection and parameters
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Row listening defaults
    #[serde(default)]
    pub listen: ListenConfig,
}

impl Debug for SdkConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SdkConfig")
            .field("stream", &self.stream)
            .field("discovery", &self.discovery.kind)
            .field("listen", &self.listen)
            .finish()
    }
}

impl SdkConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `DTS_SDK__` prefix (highest priority)
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("DTS_SDK__STREAM__REQUEST_MAX_RETRY", "3");
    /// let cfg = SdkConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns validated instance.
    pub fn validate(self) -> Result<Self> {
        self.stream.validate()?;
        self.discovery.validate()?;
        self.listen.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

pub(crate) fn invalid(message: impl Into<String>) -> crate::Error {
    ConfigError::Message(message.into()).into()
}
