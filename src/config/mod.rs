//! Configuration management for hub and agent clients and the broker.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Optional `config/default` file next to the working directory
//! - Configuration file from an explicit path or `CONFIG_PATH`
//! - Environment variable overrides (`SPOKESYNC__SECTION__KEY`)
//! - Component-wise validation
mod broker;
mod client;
mod gc;
mod resync;
mod retry;
mod transport;
pub use broker::*;
pub use client::*;
pub use gc::*;
pub use resync::*;
pub use retry::*;
pub use transport::*;

use std::env;

use ::config::Config;
use ::config::Environment;
use ::config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::ConfigError;
use crate::Error;
use crate::Result;

pub(crate) const ENV_PREFIX: &str = "SPOKESYNC";

/// Main configuration container
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. `config/default.*` if present
/// 3. Configuration file given explicitly or by `CONFIG_PATH`
/// 4. Environment variables (highest priority)
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    /// Client identity and local queue sizing
    #[serde(default)]
    pub client: ClientConfig,
    /// Which transport clients connect through
    #[serde(default)]
    pub transport: TransportConfig,
    /// Retry policies for reconnects and garbage collection
    #[serde(default)]
    pub retry: RetryPolicies,
    /// Resync triggers
    #[serde(default)]
    pub resync: ResyncConfig,
    /// Dependent garbage collector
    #[serde(default)]
    pub gc: GcConfig,
    /// Broker routing and listen address
    #[serde(default)]
    pub broker: BrokerConfig,
}

impl Settings {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// # Note
    /// Callers MUST call `validate()` before using the configuration.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::with_name("config/default").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        } else if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(environment());

        let settings: Self = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(&self, path: &str) -> Result<Self> {
        let settings: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Validates every subsystem and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.client.validate()?;
        self.transport.validate()?;
        self.retry.validate()?;
        self.resync.validate()?;
        self.gc.validate()?;
        self.broker.validate()?;
        Ok(self)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

pub(crate) fn config_error(message: impl Into<String>) -> Error {
    Error::Config(ConfigError::Message(message.into()))
}
