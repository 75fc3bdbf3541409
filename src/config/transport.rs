use serde::Deserialize;
use serde::Serialize;
use tonic::transport::Uri;

use super::config_error;
use crate::Result;

/// Which transport clients connect through.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// In-process broker, for single-process deployments and tests
    #[default]
    Memory,
    /// Remote broker reached over gRPC
    Grpc(GrpcTransportConfig),
}

impl TransportConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            TransportConfig::Memory => Ok(()),
            TransportConfig::Grpc(grpc) => grpc.validate(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GrpcTransportConfig {
    /// Broker endpoint, e.g. `http://broker:8090`
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per publish deadline
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub keep_alive: KeepAliveConfig,

    /// Compress requests and responses with gzip
    #[serde(default)]
    pub gzip: bool,
}

impl Default for GrpcTransportConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            keep_alive: KeepAliveConfig::default(),
            gzip: false,
        }
    }
}

impl GrpcTransportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(config_error("transport.url is required for the grpc transport"));
        }
        self.url
            .parse::<Uri>()
            .map_err(|e| config_error(format!("transport.url {} is invalid: {e}", self.url)))?;
        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(config_error("transport timeouts must be positive"));
        }
        self.keep_alive.validate()
    }
}

/// HTTP/2 keepalive settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct KeepAliveConfig {
    #[serde(default)]
    pub enable: bool,

    /// Interval between keepalive pings (unit: milliseconds)
    #[serde(default = "default_keep_alive_time_ms")]
    pub time_ms: u64,

    /// Wait for a ping ack before closing the connection (unit: milliseconds)
    #[serde(default = "default_keep_alive_timeout_ms")]
    pub timeout_ms: u64,

    /// Ping even when no stream is open
    #[serde(default)]
    pub permit_without_stream: bool,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enable: false,
            time_ms: default_keep_alive_time_ms(),
            timeout_ms: default_keep_alive_timeout_ms(),
            permit_without_stream: false,
        }
    }
}

impl KeepAliveConfig {
    fn validate(&self) -> Result<()> {
        if self.enable && (self.time_ms == 0 || self.timeout_ms == 0) {
            return Err(config_error(
                "transport.keep_alive time_ms and timeout_ms must be positive when enabled",
            ));
        }
        Ok(())
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    5_000
}
fn default_keep_alive_time_ms() -> u64 {
    30_000
}
fn default_keep_alive_timeout_ms() -> u64 {
    10_000
}
