use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::config_error;
use crate::constants::DEFAULT_SUBSCRIBER_BUFFER_SIZE;
use crate::Result;

pub const SOURCE_PLACEHOLDER: &str = "{source}";
pub const CLUSTER_PLACEHOLDER: &str = "{cluster}";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrokerConfig {
    /// gRPC listen address of the broker binary
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Per-subscriber delivery buffer
    #[serde(default = "default_subscriber_buffer_size")]
    pub subscriber_buffer_size: usize,

    #[serde(default)]
    pub topics: TopicsConfig,

    /// Directory of the broker log file
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            subscriber_buffer_size: default_subscriber_buffer_size(),
            topics: TopicsConfig::default(),
            log_dir: default_log_dir(),
        }
    }
}

impl BrokerConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_address.parse().map_err(|e| {
            config_error(format!(
                "broker.listen_address {} is invalid: {e}",
                self.listen_address
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        if self.subscriber_buffer_size == 0 {
            return Err(config_error("broker.subscriber_buffer_size must be positive"));
        }
        self.topics.validate()
    }
}

/// MQTT style topic templates. `{source}` and `{cluster}` are substituted per
/// event; subscriptions substitute `+` for the side that is not pinned.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TopicsConfig {
    /// Hub to one cluster
    #[serde(default = "default_source_events")]
    pub source_events: String,

    /// One cluster to one hub
    #[serde(default = "default_agent_events")]
    pub agent_events: String,

    /// Hub to every cluster
    #[serde(default = "default_source_broadcast")]
    pub source_broadcast: String,

    /// One cluster to every hub
    #[serde(default = "default_agent_broadcast")]
    pub agent_broadcast: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            source_events: default_source_events(),
            agent_events: default_agent_events(),
            source_broadcast: default_source_broadcast(),
            agent_broadcast: default_agent_broadcast(),
        }
    }
}

impl TopicsConfig {
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("source_events", &self.source_events, true, true),
            ("agent_events", &self.agent_events, true, true),
            ("source_broadcast", &self.source_broadcast, true, false),
            ("agent_broadcast", &self.agent_broadcast, false, true),
        ];
        for (name, template, needs_source, needs_cluster) in checks {
            if template.contains(['+', '#']) {
                return Err(config_error(format!(
                    "broker.topics.{name} {template} cannot contain wildcards"
                )));
            }
            if needs_source && !template.contains(SOURCE_PLACEHOLDER) {
                return Err(config_error(format!(
                    "broker.topics.{name} {template} must contain {SOURCE_PLACEHOLDER}"
                )));
            }
            if needs_cluster && !template.contains(CLUSTER_PLACEHOLDER) {
                return Err(config_error(format!(
                    "broker.topics.{name} {template} must contain {CLUSTER_PLACEHOLDER}"
                )));
            }
        }
        Ok(())
    }
}

fn default_listen_address() -> String {
    "0.0.0.0:8090".to_string()
}
fn default_subscriber_buffer_size() -> usize {
    DEFAULT_SUBSCRIBER_BUFFER_SIZE
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
fn default_source_events() -> String {
    "sources/{source}/clusters/{cluster}/sourceevents".to_string()
}
fn default_agent_events() -> String {
    "sources/{source}/clusters/{cluster}/agentevents".to_string()
}
fn default_source_broadcast() -> String {
    "sources/{source}/sourcebroadcast".to_string()
}
fn default_agent_broadcast() -> String {
    "clusters/{cluster}/agentbroadcast".to_string()
}
