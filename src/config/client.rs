use serde::Deserialize;
use serde::Serialize;

use super::config_error;
use crate::constants::DEFAULT_RECEIVE_QUEUE_SIZE;
use crate::constants::DEFAULT_WATCHER_BUFFER_SIZE;
use crate::Result;

/// Identity of the local client and its local queue sizes.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    /// Hub identity, used as envelope source by source clients
    #[serde(default = "default_source_id")]
    pub source_id: String,

    /// Managed cluster served by an agent client
    #[serde(default)]
    pub cluster_name: String,

    /// Agent identity; derived from the cluster name when empty
    #[serde(default)]
    pub agent_id: String,

    /// Hand-off queue between the receive loop and the role handler
    #[serde(default = "default_receive_queue_size")]
    pub receive_queue_size: usize,

    /// Per-watcher delivery channel size of the watcher store
    #[serde(default = "default_watcher_buffer_size")]
    pub watcher_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            source_id: default_source_id(),
            cluster_name: String::new(),
            agent_id: String::new(),
            receive_queue_size: default_receive_queue_size(),
            watcher_buffer_size: default_watcher_buffer_size(),
        }
    }
}

impl ClientConfig {
    pub fn agent_id(&self) -> String {
        if self.agent_id.is_empty() {
            format!("{}-agent", self.cluster_name)
        } else {
            self.agent_id.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_id.is_empty() {
            return Err(config_error("client.source_id cannot be empty"));
        }
        if self.source_id.contains(['+', '#', '/']) || self.cluster_name.contains(['+', '#', '/']) {
            return Err(config_error(
                "client.source_id and client.cluster_name cannot contain topic wildcards or separators",
            ));
        }
        if self.receive_queue_size == 0 {
            return Err(config_error("client.receive_queue_size must be positive"));
        }
        if self.watcher_buffer_size == 0 {
            return Err(config_error("client.watcher_buffer_size must be positive"));
        }
        Ok(())
    }
}

fn default_source_id() -> String {
    "hub".to_string()
}
fn default_receive_queue_size() -> usize {
    DEFAULT_RECEIVE_QUEUE_SIZE
}
fn default_watcher_buffer_size() -> usize {
    DEFAULT_WATCHER_BUFFER_SIZE
}
