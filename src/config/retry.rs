use serde::Deserialize;
use serde::Serialize;

use super::config_error;
use crate::Result;

/// Basic retry policy template
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Maximum number of retries (0 means unlimited retries)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single operation timeout (unit: milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_op_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    pub fn unlimited(&self) -> bool {
        self.max_retries == 0
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.base_delay_ms > self.max_delay_ms {
            return Err(config_error(format!(
                "{name}: base_delay_ms {} exceeds max_delay_ms {}",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if self.timeout_ms == 0 {
            return Err(config_error(format!("{name}: timeout_ms must be positive")));
        }
        Ok(())
    }
}

/// Divide strategies by concern
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryPolicies {
    // Transport reconnect (unlimited by default)
    #[serde(default = "default_reconnect_policy")]
    pub reconnect: BackoffPolicy,

    // Per-item requeue backoff of the garbage collector work queue
    #[serde(default = "default_gc_policy")]
    pub gc: BackoffPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            reconnect: default_reconnect_policy(),
            gc: default_gc_policy(),
        }
    }
}

impl RetryPolicies {
    pub fn validate(&self) -> Result<()> {
        self.reconnect.validate("retry.reconnect")?;
        self.gc.validate("retry.gc")?;
        Ok(())
    }
}

fn default_reconnect_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 0,
        timeout_ms: 10_000,
        base_delay_ms: 500,
        max_delay_ms: 30_000,
    }
}
fn default_gc_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 0,
        timeout_ms: 5_000,
        base_delay_ms: 5,
        max_delay_ms: 1_000_000,
    }
}
fn default_max_retries() -> usize {
    3
}
fn default_op_timeout_ms() -> u64 {
    100
}
fn default_base_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    1000
}
