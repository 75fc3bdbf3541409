use serde::Deserialize;
use serde::Serialize;

use super::config_error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResyncConfig {
    /// Agents request a spec resync after every successful reconnect
    #[serde(default = "default_resync_on_reconnect")]
    pub resync_on_reconnect: bool,

    /// Periodic resync interval (unit: seconds, 0 disables)
    #[serde(default)]
    pub interval_in_secs: u64,

    /// Upper bound for how long a resync response may run (unit: milliseconds)
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            resync_on_reconnect: default_resync_on_reconnect(),
            interval_in_secs: 0,
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl ResyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.response_timeout_ms == 0 {
            return Err(config_error("resync.response_timeout_ms must be positive"));
        }
        Ok(())
    }
}

fn default_resync_on_reconnect() -> bool {
    true
}
fn default_response_timeout_ms() -> u64 {
    60_000
}
