use serde::Deserialize;
use serde::Serialize;

use super::config_error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GcConfig {
    /// Number of concurrent delete workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Delay before re-checking an owner whose existence check was inconclusive
    /// (unit: milliseconds)
    #[serde(default = "default_owner_check_retry_ms")]
    pub owner_check_retry_ms: u64,

    /// Interval of the full orphan scan over the owner index (unit: seconds, 0 disables)
    #[serde(default = "default_orphan_scan_interval_in_secs")]
    pub orphan_scan_interval_in_secs: u64,

    /// Owner kinds the collector is allowed to act on
    #[serde(default)]
    pub owner_filters: Vec<OwnerFilterConfig>,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            owner_check_retry_ms: default_owner_check_retry_ms(),
            orphan_scan_interval_in_secs: default_orphan_scan_interval_in_secs(),
            owner_filters: Vec::new(),
        }
    }
}

impl GcConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(config_error("gc.workers must be positive"));
        }
        for filter in &self.owner_filters {
            if filter.version.is_empty() || filter.resource.is_empty() || filter.kind.is_empty() {
                return Err(config_error(format!(
                    "gc.owner_filters entry {filter:?} needs version, resource and kind"
                )));
            }
        }
        Ok(())
    }
}

/// One owner kind: `{group, version, resource}` plus optional selectors
/// restricting which owners are considered.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OwnerFilterConfig {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub resource: String,
    pub kind: String,
    #[serde(default)]
    pub label_selector: Option<String>,
    #[serde(default)]
    pub field_selector: Option<String>,
}

fn default_workers() -> usize {
    1
}
fn default_owner_check_retry_ms() -> u64 {
    5_000
}
fn default_orphan_scan_interval_in_secs() -> u64 {
    300
}
