use serde::Deserialize;
use serde::Serialize;

use super::Envelope;
use crate::Result;

/// Agent-side view of one resource's version, sent in spec resync requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVersion {
    #[serde(rename = "resourceID")]
    pub resource_id: String,
    #[serde(rename = "resourceVersion")]
    pub resource_version: i64,
}

/// Payload of a spec resync request. An empty list asks for everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVersionList {
    #[serde(rename = "resourceVersions", default)]
    pub versions: Vec<ResourceVersion>,
}

/// Hub-side view of one resource's status fingerprint, sent in status resync requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatusHash {
    #[serde(rename = "resourceID")]
    pub resource_id: String,
    #[serde(rename = "statusHash")]
    pub status_hash: String,
}

/// Payload of a status resync request. An empty list asks for everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatusHashList {
    #[serde(rename = "statusHashes", default)]
    pub hashes: Vec<ResourceStatusHash>,
}

impl ResourceVersionList {
    /// A request without payload is treated as an empty list.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        Ok(envelope.json_data::<Self>()?.unwrap_or_default())
    }

    pub fn find(&self, resource_id: &str) -> Option<i64> {
        self.versions
            .iter()
            .find(|v| v.resource_id == resource_id)
            .map(|v| v.resource_version)
    }
}

impl ResourceStatusHashList {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        Ok(envelope.json_data::<Self>()?.unwrap_or_default())
    }

    pub fn find(&self, resource_id: &str) -> Option<&str> {
        self.hashes
            .iter()
            .find(|h| h.resource_id == resource_id)
            .map(|h| h.status_hash.as_str())
    }
}
