//! Resource model shared by codecs, stores and the garbage collector.
//!
//! Resources are opaque to the protocol apart from their [`ObjectMeta`]. Any
//! type implementing [`Resource`] can be synchronized; [`GenericResource`] is
//! a schemaless implementation with JSON spec and status.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::constants::ANNOTATION_SEQUENCE_ID;
use crate::constants::LABEL_ORIGINAL_SOURCE;
use crate::CodecError;
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Numeric-comparable version string, empty means 0
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

impl ObjectMeta {
    pub fn namespaced_name(&self) -> NamespacedName {
        NamespacedName::new(&self.namespace, &self.name)
    }

    /// Parses `resource_version` as an integer.
    pub fn resource_version_number(&self) -> Result<i64> {
        parse_resource_version(&self.resource_version)
    }

    pub fn sequence_id(&self) -> Option<&str> {
        self.annotations
            .get(ANNOTATION_SEQUENCE_ID)
            .map(String::as_str)
    }

    pub fn original_source(&self) -> Option<&str> {
        self.labels.get(LABEL_ORIGINAL_SOURCE).map(String::as_str)
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_owner(&self, owner_uid: &str) -> bool {
        self.owner_references.iter().any(|o| o.uid == owner_uid)
    }
}

pub(crate) fn parse_resource_version(version: &str) -> Result<i64> {
    if version.is_empty() {
        return Ok(0);
    }
    version.parse::<i64>().map_err(|e| {
        CodecError::Encode(format!("resource version {version:?} is not numeric: {e}")).into()
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

impl OwnerReference {
    /// Splits `api_version` into `(group, version)`; the core group is empty.
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Anything that can be synchronized between hub and agents.
pub trait Resource: Clone + Send + Sync + 'static {
    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;
}

/// Computes the opaque status fingerprint used for status resync.
pub type StatusHashFn<R> = Arc<dyn Fn(&R) -> Result<String> + Send + Sync>;

/// Schemaless resource with JSON spec and status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericResource {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub spec: serde_json::Value,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub status: serde_json::Value,
}

impl GenericResource {
    pub fn new(namespace: &str, name: &str, uid: &str, resource_version: i64) -> Self {
        Self {
            metadata: ObjectMeta {
                uid: uid.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
                resource_version: resource_version.to_string(),
                ..Default::default()
            },
            spec: serde_json::Value::Null,
            status: serde_json::Value::Null,
        }
    }

    pub fn with_spec(mut self, spec: serde_json::Value) -> Self {
        self.spec = spec;
        self
    }

    pub fn with_status(mut self, status: serde_json::Value) -> Self {
        self.status = status;
        self
    }
}

impl Resource for GenericResource {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// SHA-256 of the JSON encoding of `status`, hex encoded.
pub fn json_status_hash<T: Serialize>(status: &T) -> Result<String> {
    let bytes = serde_json::to_vec(status)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Default status hash for [`GenericResource`].
pub fn generic_status_hash() -> StatusHashFn<GenericResource> {
    Arc::new(|resource: &GenericResource| json_status_hash(&resource.status))
}

#[cfg(test)]
mod resource_test;
