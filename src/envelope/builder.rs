use chrono::DateTime;
use chrono::Utc;

use super::Envelope;
use super::ExtensionValue;
use crate::constants::*;
use crate::CloudEventsType;

/// Builds envelopes with a fresh id and the current time.
///
/// Codecs use it for full resource events, the resync reconciler uses it
/// directly for payload-less tombstones.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    source: String,
    event_type: CloudEventsType,
    extensions: Vec<(&'static str, ExtensionValue)>,
}

impl EventBuilder {
    pub fn new(source: impl Into<String>, event_type: CloudEventsType) -> Self {
        Self {
            source: source.into(),
            event_type,
            extensions: Vec::new(),
        }
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.extensions
            .push((EXT_RESOURCE_ID, ExtensionValue::String(resource_id.into())));
        self
    }

    pub fn with_resource_version(mut self, resource_version: i64) -> Self {
        self.extensions
            .push((EXT_RESOURCE_VERSION, ExtensionValue::Integer(resource_version)));
        self
    }

    pub fn with_resource_name(mut self, name: impl Into<String>) -> Self {
        self.extensions
            .push((EXT_RESOURCE_NAME, ExtensionValue::String(name.into())));
        self
    }

    pub fn with_cluster_name(mut self, cluster_name: impl Into<String>) -> Self {
        self.extensions
            .push((EXT_CLUSTER_NAME, ExtensionValue::String(cluster_name.into())));
        self
    }

    pub fn with_original_source(mut self, original_source: impl Into<String>) -> Self {
        self.extensions.push((
            EXT_ORIGINAL_SOURCE,
            ExtensionValue::String(original_source.into()),
        ));
        self
    }

    pub fn with_deletion_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.extensions
            .push((EXT_DELETION_TIMESTAMP, ExtensionValue::Time(timestamp)));
        self
    }

    pub fn with_sequence_id(mut self, sequence_id: impl Into<String>) -> Self {
        self.extensions
            .push((EXT_SEQUENCE_ID, ExtensionValue::String(sequence_id.into())));
        self
    }

    pub fn build(self) -> Envelope {
        let mut envelope = Envelope::new(
            uuid::Uuid::new_v4().to_string(),
            self.source,
            self.event_type.to_string(),
        );
        envelope.time = Some(Utc::now());
        for (name, value) in self.extensions {
            envelope.set_extension(name, value);
        }
        envelope
    }
}
