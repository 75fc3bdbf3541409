use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Codec;
use crate::constants::ANNOTATION_SEQUENCE_ID;
use crate::constants::LABEL_ORIGINAL_SOURCE;
use crate::CloudEventsDataType;
use crate::CloudEventsType;
use crate::CodecError;
use crate::Envelope;
use crate::EventBuilder;
use crate::EventSubResource;
use crate::Resource;
use crate::Result;
use crate::SequenceIdGenerator;

/// Codec carrying the whole resource as the JSON payload.
///
/// Identity always travels in extensions; on decode the extensions win over
/// whatever metadata the payload holds. Tombstones (envelopes with a deletion
/// timestamp) may omit the payload and decode to a metadata-only resource.
pub struct JsonCodec<R> {
    data_type: CloudEventsDataType,
    sequence: SequenceIdGenerator,
    _resource: PhantomData<fn() -> R>,
}

impl<R> JsonCodec<R> {
    pub fn new(data_type: CloudEventsDataType) -> Self {
        Self {
            data_type,
            sequence: SequenceIdGenerator::new(),
            _resource: PhantomData,
        }
    }
}

impl<R> Codec<R> for JsonCodec<R>
where
    R: Resource + Serialize + DeserializeOwned + Default,
{
    fn event_data_type(&self) -> &CloudEventsDataType {
        &self.data_type
    }

    fn encode(&self, source: &str, event_type: &CloudEventsType, resource: &R) -> Result<Envelope> {
        if event_type.data_type != self.data_type {
            return Err(CodecError::UnsupportedDataType(event_type.data_type.to_string()).into());
        }

        let meta = resource.meta();
        let mut builder = EventBuilder::new(source, event_type.clone())
            .with_resource_id(&meta.uid)
            .with_resource_version(meta.resource_version_number()?)
            .with_resource_name(&meta.name)
            .with_cluster_name(&meta.namespace);
        if let Some(original_source) = meta.original_source() {
            builder = builder.with_original_source(original_source);
        }
        if let Some(deletion_timestamp) = meta.deletion_timestamp {
            builder = builder.with_deletion_timestamp(deletion_timestamp);
        }
        if event_type.sub_resource == EventSubResource::Status {
            builder = builder.with_sequence_id(self.sequence.next_id());
        }

        let mut envelope = builder.build();
        envelope.set_json_data(resource)?;
        Ok(envelope)
    }

    fn decode(&self, envelope: &Envelope) -> Result<R> {
        let event_type = envelope
            .cloud_events_type()
            .map_err(|e| envelope.decode_error(e.to_string()))?;
        if event_type.data_type != self.data_type {
            return Err(envelope.decode_error(format!(
                "unsupported data type {}",
                event_type.data_type
            )));
        }

        let resource_id = envelope
            .resource_id()
            .ok_or_else(|| envelope.decode_error("missing resourceid extension"))?;
        let resource_version = envelope
            .resource_version()?
            .ok_or_else(|| envelope.decode_error("missing resourceversion extension"))?;
        let cluster_name = envelope
            .cluster_name()
            .ok_or_else(|| envelope.decode_error("missing clustername extension"))?;
        let deletion_timestamp = envelope.deletion_timestamp()?;

        let mut resource = match envelope.json_data::<R>()? {
            Some(resource) => resource,
            None if deletion_timestamp.is_some() => R::default(),
            None => return Err(envelope.decode_error("missing data")),
        };

        let meta = resource.meta_mut();
        meta.uid = resource_id;
        meta.resource_version = resource_version.to_string();
        meta.namespace = cluster_name;
        if let Some(name) = envelope.resource_name() {
            meta.name = name;
        }
        if deletion_timestamp.is_some() {
            meta.deletion_timestamp = deletion_timestamp;
        }

        let original_source = match event_type.sub_resource {
            EventSubResource::Spec => envelope
                .original_source()
                .or_else(|| Some(envelope.source.clone())),
            EventSubResource::Status => envelope.original_source(),
        };
        if let Some(original_source) = original_source {
            meta.labels
                .insert(LABEL_ORIGINAL_SOURCE.to_string(), original_source);
        }
        if let Some(sequence_id) = envelope.sequence_id() {
            meta.annotations
                .insert(ANNOTATION_SEQUENCE_ID.to_string(), sequence_id);
        }

        Ok(resource)
    }
}
