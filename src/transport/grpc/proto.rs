//! Wire messages of the `spokesync.cloudevent.v1.CloudEventService`.
//!
//! `CloudEvent` follows the CloudEvents protobuf format: required context
//! attributes as fields, everything else in `attributes`.

use std::collections::HashMap;

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;

use crate::constants::CLOUDEVENTS_SPEC_VERSION;
use crate::CodecError;
use crate::Envelope;
use crate::Error;
use crate::ExtensionValue;

include!(concat!(env!("OUT_DIR"), "/spokesync.cloudevent.v1.CloudEventService.rs"));

const ATTR_TIME: &str = "time";
const ATTR_DATA_CONTENT_TYPE: &str = "datacontenttype";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloudEvent {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub source: String,
    #[prost(string, tag = "3")]
    pub spec_version: String,
    #[prost(string, tag = "4")]
    pub r#type: String,
    #[prost(map = "string, message", tag = "5")]
    pub attributes: HashMap<String, CloudEventAttributeValue>,
    #[prost(oneof = "cloud_event::Data", tags = "6, 7")]
    pub data: Option<cloud_event::Data>,
}

pub mod cloud_event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Data {
        #[prost(bytes = "vec", tag = "6")]
        BinaryData(Vec<u8>),
        #[prost(string, tag = "7")]
        TextData(String),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloudEventAttributeValue {
    #[prost(oneof = "cloud_event_attribute_value::Attr", tags = "1, 2, 3, 4")]
    pub attr: Option<cloud_event_attribute_value::Attr>,
}

pub mod cloud_event_attribute_value {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Attr {
        #[prost(bool, tag = "1")]
        CeBoolean(bool),
        #[prost(int64, tag = "2")]
        CeInteger(i64),
        #[prost(string, tag = "3")]
        CeString(String),
        /// RFC 3339
        #[prost(string, tag = "4")]
        CeTimestamp(String),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PublishRequest {
    /// Concrete topic resolved by the publisher
    #[prost(string, tag = "1")]
    pub topic: String,
    #[prost(message, optional, tag = "2")]
    pub event: Option<CloudEvent>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PublishResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscriptionRequest {
    #[prost(string, tag = "1")]
    pub client_id: String,
    /// Topic filters, `+` and `#` wildcards allowed
    #[prost(string, repeated, tag = "2")]
    pub topics: Vec<String>,
}

use cloud_event_attribute_value::Attr;

fn attribute(attr: Attr) -> CloudEventAttributeValue {
    CloudEventAttributeValue { attr: Some(attr) }
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

impl From<&Envelope> for CloudEvent {
    fn from(envelope: &Envelope) -> Self {
        let mut attributes = HashMap::new();
        if let Some(time) = &envelope.time {
            attributes.insert(ATTR_TIME.to_string(), attribute(Attr::CeTimestamp(format_time(time))));
        }
        if let Some(ct) = &envelope.data_content_type {
            attributes.insert(ATTR_DATA_CONTENT_TYPE.to_string(), attribute(Attr::CeString(ct.clone())));
        }
        for (name, value) in &envelope.extensions {
            let attr = match value {
                ExtensionValue::String(s) => Attr::CeString(s.clone()),
                ExtensionValue::Integer(i) => Attr::CeInteger(*i),
                ExtensionValue::Boolean(b) => Attr::CeBoolean(*b),
                ExtensionValue::Time(t) => Attr::CeTimestamp(format_time(t)),
            };
            attributes.insert(name.clone(), attribute(attr));
        }

        CloudEvent {
            id: envelope.id.clone(),
            source: envelope.source.clone(),
            spec_version: envelope.spec_version.clone(),
            r#type: envelope.event_type.clone(),
            attributes,
            data: envelope.data.clone().map(cloud_event::Data::BinaryData),
        }
    }
}

impl TryFrom<CloudEvent> for Envelope {
    type Error = Error;

    fn try_from(event: CloudEvent) -> Result<Self, Self::Error> {
        let decode_error = |reason: String| -> Error {
            CodecError::Decode {
                event_id: event.id.clone(),
                reason,
            }
            .into()
        };
        if event.source.is_empty() || event.r#type.is_empty() {
            return Err(decode_error("missing source or type".to_string()));
        }
        let parse_time = |value: &str| -> Result<DateTime<Utc>, Error> {
            DateTime::parse_from_rfc3339(value)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| decode_error(format!("malformed timestamp {value}: {e}")))
        };

        let mut envelope = Envelope::new(event.id.clone(), event.source.clone(), event.r#type.clone());
        if !event.spec_version.is_empty() {
            envelope.spec_version = event.spec_version.clone();
        } else {
            envelope.spec_version = CLOUDEVENTS_SPEC_VERSION.to_string();
        }

        for (name, value) in &event.attributes {
            let Some(attr) = &value.attr else {
                continue;
            };
            match (name.as_str(), attr) {
                (ATTR_TIME, Attr::CeTimestamp(t) | Attr::CeString(t)) => {
                    envelope.time = Some(parse_time(t)?);
                }
                (ATTR_DATA_CONTENT_TYPE, Attr::CeString(ct)) => {
                    envelope.data_content_type = Some(ct.clone());
                }
                (_, Attr::CeString(s)) => envelope.set_extension(name, s.clone()),
                (_, Attr::CeInteger(i)) => envelope.set_extension(name, *i),
                (_, Attr::CeBoolean(b)) => envelope.set_extension(name, *b),
                (_, Attr::CeTimestamp(t)) => envelope.set_extension(name, parse_time(t)?),
            }
        }

        envelope.data = match &event.data {
            Some(cloud_event::Data::BinaryData(bytes)) => Some(bytes.clone()),
            Some(cloud_event::Data::TextData(text)) => Some(text.clone().into_bytes()),
            None => None,
        };
        Ok(envelope)
    }
}
