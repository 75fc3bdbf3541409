//! CloudEvents-style envelope carried over every transport.
//!
//! An [`Envelope`] holds the standard context attributes, an opaque payload
//! and a flat set of extension attributes. The protocol relies on a handful of
//! named extensions (see [`crate::constants`]) for resource identity and
//! versioning; transports only ever move envelopes around.
//!
//! Envelopes have a structured JSON encoding used by byte-oriented transports:
//! context attributes and extensions are top-level members, JSON payloads are
//! embedded under `data`, any other payload is base64 encoded under
//! `data_base64`.

mod builder;
mod payload;

pub use builder::*;
pub use payload::*;

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::constants::*;
use crate::CloudEventsType;
use crate::CodecError;
use crate::Error;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Time(DateTime<Utc>),
}

impl fmt::Display for ExtensionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionValue::String(s) => f.write_str(s),
            ExtensionValue::Integer(i) => write!(f, "{i}"),
            ExtensionValue::Boolean(b) => write!(f, "{b}"),
            ExtensionValue::Time(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

impl From<&str> for ExtensionValue {
    fn from(s: &str) -> Self {
        ExtensionValue::String(s.to_string())
    }
}

impl From<String> for ExtensionValue {
    fn from(s: String) -> Self {
        ExtensionValue::String(s)
    }
}

impl From<i64> for ExtensionValue {
    fn from(i: i64) -> Self {
        ExtensionValue::Integer(i)
    }
}

impl From<bool> for ExtensionValue {
    fn from(b: bool) -> Self {
        ExtensionValue::Boolean(b)
    }
}

impl From<DateTime<Utc>> for ExtensionValue {
    fn from(t: DateTime<Utc>) -> Self {
        ExtensionValue::Time(t)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: String,
    pub source: String,
    pub spec_version: String,
    pub event_type: String,
    pub time: Option<DateTime<Utc>>,
    pub data_content_type: Option<String>,
    pub data: Option<Vec<u8>>,
    pub extensions: BTreeMap<String, ExtensionValue>,
}

impl Envelope {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            spec_version: CLOUDEVENTS_SPEC_VERSION.to_string(),
            event_type: event_type.into(),
            time: None,
            data_content_type: None,
            data: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn cloud_events_type(&self) -> Result<CloudEventsType> {
        self.event_type.parse()
    }

    pub fn set_extension(&mut self, name: &str, value: impl Into<ExtensionValue>) {
        self.extensions.insert(name.to_string(), value.into());
    }

    pub fn extension(&self, name: &str) -> Option<&ExtensionValue> {
        self.extensions.get(name)
    }

    pub fn string_extension(&self, name: &str) -> Option<String> {
        self.extensions.get(name).map(|v| v.to_string())
    }

    /// Integer extensions may arrive as strings from byte-oriented transports.
    pub fn integer_extension(&self, name: &str) -> Result<Option<i64>> {
        match self.extensions.get(name) {
            None => Ok(None),
            Some(ExtensionValue::Integer(i)) => Ok(Some(*i)),
            Some(ExtensionValue::String(s)) => s
                .parse::<i64>()
                .map(Some)
                .map_err(|e| self.decode_error(format!("extension {name} is not an integer: {e}"))),
            Some(other) => Err(self.decode_error(format!(
                "extension {name} has unexpected value {other}"
            ))),
        }
    }

    pub fn time_extension(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        match self.extensions.get(name) {
            None => Ok(None),
            Some(ExtensionValue::Time(t)) => Ok(Some(*t)),
            Some(ExtensionValue::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| self.decode_error(format!("extension {name} is not a timestamp: {e}"))),
            Some(other) => Err(self.decode_error(format!(
                "extension {name} has unexpected value {other}"
            ))),
        }
    }

    pub fn resource_id(&self) -> Option<String> {
        self.string_extension(EXT_RESOURCE_ID)
    }

    pub fn resource_version(&self) -> Result<Option<i64>> {
        self.integer_extension(EXT_RESOURCE_VERSION)
    }

    pub fn resource_name(&self) -> Option<String> {
        self.string_extension(EXT_RESOURCE_NAME)
    }

    pub fn cluster_name(&self) -> Option<String> {
        self.string_extension(EXT_CLUSTER_NAME)
    }

    pub fn original_source(&self) -> Option<String> {
        self.string_extension(EXT_ORIGINAL_SOURCE)
    }

    pub fn deletion_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        self.time_extension(EXT_DELETION_TIMESTAMP)
    }

    pub fn sequence_id(&self) -> Option<String> {
        self.string_extension(EXT_SEQUENCE_ID)
    }

    pub fn set_json_data<T: Serialize>(&mut self, payload: &T) -> Result<()> {
        self.data = Some(serde_json::to_vec(payload)?);
        self.data_content_type = Some(CONTENT_TYPE_JSON.to_string());
        Ok(())
    }

    /// Returns `None` when the envelope carries no payload.
    pub fn json_data<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.data {
            None => Ok(None),
            Some(bytes) if bytes.is_empty() => Ok(None),
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| self.decode_error(format!("malformed payload: {e}"))),
        }
    }

    pub(crate) fn decode_error(&self, reason: impl Into<String>) -> Error {
        CodecError::Decode {
            event_id: self.id.clone(),
            reason: reason.into(),
        }
        .into()
    }

    fn is_json_payload(&self) -> bool {
        match &self.data_content_type {
            None => true,
            Some(ct) => ct == CONTENT_TYPE_JSON || ct.ends_with("+json"),
        }
    }

    /// Encodes the envelope in CloudEvents structured JSON mode.
    pub fn to_structured_json(&self) -> Result<Vec<u8>> {
        let mut object = Map::new();
        object.insert("specversion".into(), Value::String(self.spec_version.clone()));
        object.insert("id".into(), Value::String(self.id.clone()));
        object.insert("source".into(), Value::String(self.source.clone()));
        object.insert("type".into(), Value::String(self.event_type.clone()));
        if let Some(time) = self.time {
            object.insert(
                "time".into(),
                Value::String(time.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            );
        }
        if let Some(ct) = &self.data_content_type {
            object.insert("datacontenttype".into(), Value::String(ct.clone()));
        }

        for (name, value) in &self.extensions {
            let value = match value {
                ExtensionValue::String(s) => Value::String(s.clone()),
                ExtensionValue::Integer(i) => Value::from(*i),
                ExtensionValue::Boolean(b) => Value::Bool(*b),
                ExtensionValue::Time(_) => Value::String(value.to_string()),
            };
            object.insert(name.clone(), value);
        }

        if let Some(data) = &self.data {
            let embedded = if self.is_json_payload() {
                serde_json::from_slice::<Value>(data).ok()
            } else {
                None
            };
            match embedded {
                Some(json) => {
                    object.insert("data".into(), json);
                }
                None => {
                    object.insert("data_base64".into(), Value::String(BASE64.encode(data)));
                }
            }
        }

        Ok(serde_json::to_vec(&Value::Object(object))?)
    }

    pub fn from_structured_json(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        let Value::Object(mut object) = value else {
            return Err(CodecError::Decode {
                event_id: String::new(),
                reason: "structured event is not a JSON object".to_string(),
            }
            .into());
        };

        let mut take_string = |key: &str| -> Option<String> {
            match object.remove(key) {
                Some(Value::String(s)) => Some(s),
                _ => None,
            }
        };

        let id = take_string("id").unwrap_or_default();
        let missing = |attribute: &str| -> Error {
            CodecError::Decode {
                event_id: id.clone(),
                reason: format!("missing required attribute {attribute}"),
            }
            .into()
        };
        let source = take_string("source").ok_or_else(|| missing("source"))?;
        let event_type = take_string("type").ok_or_else(|| missing("type"))?;
        let spec_version =
            take_string("specversion").unwrap_or_else(|| CLOUDEVENTS_SPEC_VERSION.to_string());
        let data_content_type = take_string("datacontenttype");
        let time = match take_string("time") {
            Some(t) => Some(
                DateTime::parse_from_rfc3339(&t)
                    .map_err(|e| CodecError::Decode {
                        event_id: id.clone(),
                        reason: format!("malformed time {t}: {e}"),
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        let data = match (object.remove("data"), object.remove("data_base64")) {
            (Some(json), _) => Some(serde_json::to_vec(&json)?),
            (None, Some(Value::String(encoded))) => {
                Some(BASE64.decode(encoded.as_bytes()).map_err(|e| CodecError::Decode {
                    event_id: id.clone(),
                    reason: format!("malformed data_base64: {e}"),
                })?)
            }
            _ => None,
        };

        let mut extensions = BTreeMap::new();
        for (name, value) in object {
            let value = match value {
                Value::String(s) => ExtensionValue::String(s),
                Value::Bool(b) => ExtensionValue::Boolean(b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => ExtensionValue::Integer(i),
                    None => ExtensionValue::String(n.to_string()),
                },
                other => ExtensionValue::String(other.to_string()),
            };
            extensions.insert(name, value);
        }

        Ok(Self {
            id,
            source,
            spec_version,
            event_type,
            time,
            data_content_type,
            data,
            extensions,
        })
    }
}

#[cfg(test)]
mod envelope_test;
