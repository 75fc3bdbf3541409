//! Resource <-> envelope codecs.
//!
//! A [`Codec`] serves exactly one [`CloudEventsDataType`]. Clients hold a
//! [`CodecRegistry`] and pick the codec by the data type of the event at hand;
//! events for unregistered data types are ignored by the clients.

mod json;

pub use json::*;

use std::collections::HashMap;
use std::sync::Arc;

use crate::CloudEventsDataType;
use crate::CloudEventsType;
use crate::CodecError;
use crate::Envelope;
use crate::Result;

pub trait Codec<R>: Send + Sync + 'static {
    /// The single data type this codec serves.
    fn event_data_type(&self) -> &CloudEventsDataType;

    /// Builds the envelope for `resource`.
    ///
    /// # Errors
    /// - [`CodecError::UnsupportedDataType`] when `event_type` names another data type
    /// - [`CodecError::Encode`] when the resource cannot be represented
    fn encode(&self, source: &str, event_type: &CloudEventsType, resource: &R) -> Result<Envelope>;

    /// Rebuilds the resource carried by `envelope`.
    ///
    /// # Errors
    /// - [`CodecError::Decode`] for bad types, foreign data types, missing
    ///   identity extensions or malformed payloads
    fn decode(&self, envelope: &Envelope) -> Result<R>;
}

/// Codecs keyed by the data type they serve.
pub struct CodecRegistry<R> {
    codecs: HashMap<CloudEventsDataType, Arc<dyn Codec<R>>>,
}

impl<R> Clone for CodecRegistry<R> {
    fn clone(&self) -> Self {
        Self {
            codecs: self.codecs.clone(),
        }
    }
}

impl<R> Default for CodecRegistry<R> {
    fn default() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }
}

impl<R: 'static> CodecRegistry<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a codec, replacing any codec registered for the same data type.
    pub fn register(&mut self, codec: Arc<dyn Codec<R>>) -> &mut Self {
        self.codecs.insert(codec.event_data_type().clone(), codec);
        self
    }

    pub fn with(mut self, codec: Arc<dyn Codec<R>>) -> Self {
        self.register(codec);
        self
    }

    pub fn get(&self, data_type: &CloudEventsDataType) -> Option<Arc<dyn Codec<R>>> {
        self.codecs.get(data_type).cloned()
    }

    pub fn require(&self, data_type: &CloudEventsDataType) -> Result<Arc<dyn Codec<R>>> {
        self.get(data_type)
            .ok_or_else(|| CodecError::UnsupportedDataType(data_type.to_string()).into())
    }

    /// Registered data types in a stable order.
    pub fn data_types(&self) -> Vec<CloudEventsDataType> {
        let mut data_types: Vec<_> = self.codecs.keys().cloned().collect();
        data_types.sort();
        data_types
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}
