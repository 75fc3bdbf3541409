//! Resource Synchronization Error Hierarchy
//!
//! Defines the error types surfaced by the hub/agent synchronization protocol,
//! categorized by layer: envelope codecs, the local watcher store, the message
//! transport and the dependent garbage collector.

use std::time::Duration;

use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Envelope encode/decode failures
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Local cache mutation or query failures
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Message transport failures (connect, send, receive)
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Dependent garbage collection failures
    #[error(transparent)]
    GarbageCollection(#[from] GcError),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The caller's cancellation token fired before the operation completed
    #[error("Operation cancelled")]
    Cancelled,

    /// Background task failures
    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    /// Unrecoverable failures requiring client termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// No codec is registered for the data type, or the codec serves another one
    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    /// The cloud event type string cannot be parsed
    #[error("Invalid cloud event type '{event_type}': {reason}")]
    InvalidEventType { event_type: String, reason: String },

    /// An inbound envelope is malformed
    #[error("Failed to decode event {event_id}: {reason}")]
    Decode { event_id: String, reason: String },

    /// A resource cannot be turned into an envelope
    #[error("Failed to encode resource: {0}")]
    Encode(String),

    /// Payload (de)serialization failures
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Resource identity is incomplete
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// Malformed label or field selector
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// Watchers need a running tokio runtime to drive their delivery task
    #[error("No tokio runtime available to drive watcher {0}")]
    NoRuntime(u64),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The underlying connection was closed by the peer or the broker
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Establishing a connection failed
    #[error("Failed to connect to {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    /// Physical write failures
    #[error("Failed to send event {event_id}: {reason}")]
    SendFailed { event_id: String, reason: String },

    /// Reconnection gave up after the configured number of attempts
    #[error("Reconnect exhausted after {attempts} attempts: {last_error}")]
    ReconnectExhausted { attempts: u32, last_error: String },

    /// No transport is attached to the client yet
    #[error("Client is not connected")]
    NotConnected,

    /// Single operation exceeded its deadline
    #[error("Transport operation timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed endpoint addresses
    #[error("Invalid URI format: {0}")]
    InvalidUri(String),

    /// gRPC transport layer errors
    #[error(transparent)]
    Tonic(#[from] Box<tonic::transport::Error>),

    /// gRPC status code errors
    #[error(transparent)]
    Status(#[from] Box<tonic::Status>),
}

#[derive(Debug, thiserror::Error)]
pub enum GcError {
    /// The owner existence check could not decide whether the owner is gone
    #[error("Owner check for {owner_uid} is inconclusive: {reason}")]
    OwnerCheckInconclusive { owner_uid: String, reason: String },

    /// The requested object does not exist
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    /// Resource API call failures
    #[error("Resource API call {operation} failed: {reason}")]
    Api {
        operation: &'static str,
        reason: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration source loading failures
    #[error(transparent)]
    Load(#[from] ::config::ConfigError),

    /// Semantic validation failures
    #[error("{0}")]
    Message(String),
}

impl From<::config::ConfigError> for Error {
    fn from(e: ::config::ConfigError) -> Self {
        Error::Config(ConfigError::Load(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(CodecError::Json(e))
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::Transport(TransportError::Status(Box::new(status)))
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(e: tonic::transport::Error) -> Self {
        Error::Transport(TransportError::Tonic(Box::new(e)))
    }
}

impl Error {
    /// True when the error describes a missing object rather than a failed call.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::GarbageCollection(GcError::NotFound { .. }))
    }

    /// True when the error is a transport-level failure that the reconnect
    /// machinery is expected to absorb.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}
