use std::time::Duration;

// -
// Envelope extension attributes

pub const EXT_RESOURCE_ID: &str = "resourceid";
pub const EXT_RESOURCE_VERSION: &str = "resourceversion";
pub const EXT_RESOURCE_NAME: &str = "resourcename";
pub const EXT_CLUSTER_NAME: &str = "clustername";
pub const EXT_ORIGINAL_SOURCE: &str = "originalsource";
pub const EXT_DELETION_TIMESTAMP: &str = "deletiontimestamp";
pub const EXT_SEQUENCE_ID: &str = "sequenceid";

pub const CLOUDEVENTS_SPEC_VERSION: &str = "1.0";
pub const CONTENT_TYPE_JSON: &str = "application/json";

// -
// Metadata keys stamped by codecs on decoded resources

/// Label carrying the hub that originally published a resource
pub const LABEL_ORIGINAL_SOURCE: &str = "spokesync.io/original-source";
/// Annotation carrying the sequence id of the last status event applied
pub const ANNOTATION_SEQUENCE_ID: &str = "spokesync.io/sequence-id";

// -
// Metric label used when an envelope carries no original source
pub(crate) const METRIC_LABEL_NONE: &str = "none";

// -
// Channel sizes

pub(crate) const DEFAULT_WATCHER_BUFFER_SIZE: usize = 256;
pub(crate) const DEFAULT_RECEIVE_QUEUE_SIZE: usize = 1024;
pub(crate) const DEFAULT_SUBSCRIBER_BUFFER_SIZE: usize = 1024;

// -
// Reconnect

/// Uptime after which a dropped connection no longer counts as a failed attempt
pub(crate) const STABLE_CONNECTION_AFTER: Duration = Duration::from_secs(10);
