use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use serde_json::json;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::constants::LABEL_ORIGINAL_SOURCE;
use crate::CloudEventsDataType;
use crate::CloudEventsType;
use crate::CodecRegistry;
use crate::EventAction;
use crate::EventSubResource;
use crate::GenericResource;
use crate::JsonCodec;

lazy_static! {
    static ref LOGGER_INIT: () = {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    };
}

pub fn enable_logger() {
    lazy_static::initialize(&LOGGER_INIT);
    println!("setup logger for unit test.");
}

pub(crate) fn test_data_type() -> CloudEventsDataType {
    CloudEventsDataType::new("test", "v1", "tests")
}

pub(crate) fn test_event_type(sub_resource: EventSubResource, action: &str) -> CloudEventsType {
    CloudEventsType::new(test_data_type(), sub_resource, EventAction::new(action))
}

pub(crate) fn test_codecs() -> CodecRegistry<GenericResource> {
    CodecRegistry::new().with(Arc::new(JsonCodec::new(test_data_type())))
}

/// Resource as the hub holds it: spec only.
pub(crate) fn hub_resource(cluster: &str, name: &str, uid: &str, version: i64) -> GenericResource {
    GenericResource::new(cluster, name, uid, version).with_spec(json!({"name": name, "version": version}))
}

/// Resource as an agent holds it: spec from `source` plus a status.
pub(crate) fn agent_resource(
    source: &str,
    cluster: &str,
    name: &str,
    uid: &str,
    version: i64,
    status: serde_json::Value,
) -> GenericResource {
    let mut resource = hub_resource(cluster, name, uid, version).with_status(status);
    resource
        .metadata
        .labels
        .insert(LABEL_ORIGINAL_SOURCE.to_string(), source.to_string());
    resource
}

/// Receives the next item or panics after `within`.
pub(crate) async fn recv_within<T>(rx: &mut mpsc::Receiver<T>, within: Duration) -> T {
    tokio::time::timeout(within, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}
