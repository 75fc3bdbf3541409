use chrono::TimeZone;
use serde_json::json;

use super::*;
use crate::CloudEventsDataType;
use crate::EventAction;
use crate::EventSubResource;

fn spec_type(action: EventAction) -> CloudEventsType {
    CloudEventsType::new(
        CloudEventsDataType::new("test", "v1", "tests"),
        EventSubResource::Spec,
        action,
    )
}

#[test]
fn test_builder_sets_identity_extensions() {
    let deleted_at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let envelope = EventBuilder::new("hub1", spec_type(EventAction::ResyncResponse))
        .with_resource_id("uid-1")
        .with_resource_version(7)
        .with_cluster_name("cluster1")
        .with_deletion_timestamp(deleted_at)
        .build();

    assert_eq!(envelope.source, "hub1");
    assert_eq!(envelope.event_type, "test.v1.tests.spec.resync_response");
    assert!(!envelope.id.is_empty());
    assert!(envelope.time.is_some());
    assert_eq!(envelope.resource_id().as_deref(), Some("uid-1"));
    assert_eq!(envelope.resource_version().unwrap(), Some(7));
    assert_eq!(envelope.cluster_name().as_deref(), Some("cluster1"));
    assert_eq!(envelope.deletion_timestamp().unwrap(), Some(deleted_at));
    assert!(envelope.data.is_none());
}

#[test]
fn test_integer_extension_accepts_strings() {
    let mut envelope = Envelope::new("1", "hub1", "test.v1.tests.spec.create");
    envelope.set_extension(crate::constants::EXT_RESOURCE_VERSION, "12");
    assert_eq!(envelope.resource_version().unwrap(), Some(12));

    envelope.set_extension(crate::constants::EXT_RESOURCE_VERSION, "twelve");
    assert!(matches!(
        envelope.resource_version(),
        Err(Error::Codec(CodecError::Decode { .. }))
    ));
}

#[test]
fn test_structured_json_keeps_extensions_and_payload() {
    let deleted_at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let mut envelope = EventBuilder::new("hub1", spec_type(EventAction::new("create_request")))
        .with_resource_id("uid-1")
        .with_resource_version(3)
        .with_cluster_name("cluster1")
        .with_deletion_timestamp(deleted_at)
        .build();
    envelope.set_json_data(&json!({"spec": {"replicas": 2}})).unwrap();

    let bytes = envelope.to_structured_json().unwrap();
    let raw: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(raw["resourceversion"], 3);
    assert_eq!(raw["data"]["spec"]["replicas"], 2);
    assert_eq!(raw["deletiontimestamp"], "2024-05-01T10:00:00Z");

    let decoded = Envelope::from_structured_json(&bytes).unwrap();
    assert_eq!(decoded.id, envelope.id);
    assert_eq!(decoded.event_type, envelope.event_type);
    assert_eq!(decoded.resource_version().unwrap(), Some(3));
    assert_eq!(decoded.deletion_timestamp().unwrap(), Some(deleted_at));
    let payload: serde_json::Value = decoded.json_data().unwrap().unwrap();
    assert_eq!(payload["spec"]["replicas"], 2);
}

#[test]
fn test_structured_json_base64_for_binary_payloads() {
    let mut envelope = Envelope::new("2", "agent1", "test.v1.tests.status.update");
    envelope.data_content_type = Some("application/octet-stream".to_string());
    envelope.data = Some(vec![0, 159, 146, 150]);

    let bytes = envelope.to_structured_json().unwrap();
    let raw: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(raw.get("data").is_none());
    assert!(raw.get("data_base64").is_some());

    let decoded = Envelope::from_structured_json(&bytes).unwrap();
    assert_eq!(decoded.data, Some(vec![0, 159, 146, 150]));
}

#[test]
fn test_structured_json_requires_type_and_source() {
    let result = Envelope::from_structured_json(br#"{"id":"1","source":"hub1"}"#);
    assert!(matches!(result, Err(Error::Codec(CodecError::Decode { .. }))));
}

#[test]
fn test_resync_payload_wire_shape() {
    let mut envelope = Envelope::new("3", "agent1", "test.v1.tests.spec.resync_request");
    envelope
        .set_json_data(&ResourceVersionList {
            versions: vec![ResourceVersion {
                resource_id: "uid-1".to_string(),
                resource_version: 4,
            }],
        })
        .unwrap();

    let raw: serde_json::Value = serde_json::from_slice(envelope.data.as_ref().unwrap()).unwrap();
    assert_eq!(
        raw,
        json!({"resourceVersions": [{"resourceID": "uid-1", "resourceVersion": 4}]})
    );

    let decoded = ResourceVersionList::from_envelope(&envelope).unwrap();
    assert_eq!(decoded.find("uid-1"), Some(4));
    assert_eq!(decoded.find("uid-2"), None);
}

#[test]
fn test_resync_payload_missing_data_is_empty_list() {
    let envelope = Envelope::new("4", "hub1", "test.v1.tests.status.resync_request");
    let hashes = ResourceStatusHashList::from_envelope(&envelope).unwrap();
    assert!(hashes.hashes.is_empty());
}
