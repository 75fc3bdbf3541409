use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use serial_test::serial;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::metrics::reset_metrics;
use crate::metrics::SPEC_RESYNC_DURATION_SECONDS;
use crate::metrics::STATUS_RESYNC_DURATION_SECONDS;
use crate::test_utils::agent_resource;
use crate::test_utils::assert_quiet;
use crate::test_utils::enable_logger;
use crate::test_utils::hub_resource;
use crate::test_utils::recv_within;
use crate::test_utils::test_event_type;
use crate::test_utils::Harness;
use crate::test_utils::AGENT;
use crate::test_utils::CLUSTER;
use crate::test_utils::HUB;
use crate::CloudEventsDataType;
use crate::CloudEventsType;
use crate::CodecError;
use crate::Error;
use crate::EventAction;
use crate::EventBuilder;
use crate::EventSubResource;
use crate::GenericResource;
use crate::ResourceAction;
use crate::SOURCE_ALL;

const WAIT: Duration = Duration::from_secs(2);

fn spec_type() -> CloudEventsType {
    test_event_type(EventSubResource::Spec, "create_request")
}

#[tokio::test]
#[serial]
async fn test_hub_specs_are_classified() {
    enable_logger();
    let mut h = Harness::start(vec![], vec![]).await;
    let cancel = CancellationToken::new();

    h.hub
        .publish(&cancel, &spec_type(), &hub_resource(CLUSTER, "a", "A", 1))
        .await
        .unwrap();
    let (action, resource) = recv_within(&mut h.agent_rx, WAIT).await;
    assert_eq!(action, ResourceAction::Added);
    assert_eq!(resource.metadata.original_source(), Some(HUB));
    assert!(h.agent_store.get(CLUSTER, "a").is_some());

    // Redelivery of the same version is suppressed.
    h.hub
        .publish(&cancel, &spec_type(), &hub_resource(CLUSTER, "a", "A", 1))
        .await
        .unwrap();
    assert_quiet(&mut h.agent_rx).await;

    h.hub
        .publish(&cancel, &spec_type(), &hub_resource(CLUSTER, "a", "A", 2))
        .await
        .unwrap();
    let (action, resource) = recv_within(&mut h.agent_rx, WAIT).await;
    assert_eq!(action, ResourceAction::Modified);
    assert_eq!(resource.metadata.resource_version, "2");

    let mut deleting = hub_resource(CLUSTER, "a", "A", 2);
    deleting.metadata.deletion_timestamp = Some(Utc::now());
    h.hub.publish(&cancel, &spec_type(), &deleting).await.unwrap();
    let (action, _) = recv_within(&mut h.agent_rx, WAIT).await;
    assert_eq!(action, ResourceAction::Deleted);
    assert!(h.agent_store.is_empty());
    h.close();
}

#[tokio::test]
#[serial]
async fn test_spec_resync_sends_only_differences() {
    enable_logger();
    reset_metrics();
    let mut h = Harness::start(
        vec![hub_resource(CLUSTER, "a", "A", 2), hub_resource(CLUSTER, "b", "B", 1)],
        vec![agent_resource(HUB, CLUSTER, "a", "A", 1, json!({}))],
    )
    .await;
    let mut completions = h.hub.resync_completions();

    h.agent
        .resync(&CancellationToken::new(), SOURCE_ALL)
        .await
        .unwrap();

    let completed = tokio::time::timeout(WAIT, completions.recv()).await.unwrap().unwrap();
    assert_eq!(completed.published, 2);
    assert_eq!(completed.key.peer, AGENT);
    assert_eq!(completed.key.cluster_name, CLUSTER);

    let mut received = HashMap::new();
    for _ in 0..2 {
        let (action, resource) = recv_within(&mut h.agent_rx, WAIT).await;
        received.insert(resource.metadata.uid.clone(), (action, resource.metadata.resource_version.clone()));
    }
    assert_eq!(received["A"], (ResourceAction::Modified, "2".to_string()));
    assert_eq!(received["B"], (ResourceAction::Added, "1".to_string()));
    assert_quiet(&mut h.agent_rx).await;

    assert_eq!(
        SPEC_RESYNC_DURATION_SECONDS
            .with_label_values(&[HUB, CLUSTER, "test.v1.tests"])
            .get_sample_count(),
        1
    );
    h.close();
}

#[tokio::test]
#[serial]
async fn test_spec_resync_removes_resources_gone_from_hub() {
    enable_logger();
    let mut h = Harness::start(
        vec![],
        vec![agent_resource(HUB, CLUSTER, "z", "Z", 3, json!({}))],
    )
    .await;

    h.agent
        .resync(&CancellationToken::new(), HUB)
        .await
        .unwrap();

    let (action, resource) = recv_within(&mut h.agent_rx, WAIT).await;
    assert_eq!(action, ResourceAction::Deleted);
    assert_eq!(resource.metadata.uid, "Z");
    assert!(h.agent_store.is_empty());
    h.close();
}

#[tokio::test]
#[serial]
async fn test_status_resync_request_is_answered() {
    enable_logger();
    reset_metrics();
    let mut h = Harness::start(
        vec![hub_resource(CLUSTER, "a", "A", 1), hub_resource(CLUSTER, "b", "B", 1)],
        vec![
            agent_resource(HUB, CLUSTER, "a", "A", 1, json!({"phase": "Running"})),
            agent_resource(HUB, CLUSTER, "b", "B", 1, serde_json::Value::Null),
        ],
    )
    .await;
    let mut completions = h.agent.resync_completions();

    h.hub
        .resync(&CancellationToken::new(), crate::CLUSTER_ALL)
        .await
        .unwrap();

    // Only A differs from what the hub holds.
    let completed = tokio::time::timeout(WAIT, completions.recv()).await.unwrap().unwrap();
    assert_eq!(completed.published, 1);
    assert_eq!(completed.key.peer, HUB);

    let (action, resource) = recv_within(&mut h.hub_rx, WAIT).await;
    assert_eq!(action, ResourceAction::StatusModified);
    assert_eq!(resource.metadata.uid, "A");
    assert_eq!(resource.status, json!({"phase": "Running"}));
    assert_quiet(&mut h.hub_rx).await;

    assert_eq!(
        STATUS_RESYNC_DURATION_SECONDS
            .with_label_values(&[HUB, CLUSTER, "test.v1.tests"])
            .get_sample_count(),
        1
    );
    h.close();
}

#[tokio::test]
#[serial]
async fn test_reconnect_triggers_spec_resync() {
    enable_logger();
    let mut h = Harness::start(vec![hub_resource(CLUSTER, "a", "A", 1)], vec![]).await;
    let mut completions = h.hub.resync_completions();

    assert_eq!(h.broker.disconnect(AGENT), 1);

    let completed = tokio::time::timeout(WAIT, completions.recv()).await.unwrap().unwrap();
    assert_eq!(completed.published, 1);
    let (action, resource) = recv_within(&mut h.agent_rx, WAIT).await;
    assert_eq!(action, ResourceAction::Added);
    assert_eq!(resource.metadata.uid, "A");
    h.close();
}

#[tokio::test]
#[serial]
async fn test_agent_only_publishes_status() {
    let h = Harness::start(vec![], vec![]).await;

    let err = h
        .agent
        .publish(
            &CancellationToken::new(),
            &spec_type(),
            &agent_resource(HUB, CLUSTER, "a", "A", 1, json!({})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Codec(CodecError::Encode(_))));

    let other_type = CloudEventsType::new(
        CloudEventsDataType::new("other", "v1", "things"),
        EventSubResource::Status,
        EventAction::new("update_request"),
    );
    let err = h
        .agent
        .publish(
            &CancellationToken::new(),
            &other_type,
            &agent_resource(HUB, CLUSTER, "a", "A", 1, json!({})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Codec(CodecError::UnsupportedDataType(_))));
    h.close();
}

#[tokio::test]
#[serial]
async fn test_agent_ignores_events_not_for_it() {
    let h = Harness::start(vec![], vec![]).await;
    let (tx, mut rx) = mpsc::channel::<(ResourceAction, GenericResource)>(4);

    let foreign = EventBuilder::new(
        HUB,
        CloudEventsType::new(
            CloudEventsDataType::new("other", "v1", "things"),
            EventSubResource::Spec,
            EventAction::new("create_request"),
        ),
    )
    .with_resource_id("X")
    .with_resource_version(1)
    .with_cluster_name(CLUSTER)
    .build();
    h.agent.receive(foreign, &tx).await.unwrap();

    let unknown_tombstone = EventBuilder::new(HUB, spec_type())
        .with_resource_id("Y")
        .with_resource_version(4)
        .with_cluster_name(CLUSTER)
        .with_deletion_timestamp(Utc::now())
        .build();
    h.agent.receive(unknown_tombstone, &tx).await.unwrap();

    let status = EventBuilder::new(HUB, test_event_type(EventSubResource::Status, "update_request"))
        .with_resource_id("Y")
        .with_resource_version(4)
        .with_cluster_name(CLUSTER)
        .build();
    h.agent.receive(status, &tx).await.unwrap();

    assert_quiet(&mut rx).await;
    h.close();
}

#[tokio::test]
#[serial]
async fn test_agent_rejects_malformed_specs() {
    let h = Harness::start(vec![], vec![]).await;
    let (tx, _rx) = mpsc::channel::<(ResourceAction, GenericResource)>(4);

    let missing_data = EventBuilder::new(HUB, spec_type())
        .with_resource_id("A")
        .with_resource_version(1)
        .with_cluster_name(CLUSTER)
        .build();
    let err = h.agent.receive(missing_data, &tx).await.unwrap_err();
    assert!(matches!(err, Error::Codec(CodecError::Decode { .. })));
    h.close();
}
