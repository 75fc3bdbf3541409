use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::constants::EXT_CLUSTER_NAME;
use crate::test_utils::recv_within;
use crate::test_utils::test_event_type;
use crate::Error;
use crate::EventBuilder;
use crate::EventSubResource;
use crate::TopicsConfig;
use crate::TransportError;

fn connector(broker: &EventBroker<Vec<u8>>, identity: ClientIdentity) -> MemoryConnector {
    MemoryConnector::new(broker.clone(), identity, TopicRouter::new(TopicsConfig::default()))
}

#[tokio::test]
async fn test_hub_to_agent_round_trip() {
    let broker = EventBroker::new(16);
    let hub = connector(&broker, ClientIdentity::source("hub1")).connect().await.unwrap();
    let agent = connector(&broker, ClientIdentity::agent("cluster1", "cluster1-agent"))
        .connect()
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let receiver = tokio::spawn({
        let cancel = cancel.clone();
        async move { agent.start_receiver(cancel, tx).await }
    });

    let mut sent = EventBuilder::new("hub1", test_event_type(EventSubResource::Spec, "create_request"))
        .with_resource_id("uid-1")
        .with_resource_version(4)
        .with_cluster_name("cluster1")
        .build();
    sent.set_json_data(&serde_json::json!({"replicas": 2})).unwrap();
    hub.send(sent.clone()).await.unwrap();

    let received = recv_within(&mut rx, Duration::from_secs(1)).await;
    assert_eq!(received.id, sent.id);
    assert_eq!(received.resource_version().unwrap(), Some(4));
    assert_eq!(received.json_data::<serde_json::Value>().unwrap().unwrap()["replicas"], 2);

    cancel.cancel();
    assert!(receiver.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_receiver_fails_when_broker_disconnects() {
    let broker = EventBroker::new(16);
    let agent = connector(&broker, ClientIdentity::agent("cluster1", "cluster1-agent"))
        .connect()
        .await
        .unwrap();
    let (tx, _rx) = mpsc::channel(8);

    let receiver = tokio::spawn({
        let agent = agent.clone();
        async move { agent.start_receiver(CancellationToken::new(), tx).await }
    });
    tokio::task::yield_now().await;
    broker.disconnect("cluster1-agent");

    let result = receiver.await.unwrap();
    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::ConnectionClosed(_)))
    ));

    let (tx, _rx) = mpsc::channel(8);
    assert!(agent.start_receiver(CancellationToken::new(), tx).await.is_err());
}

#[tokio::test]
async fn test_send_rejects_unroutable_envelope() {
    let broker = EventBroker::new(16);
    let hub = connector(&broker, ClientIdentity::source("hub1")).connect().await.unwrap();

    let mut envelope = EventBuilder::new("hub1", test_event_type(EventSubResource::Spec, "create_request")).build();
    assert!(hub.send(envelope.clone()).await.is_err());

    envelope.set_extension(EXT_CLUSTER_NAME, "cluster1");
    assert!(hub.send(envelope).await.is_ok());
}
