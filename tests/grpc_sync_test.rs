use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use spoke_sync::constants::LABEL_ORIGINAL_SOURCE;
use spoke_sync::grpc::proto::CloudEvent;
use spoke_sync::grpc::serve_broker;
use spoke_sync::grpc::GrpcConnector;
use spoke_sync::utils::no_delay;
use spoke_sync::AgentClient;
use spoke_sync::AgentStoreLister;
use spoke_sync::ClientIdentity;
use spoke_sync::ClientOptions;
use spoke_sync::CloudEventsDataType;
use spoke_sync::CloudEventsType;
use spoke_sync::CodecRegistry;
use spoke_sync::EventAction;
use spoke_sync::EventBroker;
use spoke_sync::EventSubResource;
use spoke_sync::GenericResource;
use spoke_sync::GrpcTransportConfig;
use spoke_sync::JsonCodec;
use spoke_sync::ResourceAction;
use spoke_sync::SourceClient;
use spoke_sync::SourceStoreLister;
use spoke_sync::StoreHandler;
use spoke_sync::TopicRouter;
use spoke_sync::WatcherStore;
use spoke_sync::SOURCE_ALL;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

const HUB: &str = "hub";
const CLUSTER: &str = "cluster1";
const WAIT: Duration = Duration::from_secs(5);

fn data_type() -> CloudEventsDataType {
    CloudEventsDataType::new("apps", "v1", "deployments")
}

fn codecs() -> CodecRegistry<GenericResource> {
    CodecRegistry::new().with(Arc::new(JsonCodec::new(data_type())))
}

fn event_type(sub_resource: EventSubResource, action: &str) -> CloudEventsType {
    CloudEventsType::new(data_type(), sub_resource, EventAction::new(action))
}

fn deployment(name: &str, uid: &str, version: i64) -> GenericResource {
    GenericResource::new(CLUSTER, name, uid, version).with_spec(json!({"replicas": version}))
}

async fn next(rx: &mut mpsc::Receiver<(ResourceAction, GenericResource)>) -> (ResourceAction, GenericResource) {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("handler channel closed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hub_and_agent_sync_through_grpc_broker() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let server = tokio::spawn(serve_broker(EventBroker::<CloudEvent>::new(64), listener, shutdown_rx));

    let config = GrpcTransportConfig {
        url,
        ..Default::default()
    };

    let hub_store = WatcherStore::<GenericResource>::default();
    let hub_identity = ClientIdentity::source(HUB);
    let hub = SourceClient::new(
        ClientOptions::new(hub_identity.clone()).with_delay_fn(no_delay()),
        Arc::new(GrpcConnector::new(config.clone(), hub_identity, TopicRouter::default())),
        codecs(),
        Arc::new(SourceStoreLister::new(hub_store.clone(), data_type())),
        spoke_sync::generic_status_hash(),
    );

    let agent_store = WatcherStore::<GenericResource>::default();
    let agent_identity = ClientIdentity::agent(CLUSTER, "cluster1-agent");
    let agent = AgentClient::new(
        ClientOptions::new(agent_identity.clone()).with_delay_fn(no_delay()),
        Arc::new(GrpcConnector::new(config, agent_identity, TopicRouter::default())),
        codecs(),
        Arc::new(AgentStoreLister::new(agent_store.clone(), data_type())),
        spoke_sync::generic_status_hash(),
    );

    let (hub_tx, mut hub_rx) = mpsc::channel(16);
    hub.subscribe(Arc::new(StoreHandler::new(hub_store.clone()).forward_to(Arc::new(hub_tx))))
        .await
        .unwrap();
    let (agent_tx, mut agent_rx) = mpsc::channel(16);
    agent
        .subscribe(Arc::new(StoreHandler::new(agent_store.clone()).forward_to(Arc::new(agent_tx))))
        .await
        .unwrap();

    let cancel = CancellationToken::new();

    // Spec: hub -> agent
    let web = deployment("web", "uid-web", 1);
    hub_store.handle_received_resource(ResourceAction::Added, web.clone()).unwrap();
    hub.publish(&cancel, &event_type(EventSubResource::Spec, "create_request"), &web)
        .await
        .unwrap();
    let (action, received) = next(&mut agent_rx).await;
    assert_eq!(action, ResourceAction::Added);
    assert_eq!(received.spec, json!({"replicas": 1}));
    assert!(agent_store.get(CLUSTER, "web").is_some());

    // Status: agent -> hub
    let mut observed = received.with_status(json!({"readyReplicas": 1}));
    observed
        .metadata
        .labels
        .insert(LABEL_ORIGINAL_SOURCE.to_string(), HUB.to_string());
    agent
        .publish(&cancel, &event_type(EventSubResource::Status, "update_request"), &observed)
        .await
        .unwrap();
    let (action, received) = next(&mut hub_rx).await;
    assert_eq!(action, ResourceAction::StatusModified);
    assert_eq!(received.status, json!({"readyReplicas": 1}));

    // Resync: the agent catches up on a spec it never saw published.
    hub_store
        .handle_received_resource(ResourceAction::Added, deployment("api", "uid-api", 3))
        .unwrap();
    agent.resync(&cancel, SOURCE_ALL).await.unwrap();
    let (action, received) = next(&mut agent_rx).await;
    assert_eq!(action, ResourceAction::Added);
    assert_eq!(received.metadata.name, "api");
    assert_eq!(agent_store.len(), 2);

    hub.close();
    agent.close();
    shutdown_tx.send(()).unwrap();
    // Graceful shutdown waits for idle client channels, which the closed
    // clients may still hold.
    server.abort();
}
