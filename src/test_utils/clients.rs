use std::sync::Arc;

use tokio::sync::mpsc;

use super::test_codecs;
use super::test_data_type;
use crate::generic_status_hash;
use crate::utils::no_delay;
use crate::AgentClient;
use crate::AgentStoreLister;
use crate::ClientIdentity;
use crate::ClientOptions;
use crate::EventBroker;
use crate::GenericResource;
use crate::MemoryConnector;
use crate::ResourceAction;
use crate::ResourceHandler;
use crate::SourceClient;
use crate::SourceStoreLister;
use crate::StoreHandler;
use crate::TopicRouter;
use crate::WatcherStore;

pub(crate) const HUB: &str = "hub";
pub(crate) const CLUSTER: &str = "cluster1";
pub(crate) const AGENT: &str = "cluster1-agent";

pub(crate) type Received = mpsc::Receiver<(ResourceAction, GenericResource)>;

/// A hub and one agent sharing an in-process broker. Each side keeps its
/// store in sync through a [`StoreHandler`] and reports what it received.
pub(crate) struct Harness {
    pub broker: EventBroker<Vec<u8>>,
    pub hub: SourceClient<GenericResource>,
    pub hub_store: WatcherStore<GenericResource>,
    pub hub_rx: Received,
    pub agent: AgentClient<GenericResource>,
    pub agent_store: WatcherStore<GenericResource>,
    pub agent_rx: Received,
}

impl Harness {
    /// Seeds both stores, then subscribes hub and agent.
    pub(crate) async fn start(hub_resources: Vec<GenericResource>, agent_resources: Vec<GenericResource>) -> Self {
        let broker = EventBroker::new(64);

        let hub_store = WatcherStore::default();
        for resource in hub_resources {
            hub_store
                .handle_received_resource(ResourceAction::Added, resource)
                .unwrap();
        }
        let agent_store = WatcherStore::default();
        for resource in agent_resources {
            agent_store
                .handle_received_resource(ResourceAction::Added, resource)
                .unwrap();
        }

        let hub_identity = ClientIdentity::source(HUB);
        let hub = SourceClient::new(
            ClientOptions::new(hub_identity.clone()).with_delay_fn(no_delay()),
            Arc::new(MemoryConnector::new(broker.clone(), hub_identity, TopicRouter::default())),
            test_codecs(),
            Arc::new(SourceStoreLister::new(hub_store.clone(), test_data_type())),
            generic_status_hash(),
        );

        let agent_identity = ClientIdentity::agent(CLUSTER, AGENT);
        let agent = AgentClient::new(
            ClientOptions::new(agent_identity.clone()).with_delay_fn(no_delay()),
            Arc::new(MemoryConnector::new(broker.clone(), agent_identity, TopicRouter::default())),
            test_codecs(),
            Arc::new(AgentStoreLister::new(agent_store.clone(), test_data_type())),
            generic_status_hash(),
        );

        let (hub_tx, hub_rx) = mpsc::channel(64);
        hub.subscribe(store_handler(&hub_store, hub_tx)).await.unwrap();
        let (agent_tx, agent_rx) = mpsc::channel(64);
        agent.subscribe(store_handler(&agent_store, agent_tx)).await.unwrap();

        Self {
            broker,
            hub,
            hub_store,
            hub_rx,
            agent,
            agent_store,
            agent_rx,
        }
    }

    pub(crate) fn close(&self) {
        self.hub.close();
        self.agent.close();
    }
}

fn store_handler(
    store: &WatcherStore<GenericResource>,
    tx: mpsc::Sender<(ResourceAction, GenericResource)>,
) -> Arc<dyn ResourceHandler<GenericResource>> {
    Arc::new(StoreHandler::new(store.clone()).forward_to(Arc::new(tx)))
}

/// Asserts that nothing arrives on `rx` for a short while.
pub(crate) async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::Receiver<T>) {
    if let Ok(Some(item)) = tokio::time::timeout(std::time::Duration::from_millis(150), rx.recv()).await {
        panic!("unexpected message: {item:?}");
    }
}
