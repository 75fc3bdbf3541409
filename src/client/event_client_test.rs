use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::async_trait;

use super::*;
use crate::metrics::reset_metrics;
use crate::metrics::RECONNECTED_TOTAL;
use crate::test_utils::enable_logger;
use crate::test_utils::test_event_type;
use crate::utils::no_delay;
use crate::BackoffPolicy;
use crate::ClientIdentity;
use crate::Envelope;
use crate::Error;
use crate::EventBroker;
use crate::EventBuilder;
use crate::EventSubResource;
use crate::MemoryConnector;
use crate::MockTransportConnector;
use crate::Result;
use crate::TopicRouter;
use crate::Transport;
use crate::TransportConnector;
use crate::TransportError;

/// Transport whose first `failing_sends` sends fail; inbound never delivers.
struct FlakyTransport {
    failing_sends: AtomicUsize,
    sent: mpsc::UnboundedSender<Envelope>,
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn send(&self, envelope: Envelope) -> Result<()> {
        let remaining = self.failing_sends.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_sends.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::SendFailed {
                event_id: envelope.id,
                reason: "connection reset".to_string(),
            }
            .into());
        }
        let _ = self.sent.send(envelope);
        Ok(())
    }

    async fn start_receiver(&self, cancel: CancellationToken, _sink: mpsc::Sender<Envelope>) -> Result<()> {
        cancel.cancelled().await;
        Ok(())
    }
}

/// The first connection fails every send, later connections work.
struct FlakyConnector {
    connects: Arc<AtomicUsize>,
    sent: mpsc::UnboundedSender<Envelope>,
}

#[async_trait]
impl TransportConnector for FlakyConnector {
    async fn connect(&self) -> Result<Arc<dyn Transport>> {
        let attempt = self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FlakyTransport {
            failing_sends: AtomicUsize::new(if attempt == 0 { usize::MAX } else { 0 }),
            sent: self.sent.clone(),
        }))
    }
}

fn options(max_retries: usize) -> EventClientOptions {
    EventClientOptions {
        reconnect: BackoffPolicy {
            max_retries,
            timeout_ms: 100,
            base_delay_ms: 1,
            max_delay_ms: 10,
        },
        receive_queue_size: 16,
        delay_fn: Some(no_delay()),
    }
}

fn status_event(cluster: &str) -> Envelope {
    EventBuilder::new("cluster1-agent", test_event_type(EventSubResource::Status, "update_request"))
        .with_resource_id("uid-1")
        .with_resource_version(1)
        .with_cluster_name(cluster)
        .with_original_source("hub")
        .build()
}

fn flaky_client() -> (Arc<EventClient>, Arc<AtomicUsize>, mpsc::UnboundedReceiver<Envelope>) {
    let connects = Arc::new(AtomicUsize::new(0));
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let connector = Arc::new(FlakyConnector {
        connects: connects.clone(),
        sent: sent_tx,
    });
    let (client, _receive_rx) = EventClient::new(
        ClientIdentity::agent("cluster1", "cluster1-agent"),
        connector,
        options(0),
    );
    (client, connects, sent_rx)
}

#[tokio::test]
async fn test_start_exhausts_retries() {
    enable_logger();
    let mut connector = MockTransportConnector::new();
    connector.expect_connect().times(3).returning(|| {
        Err(TransportError::ConnectFailed {
            endpoint: "memory".to_string(),
            reason: "refused".to_string(),
        }
        .into())
    });

    let (client, _rx) = EventClient::new(
        ClientIdentity::source("hub"),
        Arc::new(connector),
        options(3),
    );

    let err = client.start().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Transport(TransportError::ReconnectExhausted { attempts: 3, .. })
    ));
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let err = client
        .publish(&CancellationToken::new(), status_event("cluster1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Transport(TransportError::ReconnectExhausted { .. })
    ));
}

#[tokio::test]
async fn test_start_twice_fails() {
    let (client, _, _sent) = flaky_client();
    client.start().await.unwrap();
    assert!(matches!(client.start().await, Err(Error::Fatal(_))));
    client.close();
}

#[tokio::test]
async fn test_publish_before_connect_is_cancellable() {
    let (client, _, _sent) = flaky_client();
    let cancel = CancellationToken::new();

    let publish = {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { client.publish(&cancel, status_event("cluster1")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let result = publish.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn test_send_failure_is_retried_on_new_connection() {
    enable_logger();
    let (client, connects, mut sent) = flaky_client();
    client.start().await.unwrap();
    let mut reconnected = client.reconnected();

    client
        .publish(&CancellationToken::new(), status_event("cluster1"))
        .await
        .unwrap();

    let envelope = tokio::time::timeout(Duration::from_secs(1), sent.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.resource_id().as_deref(), Some("uid-1"));
    assert_eq!(connects.load(Ordering::SeqCst), 2);
    assert_eq!(reconnected.recv().await.unwrap(), 2);
    assert_eq!(client.state(), ConnectionState::Connected);
    client.close();
}

#[tokio::test]
async fn test_stale_generation_errors_are_ignored() {
    let (client, connects, _sent) = flaky_client();
    client.start().await.unwrap();

    client.report(99, TransportError::ConnectionClosed("old".to_string()).into());
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    client.close();
}

#[tokio::test]
async fn test_close_cancels_publish() {
    let (client, _, _sent) = flaky_client();
    client.start().await.unwrap();
    client.close();

    assert_eq!(client.state(), ConnectionState::Disconnected);
    let result = client
        .publish(&CancellationToken::new(), status_event("cluster1"))
        .await;
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
#[serial]
async fn test_broker_disconnect_triggers_reconnect() {
    enable_logger();
    reset_metrics();
    let broker = EventBroker::new(16);
    let identity = ClientIdentity::agent("cluster1", "reconnect-agent");
    let connector = Arc::new(MemoryConnector::new(
        broker.clone(),
        identity.clone(),
        TopicRouter::default(),
    ));
    let (client, mut receive_rx) = EventClient::new(identity, connector, options(0));
    client.start().await.unwrap();
    let mut reconnected = client.reconnected();

    assert_eq!(broker.disconnect("reconnect-agent"), 1);

    let generation = tokio::time::timeout(Duration::from_secs(1), reconnected.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(generation, 2);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(
        RECONNECTED_TOTAL.with_label_values(&["reconnect-agent"]).get(),
        1
    );

    // The new subscription receives traffic.
    let spec = EventBuilder::new("hub", test_event_type(EventSubResource::Spec, "create_request"))
        .with_resource_id("uid-1")
        .with_resource_version(1)
        .with_cluster_name("cluster1")
        .build();
    broker
        .publish(
            "sources/hub/clusters/cluster1/sourceevents",
            spec.to_structured_json().unwrap(),
        )
        .await;
    let received = tokio::time::timeout(Duration::from_secs(1), receive_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.id, spec.id);
    client.close();
}

/// Accepts every connection, then drops it after `lifetime`.
struct DroppingConnector {
    connects: Arc<AtomicUsize>,
    lifetime: Duration,
}

struct DroppingTransport {
    lifetime: Duration,
}

#[async_trait]
impl Transport for DroppingTransport {
    async fn send(&self, _envelope: Envelope) -> Result<()> {
        Ok(())
    }

    async fn start_receiver(&self, cancel: CancellationToken, _sink: mpsc::Sender<Envelope>) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            _ = tokio::time::sleep(self.lifetime) => {
                Err(TransportError::ConnectionClosed("peer went away".to_string()).into())
            }
        }
    }
}

#[async_trait]
impl TransportConnector for DroppingConnector {
    async fn connect(&self) -> Result<Arc<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(DroppingTransport { lifetime: self.lifetime }))
    }
}

fn dropping_client(
    lifetime: Duration,
    max_retries: usize,
) -> (Arc<EventClient>, Arc<AtomicUsize>, Arc<parking_lot::Mutex<Vec<u32>>>) {
    let connects = Arc::new(AtomicUsize::new(0));
    let delays = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let recorded = delays.clone();
    let mut options = options(max_retries);
    options.delay_fn = Some(Arc::new(move |attempt| {
        recorded.lock().push(attempt);
        Duration::from_secs(1)
    }));
    let (client, _receive_rx) = EventClient::new(
        ClientIdentity::agent("cluster1", "cluster1-agent"),
        Arc::new(DroppingConnector {
            connects: connects.clone(),
            lifetime,
        }),
        options,
    );
    (client, connects, delays)
}

#[tokio::test(start_paused = true)]
async fn test_immediately_dropped_connections_back_off_until_exhausted() {
    enable_logger();
    let (client, connects, delays) = dropping_client(Duration::ZERO, 3);
    let mut state = client.state_changes();
    client.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connects.load(Ordering::SeqCst), 1, "reconnect waits for the delay");

    tokio::time::timeout(Duration::from_secs(60), state.wait_for(|s| *s == ConnectionState::Disconnected))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(connects.load(Ordering::SeqCst), 3);
    assert_eq!(*delays.lock(), vec![1, 2]);

    let err = client
        .publish(&CancellationToken::new(), status_event("cluster1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Transport(TransportError::ReconnectExhausted { attempts: 3, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_long_lived_connections_reset_the_retry_budget() {
    let (client, connects, delays) = dropping_client(Duration::from_secs(30), 2);
    client.start().await.unwrap();

    tokio::time::timeout(Duration::from_secs(600), async {
        while connects.load(Ordering::SeqCst) < 5 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    })
    .await
    .unwrap();

    assert_ne!(client.state(), ConnectionState::Disconnected);
    assert!(delays.lock().iter().all(|attempt| *attempt == 1));
    client.close();
}
