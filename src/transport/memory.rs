use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tonic::async_trait;
use tracing::debug;
use tracing::warn;

use crate::ClientIdentity;
use crate::Envelope;
use crate::EventBroker;
use crate::Result;
use crate::Subscription;
use crate::TopicRouter;
use crate::Transport;
use crate::TransportConnector;
use crate::TransportError;

/// Connects clients to an [`EventBroker`] living in the same process.
/// Envelopes cross the broker in their structured JSON encoding, like an MQTT
/// payload would.
pub struct MemoryConnector {
    broker: EventBroker<Vec<u8>>,
    identity: ClientIdentity,
    router: TopicRouter,
}

impl MemoryConnector {
    pub fn new(broker: EventBroker<Vec<u8>>, identity: ClientIdentity, router: TopicRouter) -> Self {
        Self {
            broker,
            identity,
            router,
        }
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn Transport>> {
        let subscription = self
            .broker
            .subscribe(&self.identity.client_id, self.router.subscriptions(&self.identity))?;
        debug!(client_id = %self.identity.client_id, "Connected to in-process broker");
        Ok(Arc::new(MemoryTransport {
            broker: self.broker.clone(),
            identity: self.identity.clone(),
            router: self.router.clone(),
            subscription: Mutex::new(Some(subscription)),
        }))
    }
}

pub struct MemoryTransport {
    broker: EventBroker<Vec<u8>>,
    identity: ClientIdentity,
    router: TopicRouter,
    subscription: Mutex<Option<Subscription<Vec<u8>>>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, envelope: Envelope) -> Result<()> {
        let topic = self.router.publish_topic(&self.identity, &envelope)?;
        let payload = envelope.to_structured_json()?;
        self.broker.publish(&topic, payload).await;
        Ok(())
    }

    async fn start_receiver(
        &self,
        cancel: CancellationToken,
        sink: mpsc::Sender<Envelope>,
    ) -> Result<()> {
        let mut subscription = self.subscription.lock().await.take().ok_or_else(|| {
            TransportError::ConnectionClosed("receiver already started on this connection".to_string())
        })?;

        loop {
            let payload = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                payload = subscription.recv() => match payload {
                    Some(payload) => payload,
                    None => {
                        return Err(TransportError::ConnectionClosed(format!(
                            "broker dropped subscription of {}",
                            self.identity.client_id
                        ))
                        .into())
                    }
                },
            };

            let envelope = match Envelope::from_structured_json(&payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("Drop malformed message: {:?}", e);
                    continue;
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = sink.send(envelope) => {
                    if sent.is_err() {
                        debug!("Receive sink closed, stop receiver");
                        return Ok(());
                    }
                }
            }
        }
    }
}
