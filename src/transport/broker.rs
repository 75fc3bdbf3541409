use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::trace;

use crate::validate_topic_filter;
use crate::topic_matches;
use crate::Result;

struct Subscriber<M> {
    client_id: String,
    filters: Vec<String>,
    sender: mpsc::Sender<M>,
}

struct BrokerInner<M> {
    subscribers: DashMap<u64, Subscriber<M>>,
    next_id: AtomicU64,
    buffer_size: usize,
}

/// Topic based fan-out shared by the in-process transport and the gRPC broker
/// service. `M` is whatever the transport carries on the wire.
///
/// Publishing waits for room in every matching subscriber's buffer, so a slow
/// subscriber applies backpressure instead of losing messages.
pub struct EventBroker<M> {
    inner: Arc<BrokerInner<M>>,
}

impl<M> Clone for EventBroker<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Clone + Send + Sync + 'static> EventBroker<M> {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
                buffer_size: buffer_size.max(1),
            }),
        }
    }

    /// Registers `client_id` for every topic matching one of `filters`.
    pub fn subscribe(&self, client_id: &str, filters: Vec<String>) -> Result<Subscription<M>> {
        for filter in &filters {
            validate_topic_filter(filter)?;
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.buffer_size);
        debug!(client_id, subscription_id = id, ?filters, "New subscription");
        self.inner.subscribers.insert(
            id,
            Subscriber {
                client_id: client_id.to_string(),
                filters,
                sender,
            },
        );
        Ok(Subscription {
            id,
            receiver,
            broker: self.clone(),
        })
    }

    /// Delivers `message` to every subscription matching `topic` and returns
    /// how many received it.
    pub async fn publish(&self, topic: &str, message: M) -> usize {
        // Collect first: no map guard may be held across an await.
        let targets: Vec<(u64, mpsc::Sender<M>)> = self
            .inner
            .subscribers
            .iter()
            .filter(|s| s.filters.iter().any(|f| topic_matches(f, topic)))
            .map(|s| (*s.key(), s.sender.clone()))
            .collect();

        let mut delivered = 0;
        for (id, sender) in targets {
            if sender.send(message.clone()).await.is_ok() {
                delivered += 1;
            } else {
                self.inner.subscribers.remove(&id);
            }
        }
        trace!(topic, delivered, "Published");
        delivered
    }

    /// Drops every subscription of `client_id`; their receivers observe the
    /// end of stream. Returns the number of subscriptions removed.
    pub fn disconnect(&self, client_id: &str) -> usize {
        let before = self.inner.subscribers.len();
        self.inner.subscribers.retain(|_, s| s.client_id != client_id);
        let removed = before.saturating_sub(self.inner.subscribers.len());
        debug!(client_id, removed, "Client disconnected by broker");
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    fn unsubscribe(&self, id: u64) {
        self.inner.subscribers.remove(&id);
    }
}

/// Receiving end of [`EventBroker::subscribe`]. Unregisters on drop.
pub struct Subscription<M: Clone + Send + Sync + 'static> {
    id: u64,
    receiver: mpsc::Receiver<M>,
    broker: EventBroker<M>,
}

impl<M: Clone + Send + Sync + 'static> Subscription<M> {
    /// Next message, or `None` once the broker dropped this subscription.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }
}

impl<M: Clone + Send + Sync + 'static> Drop for Subscription<M> {
    fn drop(&mut self) {
        self.broker.unsubscribe(self.id);
    }
}
