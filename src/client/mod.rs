//! Hub and agent clients.
//!
//! - [`EventClient`] - Connection owner: reconnects, serialized writes, receive queue
//! - [`SourceClient`] - Hub side: publishes specs, ingests status, answers spec resync
//! - [`AgentClient`] - Agent side: receives specs, publishes status, answers status resync
//! - [`ResourceHandler`] - Callback receiving classified changes
//! - [`StoreHandler`] - Handler keeping a [`WatcherStore`] in sync before forwarding
//!
//! # Basic Usage
//! ```no_run
//! use std::sync::Arc;
//! use spoke_sync::*;
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let data_type = CloudEventsDataType::new("example.io", "v1", "manifests");
//!     let codecs = CodecRegistry::new().with(Arc::new(JsonCodec::<GenericResource>::new(data_type.clone())));
//!     let store = WatcherStore::default();
//!     let broker = EventBroker::new(64);
//!
//!     let identity = ClientIdentity::agent("cluster1", "cluster1-agent");
//!     let connector = Arc::new(MemoryConnector::new(broker, identity.clone(), TopicRouter::default()));
//!     let agent = AgentClient::new(
//!         ClientOptions::new(identity),
//!         connector,
//!         codecs,
//!         Arc::new(AgentStoreLister::new(store.clone(), data_type)),
//!         generic_status_hash(),
//!     );
//!
//!     let (tx, mut rx) = mpsc::channel(16);
//!     agent
//!         .subscribe(Arc::new(StoreHandler::new(store).forward_to(Arc::new(tx))))
//!         .await
//!         .unwrap();
//!     agent.resync(&CancellationToken::new(), SOURCE_ALL).await.unwrap();
//!
//!     while let Some((action, resource)) = rx.recv().await {
//!         println!("{action} {:?}", resource);
//!     }
//! }
//! ```

use tokio::time::Instant;
mod agent;
mod event_client;
mod handler;
mod source;

pub use agent::*;
pub use event_client::*;
pub use handler::*;
pub use source::*;

#[cfg(test)]
mod agent_test;
#[cfg(test)]
mod event_client_test;
#[cfg(test)]
mod handler_test;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::constants::DEFAULT_RECEIVE_QUEUE_SIZE;
use crate::utils::async_task::spawn_task;
use crate::BackoffPolicy;
use crate::ClientIdentity;
use crate::ClientRole;
use crate::Envelope;
use crate::ResyncCompleted;
use crate::ResyncConfig;
use crate::ResyncGate;
use crate::ResyncKey;
use crate::Result;
use crate::Settings;

/// Everything a role client needs besides its collaborators.
#[derive(Clone)]
pub struct ClientOptions {
    pub identity: ClientIdentity,
    pub event_client: EventClientOptions,
    pub resync: ResyncConfig,
}

impl ClientOptions {
    /// Defaults: unlimited reconnects with jittered backoff, resync on
    /// reconnect, no periodic resync.
    pub fn new(identity: ClientIdentity) -> Self {
        Self {
            identity,
            event_client: EventClientOptions {
                reconnect: Settings::default().retry.reconnect,
                receive_queue_size: DEFAULT_RECEIVE_QUEUE_SIZE,
                delay_fn: None,
            },
            resync: ResyncConfig::default(),
        }
    }

    pub fn from_settings(role: ClientRole, settings: &Settings) -> Self {
        Self {
            identity: ClientIdentity::from_settings(role, settings),
            event_client: EventClientOptions {
                reconnect: settings.retry.reconnect,
                receive_queue_size: settings.client.receive_queue_size,
                delay_fn: None,
            },
            resync: settings.resync.clone(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: BackoffPolicy) -> Self {
        self.event_client.reconnect = reconnect;
        self
    }

    pub fn with_delay_fn(mut self, delay_fn: crate::DelayFn) -> Self {
        self.event_client.delay_fn = Some(delay_fn);
        self
    }

    pub fn with_resync(mut self, resync: ResyncConfig) -> Self {
        self.resync = resync;
        self
    }
}

/// Drains the receive queue until shutdown. A failing envelope is logged and
/// skipped.
pub(crate) async fn dispatch_loop<F, Fut>(
    name: &'static str,
    mut receive_rx: mpsc::Receiver<Envelope>,
    shutdown: CancellationToken,
    mut receive: F,
) where
    F: FnMut(Envelope) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        let envelope = tokio::select! {
            _ = shutdown.cancelled() => break,
            envelope = receive_rx.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };
        let event_id = envelope.id.clone();
        if let Err(e) = receive(envelope).await {
            warn!(client = name, %event_id, "Drop event: {:?}", e);
        }
    }
    debug!(client = name, "Dispatch loop stopped");
}

/// A resync request waiting for, or being given, its response.
pub(crate) struct PendingResync {
    pub request: Envelope,
    /// Response durations are measured from here, time spent parked included
    pub received_at: Instant,
}

/// Runs `respond` for `request` on a background task, coalescing requests
/// with the same key through `gate`.
pub(crate) fn schedule_resync_response<F, Fut>(
    gate: Arc<ResyncGate<PendingResync>>,
    completions: broadcast::Sender<ResyncCompleted>,
    key: ResyncKey,
    request: PendingResync,
    timeout: Duration,
    respond: F,
) where
    F: Fn(PendingResync) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<usize>> + Send + 'static,
{
    let Some(request) = gate.begin(&key, request) else {
        debug!(%key, "Resync response already running, request parked");
        return;
    };

    spawn_task(
        "resync response",
        move || async move {
            let mut request = request;
            loop {
                match crate::utils::async_task::with_timeout(timeout, respond(request)).await {
                    Ok(published) => {
                        debug!(%key, published, "Resync response finished");
                        let _ = completions.send(ResyncCompleted {
                            key: key.clone(),
                            published,
                        });
                    }
                    Err(e) => warn!(%key, "Resync response failed: {:?}", e),
                }
                match gate.finish(&key) {
                    Some(next) => request = next,
                    None => break,
                }
            }
            Ok(())
        },
        None,
    );
}

/// Calls `resync` after every reconnect and, when configured, periodically.
pub(crate) fn spawn_resync_triggers<F, Fut>(
    name: &'static str,
    events: &Arc<EventClient>,
    config: &ResyncConfig,
    on_reconnect: bool,
    resync: F,
) where
    F: Fn() -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    if on_reconnect {
        let mut reconnected = events.reconnected();
        let shutdown = events.shutdown_token();
        let resync = resync.clone();
        spawn_task(
            "resync on reconnect",
            move || async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        received = reconnected.recv() => match received {
                            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                                debug!(client = name, "Reconnected, resyncing");
                                if let Err(e) = resync().await {
                                    warn!(client = name, "Resync after reconnect failed: {:?}", e);
                                }
                            }
                            Err(broadcast::error::RecvError::Closed) => return Ok(()),
                        },
                    }
                }
            },
            None,
        );
    }

    if config.interval_in_secs > 0 {
        let period = Duration::from_secs(config.interval_in_secs);
        let shutdown = events.shutdown_token();
        spawn_task(
            "periodic resync",
            move || async move {
                let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = ticker.tick() => {
                            if let Err(e) = resync().await {
                                warn!(client = name, "Periodic resync failed: {:?}", e);
                            }
                        }
                    }
                }
            },
            None,
        );
    }
}
