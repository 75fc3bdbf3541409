//! Transport-agnostic send/receive engine shared by hub and agent clients.
//!
//! # Connection lifecycle
//!
//! ```text
//!               start()                 transport error (current generation)
//! Disconnected ─────────> Connected ─────────────────────────────> Reconnecting
//!       ^                     ^                                         │
//!       │                     └──────────── connect succeeded ──────────┤
//!       └──────────────────── retries exhausted (terminal) ─────────────┘
//! ```
//!
//! Every connection gets a generation number. Errors are reported tagged with
//! the generation they were observed on, so a late error from a replaced
//! connection never triggers a second reconnect.
//!
//! Every reconnect attempt waits for the delay function first. A connection
//! that drops before it proved healthy (a successful send, or staying up for
//! a while) counts as a failed attempt, so a peer accepting and immediately
//! dropping connections still exhausts the retry budget.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::constants::STABLE_CONNECTION_AFTER;
use crate::metrics;
use crate::utils::async_task::spawn_task;
use crate::utils::jittered_backoff;
use crate::BackoffPolicy;
use crate::ClientIdentity;
use crate::DelayFn;
use crate::Envelope;
use crate::Error;
use crate::Result;
use crate::Transport;
use crate::TransportConnector;
use crate::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Tuning of an [`EventClient`].
#[derive(Clone)]
pub struct EventClientOptions {
    /// Attempts and delays of the (re)connect loop
    pub reconnect: BackoffPolicy,
    /// Hand-off queue between the receive loop and the role client
    pub receive_queue_size: usize,
    /// Delay before each retry, given the number of consecutive failures;
    /// defaults to jittered exponential backoff over `reconnect`
    pub delay_fn: Option<DelayFn>,
}

struct Connection {
    generation: u64,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
    connected_at: Instant,
    healthy: AtomicBool,
}

impl Connection {
    fn proved_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed) || self.connected_at.elapsed() >= STABLE_CONNECTION_AFTER
    }
}

struct Exhausted {
    attempts: u32,
    last_error: String,
}

pub struct EventClient {
    identity: ClientIdentity,
    connector: Arc<dyn TransportConnector>,
    policy: BackoffPolicy,
    delay_fn: DelayFn,

    connection: ArcSwapOption<Connection>,
    generation: AtomicU64,
    // Transports are not assumed to support concurrent writers.
    write_lock: Mutex<()>,

    state_tx: watch::Sender<ConnectionState>,
    errors_tx: mpsc::UnboundedSender<(u64, Error)>,
    errors_rx: SyncMutex<Option<mpsc::UnboundedReceiver<(u64, Error)>>>,
    terminal: SyncMutex<Option<Exhausted>>,
    reconnected_tx: broadcast::Sender<u64>,

    receive_tx: mpsc::Sender<Envelope>,
    shutdown: CancellationToken,
}

impl EventClient {
    /// Creates a disconnected client and the queue its receive loops feed.
    pub fn new(
        identity: ClientIdentity,
        connector: Arc<dyn TransportConnector>,
        options: EventClientOptions,
    ) -> (Arc<Self>, mpsc::Receiver<Envelope>) {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (reconnected_tx, _) = broadcast::channel(16);
        let (receive_tx, receive_rx) = mpsc::channel(options.receive_queue_size.max(1));
        let delay_fn = options
            .delay_fn
            .unwrap_or_else(|| jittered_backoff(options.reconnect));

        let client = Arc::new(Self {
            identity,
            connector,
            policy: options.reconnect,
            delay_fn,
            connection: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            state_tx,
            errors_tx,
            errors_rx: SyncMutex::new(Some(errors_rx)),
            terminal: SyncMutex::new(None),
            reconnected_tx,
            receive_tx,
            shutdown: CancellationToken::new(),
        });
        (client, receive_rx)
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn client_id(&self) -> &str {
        &self.identity.client_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Fires with the new connection generation after every successful
    /// reconnect. The initial connection is not announced.
    pub fn reconnected(&self) -> broadcast::Receiver<u64> {
        self.reconnected_tx.subscribe()
    }

    /// Token cancelled when the client shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Connects and starts supervising the connection.
    ///
    /// Connect attempts follow the reconnect policy.
    ///
    /// # Errors
    /// - [`TransportError::ReconnectExhausted`] when every attempt failed
    /// - [`Error::Fatal`] when called twice
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let errors_rx = self
            .errors_rx
            .lock()
            .take()
            .ok_or_else(|| Error::Fatal(format!("client {} already started", self.client_id())))?;

        let (_, failures) = self.establish(0, None).await?;
        info!(client_id = %self.client_id(), "Event client connected");

        let client = self.clone();
        spawn_task(
            "connection supervisor",
            move || async move {
                client.supervise(errors_rx, failures).await;
                Ok(())
            },
            None,
        );
        Ok(())
    }

    /// Sends `envelope` once the client is connected.
    ///
    /// Transport failures are handed to the reconnect machine and the send is
    /// retried on the next connection, so callers only see added latency.
    ///
    /// # Errors
    /// - [`Error::Cancelled`] when `cancel` fires or the client shuts down
    /// - [`TransportError::ReconnectExhausted`] once reconnection gave up
    /// - encoding or routing errors of the envelope itself
    pub async fn publish(&self, cancel: &CancellationToken, envelope: Envelope) -> Result<()> {
        let event_type = envelope.cloud_events_type()?;

        loop {
            let connection = self.wait_connected(cancel).await?;

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = self.shutdown.cancelled() => return Err(Error::Cancelled),
                result = async {
                    let _guard = self.write_lock.lock().await;
                    connection.transport.send(envelope.clone()).await
                } => result,
            };

            match result {
                Ok(()) => {
                    connection.healthy.store(true, Ordering::Relaxed);
                    trace!(event_id = %envelope.id, event_type = %envelope.event_type, "Event sent");
                    metrics::record_sent(&envelope, &event_type);
                    return Ok(());
                }
                Err(e) if e.is_transport() => {
                    warn!(event_id = %envelope.id, "Send failed, waiting for reconnect: {:?}", e);
                    self.report(connection.generation, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Stops the receive loop and the supervisor. Pending publishes fail with
    /// [`Error::Cancelled`].
    pub fn close(&self) {
        self.shutdown.cancel();
        if let Some(connection) = self.connection.swap(None) {
            connection.cancel.cancel();
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
        debug!(client_id = %self.client_id(), "Event client closed");
    }

    /// Hands a transport failure to the reconnect machine. Errors tagged
    /// with an older generation are ignored.
    pub(crate) fn report(&self, generation: u64, error: Error) {
        if self.current_generation() != Some(generation) {
            trace!(generation, "Ignore error from a replaced connection: {:?}", error);
            return;
        }
        self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Reconnecting;
                return true;
            }
            false
        });
        let _ = self.errors_tx.send((generation, error));
    }

    fn current_generation(&self) -> Option<u64> {
        self.connection.load().as_ref().map(|c| c.generation)
    }

    fn terminal_error(&self) -> Option<Error> {
        self.terminal.lock().as_ref().map(|e| {
            TransportError::ReconnectExhausted {
                attempts: e.attempts,
                last_error: e.last_error.clone(),
            }
            .into()
        })
    }

    async fn wait_connected(&self, cancel: &CancellationToken) -> Result<Arc<Connection>> {
        let mut state_rx = self.state_tx.subscribe();
        loop {
            if let Some(e) = self.terminal_error() {
                return Err(e);
            }
            if *state_rx.borrow_and_update() == ConnectionState::Connected {
                if let Some(connection) = self.connection.load_full() {
                    return Ok(connection);
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = self.shutdown.cancelled() => return Err(Error::Cancelled),
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Err(TransportError::NotConnected.into());
                    }
                }
            }
        }
    }

    /// `failures` counts the consecutive failed attempts behind the current
    /// connection.
    async fn supervise(self: Arc<Self>, mut errors_rx: mpsc::UnboundedReceiver<(u64, Error)>, mut failures: u32) {
        loop {
            let (generation, error) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                reported = errors_rx.recv() => match reported {
                    Some(reported) => reported,
                    None => break,
                },
            };

            if self.current_generation() != Some(generation) {
                trace!(generation, "Ignore stale transport error");
                continue;
            }

            warn!(client_id = %self.client_id(), generation, "Transport failed, reconnecting: {:?}", error);
            self.state_tx.send_replace(ConnectionState::Reconnecting);
            if let Some(connection) = self.connection.swap(None) {
                connection.cancel.cancel();
                if connection.proved_healthy() {
                    failures = 0;
                }
            }

            match self.establish(failures.saturating_add(1), Some(error.to_string())).await {
                Ok((new_generation, used)) => {
                    failures = used;
                    info!(client_id = %self.client_id(), new_generation, "Transport reconnected");
                    metrics::record_reconnected(self.client_id());
                    let _ = self.reconnected_tx.send(new_generation);
                }
                Err(Error::Cancelled) => break,
                Err(e) => {
                    error!(client_id = %self.client_id(), "Giving up on transport: {:?}", e);
                    break;
                }
            }
        }
        debug!(client_id = %self.client_id(), "Connection supervisor stopped");
    }

    /// Connects with retries, installs the connection and starts its receive
    /// loop. Returns the new generation and the failed attempts behind it.
    ///
    /// `failures` counts consecutive failed attempts before this call. While
    /// it is non-zero, each attempt is preceded by the delay function.
    async fn establish(self: &Arc<Self>, mut failures: u32, mut last_error: Option<String>) -> Result<(u64, u32)> {
        loop {
            if self.shutdown.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if failures > 0 {
                if !self.policy.unlimited() && failures as usize >= self.policy.max_retries {
                    return Err(self.give_up(failures, last_error.unwrap_or_default()));
                }
                let delay = (self.delay_fn)(failures);
                trace!(client_id = %self.client_id(), failures, ?delay, "Waiting before connect");
                tokio::select! {
                    _ = self.shutdown.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match self.connector.connect().await {
                Ok(transport) => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let connection = Arc::new(Connection {
                        generation,
                        transport,
                        cancel: self.shutdown.child_token(),
                        connected_at: Instant::now(),
                        healthy: AtomicBool::new(false),
                    });
                    self.connection.store(Some(connection.clone()));
                    self.spawn_receive_loop(connection);
                    self.state_tx.send_replace(ConnectionState::Connected);
                    return Ok((generation, failures));
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(client_id = %self.client_id(), attempt = failures, "Connect failed: {:?}", e);
                    last_error = Some(e.to_string());
                }
            }
        }
    }

    /// Records the terminal error returned by every later publish.
    fn give_up(&self, attempts: u32, last_error: String) -> Error {
        *self.terminal.lock() = Some(Exhausted {
            attempts,
            last_error: last_error.clone(),
        });
        self.state_tx.send_replace(ConnectionState::Disconnected);
        TransportError::ReconnectExhausted { attempts, last_error }.into()
    }

    fn spawn_receive_loop(self: &Arc<Self>, connection: Arc<Connection>) {
        let client = self.clone();
        let sink = self.receive_tx.clone();
        tokio::spawn(async move {
            let result = connection
                .transport
                .start_receiver(connection.cancel.clone(), sink)
                .await;
            if connection.cancel.is_cancelled() {
                trace!(generation = connection.generation, "Receive loop cancelled");
                return;
            }
            let error = match result {
                Ok(()) => TransportError::ConnectionClosed("receive loop ended".to_string()).into(),
                Err(e) => e,
            };
            client.report(connection.generation, error);
        });
    }
}
