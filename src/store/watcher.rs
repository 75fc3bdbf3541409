use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::StoreInner;
use crate::Resource;

/// Event type for watch notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct WatchEvent<R> {
    pub event_type: WatchEventType,
    pub object: R,
}

/// Handle for a registered watcher
///
/// When dropped or stopped, the watcher is unregistered from the store and its
/// delivery task exits. Events already queued for the watcher are discarded.
pub struct Watcher<R: Resource> {
    id: u64,
    receiver: mpsc::Receiver<WatchEvent<R>>,
    stop: CancellationToken,
    store: Arc<StoreInner<R>>,
}

impl<R: Resource> Watcher<R> {
    pub(super) fn new(
        id: u64,
        receiver: mpsc::Receiver<WatchEvent<R>>,
        stop: CancellationToken,
        store: Arc<StoreInner<R>>,
    ) -> Self {
        Self {
            id,
            receiver,
            stop,
            store,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the watcher is stopped or the store closed.
    pub async fn next(&mut self) -> Option<WatchEvent<R>> {
        self.receiver.recv().await
    }

    pub fn receiver_mut(&mut self) -> &mut mpsc::Receiver<WatchEvent<R>> {
        &mut self.receiver
    }

    pub fn stop(&self) {
        self.stop.cancel();
        self.store.watchers.remove(&self.id);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

impl<R: Resource> Drop for Watcher<R> {
    fn drop(&mut self) {
        self.stop();
        trace!(watcher_id = self.id, "Watcher unregistered");
    }
}

/// Moves events from the store's unbounded per-watcher queue to the bounded
/// consumer channel, so a slow consumer never blocks store mutations.
pub(super) async fn deliver<R: Resource>(
    id: u64,
    mut queue: mpsc::UnboundedReceiver<WatchEvent<R>>,
    sink: mpsc::Sender<WatchEvent<R>>,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            event = queue.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            sent = sink.send(event) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    trace!(watcher_id = id, "Watcher delivery task stopped");
}
