//! Rate limited work queue.
//!
//! - An item queued several times before a worker picks it up is processed once.
//! - An item is never handed to two workers at once. Adding an item that is
//!   being processed marks it dirty; it is queued again when the worker calls
//!   [`WorkQueue::done`].
//! - [`WorkQueue::add_rate_limited`] delays by per-item exponential backoff
//!   until [`WorkQueue::forget`] resets it.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::utils::exponential_backoff;
use crate::BackoffPolicy;

struct QueueState<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    failures: HashMap<T, u32>,
}

struct QueueInner<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    backoff: BackoffPolicy,
    shutdown: CancellationToken,
}

pub struct WorkQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// `backoff` drives [`WorkQueue::add_rate_limited`]; only its delays are used.
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    failures: HashMap::new(),
                }),
                notify: Notify::new(),
                backoff,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn add(&self, item: T) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let mut state = self.inner.state.lock();
        if !state.dirty.insert(item.clone()) {
            return;
        }
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Adds `item` once `delay` has passed.
    pub fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let queue = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(item),
            }
        });
    }

    /// Adds `item` after its exponential backoff and counts the failure.
    pub fn add_rate_limited(&self, item: T) {
        let failures = {
            let mut state = self.inner.state.lock();
            let failures = state.failures.entry(item.clone()).or_insert(0);
            *failures += 1;
            *failures
        };
        let delay = exponential_backoff(&self.inner.backoff, failures);
        trace!(failures, ?delay, "Requeue with backoff");
        self.add_after(item, delay);
    }

    /// Resets the backoff of `item`.
    pub fn forget(&self, item: &T) {
        self.inner.state.lock().failures.remove(item);
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.inner.state.lock().failures.get(item).copied().unwrap_or(0)
    }

    /// Waits for the next item. Returns `None` once the queue is shut down.
    ///
    /// Every item returned must be passed to [`WorkQueue::done`].
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut state = self.inner.state.lock();
                if self.inner.shutdown.is_cancelled() {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
            }
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return None,
                _ = notified => {}
            }
        }
    }

    /// Marks `item` as processed, queueing it again if it was added meanwhile.
    pub fn done(&self, item: &T) {
        let mut state = self.inner.state.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Items waiting to be picked up.
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wakes every waiting worker with `None` and drops later adds.
    pub fn shut_down(&self) {
        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}
