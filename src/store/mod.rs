//! Watcher store: the local cache of synchronized resources.
//!
//! Every received resource passes through [`WatcherStore::handle_received_resource`],
//! the single mutation entry point. Readers take snapshots under a shared lock;
//! watchers receive change notifications through their own delivery task.
//!
//! # Architecture
//!
//! ```text
//! handle_received_resource() -> write lock -> mutate maps
//!                                          -> unbounded per-watcher queue (never blocks)
//!                                                       ↓
//! Per-watcher delivery task:   queue.recv() -> bounded consumer channel
//! ```
//!
//! # Version rules
//!
//! - Added/Modified apply only when the incoming resource version is greater
//!   than the stored one. Unversioned resources (both 0) are last-writer-wins.
//! - StatusModified also applies on an equal version when the incoming
//!   sequence id orders after the stored one.
//! - Deleted with a deletion timestamp removes the entry unless the stored
//!   version is newer. Deleting an unknown resource is a successful no-op.

mod lister;
mod selector;
mod watcher;

pub use lister::*;
pub use selector::*;
pub use watcher::*;

#[cfg(test)]
mod selector_test;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::constants::DEFAULT_WATCHER_BUFFER_SIZE;
use crate::utils::sequence_id_after;
use crate::NamespacedName;
use crate::ObjectMeta;
use crate::Resource;
use crate::ResourceAction;
use crate::Result;
use crate::StoreError;

struct WatcherEntry<R> {
    namespace: String,
    selectors: CompiledSelectors,
    queue: mpsc::UnboundedSender<WatchEvent<R>>,
}

struct StoreState<R> {
    objects: BTreeMap<NamespacedName, R>,
    uids: HashMap<String, NamespacedName>,
}

impl<R: Resource> StoreState<R> {
    fn locate(&self, resource: &R) -> Option<NamespacedName> {
        let meta = resource.meta();
        if !meta.uid.is_empty() {
            if let Some(key) = self.uids.get(&meta.uid) {
                return Some(key.clone());
            }
        }
        let key = meta.namespaced_name();
        if !meta.name.is_empty() && self.objects.contains_key(&key) {
            return Some(key);
        }
        None
    }

    fn upsert(&mut self, resource: R) -> Option<R> {
        let key = resource.meta().namespaced_name();
        let uid = resource.meta().uid.clone();

        if !uid.is_empty() {
            if let Some(old_key) = self.uids.insert(uid.clone(), key.clone()) {
                if old_key != key {
                    self.objects.remove(&old_key);
                }
            }
        }

        let previous = self.objects.insert(key, resource);
        if let Some(previous) = &previous {
            let previous_uid = &previous.meta().uid;
            if !previous_uid.is_empty() && *previous_uid != uid {
                self.uids.remove(previous_uid);
            }
        }
        previous
    }

    fn remove(&mut self, key: &NamespacedName) -> Option<R> {
        let removed = self.objects.remove(key)?;
        self.uids.remove(&removed.meta().uid);
        Some(removed)
    }
}

/// Whether a status update described by `incoming` is older than, or a
/// redelivery of, the status already held in `stored`.
///
/// Lower versions are stale. On an equal version the sequence ids decide,
/// and an update missing a sequence id on either side is never stale.
pub(crate) fn status_is_stale(incoming: &ObjectMeta, stored: &ObjectMeta) -> bool {
    let incoming_version = incoming.resource_version_number().unwrap_or_default();
    let stored_version = stored.resource_version_number().unwrap_or_default();
    incoming_version < stored_version
        || (incoming_version == stored_version
            && match (incoming.sequence_id(), stored.sequence_id()) {
                (Some(new), Some(old)) => !sequence_id_after(new, old),
                _ => false,
            })
}

pub(crate) struct StoreInner<R> {
    state: RwLock<StoreState<R>>,
    watchers: DashMap<u64, WatcherEntry<R>>,
    next_id: AtomicU64,
    buffer_size: usize,
    closed: CancellationToken,
}

/// Thread-safe resource cache with watch support. Cloning shares the cache.
pub struct WatcherStore<R: Resource> {
    inner: Arc<StoreInner<R>>,
}

impl<R: Resource> Clone for WatcherStore<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Resource> Default for WatcherStore<R> {
    fn default() -> Self {
        Self::new(DEFAULT_WATCHER_BUFFER_SIZE)
    }
}

impl<R: Resource> WatcherStore<R> {
    pub fn new(watcher_buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(StoreState {
                    objects: BTreeMap::new(),
                    uids: HashMap::new(),
                }),
                watchers: DashMap::new(),
                next_id: AtomicU64::new(1),
                buffer_size: watcher_buffer_size.max(1),
                closed: CancellationToken::new(),
            }),
        }
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<R> {
        self.inner
            .state
            .read()
            .objects
            .get(&NamespacedName::new(namespace, name))
            .cloned()
    }

    pub fn get_by_uid(&self, uid: &str) -> Option<R> {
        let state = self.inner.state.read();
        state
            .uids
            .get(uid)
            .and_then(|key| state.objects.get(key))
            .cloned()
    }

    /// Cached resources in `namespace` (empty = all namespaces) matching `selectors`.
    pub fn list(&self, namespace: &str, selectors: &ListSelectors) -> Result<Vec<R>> {
        let compiled = selectors.compile()?;
        let state = self.inner.state.read();
        Ok(state
            .objects
            .values()
            .filter(|r| namespace.is_empty() || r.meta().namespace == namespace)
            .filter(|r| compiled.matches(r.meta()))
            .cloned()
            .collect())
    }

    pub fn list_all(&self) -> Vec<R> {
        self.inner.state.read().objects.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opens an independent watch over `namespace` (empty = all namespaces).
    ///
    /// The watcher first receives `Added` for every cached resource that
    /// matches, then every later change in receipt order.
    ///
    /// # Errors
    /// - [`StoreError::InvalidSelector`] for malformed selectors
    /// - [`StoreError::NoRuntime`] when called outside a tokio runtime
    pub fn get_watcher(&self, namespace: &str, selectors: &ListSelectors) -> Result<Watcher<R>> {
        let compiled = selectors.compile()?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| StoreError::NoRuntime(id))?;

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (sink_tx, sink_rx) = mpsc::channel(self.inner.buffer_size);
        let stop = self.inner.closed.child_token();

        {
            // Seed and register under the read lock so no mutation slips in between.
            let state = self.inner.state.read();
            for object in state.objects.values() {
                let meta = object.meta();
                if (namespace.is_empty() || meta.namespace == namespace) && compiled.matches(meta) {
                    let _ = queue_tx.send(WatchEvent {
                        event_type: WatchEventType::Added,
                        object: object.clone(),
                    });
                }
            }
            self.inner.watchers.insert(
                id,
                WatcherEntry {
                    namespace: namespace.to_string(),
                    selectors: compiled,
                    queue: queue_tx,
                },
            );
        }

        runtime.spawn(deliver(id, queue_rx, sink_tx, stop.clone()));
        trace!(watcher_id = id, namespace, "Watcher registered");

        Ok(Watcher::new(id, sink_rx, stop, self.inner.clone()))
    }

    /// Applies a received resource according to `action`.
    ///
    /// Stale and duplicate deliveries are accepted and ignored, so replays are
    /// idempotent and the stored version never decreases. Returns whether the
    /// change was applied; watchers are only notified of applied changes.
    ///
    /// # Errors
    /// - [`StoreError::InvalidResource`] when the resource has no name (a
    ///   deletion may instead be addressed by uid alone) or a non-numeric version
    pub fn handle_received_resource(&self, action: ResourceAction, resource: R) -> Result<bool> {
        let meta = resource.meta();
        let addressable_by_uid = action == ResourceAction::Deleted
            && meta.deletion_timestamp.is_some()
            && !meta.uid.is_empty();
        if meta.name.is_empty() && !addressable_by_uid {
            return Err(StoreError::InvalidResource(format!(
                "resource {} has no name",
                meta.namespaced_name()
            ))
            .into());
        }
        let incoming = meta.resource_version_number().map_err(|e| {
            StoreError::InvalidResource(format!(
                "resource {} has an invalid version: {e}",
                meta.namespaced_name()
            ))
        })?;

        let mut state = self.inner.state.write();
        let existing_key = state.locate(&resource);
        let existing = existing_key
            .as_ref()
            .and_then(|key| state.objects.get(key))
            .filter(|stored| {
                let (stored_uid, uid) = (&stored.meta().uid, &resource.meta().uid);
                stored_uid.is_empty() || uid.is_empty() || stored_uid == uid
            });
        let stored_version = match existing {
            Some(stored) => Some(stored.meta().resource_version_number().unwrap_or_default()),
            None => None,
        };

        let event = match action {
            ResourceAction::Deleted if resource.meta().deletion_timestamp.is_some() => {
                let Some(key) = existing_key.filter(|_| stored_version.is_some()) else {
                    trace!(uid = %resource.meta().uid, "Deleting unknown resource, ignore");
                    return Ok(false);
                };
                if stored_version.is_some_and(|stored| incoming != 0 && incoming < stored) {
                    debug!(%key, incoming, "Ignore stale deletion");
                    return Ok(false);
                }
                let mut removed = match state.remove(&key) {
                    Some(removed) => removed,
                    None => return Ok(false),
                };
                removed.meta_mut().deletion_timestamp = resource.meta().deletion_timestamp;
                WatchEvent {
                    event_type: WatchEventType::Deleted,
                    object: removed,
                }
            }
            ResourceAction::StatusModified => {
                if let (Some(stored), Some(stored_version)) = (existing, stored_version) {
                    if status_is_stale(resource.meta(), stored.meta()) {
                        debug!(
                            key = %resource.meta().namespaced_name(),
                            incoming,
                            stored_version,
                            "Ignore stale status update"
                        );
                        return Ok(false);
                    }
                }
                self.upsert_event(&mut state, resource)
            }
            _ => {
                if let Some(stored_version) = stored_version {
                    let unversioned = incoming == 0 && stored_version == 0;
                    if incoming <= stored_version && !unversioned {
                        trace!(
                            key = %resource.meta().namespaced_name(),
                            incoming,
                            stored_version,
                            "Ignore stale or duplicate update"
                        );
                        return Ok(false);
                    }
                }
                self.upsert_event(&mut state, resource)
            }
        };

        self.notify(&event);
        Ok(true)
    }

    fn upsert_event(&self, state: &mut StoreState<R>, resource: R) -> WatchEvent<R> {
        let object = resource.clone();
        let event_type = match state.upsert(resource) {
            Some(_) => WatchEventType::Modified,
            None => WatchEventType::Added,
        };
        WatchEvent { event_type, object }
    }

    // Called with the write lock held so notifications follow mutation order.
    fn notify(&self, event: &WatchEvent<R>) {
        let meta = event.object.meta();
        for entry in self.inner.watchers.iter() {
            if !entry.namespace.is_empty() && entry.namespace != meta.namespace {
                continue;
            }
            if !entry.selectors.matches(meta) {
                continue;
            }
            let _ = entry.queue.send(event.clone());
        }
    }

    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.len()
    }

    /// Closes every watcher. The cache itself stays readable.
    pub fn close(&self) {
        self.inner.closed.cancel();
        self.inner.watchers.clear();
    }
}
