//! Dependent garbage collector.
//!
//! Watches a [`WatcherStore`] of dependents, indexes them by owner uid, and
//! deletes dependents whose owner is gone. Owner existence is checked through
//! a metadata-only lookup; an inconclusive lookup is retried later and never
//! leads to a deletion.
//!
//! Only owner kinds listed in [`GcConfig::owner_filters`] are ever acted on.

mod workqueue;

pub use workqueue::*;


use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::async_trait;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::utils::async_task::spawn_task;
use crate::BackoffPolicy;
use crate::CompiledSelectors;
use crate::GcConfig;
use crate::ListSelectors;
use crate::NamespacedName;
use crate::ObjectMeta;
use crate::OwnerFilterConfig;
use crate::OwnerReference;
use crate::Resource;
use crate::Result;
use crate::WatchEventType;
use crate::WatcherStore;

/// Result of an owner existence check.
#[derive(Debug, Clone, PartialEq)]
pub enum OwnerLookup {
    Found(ObjectMeta),
    NotFound,
}

/// Metadata-only access to owner objects.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OwnerMetadataClient: Send + Sync + 'static {
    /// Looks up the owner `name` of the kind described by `filter`.
    ///
    /// Returns an error when existence cannot be decided; the collector then
    /// retries instead of deleting.
    async fn lookup(&self, filter: &OwnerFilterConfig, namespace: &str, name: &str) -> Result<OwnerLookup>;
}

/// Writes against the dependents the collector manages.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DependentClient: Send + Sync + 'static {
    /// Current metadata of the dependent. A missing dependent is reported as
    /// [`GcError::NotFound`](crate::GcError::NotFound).
    async fn get(&self, key: &NamespacedName) -> Result<ObjectMeta>;

    /// Deletes the dependent only while its uid is still `uid`.
    async fn delete(&self, key: &NamespacedName, uid: &str) -> Result<()>;

    /// Drops the owner reference to `owner_uid`, keeping the dependent.
    async fn remove_owner_reference(&self, key: &NamespacedName, owner_uid: &str) -> Result<()>;
}

/// One dependent checked against one of its owners.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GcItem {
    pub dependent: NamespacedName,
    pub owner_uid: String,
}

/// What the worker does with an item after processing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemAction {
    /// Done; reset its backoff
    Forget,
    /// Failed; retry with per-item backoff
    Requeue,
    /// Undecided; check again after a fixed delay
    RetryAfter(Duration),
}

struct OwnerFilter {
    config: OwnerFilterConfig,
    selectors: CompiledSelectors,
}

impl OwnerFilter {
    fn covers(&self, owner: &OwnerReference) -> bool {
        let (group, version) = owner.group_version();
        self.config.group == group && self.config.version == version && self.config.kind == owner.kind
    }
}

#[derive(Default)]
struct OwnerIndex {
    dependents: HashMap<String, HashSet<NamespacedName>>,
    owners: HashMap<NamespacedName, Vec<String>>,
}

impl OwnerIndex {
    fn upsert(&mut self, meta: &ObjectMeta) {
        let key = meta.namespaced_name();
        self.remove(&key);
        let owner_uids: Vec<String> = meta
            .owner_references
            .iter()
            .map(|o| o.uid.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if owner_uids.is_empty() {
            return;
        }
        for owner_uid in &owner_uids {
            self.dependents
                .entry(owner_uid.clone())
                .or_default()
                .insert(key.clone());
        }
        self.owners.insert(key, owner_uids);
    }

    fn remove(&mut self, key: &NamespacedName) {
        let Some(owner_uids) = self.owners.remove(key) else {
            return;
        };
        for owner_uid in owner_uids {
            if let Some(dependents) = self.dependents.get_mut(&owner_uid) {
                dependents.remove(key);
                if dependents.is_empty() {
                    self.dependents.remove(&owner_uid);
                }
            }
        }
    }
}

pub struct GarbageCollector<R: Resource> {
    inner: Arc<GcInner<R>>,
}

impl<R: Resource> Clone for GarbageCollector<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct GcInner<R: Resource> {
    config: GcConfig,
    filters: Vec<OwnerFilter>,
    store: WatcherStore<R>,
    owners: Arc<dyn OwnerMetadataClient>,
    dependents: Arc<dyn DependentClient>,
    queue: WorkQueue<GcItem>,
    index: RwLock<OwnerIndex>,
    shutdown: CancellationToken,
}

impl<R: Resource> GarbageCollector<R> {
    /// # Errors
    /// - [`StoreError::InvalidSelector`](crate::StoreError::InvalidSelector)
    ///   for malformed owner filter selectors
    pub fn new(
        config: GcConfig,
        backoff: BackoffPolicy,
        store: WatcherStore<R>,
        owners: Arc<dyn OwnerMetadataClient>,
        dependents: Arc<dyn DependentClient>,
    ) -> Result<Self> {
        let filters = config
            .owner_filters
            .iter()
            .map(|f| {
                let selectors = ListSelectors {
                    label_selector: f.label_selector.clone(),
                    field_selector: f.field_selector.clone(),
                }
                .compile()?;
                Ok(OwnerFilter {
                    config: f.clone(),
                    selectors,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            inner: Arc::new(GcInner {
                config,
                filters,
                store,
                owners,
                dependents,
                queue: WorkQueue::new(backoff),
                index: RwLock::new(OwnerIndex::default()),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// Starts the index maintainer, the workers and the orphan scan.
    pub fn run(&self) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();
        let mut watcher = self.inner.store.get_watcher("", &ListSelectors::everything())?;

        let gc = self.clone();
        spawn_task(
            "gc owner index",
            move || async move {
                loop {
                    tokio::select! {
                        _ = gc.inner.shutdown.cancelled() => return Ok(()),
                        event = watcher.next() => match event {
                            Some(event) => match event.event_type {
                                WatchEventType::Added | WatchEventType::Modified => gc.index_dependent(event.object.meta()),
                                WatchEventType::Deleted => gc.unindex_dependent(&event.object.meta().namespaced_name()),
                            },
                            None => return Ok(()),
                        },
                    }
                }
            },
            Some(&mut handles),
        );

        for worker in 0..self.inner.config.workers {
            let gc = self.clone();
            spawn_task(
                "gc worker",
                move || async move {
                    gc.worker(worker).await;
                    Ok(())
                },
                Some(&mut handles),
            );
        }

        if self.inner.config.orphan_scan_interval_in_secs > 0 {
            let period = Duration::from_secs(self.inner.config.orphan_scan_interval_in_secs);
            let gc = self.clone();
            spawn_task(
                "gc orphan scan",
                move || async move {
                    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                    loop {
                        tokio::select! {
                            _ = gc.inner.shutdown.cancelled() => return Ok(()),
                            _ = ticker.tick() => gc.scan_orphans(),
                        }
                    }
                },
                Some(&mut handles),
            );
        }

        info!(workers = self.inner.config.workers, filters = self.inner.filters.len(), "Garbage collector started");
        Ok(handles)
    }

    /// Queues every indexed dependent of `owner_uid` for a check.
    pub fn owner_deleted(&self, owner_uid: &str) {
        let dependents = self.dependents_of(owner_uid);
        debug!(owner_uid, dependents = dependents.len(), "Owner deleted");
        for dependent in dependents {
            self.inner.queue.add(GcItem {
                dependent,
                owner_uid: owner_uid.to_string(),
            });
        }
    }

    /// Queues `dependent` for a check against each of its owners.
    pub fn enqueue(&self, dependent: &ObjectMeta) {
        let key = dependent.namespaced_name();
        for owner in &dependent.owner_references {
            self.inner.queue.add(GcItem {
                dependent: key.clone(),
                owner_uid: owner.uid.clone(),
            });
        }
    }

    /// Queues every indexed dependent for a check against its owners.
    pub fn scan_orphans(&self) {
        let items: Vec<GcItem> = {
            let index = self.inner.index.read();
            index
                .dependents
                .iter()
                .flat_map(|(owner_uid, dependents)| {
                    dependents.iter().map(move |dependent| GcItem {
                        dependent: dependent.clone(),
                        owner_uid: owner_uid.clone(),
                    })
                })
                .collect()
        };
        trace!(items = items.len(), "Orphan scan");
        for item in items {
            self.inner.queue.add(item);
        }
    }

    pub fn dependents_of(&self, owner_uid: &str) -> Vec<NamespacedName> {
        let mut dependents: Vec<_> = self
            .inner
            .index
            .read()
            .dependents
            .get(owner_uid)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default();
        dependents.sort();
        dependents
    }

    pub fn queue(&self) -> &WorkQueue<GcItem> {
        &self.inner.queue
    }

    pub fn shut_down(&self) {
        self.inner.shutdown.cancel();
        self.inner.queue.shut_down();
    }

    pub(crate) fn index_dependent(&self, meta: &ObjectMeta) {
        self.inner.index.write().upsert(meta);
    }

    pub(crate) fn unindex_dependent(&self, key: &NamespacedName) {
        self.inner.index.write().remove(key);
    }

    async fn worker(&self, worker: usize) {
        while let Some(item) = self.inner.queue.get().await {
            let action = self.process_item(&item).await;
            trace!(worker, ?item, ?action, "Item processed");
            match action {
                ItemAction::Forget => self.inner.queue.forget(&item),
                ItemAction::Requeue => self.inner.queue.add_rate_limited(item.clone()),
                ItemAction::RetryAfter(delay) => self.inner.queue.add_after(item.clone(), delay),
            }
            self.inner.queue.done(&item);
        }
        debug!(worker, "GC worker stopped");
    }

    /// Decides and carries out what happens to one dependent.
    pub(crate) async fn process_item(&self, item: &GcItem) -> ItemAction {
        let dependent = match self.inner.dependents.get(&item.dependent).await {
            Ok(dependent) => dependent,
            Err(e) if e.is_not_found() => {
                trace!(dependent = %item.dependent, "Dependent already gone");
                return ItemAction::Forget;
            }
            Err(e) => {
                warn!(dependent = %item.dependent, "Fetching dependent failed: {:?}", e);
                return ItemAction::Requeue;
            }
        };

        let Some(owner) = dependent
            .owner_references
            .iter()
            .find(|o| o.uid == item.owner_uid)
        else {
            return ItemAction::Forget;
        };

        let Some(filter) = self.inner.filters.iter().find(|f| f.covers(owner)) else {
            trace!(kind = %owner.kind, "Owner kind not managed, skipping");
            return ItemAction::Forget;
        };

        let lookup = self
            .inner
            .owners
            .lookup(&filter.config, &dependent.namespace, &owner.name)
            .await;
        match lookup {
            Ok(OwnerLookup::Found(found)) if !filter.selectors.matches(&found) => {
                trace!(owner = %owner.name, "Owner outside the filter selectors, skipping");
                return ItemAction::Forget;
            }
            Ok(OwnerLookup::Found(found)) if found.uid == owner.uid => return ItemAction::Forget,
            // Missing, or replaced by a new object under the same name.
            Ok(_) => {}
            Err(e) => {
                debug!(owner = %owner.name, "Owner check inconclusive: {:?}", e);
                return ItemAction::RetryAfter(Duration::from_millis(self.inner.config.owner_check_retry_ms));
            }
        }

        let result = if dependent.owner_references.len() > 1 {
            info!(dependent = %item.dependent, owner = %owner.name, "Removing reference to deleted owner");
            self.inner
                .dependents
                .remove_owner_reference(&item.dependent, &item.owner_uid)
                .await
        } else {
            info!(dependent = %item.dependent, owner = %owner.name, "Deleting orphaned dependent");
            self.inner.dependents.delete(&item.dependent, &dependent.uid).await
        };

        match result {
            Ok(()) => ItemAction::Forget,
            Err(e) if e.is_not_found() => ItemAction::Forget,
            Err(e) => {
                warn!(dependent = %item.dependent, "Collecting dependent failed: {:?}", e);
                ItemAction::Requeue
            }
        }
    }
}
