use crate::CloudEventsDataType;
use crate::ListOptions;
use crate::Resource;
use crate::Result;
use crate::WatcherStore;

/// Read access to the resources a client currently knows about.
pub trait Lister<R>: Send + Sync + 'static {
    fn list(&self, options: &ListOptions) -> Result<Vec<R>>;
}

/// A store holds one data type. Requests naming another type list nothing,
/// an unset type lists everything.
fn serves(data_type: &CloudEventsDataType, options: &ListOptions) -> bool {
    options.data_type == CloudEventsDataType::default() || options.data_type == *data_type
}

/// Lists an agent's cache, filtered by the hub that published each resource.
pub struct AgentStoreLister<R: Resource> {
    store: WatcherStore<R>,
    data_type: CloudEventsDataType,
}

impl<R: Resource> AgentStoreLister<R> {
    pub fn new(store: WatcherStore<R>, data_type: CloudEventsDataType) -> Self {
        Self { store, data_type }
    }
}

impl<R: Resource> Lister<R> for AgentStoreLister<R> {
    fn list(&self, options: &ListOptions) -> Result<Vec<R>> {
        if !serves(&self.data_type, options) {
            return Ok(Vec::new());
        }
        Ok(self
            .store
            .list_all()
            .into_iter()
            .filter(|r| options.all_clusters() || r.meta().namespace == options.cluster_name)
            .filter(|r| options.all_sources() || r.meta().original_source() == Some(options.source.as_str()))
            .collect())
    }
}

/// Lists the hub's cache, filtered by the cluster (namespace) each resource targets.
pub struct SourceStoreLister<R: Resource> {
    store: WatcherStore<R>,
    data_type: CloudEventsDataType,
}

impl<R: Resource> SourceStoreLister<R> {
    pub fn new(store: WatcherStore<R>, data_type: CloudEventsDataType) -> Self {
        Self { store, data_type }
    }
}

impl<R: Resource> Lister<R> for SourceStoreLister<R> {
    fn list(&self, options: &ListOptions) -> Result<Vec<R>> {
        if !serves(&self.data_type, options) {
            return Ok(Vec::new());
        }
        Ok(self
            .store
            .list_all()
            .into_iter()
            .filter(|r| options.all_clusters() || r.meta().namespace == options.cluster_name)
            .collect())
    }
}
