use std::sync::Arc;

use tokio::sync::mpsc;
use tonic::async_trait;

use crate::Error;
use crate::Resource;
use crate::ResourceAction;
use crate::Result;
use crate::WatcherStore;

/// Receives every change a role client classified.
///
/// Errors are logged by the client and do not stop the dispatch of later
/// events.
#[async_trait]
pub trait ResourceHandler<R: Resource>: Send + Sync + 'static {
    async fn on_event(&self, action: ResourceAction, resource: R) -> Result<()>;
}

#[async_trait]
impl<R: Resource> ResourceHandler<R> for mpsc::Sender<(ResourceAction, R)> {
    async fn on_event(&self, action: ResourceAction, resource: R) -> Result<()> {
        self.send((action, resource))
            .await
            .map_err(|_| Error::Fatal("resource handler channel closed".to_string()))
    }
}

/// Applies each change to a [`WatcherStore`], then hands it to the next
/// handler. Listers over the same store then see what the client received.
/// Changes the store ignores as stale are not forwarded.
pub struct StoreHandler<R: Resource> {
    store: WatcherStore<R>,
    next: Option<Arc<dyn ResourceHandler<R>>>,
}

impl<R: Resource> StoreHandler<R> {
    pub fn new(store: WatcherStore<R>) -> Self {
        Self { store, next: None }
    }

    pub fn forward_to(mut self, next: Arc<dyn ResourceHandler<R>>) -> Self {
        self.next = Some(next);
        self
    }
}

#[async_trait]
impl<R: Resource> ResourceHandler<R> for StoreHandler<R> {
    async fn on_event(&self, action: ResourceAction, resource: R) -> Result<()> {
        if !self.store.handle_received_resource(action, resource.clone())? {
            return Ok(());
        }
        match &self.next {
            Some(next) => next.on_event(action, resource).await,
            None => Ok(()),
        }
    }
}
