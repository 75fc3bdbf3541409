use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;

use super::dispatch_loop;
use super::schedule_resync_response;
use super::spawn_resync_triggers;
use super::ClientOptions;
use super::PendingResync;
use super::EventClient;
use super::ResourceHandler;
use crate::metrics;
use crate::plan_spec_resync;
use crate::resync_response_type;
use crate::store::status_is_stale;
use crate::tombstone;
use crate::utils::async_task::spawn_task;
use crate::CloudEventsType;
use crate::CodecError;
use crate::CodecRegistry;
use crate::Envelope;
use crate::Error;
use crate::EventAction;
use crate::EventBuilder;
use crate::EventSubResource;
use crate::ListOptions;
use crate::Lister;
use crate::Resource;
use crate::ResourceAction;
use crate::ResourceStatusHash;
use crate::ResourceStatusHashList;
use crate::ResourceVersionList;
use crate::ResyncCompleted;
use crate::ResyncConfig;
use crate::ResyncGate;
use crate::ResyncKey;
use crate::Result;
use crate::SpecResyncDecision;
use crate::StatusHashFn;
use crate::TransportConnector;
use crate::CLUSTER_ALL;
use crate::SOURCE_ALL;

/// Hub side of the protocol.
///
/// Publishes specs to clusters, ingests status updates for resources it
/// owns, and answers spec resync requests from agents.
pub struct SourceClient<R: Resource> {
    inner: Arc<SourceInner<R>>,
}

impl<R: Resource> Clone for SourceClient<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct SourceInner<R: Resource> {
    source_id: String,
    events: Arc<EventClient>,
    receive_rx: Mutex<Option<mpsc::Receiver<Envelope>>>,
    codecs: CodecRegistry<R>,
    lister: Arc<dyn Lister<R>>,
    status_hash: StatusHashFn<R>,
    resync: ResyncConfig,
    gate: Arc<ResyncGate<PendingResync>>,
    completions: broadcast::Sender<ResyncCompleted>,
}

impl<R: Resource> SourceClient<R> {
    pub fn new(
        options: ClientOptions,
        connector: Arc<dyn TransportConnector>,
        codecs: CodecRegistry<R>,
        lister: Arc<dyn Lister<R>>,
        status_hash: StatusHashFn<R>,
    ) -> Self {
        let source_id = options.identity.source_id.clone();
        let (events, receive_rx) = EventClient::new(options.identity, connector, options.event_client);
        let (completions, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(SourceInner {
                source_id,
                events,
                receive_rx: Mutex::new(Some(receive_rx)),
                codecs,
                lister,
                status_hash,
                resync: options.resync,
                gate: Arc::new(ResyncGate::new()),
                completions,
            }),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.inner.source_id
    }

    pub fn event_client(&self) -> &Arc<EventClient> {
        &self.inner.events
    }

    /// Notified after each spec resync response finished publishing.
    pub fn resync_completions(&self) -> broadcast::Receiver<ResyncCompleted> {
        self.inner.completions.subscribe()
    }

    /// Publishes the spec of `resource` to the cluster named by its namespace.
    ///
    /// # Errors
    /// - [`CodecError::Encode`] for status event types or a resource without
    ///   a cluster
    /// - [`CodecError::UnsupportedDataType`] for unregistered data types
    /// - [`Error::Cancelled`] when `cancel` fires
    pub async fn publish(
        &self,
        cancel: &CancellationToken,
        event_type: &CloudEventsType,
        resource: &R,
    ) -> Result<()> {
        if event_type.sub_resource != EventSubResource::Spec {
            return Err(CodecError::Encode(format!(
                "sources only publish spec events, got {event_type}"
            ))
            .into());
        }
        let codec = self.inner.codecs.require(&event_type.data_type)?;
        let envelope = codec.encode(&self.inner.source_id, event_type, resource)?;
        self.inner.events.publish(cancel, envelope).await
    }

    /// Asks the agent of `cluster_name` (or every agent for [`CLUSTER_ALL`])
    /// to resend status that differs from the hub's, one request per
    /// registered data type.
    pub async fn resync(&self, cancel: &CancellationToken, cluster_name: &str) -> Result<()> {
        for data_type in self.inner.codecs.data_types() {
            let resources = self.inner.lister.list(&ListOptions {
                cluster_name: cluster_name.to_string(),
                source: self.inner.source_id.clone(),
                data_type: data_type.clone(),
            })?;
            let hashes = ResourceStatusHashList {
                hashes: resources
                    .iter()
                    .map(|r| {
                        Ok(ResourceStatusHash {
                            resource_id: r.meta().uid.clone(),
                            status_hash: (self.inner.status_hash)(r)?,
                        })
                    })
                    .collect::<Result<_>>()?,
            };

            let event_type = CloudEventsType::new(
                data_type.clone(),
                EventSubResource::Status,
                EventAction::ResyncRequest,
            );
            let mut envelope = EventBuilder::new(&self.inner.source_id, event_type)
                .with_cluster_name(cluster_name)
                .build();
            envelope.set_json_data(&hashes)?;

            debug!(
                source = %self.inner.source_id,
                cluster = cluster_name,
                %data_type,
                known = hashes.hashes.len(),
                "Requesting status resync"
            );
            self.inner.events.publish(cancel, envelope).await?;
        }
        Ok(())
    }

    /// Connects and starts handing received status to `handler`.
    ///
    /// When a resync interval is configured, also requests a status resync
    /// from every cluster periodically.
    ///
    /// # Errors
    /// - [`Error::Fatal`] when called twice
    /// - the initial connect error
    pub async fn subscribe(&self, handler: Arc<dyn ResourceHandler<R>>) -> Result<()> {
        let receive_rx = self
            .inner
            .receive_rx
            .lock()
            .take()
            .ok_or_else(|| Error::Fatal(format!("source {} already subscribed", self.inner.source_id)))?;

        self.inner.events.start().await?;

        let client = self.clone();
        let shutdown = self.inner.events.shutdown_token();
        spawn_task(
            "source dispatch",
            move || async move {
                dispatch_loop("source", receive_rx, shutdown, |envelope| {
                    let client = client.clone();
                    let handler = handler.clone();
                    async move { client.receive(envelope, handler.as_ref()).await }
                })
                .await;
                Ok(())
            },
            None,
        );

        let client = self.clone();
        spawn_resync_triggers(
            "source",
            &self.inner.events,
            &self.inner.resync,
            false,
            move || {
                let client = client.clone();
                async move {
                    let cancel = client.inner.events.shutdown_token();
                    client.resync(&cancel, CLUSTER_ALL).await
                }
            },
        );

        info!(source = %self.inner.source_id, "Source subscribed");
        Ok(())
    }

    pub fn close(&self) {
        self.inner.events.close();
    }

    /// Handles one inbound envelope.
    pub(crate) async fn receive(&self, envelope: Envelope, handler: &dyn ResourceHandler<R>) -> Result<()> {
        let received_at = Instant::now();
        let event_type = envelope.cloud_events_type()?;
        metrics::record_received(&envelope, &event_type);

        if self.inner.codecs.get(&event_type.data_type).is_none() {
            trace!(event_type = %envelope.event_type, "Ignore unregistered data type");
            return Ok(());
        }

        match (event_type.sub_resource, &event_type.action) {
            (EventSubResource::Spec, EventAction::ResyncRequest) => {
                if let Some(target) = envelope.original_source() {
                    if target != SOURCE_ALL && target != self.inner.source_id {
                        trace!(%target, "Ignore resync request addressed to another hub");
                        return Ok(());
                    }
                }
                self.schedule_spec_resync(envelope, received_at, &event_type);
                Ok(())
            }
            (EventSubResource::Status, EventAction::ResyncRequest) | (EventSubResource::Spec, _) => {
                trace!(event_type = %envelope.event_type, "Ignore event not addressed to hubs");
                Ok(())
            }
            (EventSubResource::Status, _) => self.receive_status(envelope, &event_type, handler).await,
        }
    }

    async fn receive_status(
        &self,
        envelope: Envelope,
        event_type: &CloudEventsType,
        handler: &dyn ResourceHandler<R>,
    ) -> Result<()> {
        let codec = self.inner.codecs.require(&event_type.data_type)?;
        let resource = codec.decode(&envelope)?;
        let meta = resource.meta();

        let existing = self
            .inner
            .lister
            .list(&ListOptions {
                cluster_name: meta.namespace.clone(),
                source: self.inner.source_id.clone(),
                data_type: event_type.data_type.clone(),
            })?
            .into_iter()
            .find(|r| r.meta().uid == meta.uid);

        let Some(existing) = existing else {
            debug!(uid = %meta.uid, cluster = %meta.namespace, "Ignore status of unknown resource");
            return Ok(());
        };

        let action = if meta.is_deleting() {
            ResourceAction::Deleted
        } else {
            if status_is_stale(meta, existing.meta()) {
                debug!(
                    uid = %meta.uid,
                    sequence_id = meta.sequence_id().unwrap_or_default(),
                    "Ignore out of order status"
                );
                return Ok(());
            }
            let incoming = (self.inner.status_hash)(&resource)?;
            let stored = (self.inner.status_hash)(&existing)?;
            if incoming == stored {
                trace!(uid = %meta.uid, "Suppress unchanged status");
                return Ok(());
            }
            ResourceAction::StatusModified
        };

        debug!(uid = %meta.uid, cluster = %meta.namespace, %action, "Status received");
        handler.on_event(action, resource).await
    }

    fn schedule_spec_resync(&self, request: Envelope, received_at: Instant, event_type: &CloudEventsType) {
        let key = ResyncKey {
            peer: request.source.clone(),
            cluster_name: request.cluster_name().unwrap_or_default(),
            data_type: event_type.data_type.clone(),
            sub_resource: EventSubResource::Spec,
        };
        let client = self.clone();
        schedule_resync_response(
            self.inner.gate.clone(),
            self.inner.completions.clone(),
            key,
            PendingResync { request, received_at },
            Duration::from_millis(self.inner.resync.response_timeout_ms),
            move |pending| {
                let client = client.clone();
                async move { client.respond_spec_resync(pending).await }
            },
        );
    }

    /// Publishes the specs the agent is missing. Returns the number of events sent.
    async fn respond_spec_resync(&self, pending: PendingResync) -> Result<usize> {
        let PendingResync { request, received_at } = pending;
        let event_type = request.cloud_events_type()?;
        let codec = self.inner.codecs.require(&event_type.data_type)?;
        let cluster_name = request
            .cluster_name()
            .filter(|c| !c.is_empty() && c != CLUSTER_ALL)
            .ok_or_else(|| request.decode_error("spec resync request without a cluster"))?;
        let versions = ResourceVersionList::from_envelope(&request)?;

        let hub_resources = self.inner.lister.list(&ListOptions {
            cluster_name: cluster_name.clone(),
            source: self.inner.source_id.clone(),
            data_type: event_type.data_type.clone(),
        })?;
        let decisions = plan_spec_resync(hub_resources, &versions)?;

        let response_type = resync_response_type(&event_type.data_type, EventSubResource::Spec);
        let cancel = self.inner.events.shutdown_token();
        let mut published = 0;
        for decision in decisions {
            let envelope = match decision {
                SpecResyncDecision::Publish { resource, .. } => {
                    codec.encode(&self.inner.source_id, &response_type, &resource)?
                }
                SpecResyncDecision::Tombstone {
                    resource_id,
                    resource_version,
                } => tombstone(
                    &self.inner.source_id,
                    response_type.clone(),
                    &cluster_name,
                    &resource_id,
                    resource_version,
                    None,
                ),
            };
            self.inner.events.publish(&cancel, envelope).await?;
            published += 1;
        }

        metrics::observe_spec_resync(
            &self.inner.source_id,
            &cluster_name,
            &event_type.data_type.to_string(),
            received_at.elapsed(),
        );
        debug!(cluster = %cluster_name, agent = %request.source, published, "Spec resync response sent");
        Ok(published)
    }
}
