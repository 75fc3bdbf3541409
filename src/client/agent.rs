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
use crate::plan_status_resync;
use crate::resync_response_type;
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
use crate::ResourceStatusHashList;
use crate::ResourceVersion;
use crate::ResourceVersionList;
use crate::ResyncCompleted;
use crate::ResyncConfig;
use crate::ResyncGate;
use crate::ResyncKey;
use crate::Result;
use crate::StatusHashFn;
use crate::StatusResyncDecision;
use crate::TransportConnector;
use crate::SOURCE_ALL;

/// Agent side of the protocol, pinned to one managed cluster.
///
/// Receives specs from any hub and classifies them against what the lister
/// already holds, publishes status back to the hub a resource came from, and
/// answers status resync requests.
pub struct AgentClient<R: Resource> {
    inner: Arc<AgentInner<R>>,
}

impl<R: Resource> Clone for AgentClient<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct AgentInner<R: Resource> {
    cluster_name: String,
    agent_id: String,
    events: Arc<EventClient>,
    receive_rx: Mutex<Option<mpsc::Receiver<Envelope>>>,
    codecs: CodecRegistry<R>,
    lister: Arc<dyn Lister<R>>,
    status_hash: StatusHashFn<R>,
    resync: ResyncConfig,
    gate: Arc<ResyncGate<PendingResync>>,
    completions: broadcast::Sender<ResyncCompleted>,
}

impl<R: Resource> AgentClient<R> {
    pub fn new(
        options: ClientOptions,
        connector: Arc<dyn TransportConnector>,
        codecs: CodecRegistry<R>,
        lister: Arc<dyn Lister<R>>,
        status_hash: StatusHashFn<R>,
    ) -> Self {
        let cluster_name = options.identity.cluster_name.clone();
        let agent_id = options.identity.client_id.clone();
        let (events, receive_rx) = EventClient::new(options.identity, connector, options.event_client);
        let (completions, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(AgentInner {
                cluster_name,
                agent_id,
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

    pub fn cluster_name(&self) -> &str {
        &self.inner.cluster_name
    }

    pub fn event_client(&self) -> &Arc<EventClient> {
        &self.inner.events
    }

    /// Notified after each status resync response finished publishing.
    pub fn resync_completions(&self) -> broadcast::Receiver<ResyncCompleted> {
        self.inner.completions.subscribe()
    }

    /// Publishes the status of `resource` to the hub that owns it.
    ///
    /// # Errors
    /// - [`CodecError::Encode`] for spec event types or a resource without
    ///   an original source
    /// - [`CodecError::UnsupportedDataType`] for unregistered data types
    /// - [`Error::Cancelled`] when `cancel` fires
    pub async fn publish(
        &self,
        cancel: &CancellationToken,
        event_type: &CloudEventsType,
        resource: &R,
    ) -> Result<()> {
        if event_type.sub_resource != EventSubResource::Status {
            return Err(CodecError::Encode(format!(
                "agents only publish status events, got {event_type}"
            ))
            .into());
        }
        let codec = self.inner.codecs.require(&event_type.data_type)?;
        let envelope = codec.encode(&self.inner.agent_id, event_type, resource)?;
        self.inner.events.publish(cancel, envelope).await
    }

    /// Asks `source` (or every hub for [`SOURCE_ALL`]) to resend specs this
    /// agent is missing, one request per registered data type.
    pub async fn resync(&self, cancel: &CancellationToken, source: &str) -> Result<()> {
        for data_type in self.inner.codecs.data_types() {
            let resources = self.inner.lister.list(&ListOptions {
                cluster_name: self.inner.cluster_name.clone(),
                source: source.to_string(),
                data_type: data_type.clone(),
            })?;
            let versions = ResourceVersionList {
                versions: resources
                    .iter()
                    .map(|r| {
                        Ok(ResourceVersion {
                            resource_id: r.meta().uid.clone(),
                            resource_version: r.meta().resource_version_number()?,
                        })
                    })
                    .collect::<Result<_>>()?,
            };

            let event_type = CloudEventsType::new(
                data_type.clone(),
                EventSubResource::Spec,
                EventAction::ResyncRequest,
            );
            let mut builder = EventBuilder::new(&self.inner.agent_id, event_type)
                .with_cluster_name(&self.inner.cluster_name);
            if !source.is_empty() && source != SOURCE_ALL {
                builder = builder.with_original_source(source);
            }
            let mut envelope = builder.build();
            envelope.set_json_data(&versions)?;

            debug!(
                cluster = %self.inner.cluster_name,
                source,
                %data_type,
                known = versions.versions.len(),
                "Requesting spec resync"
            );
            self.inner.events.publish(cancel, envelope).await?;
        }
        Ok(())
    }

    /// Connects and starts handing received specs to `handler`.
    ///
    /// Also starts the resync triggers: a spec resync after every reconnect
    /// and, when configured, periodically.
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
            .ok_or_else(|| Error::Fatal(format!("agent {} already subscribed", self.inner.agent_id)))?;

        self.inner.events.start().await?;

        let client = self.clone();
        let shutdown = self.inner.events.shutdown_token();
        spawn_task(
            "agent dispatch",
            move || async move {
                dispatch_loop("agent", receive_rx, shutdown, |envelope| {
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
            "agent",
            &self.inner.events,
            &self.inner.resync,
            self.inner.resync.resync_on_reconnect,
            move || {
                let client = client.clone();
                async move {
                    let cancel = client.inner.events.shutdown_token();
                    client.resync(&cancel, SOURCE_ALL).await
                }
            },
        );

        info!(cluster = %self.inner.cluster_name, agent = %self.inner.agent_id, "Agent subscribed");
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
            (EventSubResource::Status, EventAction::ResyncRequest) => {
                self.schedule_status_resync(envelope, received_at, &event_type);
                Ok(())
            }
            (EventSubResource::Spec, EventAction::ResyncRequest) | (EventSubResource::Status, _) => {
                trace!(event_type = %envelope.event_type, "Ignore event not addressed to agents");
                Ok(())
            }
            (EventSubResource::Spec, _) => self.receive_spec(envelope, &event_type, handler).await,
        }
    }

    async fn receive_spec(
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
                cluster_name: self.inner.cluster_name.clone(),
                source: envelope.source.clone(),
                data_type: event_type.data_type.clone(),
            })?
            .into_iter()
            .find(|r| r.meta().uid == meta.uid);

        let action = match existing {
            None if meta.is_deleting() => {
                trace!(uid = %meta.uid, "Ignore deletion of unknown resource");
                return Ok(());
            }
            None => ResourceAction::Added,
            Some(_) if meta.is_deleting() => ResourceAction::Deleted,
            Some(existing) => {
                let incoming = meta.resource_version_number()?;
                let stored = existing.meta().resource_version_number()?;
                if incoming <= stored && !(incoming == 0 && stored == 0) {
                    trace!(uid = %meta.uid, incoming, stored, "Suppress spec that is not newer");
                    return Ok(());
                }
                ResourceAction::Modified
            }
        };

        debug!(uid = %meta.uid, name = %meta.name, %action, "Spec received");
        handler.on_event(action, resource).await
    }

    fn schedule_status_resync(&self, request: Envelope, received_at: Instant, event_type: &CloudEventsType) {
        let key = ResyncKey {
            peer: request.source.clone(),
            cluster_name: self.inner.cluster_name.clone(),
            data_type: event_type.data_type.clone(),
            sub_resource: EventSubResource::Status,
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
                async move { client.respond_status_resync(pending).await }
            },
        );
    }

    /// Publishes the status the hub is missing. Returns the number of events sent.
    async fn respond_status_resync(&self, pending: PendingResync) -> Result<usize> {
        let PendingResync { request, received_at } = pending;
        let event_type = request.cloud_events_type()?;
        let codec = self.inner.codecs.require(&event_type.data_type)?;
        let hub = request.source.clone();
        let hashes = ResourceStatusHashList::from_envelope(&request)?;

        let local = self.inner.lister.list(&ListOptions {
            cluster_name: self.inner.cluster_name.clone(),
            source: hub.clone(),
            data_type: event_type.data_type.clone(),
        })?;
        let decisions = plan_status_resync(local, &hashes, &self.inner.status_hash)?;

        let response_type = resync_response_type(&event_type.data_type, EventSubResource::Status);
        let cancel = self.inner.events.shutdown_token();
        let mut published = 0;
        for decision in decisions {
            let envelope = match decision {
                StatusResyncDecision::Publish(resource) => {
                    codec.encode(&self.inner.agent_id, &response_type, &resource)?
                }
                StatusResyncDecision::Tombstone { resource_id } => tombstone(
                    &self.inner.agent_id,
                    response_type.clone(),
                    &self.inner.cluster_name,
                    &resource_id,
                    0,
                    Some(&hub),
                ),
            };
            self.inner.events.publish(&cancel, envelope).await?;
            published += 1;
        }

        metrics::observe_status_resync(
            &hub,
            &self.inner.cluster_name,
            &event_type.data_type.to_string(),
            received_at.elapsed(),
        );
        debug!(%hub, cluster = %self.inner.cluster_name, published, "Status resync response sent");
        Ok(published)
    }
}
