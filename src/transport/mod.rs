//! Message transport boundary.
//!
//! The event client only needs two capabilities from a transport: hand an
//! envelope to the wire, and forward inbound envelopes into a channel until
//! cancelled. Connection setup lives behind [`TransportConnector`] so the
//! client can re-establish a broken connection on its own.
//!
//! Two implementations share the same MQTT style topic layout:
//! - [`MemoryConnector`]: in-process broker carrying structured JSON bytes
//! - [`grpc::GrpcConnector`]: remote broker reached over a gRPC stream

pub mod grpc;

mod broker;
mod memory;
mod topics;

pub use broker::*;
pub use memory::*;
pub use topics::*;

#[cfg(test)]
mod memory_test;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::async_trait;

use crate::config::config_error;
use crate::Envelope;
use crate::Error;
use crate::Result;
use crate::Settings;
use crate::TransportConfig;

/// Which side of the protocol a client plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    /// Hub: publishes specs, receives status
    Source,
    /// Spoke: publishes status, receives specs
    Agent,
}

impl ClientRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientRole::Source => "source",
            ClientRole::Agent => "agent",
        }
    }
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "source" => Ok(ClientRole::Source),
            "agent" => Ok(ClientRole::Agent),
            other => Err(config_error(format!("unknown client role {other:?}"))),
        }
    }
}

/// Identity used for routing: the role, the id stamped on outbound
/// envelopes, and the hub or cluster the client is pinned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub role: ClientRole,
    pub client_id: String,
    /// Pinned hub for sources, empty for agents
    pub source_id: String,
    /// Pinned cluster for agents, empty for sources
    pub cluster_name: String,
}

impl ClientIdentity {
    pub fn source(source_id: impl Into<String>) -> Self {
        let source_id = source_id.into();
        Self {
            role: ClientRole::Source,
            client_id: source_id.clone(),
            source_id,
            cluster_name: String::new(),
        }
    }

    pub fn agent(cluster_name: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            role: ClientRole::Agent,
            client_id: agent_id.into(),
            source_id: String::new(),
            cluster_name: cluster_name.into(),
        }
    }

    /// Identity described by the `client` section of `settings`.
    pub fn from_settings(role: ClientRole, settings: &Settings) -> Self {
        match role {
            ClientRole::Source => Self::source(&settings.client.source_id),
            ClientRole::Agent => Self::agent(&settings.client.cluster_name, settings.client.agent_id()),
        }
    }
}

/// One established connection.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Returns once the transport accepted the envelope. Acceptance is not
    /// delivery: the peer may still never see it.
    async fn send(&self, envelope: Envelope) -> Result<()>;

    /// Forwards inbound envelopes into `sink`.
    ///
    /// Returns `Ok(())` when `cancel` fires or `sink` is closed, and an error
    /// when the connection breaks. Malformed inbound messages are dropped
    /// without ending the loop. Can only be started once per connection.
    async fn start_receiver(
        &self,
        cancel: CancellationToken,
        sink: mpsc::Sender<Envelope>,
    ) -> Result<()>;
}

/// Establishes connections on behalf of the event client, initially and on
/// every reconnect.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Arc<dyn Transport>>;
}

/// Builds the connector described by `settings.transport`.
///
/// The memory transport can only reach a broker living in the same process,
/// so it needs `memory_broker`.
pub fn build_connector(
    settings: &Settings,
    identity: ClientIdentity,
    memory_broker: Option<EventBroker<Vec<u8>>>,
) -> Result<Arc<dyn TransportConnector>> {
    let router = TopicRouter::new(settings.broker.topics.clone());
    match &settings.transport {
        TransportConfig::Memory => {
            let broker = memory_broker
                .ok_or_else(|| config_error("the memory transport requires an in-process broker"))?;
            Ok(Arc::new(MemoryConnector::new(broker, identity, router)))
        }
        TransportConfig::Grpc(grpc) => Ok(Arc::new(grpc::GrpcConnector::new(
            grpc.clone(),
            identity,
            router,
        ))),
    }
}
