//! Broker side of the gRPC transport: accepts publishes and fans them out to
//! subscribed streams with the shared topic rules.

use std::net::SocketAddr;
use std::pin::Pin;

use futures::FutureExt;
use futures::Stream;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::codec::CompressionEncoding;
use tonic::Request;
use tonic::Response;
use tonic::Status;
use tonic_health::server::health_reporter;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::proto::cloud_event_service_server::CloudEventService;
use super::proto::cloud_event_service_server::CloudEventServiceServer;
use super::proto::CloudEvent;
use super::proto::PublishRequest;
use super::proto::PublishResponse;
use super::proto::SubscriptionRequest;
use crate::validate_topic_filter;
use crate::EventBroker;
use crate::Result;
use crate::TransportError;

pub struct BrokerService {
    broker: EventBroker<CloudEvent>,
}

impl BrokerService {
    pub fn new(broker: EventBroker<CloudEvent>) -> Self {
        Self { broker }
    }
}

#[tonic::async_trait]
impl CloudEventService for BrokerService {
    async fn publish(
        &self,
        request: Request<PublishRequest>,
    ) -> std::result::Result<Response<PublishResponse>, Status> {
        let PublishRequest { topic, event } = request.into_inner();
        let event = event.ok_or_else(|| Status::invalid_argument("publish request carries no event"))?;
        if topic.is_empty() || topic.contains(['+', '#']) {
            return Err(Status::invalid_argument(format!("invalid publish topic {topic:?}")));
        }

        let delivered = self.broker.publish(&topic, event).await;
        debug!(topic, delivered, "[rpc|publish] fanned out");
        Ok(Response::new(PublishResponse {}))
    }

    type SubscribeStream = Pin<Box<dyn Stream<Item = std::result::Result<CloudEvent, Status>> + Send + 'static>>;

    async fn subscribe(
        &self,
        request: Request<SubscriptionRequest>,
    ) -> std::result::Result<Response<Self::SubscribeStream>, Status> {
        let SubscriptionRequest { client_id, topics } = request.into_inner();
        if client_id.is_empty() || topics.is_empty() {
            return Err(Status::invalid_argument("subscription needs a client id and topics"));
        }
        for topic in &topics {
            validate_topic_filter(topic).map_err(|e| Status::invalid_argument(e.to_string()))?;
        }

        let subscription = self
            .broker
            .subscribe(&client_id, topics)
            .map_err(|e| Status::internal(e.to_string()))?;
        info!(client_id, "[rpc|subscribe] client subscribed");

        let stream = futures::stream::unfold(subscription, |mut subscription| async move {
            subscription.recv().await.map(|event| (Ok(event), subscription))
        });
        Ok(Response::new(Box::pin(stream)))
    }
}

/// Binds `listen_address` and serves the broker until `shutdown_signal` fires.
pub async fn start_broker_server(
    broker: EventBroker<CloudEvent>,
    listen_address: SocketAddr,
    shutdown_signal: watch::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(listen_address).await.map_err(|e| TransportError::ConnectFailed {
        endpoint: listen_address.to_string(),
        reason: e.to_string(),
    })?;
    serve_broker(broker, listener, shutdown_signal).await
}

/// Serves the broker and a health service on an already bound listener.
pub async fn serve_broker(
    broker: EventBroker<CloudEvent>,
    listener: TcpListener,
    mut shutdown_signal: watch::Receiver<()>,
) -> Result<()> {
    let local_address = listener
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default();
    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_serving::<CloudEventServiceServer<BrokerService>>()
        .await;

    let service = CloudEventServiceServer::new(BrokerService::new(broker))
        .accept_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Gzip);

    info!("Broker listening on {}", local_address);
    if let Err(e) = tonic::transport::Server::builder()
        .add_service(health_service)
        .add_service(service)
        .serve_with_incoming_shutdown(
            TcpListenerStream::new(listener),
            shutdown_signal.changed().map(|_| {
                warn!("Stopping broker server. {}", local_address);
            }),
        )
        .await
    {
        error!("broker server failed: {:?}", e);
        return Err(e.into());
    }
    debug!("broker server finished");
    Ok(())
}
