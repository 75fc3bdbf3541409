use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tonic::async_trait;
use tonic::codec::CompressionEncoding;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::Streaming;
use tracing::debug;
use tracing::warn;

use super::proto::cloud_event_service_client::CloudEventServiceClient;
use super::proto::CloudEvent;
use super::proto::PublishRequest;
use super::proto::SubscriptionRequest;
use crate::utils::async_task::with_timeout;
use crate::ClientIdentity;
use crate::Envelope;
use crate::GrpcTransportConfig;
use crate::Result;
use crate::TopicRouter;
use crate::Transport;
use crate::TransportConnector;
use crate::TransportError;

/// Connects to a remote broker. Every connection opens a fresh channel and
/// subscription stream.
pub struct GrpcConnector {
    config: GrpcTransportConfig,
    identity: ClientIdentity,
    router: TopicRouter,
}

impl GrpcConnector {
    pub fn new(config: GrpcTransportConfig, identity: ClientIdentity, router: TopicRouter) -> Self {
        Self {
            config,
            identity,
            router,
        }
    }

    fn endpoint(&self) -> Result<Endpoint> {
        let mut endpoint = Endpoint::from_shared(self.config.url.clone())
            .map_err(|e| TransportError::InvalidUri(format!("{}: {e}", self.config.url)))?
            .connect_timeout(Duration::from_millis(self.config.connect_timeout_ms))
            .tcp_nodelay(true);

        let keep_alive = &self.config.keep_alive;
        if keep_alive.enable {
            endpoint = endpoint
                .http2_keep_alive_interval(Duration::from_millis(keep_alive.time_ms))
                .keep_alive_timeout(Duration::from_millis(keep_alive.timeout_ms))
                .keep_alive_while_idle(keep_alive.permit_without_stream);
        }
        Ok(endpoint)
    }
}

#[async_trait]
impl TransportConnector for GrpcConnector {
    async fn connect(&self) -> Result<Arc<dyn Transport>> {
        let channel = self
            .endpoint()?
            .connect()
            .await
            .map_err(|e| TransportError::ConnectFailed {
                endpoint: self.config.url.clone(),
                reason: e.to_string(),
            })?;

        let mut client = CloudEventServiceClient::new(channel);
        if self.config.gzip {
            client = client
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip);
        }

        let connection_id = nanoid::nanoid!(8);
        let topics = self.router.subscriptions(&self.identity);
        debug!(client_id = %self.identity.client_id, connection_id, ?topics, "Subscribing to broker");
        let stream = client
            .clone()
            .subscribe(SubscriptionRequest {
                client_id: self.identity.client_id.clone(),
                topics,
            })
            .await?
            .into_inner();

        Ok(Arc::new(GrpcTransport {
            client,
            identity: self.identity.clone(),
            router: self.router.clone(),
            request_timeout: Duration::from_millis(self.config.request_timeout_ms),
            connection_id,
            stream: Mutex::new(Some(stream)),
        }))
    }
}

pub struct GrpcTransport {
    client: CloudEventServiceClient<Channel>,
    identity: ClientIdentity,
    router: TopicRouter,
    request_timeout: Duration,
    connection_id: String,
    stream: Mutex<Option<Streaming<CloudEvent>>>,
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn send(&self, envelope: Envelope) -> Result<()> {
        let topic = self.router.publish_topic(&self.identity, &envelope)?;
        let request = PublishRequest {
            topic,
            event: Some(CloudEvent::from(&envelope)),
        };
        let mut client = self.client.clone();
        with_timeout(self.request_timeout, async move {
            client
                .publish(request)
                .await
                .map_err(|status| TransportError::SendFailed {
                    event_id: envelope.id.clone(),
                    reason: status.to_string(),
                })?;
            Ok(())
        })
        .await
    }

    async fn start_receiver(
        &self,
        cancel: CancellationToken,
        sink: mpsc::Sender<Envelope>,
    ) -> Result<()> {
        let mut stream = self.stream.lock().await.take().ok_or_else(|| {
            TransportError::ConnectionClosed("receiver already started on this connection".to_string())
        })?;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                message = stream.message() => match message {
                    Ok(Some(event)) => event,
                    Ok(None) => {
                        return Err(TransportError::ConnectionClosed(format!(
                            "broker closed subscription stream {}",
                            self.connection_id
                        ))
                        .into())
                    }
                    Err(status) => return Err(status.into()),
                },
            };

            let envelope = match Envelope::try_from(event) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(connection_id = %self.connection_id, "Drop malformed event: {:?}", e);
                    continue;
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                sent = sink.send(envelope) => {
                    if sent.is_err() {
                        debug!("Receive sink closed, stop receiver");
                        return Ok(());
                    }
                }
            }
        }
    }
}
