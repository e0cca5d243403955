//! # JetStream Broker
//!
//! [`Broker`] over a NATS JetStream connection. One client connection is
//! shared by every publish and subscription; each durable push consumer gets
//! a pump task that forwards its messages into the shared dispatcher.
//!
//! Consumer lifetime: `unsubscribe` deletes the durable consumer, so a later
//! subscription on the subject creates a fresh consumer that starts from
//! new messages. `detach` (replacement and shutdown) keeps it, and a
//! restarted service resumes from the last acknowledged message.

use async_nats::jetstream::{self, consumer::push, stream};
use async_nats::HeaderMap;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{
    Acknowledge, Broker, Delivery, DeliverySink, OutboundMessage, StreamInfo, SubscriptionHandle,
};
use crate::config::{BusConfig, Credentials, RetentionKind, StorageKind, StreamConfig};
use crate::error::BrokerError;
use crate::handler::Metadata;

/// JetStream implementation of [`Broker`].
pub struct JetStreamBroker {
    client: async_nats::Client,
    context: jetstream::Context,
    stream_name: String,
}

impl JetStreamBroker {
    /// Open the shared broker connection.
    pub async fn connect(config: &BusConfig) -> Result<Self, BrokerError> {
        let mut options = async_nats::ConnectOptions::new()
            .name(config.principal.as_str())
            .connection_timeout(config.connect_timeout);

        options = match &config.credentials {
            Credentials::None => options,
            Credentials::UserPassword { user, password } => {
                options.user_and_password(user.clone(), password.clone())
            }
            Credentials::Token(token) => options.token(token.clone()),
        };

        let client = options
            .connect(config.url.as_str())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        info!(url = %config.url, "Connected to NATS");

        Ok(Self::from_client(client, &config.stream.name))
    }

    /// Wrap an existing client; `stream_name` is the stream consumers bind to.
    pub fn from_client(client: async_nats::Client, stream_name: &str) -> Self {
        let context = jetstream::new(client.clone());
        Self {
            client,
            context,
            stream_name: stream_name.to_string(),
        }
    }

    fn stream_config(config: &StreamConfig) -> stream::Config {
        stream::Config {
            name: config.name.clone(),
            subjects: config.subjects.clone(),
            storage: match config.storage {
                StorageKind::File => stream::StorageType::File,
                StorageKind::Memory => stream::StorageType::Memory,
            },
            retention: match config.retention {
                RetentionKind::Limits => stream::RetentionPolicy::Limits,
                RetentionKind::Interest => stream::RetentionPolicy::Interest,
                RetentionKind::WorkQueue => stream::RetentionPolicy::WorkQueue,
            },
            max_age: config.max_age,
            num_replicas: config.replicas,
            ..Default::default()
        }
    }
}

fn to_headers(metadata: &Metadata) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (key, value) in metadata {
        headers.insert(key.as_str(), value.as_str());
    }
    headers
}

fn from_headers(headers: Option<&HeaderMap>) -> Metadata {
    let mut metadata = Metadata::new();
    if let Some(headers) = headers {
        for (name, values) in headers.iter() {
            if let Some(value) = values.first() {
                metadata.insert(name.to_string(), value.as_str().to_string());
            }
        }
    }
    metadata
}

struct JetStreamAck {
    message: jetstream::Message,
}

#[async_trait]
impl Acknowledge for JetStreamAck {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.message
            .ack()
            .await
            .map_err(|e| BrokerError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl Broker for JetStreamBroker {
    async fn ensure_stream(&self, config: &StreamConfig) -> Result<Option<StreamInfo>, BrokerError> {
        let mut stream = self
            .context
            .get_or_create_stream(Self::stream_config(config))
            .await
            .map_err(|e| BrokerError::Protocol(e.to_string()))?;

        let info = stream
            .info()
            .await
            .map_err(|e| BrokerError::Protocol(e.to_string()))?;

        if info.config.name != config.name {
            return Ok(None);
        }

        Ok(Some(StreamInfo {
            name: info.config.name.clone(),
            subjects: info.config.subjects.clone(),
        }))
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        let subject = message.subject.clone();
        let publish_error = |reason: String| BrokerError::Publish {
            subject: subject.clone(),
            reason,
        };

        let ack = if message.metadata.is_empty() {
            self.context
                .publish(message.subject, message.payload)
                .await
        } else {
            self.context
                .publish_with_headers(
                    message.subject,
                    to_headers(&message.metadata),
                    message.payload,
                )
                .await
        }
        .map_err(|e| publish_error(e.to_string()))?;

        ack.await.map_err(|e| publish_error(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        durable_name: &str,
        sink: DeliverySink,
    ) -> Result<Option<SubscriptionHandle>, BrokerError> {
        let stream = self
            .context
            .get_stream(self.stream_name.as_str())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let consumer: jetstream::consumer::Consumer<push::Config> = stream
            .get_or_create_consumer(
                durable_name,
                push::Config {
                    durable_name: Some(durable_name.to_string()),
                    deliver_subject: self.client.new_inbox(),
                    filter_subject: subject.to_string(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    deliver_policy: jetstream::consumer::DeliverPolicy::New,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BrokerError::Protocol(e.to_string()))?;

        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| BrokerError::Protocol(e.to_string()))?;

        let handle = SubscriptionHandle::new(subject, durable_name);
        let active = handle.active_flag();
        let pump_subject = subject.to_string();

        let pump = tokio::spawn(async move {
            while let Some(next) = messages.next().await {
                let message = match next {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(subject = %pump_subject, error = %e, "Push consumer error");
                        continue;
                    }
                };
                if !active.load(std::sync::atomic::Ordering::Acquire) {
                    break;
                }

                let delivery = Delivery::new(
                    message.subject.to_string(),
                    message.payload.clone(),
                    from_headers(message.headers.as_ref()),
                )
                .with_acker(Box::new(JetStreamAck { message }));

                if sink.send(delivery).await.is_err() {
                    debug!(subject = %pump_subject, "Dispatcher closed, stopping pump");
                    break;
                }
            }
        });

        debug!(subject = %subject, durable = %durable_name, "Durable push subscription opened");
        Ok(Some(handle.with_pump(pump.abort_handle())))
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), BrokerError> {
        if !handle.release() {
            return Ok(());
        }

        let stream = self
            .context
            .get_stream(self.stream_name.as_str())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        stream
            .delete_consumer(handle.durable_name())
            .await
            .map_err(|e| BrokerError::Protocol(e.to_string()))?;

        debug!(
            subject = %handle.subject(),
            durable = %handle.durable_name(),
            "Durable consumer deleted"
        );
        Ok(())
    }

    async fn detach(&self, handle: &SubscriptionHandle) -> Result<(), BrokerError> {
        if handle.release() {
            debug!(
                subject = %handle.subject(),
                durable = %handle.durable_name(),
                "Push subscription detached, durable consumer kept"
            );
        }
        Ok(())
    }
}
