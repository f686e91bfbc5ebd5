//! Broker facade implementation using [`redis`](::redis)
//!
//! The subscriber half wraps a dedicated PubSub connection while publishing goes
//! through a multiplexed connection that can be cloned freely. Keeping the two on
//! separate connections mirrors how Redis itself treats a connection in subscriber
//! mode: it can no longer issue regular commands.

use super::{Backend, BackendError, Delivery, PubSubResource, Publisher};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{AsyncCommands, Client};

/// [`Backend`] connecting to a Redis server
pub struct RedisBackend {
    client: Client,
}

impl RedisBackend {
    /// Creates a new backend for the given connection URL
    ///
    /// No connection is established until the bus starts.
    pub fn new(url: &str) -> Result<Self, BackendError> {
        let client =
            Client::open(url).map_err(|e| BackendError::ConnectionFailed(e.into()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Backend for RedisBackend {
    type Resource = RedisSubscriber;
    type Publisher = RedisPublisher;

    async fn subscriber(&self) -> Result<Self::Resource, BackendError> {
        let connection = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| BackendError::ConnectionFailed(e.into()))?;

        Ok(RedisSubscriber {
            pubsub: connection.into_pubsub(),
        })
    }

    async fn publisher(&self) -> Result<Self::Publisher, BackendError> {
        let connection = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| BackendError::ConnectionFailed(e.into()))?;

        Ok(RedisPublisher { connection })
    }
}

/// [`PubSubResource`] wrapping a [`PubSub`] connection
pub struct RedisSubscriber {
    pubsub: PubSub,
}

#[async_trait]
impl PubSubResource for RedisSubscriber {
    async fn subscribe(&mut self, channel: &str) -> Result<(), BackendError> {
        self.pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BackendError::SubscriptionFailed(e.into()))
    }

    async fn psubscribe(&mut self, pchannel: &str) -> Result<(), BackendError> {
        self.pubsub
            .psubscribe(pchannel)
            .await
            .map_err(|e| BackendError::SubscriptionFailed(e.into()))
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<(), BackendError> {
        self.pubsub
            .unsubscribe(channel)
            .await
            .map_err(|e| BackendError::SubscriptionFailed(e.into()))
    }

    async fn next_delivery(&mut self) -> Result<Delivery, BackendError> {
        let message = {
            let mut stream = self.pubsub.on_message();
            stream.next().await
        };

        match message {
            Some(message) => {
                let topic = message.get_channel_name().to_owned();
                // Deliveries from a pattern subscription report the pattern as
                // their key, exact ones report the topic itself.
                let key = message
                    .get_pattern::<Option<String>>()
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| topic.clone());

                Ok(Delivery {
                    key,
                    topic,
                    payload: message.get_payload_bytes().to_vec(),
                })
            }
            None => Err(BackendError::StreamClosed),
        }
    }
}

/// [`Publisher`] backed by a shared [`MultiplexedConnection`]
#[derive(Clone)]
pub struct RedisPublisher {
    connection: MultiplexedConnection,
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BackendError> {
        let mut connection = self.connection.clone();

        connection
            .publish::<_, _, ()>(topic, payload)
            .await
            .map_err(|e| BackendError::PublishFailed(e.into()))
    }
}
