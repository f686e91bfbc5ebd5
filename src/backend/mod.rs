//! Facade over the underlying pub/sub transport
//!
//! The bus owns all policy above these primitives: which topics get subscribed,
//! how deliveries are routed and when ephemeral reply subscriptions are torn down.
//! Implementations merely move bytes. A production implementation backed by
//! [`redis`](::redis) lives in the [`redis`] submodule; an in-memory one for tests
//! in [`mock`].

use crate::{topic, BoxedError};
use async_trait::async_trait;
use thiserror::Error;

pub mod redis;

#[cfg(test)]
pub mod mock;

/// Errors that may occur while talking to the broker
#[derive(Error, Debug)]
pub enum BackendError {
    /// Establishing a connection to the broker failed
    #[error("unable to establish broker connection")]
    ConnectionFailed(#[source] BoxedError),
    /// A subscribe, psubscribe or unsubscribe command failed
    #[error("broker subscription change failed")]
    SubscriptionFailed(#[source] BoxedError),
    /// Handing a payload to the broker failed
    #[error("publishing to the broker failed")]
    PublishFailed(#[source] BoxedError),
    /// The inbound delivery stream has ended
    #[error("delivery stream has been closed")]
    StreamClosed,
}

/// Inbound delivery handed to the bus by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Subscription key the broker reports as matched — the pattern for wildcard
    /// subscriptions, the topic itself for exact ones
    pub key: String,
    /// Concrete topic the payload was published to
    pub topic: String,
    /// Raw, still encoded payload
    pub payload: Vec<u8>,
}

/// Subscriber half of a broker connection
///
/// Owned exclusively by the bus event loop; all mutations are marshalled into that
/// loop through its command channel.
#[async_trait]
pub trait PubSubResource: Send {
    /// Subscribes to a topic by exact name
    async fn subscribe(&mut self, channel: &str) -> Result<(), BackendError>;
    /// Subscribes to topics matching a wildcard pattern
    async fn psubscribe(&mut self, pchannel: &str) -> Result<(), BackendError>;
    /// Removes an exact-name subscription
    async fn unsubscribe(&mut self, channel: &str) -> Result<(), BackendError>;

    /// Waits for the next inbound delivery
    ///
    /// Returns [`BackendError::StreamClosed`] once the connection has ended.
    async fn next_delivery(&mut self) -> Result<Delivery, BackendError>;

    /// Subscribes by exact name or pattern depending on the wildcard marker
    async fn subscribe_topic(&mut self, pattern: &str) -> Result<(), BackendError> {
        if topic::is_pattern(pattern) {
            self.psubscribe(pattern).await
        } else {
            self.subscribe(pattern).await
        }
    }
}

/// Publisher half of a broker connection, cheap to clone and share
#[async_trait]
pub trait Publisher: Clone + Send + Sync {
    /// Hands an encoded payload to the broker for delivery on `topic`
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BackendError>;
}

/// Factory providing the two halves of a broker connection
#[async_trait]
pub trait Backend: Send + Sync {
    /// Subscriber implementation type
    type Resource: PubSubResource + 'static;
    /// Publisher implementation type
    type Publisher: Publisher + 'static;

    /// Establishes the subscriber connection
    async fn subscriber(&self) -> Result<Self::Resource, BackendError>;
    /// Establishes (or clones) the publisher connection
    async fn publisher(&self) -> Result<Self::Publisher, BackendError>;
}
