//! In-memory broker implementation for tests
//!
//! Fans every published payload out over a [`broadcast`] channel. Each subscriber
//! resource filters the firehose against its own subscription sets, emulating the
//! broker-side pattern matching a real backend performs: a payload matching both an
//! exact subscription and a pattern subscription yields two deliveries with their
//! respective keys.

use super::{Backend, BackendError, Delivery, PubSubResource, Publisher};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use tokio::sync::broadcast;

const CHANNEL_SIZE: usize = 256;

/// Glob-style match of a topic against a pattern containing at most one `*`
fn pattern_matches(pattern: &str, topic: &str) -> bool {
    match pattern.split_once(crate::topic::WILDCARD) {
        Some((prefix, suffix)) => {
            topic.len() >= prefix.len() + suffix.len()
                && topic.starts_with(prefix)
                && topic.ends_with(suffix)
        }
        None => pattern == topic,
    }
}

/// [`Backend`] replacement routing payloads in-process
#[derive(Clone)]
pub struct MockBackend {
    messages: broadcast::Sender<(String, Vec<u8>)>,
}

impl Default for MockBackend {
    fn default() -> Self {
        let (messages, _) = broadcast::channel(CHANNEL_SIZE);
        Self { messages }
    }
}

#[async_trait]
impl Backend for MockBackend {
    type Resource = MockSubscriber;
    type Publisher = MockPublisher;

    async fn subscriber(&self) -> Result<Self::Resource, BackendError> {
        Ok(MockSubscriber {
            messages: self.messages.subscribe(),
            exact: HashSet::new(),
            patterns: Vec::new(),
            backlog: VecDeque::new(),
        })
    }

    async fn publisher(&self) -> Result<Self::Publisher, BackendError> {
        Ok(MockPublisher {
            messages: self.messages.clone(),
        })
    }
}

/// Subscriber filtering the in-process firehose
pub struct MockSubscriber {
    messages: broadcast::Receiver<(String, Vec<u8>)>,
    exact: HashSet<String>,
    patterns: Vec<String>,
    backlog: VecDeque<Delivery>,
}

#[async_trait]
impl PubSubResource for MockSubscriber {
    async fn subscribe(&mut self, channel: &str) -> Result<(), BackendError> {
        self.exact.insert(channel.to_owned());
        Ok(())
    }

    async fn psubscribe(&mut self, pchannel: &str) -> Result<(), BackendError> {
        if !self.patterns.iter().any(|p| p == pchannel) {
            self.patterns.push(pchannel.to_owned());
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<(), BackendError> {
        self.exact.remove(channel);
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Delivery, BackendError> {
        loop {
            if let Some(delivery) = self.backlog.pop_front() {
                return Ok(delivery);
            }

            match self.messages.recv().await {
                Ok((topic, payload)) => {
                    if self.exact.contains(&topic) {
                        self.backlog.push_back(Delivery {
                            key: topic.clone(),
                            topic: topic.clone(),
                            payload: payload.clone(),
                        });
                    }

                    for pattern in &self.patterns {
                        if pattern_matches(pattern, &topic) {
                            self.backlog.push_back(Delivery {
                                key: pattern.clone(),
                                topic: topic.clone(),
                                payload: payload.clone(),
                            });
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(BackendError::StreamClosed)
                }
            }
        }
    }
}

/// Publisher feeding the in-process firehose
#[derive(Clone)]
pub struct MockPublisher {
    messages: broadcast::Sender<(String, Vec<u8>)>,
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BackendError> {
        // A send error only means nobody is listening, which a real broker
        // would not report either.
        self.messages.send((topic.to_owned(), payload.to_vec())).ok();
        Ok(())
    }
}

#[cfg(test)]
mod does {
    use super::*;

    #[test]
    fn match_exact_patterns_verbatim() {
        assert!(pattern_matches("hello.world", "hello.world"));
        assert!(!pattern_matches("hello.world", "hello.worlds"));
    }

    #[test]
    fn match_wildcards_against_segments() {
        assert!(pattern_matches("session.*.terminated", "session.42.terminated"));
        assert!(pattern_matches("metrics.*", "metrics.node.cpu"));
        assert!(!pattern_matches("session.*.terminated", "session.42.created"));
        assert!(!pattern_matches("metrics.*", "metric"));
    }

    #[tokio::test]
    async fn deliver_once_per_matching_subscription() {
        let backend = MockBackend::default();
        let mut subscriber = backend.subscriber().await.unwrap();
        let publisher = backend.publisher().await.unwrap();

        subscriber.subscribe("hello.world").await.unwrap();
        subscriber.psubscribe("hello.*").await.unwrap();

        publisher.publish("hello.world", b"hi").await.unwrap();

        let first = subscriber.next_delivery().await.unwrap();
        let second = subscriber.next_delivery().await.unwrap();

        assert_eq!(first.key, "hello.world");
        assert_eq!(second.key, "hello.*");
        assert_eq!(first.topic, second.topic);
    }

    #[tokio::test]
    async fn skip_topics_nobody_subscribed() {
        let backend = MockBackend::default();
        let mut subscriber = backend.subscriber().await.unwrap();
        let publisher = backend.publisher().await.unwrap();

        subscriber.subscribe("interesting").await.unwrap();
        publisher.publish("boring", b"zzz").await.unwrap();
        publisher.publish("interesting", b"!").await.unwrap();

        let delivery = subscriber.next_delivery().await.unwrap();
        assert_eq!(delivery.topic, "interesting");
    }
}
