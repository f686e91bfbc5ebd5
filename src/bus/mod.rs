//! The message bus adapter tying registry, correlator and event loop together
//!
//! A [`Bus`] instance owns its subscription state — multiple instances can coexist
//! within one process. Its lifecycle is `Created → Starting → Ready → Stopped`:
//! handlers may be registered at any point before or after [`Bus::start`], but
//! operations that need a live broker connection fail fast with
//! [`BusError::NotReady`] until the startup handshake has resolved.

mod correlator;
mod daemon;
mod registry;
mod responder;

pub use correlator::{ResponseCorrelator, ResponsePayload};
pub use registry::SubscriptionRegistry;
pub use responder::{handler_fn, FnHandler, RequestHandler, Responder};

use crate::backend::{Backend, BackendError, PubSubResource, Publisher};
use crate::protocol::{self, CodecError, CorrelationId};
use crate::topic;
use daemon::{BusDaemon, Command};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time;
use tracing::debug;

const COMMAND_CHANNEL_SIZE: usize = 32;

/// Errors surfaced by bus operations
#[derive(Error, Debug)]
pub enum BusError {
    /// The bus has not reached the `Ready` state yet
    #[error("bus has not been started yet")]
    NotReady,
    /// `start` has already been called on this instance
    #[error("bus has already been started")]
    AlreadyStarted,
    /// The bus has been stopped
    #[error("bus has been stopped")]
    Stopped,
    /// Establishing the broker connection during startup failed
    #[error("broker connection failed during startup")]
    StartupFailed(#[source] BackendError),
    /// A broker operation failed while the bus was running
    #[error("broker operation failed")]
    Backend(#[from] BackendError),
    /// A payload could not be encoded or decoded
    #[error("envelope codec failure")]
    Codec(#[from] CodecError),
    /// The event loop terminated while an operation depended on it
    #[error("event loop terminated")]
    EventLoopGone,
}

enum Lifecycle<P> {
    Created,
    Starting,
    Ready {
        commands: mpsc::Sender<Command>,
        publisher: P,
    },
    Stopped,
}

/// Topic-routed message bus on top of a pub/sub [`Backend`]
///
/// Supports fire-and-forget broadcast ([`publish`](Bus::publish)) and correlated
/// request/response ([`request`](Bus::request)). Inbound deliveries are driven by
/// a dedicated event-loop task which the startup handshake brings online.
pub struct Bus<B: Backend> {
    backend: B,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    correlator: Arc<Mutex<ResponseCorrelator>>,
    lifecycle: Mutex<Lifecycle<B::Publisher>>,
}

impl<B: Backend> Bus<B> {
    /// Creates a new bus in the `Created` state, no connection is established yet
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            registry: Arc::new(Mutex::new(SubscriptionRegistry::default())),
            correlator: Arc::new(Mutex::new(ResponseCorrelator::default())),
            lifecycle: Mutex::new(Lifecycle::Created),
        }
    }

    /// Registers a handler for a topic pattern
    ///
    /// Patterns containing a `*` select a wildcard subscription, everything else an
    /// exact one. Registrations before [`start`](Bus::start) are subscribed at the
    /// broker during the handshake; afterwards, the first registration per pattern
    /// issues the broker-level subscription through the event loop and only returns
    /// once it took effect.
    pub async fn subscribe(
        &self,
        pattern: &str,
        handler: impl RequestHandler + 'static,
    ) -> Result<(), BusError> {
        // Held for the whole call so concurrent registrations on one pattern
        // serialize; the event loop never takes this lock.
        let lifecycle = self.lifecycle.lock().await;
        if matches!(&*lifecycle, Lifecycle::Stopped) {
            return Err(BusError::Stopped);
        }

        let first = self
            .registry
            .lock()
            .await
            .register(pattern, Arc::new(handler));

        if first {
            if let Lifecycle::Ready { commands, .. } = &*lifecycle {
                if let Err(error) = acked_subscribe(commands, pattern.to_owned()).await {
                    // Without the broker subscription the handler would never
                    // see a delivery; roll the registration back so a retry
                    // issues the subscribe again.
                    self.registry.lock().await.retract(pattern);
                    return Err(error);
                }
            }
        }

        Ok(())
    }

    /// Brings the event loop online and performs the broker-level subscriptions
    ///
    /// Does not resolve until the connection is established, every registered
    /// pattern is subscribed and the event loop has signalled readiness — any
    /// publish issued after `start` returns operates on a live connection. A
    /// connection failure is fatal and leaves the bus in the `Created` state so a
    /// caller may retry.
    pub async fn start(&self) -> Result<(), BusError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match &*lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Starting | Lifecycle::Ready { .. } => {
                return Err(BusError::AlreadyStarted)
            }
            Lifecycle::Stopped => return Err(BusError::Stopped),
        }
        *lifecycle = Lifecycle::Starting;

        match self.bring_online().await {
            Ok((commands, publisher)) => {
                *lifecycle = Lifecycle::Ready {
                    commands,
                    publisher,
                };
                debug!("Startup handshake complete");
                Ok(())
            }
            Err(error) => {
                *lifecycle = Lifecycle::Created;
                Err(error)
            }
        }
    }

    async fn bring_online(
        &self,
    ) -> Result<(mpsc::Sender<Command>, B::Publisher), BusError> {
        let mut resource = self
            .backend
            .subscriber()
            .await
            .map_err(BusError::StartupFailed)?;
        let publisher = self
            .backend
            .publisher()
            .await
            .map_err(BusError::StartupFailed)?;

        for pattern in self.registry.lock().await.patterns() {
            resource
                .subscribe_topic(&pattern)
                .await
                .map_err(BusError::StartupFailed)?;
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (ready_tx, ready_rx) = oneshot::channel();
        let daemon = BusDaemon::new(
            resource,
            command_rx,
            publisher.clone(),
            self.registry.clone(),
            self.correlator.clone(),
        );

        tokio::spawn(daemon.run(ready_tx));
        ready_rx.await.map_err(|_| BusError::EventLoopGone)?;

        Ok((command_tx, publisher))
    }

    /// Publishes a message to a topic, fire-and-forget
    ///
    /// Returns the generated correlation id immediately; there is no guarantee
    /// that any subscriber exists or will respond.
    pub async fn publish(
        &self,
        destination: &str,
        data: &Value,
    ) -> Result<CorrelationId, BusError> {
        let (_, publisher) = self.ready_parts().await?;
        let (payload, sender) = protocol::encode_request(data, None)?;

        publisher.publish(destination, &payload).await?;

        Ok(sender)
    }

    /// Publishes a message and awaits the correlated single reply
    ///
    /// The ephemeral reply subscription is acknowledged by the event loop before
    /// the request goes out, so a responder can never win the race against it.
    /// When a `timeout` is given and elapses, the pending reply is dropped, the
    /// reply channel torn down and `(None, None)` returned.
    pub async fn request(
        &self,
        destination: &str,
        data: &Value,
        timeout: Option<Duration>,
    ) -> Result<ResponsePayload, BusError> {
        let (commands, publisher) = self.ready_parts().await?;
        let (payload, sender) = protocol::encode_request(data, None)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.correlator
            .lock()
            .await
            .insert(sender.clone(), reply_tx);

        if let Err(error) = acked_subscribe(&commands, topic::response(&sender)).await {
            self.correlator.lock().await.remove(&sender);
            return Err(error);
        }

        if let Err(error) = publisher.publish(destination, &payload).await {
            self.abandon(&commands, &sender).await;
            return Err(error.into());
        }

        match timeout {
            None => reply_rx.await.map_err(|_| BusError::EventLoopGone),
            Some(limit) => match time::timeout(limit, reply_rx).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(BusError::EventLoopGone),
                Err(_) => {
                    self.abandon(&commands, &sender).await;
                    Ok((None, None))
                }
            },
        }
    }

    /// Stops the bus, shutting down the event loop
    ///
    /// Closes the command channel; the event loop drains out and exits. All
    /// subsequent operations fail with [`BusError::Stopped`].
    pub async fn stop(&self) {
        *self.lifecycle.lock().await = Lifecycle::Stopped;
    }

    /// Drops a pending reply and tears down its ephemeral subscription
    async fn abandon(&self, commands: &mpsc::Sender<Command>, id: &CorrelationId) {
        self.correlator.lock().await.remove(id);
        commands
            .send(Command::Unsubscribe {
                topic: topic::response(id),
            })
            .await
            .ok();
    }

    async fn ready_parts(&self) -> Result<(mpsc::Sender<Command>, B::Publisher), BusError> {
        match &*self.lifecycle.lock().await {
            Lifecycle::Ready {
                commands,
                publisher,
            } => Ok((commands.clone(), publisher.clone())),
            Lifecycle::Created | Lifecycle::Starting => Err(BusError::NotReady),
            Lifecycle::Stopped => Err(BusError::Stopped),
        }
    }
}

/// Sends a subscribe command to the event loop and awaits its acknowledgement
async fn acked_subscribe(
    commands: &mpsc::Sender<Command>,
    pattern: String,
) -> Result<(), BusError> {
    let (ack_tx, ack_rx) = oneshot::channel();

    commands
        .send(Command::Subscribe {
            pattern,
            ack: ack_tx,
        })
        .await
        .map_err(|_| BusError::EventLoopGone)?;

    ack_rx
        .await
        .map_err(|_| BusError::EventLoopGone)?
        .map_err(Into::into)
}
