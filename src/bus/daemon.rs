//! Event-loop daemon driving the subscriber side of the bus
//!
//! One daemon task owns the [`PubSubResource`] exclusively and processes two inputs:
//! inbound broker deliveries and control commands marshalled over from caller
//! threads. It contains the dispatcher — the single entry point deciding whether a
//! delivery is a correlated response (reserved namespace) or an ordinary topic
//! message to fan out to registered handlers.

use super::correlator::ResponseCorrelator;
use super::registry::SubscriptionRegistry;
use super::responder::{RequestHandler, Responder};
use crate::backend::{BackendError, Delivery, PubSubResource, Publisher};
use crate::protocol::{self, CorrelationId};
use crate::topic;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, instrument, trace, warn};

/// Control commands marshalled into the event loop from caller threads
pub(super) enum Command {
    /// Issue a broker-level subscription, acknowledged once it took effect
    Subscribe {
        pattern: String,
        ack: oneshot::Sender<Result<(), BackendError>>,
    },
    /// Tear down an ephemeral reply subscription
    Unsubscribe { topic: String },
}

enum Event {
    Delivery(Result<Delivery, BackendError>),
    Command(Option<Command>),
}

pub(super) struct BusDaemon<R, P> {
    resource: R,
    commands: mpsc::Receiver<Command>,
    publisher: P,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    correlator: Arc<Mutex<ResponseCorrelator>>,
}

impl<R, P> BusDaemon<R, P>
where
    R: PubSubResource,
    P: Publisher + 'static,
{
    pub(super) fn new(
        resource: R,
        commands: mpsc::Receiver<Command>,
        publisher: P,
        registry: Arc<Mutex<SubscriptionRegistry>>,
        correlator: Arc<Mutex<ResponseCorrelator>>,
    ) -> Self {
        Self {
            resource,
            commands,
            publisher,
            registry,
            correlator,
        }
    }

    /// Main loop handling inbound deliveries and control commands
    ///
    /// Signals readiness through the one-shot channel before the first poll so the
    /// starting caller unblocks only once the loop is live.
    #[instrument(skip_all)]
    pub(super) async fn run(mut self, ready: oneshot::Sender<()>) {
        ready.send(()).ok();
        debug!("Event loop online");

        loop {
            let event = tokio::select! {
                delivery = self.resource.next_delivery() => Event::Delivery(delivery),
                command = self.commands.recv() => Event::Command(command),
            };

            match event {
                Event::Delivery(Ok(delivery)) => self.dispatch(delivery).await,
                Event::Delivery(Err(BackendError::StreamClosed)) => {
                    warn!("Delivery stream ended");
                    break;
                }
                Event::Delivery(Err(error)) => {
                    warn!(%error, "Delivery stream failed");
                    break;
                }
                Event::Command(Some(command)) => self.apply(command).await,
                Event::Command(None) => {
                    debug!("Command channel closed, shutting down");
                    break;
                }
            }
        }
    }

    async fn apply(&mut self, command: Command) {
        match command {
            Command::Subscribe { pattern, ack } => {
                let result = self.resource.subscribe_topic(&pattern).await;
                if let Err(error) = &result {
                    warn!(%pattern, %error, "Broker subscription failed");
                }
                ack.send(result).ok();
            }
            Command::Unsubscribe { topic } => {
                if let Err(error) = self.resource.unsubscribe(&topic).await {
                    warn!(%topic, %error, "Broker unsubscribe failed");
                }
            }
        }
    }

    /// Single entry point for every inbound delivery
    async fn dispatch(&mut self, delivery: Delivery) {
        if topic::is_response(&delivery.topic) {
            self.dispatch_response(delivery).await;
        } else {
            self.dispatch_request(delivery).await;
        }
    }

    async fn dispatch_response(&mut self, delivery: Delivery) {
        let id = match topic::response_id(&delivery.topic) {
            Some(id) => id,
            None => return,
        };

        match protocol::decode_response(&delivery.payload) {
            Ok((data, code, _)) => {
                let delivered = self
                    .correlator
                    .lock()
                    .await
                    .complete(&id, (Some(data), code));

                if delivered {
                    // Removal plus unsubscribe together guarantee at-most-once
                    // invocation for this correlation id.
                    if let Err(error) = self.resource.unsubscribe(&delivery.topic).await {
                        warn!(topic = %delivery.topic, %error, "Reply channel teardown failed");
                    }
                } else {
                    trace!(topic = %delivery.topic, "Discarding unmatched response");
                }
            }
            Err(error) => {
                warn!(topic = %delivery.topic, %error, "Dropping malformed response envelope");
            }
        }
    }

    async fn dispatch_request(&mut self, delivery: Delivery) {
        let (data, sender) = match protocol::decode_request(&delivery.payload) {
            Ok(decoded) => decoded,
            Err(error) => {
                warn!(topic = %delivery.topic, %error, "Dropping malformed request envelope");
                return;
            }
        };

        let handlers = self.registry.lock().await.handlers_for(&delivery.key);
        if handlers.is_empty() {
            trace!(key = %delivery.key, "No handlers for delivery");
            return;
        }

        // Each delivery dispatches on its own task so a handler may itself use the
        // bus (e.g. issue a nested request) while the loop keeps running. Handlers
        // sharing one delivery run sequentially within the task.
        let publisher = self.publisher.clone();
        tokio::spawn(broadcast_to_handlers(
            delivery.topic,
            data,
            sender,
            handlers,
            publisher,
        ));
    }
}

async fn broadcast_to_handlers<P: Publisher>(
    request_topic: String,
    data: Value,
    sender: Option<CorrelationId>,
    handlers: Vec<Arc<dyn RequestHandler>>,
    publisher: P,
) {
    let responder = Responder::new(request_topic, data);

    for handler in handlers {
        match responder.execute(handler.as_ref()).await {
            Ok(Some((body, code))) => {
                // A response only goes out when the requester asked for one by
                // attaching a correlation id.
                if let Some(id) = &sender {
                    publish_response(&publisher, id, &body, code).await;
                }
            }
            Ok(None) => {}
            Err(error) => {
                // Isolated to this handler, the remaining ones still execute.
                warn!(%error, "Handler failed while processing request");
            }
        }
    }
}

async fn publish_response<P: Publisher>(publisher: &P, id: &CorrelationId, body: &Value, code: u16) {
    match protocol::encode_response(body, code, id) {
        Ok(payload) => {
            if let Err(error) = publisher.publish(&topic::response(id), &payload).await {
                warn!(%id, %error, "Response undeliverable");
            }
        }
        Err(error) => warn!(%id, %error, "Unable to encode response envelope"),
    }
}
