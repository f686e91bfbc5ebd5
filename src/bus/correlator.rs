//! Correlation of outstanding requests with their single reply

use crate::protocol::CorrelationId;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::warn;

/// Body and status code of a reply, both absent when no response arrived
pub type ResponsePayload = (Option<Value>, Option<u16>);

/// Pending one-shot reply channels keyed by correlation id
///
/// At most one entry exists per id at any time and it is removed atomically with
/// its single completion, so a late or duplicate delivery can never fire twice.
#[derive(Default)]
pub struct ResponseCorrelator {
    pending: HashMap<CorrelationId, oneshot::Sender<ResponsePayload>>,
}

impl ResponseCorrelator {
    /// Registers the reply channel for a freshly generated correlation id
    pub fn insert(&mut self, id: CorrelationId, channel: oneshot::Sender<ResponsePayload>) {
        // Ids are generated per request, a collision indicates misuse.
        if self.pending.insert(id.clone(), channel).is_some() {
            warn!(%id, "replaced pending response for duplicate correlation id");
        }
    }

    /// Completes the pending reply for `id`, if one exists
    ///
    /// Returns whether an entry was present and consumed. Unknown ids are the
    /// caller's cue to silently discard the delivery — late and duplicate replies
    /// are expected during unsubscribe races.
    pub fn complete(&mut self, id: &CorrelationId, response: ResponsePayload) -> bool {
        match self.pending.remove(id) {
            Some(channel) => {
                // The waiter may have given up in the meantime, which is fine.
                channel.send(response).ok();
                true
            }
            None => false,
        }
    }

    /// Drops the pending entry for `id`, used by callers cancelling their wait
    pub fn remove(&mut self, id: &CorrelationId) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Number of requests still awaiting their reply
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use serde_json::json;

    #[test]
    fn fire_each_pending_response_at_most_once() {
        let mut correlator = ResponseCorrelator::default();
        let id = CorrelationId::generate();
        let (tx, mut rx) = oneshot::channel();

        correlator.insert(id.clone(), tx);

        assert!(correlator.complete(&id, (Some(json!("pong")), Some(200))));
        assert_eq!(rx.try_recv().unwrap(), (Some(json!("pong")), Some(200)));

        // A second delivery on the same id finds nothing left to fire
        assert!(!correlator.complete(&id, (Some(json!("again")), Some(200))));
        assert_eq!(correlator.outstanding(), 0);
    }

    #[test]
    fn discard_replies_nobody_awaits() {
        let mut correlator = ResponseCorrelator::default();
        assert!(!correlator.complete(&CorrelationId::generate(), (None, None)));
    }

    #[test]
    fn cancel_on_removal() {
        let mut correlator = ResponseCorrelator::default();
        let id = CorrelationId::generate();
        let (tx, _rx) = oneshot::channel();

        correlator.insert(id.clone(), tx);

        assert!(correlator.remove(&id));
        assert!(!correlator.complete(&id, (None, None)));
    }
}
