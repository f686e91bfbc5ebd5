//! Registry of topic patterns and their handlers

use super::responder::RequestHandler;
use std::collections::HashMap;
use std::sync::Arc;

/// Mapping from topic pattern to the handlers registered for it
///
/// Handlers accumulate — duplicate registrations on one pattern each fire
/// independently per delivery (broadcast semantics). Ordinary subscriptions live
/// for the lifetime of the bus, so no removal operation exists.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<String, Vec<Arc<dyn RequestHandler>>>,
}

impl SubscriptionRegistry {
    /// Adds a handler under the given pattern
    ///
    /// Returns whether this is the first registration for the pattern, in which
    /// case the caller has to issue the matching broker-level subscription.
    pub fn register(&mut self, pattern: &str, handler: Arc<dyn RequestHandler>) -> bool {
        let handlers = self.entries.entry(pattern.to_owned()).or_default();
        handlers.push(handler);
        handlers.len() == 1
    }

    /// Handlers registered for the pattern key the broker reports as matched
    ///
    /// The broker performs pattern matching on the wire side; this is a plain
    /// lookup by key, never a re-match.
    pub fn handlers_for(&self, key: &str) -> Vec<Arc<dyn RequestHandler>> {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    /// Removes the most recent registration for a pattern
    ///
    /// Rolls back a [`register`](Self::register) whose broker-level subscription
    /// could not be issued, so a retry is treated as a first registration again.
    /// Ordinary subscriptions are never removed otherwise.
    pub fn retract(&mut self, pattern: &str) {
        if let Some(handlers) = self.entries.get_mut(pattern) {
            handlers.pop();
            if handlers.is_empty() {
                self.entries.remove(pattern);
            }
        }
    }

    /// All patterns with at least one registration
    pub fn patterns(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}
