//! Topic naming helpers
//!
//! Topics live in a dot-delimited namespace. A single `*` marker inside a topic
//! string selects a pattern-based (wildcard) broker subscription instead of an
//! exact-match one; its presence is the sole discriminator. Topics prefixed with
//! `response.` form the reserved namespace for ephemeral reply channels and are
//! never ordinary subscription targets.

use crate::protocol::CorrelationId;

/// Prefix of the reserved reply-channel namespace
pub const RESPONSE_PREFIX: &str = "response.";

/// Wildcard marker selecting a pattern subscription
pub const WILDCARD: char = '*';

/// Whether a topic string requires a pattern subscription at the broker
pub fn is_pattern(topic: &str) -> bool {
    topic.contains(WILDCARD)
}

/// Whether a concrete topic lies in the reserved reply-channel namespace
pub fn is_response(topic: &str) -> bool {
    topic.starts_with(RESPONSE_PREFIX)
}

/// Reply topic for a given correlation id
pub fn response(id: &CorrelationId) -> String {
    format!("{}{}", RESPONSE_PREFIX, id)
}

/// Extracts the correlation id from a reply topic, if it is one
pub fn response_id(topic: &str) -> Option<CorrelationId> {
    topic.strip_prefix(RESPONSE_PREFIX).map(Into::into)
}

#[cfg(test)]
mod does {
    use super::*;

    #[test]
    fn discriminate_patterns_by_the_wildcard_marker() {
        assert!(is_pattern("session.*.terminated"));
        assert!(is_pattern("metrics.*"));
        assert!(!is_pattern("session.created"));
    }

    #[test]
    fn recognise_the_reserved_namespace() {
        assert!(is_response("response.42"));
        assert!(!is_response("session.response.42"));
        assert!(!is_response("hello.world"));
    }

    #[test]
    fn round_trip_reply_topics() {
        let id = CorrelationId::generate();
        let topic = response(&id);

        assert!(is_response(&topic));
        assert_eq!(response_id(&topic), Some(id));
        assert_eq!(response_id("hello.world"), None);
    }
}
