//! Envelope codec for messages carried over the broker
//!
//! Every payload on the wire is a JSON envelope holding the message body, an optional
//! correlation id (`sender`) and an optional status code (`code`). Requests omit the
//! code, responses carry it. The correlation id of a request doubles as the suffix of
//! the reserved reply topic (see [`topic::response`](crate::topic::response)).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;
use uuid::Uuid;

/// Opaque, globally unique token linking a request to its eventual response
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a fresh, globally unique id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// String representation used as the reply topic suffix
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for CorrelationId {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Error thrown when an envelope can not be encoded or decoded
#[derive(Error, Debug)]
pub enum CodecError {
    /// The payload is not a well-formed envelope
    #[error("malformed message envelope")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Envelope {
    data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sender: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<u16>,
}

/// Encodes a request envelope, generating a fresh correlation id for it
///
/// The status code is absent for ordinary requests; responses routed through the
/// request path may attach one.
pub fn encode_request(
    data: &Value,
    code: Option<u16>,
) -> Result<(Vec<u8>, CorrelationId), CodecError> {
    let sender = CorrelationId::generate();
    let envelope = Envelope {
        data: data.clone(),
        sender: Some(sender.clone()),
        code,
    };

    Ok((serde_json::to_vec(&envelope)?, sender))
}

/// Decodes a request envelope into its body and the correlation id of the sender
pub fn decode_request(payload: &[u8]) -> Result<(Value, Option<CorrelationId>), CodecError> {
    let envelope: Envelope = serde_json::from_slice(payload)?;
    Ok((envelope.data, envelope.sender))
}

/// Encodes a response envelope destined for the reply topic of `sender`
pub fn encode_response(
    data: &Value,
    code: u16,
    sender: &CorrelationId,
) -> Result<Vec<u8>, CodecError> {
    let envelope = Envelope {
        data: data.clone(),
        sender: Some(sender.clone()),
        code: Some(code),
    };

    Ok(serde_json::to_vec(&envelope)?)
}

/// Decodes a response envelope into its body, status code and correlation id
pub fn decode_response(
    payload: &[u8],
) -> Result<(Value, Option<u16>, Option<CorrelationId>), CodecError> {
    let envelope: Envelope = serde_json::from_slice(payload)?;
    Ok((envelope.data, envelope.code, envelope.sender))
}
