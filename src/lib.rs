//! Adapter that turns a generic publish/subscribe broker into a topic-routed message bus.
//!
//! In general, there are two modes of operation:
//!
//! 1. Publish and subscribe
//! 2. Request and response
//!
//! In the first mode, handlers are registered for topic patterns (exact strings or
//! strings containing a single `*` wildcard) and every published message is delivered
//! to every handler whose pattern matches — broadcast semantics, no handler suppresses
//! another. Publishing is fire-and-forget.
//!
//! The second mode builds on the first by adding a correlated reply channel. Each
//! outgoing request carries a freshly generated correlation id and the sender listens
//! on an ephemeral topic in the reserved `response.` namespace until the reply arrives
//! (or a caller-supplied timeout elapses). Replies are delivered at most once and the
//! ephemeral subscription is torn down together with the pending entry.
//!
//! The [`bus::Bus`] type ties everything together on top of a pluggable
//! [`backend::Backend`]. A Redis implementation is provided in [`backend::redis`].

#![deny(missing_docs)]

pub mod backend;
pub mod bus;
pub mod protocol;
pub mod topic;

/// Generic error type
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;
