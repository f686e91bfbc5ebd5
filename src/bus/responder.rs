//! Execution of registered handlers against decoded requests

use crate::BoxedError;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;

/// Business-level handler registered for a topic pattern
///
/// Returning `Ok(None)` signals that no response is expected for this delivery;
/// `Ok(Some((body, code)))` is published back to the requester when the incoming
/// envelope carried a correlation id.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Processes a decoded request delivered on `topic`
    async fn execute(
        &self,
        topic: &str,
        data: Value,
    ) -> Result<Option<(Value, u16)>, BoxedError>;
}

/// [`RequestHandler`] adapter for plain async closures
pub struct FnHandler<F>(F);

/// Wraps an async closure as a [`RequestHandler`]
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<(Value, u16)>, BoxedError>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<(Value, u16)>, BoxedError>> + Send,
{
    async fn execute(
        &self,
        topic: &str,
        data: Value,
    ) -> Result<Option<(Value, u16)>, BoxedError> {
        (self.0)(topic.to_owned(), data).await
    }
}

/// Executes handlers against one decoded request
///
/// Thin collaborator between the dispatcher and the handler abstraction; it owns
/// the decoded request so every handler of a broadcast receives the identical body.
pub struct Responder {
    topic: String,
    data: Value,
}

impl Responder {
    /// Creates a responder for a request delivered on `topic`
    pub fn new(topic: String, data: Value) -> Self {
        Self { topic, data }
    }

    /// Runs a single handler, yielding its optional `(body, code)` result
    pub async fn execute(
        &self,
        handler: &dyn RequestHandler,
    ) -> Result<Option<(Value, u16)>, BoxedError> {
        handler.execute(&self.topic, self.data.clone()).await
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn hand_each_handler_the_identical_request() {
        let responder = Responder::new("hello.world".into(), json!({ "msg": "ping" }));
        let echo = handler_fn(|topic, data| async move {
            assert_eq!(topic, "hello.world");
            Ok(Some((data, 200)))
        });

        let first = responder.execute(&echo).await.unwrap();
        let second = responder.execute(&echo).await.unwrap();

        assert_eq!(first, Some((json!({ "msg": "ping" }), 200)));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn pass_handler_errors_through() {
        let responder = Responder::new("hello.world".into(), json!(null));
        let failing = handler_fn(|_, _| async { Err("boom".into()) });

        assert!(responder.execute(&failing).await.is_err());
    }
}
