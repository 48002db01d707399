//! Subscriber handler types.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

use crate::message::Message;

/// Boxed error returned by application handlers
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of handling one message
pub type HandlerResult = Result<(), BoxError>;

/// Handler for messages delivered on a topic.
///
/// Any `Fn(Message) -> impl Future<Output = HandlerResult>` closure is a
/// handler, so most code never implements this trait by hand.
pub trait MessageHandler: Send + Sync {
    /// Process one message
    fn handle(&self, message: Message) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, message: Message) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(message))
    }
}

/// Shared, type-erased handler
pub type SharedHandler = Arc<dyn MessageHandler>;

/// Wrap a closure into a [`SharedHandler`]
///
/// ```rust
/// use courier_core::{handler_fn, Message};
///
/// let handler = handler_fn(|msg: Message| async move {
///     println!("received {}", msg.id);
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> SharedHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_closure_handler_is_invoked() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler = handler_fn(move |_msg| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        handler.handle(Message::new("t", json!(1))).await.unwrap();
        handler.handle(Message::new("t", json!(2))).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handler_error_is_returned() {
        let handler = handler_fn(|_msg| async { Err::<(), BoxError>("boom".into()) });
        let err = handler.handle(Message::new("t", json!(null))).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
