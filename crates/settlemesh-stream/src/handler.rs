//! Subscriber callbacks.

use std::future::Future;

use async_trait::async_trait;
use settlemesh_types::{ChainEvent, SubscriptionId};
use thiserror::Error;
use tracing::warn;

/// Failure inside a subscriber's handler. Stays with that subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("handler failed: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<settlemesh_types::SettlemeshError> for HandlerError {
    fn from(err: settlemesh_types::SettlemeshError) -> Self {
        Self(err.to_string())
    }
}

/// Receives the events of one subscription, one at a time, in upstream order.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: ChainEvent) -> Result<(), HandlerError>;

    /// Called when [`EventHandler::handle`] returns an error. The event is not
    /// redelivered.
    fn on_error(&self, subscription: SubscriptionId, event: &ChainEvent, error: &HandlerError) {
        warn!(
            subscription = %subscription,
            event = %event.id,
            event_type = %event.event_type,
            error = %error,
            "Subscriber handler failed"
        );
    }
}

/// Handler built from an async closure. See [`handler_fn`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(ChainEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: ChainEvent) -> Result<(), HandlerError> {
        (self.0)(event).await
    }
}

/// Wrap an async closure as an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(ChainEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler(f)
}
