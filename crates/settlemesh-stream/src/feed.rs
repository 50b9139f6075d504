//! Upstream feed abstraction.
//!
//! A [`ChainFeed`] opens one connection to a node and hands back a stream of
//! [`Notification`]s plus a control surface for per-account watches. The
//! connection is considered lost when the notification channel closes.

use std::sync::Arc;

use async_trait::async_trait;
use settlemesh_types::{AccountAddress, Notification, Result};
use tokio::sync::mpsc;

/// An open upstream connection.
pub struct Upstream {
    /// New heads, finalized heads, block events and watched-account changes,
    /// in arrival order.
    pub notifications: mpsc::Receiver<Notification>,
    pub control: Arc<dyn UpstreamControl>,
}

/// Control surface of an open connection.
pub trait UpstreamControl: Send + Sync {
    /// Start producing `Notification::Account` for `address`.
    fn watch_account(&self, address: &AccountAddress) -> Result<()>;

    fn unwatch_account(&self, address: &AccountAddress) -> Result<()>;

    /// Close the connection. Idempotent.
    fn close(&self);
}

/// Connects to a chain node.
#[async_trait]
pub trait ChainFeed: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Upstream>;
}
