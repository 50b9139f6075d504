//! # settlemesh-stream
//!
//! **Event plane**: one upstream chain feed per endpoint, fanned out to any
//! number of independently filtered, independently cancellable subscribers.
//!
//! - [`ChainFeed`] / [`UpstreamControl`]: the node connection collaborator
//! - [`Multiplexer`]: subscriber table, listener and per-subscriber workers
//! - [`FieldFilter`]: exact-match payload predicates
//! - [`EventHandler`]: subscriber callback, isolated per subscriber
//! - [`FeedPool`]: explicit endpoint-keyed multiplexer lifecycle

pub mod feed;
pub mod filter;
pub mod handler;
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock_feed;
pub mod multiplexer;
pub mod pool;

pub use feed::{ChainFeed, Upstream, UpstreamControl};
pub use filter::FieldFilter;
pub use handler::{handler_fn, EventHandler, FnHandler, HandlerError};
#[cfg(any(test, feature = "test-helpers"))]
pub use mock_feed::{channel_handler, ChannelHandler, FaultyHandler, MockFeed};
pub use multiplexer::{
    LinkState, Multiplexer, SubscriptionHandle, SubscriptionInfo, SubscriptionKind,
};
pub use pool::FeedPool;
