//! Endpoint-keyed multiplexer pool.
//!
//! Owned by the process's composition root. One [`Multiplexer`] per
//! endpoint; closing is explicit and deterministic.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use settlemesh_types::{NetworkConfig, Result, StreamConfig};
use tracing::info;

use crate::{feed::ChainFeed, multiplexer::Multiplexer};

pub struct FeedPool {
    feed: Arc<dyn ChainFeed>,
    config: StreamConfig,
    open: Mutex<HashMap<String, Arc<Multiplexer>>>,
}

impl FeedPool {
    pub fn new(feed: Arc<dyn ChainFeed>, config: StreamConfig) -> Self {
        Self {
            feed,
            config,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// The multiplexer for `endpoint`, created on first use. Connection is
    /// still lazy: nothing is dialled until the first subscription.
    pub fn open(&self, endpoint: &str) -> Arc<Multiplexer> {
        let mut open = self.open.lock();
        if let Some(existing) = open.get(endpoint) {
            if !existing.is_closed() {
                return Arc::clone(existing);
            }
        }
        let mux = Arc::new(Multiplexer::new(
            endpoint,
            Arc::clone(&self.feed),
            self.config.clone(),
        ));
        open.insert(endpoint.to_string(), Arc::clone(&mux));
        info!(endpoint, "Multiplexer opened");
        mux
    }

    /// [`FeedPool::open`] on the RPC endpoint of `network`.
    pub fn open_network(&self, network: &NetworkConfig) -> Result<Arc<Multiplexer>> {
        let endpoint = network.rpc_endpoint()?;
        Ok(self.open(&endpoint))
    }

    #[must_use]
    pub fn get(&self, endpoint: &str) -> Option<Arc<Multiplexer>> {
        self.open.lock().get(endpoint).cloned()
    }

    /// Disconnect and forget `endpoint`. Returns `false` if it was not open.
    pub fn close(&self, endpoint: &str) -> bool {
        let removed = self.open.lock().remove(endpoint);
        match removed {
            Some(mux) => {
                mux.disconnect();
                true
            }
            None => false,
        }
    }

    /// Disconnect everything. Returns how many multiplexers were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<Multiplexer>> = self.open.lock().drain().map(|(_, m)| m).collect();
        for mux in &drained {
            mux.disconnect();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "All multiplexers closed");
        }
        drained.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.open.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.open.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_feed::{channel_handler, MockFeed};
    use settlemesh_types::{Network, SettlemeshError};

    fn pool(feed: &MockFeed) -> FeedPool {
        FeedPool::new(Arc::new(feed.clone()), StreamConfig::default())
    }

    #[test]
    fn reuses_per_endpoint() {
        let feed = MockFeed::new();
        let pool = pool(&feed);
        let a = pool.open("ws://a");
        let again = pool.open("ws://a");
        let b = pool.open("ws://b");
        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn network_endpoint_resolution() {
        let feed = MockFeed::new();
        let pool = pool(&feed);
        let mux = pool
            .open_network(&NetworkConfig::for_network(Network::Local))
            .unwrap();
        assert_eq!(mux.endpoint(), settlemesh_types::constants::LOCAL_RPC);
        assert!(pool
            .open_network(&NetworkConfig::for_network(Network::Custom))
            .is_err());
    }

    #[tokio::test]
    async fn close_disconnects() {
        let feed = MockFeed::new();
        let pool = pool(&feed);
        let mux = pool.open("ws://a");
        let (handler, _rx) = channel_handler();
        mux.subscribe_to_blocks(handler).await.unwrap();
        assert!(feed.is_connected());

        assert!(pool.close("ws://a"));
        assert!(!pool.close("ws://a"));
        assert!(!feed.is_connected());
        assert_eq!(mux.subscription_count(), 0);

        let (handler, _rx) = channel_handler();
        assert!(matches!(
            mux.subscribe_to_blocks(handler).await.unwrap_err(),
            SettlemeshError::Disconnected
        ));

        let fresh = pool.open("ws://a");
        assert!(!Arc::ptr_eq(&mux, &fresh));
    }

    #[tokio::test]
    async fn close_all_is_deterministic() {
        let feed = MockFeed::new();
        let pool = pool(&feed);
        let a = pool.open("ws://a");
        let b = pool.open("ws://b");
        assert_eq!(pool.close_all(), 2);
        assert!(pool.is_empty());
        assert!(a.is_closed() && b.is_closed());
        assert_eq!(pool.close_all(), 0);
    }
}
