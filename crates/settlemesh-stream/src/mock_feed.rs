//! Scriptable [`ChainFeed`] and handlers for tests. **Never use in production.**

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use settlemesh_types::{AccountAddress, ChainEvent, Notification, Result, SettlemeshError};
use tokio::sync::mpsc;

use crate::{
    feed::{ChainFeed, Upstream, UpstreamControl},
    handler::{EventHandler, HandlerError},
};

const MOCK_CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct MockState {
    generation: u64,
    sender: Option<mpsc::Sender<Notification>>,
    watched: BTreeSet<AccountAddress>,
    connects: usize,
    failing_connects: usize,
    connect_delay: Option<Duration>,
}

/// In-process feed. Clones share state, so a test keeps one clone to push
/// notifications while the multiplexer owns another.
#[derive(Clone, Default)]
pub struct MockFeed {
    state: Arc<Mutex<MockState>>,
}

impl MockFeed {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `notification` on the current connection. Returns `false`
    /// when nothing is connected.
    pub async fn push(&self, notification: Notification) -> bool {
        let sender = self.state.lock().sender.clone();
        match sender {
            Some(sender) => sender.send(notification).await.is_ok(),
            None => false,
        }
    }

    /// Simulate losing the connection: the notification stream ends.
    pub fn drop_connection(&self) {
        let mut state = self.state.lock();
        state.sender = None;
        state.watched.clear();
    }

    /// Fail the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().failing_connects = count;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.lock().sender.is_some()
    }

    /// Accounts watched on the current connection.
    #[must_use]
    pub fn watched(&self) -> Vec<AccountAddress> {
        self.state.lock().watched.iter().cloned().collect()
    }
}

struct MockControl {
    state: Arc<Mutex<MockState>>,
    generation: u64,
}

impl MockControl {
    fn with_current<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> Result<T> {
        let mut state = self.state.lock();
        if state.generation != self.generation || state.sender.is_none() {
            return Err(SettlemeshError::Subscription {
                reason: "connection closed".into(),
            });
        }
        Ok(f(&mut state))
    }
}

impl UpstreamControl for MockControl {
    fn watch_account(&self, address: &AccountAddress) -> Result<()> {
        self.with_current(|s| {
            s.watched.insert(address.clone());
        })
    }

    fn unwatch_account(&self, address: &AccountAddress) -> Result<()> {
        self.with_current(|s| {
            s.watched.remove(address);
        })
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if state.generation == self.generation {
            state.sender = None;
            state.watched.clear();
        }
    }
}

#[async_trait]
impl ChainFeed for MockFeed {
    async fn connect(&self, endpoint: &str) -> Result<Upstream> {
        let delay = self.state.lock().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        state.connects += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(SettlemeshError::ledger(format!("ECONNREFUSED {endpoint}")));
        }
        let (tx, rx) = mpsc::channel(MOCK_CHANNEL_CAPACITY);
        state.generation += 1;
        state.sender = Some(tx);
        state.watched.clear();
        Ok(Upstream {
            notifications: rx,
            control: Arc::new(MockControl {
                state: Arc::clone(&self.state),
                generation: state.generation,
            }),
        })
    }
}

/// Forwards every event into a channel.
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<ChainEvent>,
}

#[must_use]
pub fn channel_handler() -> (ChannelHandler, mpsc::UnboundedReceiver<ChainEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelHandler { tx }, rx)
}

#[async_trait]
impl EventHandler for ChannelHandler {
    async fn handle(&self, event: ChainEvent) -> std::result::Result<(), HandlerError> {
        self.tx
            .send(event)
            .map_err(|_| HandlerError::new("receiver dropped"))
    }
}

/// Counts deliveries, fails or panics on demand.
#[derive(Clone, Default)]
pub struct FaultyHandler {
    pub calls: Arc<AtomicUsize>,
    pub panic_on_call: Option<usize>,
    pub fail_on_call: Option<usize>,
    pub delay: Option<Duration>,
}

#[async_trait]
impl EventHandler for FaultyHandler {
    async fn handle(&self, _event: ChainEvent) -> std::result::Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_on_call == Some(call) {
            panic!("handler panic on call {call}");
        }
        if self.fail_on_call == Some(call) {
            return Err(HandlerError::new(format!("failure on call {call}")));
        }
        Ok(())
    }
}
