//! # Multiplexer: one upstream feed, many subscribers
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────┐
//!   ChainFeed ─────▶ │   listener   │  single task, owns the notification stream
//!                    └──────┬───────┘
//!                           │ match kind + filter (read lock on table)
//!            ┌──────────────┼──────────────┐
//!            ▼              ▼              ▼
//!       [queue sub A]  [queue sub B]  [queue sub C]   unbounded, FIFO
//!            │              │              │
//!       worker task    worker task    worker task     one per subscriber
//!            ▼              ▼              ▼
//!        handler A      handler B      handler C
//! ```
//!
//! The listener never awaits a handler, so a slow subscriber only delays its
//! own queue. Each worker invokes its handler sequentially, which keeps
//! per-subscriber delivery in upstream order. Handler errors and panics stay
//! inside the worker.
//!
//! The upstream connection is opened lazily by the first subscription,
//! bounded by [`StreamConfig::connect_timeout`]. When it is lost the listener
//! reconnects once and re-registers every watched account; if that fails the
//! next subscription, or an explicit [`Multiplexer::reconnect`], retries.
//! Subscriptions stay registered throughout. [`Multiplexer::watch_link`]
//! reports every [`LinkState`] change.

use std::{
    collections::BTreeMap,
    fmt,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use settlemesh_types::{
    constants, AccountAddress, ChainEvent, EventType, Notification, Result, SettlemeshError,
    StreamConfig, SubscriptionId,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    feed::{ChainFeed, UpstreamControl},
    filter::FieldFilter,
    handler::EventHandler,
};

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionKind {
    /// Every new block header.
    Blocks,
    /// Generic events whose type is in the set.
    Events(Vec<EventType>),
    /// Balance changes of one account.
    Balance(AccountAddress),
}

impl SubscriptionKind {
    fn matches(&self, event: &ChainEvent) -> bool {
        match self {
            Self::Blocks => event.event_type.as_str() == constants::NEW_BLOCK_EVENT,
            Self::Events(types) => types.contains(&event.event_type),
            Self::Balance(address) => {
                event.event_type.as_str() == constants::BALANCE_CHANGED_EVENT
                    && event.field("address").and_then(|v| v.as_str()) == Some(address.as_str())
            }
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocks => write!(f, "blocks"),
            Self::Events(types) => {
                let names: Vec<&str> = types.iter().map(EventType::as_str).collect();
                write!(f, "events[{}]", names.join(","))
            }
            Self::Balance(address) => write!(f, "balance[{address}]"),
        }
    }
}

/// Upstream connection state as seen by the multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// Nothing dialled yet.
    Idle,
    Connected,
    /// Upstream lost and not yet re-established. Subscriptions receive
    /// nothing until a reconnect succeeds.
    Lost,
    /// Disconnected for good.
    Closed,
}

/// Snapshot entry of [`Multiplexer::active_subscriptions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub kind: SubscriptionKind,
    pub filter: Option<FieldFilter>,
}

/// Returned by every `subscribe_to_*` call.
///
/// Dropping the handle does not cancel the subscription; call
/// [`SubscriptionHandle::cancel`] or [`Multiplexer::unsubscribe`].
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    owner: Weak<Inner>,
}

impl SubscriptionHandle {
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Same contract as [`Multiplexer::unsubscribe`]. Returns `false` once
    /// the multiplexer is gone.
    pub fn cancel(&self) -> bool {
        self.owner
            .upgrade()
            .is_some_and(|inner| inner.unsubscribe(self.id))
    }
}

struct Subscriber {
    kind: SubscriptionKind,
    filter: Option<FieldFilter>,
    queue: mpsc::UnboundedSender<ChainEvent>,
    active: Arc<AtomicBool>,
}

impl Subscriber {
    fn matches(&self, event: &ChainEvent) -> bool {
        self.kind.matches(event)
            && self
                .filter
                .as_ref()
                .is_none_or(|filter| filter.matches(&event.data))
    }
}

struct Inner {
    endpoint: String,
    feed: Arc<dyn ChainFeed>,
    config: StreamConfig,
    /// Ordered by id, so by registration time.
    subscribers: RwLock<BTreeMap<SubscriptionId, Subscriber>>,
    link: RwLock<Option<Arc<dyn UpstreamControl>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    /// Serializes connection establishment.
    connect_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    state: watch::Sender<LinkState>,
}

/// Fans one upstream feed out to any number of filtered subscribers.
///
/// Dropping the multiplexer disconnects it.
pub struct Multiplexer {
    inner: Arc<Inner>,
}

impl Multiplexer {
    pub fn new(endpoint: impl Into<String>, feed: Arc<dyn ChainFeed>, config: StreamConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.into(),
                feed,
                config,
                subscribers: RwLock::new(BTreeMap::new()),
                link: RwLock::new(None),
                listener: Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
                state: watch::Sender::new(LinkState::Idle),
            }),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Whether an upstream connection is currently cached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.link.read().is_some()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    #[must_use]
    pub fn link_state(&self) -> LinkState {
        *self.inner.state.borrow()
    }

    /// Receiver notified on every [`LinkState`] change.
    #[must_use]
    pub fn watch_link(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    /// Re-establish a lost upstream now instead of waiting for the next
    /// subscription. A no-op while connected.
    pub async fn reconnect(&self) -> Result<()> {
        if self.inner.is_closed() {
            return Err(SettlemeshError::Disconnected);
        }
        self.inner.ensure_connected().await
    }

    /// One event of type `system.NewBlock` per new block header.
    pub async fn subscribe_to_blocks(&self, handler: impl EventHandler) -> Result<SubscriptionHandle> {
        self.inner
            .subscribe(SubscriptionKind::Blocks, None, Arc::new(handler))
            .await
    }

    /// Events whose type is in `event_types` and whose payload satisfies
    /// `filter`, if given.
    pub async fn subscribe_to_events<I, T>(
        &self,
        event_types: I,
        handler: impl EventHandler,
        filter: Option<FieldFilter>,
    ) -> Result<SubscriptionHandle>
    where
        I: IntoIterator<Item = T>,
        T: Into<EventType>,
    {
        let mut types: Vec<EventType> = event_types.into_iter().map(Into::into).collect();
        types.sort();
        types.dedup();
        if types.is_empty() {
            return Err(SettlemeshError::Subscription {
                reason: "at least one event type is required".into(),
            });
        }
        let filter = filter.filter(|f| !f.is_empty());
        self.inner
            .subscribe(SubscriptionKind::Events(types), filter, Arc::new(handler))
            .await
    }

    /// Balance changes of `address`, delivered as `balances.BalanceSet` events.
    pub async fn subscribe_to_balance_changes(
        &self,
        address: AccountAddress,
        handler: impl EventHandler,
    ) -> Result<SubscriptionHandle> {
        self.inner
            .subscribe(SubscriptionKind::Balance(address), None, Arc::new(handler))
            .await
    }

    /// Remove a subscription. Returns `false` if `id` is unknown or already
    /// removed. No callback for `id` starts after this returns; one already
    /// running is allowed to finish.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }

    /// Cancel every subscription and close the upstream connection.
    /// Idempotent. Later subscriptions fail with `Disconnected`.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    #[must_use]
    pub fn active_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner
            .subscribers
            .read()
            .iter()
            .map(|(id, sub)| SubscriptionInfo {
                id: *id,
                kind: sub.kind.clone(),
                filter: sub.filter.clone(),
            })
            .collect()
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.inner.disconnect();
    }
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn subscribe(
        self: &Arc<Self>,
        kind: SubscriptionKind,
        filter: Option<FieldFilter>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionHandle> {
        if self.is_closed() {
            return Err(SettlemeshError::Disconnected);
        }
        self.ensure_connected().await?;

        let id = SubscriptionId::new();
        let (queue, rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));

        {
            // Watch decision, upstream call and insert under one write lock,
            // so a concurrent unsubscribe of the same account cannot interleave.
            let mut subscribers = self.subscribers.write();
            if self.is_closed() {
                return Err(SettlemeshError::Disconnected);
            }
            if let SubscriptionKind::Balance(address) = &kind {
                if !watches(&subscribers, address) {
                    let control = self.link.read().clone();
                    if let Some(control) = control {
                        control.watch_account(address).map_err(|err| {
                            SettlemeshError::Subscription {
                                reason: format!("cannot watch {address}: {err}"),
                            }
                        })?;
                    }
                }
            }
            subscribers.insert(
                id,
                Subscriber {
                    kind: kind.clone(),
                    filter,
                    queue,
                    active: Arc::clone(&active),
                },
            );
        }

        tokio::spawn(run_worker(id, handler, rx, active));
        info!(subscription = %id, kind = %kind, endpoint = %self.endpoint, "Subscribed");
        Ok(SubscriptionHandle {
            id,
            owner: Arc::downgrade(self),
        })
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let sub = {
            let mut subscribers = self.subscribers.write();
            let Some(sub) = subscribers.remove(&id) else {
                return false;
            };
            sub.active.store(false, Ordering::Release);
            if let SubscriptionKind::Balance(address) = &sub.kind {
                if !watches(&subscribers, address) {
                    let control = self.link.read().clone();
                    if let Some(control) = control {
                        if let Err(err) = control.unwatch_account(address) {
                            warn!(subscription = %id, address = %address, error = %err, "Failed to unwatch account");
                        }
                    }
                }
            }
            sub
        };
        info!(subscription = %id, kind = %sub.kind, "Unsubscribed");
        true
    }

    fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscribers = std::mem::take(&mut *self.subscribers.write());
        for sub in subscribers.values() {
            sub.active.store(false, Ordering::Release);
        }
        if let Some(control) = self.link.write().take() {
            control.close();
        }
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        self.state.send_replace(LinkState::Closed);
        info!(
            endpoint = %self.endpoint,
            cancelled = subscribers.len(),
            "Multiplexer disconnected"
        );
    }

    async fn ensure_connected(self: &Arc<Self>) -> Result<()> {
        if self.link.read().is_some() {
            return Ok(());
        }
        let _guard = self.connect_lock.lock().await;
        if self.is_closed() {
            return Err(SettlemeshError::Disconnected);
        }
        if self.link.read().is_some() {
            return Ok(());
        }
        let notifications = self.open_upstream().await?;
        let listener = tokio::spawn(run_listener(Arc::clone(self), notifications));
        if let Some(previous) = self.listener.lock().replace(listener) {
            previous.abort();
        }
        Ok(())
    }

    /// Connect, re-register watched accounts and cache the control surface.
    /// Callers hold `connect_lock`.
    async fn open_upstream(&self) -> Result<mpsc::Receiver<Notification>> {
        let timeout = self.config.connect_timeout();
        let upstream = match tokio::time::timeout(timeout, self.feed.connect(&self.endpoint)).await {
            Ok(Ok(upstream)) => upstream,
            Ok(Err(err)) => {
                return Err(SettlemeshError::Subscription {
                    reason: format!("cannot connect to {}: {err}", self.endpoint),
                });
            }
            Err(_) => {
                return Err(SettlemeshError::Subscription {
                    reason: format!(
                        "connecting to {} timed out after {}ms",
                        self.endpoint,
                        timeout.as_millis()
                    ),
                });
            }
        };

        if self.is_closed() {
            upstream.control.close();
            return Err(SettlemeshError::Disconnected);
        }
        {
            // Held until the link is published, so no balance subscription
            // changes between re-watching and becoming visible to unsubscribe.
            let subscribers = self.subscribers.read();
            for address in watched_addresses(&subscribers) {
                if let Err(err) = upstream.control.watch_account(&address) {
                    upstream.control.close();
                    return Err(SettlemeshError::Subscription {
                        reason: format!("cannot re-watch {address}: {err}"),
                    });
                }
            }
            *self.link.write() = Some(Arc::clone(&upstream.control));
        }
        self.state.send_replace(LinkState::Connected);
        info!(endpoint = %self.endpoint, "Upstream connected");
        Ok(upstream.notifications)
    }

    fn dispatch(&self, notification: Notification) {
        let events = notification.into_events();
        let subscribers = self.subscribers.read();
        for event in &events {
            let mut delivered = 0usize;
            for (id, sub) in subscribers.iter() {
                if !sub.matches(event) {
                    continue;
                }
                if sub.queue.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    debug!(subscription = %id, "Queue closed, skipping");
                }
            }
            debug!(
                event = %event.id,
                event_type = %event.event_type,
                block = event.block_number,
                delivered,
                "Dispatched"
            );
        }
    }
}

fn watches(subscribers: &BTreeMap<SubscriptionId, Subscriber>, address: &AccountAddress) -> bool {
    subscribers
        .values()
        .any(|s| matches!(&s.kind, SubscriptionKind::Balance(a) if a == address))
}

fn watched_addresses(subscribers: &BTreeMap<SubscriptionId, Subscriber>) -> Vec<AccountAddress> {
    let mut addresses: Vec<AccountAddress> = subscribers
        .values()
        .filter_map(|s| match &s.kind {
            SubscriptionKind::Balance(a) => Some(a.clone()),
            _ => None,
        })
        .collect();
    addresses.sort();
    addresses.dedup();
    addresses
}

async fn run_listener(inner: Arc<Inner>, mut notifications: mpsc::Receiver<Notification>) {
    loop {
        while let Some(notification) = notifications.recv().await {
            inner.dispatch(notification);
        }
        if inner.is_closed() {
            return;
        }

        inner.state.send_replace(LinkState::Lost);
        warn!(endpoint = %inner.endpoint, "Upstream feed lost");
        let _guard = inner.connect_lock.lock().await;
        inner.link.write().take();
        if inner.is_closed() {
            return;
        }
        match inner.open_upstream().await {
            Ok(next) => {
                info!(
                    endpoint = %inner.endpoint,
                    subscriptions = inner.subscribers.read().len(),
                    "Upstream reconnected"
                );
                notifications = next;
            }
            Err(err) => {
                warn!(
                    endpoint = %inner.endpoint,
                    error = %err,
                    "Reconnect failed; waiting for reconnect() or the next subscription"
                );
                return;
            }
        }
    }
}

async fn run_worker(
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
    mut queue: mpsc::UnboundedReceiver<ChainEvent>,
    active: Arc<AtomicBool>,
) {
    while let Some(event) = queue.recv().await {
        if !active.load(Ordering::Acquire) {
            break;
        }
        match AssertUnwindSafe(handler.handle(event.clone())).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => handler.on_error(id, &event, &err),
            Err(_) => warn!(
                subscription = %id,
                event = %event.id,
                event_type = %event.event_type,
                "Subscriber handler panicked; subscription stays active"
            ),
        }
    }
    debug!(subscription = %id, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{handler::handler_fn, mock_feed::MockFeed};
    use settlemesh_types::{BlockHeader, BlockRef, EventRecord};
    use std::time::Duration;

    fn mux(feed: &MockFeed) -> Multiplexer {
        Multiplexer::new("ws://mock", Arc::new(feed.clone()), StreamConfig::default())
    }

    #[tokio::test]
    async fn connects_lazily_once() {
        let feed = MockFeed::new();
        let m = mux(&feed);
        assert!(!m.is_connected());
        assert_eq!(feed.connect_count(), 0);

        m.subscribe_to_blocks(handler_fn(|_| async { Ok(()) })).await.unwrap();
        m.subscribe_to_events(["asset.Issued"], handler_fn(|_| async { Ok(()) }), None)
            .await
            .unwrap();
        assert!(m.is_connected());
        assert_eq!(feed.connect_count(), 1);
        assert_eq!(m.subscription_count(), 2);
    }

    #[tokio::test]
    async fn empty_type_set_rejected() {
        let feed = MockFeed::new();
        let m = mux(&feed);
        let err = m
            .subscribe_to_events(Vec::<&str>::new(), handler_fn(|_| async { Ok(()) }), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SettlemeshError::Subscription { .. }));
    }

    #[tokio::test]
    async fn connect_timeout_is_subscription_error() {
        let feed = MockFeed::new();
        feed.set_connect_delay(Duration::from_secs(5));
        let m = Multiplexer::new(
            "ws://slow",
            Arc::new(feed.clone()),
            StreamConfig {
                connect_timeout_ms: 20,
            },
        );
        let err = m.subscribe_to_blocks(handler_fn(|_| async { Ok(()) })).await.unwrap_err();
        assert!(matches!(err, SettlemeshError::Subscription { .. }), "got {err}");
        assert_eq!(m.subscription_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_final() {
        let feed = MockFeed::new();
        let m = mux(&feed);
        m.subscribe_to_blocks(handler_fn(|_| async { Ok(()) })).await.unwrap();
        m.disconnect();
        m.disconnect();
        assert_eq!(m.subscription_count(), 0);
        assert!(!m.is_connected());
        assert!(!feed.is_connected());
        let err = m.subscribe_to_blocks(handler_fn(|_| async { Ok(()) })).await.unwrap_err();
        assert!(matches!(err, SettlemeshError::Disconnected));
    }

    #[tokio::test]
    async fn unsubscribe_unknown_is_false() {
        let feed = MockFeed::new();
        let m = mux(&feed);
        let handle = m.subscribe_to_blocks(handler_fn(|_| async { Ok(()) })).await.unwrap();
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(!m.unsubscribe(handle.id()));
        assert!(!m.unsubscribe(SubscriptionId::new()));
    }

    #[tokio::test]
    async fn snapshot_lists_kinds() {
        let feed = MockFeed::new();
        let m = mux(&feed);
        let addr = AccountAddress::parse("5Alice").unwrap();
        m.subscribe_to_balance_changes(addr.clone(), handler_fn(|_| async { Ok(()) }))
            .await
            .unwrap();
        m.subscribe_to_events(
            ["settlement.InstructionAffirmed", "settlement.InstructionAffirmed"],
            handler_fn(|_| async { Ok(()) }),
            Some(FieldFilter::new().field("instructionId", 1)),
        )
        .await
        .unwrap();

        let snapshot = m.active_subscriptions();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].kind, SubscriptionKind::Balance(addr));
        assert_eq!(
            snapshot[1].kind,
            SubscriptionKind::Events(vec![EventType::from("settlement.InstructionAffirmed")])
        );
        assert!(snapshot[1].filter.is_some());
    }

    #[tokio::test]
    async fn dispatch_preserves_order_per_subscriber() {
        let feed = MockFeed::new();
        let m = mux(&feed);
        let (tx, mut rx) = mpsc::unbounded_channel();
        m.subscribe_to_blocks(handler_fn(move |e: ChainEvent| {
            let tx = tx.clone();
            async move {
                tx.send(e.block_number).ok();
                Ok(())
            }
        }))
        .await
        .unwrap();

        for n in 1..=20 {
            feed.push(Notification::NewHead(BlockHeader::dummy(n))).await;
            feed.push(Notification::Events {
                block: BlockRef::dummy(n),
                records: vec![EventRecord::new("asset.Issued", serde_json::Map::new())],
            })
            .await;
        }
        let mut seen = Vec::new();
        for _ in 0..20 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!(seen, (1..=20).collect::<Vec<u64>>());
    }
}
