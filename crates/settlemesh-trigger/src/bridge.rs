//! Trigger bridge: one workflow trigger, one multiplexer subscription.
//!
//! ```text
//!   Idle ──activate──▶ Activating ──subscribed──▶ Active ──deactivate──▶ Cancelled
//!                          │                                                ▲
//!                          └────────────deactivate (cancel on arrival)──────┘
//! ```
//!
//! The bridge owns the handle it gets back from the multiplexer and cancels
//! it exactly once, also when deactivation races an activation that is still
//! waiting for the connection.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use settlemesh_stream::{EventHandler, HandlerError, Multiplexer, SubscriptionHandle};
use settlemesh_types::{ChainEvent, Result, SettlemeshError, SubscriptionId};
use tracing::{debug, info};

use crate::{
    catalog::{resolve, EventCategory, SubscriptionPlan, TriggerFilters},
    record::TriggerRecord,
};

/// Where trigger records go: the host workflow engine.
#[async_trait]
pub trait TriggerEmitter: Send + Sync + 'static {
    async fn emit(&self, records: Vec<TriggerRecord>) -> std::result::Result<(), HandlerError>;
}

/// Parameters a workflow trigger is configured with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    pub category: EventCategory,
    pub event_type: String,
    #[serde(default)]
    pub filters: TriggerFilters,
}

impl TriggerConfig {
    pub fn new(category: EventCategory, event_type: impl Into<String>) -> Self {
        Self {
            category,
            event_type: event_type.into(),
            filters: TriggerFilters::default(),
        }
    }

    #[must_use]
    pub fn with_filters(mut self, filters: TriggerFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn plan(&self) -> Result<SubscriptionPlan> {
        resolve(self.category, &self.event_type, &self.filters)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    Idle,
    Activating,
    Active,
    Cancelled,
}

enum BridgeState {
    Idle,
    Activating,
    Active(SubscriptionHandle),
    Cancelled,
}

impl BridgeState {
    fn status(&self) -> BridgeStatus {
        match self {
            Self::Idle => BridgeStatus::Idle,
            Self::Activating => BridgeStatus::Activating,
            Self::Active(_) => BridgeStatus::Active,
            Self::Cancelled => BridgeStatus::Cancelled,
        }
    }
}

struct EmitHandler {
    category: EventCategory,
    trigger_type: String,
    emitter: Arc<dyn TriggerEmitter>,
}

#[async_trait]
impl EventHandler for EmitHandler {
    async fn handle(&self, event: ChainEvent) -> std::result::Result<(), HandlerError> {
        let record = TriggerRecord::from_event(self.category, &self.trigger_type, event);
        self.emitter.emit(vec![record]).await
    }
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TriggerBridge {
    mux: Arc<Multiplexer>,
    config: TriggerConfig,
    emitter: Arc<dyn TriggerEmitter>,
    state: Arc<Mutex<BridgeState>>,
}

impl TriggerBridge {
    pub fn new(mux: Arc<Multiplexer>, config: TriggerConfig, emitter: Arc<dyn TriggerEmitter>) -> Self {
        Self {
            mux,
            config,
            emitter,
            state: Arc::new(Mutex::new(BridgeState::Idle)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    #[must_use]
    pub fn status(&self) -> BridgeStatus {
        self.state.lock().status()
    }

    /// Id of the live subscription, if active.
    #[must_use]
    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        match &*self.state.lock() {
            BridgeState::Active(handle) => Some(handle.id()),
            _ => None,
        }
    }

    /// Resolve the configuration and register the subscription.
    ///
    /// Activation happens once per bridge. If [`TriggerBridge::deactivate`]
    /// runs while this is still waiting, the subscription is cancelled as
    /// soon as it arrives and this returns `Ok` with the bridge cancelled.
    pub async fn activate(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, BridgeState::Idle) {
                return Err(SettlemeshError::Subscription {
                    reason: format!("trigger already {:?}", state.status()).to_lowercase(),
                });
            }
            *state = BridgeState::Activating;
        }

        let subscribed = self.subscribe().await;

        let handle = {
            let mut state = self.state.lock();
            let cancelled = matches!(*state, BridgeState::Cancelled);
            match subscribed {
                Err(err) => {
                    if !cancelled {
                        *state = BridgeState::Idle;
                    }
                    return Err(err);
                }
                Ok(handle) if cancelled => handle,
                Ok(handle) => {
                    info!(
                        category = %self.config.category,
                        event_type = %self.config.event_type,
                        subscription = %handle.id(),
                        "Trigger activated"
                    );
                    *state = BridgeState::Active(handle);
                    return Ok(());
                }
            }
        };

        handle.cancel();
        info!(
            subscription = %handle.id(),
            "Trigger deactivated before activation completed"
        );
        Ok(())
    }

    /// Stop emitting. Returns `true` if this call ended an active or
    /// activating subscription. The bridge cannot be activated afterwards.
    pub fn deactivate(&self) -> bool {
        let previous = std::mem::replace(&mut *self.state.lock(), BridgeState::Cancelled);
        match previous {
            BridgeState::Active(handle) => {
                handle.cancel();
                info!(subscription = %handle.id(), "Trigger deactivated");
                true
            }
            BridgeState::Activating => {
                debug!("Trigger deactivated while activating");
                true
            }
            BridgeState::Idle | BridgeState::Cancelled => false,
        }
    }

    async fn subscribe(&self) -> Result<SubscriptionHandle> {
        let handler = EmitHandler {
            category: self.config.category,
            trigger_type: self.config.event_type.clone(),
            emitter: Arc::clone(&self.emitter),
        };
        match self.config.plan()? {
            SubscriptionPlan::Blocks => self.mux.subscribe_to_blocks(handler).await,
            SubscriptionPlan::Events { event_types, filter } => {
                self.mux.subscribe_to_events(event_types, handler, filter).await
            }
            SubscriptionPlan::Balance(address) => {
                self.mux.subscribe_to_balance_changes(address, handler).await
            }
        }
    }
}
