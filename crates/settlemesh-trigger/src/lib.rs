//! # settlemesh-trigger
//!
//! Turns a workflow trigger configuration (category, event type, optional
//! filters) into one multiplexer subscription, and every delivered event
//! into a [`TriggerRecord`] handed to a [`TriggerEmitter`].

pub mod bridge;
pub mod catalog;
pub mod record;

pub use bridge::{BridgeStatus, TriggerBridge, TriggerConfig, TriggerEmitter};
pub use catalog::{resolve, EventCategory, SubscriptionPlan, TriggerFilters};
pub use record::TriggerRecord;
