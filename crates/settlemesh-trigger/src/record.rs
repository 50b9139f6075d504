//! Emitted trigger record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use settlemesh_types::{BlockHash, ChainEvent};

use crate::catalog::EventCategory;

/// One workflow item per delivered chain event. `event_type` is the
/// trigger-level name the workflow was configured with, not the chain type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRecord {
    pub event_category: EventCategory,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub block_number: u64,
    pub block_hash: BlockHash,
    pub data: Map<String, Value>,
}

impl TriggerRecord {
    #[must_use]
    pub fn from_event(category: EventCategory, trigger_type: &str, event: ChainEvent) -> Self {
        Self {
            event_category: category,
            event_type: trigger_type.to_string(),
            timestamp: event.timestamp,
            block_number: event.block_number,
            block_hash: event.block_hash,
            data: event.data,
        }
    }

    /// JSON object as handed to the workflow engine.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}
