//! Chain event model.
//!
//! The upstream feed produces [`Notification`]s. The multiplexer turns each of
//! them into zero or more [`ChainEvent`]s, the single shape every subscriber
//! receives. Block headers and account balance changes are synthesized into
//! events of type [`constants::NEW_BLOCK_EVENT`] and
//! [`constants::BALANCE_CHANGED_EVENT`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{constants, AccountAddress, Amount, BlockHash, EventId};

/// Namespaced event type, `section.Method` (e.g. `settlement.InstructionAffirmed`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Pallet part, before the first dot.
    #[must_use]
    pub fn section(&self) -> &str {
        self.0.split_once('.').map_or(self.0.as_str(), |(s, _)| s)
    }

    /// Event name, after the first dot. Empty when there is no section.
    #[must_use]
    pub fn method(&self) -> &str {
        self.0.split_once('.').map_or("", |(_, m)| m)
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Block a notification belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    pub hash: BlockHash,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub block: BlockRef,
    pub parent_hash: BlockHash,
    pub state_root: BlockHash,
    pub extrinsics_root: BlockHash,
}

/// One raw event as listed in a block's event vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_type: EventType,
    pub data: Map<String, Value>,
}

impl EventRecord {
    #[must_use]
    pub fn new(event_type: impl Into<EventType>, data: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}

/// Balance state of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub address: AccountAddress,
    pub free: Amount,
    pub reserved: Amount,
    pub frozen: Amount,
}

/// What the upstream feed delivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    NewHead(BlockHeader),
    Finalized(BlockHeader),
    /// All events of one block, in block order.
    Events {
        block: BlockRef,
        records: Vec<EventRecord>,
    },
    /// A watched account's balance changed.
    Account { block: BlockRef, info: AccountInfo },
}

impl Notification {
    #[must_use]
    pub fn block(&self) -> &BlockRef {
        match self {
            Self::NewHead(h) | Self::Finalized(h) => &h.block,
            Self::Events { block, .. } | Self::Account { block, .. } => block,
        }
    }

    /// Expand into delivered events. Ids are derived from the block hash and
    /// the position in this expansion, so replaying the same notification
    /// yields the same ids.
    #[must_use]
    pub fn into_events(self) -> Vec<ChainEvent> {
        match self {
            Self::NewHead(header) => vec![ChainEvent::from_header(&header, constants::NEW_BLOCK_EVENT)],
            Self::Finalized(header) => {
                vec![ChainEvent::from_header(&header, constants::FINALIZED_EVENT)]
            }
            Self::Events { block, records } => records
                .into_iter()
                .enumerate()
                .map(|(index, record)| {
                    let index = u32::try_from(index).unwrap_or(u32::MAX);
                    ChainEvent::new(&block, index, record.event_type, record.data)
                })
                .collect(),
            Self::Account { block, info } => {
                let mut data = Map::new();
                data.insert("address".into(), Value::String(info.address.to_string()));
                data.insert("free".into(), Value::String(info.free.to_string()));
                data.insert("reserved".into(), Value::String(info.reserved.to_string()));
                data.insert("frozen".into(), Value::String(info.frozen.to_string()));
                vec![ChainEvent::new(
                    &block,
                    0,
                    EventType::new(constants::BALANCE_CHANGED_EVENT),
                    data,
                )]
            }
        }
    }
}

/// An event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub id: EventId,
    pub event_type: EventType,
    pub block_number: u64,
    pub block_hash: BlockHash,
    pub timestamp: DateTime<Utc>,
    pub data: Map<String, Value>,
}

impl ChainEvent {
    #[must_use]
    pub fn new(block: &BlockRef, index: u32, event_type: EventType, data: Map<String, Value>) -> Self {
        Self {
            id: EventId::deterministic(&block.hash, index, event_type.as_str()),
            event_type,
            block_number: block.number,
            block_hash: block.hash,
            timestamp: block.timestamp,
            data,
        }
    }

    fn from_header(header: &BlockHeader, event_type: &str) -> Self {
        let mut data = Map::new();
        data.insert("number".into(), Value::from(header.block.number));
        data.insert("hash".into(), Value::String(header.block.hash.to_hex()));
        data.insert("parentHash".into(), Value::String(header.parent_hash.to_hex()));
        data.insert("stateRoot".into(), Value::String(header.state_root.to_hex()));
        data.insert(
            "extrinsicsRoot".into(),
            Value::String(header.extrinsics_root.to_hex()),
        );
        Self::new(&header.block, 0, EventType::new(event_type), data)
    }

    /// Payload field lookup.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

/// Fixtures for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl BlockRef {
    /// Block `number` with a hash derived from the number.
    #[must_use]
    pub fn dummy(number: u64) -> Self {
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&number.to_be_bytes());
        Self {
            number,
            hash: BlockHash(hash),
            timestamp: DateTime::<Utc>::from_timestamp(1_700_000_000 + i64::try_from(number).unwrap_or(0) * 6, 0)
                .unwrap_or_default(),
        }
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl BlockHeader {
    #[must_use]
    pub fn dummy(number: u64) -> Self {
        let parent = BlockRef::dummy(number.saturating_sub(1));
        Self {
            block: BlockRef::dummy(number),
            parent_hash: parent.hash,
            state_root: BlockHash([0x11; 32]),
            extrinsics_root: BlockHash([0x22; 32]),
        }
    }
}
