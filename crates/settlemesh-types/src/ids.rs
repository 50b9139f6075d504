//! Identifiers used throughout SettleMesh.
//!
//! Chain-assigned entities (venues, instructions, numbered portfolios) use the
//! ledger's integer counters. Identities and tickers are validated strings.
//! Subscriptions are process-local and use UUIDv7 for time-ordered sorting.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{constants, Result, SettlemeshError};

// ---------------------------------------------------------------------------
// VenueId / InstructionId / PortfolioNumber
// ---------------------------------------------------------------------------

/// Ledger-assigned venue identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct VenueId(pub u64);

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ledger-assigned instruction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct InstructionId(pub u64);

impl fmt::Display for InstructionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of a user-created portfolio. The default portfolio has no number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PortfolioNumber(pub u64);

impl fmt::Display for PortfolioNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Did
// ---------------------------------------------------------------------------

/// On-chain identity: `0x` followed by 64 hex digits. Stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did(String);

impl Did {
    pub fn parse(value: &str) -> Result<Self> {
        let hex_part = value
            .strip_prefix("0x")
            .filter(|h| h.len() == constants::DID_HEX_LENGTH)
            .filter(|h| h.bytes().all(|b| b.is_ascii_hexdigit()));
        match hex_part {
            Some(h) => Ok(Self(format!("0x{}", h.to_ascii_lowercase()))),
            None => Err(SettlemeshError::InvalidIdentifier {
                kind: "DID",
                value: value.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened display form: `0x12345678...9abcdef0`.
    #[must_use]
    pub fn short(&self) -> String {
        let hex_part = &self.0[2..];
        format!("0x{}...{}", &hex_part[..8], &hex_part[hex_part.len() - 8..])
    }
}

impl FromStr for Did {
    type Err = SettlemeshError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Did {
    type Error = SettlemeshError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic DIDs for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Did {
    /// A DID whose 32 bytes all equal `byte`.
    #[must_use]
    pub fn dummy(byte: u8) -> Self {
        Self(format!("0x{}", hex::encode([byte; 32])))
    }
}

// ---------------------------------------------------------------------------
// Ticker
// ---------------------------------------------------------------------------

/// Asset ticker: 1 to 12 upper-case alphanumerics. Input is upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    pub fn parse(value: &str) -> Result<Self> {
        let upper = value.trim().to_ascii_uppercase();
        let valid = !upper.is_empty()
            && upper.len() <= constants::TICKER_MAX_LENGTH
            && upper.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
        if valid {
            Ok(Self(upper))
        } else {
            Err(SettlemeshError::InvalidIdentifier {
                kind: "ticker",
                value: value.to_string(),
            })
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Ticker {
    type Err = SettlemeshError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Ticker {
    type Error = SettlemeshError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Ticker> for String {
    fn from(t: Ticker) -> Self {
        t.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// AccountAddress
// ---------------------------------------------------------------------------

/// SS58-encoded account address. Only shape is checked here; the feed
/// collaborator rejects addresses that fail to decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountAddress(String);

impl AccountAddress {
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let valid = (2..=64).contains(&trimmed.len())
            && trimmed.bytes().all(|b| b.is_ascii_alphanumeric());
        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(SettlemeshError::InvalidIdentifier {
                kind: "account address",
                value: value.to_string(),
            })
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AccountAddress {
    type Error = SettlemeshError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<AccountAddress> for String {
    fn from(a: AccountAddress) -> Self {
        a.0
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// BlockHash
// ---------------------------------------------------------------------------

/// 32-byte block hash, displayed as `0x`-prefixed hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || SettlemeshError::InvalidIdentifier {
            kind: "block hash",
            value: value.to_string(),
        };
        let bytes = hex::decode(value.strip_prefix("0x").unwrap_or(value)).map_err(|_| invalid())?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| invalid())?;
        Ok(Self(arr))
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl TryFrom<String> for BlockHash {
    type Error = SettlemeshError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<BlockHash> for String {
    fn from(h: BlockHash) -> Self {
        h.to_hex()
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// EventId
// ---------------------------------------------------------------------------

/// Identity of a delivered chain event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct EventId(pub [u8; 16]);

impl EventId {
    /// Deterministic `EventId` from block hash, position in the block's event
    /// list and event type. The same upstream notification always yields the
    /// same ids.
    #[must_use]
    pub fn deterministic(block_hash: &BlockHash, index: u32, event_type: &str) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(b"settlemesh:event_id:v1:");
        hasher.update(block_hash.0);
        hasher.update(index.to_le_bytes());
        hasher.update(event_type.as_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash[..16]);
        Self(bytes)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evt:{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// SubscriptionId
// ---------------------------------------------------------------------------

/// Process-local subscription identifier. Uses UUIDv7 for time-ordered sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
