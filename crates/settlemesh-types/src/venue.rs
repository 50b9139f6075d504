//! Settlement venues.
//!
//! A venue is created by an identity through the ledger and groups the
//! instructions submitted under it. Only the owner and the venue's registered
//! signers may add instructions.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

use crate::{Did, VenueId};

/// What the venue is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VenueKind {
    #[default]
    Other,
    Distribution,
    /// Security token offering. Decoded from the chain name `Sto`.
    Offering,
    Exchange,
}

impl VenueKind {
    /// Decode a chain-reported kind. Unknown kinds decode to `Other`.
    #[must_use]
    pub fn from_chain(value: &str) -> Self {
        match value {
            "Distribution" => Self::Distribution,
            "Sto" | "Offering" => Self::Offering,
            "Exchange" => Self::Exchange,
            _ => Self::Other,
        }
    }

    /// The name the ledger uses for this kind.
    #[must_use]
    pub fn chain_name(self) -> &'static str {
        match self {
            Self::Other => "Other",
            Self::Distribution => "Distribution",
            Self::Offering => "Sto",
            Self::Exchange => "Exchange",
        }
    }
}

impl fmt::Display for VenueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other => write!(f, "OTHER"),
            Self::Distribution => write!(f, "DISTRIBUTION"),
            Self::Offering => write!(f, "OFFERING"),
            Self::Exchange => write!(f, "EXCHANGE"),
        }
    }
}

/// A settlement venue as reported by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub id: VenueId,
    pub owner: Did,
    pub kind: VenueKind,
    pub description: String,
    /// Identities besides the owner allowed to add instructions.
    pub signers: BTreeSet<Did>,
}

impl Venue {
    #[must_use]
    pub fn is_owner(&self, did: &Did) -> bool {
        self.owner == *did
    }

    /// Owner or registered signer.
    #[must_use]
    pub fn may_add_instructions(&self, did: &Did) -> bool {
        self.is_owner(did) || self.signers.contains(did)
    }
}

/// Request to create a venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVenue {
    pub kind: VenueKind,
    pub description: String,
}
