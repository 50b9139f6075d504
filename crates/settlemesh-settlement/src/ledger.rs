//! The ledger collaborator.
//!
//! The chain is the single source of truth for venues and instructions. This
//! crate only ever reads through [`Ledger`] and writes through
//! [`Ledger::submit`]; signing happens behind the implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use settlemesh_types::{
    BlockRef, Did, Instruction, InstructionId, NewInstruction, NewVenue, Result, Venue, VenueId,
};

/// A settlement extrinsic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transaction {
    CreateVenue(NewVenue),
    AddInstruction {
        venue_id: VenueId,
        instruction: NewInstruction,
    },
    Affirm(InstructionId),
    WithdrawAffirmation(InstructionId),
    Reject(InstructionId),
    ExecuteManually {
        instruction_id: InstructionId,
        skip_affirmation_check: bool,
    },
}

impl Transaction {
    /// Extrinsic name, for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateVenue(_) => "settlement.createVenue",
            Self::AddInstruction { .. } => "settlement.addInstruction",
            Self::Affirm(_) => "settlement.affirmInstruction",
            Self::WithdrawAffirmation(_) => "settlement.withdrawAffirmation",
            Self::Reject(_) => "settlement.rejectInstruction",
            Self::ExecuteManually { .. } => "settlement.executeManualInstruction",
        }
    }
}

/// What a successful submission produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxOutcome {
    VenueCreated(VenueId),
    InstructionCreated(InstructionId),
    /// The extrinsic was included; read back the affected entity for its state.
    Applied,
}

/// Inclusion receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub block: BlockRef,
    pub outcome: TxOutcome,
}

/// Read and submit access to the settlement pallet.
///
/// Implementations report every failure as [`settlemesh_types::SettlemeshError::Ledger`]
/// with the node's message unaltered. Missing entities are `Ledger` errors of
/// kind `NotFound`.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn venue(&self, id: VenueId) -> Result<Venue>;

    async fn instruction(&self, id: InstructionId) -> Result<Instruction>;

    /// All instructions ever added under a venue.
    async fn venue_instructions(&self, id: VenueId) -> Result<Vec<Instruction>>;

    /// Pending instructions in which `did` is a party.
    async fn pending_instructions(&self, did: &Did) -> Result<Vec<Instruction>>;

    /// Sign as `signer` and submit. Returns once the extrinsic is in a block.
    async fn submit(&self, signer: &Did, tx: Transaction) -> Result<TxReceipt>;
}
