//! # settlemesh-settlement
//!
//! **Settlement plane**: the instruction lifecycle over the chain's
//! settlement pallet.
//!
//! ## Architecture
//!
//! [`SettlementEngine`] wraps a [`Ledger`] collaborator and, for every
//! requested action:
//! 1. Reads the instruction (or venue) from the ledger
//! 2. Validates the action against the pure state machine in
//!    `settlemesh_types::instruction` and the venue's authority rules
//! 3. Submits the transaction and returns the ledger's resulting view
//!
//! The ledger is authoritative. The engine holds no instruction state
//! between calls.
//!
//! [`SettlementOperation`] is the closed dispatch table over the engine.

pub mod engine;
pub mod ledger;
#[cfg(any(test, feature = "test-helpers"))]
pub mod memory_ledger;
pub mod operations;

pub use engine::{bypass_record, SettlementEngine, VenueInstructions};
pub use ledger::{Ledger, Transaction, TxOutcome, TxReceipt};
#[cfg(any(test, feature = "test-helpers"))]
pub use memory_ledger::InMemoryLedger;
pub use operations::{OperationOutput, SettlementOperation};
