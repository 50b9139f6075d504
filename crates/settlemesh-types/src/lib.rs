//! # settlemesh-types
//!
//! Shared types, errors, and configuration for **SettleMesh**, a settlement
//! instruction lifecycle and chain event fan-out toolkit for Polymesh.
//!
//! This crate is the leaf dependency of the workspace. It defines:
//!
//! - **Identifiers**: [`Did`], [`Ticker`], [`VenueId`], [`InstructionId`], [`PortfolioNumber`], [`AccountAddress`], [`BlockHash`], [`EventId`], [`SubscriptionId`]
//! - **Amounts**: [`Amount`] (6-decimal fixed point), [`Percent`], [`ParseMode`]
//! - **Venue model**: [`Venue`], [`VenueKind`], [`NewVenue`]
//! - **Instruction model**: [`Instruction`], [`Leg`], [`PortfolioRef`], [`InstructionStatus`], [`Affirmation`], [`AffirmationStatus`], [`ManualExecution`]
//! - **Chain events**: [`Notification`], [`ChainEvent`], [`EventType`], [`BlockRef`], [`BlockHeader`]
//! - **Configuration**: [`Network`], [`NetworkConfig`], [`StreamConfig`]
//! - **Errors**: [`SettlemeshError`] with `SM_ERR_` prefix codes
//! - **Constants**: system-wide limits and endpoints

pub mod amount;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod ids;
pub mod instruction;
pub mod venue;

pub use amount::*;
pub use config::*;
pub use error::*;
pub use event::*;
pub use ids::*;
pub use instruction::*;
pub use venue::*;

// Constants are accessed via `settlemesh_types::constants::FOO`
// (not re-exported to avoid name collisions).
