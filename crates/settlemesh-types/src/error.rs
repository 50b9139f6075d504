//! Error types for SettleMesh.
//!
//! All errors use the `SM_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Amount errors
//! - 2xx: Entity / leg errors
//! - 3xx: Lifecycle transition errors
//! - 4xx: Authorization errors
//! - 5xx: Ledger errors
//! - 6xx: Subscription errors
//! - 9xx: General errors

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Did, InstructionId};

/// Category of a failure reported by the ledger collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerErrorKind {
    /// Transport failure talking to the node.
    Network,
    /// Not enough funds (fees or settled asset).
    InsufficientBalance,
    /// Transfer blocked by the asset's compliance rules.
    Compliance,
    /// Identity, asset, venue or instruction does not exist.
    NotFound,
    /// Signing identity lacks a valid CDD claim.
    InvalidCdd,
    /// Signing key lacks the permission for the extrinsic.
    NotAuthorized,
    /// The ledger rejected the transaction for another stated reason.
    Rejected,
    /// Unclassified.
    Other,
}

impl LedgerErrorKind {
    /// Classify a raw collaborator message by the chain error names it contains.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        const RULES: &[(&str, LedgerErrorKind)] = &[
            ("InsufficientBalance", LedgerErrorKind::InsufficientBalance),
            ("ComplianceError", LedgerErrorKind::Compliance),
            ("IdentityNotFound", LedgerErrorKind::NotFound),
            ("AssetNotFound", LedgerErrorKind::NotFound),
            ("NotFound", LedgerErrorKind::NotFound),
            ("InvalidCdd", LedgerErrorKind::InvalidCdd),
            ("NotAuthorized", LedgerErrorKind::NotAuthorized),
            ("Unauthorized", LedgerErrorKind::NotAuthorized),
            ("ECONNREFUSED", LedgerErrorKind::Network),
            ("disconnected", LedgerErrorKind::Network),
            ("timeout", LedgerErrorKind::Network),
        ];
        RULES
            .iter()
            .find(|(needle, _)| message.contains(needle))
            .map_or(Self::Other, |(_, kind)| *kind)
    }
}

impl fmt::Display for LedgerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "NETWORK",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::Compliance => "COMPLIANCE",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidCdd => "INVALID_CDD",
            Self::NotAuthorized => "NOT_AUTHORIZED",
            Self::Rejected => "REJECTED",
            Self::Other => "OTHER",
        };
        f.write_str(s)
    }
}

/// Central error enum for all SettleMesh operations.
#[derive(Debug, Error)]
pub enum SettlemeshError {
    // =================================================================
    // Amount Errors (1xx)
    // =================================================================
    /// Malformed or unrepresentable numeric input.
    #[error("SM_ERR_100: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    // =================================================================
    // Entity Errors (2xx)
    // =================================================================
    /// A leg violates its invariants (same portfolio both sides, zero amount).
    #[error("SM_ERR_200: Invalid leg: {reason}")]
    InvalidLeg { reason: String },

    /// An instruction request is malformed (no legs, bad dates, memo too long).
    #[error("SM_ERR_201: Invalid instruction: {reason}")]
    InvalidInstruction { reason: String },

    /// An identifier (DID, ticker, address, hash) failed format validation.
    #[error("SM_ERR_202: Invalid {kind}: {value}")]
    InvalidIdentifier { kind: &'static str, value: String },

    // =================================================================
    // Lifecycle Errors (3xx)
    // =================================================================
    /// The requested action is not valid in the instruction's current state.
    #[error("SM_ERR_300: Invalid transition on instruction {instruction}: {reason}")]
    InvalidTransition {
        instruction: InstructionId,
        reason: String,
    },

    // =================================================================
    // Authorization Errors (4xx)
    // =================================================================
    /// The caller is not a party or owner for the requested action.
    #[error("SM_ERR_400: Unauthorized: {did} may not {action}")]
    Unauthorized { did: Did, action: String },

    // =================================================================
    // Ledger Errors (5xx)
    // =================================================================
    /// Failure reported by the ledger collaborator, message kept verbatim.
    #[error("SM_ERR_500: Ledger error ({kind}): {message}")]
    Ledger {
        kind: LedgerErrorKind,
        message: String,
    },

    // =================================================================
    // Subscription Errors (6xx)
    // =================================================================
    /// The upstream feed could not be established or was lost.
    #[error("SM_ERR_600: Subscription failed: {reason}")]
    Subscription { reason: String },

    /// The multiplexer was disconnected and accepts no new subscriptions.
    #[error("SM_ERR_601: Multiplexer disconnected")]
    Disconnected,

    // =================================================================
    // General (9xx)
    // =================================================================
    /// Configuration error (unknown network, missing custom URL, ...).
    #[error("SM_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

impl SettlemeshError {
    /// Wrap a collaborator message as a ledger error, classifying its kind.
    pub fn ledger(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Ledger {
            kind: LedgerErrorKind::classify(&message),
            message,
        }
    }

    /// Ledger error with an explicit kind.
    pub fn ledger_kind(kind: LedgerErrorKind, message: impl Into<String>) -> Self {
        Self::Ledger {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_amount(reason: impl Into<String>) -> Self {
        Self::InvalidAmount {
            reason: reason.into(),
        }
    }

    /// Whether this error was raised by a local check, before any ledger call.
    #[must_use]
    pub fn is_local(&self) -> bool {
        !matches!(self, Self::Ledger { .. } | Self::Subscription { .. })
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, SettlemeshError>;
