//! Trigger catalogue: category and trigger-level event type to subscription.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use settlemesh_stream::FieldFilter;
use settlemesh_types::{constants, AccountAddress, EventType, Result, SettlemeshError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventCategory {
    Account,
    Asset,
    Block,
    Compliance,
    CorporateActions,
    Governance,
    Identity,
    Portfolio,
    Settlement,
}

/// `(category, trigger type, chain section)`. The chain event type is
/// `section.TriggerType`.
const CATALOG: &[(EventCategory, &str, &str)] = &[
    (EventCategory::Identity, "DidCreated", "identity"),
    (EventCategory::Identity, "CddClaimAdded", "identity"),
    (EventCategory::Identity, "CddClaimRevoked", "identity"),
    (EventCategory::Identity, "SecondaryKeyAdded", "identity"),
    (EventCategory::Identity, "SecondaryKeyRemoved", "identity"),
    (EventCategory::Identity, "SecondaryKeysFrozen", "identity"),
    (EventCategory::Identity, "SecondaryKeysUnfrozen", "identity"),
    (EventCategory::Identity, "AuthorizationAdded", "identity"),
    (EventCategory::Identity, "AuthorizationConsumed", "identity"),
    (EventCategory::Identity, "AuthorizationRejected", "identity"),
    (EventCategory::Identity, "PrimaryKeyUpdated", "identity"),
    (EventCategory::Asset, "AssetCreated", "asset"),
    (EventCategory::Asset, "Issued", "asset"),
    (EventCategory::Asset, "Redeemed", "asset"),
    (EventCategory::Asset, "AssetFrozen", "asset"),
    (EventCategory::Asset, "AssetUnfrozen", "asset"),
    (EventCategory::Asset, "Transfer", "asset"),
    (EventCategory::Asset, "DocumentAdded", "asset"),
    (EventCategory::Asset, "DocumentRemoved", "asset"),
    (EventCategory::Asset, "IdentifierRegistered", "asset"),
    (EventCategory::Asset, "ControllerTransfer", "asset"),
    (EventCategory::Asset, "CustomAssetTypeRegistered", "asset"),
    (EventCategory::Settlement, "VenueCreated", "settlement"),
    (EventCategory::Settlement, "VenueUpdated", "settlement"),
    (EventCategory::Settlement, "InstructionCreated", "settlement"),
    (EventCategory::Settlement, "InstructionAffirmed", "settlement"),
    (EventCategory::Settlement, "AffirmationWithdrawn", "settlement"),
    (EventCategory::Settlement, "InstructionRejected", "settlement"),
    (EventCategory::Settlement, "InstructionExecuted", "settlement"),
    (EventCategory::Settlement, "InstructionFailed", "settlement"),
    (EventCategory::Settlement, "LegFailed", "settlement"),
    (EventCategory::Settlement, "SettlementManuallyExecuted", "settlement"),
    (EventCategory::Portfolio, "PortfolioCreated", "portfolio"),
    (EventCategory::Portfolio, "PortfolioDeleted", "portfolio"),
    (EventCategory::Portfolio, "PortfolioRenamed", "portfolio"),
    (EventCategory::Portfolio, "MovedBetweenPortfolios", "portfolio"),
    (EventCategory::Portfolio, "PortfolioCustodianChanged", "portfolio"),
    (EventCategory::CorporateActions, "CAInitiated", "corporateAction"),
    (EventCategory::CorporateActions, "CABenefitClaimed", "capitalDistribution"),
    (EventCategory::CorporateActions, "Created", "corporateBallot"),
    (EventCategory::CorporateActions, "VoteCast", "corporateBallot"),
    (EventCategory::CorporateActions, "RangeChanged", "corporateBallot"),
    (EventCategory::CorporateActions, "CheckpointCreated", "checkpoint"),
    (EventCategory::CorporateActions, "ScheduleCreated", "checkpoint"),
    (EventCategory::Compliance, "ClaimAdded", "identity"),
    (EventCategory::Compliance, "ClaimRevoked", "identity"),
    (EventCategory::Compliance, "ComplianceRequirementCreated", "complianceManager"),
    (EventCategory::Compliance, "ComplianceRequirementRemoved", "complianceManager"),
    (EventCategory::Compliance, "AssetComplianceReplaced", "complianceManager"),
    (EventCategory::Compliance, "AssetComplianceReset", "complianceManager"),
    (EventCategory::Compliance, "AssetCompliancePaused", "complianceManager"),
    (EventCategory::Compliance, "AssetComplianceResumed", "complianceManager"),
    (EventCategory::Compliance, "TrustedDefaultClaimIssuerAdded", "complianceManager"),
    (EventCategory::Compliance, "TrustedDefaultClaimIssuerRemoved", "complianceManager"),
    (EventCategory::Account, "Transfer", "balances"),
    (EventCategory::Account, "BalanceSet", "balances"),
    (EventCategory::Account, "Endowed", "balances"),
    (EventCategory::Account, "SubsidyAdded", "relayer"),
    (EventCategory::Account, "SubsidyRemoved", "relayer"),
    (EventCategory::Governance, "ProposalCreated", "pips"),
    (EventCategory::Governance, "ProposalStateUpdated", "pips"),
    (EventCategory::Governance, "Voted", "pips"),
    (EventCategory::Governance, "PipClosed", "pips"),
    (EventCategory::Governance, "ActivePipLimitChanged", "pips"),
    (EventCategory::Governance, "SnapshotTaken", "pips"),
];

const NEW_BLOCK: &str = "NewBlock";
const BLOCK_FINALIZED: &str = "BlockFinalized";

impl EventCategory {
    pub const ALL: [Self; 9] = [
        Self::Account,
        Self::Asset,
        Self::Block,
        Self::Compliance,
        Self::CorporateActions,
        Self::Governance,
        Self::Identity,
        Self::Portfolio,
        Self::Settlement,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Asset => "asset",
            Self::Block => "block",
            Self::Compliance => "compliance",
            Self::CorporateActions => "corporateActions",
            Self::Governance => "governance",
            Self::Identity => "identity",
            Self::Portfolio => "portfolio",
            Self::Settlement => "settlement",
        }
    }

    /// Trigger-level event types offered for this category.
    #[must_use]
    pub fn trigger_types(self) -> Vec<&'static str> {
        if self == Self::Block {
            return vec![NEW_BLOCK, BLOCK_FINALIZED];
        }
        CATALOG
            .iter()
            .filter(|(category, _, _)| *category == self)
            .map(|(_, name, _)| *name)
            .collect()
    }

    /// Namespaced chain event type for a trigger-level type.
    pub fn chain_event_type(self, trigger_type: &str) -> Result<EventType> {
        if self == Self::Block {
            return match trigger_type {
                NEW_BLOCK => Ok(EventType::new(constants::NEW_BLOCK_EVENT)),
                BLOCK_FINALIZED => Ok(EventType::new(constants::FINALIZED_EVENT)),
                other => Err(unknown_type(self, other)),
            };
        }
        CATALOG
            .iter()
            .find(|(category, name, _)| *category == self && *name == trigger_type)
            .map(|(_, name, section)| EventType::new(format!("{section}.{name}")))
            .ok_or_else(|| unknown_type(self, trigger_type))
    }
}

fn unknown_type(category: EventCategory, trigger_type: &str) -> SettlemeshError {
    SettlemeshError::Configuration(format!(
        "unknown event type {trigger_type:?} for category {category}"
    ))
}

impl FromStr for EventCategory {
    type Err = SettlemeshError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| SettlemeshError::Configuration(format!("unknown event category {s:?}")))
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional named filters. Empty strings count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerFilters {
    pub ticker: Option<String>,
    pub did: Option<String>,
    pub venue_id: Option<String>,
    pub instruction_id: Option<String>,
}

fn set(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl TriggerFilters {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.field_filter().is_none()
    }

    /// Payload filter from the set fields: `ticker`, `did` or `target`,
    /// `venueId`, `instructionId`. `None` when nothing is set.
    #[must_use]
    pub fn field_filter(&self) -> Option<FieldFilter> {
        let mut filter = FieldFilter::new();
        if let Some(ticker) = set(self.ticker.as_ref()) {
            filter = filter.field("ticker", ticker);
        }
        if let Some(did) = set(self.did.as_ref()) {
            filter = filter.any_of(&["did", "target"], did);
        }
        if let Some(venue) = set(self.venue_id.as_ref()) {
            filter = filter.field("venueId", venue);
        }
        if let Some(instruction) = set(self.instruction_id.as_ref()) {
            filter = filter.field("instructionId", instruction);
        }
        (!filter.is_empty()).then_some(filter)
    }

    /// Account to watch for the account category: the DID filter, else the
    /// ticker filter.
    fn balance_address(&self) -> Option<&str> {
        set(self.did.as_ref()).or_else(|| set(self.ticker.as_ref()))
    }
}

/// What to register on the multiplexer.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionPlan {
    Blocks,
    Events {
        event_types: Vec<EventType>,
        filter: Option<FieldFilter>,
    },
    Balance(AccountAddress),
}

/// Resolve a trigger configuration to exactly one subscription.
///
/// Named filters narrow generic event subscriptions only. For the account
/// category a DID (or ticker) filter selects a balance subscription on that
/// account instead.
pub fn resolve(
    category: EventCategory,
    trigger_type: &str,
    filters: &TriggerFilters,
) -> Result<SubscriptionPlan> {
    let chain_type = category.chain_event_type(trigger_type)?;
    match category {
        EventCategory::Block if trigger_type == NEW_BLOCK => Ok(SubscriptionPlan::Blocks),
        EventCategory::Account => match filters.balance_address() {
            Some(address) => Ok(SubscriptionPlan::Balance(AccountAddress::parse(address)?)),
            None => Ok(SubscriptionPlan::Events {
                event_types: vec![chain_type],
                filter: filters.field_filter(),
            }),
        },
        _ => Ok(SubscriptionPlan::Events {
            event_types: vec![chain_type],
            filter: filters.field_filter(),
        }),
    }
}
