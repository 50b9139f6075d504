//! # Instruction: multi-party, multi-leg settlement
//!
//! An instruction moves one or more assets between portfolios atomically.
//! Every distinct identity appearing on any leg is a **party** and must
//! affirm before the ledger executes the instruction.
//!
//! ## State Machine
//!
//! ```text
//!                 affirm / withdraw (per party)
//!                      ┌──────┐
//!                      ▼      │
//!   add ──────────▶ ┌─────────┴┐  all affirmed + ledger executes  ┌──────────┐
//!                   │ PENDING  ├─────────────────────────────────▶│ EXECUTED │
//!                   └──┬────┬──┘                                  └──────────┘
//!           any party  │    │ ledger execution fails
//!             rejects  ▼    ▼
//!          ┌──────────┐    ┌────────┐
//!          │ REJECTED │    │ FAILED │
//!          └──────────┘    └────────┘
//! ```
//!
//! There is no instruction-level "affirmed" state: affirmation is tracked
//! per party. The ledger is authoritative; the transitions here validate a
//! requested action against the last ledger-reported state and mirror what
//! the ledger reports back.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{constants, Amount, Did, InstructionId, PortfolioNumber, Result, SettlemeshError, Ticker, VenueId};

// ---------------------------------------------------------------------------
// PortfolioRef / Leg
// ---------------------------------------------------------------------------

/// A portfolio of an identity. `number: None` is the identity's default
/// portfolio.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PortfolioRef {
    pub did: Did,
    pub number: Option<PortfolioNumber>,
}

impl PortfolioRef {
    #[must_use]
    pub fn default_of(did: Did) -> Self {
        Self { did, number: None }
    }

    #[must_use]
    pub fn numbered(did: Did, number: u64) -> Self {
        Self {
            did,
            number: Some(PortfolioNumber(number)),
        }
    }
}

impl fmt::Display for PortfolioRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number {
            Some(n) => write!(f, "{}/{n}", self.did.short()),
            None => write!(f, "{}/default", self.did.short()),
        }
    }
}

/// One asset movement inside an instruction.
///
/// Invariants: `from != to` (same identity and same portfolio number,
/// including both default) and `amount > 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    pub from: PortfolioRef,
    pub to: PortfolioRef,
    pub asset: Ticker,
    pub amount: Amount,
}

impl Leg {
    pub fn new(from: PortfolioRef, to: PortfolioRef, asset: Ticker, amount: Amount) -> Result<Self> {
        let leg = Self {
            from,
            to,
            asset,
            amount,
        };
        leg.validate()?;
        Ok(leg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.from == self.to {
            return Err(SettlemeshError::InvalidLeg {
                reason: format!("sender and receiver are the same portfolio {}", self.from),
            });
        }
        if !self.amount.is_positive() {
            return Err(SettlemeshError::InvalidLeg {
                reason: format!("amount must be positive, got {}", self.amount),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Status types
// ---------------------------------------------------------------------------

/// Lifecycle status of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstructionStatus {
    /// Awaiting affirmations or execution.
    Pending,
    /// Settled by the ledger. **Terminal.**
    Executed,
    /// A party rejected it. **Terminal.**
    Rejected,
    /// The ledger tried to execute it and failed. **Terminal.**
    Failed,
}

impl InstructionStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Transitions are monotonic: only `Pending` may move, and only to a
    /// terminal state.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Executed | Self::Rejected | Self::Failed)
        )
    }

    /// Decode a status string reported by the ledger.
    ///
    /// `Affirmed` is a per-party notion and reads as `Pending`; `Success` is
    /// the ledger's alias for `Executed`. Anything else is a ledger error.
    pub fn from_chain(value: &str) -> Result<Self> {
        match value {
            "Pending" | "Affirmed" => Ok(Self::Pending),
            "Executed" | "Success" => Ok(Self::Executed),
            "Rejected" => Ok(Self::Rejected),
            "Failed" => Ok(Self::Failed),
            other => Err(SettlemeshError::ledger_kind(
                crate::LedgerErrorKind::Other,
                format!("unknown instruction status {other:?}"),
            )),
        }
    }
}

impl fmt::Display for InstructionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Executed => write!(f, "EXECUTED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// A single party's affirmation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AffirmationStatus {
    Pending,
    Affirmed,
}

impl fmt::Display for AffirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Affirmed => write!(f, "AFFIRMED"),
        }
    }
}

/// One record per party per instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affirmation {
    pub identity: Did,
    pub status: AffirmationStatus,
}

/// Audit record of a manual execution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualExecution {
    pub executed_by: Did,
    pub skipped_affirmation_check: bool,
}

// ---------------------------------------------------------------------------
// NewInstruction
// ---------------------------------------------------------------------------

/// Request to add an instruction to a venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInstruction {
    pub legs: Vec<Leg>,
    pub trade_date: Option<DateTime<Utc>>,
    pub value_date: Option<DateTime<Utc>>,
    pub memo: Option<String>,
}

impl NewInstruction {
    #[must_use]
    pub fn with_legs(legs: Vec<Leg>) -> Self {
        Self {
            legs,
            trade_date: None,
            value_date: None,
            memo: None,
        }
    }

    /// Local validation, run before anything is sent to the ledger.
    pub fn validate(&self) -> Result<()> {
        if self.legs.is_empty() {
            return Err(SettlemeshError::InvalidInstruction {
                reason: "at least one leg is required".into(),
            });
        }
        for (index, leg) in self.legs.iter().enumerate() {
            leg.validate().map_err(|e| match e {
                SettlemeshError::InvalidLeg { reason } => SettlemeshError::InvalidLeg {
                    reason: format!("leg {index}: {reason}"),
                },
                other => other,
            })?;
        }
        if let Some(memo) = &self.memo {
            if memo.len() > constants::MEMO_MAX_BYTES {
                return Err(SettlemeshError::InvalidInstruction {
                    reason: format!(
                        "memo is {} bytes, maximum is {}",
                        memo.len(),
                        constants::MEMO_MAX_BYTES
                    ),
                });
            }
        }
        if let (Some(trade), Some(value)) = (self.trade_date, self.value_date) {
            if value < trade {
                return Err(SettlemeshError::InvalidInstruction {
                    reason: format!("value date {value} precedes trade date {trade}"),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Instruction
// ---------------------------------------------------------------------------

/// Read-model of a settlement instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: InstructionId,
    pub venue_id: VenueId,
    /// Ordered; leg index is significant.
    pub legs: Vec<Leg>,
    pub status: InstructionStatus,
    pub trade_date: Option<DateTime<Utc>>,
    pub value_date: Option<DateTime<Utc>>,
    pub memo: Option<String>,
    pub created_at: DateTime<Utc>,
    /// One entry per party, in first-appearance order across legs.
    pub affirmations: Vec<Affirmation>,
    pub manual_execution: Option<ManualExecution>,
    /// Ledger-reported reason for a `Failed` status.
    pub failure_reason: Option<String>,
}

impl Instruction {
    /// Build a fresh `Pending` instruction with one pending affirmation per
    /// distinct party.
    pub fn new(
        id: InstructionId,
        venue_id: VenueId,
        request: NewInstruction,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        request.validate()?;
        let mut instruction = Self {
            id,
            venue_id,
            legs: request.legs,
            status: InstructionStatus::Pending,
            trade_date: request.trade_date,
            value_date: request.value_date,
            memo: request.memo,
            created_at,
            affirmations: Vec::new(),
            manual_execution: None,
            failure_reason: None,
        };
        instruction.affirmations = instruction
            .parties()
            .into_iter()
            .map(|did| Affirmation {
                identity: did.clone(),
                status: AffirmationStatus::Pending,
            })
            .collect();
        Ok(instruction)
    }

    /// Distinct identities on either side of any leg, in first-appearance order.
    #[must_use]
    pub fn parties(&self) -> Vec<&Did> {
        let mut parties: Vec<&Did> = Vec::new();
        for leg in &self.legs {
            for did in [&leg.from.did, &leg.to.did] {
                if !parties.contains(&did) {
                    parties.push(did);
                }
            }
        }
        parties
    }

    #[must_use]
    pub fn is_party(&self, did: &Did) -> bool {
        self.legs
            .iter()
            .any(|leg| leg.from.did == *did || leg.to.did == *did)
    }

    #[must_use]
    pub fn affirmation(&self, did: &Did) -> Option<&Affirmation> {
        self.affirmations.iter().find(|a| a.identity == *did)
    }

    #[must_use]
    pub fn is_fully_affirmed(&self) -> bool {
        self.affirmations
            .iter()
            .all(|a| a.status == AffirmationStatus::Affirmed)
    }

    #[must_use]
    pub fn pending_affirmations(&self) -> Vec<&Affirmation> {
        self.affirmations
            .iter()
            .filter(|a| a.status == AffirmationStatus::Pending)
            .collect()
    }

    /// Sum of leg amounts per asset.
    pub fn totals_by_asset(&self) -> Result<BTreeMap<Ticker, Amount>> {
        let mut totals: BTreeMap<Ticker, Amount> = BTreeMap::new();
        for leg in &self.legs {
            let entry = totals.entry(leg.asset.clone()).or_insert(Amount::ZERO);
            *entry = entry.checked_add(leg.amount)?;
        }
        Ok(totals)
    }

    /// `Executed` implies every party affirmed, unless the execution was an
    /// explicit owner bypass.
    #[must_use]
    pub fn satisfies_execution_invariant(&self) -> bool {
        if self.status != InstructionStatus::Executed {
            return true;
        }
        let bypassed = self
            .manual_execution
            .as_ref()
            .is_some_and(|m| m.skipped_affirmation_check);
        bypassed || self.is_fully_affirmed()
    }

    // -----------------------------------------------------------------------
    // Guards
    // -----------------------------------------------------------------------

    fn transition_error(&self, reason: impl Into<String>) -> SettlemeshError {
        SettlemeshError::InvalidTransition {
            instruction: self.id,
            reason: reason.into(),
        }
    }

    fn ensure_pending(&self, action: &str) -> Result<()> {
        if self.status == InstructionStatus::Pending {
            Ok(())
        } else {
            Err(self.transition_error(format!("cannot {action}: instruction is {}", self.status)))
        }
    }

    fn ensure_party(&self, did: &Did, action: &str) -> Result<&Affirmation> {
        self.affirmation(did).ok_or_else(|| SettlemeshError::Unauthorized {
            did: did.clone(),
            action: format!("{action} instruction {}: not a party", self.id),
        })
    }

    /// Validate an affirmation by `did` without applying it.
    pub fn check_affirm(&self, did: &Did) -> Result<()> {
        self.ensure_pending("affirm")?;
        let affirmation = self.ensure_party(did, "affirm")?;
        if affirmation.status == AffirmationStatus::Affirmed {
            return Err(self.transition_error(format!("{did} has already affirmed")));
        }
        Ok(())
    }

    pub fn check_withdraw(&self, did: &Did) -> Result<()> {
        self.ensure_pending("withdraw affirmation")?;
        let affirmation = self.ensure_party(did, "withdraw affirmation on")?;
        if affirmation.status != AffirmationStatus::Affirmed {
            return Err(self.transition_error(format!("{did} has not affirmed")));
        }
        Ok(())
    }

    pub fn check_reject(&self, did: &Did) -> Result<()> {
        self.ensure_pending("reject")?;
        self.ensure_party(did, "reject")?;
        Ok(())
    }

    /// Status and affirmation guard for execution. Who may execute is a venue
    /// question and is checked by the caller.
    pub fn check_execute(&self, skip_affirmation_check: bool) -> Result<()> {
        self.ensure_pending("execute")?;
        if !skip_affirmation_check && !self.is_fully_affirmed() {
            return Err(self.transition_error(format!(
                "{} of {} parties have not affirmed",
                self.pending_affirmations().len(),
                self.affirmations.len()
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn set_affirmation(&mut self, did: &Did, status: AffirmationStatus) {
        if let Some(a) = self.affirmations.iter_mut().find(|a| a.identity == *did) {
            a.status = status;
        }
    }

    fn set_status(&mut self, target: InstructionStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(self.transition_error(format!(
                "cannot transition from {} to {target}",
                self.status
            )));
        }
        self.status = target;
        Ok(())
    }

    pub fn affirm(&mut self, did: &Did) -> Result<()> {
        self.check_affirm(did)?;
        self.set_affirmation(did, AffirmationStatus::Affirmed);
        Ok(())
    }

    pub fn withdraw_affirmation(&mut self, did: &Did) -> Result<()> {
        self.check_withdraw(did)?;
        self.set_affirmation(did, AffirmationStatus::Pending);
        Ok(())
    }

    pub fn reject(&mut self, did: &Did) -> Result<()> {
        self.check_reject(did)?;
        self.set_status(InstructionStatus::Rejected)
    }

    /// Record ledger execution. `manual` is set for an explicit execution
    /// request, `None` for ledger auto-execution.
    pub fn mark_executed(&mut self, manual: Option<ManualExecution>) -> Result<()> {
        let skip = manual.as_ref().is_some_and(|m| m.skipped_affirmation_check);
        self.check_execute(skip)?;
        self.set_status(InstructionStatus::Executed)?;
        self.manual_execution = manual;
        Ok(())
    }

    /// Record a ledger-side execution failure.
    pub fn mark_failed(&mut self, reason: impl Into<String>, manual: Option<ManualExecution>) -> Result<()> {
        self.set_status(InstructionStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        self.manual_execution = manual;
        Ok(())
    }

    /// Display record for operators.
    #[must_use]
    pub fn summary(&self) -> InstructionSummary {
        InstructionSummary {
            id: self.id,
            venue_id: self.venue_id,
            status: self.status,
            leg_count: self.legs.len(),
            memo: self.memo.clone(),
            trade_date: self.trade_date,
            value_date: self.value_date,
            fully_affirmed: self.is_fully_affirmed(),
        }
    }
}

/// Compact view of an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionSummary {
    pub id: InstructionId,
    pub venue_id: VenueId,
    pub status: InstructionStatus,
    pub leg_count: usize,
    pub memo: Option<String>,
    pub trade_date: Option<DateTime<Utc>>,
    pub value_date: Option<DateTime<Utc>>,
    pub fully_affirmed: bool,
}

impl InstructionSummary {
    /// Labelled string fields, with placeholders for unset values.
    #[must_use]
    pub fn to_display_map(&self) -> BTreeMap<&'static str, String> {
        let date = |d: Option<DateTime<Utc>>| d.map_or_else(|| "Not set".to_string(), |d| d.to_rfc3339());
        BTreeMap::from([
            ("ID", self.id.to_string()),
            ("Venue", self.venue_id.to_string()),
            ("Status", self.status.to_string()),
            ("Legs", self.leg_count.to_string()),
            ("Memo", self.memo.clone().unwrap_or_else(|| "None".into())),
            ("Trade Date", date(self.trade_date)),
            ("Value Date", date(self.value_date)),
            ("Fully Affirmed", if self.fully_affirmed { "Yes" } else { "No" }.into()),
        ])
    }
}

/// Fixtures for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Leg {
    /// Default-portfolio leg of whole `units` of `ticker`.
    ///
    /// # Panics
    /// Panics on an invalid ticker or an invalid leg.
    #[must_use]
    pub fn dummy(from: &Did, to: &Did, ticker: &str, units: i64) -> Self {
        Self::new(
            PortfolioRef::default_of(from.clone()),
            PortfolioRef::default_of(to.clone()),
            Ticker::parse(ticker).expect("valid ticker"),
            Amount::from_units(units),
        )
        .expect("valid leg")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Did {
        Did::dummy(0xa1)
    }
    fn bob() -> Did {
        Did::dummy(0xb0)
    }
    fn carol() -> Did {
        Did::dummy(0xc0)
    }

    fn make_instruction(legs: Vec<Leg>) -> Instruction {
        Instruction::new(
            InstructionId(1),
            VenueId(7),
            NewInstruction::with_legs(legs),
            Utc::now(),
        )
        .unwrap()
    }

    fn two_party() -> Instruction {
        make_instruction(vec![Leg::dummy(&alice(), &bob(), "ACME", 1000)])
    }

    #[test]
    fn leg_same_default_portfolio_rejected() {
        let err = Leg::new(
            PortfolioRef::default_of(alice()),
            PortfolioRef::default_of(alice()),
            Ticker::parse("ACME").unwrap(),
            Amount::from_units(1),
        )
        .unwrap_err();
        assert!(matches!(err, SettlemeshError::InvalidLeg { .. }));
    }

    #[test]
    fn leg_same_numbered_portfolio_rejected() {
        let err = Leg::new(
            PortfolioRef::numbered(alice(), 3),
            PortfolioRef::numbered(alice(), 3),
            Ticker::parse("ACME").unwrap(),
            Amount::from_units(1),
        )
        .unwrap_err();
        assert!(matches!(err, SettlemeshError::InvalidLeg { .. }));
    }

    #[test]
    fn leg_between_own_portfolios_allowed() {
        let leg = Leg::new(
            PortfolioRef::default_of(alice()),
            PortfolioRef::numbered(alice(), 1),
            Ticker::parse("ACME").unwrap(),
            Amount::from_units(1),
        );
        assert!(leg.is_ok());
    }

    #[test]
    fn leg_zero_amount_rejected() {
        let err = Leg::new(
            PortfolioRef::default_of(alice()),
            PortfolioRef::default_of(bob()),
            Ticker::parse("ACME").unwrap(),
            Amount::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, SettlemeshError::InvalidLeg { .. }));
    }

    #[test]
    fn empty_legs_rejected() {
        let err = Instruction::new(
            InstructionId(1),
            VenueId(1),
            NewInstruction::with_legs(vec![]),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, SettlemeshError::InvalidInstruction { .. }));
    }

    #[test]
    fn memo_and_dates_validated() {
        let mut req = NewInstruction::with_legs(vec![Leg::dummy(&alice(), &bob(), "ACME", 1)]);
        req.memo = Some("x".repeat(33));
        assert!(req.validate().is_err());
        req.memo = Some("trade 42".into());
        let now = Utc::now();
        req.trade_date = Some(now);
        req.value_date = Some(now - chrono::Duration::days(1));
        assert!(req.validate().is_err());
        req.value_date = Some(now + chrono::Duration::days(2));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn one_affirmation_per_distinct_party() {
        let inst = make_instruction(vec![
            Leg::dummy(&alice(), &bob(), "ACME", 10),
            Leg::dummy(&bob(), &alice(), "USDX", 5),
            Leg::dummy(&alice(), &carol(), "ACME", 1),
        ]);
        let parties: Vec<Did> = inst.parties().into_iter().cloned().collect();
        assert_eq!(parties, vec![alice(), bob(), carol()]);
        assert_eq!(inst.affirmations.len(), 3);
        assert!(inst
            .affirmations
            .iter()
            .all(|a| a.status == AffirmationStatus::Pending));
    }

    #[test]
    fn affirm_each_party_once() {
        let mut inst = two_party();
        inst.affirm(&alice()).unwrap();
        assert!(!inst.is_fully_affirmed());
        inst.affirm(&bob()).unwrap();
        assert!(inst.is_fully_affirmed());
        assert_eq!(inst.status, InstructionStatus::Pending);
    }

    #[test]
    fn double_affirm_is_invalid_transition() {
        let mut inst = two_party();
        inst.affirm(&alice()).unwrap();
        let err = inst.affirm(&alice()).unwrap_err();
        assert!(matches!(err, SettlemeshError::InvalidTransition { .. }));
    }

    #[test]
    fn affirm_after_withdraw_allowed() {
        let mut inst = two_party();
        inst.affirm(&alice()).unwrap();
        inst.withdraw_affirmation(&alice()).unwrap();
        assert_eq!(
            inst.affirmation(&alice()).unwrap().status,
            AffirmationStatus::Pending
        );
        inst.affirm(&alice()).unwrap();
    }

    #[test]
    fn withdraw_without_affirmation_fails() {
        let mut inst = two_party();
        let err = inst.withdraw_affirmation(&alice()).unwrap_err();
        assert!(matches!(err, SettlemeshError::InvalidTransition { .. }));
    }

    #[test]
    fn non_party_is_unauthorized() {
        let mut inst = two_party();
        assert!(matches!(
            inst.affirm(&carol()).unwrap_err(),
            SettlemeshError::Unauthorized { .. }
        ));
        assert!(matches!(
            inst.reject(&carol()).unwrap_err(),
            SettlemeshError::Unauthorized { .. }
        ));
    }

    #[test]
    fn reject_is_terminal() {
        let mut inst = two_party();
        inst.affirm(&alice()).unwrap();
        inst.reject(&bob()).unwrap();
        assert_eq!(inst.status, InstructionStatus::Rejected);

        for result in [
            inst.clone().affirm(&bob()),
            inst.clone().withdraw_affirmation(&alice()),
            inst.clone().reject(&alice()),
            inst.clone().reject(&bob()),
        ] {
            assert!(matches!(
                result.unwrap_err(),
                SettlemeshError::InvalidTransition { .. }
            ));
        }
    }

    #[test]
    fn execute_requires_all_affirmations() {
        let mut inst = two_party();
        inst.affirm(&alice()).unwrap();
        assert!(inst.mark_executed(None).is_err());
        inst.affirm(&bob()).unwrap();
        inst.mark_executed(None).unwrap();
        assert_eq!(inst.status, InstructionStatus::Executed);
        assert!(inst.satisfies_execution_invariant());
    }

    #[test]
    fn bypass_is_recorded() {
        let mut inst = two_party();
        inst.mark_executed(Some(ManualExecution {
            executed_by: alice(),
            skipped_affirmation_check: true,
        }))
        .unwrap();
        assert_eq!(inst.status, InstructionStatus::Executed);
        assert!(!inst.is_fully_affirmed());
        assert!(inst.satisfies_execution_invariant());
    }

    #[test]
    fn failed_is_terminal() {
        let mut inst = two_party();
        inst.mark_failed("InsufficientBalance", None).unwrap();
        assert_eq!(inst.failure_reason.as_deref(), Some("InsufficientBalance"));
        assert!(inst.affirm(&alice()).is_err());
        assert!(inst.mark_failed("again", None).is_err());
    }

    #[test]
    fn status_transitions_monotonic() {
        use InstructionStatus::*;
        assert!(Pending.can_transition_to(Executed));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Pending.can_transition_to(Failed));
        for terminal in [Executed, Rejected, Failed] {
            for target in [Pending, Executed, Rejected, Failed] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn chain_status_decoding() {
        assert_eq!(
            InstructionStatus::from_chain("Affirmed").unwrap(),
            InstructionStatus::Pending
        );
        assert_eq!(
            InstructionStatus::from_chain("Success").unwrap(),
            InstructionStatus::Executed
        );
        assert!(matches!(
            InstructionStatus::from_chain("Unknown").unwrap_err(),
            SettlemeshError::Ledger { .. }
        ));
    }

    #[test]
    fn totals_and_summary() {
        let inst = make_instruction(vec![
            Leg::dummy(&alice(), &bob(), "ACME", 10),
            Leg::dummy(&carol(), &bob(), "ACME", 5),
            Leg::dummy(&bob(), &alice(), "USDX", 7),
        ]);
        let totals = inst.totals_by_asset().unwrap();
        assert_eq!(totals[&Ticker::parse("ACME").unwrap()], Amount::from_units(15));
        assert_eq!(totals[&Ticker::parse("USDX").unwrap()], Amount::from_units(7));

        let display = inst.summary().to_display_map();
        assert_eq!(display["Legs"], "3");
        assert_eq!(display["Memo"], "None");
        assert_eq!(display["Trade Date"], "Not set");
        assert_eq!(display["Fully Affirmed"], "No");
    }
}
