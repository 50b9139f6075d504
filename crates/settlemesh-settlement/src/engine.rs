//! Settlement engine.
//!
//! Every write follows the same three steps:
//! 1. Read the current state from the ledger (never from a local cache)
//! 2. Validate the action locally; a local failure never reaches the ledger
//! 3. Submit, then read the entity back and return the ledger's view
//!
//! Ledger errors are returned verbatim. Nothing here retries.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use settlemesh_types::{
    Affirmation, Did, Instruction, InstructionId, InstructionStatus, Leg, LedgerErrorKind,
    ManualExecution, NewInstruction, NewVenue, Result, SettlemeshError, Venue, VenueId,
};
use tracing::{debug, info, warn};

use crate::ledger::{Ledger, Transaction, TxOutcome, TxReceipt};

/// Instructions of one venue, grouped by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueInstructions {
    pub venue_id: Option<VenueId>,
    pub pending: Vec<Instruction>,
    pub executed: Vec<Instruction>,
    pub rejected: Vec<Instruction>,
    pub failed: Vec<Instruction>,
}

impl VenueInstructions {
    fn group(venue_id: VenueId, instructions: Vec<Instruction>) -> Self {
        let mut grouped = Self {
            venue_id: Some(venue_id),
            ..Self::default()
        };
        for instruction in instructions {
            match instruction.status {
                InstructionStatus::Pending => grouped.pending.push(instruction),
                InstructionStatus::Executed => grouped.executed.push(instruction),
                InstructionStatus::Rejected => grouped.rejected.push(instruction),
                InstructionStatus::Failed => grouped.failed.push(instruction),
            }
        }
        grouped
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.pending.len() + self.executed.len() + self.rejected.len() + self.failed.len()
    }
}

/// Instruction lifecycle controller over a [`Ledger`].
pub struct SettlementEngine<L: Ledger + ?Sized> {
    ledger: Arc<L>,
}

impl<L: Ledger + ?Sized> Clone for SettlementEngine<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
        }
    }
}

impl<L: Ledger + ?Sized> SettlementEngine<L> {
    #[must_use]
    pub fn new(ledger: Arc<L>) -> Self {
        Self { ledger }
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn venue(&self, id: VenueId) -> Result<Venue> {
        self.ledger.venue(id).await
    }

    pub async fn venue_instructions(&self, id: VenueId) -> Result<VenueInstructions> {
        let instructions = self.ledger.venue_instructions(id).await?;
        Ok(VenueInstructions::group(id, instructions))
    }

    pub async fn instruction(&self, id: InstructionId) -> Result<Instruction> {
        self.ledger.instruction(id).await
    }

    pub async fn instruction_legs(&self, id: InstructionId) -> Result<Vec<Leg>> {
        Ok(self.ledger.instruction(id).await?.legs)
    }

    pub async fn instruction_affirmations(&self, id: InstructionId) -> Result<Vec<Affirmation>> {
        Ok(self.ledger.instruction(id).await?.affirmations)
    }

    pub async fn pending_instructions(&self, did: &Did) -> Result<Vec<Instruction>> {
        self.ledger.pending_instructions(did).await
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Create a venue owned by `signer`.
    pub async fn create_venue(&self, signer: &Did, venue: NewVenue) -> Result<Venue> {
        let receipt = self.submit(signer, Transaction::CreateVenue(venue)).await?;
        match receipt.outcome {
            TxOutcome::VenueCreated(id) => {
                info!(venue = %id, owner = %signer.short(), block = receipt.block.number, "Venue created");
                self.ledger.venue(id).await
            }
            other => Err(unexpected_outcome("createVenue", other)),
        }
    }

    /// Add an instruction to a venue. `signer` must own the venue or be one
    /// of its signers.
    pub async fn add_instruction(
        &self,
        signer: &Did,
        venue_id: VenueId,
        instruction: NewInstruction,
    ) -> Result<Instruction> {
        instruction.validate()?;
        let venue = self.ledger.venue(venue_id).await?;
        if !venue.may_add_instructions(signer) {
            return Err(SettlemeshError::Unauthorized {
                did: signer.clone(),
                action: format!("add instructions to venue {venue_id}"),
            });
        }

        let legs = instruction.legs.len();
        let receipt = self
            .submit(signer, Transaction::AddInstruction { venue_id, instruction })
            .await?;
        match receipt.outcome {
            TxOutcome::InstructionCreated(id) => {
                info!(
                    instruction = %id,
                    venue = %venue_id,
                    legs,
                    block = receipt.block.number,
                    "Instruction added"
                );
                self.ledger.instruction(id).await
            }
            other => Err(unexpected_outcome("addInstruction", other)),
        }
    }

    /// Affirm as `signer`. The returned instruction is the ledger's view
    /// afterwards, which may already be executed.
    pub async fn affirm(&self, signer: &Did, id: InstructionId) -> Result<Instruction> {
        let current = self.ledger.instruction(id).await?;
        current.check_affirm(signer)?;
        self.submit(signer, Transaction::Affirm(id)).await?;
        let updated = self.ledger.instruction(id).await?;
        info!(
            instruction = %id,
            party = %signer.short(),
            pending = updated.pending_affirmations().len(),
            status = %updated.status,
            "Instruction affirmed"
        );
        Ok(updated)
    }

    pub async fn withdraw_affirmation(&self, signer: &Did, id: InstructionId) -> Result<Instruction> {
        let current = self.ledger.instruction(id).await?;
        current.check_withdraw(signer)?;
        self.submit(signer, Transaction::WithdrawAffirmation(id)).await?;
        info!(instruction = %id, party = %signer.short(), "Affirmation withdrawn");
        self.ledger.instruction(id).await
    }

    pub async fn reject(&self, signer: &Did, id: InstructionId) -> Result<Instruction> {
        let current = self.ledger.instruction(id).await?;
        current.check_reject(signer)?;
        self.submit(signer, Transaction::Reject(id)).await?;
        info!(instruction = %id, party = %signer.short(), "Instruction rejected");
        self.ledger.instruction(id).await
    }

    /// Request execution.
    ///
    /// With the affirmation check, the venue owner or any party may execute
    /// and every party must have affirmed. Skipping the check is reserved to
    /// the venue owner. The ledger decides between `Executed` and `Failed`.
    pub async fn execute_manually(
        &self,
        signer: &Did,
        id: InstructionId,
        skip_affirmation_check: bool,
    ) -> Result<Instruction> {
        let current = self.ledger.instruction(id).await?;
        let venue = self.ledger.venue(current.venue_id).await?;
        check_execution_authority(&venue, &current, signer, skip_affirmation_check)?;
        current.check_execute(skip_affirmation_check)?;

        if skip_affirmation_check {
            warn!(
                instruction = %id,
                executed_by = %signer.short(),
                pending = current.pending_affirmations().len(),
                "Executing with affirmation check skipped"
            );
        }

        self.submit(
            signer,
            Transaction::ExecuteManually {
                instruction_id: id,
                skip_affirmation_check,
            },
        )
        .await?;

        let updated = self.ledger.instruction(id).await?;
        match updated.status {
            InstructionStatus::Failed => warn!(
                instruction = %id,
                reason = updated.failure_reason.as_deref().unwrap_or("unknown"),
                "Manual execution failed on ledger"
            ),
            status => info!(instruction = %id, %status, "Manual execution submitted"),
        }
        Ok(updated)
    }

    async fn submit(&self, signer: &Did, tx: Transaction) -> Result<TxReceipt> {
        let name = tx.name();
        debug!(tx = name, signer = %signer.short(), "Submitting transaction");
        self.ledger.submit(signer, tx).await.inspect_err(|e| {
            warn!(tx = name, signer = %signer.short(), error = %e, "Ledger rejected transaction");
        })
    }
}

fn check_execution_authority(
    venue: &Venue,
    instruction: &Instruction,
    signer: &Did,
    skip_affirmation_check: bool,
) -> Result<()> {
    let allowed = if skip_affirmation_check {
        venue.is_owner(signer)
    } else {
        venue.is_owner(signer) || instruction.is_party(signer)
    };
    if allowed {
        return Ok(());
    }
    let action = if skip_affirmation_check {
        format!("execute instruction {} without affirmation check: not the venue owner", instruction.id)
    } else {
        format!("execute instruction {}: neither venue owner nor party", instruction.id)
    };
    Err(SettlemeshError::Unauthorized {
        did: signer.clone(),
        action,
    })
}

fn unexpected_outcome(call: &str, outcome: TxOutcome) -> SettlemeshError {
    SettlemeshError::ledger_kind(
        LedgerErrorKind::Other,
        format!("{call} returned unexpected outcome {outcome:?}"),
    )
}

/// The recorded affirmation-check bypass of an executed instruction, if any.
#[must_use]
pub fn bypass_record(instruction: &Instruction) -> Option<&ManualExecution> {
    instruction
        .manual_execution
        .as_ref()
        .filter(|m| m.skipped_affirmation_check)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_ledger::InMemoryLedger;
    use settlemesh_types::{AffirmationStatus, VenueKind};

    fn alice() -> Did {
        Did::dummy(0xa1)
    }
    fn bob() -> Did {
        Did::dummy(0xb0)
    }
    fn mallory() -> Did {
        Did::dummy(0xee)
    }

    async fn setup() -> (SettlementEngine<InMemoryLedger>, Venue) {
        let engine = SettlementEngine::new(Arc::new(InMemoryLedger::new()));
        let venue = engine
            .create_venue(
                &alice(),
                NewVenue {
                    kind: VenueKind::Exchange,
                    description: "desk".into(),
                },
            )
            .await
            .unwrap();
        (engine, venue)
    }

    fn one_leg() -> NewInstruction {
        NewInstruction::with_legs(vec![Leg::dummy(&alice(), &bob(), "ACME", 1000)])
    }

    #[tokio::test]
    async fn create_venue_reads_back() {
        let (_, venue) = setup().await;
        assert_eq!(venue.owner, alice());
        assert_eq!(venue.kind, VenueKind::Exchange);
    }

    #[tokio::test]
    async fn non_signer_cannot_add_instruction() {
        let (engine, venue) = setup().await;
        let before = engine.ledger().submission_count();
        let err = engine
            .add_instruction(&mallory(), venue.id, one_leg())
            .await
            .unwrap_err();
        assert!(matches!(err, SettlemeshError::Unauthorized { .. }));
        assert_eq!(engine.ledger().submission_count(), before);
    }

    #[tokio::test]
    async fn invalid_leg_fails_before_ledger() {
        let (engine, venue) = setup().await;
        let before = engine.ledger().submission_count();
        let err = engine
            .add_instruction(&alice(), venue.id, NewInstruction::with_legs(vec![]))
            .await
            .unwrap_err();
        assert!(err.is_local());
        assert_eq!(engine.ledger().submission_count(), before);
    }

    #[tokio::test]
    async fn party_may_execute_when_affirmed() {
        let (engine, venue) = setup().await;
        engine.ledger().set_auto_execute(false);
        let inst = engine.add_instruction(&alice(), venue.id, one_leg()).await.unwrap();
        engine.affirm(&alice(), inst.id).await.unwrap();
        engine.affirm(&bob(), inst.id).await.unwrap();

        let done = engine.execute_manually(&bob(), inst.id, false).await.unwrap();
        assert_eq!(done.status, InstructionStatus::Executed);
        assert!(bypass_record(&done).is_none());
    }

    #[tokio::test]
    async fn skip_check_is_owner_only() {
        let (engine, venue) = setup().await;
        let inst = engine.add_instruction(&alice(), venue.id, one_leg()).await.unwrap();

        let err = engine.execute_manually(&bob(), inst.id, true).await.unwrap_err();
        assert!(matches!(err, SettlemeshError::Unauthorized { .. }));

        let done = engine.execute_manually(&alice(), inst.id, true).await.unwrap();
        assert_eq!(done.status, InstructionStatus::Executed);
        let record = bypass_record(&done).unwrap();
        assert_eq!(record.executed_by, alice());
        assert!(done.satisfies_execution_invariant());
        assert_eq!(
            done.affirmation(&bob()).unwrap().status,
            AffirmationStatus::Pending
        );
    }

    #[tokio::test]
    async fn execute_without_affirmations_is_invalid_transition() {
        let (engine, venue) = setup().await;
        let inst = engine.add_instruction(&alice(), venue.id, one_leg()).await.unwrap();
        let err = engine.execute_manually(&alice(), inst.id, false).await.unwrap_err();
        assert!(matches!(err, SettlemeshError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn outsider_cannot_execute() {
        let (engine, venue) = setup().await;
        let inst = engine.add_instruction(&alice(), venue.id, one_leg()).await.unwrap();
        let err = engine.execute_manually(&mallory(), inst.id, false).await.unwrap_err();
        assert!(matches!(err, SettlemeshError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn grouped_venue_instructions() {
        let (engine, venue) = setup().await;
        let a = engine.add_instruction(&alice(), venue.id, one_leg()).await.unwrap();
        let b = engine.add_instruction(&alice(), venue.id, one_leg()).await.unwrap();
        engine.reject(&bob(), b.id).await.unwrap();

        let grouped = engine.venue_instructions(venue.id).await.unwrap();
        assert_eq!(grouped.total(), 2);
        assert_eq!(grouped.pending[0].id, a.id);
        assert_eq!(grouped.rejected[0].id, b.id);
    }
}
