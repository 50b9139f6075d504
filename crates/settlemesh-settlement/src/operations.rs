//! Closed operation table.
//!
//! Each [`SettlementOperation`] maps to exactly one engine call and one
//! [`OperationOutput`] variant; adding an operation without handling it is a
//! compile error.

use serde::{Deserialize, Serialize};
use settlemesh_types::{
    Affirmation, Did, Instruction, InstructionId, Leg, NewInstruction, NewVenue, Result, Venue,
    VenueId,
};
use tracing::debug;

use crate::{
    engine::{SettlementEngine, VenueInstructions},
    ledger::Ledger,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum SettlementOperation {
    GetVenue {
        venue_id: VenueId,
    },
    CreateVenue {
        venue: NewVenue,
    },
    GetVenueInstructions {
        venue_id: VenueId,
    },
    GetInstruction {
        instruction_id: InstructionId,
    },
    GetInstructionLegs {
        instruction_id: InstructionId,
    },
    GetInstructionAffirmations {
        instruction_id: InstructionId,
    },
    AddInstruction {
        venue_id: VenueId,
        instruction: NewInstruction,
    },
    AffirmInstruction {
        instruction_id: InstructionId,
    },
    WithdrawAffirmation {
        instruction_id: InstructionId,
    },
    RejectInstruction {
        instruction_id: InstructionId,
    },
    ExecuteInstruction {
        instruction_id: InstructionId,
        skip_affirmation_check: bool,
    },
    /// Pending instructions of one identity. Defaults to the caller.
    GetPendingInstructions {
        did: Option<Did>,
    },
}

impl SettlementOperation {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetVenue { .. } => "getVenue",
            Self::CreateVenue { .. } => "createVenue",
            Self::GetVenueInstructions { .. } => "getVenueInstructions",
            Self::GetInstruction { .. } => "getInstruction",
            Self::GetInstructionLegs { .. } => "getInstructionLegs",
            Self::GetInstructionAffirmations { .. } => "getInstructionAffirmations",
            Self::AddInstruction { .. } => "addInstruction",
            Self::AffirmInstruction { .. } => "affirmInstruction",
            Self::WithdrawAffirmation { .. } => "withdrawAffirmation",
            Self::RejectInstruction { .. } => "rejectInstruction",
            Self::ExecuteInstruction { .. } => "executeInstruction",
            Self::GetPendingInstructions { .. } => "getPendingInstructions",
        }
    }

    /// Whether the operation submits a transaction.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::CreateVenue { .. }
                | Self::AddInstruction { .. }
                | Self::AffirmInstruction { .. }
                | Self::WithdrawAffirmation { .. }
                | Self::RejectInstruction { .. }
                | Self::ExecuteInstruction { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum OperationOutput {
    Venue(Venue),
    VenueInstructions(VenueInstructions),
    Instruction(Instruction),
    Legs(Vec<Leg>),
    Affirmations(Vec<Affirmation>),
    Instructions(Vec<Instruction>),
}

impl<L: Ledger + ?Sized> SettlementEngine<L> {
    /// Run one operation as `caller`. Reads ignore the caller except
    /// `GetPendingInstructions` without an explicit identity.
    pub async fn dispatch(&self, caller: &Did, operation: SettlementOperation) -> Result<OperationOutput> {
        debug!(operation = operation.name(), caller = %caller.short(), "Dispatching operation");
        Ok(match operation {
            SettlementOperation::GetVenue { venue_id } => OperationOutput::Venue(self.venue(venue_id).await?),
            SettlementOperation::CreateVenue { venue } => {
                OperationOutput::Venue(self.create_venue(caller, venue).await?)
            }
            SettlementOperation::GetVenueInstructions { venue_id } => {
                OperationOutput::VenueInstructions(self.venue_instructions(venue_id).await?)
            }
            SettlementOperation::GetInstruction { instruction_id } => {
                OperationOutput::Instruction(self.instruction(instruction_id).await?)
            }
            SettlementOperation::GetInstructionLegs { instruction_id } => {
                OperationOutput::Legs(self.instruction_legs(instruction_id).await?)
            }
            SettlementOperation::GetInstructionAffirmations { instruction_id } => {
                OperationOutput::Affirmations(self.instruction_affirmations(instruction_id).await?)
            }
            SettlementOperation::AddInstruction {
                venue_id,
                instruction,
            } => OperationOutput::Instruction(self.add_instruction(caller, venue_id, instruction).await?),
            SettlementOperation::AffirmInstruction { instruction_id } => {
                OperationOutput::Instruction(self.affirm(caller, instruction_id).await?)
            }
            SettlementOperation::WithdrawAffirmation { instruction_id } => {
                OperationOutput::Instruction(self.withdraw_affirmation(caller, instruction_id).await?)
            }
            SettlementOperation::RejectInstruction { instruction_id } => {
                OperationOutput::Instruction(self.reject(caller, instruction_id).await?)
            }
            SettlementOperation::ExecuteInstruction {
                instruction_id,
                skip_affirmation_check,
            } => OperationOutput::Instruction(
                self.execute_manually(caller, instruction_id, skip_affirmation_check)
                    .await?,
            ),
            SettlementOperation::GetPendingInstructions { did } => {
                let did = did.as_ref().unwrap_or(caller);
                OperationOutput::Instructions(self.pending_instructions(did).await?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::memory_ledger::InMemoryLedger;
    use settlemesh_types::{InstructionStatus, VenueKind};

    #[tokio::test]
    async fn dispatch_routes_to_engine() {
        let engine = SettlementEngine::new(Arc::new(InMemoryLedger::new()));
        let alice = Did::dummy(1);
        let bob = Did::dummy(2);

        let venue = match engine
            .dispatch(
                &alice,
                SettlementOperation::CreateVenue {
                    venue: NewVenue {
                        kind: VenueKind::Distribution,
                        description: "primary issuance".into(),
                    },
                },
            )
            .await
            .unwrap()
        {
            OperationOutput::Venue(v) => v,
            other => panic!("unexpected {other:?}"),
        };

        let add = SettlementOperation::AddInstruction {
            venue_id: venue.id,
            instruction: NewInstruction::with_legs(vec![Leg::dummy(&alice, &bob, "ACME", 10)]),
        };
        assert!(add.is_write());
        let OperationOutput::Instruction(inst) = engine.dispatch(&alice, add).await.unwrap() else {
            panic!("expected instruction");
        };

        let pending = engine
            .dispatch(&bob, SettlementOperation::GetPendingInstructions { did: None })
            .await
            .unwrap();
        assert_eq!(pending, OperationOutput::Instructions(vec![inst.clone()]));

        let OperationOutput::Affirmations(affirmations) = engine
            .dispatch(
                &bob,
                SettlementOperation::GetInstructionAffirmations {
                    instruction_id: inst.id,
                },
            )
            .await
            .unwrap()
        else {
            panic!("expected affirmations");
        };
        assert_eq!(affirmations.len(), 2);

        let OperationOutput::Instruction(rejected) = engine
            .dispatch(
                &bob,
                SettlementOperation::RejectInstruction {
                    instruction_id: inst.id,
                },
            )
            .await
            .unwrap()
        else {
            panic!("expected instruction");
        };
        assert_eq!(rejected.status, InstructionStatus::Rejected);
    }

    #[test]
    fn operation_serde_tag() {
        let op = SettlementOperation::ExecuteInstruction {
            instruction_id: InstructionId(4),
            skip_affirmation_check: false,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["operation"], "executeInstruction");
        assert_eq!(op.name(), "executeInstruction");
        let back: SettlementOperation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}
