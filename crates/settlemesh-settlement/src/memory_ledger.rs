//! In-memory [`Ledger`] for tests. **Never use in production.**
//!
//! Behaves like the settlement pallet closely enough to drive the engine:
//! it assigns ids, owns the authoritative instruction state, auto-executes
//! an instruction once every party has affirmed, and emits the pallet's
//! events to an optional sink. Failures are injected explicitly.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use settlemesh_types::{
    BlockRef, Did, EventRecord, Instruction, InstructionId, InstructionStatus, LedgerErrorKind,
    ManualExecution, Notification, Result, SettlemeshError, Venue, VenueId,
};

use crate::ledger::{Ledger, Transaction, TxOutcome, TxReceipt};

type EventSink = Arc<dyn Fn(Notification) + Send + Sync>;

#[derive(Clone, Default)]
struct LedgerState {
    venues: BTreeMap<VenueId, Venue>,
    instructions: BTreeMap<InstructionId, Instruction>,
    next_venue: u64,
    next_instruction: u64,
    block: u64,
    submissions: usize,
    auto_execute: bool,
    execution_failures: HashMap<InstructionId, String>,
    next_submit_error: Option<String>,
}

/// Shared, lock-protected fake of the settlement pallet.
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
    sink: RwLock<Option<EventSink>>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LedgerState {
                next_venue: 1,
                next_instruction: 1,
                auto_execute: true,
                ..LedgerState::default()
            }),
            sink: RwLock::new(None),
        }
    }

    /// Receive one `Notification::Events` per included transaction.
    pub fn set_event_sink(&self, sink: impl Fn(Notification) + Send + Sync + 'static) {
        *self.sink.write() = Some(Arc::new(sink));
    }

    /// Whether full affirmation executes the instruction right away. Default on.
    pub fn set_auto_execute(&self, enabled: bool) {
        self.state.write().auto_execute = enabled;
    }

    /// Make every execution attempt of `id` fail with `reason`.
    pub fn fail_execution(&self, id: InstructionId, reason: impl Into<String>) {
        self.state.write().execution_failures.insert(id, reason.into());
    }

    /// Reject the next submission with `message`, as the node would.
    pub fn fail_next_submission(&self, message: impl Into<String>) {
        self.state.write().next_submit_error = Some(message.into());
    }

    pub fn add_signer(&self, venue: VenueId, signer: Did) -> Result<()> {
        let mut state = self.state.write();
        let venue = state
            .venues
            .get_mut(&venue)
            .ok_or_else(|| not_found("Venue", venue))?;
        venue.signers.insert(signer);
        Ok(())
    }

    /// Number of submissions received, including failed ones.
    #[must_use]
    pub fn submission_count(&self) -> usize {
        self.state.read().submissions
    }

    #[must_use]
    pub fn block_number(&self) -> u64 {
        self.state.read().block
    }

    fn emit(&self, block: BlockRef, records: Vec<EventRecord>) {
        if records.is_empty() {
            return;
        }
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink(Notification::Events { block, records });
        }
    }
}

fn not_found(entity: &str, id: impl std::fmt::Display) -> SettlemeshError {
    SettlemeshError::ledger_kind(
        LedgerErrorKind::NotFound,
        format!("settlement.{entity}NotFound: {id}"),
    )
}

fn rejected(err: &SettlemeshError) -> SettlemeshError {
    SettlemeshError::ledger_kind(LedgerErrorKind::Rejected, err.to_string())
}

fn record(event: &str, data: Value) -> EventRecord {
    let data = match data {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    EventRecord::new(format!("settlement.{event}").as_str(), data)
}

impl LedgerState {
    fn instruction_mut(&mut self, id: InstructionId) -> Result<&mut Instruction> {
        self.instructions
            .get_mut(&id)
            .ok_or_else(|| not_found("Instruction", id))
    }

    /// Run execution of `id`, honoring injected failures.
    fn execute(
        &mut self,
        id: InstructionId,
        manual: Option<ManualExecution>,
        events: &mut Vec<EventRecord>,
    ) -> Result<()> {
        let failure = self.execution_failures.get(&id).cloned();
        let instruction = self.instruction_mut(id)?;
        let venue_id = instruction.venue_id.0;
        let manual_by = manual.as_ref().map(|m| m.executed_by.to_string());
        match failure {
            Some(reason) => {
                instruction.mark_failed(reason.clone(), manual).map_err(|e| rejected(&e))?;
                events.push(record(
                    "InstructionFailed",
                    json!({"instructionId": id.0, "venueId": venue_id, "reason": reason}),
                ));
            }
            None => {
                instruction.mark_executed(manual).map_err(|e| rejected(&e))?;
                events.push(record(
                    "InstructionExecuted",
                    json!({"instructionId": id.0, "venueId": venue_id}),
                ));
            }
        }
        if let Some(did) = manual_by {
            events.push(record(
                "SettlementManuallyExecuted",
                json!({"did": did, "instructionId": id.0, "venueId": venue_id}),
            ));
        }
        Ok(())
    }

    fn apply(&mut self, signer: &Did, tx: Transaction, events: &mut Vec<EventRecord>) -> Result<TxOutcome> {
        match tx {
            Transaction::CreateVenue(request) => {
                let id = VenueId(self.next_venue);
                self.next_venue += 1;
                self.venues.insert(
                    id,
                    Venue {
                        id,
                        owner: signer.clone(),
                        kind: request.kind,
                        description: request.description,
                        signers: BTreeSet::new(),
                    },
                );
                events.push(record(
                    "VenueCreated",
                    json!({"did": signer.to_string(), "venueId": id.0, "kind": request.kind.chain_name()}),
                ));
                Ok(TxOutcome::VenueCreated(id))
            }
            Transaction::AddInstruction {
                venue_id,
                instruction,
            } => {
                let venue = self
                    .venues
                    .get(&venue_id)
                    .ok_or_else(|| not_found("Venue", venue_id))?;
                if !venue.may_add_instructions(signer) {
                    return Err(SettlemeshError::ledger_kind(
                        LedgerErrorKind::NotAuthorized,
                        format!("settlement.UnauthorizedVenue: {signer} on venue {venue_id}"),
                    ));
                }
                let id = InstructionId(self.next_instruction);
                let created = Instruction::new(id, venue_id, instruction, Utc::now())
                    .map_err(|e| rejected(&e))?;
                self.next_instruction += 1;
                events.push(record(
                    "InstructionCreated",
                    json!({"did": signer.to_string(), "venueId": venue_id.0, "instructionId": id.0}),
                ));
                self.instructions.insert(id, created);
                Ok(TxOutcome::InstructionCreated(id))
            }
            Transaction::Affirm(id) => {
                let auto_execute = self.auto_execute;
                let instruction = self.instruction_mut(id)?;
                instruction.affirm(signer).map_err(|e| rejected(&e))?;
                let fully_affirmed = instruction.is_fully_affirmed();
                events.push(record(
                    "InstructionAffirmed",
                    json!({"did": signer.to_string(), "instructionId": id.0}),
                ));
                if auto_execute && fully_affirmed {
                    self.execute(id, None, events)?;
                }
                Ok(TxOutcome::Applied)
            }
            Transaction::WithdrawAffirmation(id) => {
                self.instruction_mut(id)?
                    .withdraw_affirmation(signer)
                    .map_err(|e| rejected(&e))?;
                events.push(record(
                    "AffirmationWithdrawn",
                    json!({"did": signer.to_string(), "instructionId": id.0}),
                ));
                Ok(TxOutcome::Applied)
            }
            Transaction::Reject(id) => {
                self.instruction_mut(id)?
                    .reject(signer)
                    .map_err(|e| rejected(&e))?;
                events.push(record(
                    "InstructionRejected",
                    json!({"did": signer.to_string(), "instructionId": id.0}),
                ));
                Ok(TxOutcome::Applied)
            }
            Transaction::ExecuteManually {
                instruction_id,
                skip_affirmation_check,
            } => {
                self.instruction_mut(instruction_id)?
                    .check_execute(skip_affirmation_check)
                    .map_err(|e| rejected(&e))?;
                let manual = ManualExecution {
                    executed_by: signer.clone(),
                    skipped_affirmation_check: skip_affirmation_check,
                };
                self.execute(instruction_id, Some(manual), events)?;
                Ok(TxOutcome::Applied)
            }
        }
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn venue(&self, id: VenueId) -> Result<Venue> {
        self.state
            .read()
            .venues
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("Venue", id))
    }

    async fn instruction(&self, id: InstructionId) -> Result<Instruction> {
        self.state
            .read()
            .instructions
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("Instruction", id))
    }

    async fn venue_instructions(&self, id: VenueId) -> Result<Vec<Instruction>> {
        let state = self.state.read();
        if !state.venues.contains_key(&id) {
            return Err(not_found("Venue", id));
        }
        Ok(state
            .instructions
            .values()
            .filter(|i| i.venue_id == id)
            .cloned()
            .collect())
    }

    async fn pending_instructions(&self, did: &Did) -> Result<Vec<Instruction>> {
        Ok(self
            .state
            .read()
            .instructions
            .values()
            .filter(|i| i.status == InstructionStatus::Pending && i.is_party(did))
            .cloned()
            .collect())
    }

    async fn submit(&self, signer: &Did, tx: Transaction) -> Result<TxReceipt> {
        let mut events = Vec::new();
        let (block, outcome) = {
            let mut state = self.state.write();
            state.submissions += 1;
            if let Some(message) = state.next_submit_error.take() {
                return Err(SettlemeshError::ledger(message));
            }
            // Apply on a copy so a failed extrinsic leaves no partial state.
            let mut staged = state.clone();
            let outcome = staged.apply(signer, tx, &mut events)?;
            staged.block += 1;
            let block = BlockRef::dummy(staged.block);
            *state = staged;
            (block, outcome)
        };
        self.emit(block, events);
        Ok(TxReceipt { block, outcome })
    }
}
