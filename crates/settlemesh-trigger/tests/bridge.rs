//! Trigger bridges over a shared multiplexer.
//!
//! The settlement scenarios wire the in-memory ledger's event sink into the
//! mock feed, so records are produced by real engine calls.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use settlemesh_settlement::{InMemoryLedger, SettlementEngine};
use settlemesh_stream::{HandlerError, MockFeed, Multiplexer};
use settlemesh_trigger::*;
use settlemesh_types::{
    AccountAddress, AccountInfo, Amount, BlockHeader, BlockRef, Did, Instruction, Leg, NewInstruction,
    NewVenue, Notification, StreamConfig, Venue, VenueKind,
};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::timeout,
};

const QUIET: Duration = Duration::from_millis(150);
const PATIENCE: Duration = Duration::from_secs(2);

struct Collecting {
    tx: UnboundedSender<TriggerRecord>,
    calls: AtomicUsize,
    fail_first: bool,
}

#[async_trait]
impl TriggerEmitter for Collecting {
    async fn emit(&self, records: Vec<TriggerRecord>) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_first && call == 0 {
            return Err(HandlerError::new("workflow engine unavailable"));
        }
        for record in records {
            self.tx
                .send(record)
                .map_err(|_| HandlerError::new("receiver dropped"))?;
        }
        Ok(())
    }
}

fn collecting() -> (Arc<Collecting>, UnboundedReceiver<TriggerRecord>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let emitter = Arc::new(Collecting {
        tx,
        calls: AtomicUsize::new(0),
        fail_first: false,
    });
    (emitter, rx)
}

async fn next(rx: &mut UnboundedReceiver<TriggerRecord>) -> TriggerRecord {
    timeout(PATIENCE, rx.recv())
        .await
        .expect("emission timed out")
        .expect("emitter dropped")
}

async fn assert_silent(rx: &mut UnboundedReceiver<TriggerRecord>) {
    match timeout(QUIET, rx.recv()).await {
        Err(_) | Ok(None) => {}
        Ok(Some(record)) => panic!("unexpected emission {}", record.event_type),
    }
}

fn a() -> Did {
    Did::dummy(0x0a)
}
fn b() -> Did {
    Did::dummy(0x0b)
}

struct Chain {
    feed: MockFeed,
    mux: Arc<Multiplexer>,
    engine: SettlementEngine<InMemoryLedger>,
    venue: Venue,
}

impl Chain {
    /// Ledger notifications are forwarded to the mock feed in order.
    async fn start() -> Self {
        let feed = MockFeed::new();
        let mux = Arc::new(Multiplexer::new(
            "ws://mock",
            Arc::new(feed.clone()),
            StreamConfig::default(),
        ));
        let ledger = Arc::new(InMemoryLedger::new());
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        ledger.set_event_sink(move |n| {
            let _ = tx.send(n);
        });
        let forward = feed.clone();
        tokio::spawn(async move {
            while let Some(n) = rx.recv().await {
                forward.push(n).await;
            }
        });
        let engine = SettlementEngine::new(ledger);
        let venue = engine
            .create_venue(
                &a(),
                NewVenue {
                    kind: VenueKind::Other,
                    description: "OTC desk".into(),
                },
            )
            .await
            .unwrap();
        Self {
            feed,
            mux,
            engine,
            venue,
        }
    }

    fn bridge(&self, config: TriggerConfig, emitter: Arc<dyn TriggerEmitter>) -> TriggerBridge {
        TriggerBridge::new(Arc::clone(&self.mux), config, emitter)
    }

    async fn instruction(&self) -> Instruction {
        self.engine
            .add_instruction(
                &a(),
                self.venue.id,
                NewInstruction::with_legs(vec![Leg::dummy(&a(), &b(), "ACME", 1000)]),
            )
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn affirmations_of_one_instruction_become_records() {
    let chain = Chain::start().await;
    let (emitter, mut rx) = collecting();
    let filters = TriggerFilters {
        instruction_id: Some("2".into()),
        ..TriggerFilters::default()
    };
    let bridge = chain.bridge(
        TriggerConfig::new(EventCategory::Settlement, "InstructionAffirmed").with_filters(filters),
        emitter,
    );
    bridge.activate().await.unwrap();

    let first = chain.instruction().await;
    let second = chain.instruction().await;
    assert_eq!(second.id.0, 2);

    chain.engine.affirm(&a(), first.id).await.unwrap();
    chain.engine.affirm(&a(), second.id).await.unwrap();
    chain.engine.affirm(&b(), second.id).await.unwrap();

    let by_a = next(&mut rx).await;
    assert_eq!(by_a.event_category, EventCategory::Settlement);
    assert_eq!(by_a.event_type, "InstructionAffirmed");
    assert_eq!(by_a.data.get("did"), Some(&json!(a().to_string())));
    assert_eq!(by_a.data.get("instructionId"), Some(&json!(2)));

    let by_b = next(&mut rx).await;
    assert_eq!(by_b.data.get("did"), Some(&json!(b().to_string())));
    assert!(by_b.block_number > by_a.block_number);
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn did_filter_matches_one_party() {
    let chain = Chain::start().await;
    let (emitter, mut rx) = collecting();
    let filters = TriggerFilters {
        did: Some(b().to_string()),
        ..TriggerFilters::default()
    };
    chain
        .bridge(
            TriggerConfig::new(EventCategory::Settlement, "InstructionAffirmed").with_filters(filters),
            emitter,
        )
        .activate()
        .await
        .unwrap();

    let inst = chain.instruction().await;
    chain.engine.affirm(&a(), inst.id).await.unwrap();
    chain.engine.affirm(&b(), inst.id).await.unwrap();

    let got = next(&mut rx).await;
    assert_eq!(got.data.get("did"), Some(&json!(b().to_string())));
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn bridges_share_one_connection() {
    let chain = Chain::start().await;
    let (affirmed, mut affirmed_rx) = collecting();
    let (executed, mut executed_rx) = collecting();
    let affirm_bridge = chain.bridge(
        TriggerConfig::new(EventCategory::Settlement, "InstructionAffirmed"),
        affirmed,
    );
    let execute_bridge = chain.bridge(
        TriggerConfig::new(EventCategory::Settlement, "InstructionExecuted"),
        executed,
    );
    affirm_bridge.activate().await.unwrap();
    execute_bridge.activate().await.unwrap();
    assert_eq!(chain.feed.connect_count(), 1);
    assert_eq!(chain.mux.subscription_count(), 2);

    let inst = chain.instruction().await;
    chain.engine.affirm(&a(), inst.id).await.unwrap();
    chain.engine.affirm(&b(), inst.id).await.unwrap();

    next(&mut affirmed_rx).await;
    next(&mut affirmed_rx).await;
    let executed = next(&mut executed_rx).await;
    assert_eq!(executed.event_type, "InstructionExecuted");
    assert_eq!(executed.data.get("instructionId"), Some(&json!(inst.id.0)));

    assert!(affirm_bridge.deactivate());
    assert_eq!(chain.mux.subscription_count(), 1);
}

#[tokio::test]
async fn deactivated_bridge_stops_emitting() {
    let chain = Chain::start().await;
    let (emitter, mut rx) = collecting();
    let bridge = chain.bridge(
        TriggerConfig::new(EventCategory::Settlement, "InstructionCreated"),
        emitter,
    );
    bridge.activate().await.unwrap();
    chain.instruction().await;
    next(&mut rx).await;

    assert!(bridge.deactivate());
    chain.instruction().await;
    assert_silent(&mut rx).await;
    assert_eq!(chain.mux.subscription_count(), 0);
}

#[tokio::test]
async fn deactivation_during_activation_cancels_once() {
    let feed = MockFeed::new();
    feed.set_connect_delay(Duration::from_millis(200));
    let mux = Arc::new(Multiplexer::new(
        "ws://mock",
        Arc::new(feed.clone()),
        StreamConfig::default(),
    ));
    let (emitter, mut rx) = collecting();
    let bridge = TriggerBridge::new(
        Arc::clone(&mux),
        TriggerConfig::new(EventCategory::Block, "NewBlock"),
        emitter,
    );

    let activating = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.activate().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bridge.status(), BridgeStatus::Activating);
    assert!(bridge.deactivate());

    activating.await.unwrap().unwrap();
    assert_eq!(bridge.status(), BridgeStatus::Cancelled);
    assert_eq!(mux.subscription_count(), 0);
    assert!(!bridge.deactivate());

    feed.push(Notification::NewHead(BlockHeader::dummy(1))).await;
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn new_block_trigger_emits_header_fields() {
    let feed = MockFeed::new();
    let mux = Arc::new(Multiplexer::new(
        "ws://mock",
        Arc::new(feed.clone()),
        StreamConfig::default(),
    ));
    let (emitter, mut rx) = collecting();
    TriggerBridge::new(
        Arc::clone(&mux),
        TriggerConfig::new(EventCategory::Block, "NewBlock"),
        emitter,
    )
    .activate()
    .await
    .unwrap();

    let header = BlockHeader::dummy(77);
    feed.push(Notification::NewHead(header)).await;
    let got = next(&mut rx).await;
    assert_eq!(got.event_category, EventCategory::Block);
    assert_eq!(got.event_type, "NewBlock");
    assert_eq!(got.block_number, 77);
    assert_eq!(got.block_hash, header.block.hash);
    assert_eq!(got.timestamp, header.block.timestamp);
}

#[tokio::test]
async fn account_trigger_with_address_watches_balance() {
    let feed = MockFeed::new();
    let mux = Arc::new(Multiplexer::new(
        "ws://mock",
        Arc::new(feed.clone()),
        StreamConfig::default(),
    ));
    let alice = AccountAddress::parse("5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY").unwrap();
    let (emitter, mut rx) = collecting();
    let bridge = TriggerBridge::new(
        Arc::clone(&mux),
        TriggerConfig::new(EventCategory::Account, "BalanceSet").with_filters(TriggerFilters {
            did: Some(alice.to_string()),
            ..TriggerFilters::default()
        }),
        emitter,
    );
    bridge.activate().await.unwrap();
    assert_eq!(feed.watched(), vec![alice.clone()]);

    feed.push(Notification::Account {
        block: BlockRef::dummy(5),
        info: AccountInfo {
            address: alice,
            free: Amount::parse("12.5").unwrap(),
            reserved: Amount::ZERO,
            frozen: Amount::ZERO,
        },
    })
    .await;
    let got = next(&mut rx).await;
    assert_eq!(got.event_category, EventCategory::Account);
    assert_eq!(got.data.get("free"), Some(&json!("12.5")));

    bridge.deactivate();
    assert!(feed.watched().is_empty());
}

#[tokio::test]
async fn emitter_failure_does_not_end_the_trigger() {
    let feed = MockFeed::new();
    let mux = Arc::new(Multiplexer::new(
        "ws://mock",
        Arc::new(feed.clone()),
        StreamConfig::default(),
    ));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let emitter = Arc::new(Collecting {
        tx,
        calls: AtomicUsize::new(0),
        fail_first: true,
    });
    let bridge = TriggerBridge::new(
        Arc::clone(&mux),
        TriggerConfig::new(EventCategory::Block, "NewBlock"),
        emitter,
    );
    bridge.activate().await.unwrap();

    for n in 1..=2 {
        feed.push(Notification::NewHead(BlockHeader::dummy(n))).await;
    }
    assert_eq!(next(&mut rx).await.block_number, 2);
    assert_eq!(bridge.status(), BridgeStatus::Active);
}

#[tokio::test]
async fn connection_failure_leaves_bridge_retryable() {
    let feed = MockFeed::new();
    feed.fail_next_connects(1);
    let mux = Arc::new(Multiplexer::new(
        "ws://mock",
        Arc::new(feed.clone()),
        StreamConfig::default(),
    ));
    let (emitter, _rx) = collecting();
    let bridge = TriggerBridge::new(
        Arc::clone(&mux),
        TriggerConfig::new(EventCategory::Asset, "Issued"),
        emitter,
    );
    assert!(bridge.activate().await.is_err());
    assert_eq!(bridge.status(), BridgeStatus::Idle);

    bridge.activate().await.unwrap();
    assert_eq!(bridge.status(), BridgeStatus::Active);
}
