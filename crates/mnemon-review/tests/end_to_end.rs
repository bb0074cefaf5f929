//! Full-path scenario tests: contracted subscriptions, the in-process bus,
//! the dispatcher, the pairing handlers, and event production.

use std::sync::Arc;
use std::time::Duration;

use mnemon_bus::{ConsumerFleet, FleetConfig, LocalBus, MessageBus, Producer};
use mnemon_contracts::{load_contracts, resolve, ResolvedContracts};
use mnemon_dispatch::{Dispatcher, DispatcherConfig, HandlerRegistry, QuarantineSink};
use mnemon_domain::{
    CommitSha, CorrelationId, Envelope, EventKind, EventPayload, FindingId, FindingObservedV1,
    FindingResolvedV1, FixAppliedV1, FixId, LineRange, PairCreatedV1, PairingType, ProducerId,
    ResolutionId, RunId, Severity,
};
use mnemon_review::handlers::{
    FindingObservedHandler, FindingResolvedHandler, FixAppliedHandler,
};
use mnemon_review::{PairingConfig, PairingEngine};
use mnemon_store::{InMemoryStore, ReviewStore};

fn contracts_fixture() -> ResolvedContracts {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(
        tmp.path().join("review.contract.yml"),
        r#"
name: review-pairing
description: pairs findings with fixes and announces confirmed pairs
subscribe:
  - topic: test.mnemon.evt.review-ingest.finding-observed.v1
    kind: finding_observed
    version: 1
  - topic: test.mnemon.evt.review-ingest.fix-applied.v1
    kind: fix_applied
    version: 1
  - topic: test.mnemon.evt.ci.finding-resolved.v1
    kind: finding_resolved
    version: 1
publish:
  - topic: test.mnemon.evt.mnemon.pair-created.v1
    kind: pair_created
    version: 1
"#,
    )
    .unwrap();
    resolve(&load_contracts(tmp.path()).unwrap()).unwrap()
}

struct Harness {
    bus: Arc<LocalBus>,
    store: Arc<InMemoryStore>,
    fleet: ConsumerFleet,
    contracts: ResolvedContracts,
}

fn harness() -> Harness {
    let contracts = contracts_fixture();
    let bus = Arc::new(LocalBus::new());
    let store = Arc::new(InMemoryStore::new());

    let engine = Arc::new(PairingEngine::new(
        store.clone(),
        store.clone(),
        PairingConfig::new(0.5, mnemon_domain::DomainId::new()),
    ));
    let producer_id = ProducerId::new("mnemon");

    let mut registry = HandlerRegistry::new();
    registry
        .register(
            EventKind::FindingObserved,
            1,
            Arc::new(FindingObservedHandler::new(engine.clone())),
        )
        .unwrap();
    registry
        .register(
            EventKind::FixApplied,
            1,
            Arc::new(FixAppliedHandler::new(engine.clone())),
        )
        .unwrap();
    registry
        .register(
            EventKind::FindingResolved,
            1,
            Arc::new(FindingResolvedHandler::new(engine, producer_id)),
        )
        .unwrap();

    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        Arc::new(QuarantineSink::default()),
        DispatcherConfig::default(),
    ));
    let producer = Arc::new(Producer::new(bus.clone(), contracts.clone()));
    let fleet = ConsumerFleet::new(
        bus.clone(),
        dispatcher,
        producer,
        FleetConfig { queue_capacity: 16, drain_deadline: Duration::from_secs(5) },
    );

    Harness { bus, store, fleet, contracts }
}

fn finding() -> FindingObservedV1 {
    FindingObservedV1 {
        finding_id: FindingId::new("F1"),
        repo: "org/repo".into(),
        pr_id: 12,
        rule_id: "r1".into(),
        severity: Severity::Warning,
        file_path: "src/main.rs".into(),
        line_start: 10,
        line_end: Some(12),
        tool_name: "linter".into(),
        tool_version: "1.0".into(),
        normalized_message: "unused variable".into(),
        raw_message: "warning: unused".into(),
        commit_sha_observed: CommitSha("c1aaaaa".into()),
        observed_at: "2026-03-01T10:00:00Z".parse().unwrap(),
    }
}

fn fix() -> FixAppliedV1 {
    FixAppliedV1 {
        fix_id: FixId::new("X1"),
        finding_id: FindingId::new("F1"),
        fix_commit_sha: CommitSha("c2bbbbb".into()),
        file_path: "src/main.rs".into(),
        diff_hunks: vec!["@@ -9,5 +9,5 @@".into()],
        touched_line_range: LineRange(9, 13),
        tool_autofix: true,
        applied_at: "2026-03-01T11:00:00Z".parse().unwrap(),
    }
}

fn resolution() -> FindingResolvedV1 {
    FindingResolvedV1 {
        resolution_id: ResolutionId::new("R1"),
        finding_id: FindingId::new("F1"),
        fix_commit_sha: CommitSha("c2bbbbb".into()),
        verified_at_commit_sha: CommitSha("c3ccccc".into()),
        ci_run_id: RunId::new("ci-900"),
        resolved_at: "2026-03-01T12:00:00Z".parse().unwrap(),
    }
}

fn envelope<T: EventPayload>(payload: T, correlation_id: CorrelationId) -> Envelope {
    payload
        .into_envelope(
            correlation_id,
            ProducerId::new("review-ingest"),
            "2026-03-01T12:00:01Z".parse().unwrap(),
        )
        .unwrap()
}

async fn publish(harness: &Harness, kind: EventKind, envelope: &Envelope) {
    let topic = harness
        .contracts
        .subscriptions
        .iter()
        .find(|b| b.kind == kind)
        .map(|b| b.topic.clone())
        .expect("contracted topic");
    harness
        .bus
        .publish(&topic, envelope.to_bytes().unwrap())
        .await
        .unwrap();
}

/// Poll until the pair row for (F1, c2bbbbb) exists.
async fn wait_for_pair(store: &Arc<InMemoryStore>) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let present = store
                .get_pair(&FindingId::new("F1"), "c2bbbbb")
                .await
                .unwrap()
                .is_some();
            if present {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pair not created in time");
}

#[tokio::test]
async fn happy_pairing_announces_confirmed_autofix_pair() {
    let harness = harness();
    let correlation_id = CorrelationId::new();

    // Listen on the contracted pair-created topic like a downstream peer.
    let out_topic = harness
        .contracts
        .publish_topic(EventKind::PairCreated, 1)
        .unwrap()
        .clone();
    let mut announced = harness.bus.subscribe(&out_topic, 8).await.unwrap();

    harness.fleet.start(&harness.contracts).await.unwrap();

    publish(&harness, EventKind::FindingObserved, &envelope(finding(), correlation_id)).await;
    publish(&harness, EventKind::FixApplied, &envelope(fix(), correlation_id)).await;
    publish(&harness, EventKind::FindingResolved, &envelope(resolution(), correlation_id)).await;

    let delivery = tokio::time::timeout(Duration::from_secs(2), announced.receiver.recv())
        .await
        .expect("pair_created within deadline")
        .expect("channel open");
    let event = Envelope::from_bytes(&delivery.payload).unwrap();
    assert_eq!(event.kind, EventKind::PairCreated);
    assert_eq!(event.correlation_id, correlation_id);

    let pair: PairCreatedV1 = event.payload_as().unwrap();
    assert_eq!(pair.finding_id, FindingId::new("F1"));
    assert_eq!(pair.fix_commit_sha.as_str(), "c2bbbbb");
    assert_eq!(pair.confidence_score, 0.95);
    assert!(pair.disappearance_confirmed);
    assert_eq!(pair.pairing_type, PairingType::Autofix);

    harness.fleet.drain().await;
}

#[tokio::test]
async fn unconfirmed_pair_persists_without_announcement() {
    let harness = harness();
    let correlation_id = CorrelationId::new();

    let out_topic = harness
        .contracts
        .publish_topic(EventKind::PairCreated, 1)
        .unwrap()
        .clone();
    let mut announced = harness.bus.subscribe(&out_topic, 8).await.unwrap();

    harness.fleet.start(&harness.contracts).await.unwrap();
    publish(&harness, EventKind::FindingObserved, &envelope(finding(), correlation_id)).await;
    publish(&harness, EventKind::FixApplied, &envelope(fix(), correlation_id)).await;

    wait_for_pair(&harness.store).await;

    let pair = harness
        .store
        .get_pair(&FindingId::new("F1"), "c2bbbbb")
        .await
        .unwrap()
        .unwrap();
    assert!(!pair.disappearance_confirmed);
    assert_eq!(pair.confidence_score, 0.95);
    assert!(announced.receiver.try_recv().is_err());

    harness.fleet.drain().await;
}

#[tokio::test]
async fn duplicate_delivery_is_observationally_idempotent() {
    let harness = harness();
    let correlation_id = CorrelationId::new();

    harness.fleet.start(&harness.contracts).await.unwrap();
    publish(&harness, EventKind::FindingObserved, &envelope(finding(), correlation_id)).await;

    let fix_envelope = envelope(fix(), correlation_id);
    publish(&harness, EventKind::FixApplied, &fix_envelope).await;
    // Redelivery of the exact same message.
    publish(&harness, EventKind::FixApplied, &fix_envelope).await;

    wait_for_pair(&harness.store).await;
    // Give the duplicate time to flow through before asserting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pairs = harness.store.pairs_above_floor(0.0).await.unwrap();
    assert_eq!(pairs.len(), 1);

    harness.fleet.drain().await;
}
