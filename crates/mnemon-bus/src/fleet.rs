use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use mnemon_contracts::ResolvedContracts;
use mnemon_dispatch::{DispatchOutcome, Dispatcher};
use mnemon_domain::Envelope;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bus::MessageBus;
use crate::error::BusError;
use crate::producer::Producer;

#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Bounded work-queue capacity per subscription.
    pub queue_capacity: usize,
    /// How long `drain` waits for in-flight work before aborting workers.
    pub drain_deadline: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            drain_deadline: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetStatus {
    /// Constructed, not started. The read-only mode when the activation
    /// gate is unset.
    Idle,
    Running,
    /// Bus configured but unreachable: consumer work refused, health
    /// endpoint reports it.
    Degraded(String),
    Draining,
    Stopped,
}

/// One worker per contracted subscription topic.
///
/// The subscription set comes entirely from the resolved contracts; there
/// is no other source of topic names. Each worker drains its own bounded
/// queue strictly sequentially, which is what preserves per-partition FIFO.
pub struct ConsumerFleet {
    bus: Arc<dyn MessageBus>,
    dispatcher: Arc<Dispatcher>,
    producer: Arc<Producer>,
    config: FleetConfig,
    status: watch::Sender<FleetStatus>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    malformed: Arc<AtomicU64>,
}

impl ConsumerFleet {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        dispatcher: Arc<Dispatcher>,
        producer: Arc<Producer>,
        config: FleetConfig,
    ) -> Self {
        let (status, _) = watch::channel(FleetStatus::Idle);
        let (shutdown, _) = watch::channel(false);
        Self {
            bus,
            dispatcher,
            producer,
            config,
            status,
            shutdown,
            workers: Mutex::new(Vec::new()),
            malformed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn status(&self) -> watch::Receiver<FleetStatus> {
        self.status.subscribe()
    }

    /// Deliveries whose envelope failed to deserialize. Never silently
    /// dropped: logged, counted, surfaced on /status.
    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Record that the bus was configured but unreachable at startup. The
    /// service keeps running read-only; consumer-driven work is refused.
    pub fn mark_degraded(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "consumer fleet degraded");
        let _ = self.status.send(FleetStatus::Degraded(reason));
    }

    /// Subscribe to exactly the contracted topics and spawn one worker per
    /// subscription. Fails fast when any subscription cannot be
    /// established.
    pub async fn start(&self, contracts: &ResolvedContracts) -> Result<(), BusError> {
        let mut spawned = Vec::with_capacity(contracts.subscriptions.len());
        for binding in &contracts.subscriptions {
            let subscription = self
                .bus
                .subscribe(&binding.topic, self.config.queue_capacity)
                .await?;
            info!(topic = %binding.topic, kind = %binding.kind, "subscribed");

            let dispatcher = self.dispatcher.clone();
            let producer = self.producer.clone();
            let mut shutdown = self.shutdown.subscribe();
            let malformed = self.malformed.clone();

            let mut receiver = subscription.receiver;
            let topic = binding.topic.clone();
            spawned.push(tokio::spawn(async move {
                loop {
                    let delivery = tokio::select! {
                        _ = shutdown.changed() => break,
                        delivery = receiver.recv() => match delivery {
                            Some(delivery) => delivery,
                            None => break,
                        },
                    };

                    let envelope = match Envelope::from_bytes(&delivery.payload) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            malformed.fetch_add(1, Ordering::Relaxed);
                            warn!(topic = %topic, error = %e, "malformed envelope");
                            continue;
                        }
                    };

                    process_delivery(&dispatcher, &producer, &envelope, &mut shutdown).await;
                }
                info!(topic = %topic, "worker stopped");
            }));
        }

        let worker_count = spawned.len();
        self.workers
            .lock()
            .expect("workers lock poisoned")
            .extend(spawned);
        let _ = self.status.send(FleetStatus::Running);
        info!(workers = worker_count, "consumer fleet started");
        Ok(())
    }

    /// Stop intake, let in-flight handlers finish up to the drain deadline,
    /// then abort whatever is left. Offsets for unfinished work are never
    /// committed, so that work is redelivered.
    pub async fn drain(&self) {
        let _ = self.status.send(FleetStatus::Draining);
        let _ = self.shutdown.send(true);

        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.workers.lock().expect("workers lock poisoned");
            guard.drain(..).collect()
        };
        for worker in workers {
            if tokio::time::timeout(self.config.drain_deadline, worker)
                .await
                .is_err()
            {
                warn!("worker exceeded drain deadline, aborted");
            }
        }
        let _ = self.status.send(FleetStatus::Stopped);
        info!("consumer fleet drained");
    }
}

/// Drive one envelope to completion: dispatch, emit produced events, and
/// honor redeliver/refused outcomes with in-worker backoff. Per-topic FIFO
/// holds because this never returns until the message reaches a terminal
/// outcome or shutdown interrupts the wait.
async fn process_delivery(
    dispatcher: &Dispatcher,
    producer: &Producer,
    envelope: &Envelope,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let outcome = dispatcher.dispatch(envelope, Utc::now()).await;
        match outcome {
            DispatchOutcome::Completed(produced) => {
                // Produced events are emitted before the offset commit
                // (queue pop); a crash in between re-runs the handler and
                // the emit cache collapses the duplicates.
                if let Err(e) = producer.emit_all(&produced).await {
                    warn!(
                        message_id = %envelope.message_id,
                        correlation_id = %envelope.correlation_id,
                        error = %e,
                        "emit failed, will retry delivery"
                    );
                    if wait_or_shutdown(Duration::from_secs(1), shutdown).await {
                        return;
                    }
                    continue;
                }
                return;
            }
            DispatchOutcome::Quarantined { .. } => return,
            DispatchOutcome::Redeliver { backoff, .. } => {
                // Exponential growth per attempt on top of the hint.
                let factor = 1u32 << attempt.min(8);
                let delay = backoff
                    .saturating_mul(factor)
                    .min(Duration::from_secs(300));
                if wait_or_shutdown(delay, shutdown).await {
                    return;
                }
            }
            DispatchOutcome::Refused { .. } => {
                if wait_or_shutdown(Duration::from_secs(5), shutdown).await {
                    return;
                }
            }
        }
    }
}

/// Sleep, but wake immediately on shutdown. Returns true when shutting down.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown.changed() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalBus;
    use async_trait::async_trait;
    use mnemon_contracts::{load_contracts, resolve};
    use mnemon_dispatch::{
        DispatcherConfig, Handler, HandlerContext, HandlerRegistry, Outcome, QuarantineSink,
    };
    use mnemon_domain::{CorrelationId, EventKind, EventPayload, ProducerId};
    use std::sync::atomic::AtomicU32;

    fn fixture_contracts() -> ResolvedContracts {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("fleet.contract.yml"),
            r#"
name: fleet-test
subscribe:
  - topic: test.mnemon.evt.suite.finding-observed.v1
    kind: finding_observed
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

    struct CountingHandler {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Handler for CountingHandler {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle(&self, _envelope: &Envelope, _ctx: &HandlerContext) -> Outcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Outcome::Ok(vec![])
        }
    }

    fn finding_envelope() -> Envelope {
        mnemon_domain::FindingObservedV1 {
            finding_id: mnemon_domain::FindingId::new("F1"),
            repo: "org/repo".into(),
            pr_id: 1,
            rule_id: "r1".into(),
            severity: mnemon_domain::Severity::Warning,
            file_path: "src/lib.rs".into(),
            line_start: 1,
            line_end: None,
            tool_name: "lint".into(),
            tool_version: "1".into(),
            normalized_message: "m".into(),
            raw_message: "m".into(),
            commit_sha_observed: mnemon_domain::CommitSha("abc1234".into()),
            observed_at: "2026-03-01T00:00:00Z".parse().unwrap(),
        }
        .into_envelope(
            CorrelationId::new(),
            ProducerId::new("suite"),
            "2026-03-01T00:00:01Z".parse().unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn fleet_consumes_contracted_topic_end_to_end() {
        let contracts = fixture_contracts();
        let bus: Arc<LocalBus> = Arc::new(LocalBus::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut registry = HandlerRegistry::new();
        registry
            .register(
                EventKind::FindingObserved,
                1,
                Arc::new(CountingHandler { calls: calls.clone() }),
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
            FleetConfig { queue_capacity: 8, drain_deadline: Duration::from_secs(5) },
        );

        fleet.start(&contracts).await.unwrap();
        assert_eq!(*fleet.status().borrow(), FleetStatus::Running);

        let topic = contracts.subscriptions[0].topic.clone();
        bus.publish(&topic, finding_envelope().to_bytes().unwrap())
            .await
            .unwrap();

        // The worker runs on its own task; give it a moment.
        tokio::time::timeout(Duration::from_secs(2), async {
            while calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handler should have run");

        fleet.drain().await;
        assert_eq!(*fleet.status().borrow(), FleetStatus::Stopped);
    }

    #[tokio::test]
    async fn malformed_payloads_are_counted_not_lost() {
        let contracts = fixture_contracts();
        let bus: Arc<LocalBus> = Arc::new(LocalBus::new());
        let dispatcher = Arc::new(Dispatcher::new(
            HandlerRegistry::new(),
            Arc::new(QuarantineSink::default()),
            DispatcherConfig::default(),
        ));
        let producer = Arc::new(Producer::new(bus.clone(), contracts.clone()));
        let fleet = ConsumerFleet::new(bus.clone(), dispatcher, producer, FleetConfig::default());

        fleet.start(&contracts).await.unwrap();
        let topic = contracts.subscriptions[0].topic.clone();
        bus.publish(&topic, b"not json".to_vec()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while fleet.malformed_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("malformed delivery should be counted");

        fleet.drain().await;
    }
}
