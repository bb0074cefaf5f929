use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mnemon_domain::{Envelope, ErrorKind, MessageId};
use tracing::{debug, info, warn};

use crate::budget::{BudgetConfig, FailureBudget};
use crate::handler::{HandlerContext, Outcome};
use crate::quarantine::QuarantineSink;
use crate::registry::HandlerRegistry;

const BACKOFF_FLOOR: Duration = Duration::from_secs(1);
const BACKOFF_CEILING: Duration = Duration::from_secs(300);

/// What the dispatcher tells the consumer to do with the delivery.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// Commit the offset and emit the produced events.
    Completed(Vec<Envelope>),
    /// Do not commit; redeliver after the backoff.
    Redeliver { reason: String, backoff: Duration },
    /// Commit the offset; the message is recorded in the quarantine sink.
    Quarantined { kind: ErrorKind, reason: String },
    /// Circuit open for this kind: do not accept, let lag build upstream.
    Refused { reason: String },
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Per-handler deadline; the effective deadline may be shortened by the
    /// remaining lease inside FSM-touching handlers.
    pub handler_timeout: Duration,
    pub budget: BudgetConfig,
    /// Bound of the completed-message idempotency cache.
    pub seen_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_secs(60),
            budget: BudgetConfig::default(),
            seen_capacity: 65_536,
        }
    }
}

/// Bounded set of already-completed message ids. Keyed by `message_id`, so
/// redelivery invalidates correctly: a failed delivery is never recorded and
/// the retry goes back through its handler.
#[derive(Default)]
struct SeenCache {
    set: HashSet<MessageId>,
    order: VecDeque<MessageId>,
    capacity: usize,
}

impl SeenCache {
    fn new(capacity: usize) -> Self {
        Self { set: HashSet::new(), order: VecDeque::new(), capacity }
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.set.contains(id)
    }

    fn insert(&mut self, id: MessageId) {
        if self.set.insert(id) {
            self.order.push_back(id);
            if self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.set.remove(&evicted);
                }
            }
        }
    }
}

/// Routes envelopes to handlers and converts handler outcomes into
/// retry / reject / quarantine decisions.
///
/// Built once at startup around the read-only registry; the only mutable
/// state is the failure budget and the completed-message cache, both of
/// which tolerate redelivery by construction.
pub struct Dispatcher {
    registry: HandlerRegistry,
    budget: FailureBudget,
    quarantine: Arc<QuarantineSink>,
    seen: Mutex<SeenCache>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        registry: HandlerRegistry,
        quarantine: Arc<QuarantineSink>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            budget: FailureBudget::new(config.budget.clone()),
            quarantine,
            seen: Mutex::new(SeenCache::new(config.seen_capacity)),
            config,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn quarantine(&self) -> &QuarantineSink {
        &self.quarantine
    }

    /// Kinds currently refused because their circuit is open.
    pub fn open_circuits(&self, now: DateTime<Utc>) -> Vec<mnemon_domain::EventKind> {
        self.budget.open_kinds(now)
    }

    /// Dispatch one delivery. `now` is the delivery clock reading injected
    /// by the consumer; the dispatcher never consults a clock of its own.
    pub async fn dispatch(&self, envelope: &Envelope, now: DateTime<Utc>) -> DispatchOutcome {
        // A message that already completed is not re-handled: same DB state,
        // no duplicate downstream events.
        if self
            .seen
            .lock()
            .expect("seen lock poisoned")
            .contains(&envelope.message_id)
        {
            debug!(message_id = %envelope.message_id, "duplicate delivery collapsed");
            return DispatchOutcome::Completed(vec![]);
        }

        if self.budget.is_open(envelope.kind, now) {
            return DispatchOutcome::Refused {
                reason: format!("circuit open for kind {}", envelope.kind),
            };
        }

        let handler = match self.registry.lookup(envelope.kind, envelope.schema_version) {
            Some(handler) => handler,
            None => {
                // A version newer than anything registered is a schema
                // violation; a kind with no route at all is unroutable.
                // Both are non-retryable and quarantine the message.
                let (kind, reason) = match self.registry.max_version(envelope.kind) {
                    Some(max) if envelope.schema_version > max => (
                        ErrorKind::SchemaViolation,
                        format!(
                            "schema_version {} exceeds supported v{max} for kind {}",
                            envelope.schema_version, envelope.kind
                        ),
                    ),
                    _ => (
                        ErrorKind::Quarantined,
                        format!(
                            "no handler for ({}, v{})",
                            envelope.kind, envelope.schema_version
                        ),
                    ),
                };
                self.quarantine.push(envelope, kind, &reason, now);
                return DispatchOutcome::Quarantined { kind, reason };
            }
        };

        let ctx = HandlerContext::new(envelope.correlation_id, now, self.config.handler_timeout);
        let outcome = match tokio::time::timeout(
            self.config.handler_timeout,
            handler.handle(envelope, &ctx),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                // Deadline expiry is never success; count it and redeliver.
                warn!(
                    handler = handler.name(),
                    message_id = %envelope.message_id,
                    correlation_id = %envelope.correlation_id,
                    timeout_s = self.config.handler_timeout.as_secs(),
                    "handler deadline expired"
                );
                Outcome::retry(ErrorKind::TransientIo, "handler deadline expired")
            }
        };

        match outcome {
            Outcome::Ok(produced) => {
                self.budget.record_success(envelope.kind);
                self.seen
                    .lock()
                    .expect("seen lock poisoned")
                    .insert(envelope.message_id);
                info!(
                    handler = handler.name(),
                    message_id = %envelope.message_id,
                    correlation_id = %envelope.correlation_id,
                    produced = produced.len(),
                    "handled"
                );
                DispatchOutcome::Completed(produced)
            }
            Outcome::Retry { kind, reason, backoff_hint } => {
                warn!(
                    handler = handler.name(),
                    message_id = %envelope.message_id,
                    correlation_id = %envelope.correlation_id,
                    error_kind = %kind,
                    reason = %reason,
                    "retryable failure"
                );
                if kind == ErrorKind::TransientIo {
                    self.budget.record_failure(envelope.kind, now);
                }
                let backoff = backoff_hint
                    .unwrap_or(BACKOFF_FLOOR)
                    .clamp(BACKOFF_FLOOR, BACKOFF_CEILING);
                DispatchOutcome::Redeliver { reason, backoff }
            }
            Outcome::Reject { kind, reason } => {
                self.budget.record_failure(envelope.kind, now);
                self.quarantine.push(envelope, kind, &reason, now);
                DispatchOutcome::Quarantined { kind, reason }
            }
        }
    }
}
