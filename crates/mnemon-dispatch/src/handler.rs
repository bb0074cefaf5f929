use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemon_domain::{CorrelationId, Envelope, ErrorKind};

/// What a handler reports back across the dispatch boundary. Handlers never
/// panic outward; every domain failure is one of these values.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Handled; the produced events are emitted atomically with the commit
    /// of the inbound offset.
    Ok(Vec<Envelope>),
    /// Transient failure; redeliver after the hinted backoff.
    Retry {
        kind: ErrorKind,
        reason: String,
        backoff_hint: Option<Duration>,
    },
    /// Permanent failure; the message goes to the quarantine sink.
    Reject { kind: ErrorKind, reason: String },
}

impl Outcome {
    pub fn ok(events: Vec<Envelope>) -> Self {
        Outcome::Ok(events)
    }

    pub fn retry(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Outcome::Retry { kind, reason: reason.into(), backoff_hint: None }
    }

    pub fn retry_after(kind: ErrorKind, reason: impl Into<String>, backoff: Duration) -> Self {
        Outcome::Retry {
            kind,
            reason: reason.into(),
            backoff_hint: Some(backoff),
        }
    }

    pub fn reject(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Outcome::Reject { kind, reason: reason.into() }
    }
}

/// Per-invocation context threaded into every handler: the correlation id,
/// the delivery clock reading, and the enforced deadline. Handlers read time
/// from here, never from a global clock.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub correlation_id: CorrelationId,
    pub now: DateTime<Utc>,
    pub deadline: Duration,
    /// Delivery attempt, starting at 1. Redeliveries increment it.
    pub attempt: u32,
}

impl HandlerContext {
    pub fn new(correlation_id: CorrelationId, now: DateTime<Utc>, deadline: Duration) -> Self {
        Self { correlation_id, now, deadline, attempt: 1 }
    }
}

/// A message handler. One handler owns one `(kind, schema_version)` route.
///
/// Implementations must be idempotent keyed by the envelope's `message_id`:
/// at-least-once delivery makes duplicates a certainty, not an edge case.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Short stable name used in logs and failure budgets.
    fn name(&self) -> &'static str;

    async fn handle(&self, envelope: &Envelope, ctx: &HandlerContext) -> Outcome;
}
