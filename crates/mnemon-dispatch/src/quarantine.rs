use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use mnemon_domain::{Envelope, ErrorKind, Failure};
use serde::Serialize;
use tracing::warn;

/// One permanently rejected message and the structured failure that
/// rejected it.
#[derive(Debug, Clone, Serialize)]
pub struct QuarantinedMessage {
    pub envelope: Envelope,
    pub failure: Failure,
    pub quarantined_at: DateTime<Utc>,
}

/// Bounded in-process quarantine sink.
///
/// Every non-retryable rejection lands here exactly once, so property-level
/// accounting (`handler_success | handler_failure_event | quarantine_record`)
/// always balances. The newest `capacity` records are kept for the status
/// surface; the log line is the durable trace.
pub struct QuarantineSink {
    capacity: usize,
    records: Mutex<VecDeque<QuarantinedMessage>>,
}

impl QuarantineSink {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, records: Mutex::new(VecDeque::new()) }
    }

    pub fn push(&self, envelope: &Envelope, kind: ErrorKind, reason: &str, now: DateTime<Utc>) {
        let failure = Failure::new(kind, envelope.correlation_id, reason);
        warn!(
            message_id = %envelope.message_id,
            correlation_id = %envelope.correlation_id,
            kind = %envelope.kind,
            failure = %failure,
            "message quarantined"
        );
        let mut guard = self.records.lock().expect("quarantine lock poisoned");
        if guard.len() == self.capacity {
            guard.pop_front();
        }
        guard.push_back(QuarantinedMessage {
            envelope: envelope.clone(),
            failure,
            quarantined_at: now,
        });
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("quarantine lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<QuarantinedMessage> {
        self.records
            .lock()
            .expect("quarantine lock poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for QuarantineSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_domain::{CorrelationId, EventKind, ProducerId};
    use serde_json::json;

    fn envelope() -> Envelope {
        Envelope::new(
            EventKind::FixApplied,
            CorrelationId::new(),
            ProducerId::new("test"),
            "2026-03-01T00:00:00Z".parse().unwrap(),
            json!({}),
        )
    }

    #[test]
    fn record_carries_the_correlation_id() {
        let sink = QuarantineSink::default();
        let env = envelope();
        sink.push(&env, ErrorKind::SchemaViolation, "bad payload", env.occurred_at);

        let records = sink.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].failure.correlation_id, env.correlation_id);
        assert_eq!(records[0].failure.kind, ErrorKind::SchemaViolation);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let sink = QuarantineSink::new(2);
        for _ in 0..3 {
            let env = envelope();
            sink.push(&env, ErrorKind::Quarantined, "nope", env.occurred_at);
        }
        assert_eq!(sink.len(), 2);
    }
}
