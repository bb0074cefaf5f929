use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::CorrelationId;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    #[error("invalid commit sha '{0}': expected 7-40 hex characters")]
    InvalidCommitSha(String),

    #[error("invalid line range: start {start} > end {end}")]
    InvalidLineRange { start: u32, end: u32 },

    #[error("invalid field {field}: {message}")]
    InvalidField { field: &'static str, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ── Error taxonomy ────────────────────────────────────────────────────────────

/// Domain failure categories. These are data, not exception types: handlers
/// return them across the dispatch boundary and the dispatcher maps each
/// category to a retry / reject / quarantine decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Envelope or payload fails schema. Non-retryable; quarantine.
    SchemaViolation,
    /// FSM or lifecycle edge not allowed. Non-retryable.
    InvalidTransition,
    /// Lease expired or stolen. Retryable after re-propose.
    StaleLease,
    /// Lost a compare-and-set race. Retryable on redelivery only.
    Conflict,
    /// DB / bus / memory-service unavailable. Retryable with backoff.
    TransientIo,
    /// Missing required configuration. Fatal at startup.
    FatalConfig,
    /// Handler permanently rejected the message.
    Quarantined,
}

impl ErrorKind {
    /// Whether the dispatcher may redeliver a message that failed this way.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::StaleLease | ErrorKind::Conflict | ErrorKind::TransientIo
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::SchemaViolation => "schema_violation",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::StaleLease => "stale_lease",
            ErrorKind::Conflict => "conflict",
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::FatalConfig => "fatal_config",
            ErrorKind::Quarantined => "quarantined",
        };
        write!(f, "{}", s)
    }
}

/// A structured failure travelling across a handler boundary.
///
/// Carries the correlation id end-to-end so a downstream reader can pair
/// every failure with the command that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub correlation_id: CorrelationId,
    pub message: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, correlation_id: CorrelationId, message: impl Into<String>) -> Self {
        Self { kind, correlation_id, message: message.into() }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} [{}]", self.kind, self.message, self.correlation_id)
    }
}
