use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;
use crate::ids::{CorrelationId, MessageId, ProducerId};

// ── Message kinds ─────────────────────────────────────────────────────────────

/// Routing discriminator for every envelope crossing a component boundary.
///
/// The set is closed: a kind string outside this enum is a schema violation,
/// not a silently-ignored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // Commands
    LearnPatterns,
    PromotePattern,
    DeprecatePattern,
    DisablePattern,
    ArchivePattern,
    // Events
    FindingObserved,
    FixApplied,
    FindingResolved,
    PairCreated,
    PatternLifecycleTransition,
    PatternLearned,
    PatternStored,
    PatternPromoted,
    PatternDeprecated,
    SessionOutcome,
    ClaudeHookEvent,
    IntentClassified,
    PatternInjected,
}

/// Topic kind-qualifier: commands ride `cmd` topics, events ride `evt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindQualifier {
    Cmd,
    Evt,
}

impl std::fmt::Display for KindQualifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KindQualifier::Cmd => write!(f, "cmd"),
            KindQualifier::Evt => write!(f, "evt"),
        }
    }
}

impl EventKind {
    pub const ALL: &'static [EventKind] = &[
        EventKind::LearnPatterns,
        EventKind::PromotePattern,
        EventKind::DeprecatePattern,
        EventKind::DisablePattern,
        EventKind::ArchivePattern,
        EventKind::FindingObserved,
        EventKind::FixApplied,
        EventKind::FindingResolved,
        EventKind::PairCreated,
        EventKind::PatternLifecycleTransition,
        EventKind::PatternLearned,
        EventKind::PatternStored,
        EventKind::PatternPromoted,
        EventKind::PatternDeprecated,
        EventKind::SessionOutcome,
        EventKind::ClaudeHookEvent,
        EventKind::IntentClassified,
        EventKind::PatternInjected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::LearnPatterns => "learn_patterns",
            EventKind::PromotePattern => "promote_pattern",
            EventKind::DeprecatePattern => "deprecate_pattern",
            EventKind::DisablePattern => "disable_pattern",
            EventKind::ArchivePattern => "archive_pattern",
            EventKind::FindingObserved => "finding_observed",
            EventKind::FixApplied => "fix_applied",
            EventKind::FindingResolved => "finding_resolved",
            EventKind::PairCreated => "pair_created",
            EventKind::PatternLifecycleTransition => "pattern_lifecycle_transition",
            EventKind::PatternLearned => "pattern_learned",
            EventKind::PatternStored => "pattern_stored",
            EventKind::PatternPromoted => "pattern_promoted",
            EventKind::PatternDeprecated => "pattern_deprecated",
            EventKind::SessionOutcome => "session_outcome",
            EventKind::ClaudeHookEvent => "claude_hook_event",
            EventKind::IntentClassified => "intent_classified",
            EventKind::PatternInjected => "pattern_injected",
        }
    }

    pub fn parse(s: &str) -> Result<EventKind, DomainError> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DomainError::UnknownKind(s.to_string()))
    }

    pub fn qualifier(&self) -> KindQualifier {
        match self {
            EventKind::LearnPatterns
            | EventKind::PromotePattern
            | EventKind::DeprecatePattern
            | EventKind::DisablePattern
            | EventKind::ArchivePattern => KindQualifier::Cmd,
            _ => KindQualifier::Evt,
        }
    }

    /// The schema version this binary produces and recognizes for the kind.
    /// Reading a higher version is a schema violation, never a silent drop.
    pub fn current_version(&self) -> u32 {
        1
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// The frozen wrapper around every inter-component message.
///
/// Envelopes are constructed once by a producer and never mutated after
/// emission. The field set is closed: unknown top-level fields fail
/// deserialization rather than being dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub message_id: MessageId,
    pub kind: EventKind,
    pub schema_version: u32,
    pub correlation_id: CorrelationId,
    pub producer_id: ProducerId,
    pub occurred_at: DateTime<Utc>,
    pub payload: Value,
}

impl Envelope {
    /// Build an envelope around an already-serialized payload.
    ///
    /// `occurred_at` is always supplied by the producer; there is no
    /// implicit clock here.
    pub fn new(
        kind: EventKind,
        correlation_id: CorrelationId,
        producer_id: ProducerId,
        occurred_at: DateTime<Utc>,
        payload: Value,
    ) -> Self {
        Self {
            message_id: MessageId::new(),
            kind,
            schema_version: kind.current_version(),
            correlation_id,
            producer_id,
            occurred_at,
            payload,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DomainError> {
        serde_json::to_vec(self).map_err(DomainError::Serialization)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Envelope, DomainError> {
        serde_json::from_slice(bytes).map_err(DomainError::Serialization)
    }

    /// Deserialize the payload into its typed schema struct.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, DomainError> {
        serde_json::from_value(self.payload.clone()).map_err(DomainError::Serialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope() -> Envelope {
        Envelope::new(
            EventKind::FindingObserved,
            CorrelationId::new(),
            ProducerId::new("review-ingest"),
            "2026-03-01T12:00:00Z".parse().unwrap(),
            json!({"finding_id": "F1"}),
        )
    }

    #[test]
    fn round_trips_bit_exact() {
        let e = envelope();
        let back = Envelope::from_bytes(&e.to_bytes().unwrap()).unwrap();
        assert_eq!(e, back);
    }

    #[test]
    fn unknown_top_level_field_is_rejected() {
        let mut v = serde_json::to_value(envelope()).unwrap();
        v.as_object_mut()
            .unwrap()
            .insert("surprise".into(), json!(1));
        let err = serde_json::from_value::<Envelope>(v);
        assert!(err.is_err());
    }

    #[test]
    fn kind_strings_are_stable() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()).unwrap(), *kind);
        }
        assert!(EventKind::parse("no_such_kind").is_err());
    }

    #[test]
    fn commands_ride_cmd_topics() {
        assert_eq!(EventKind::PromotePattern.qualifier(), KindQualifier::Cmd);
        assert_eq!(EventKind::PairCreated.qualifier(), KindQualifier::Evt);
    }

    #[test]
    fn timestamps_serialize_with_trailing_z() {
        let e = envelope();
        let v = serde_json::to_value(&e).unwrap();
        let ts = v["occurred_at"].as_str().unwrap();
        assert!(ts.ends_with('Z'), "got {ts}");
    }
}
