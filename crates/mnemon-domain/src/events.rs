use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{Envelope, EventKind};
use crate::error::DomainError;
use crate::ids::{
    CorrelationId, DomainId, EventId, FindingId, FixId, PairId, PatternId, ProducerId,
    ResolutionId, RunId, SessionId,
};
use crate::patterns::PatternStatus;
use crate::review::{CommitSha, LineRange, PairingType, Severity};

/// A typed payload schema bound to one `(kind, version)` pair.
///
/// Payloads build their own envelope so the wire shape is produced in
/// exactly one place; `occurred_at` is injected by the caller, never read
/// from a clock here.
pub trait EventPayload: Serialize + Sized {
    const KIND: EventKind;

    /// Field-level checks beyond what serde enforces structurally.
    fn validate(&self) -> Result<(), DomainError> {
        Ok(())
    }

    fn into_envelope(
        self,
        correlation_id: CorrelationId,
        producer_id: ProducerId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Envelope, DomainError> {
        self.validate()?;
        Ok(Envelope::new(
            Self::KIND,
            correlation_id,
            producer_id,
            occurred_at,
            serde_json::to_value(&self)?,
        ))
    }
}

// ── Review events ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FindingObservedV1 {
    pub finding_id: FindingId,
    pub repo: String,
    pub pr_id: i64,
    pub rule_id: String,
    pub severity: Severity,
    pub file_path: String,
    pub line_start: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<u32>,
    pub tool_name: String,
    pub tool_version: String,
    pub normalized_message: String,
    pub raw_message: String,
    pub commit_sha_observed: CommitSha,
    pub observed_at: DateTime<Utc>,
}

impl EventPayload for FindingObservedV1 {
    const KIND: EventKind = EventKind::FindingObserved;

    fn validate(&self) -> Result<(), DomainError> {
        if self.pr_id <= 0 {
            return Err(DomainError::InvalidField {
                field: "pr_id",
                message: format!("must be positive, got {}", self.pr_id),
            });
        }
        if self.line_start < 1 {
            return Err(DomainError::InvalidField {
                field: "line_start",
                message: format!("must be >= 1, got {}", self.line_start),
            });
        }
        if let Some(end) = self.line_end {
            if end < self.line_start {
                return Err(DomainError::InvalidLineRange {
                    start: self.line_start,
                    end,
                });
            }
        }
        CommitSha::parse(self.commit_sha_observed.as_str())?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixAppliedV1 {
    pub fix_id: FixId,
    pub finding_id: FindingId,
    pub fix_commit_sha: CommitSha,
    pub file_path: String,
    pub diff_hunks: Vec<String>,
    pub touched_line_range: LineRange,
    pub tool_autofix: bool,
    pub applied_at: DateTime<Utc>,
}

impl EventPayload for FixAppliedV1 {
    const KIND: EventKind = EventKind::FixApplied;

    fn validate(&self) -> Result<(), DomainError> {
        CommitSha::parse(self.fix_commit_sha.as_str())?;
        LineRange::new(self.touched_line_range.start(), self.touched_line_range.end())?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FindingResolvedV1 {
    pub resolution_id: ResolutionId,
    pub finding_id: FindingId,
    pub fix_commit_sha: CommitSha,
    pub verified_at_commit_sha: CommitSha,
    pub ci_run_id: RunId,
    pub resolved_at: DateTime<Utc>,
}

impl EventPayload for FindingResolvedV1 {
    const KIND: EventKind = EventKind::FindingResolved;

    fn validate(&self) -> Result<(), DomainError> {
        CommitSha::parse(self.fix_commit_sha.as_str())?;
        CommitSha::parse(self.verified_at_commit_sha.as_str())?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PairCreatedV1 {
    pub pair_id: PairId,
    pub finding_id: FindingId,
    pub fix_commit_sha: CommitSha,
    pub diff_hunks: Vec<String>,
    pub confidence_score: f64,
    pub disappearance_confirmed: bool,
    pub pairing_type: PairingType,
    pub created_at: DateTime<Utc>,
}

impl EventPayload for PairCreatedV1 {
    const KIND: EventKind = EventKind::PairCreated;

    fn validate(&self) -> Result<(), DomainError> {
        if !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(DomainError::InvalidField {
                field: "confidence_score",
                message: format!("must be in [0, 1], got {}", self.confidence_score),
            });
        }
        Ok(())
    }
}

// ── Session events ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionOutcomeV1 {
    pub session_id: SessionId,
    pub agent_selected: String,
    pub agent_recommended: String,
    pub routing_confidence: f64,
    pub injection_occurred: bool,
    pub patterns_injected_count: i64,
    pub tool_calls_count: i64,
    pub duration_ms: i64,
    pub ended_at: DateTime<Utc>,
}

impl EventPayload for SessionOutcomeV1 {
    const KIND: EventKind = EventKind::SessionOutcome;

    fn validate(&self) -> Result<(), DomainError> {
        if !(0.0..=1.0).contains(&self.routing_confidence) {
            return Err(DomainError::InvalidField {
                field: "routing_confidence",
                message: format!("must be in [0, 1], got {}", self.routing_confidence),
            });
        }
        Ok(())
    }
}

/// Developer-activity hook categories arriving from the editor side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    SessionStarted,
    SessionEnded,
    ToolInvoked,
    FileEdited,
    CommandRun,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaudeHookEventV1 {
    pub session_id: SessionId,
    pub hook: HookKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub detail: Value,
    pub hooked_at: DateTime<Utc>,
}

impl EventPayload for ClaudeHookEventV1 {
    const KIND: EventKind = EventKind::ClaudeHookEvent;
}

/// What a session appears to be doing, derived purely from its hook events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Implement,
    Refactor,
    Debug,
    Review,
    Explore,
    Unknown,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Intent::Implement => "implement",
            Intent::Refactor => "refactor",
            Intent::Debug => "debug",
            Intent::Review => "review",
            Intent::Explore => "explore",
            Intent::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntentClassifiedV1 {
    pub session_id: SessionId,
    pub intent: Intent,
    pub confidence: f64,
    pub classified_at: DateTime<Utc>,
}

impl EventPayload for IntentClassifiedV1 {
    const KIND: EventKind = EventKind::IntentClassified;

    fn validate(&self) -> Result<(), DomainError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(DomainError::InvalidField {
                field: "confidence",
                message: format!("must be in [0, 1], got {}", self.confidence),
            });
        }
        Ok(())
    }
}

// ── Learning command & pattern events ────────────────────────────────────────

/// One entry of a session's recorded tool/event stream, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub seq: u64,
    pub tool_name: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub success: bool,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub detail: Value,
}

/// Command that invokes the pattern-learning pipeline for a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LearnPatternsV1 {
    pub session_id: SessionId,
    pub domain_id: DomainId,
    pub trace: Vec<TraceEvent>,
}

impl EventPayload for LearnPatternsV1 {
    const KIND: EventKind = EventKind::LearnPatterns;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternLearnedV1 {
    pub event_id: EventId,
    pub pattern_id: PatternId,
    pub domain_id: DomainId,
    pub signature_hash: String,
    pub version: i32,
    pub learned_at: DateTime<Utc>,
}

impl EventPayload for PatternLearnedV1 {
    const KIND: EventKind = EventKind::PatternLearned;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternStoredV1 {
    pub event_id: EventId,
    pub pattern_id: PatternId,
    pub stored_at: DateTime<Utc>,
}

impl EventPayload for PatternStoredV1 {
    const KIND: EventKind = EventKind::PatternStored;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternLifecycleTransitionV1 {
    pub event_id: EventId,
    pub pattern_id: PatternId,
    pub from_status: PatternStatus,
    pub to_status: PatternStatus,
    pub actor: String,
    pub reason: String,
    pub transitioned_at: DateTime<Utc>,
}

impl EventPayload for PatternLifecycleTransitionV1 {
    const KIND: EventKind = EventKind::PatternLifecycleTransition;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternPromotedV1 {
    pub event_id: EventId,
    pub pattern_id: PatternId,
    pub from_status: PatternStatus,
    pub to_status: PatternStatus,
    pub promoted_at: DateTime<Utc>,
}

impl EventPayload for PatternPromotedV1 {
    const KIND: EventKind = EventKind::PatternPromoted;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternDeprecatedV1 {
    pub event_id: EventId,
    pub pattern_id: PatternId,
    pub from_status: PatternStatus,
    pub reason: String,
    pub deprecated_at: DateTime<Utc>,
}

impl EventPayload for PatternDeprecatedV1 {
    const KIND: EventKind = EventKind::PatternDeprecated;
}

/// Emitted by the surfacing façade whenever patterns are injected into a
/// session. An empty `pattern_ids` array is a valid observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternInjectedV1 {
    pub session_id: SessionId,
    pub run_id: RunId,
    pub pattern_ids: Vec<PatternId>,
    pub injected_at: DateTime<Utc>,
}

impl EventPayload for PatternInjectedV1 {
    const KIND: EventKind = EventKind::PatternInjected;
}

// ── Lifecycle commands ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromotePatternV1 {
    pub pattern_id: PatternId,
    pub actor: String,
    pub reason: String,
}

impl EventPayload for PromotePatternV1 {
    const KIND: EventKind = EventKind::PromotePattern;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeprecatePatternV1 {
    pub pattern_id: PatternId,
    pub actor: String,
    pub reason: String,
}

impl EventPayload for DeprecatePatternV1 {
    const KIND: EventKind = EventKind::DeprecatePattern;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisablePatternV1 {
    pub pattern_id: PatternId,
    pub pattern_class: String,
    pub actor: String,
    pub reason: String,
}

impl EventPayload for DisablePatternV1 {
    const KIND: EventKind = EventKind::DisablePattern;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchivePatternV1 {
    pub pattern_id: PatternId,
    pub actor: String,
    pub reason: String,
}

impl EventPayload for ArchivePatternV1 {
    const KIND: EventKind = EventKind::ArchivePattern;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding() -> FindingObservedV1 {
        FindingObservedV1 {
            finding_id: FindingId::new("F1"),
            repo: "org/repo".into(),
            pr_id: 12,
            rule_id: "r1".into(),
            severity: Severity::Error,
            file_path: "src/main.rs".into(),
            line_start: 10,
            line_end: Some(12),
            tool_name: "linter".into(),
            tool_version: "2.1.0".into(),
            normalized_message: "unused variable".into(),
            raw_message: "warning: unused variable `x`".into(),
            commit_sha_observed: CommitSha("abc1234".into()),
            observed_at: "2026-03-01T10:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn finding_payload_round_trips() {
        let f = finding();
        let env = f
            .clone()
            .into_envelope(
                CorrelationId::new(),
                ProducerId::new("review-ingest"),
                "2026-03-01T10:00:01Z".parse().unwrap(),
            )
            .unwrap();
        assert_eq!(env.kind, EventKind::FindingObserved);
        assert_eq!(env.schema_version, 1);
        let back: FindingObservedV1 = env.payload_as().unwrap();
        assert_eq!(back, f);
    }

    #[test]
    fn nonpositive_pr_id_is_rejected() {
        let mut f = finding();
        f.pr_id = 0;
        assert!(f.validate().is_err());
    }

    #[test]
    fn line_zero_is_rejected() {
        let mut f = finding();
        f.line_start = 0;
        assert!(f.validate().is_err());
    }

    #[test]
    fn unknown_payload_field_is_schema_error() {
        let mut v = serde_json::to_value(finding()).unwrap();
        v.as_object_mut().unwrap().insert("extra".into(), 1.into());
        assert!(serde_json::from_value::<FindingObservedV1>(v).is_err());
    }

    #[test]
    fn confidence_out_of_range_is_rejected() {
        let p = PairCreatedV1 {
            pair_id: PairId::new(),
            finding_id: FindingId::new("F1"),
            fix_commit_sha: CommitSha("abc1234".into()),
            diff_hunks: vec![],
            confidence_score: 1.5,
            disappearance_confirmed: false,
            pairing_type: PairingType::Inferred,
            created_at: "2026-03-01T00:00:00Z".parse().unwrap(),
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn touched_range_serializes_as_array() {
        let fix = FixAppliedV1 {
            fix_id: FixId::new("X1"),
            finding_id: FindingId::new("F1"),
            fix_commit_sha: CommitSha("abc1234".into()),
            file_path: "src/main.rs".into(),
            diff_hunks: vec!["@@ -9,5 +9,5 @@".into()],
            touched_line_range: LineRange(9, 13),
            tool_autofix: true,
            applied_at: "2026-03-01T10:05:00Z".parse().unwrap(),
        };
        let v = serde_json::to_value(&fix).unwrap();
        assert_eq!(v["touched_line_range"], serde_json::json!([9, 13]));
    }
}
