use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PatternId, RunId, SessionId};

/// Per-session routing outcome, keyed uniquely by `session_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingFeedbackScore {
    pub session_id: SessionId,
    pub agent_selected: String,
    /// The agent the router recommended for this session; equality with
    /// `agent_selected` is one leg of the session-success predicate.
    pub agent_recommended: String,
    pub routing_confidence: f64,
    pub injection_occurred: bool,
    pub patterns_injected_count: i64,
    pub tool_calls_count: i64,
    pub duration_ms: i64,
    pub processed_at: DateTime<Utc>,
}

impl RoutingFeedbackScore {
    /// The session-success predicate: correct routing, at least one tool
    /// call, and a duration under the domain's configured ceiling.
    pub fn is_success(&self, duration_ceiling_ms: i64) -> bool {
        self.agent_selected == self.agent_recommended
            && self.tool_calls_count > 0
            && self.duration_ms < duration_ceiling_ms
    }
}

/// Records that patterns were surfaced to a consumer for a run. The
/// `pattern_ids` array carries no database-level FK; the application layer
/// is the integrity authority. Empty arrays are valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternInjection {
    pub session_id: SessionId,
    pub run_id: RunId,
    pub pattern_ids: Vec<PatternId>,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(selected: &str, recommended: &str, tools: i64, ms: i64) -> RoutingFeedbackScore {
        RoutingFeedbackScore {
            session_id: SessionId::new("s1"),
            agent_selected: selected.into(),
            agent_recommended: recommended.into(),
            routing_confidence: 0.9,
            injection_occurred: true,
            patterns_injected_count: 2,
            tool_calls_count: tools,
            duration_ms: ms,
            processed_at: "2026-03-01T00:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn success_requires_all_three_legs() {
        let ceiling = 900_000;
        assert!(score("rust-agent", "rust-agent", 3, 10_000).is_success(ceiling));
        assert!(!score("rust-agent", "go-agent", 3, 10_000).is_success(ceiling));
        assert!(!score("rust-agent", "rust-agent", 0, 10_000).is_success(ceiling));
        assert!(!score("rust-agent", "rust-agent", 3, 900_000).is_success(ceiling));
    }

    #[test]
    fn empty_injection_array_is_valid() {
        let inj = PatternInjection {
            session_id: SessionId::new("s1"),
            run_id: RunId::new("r1"),
            pattern_ids: vec![],
            occurred_at: "2026-03-01T00:00:00Z".parse().unwrap(),
        };
        let json = serde_json::to_string(&inj).unwrap();
        let back: PatternInjection = serde_json::from_str(&json).unwrap();
        assert!(back.pattern_ids.is_empty());
    }
}
