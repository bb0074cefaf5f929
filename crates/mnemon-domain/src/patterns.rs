use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{DomainId, PatternId};

// ── Lifecycle status ──────────────────────────────────────────────────────────

/// Lifecycle states of a learned pattern.
///
/// Legal edges:
///   CANDIDATE → PROVISIONAL → VALIDATED → DEPRECATED → ARCHIVED
///   PROVISIONAL → DEPRECATED   (short-circuit on strong negative signal)
/// Self-loops and everything else are invalid transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternStatus {
    Candidate,
    Provisional,
    Validated,
    Deprecated,
    Archived,
}

impl PatternStatus {
    pub const ALL: &'static [PatternStatus] = &[
        PatternStatus::Candidate,
        PatternStatus::Provisional,
        PatternStatus::Validated,
        PatternStatus::Deprecated,
        PatternStatus::Archived,
    ];

    /// The statuses this one may legally move to.
    pub fn legal_targets(&self) -> &'static [PatternStatus] {
        match self {
            PatternStatus::Candidate => &[PatternStatus::Provisional],
            PatternStatus::Provisional => &[PatternStatus::Validated, PatternStatus::Deprecated],
            PatternStatus::Validated => &[PatternStatus::Deprecated],
            PatternStatus::Deprecated => &[PatternStatus::Archived],
            PatternStatus::Archived => &[],
        }
    }

    pub fn can_transition_to(&self, to: PatternStatus) -> bool {
        self.legal_targets().contains(&to)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternStatus::Candidate => "CANDIDATE",
            PatternStatus::Provisional => "PROVISIONAL",
            PatternStatus::Validated => "VALIDATED",
            PatternStatus::Deprecated => "DEPRECATED",
            PatternStatus::Archived => "ARCHIVED",
        }
    }
}

impl std::fmt::Display for PatternStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Success criteria ──────────────────────────────────────────────────────────

/// One weighted boolean predicate inside a pattern's success criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessPredicate {
    pub name: String,
    pub weight: f64,
}

/// Weighted boolean predicates embedded in every learned pattern. A pattern
/// application "succeeds" when the weight of satisfied predicates reaches
/// `threshold` (a fraction of total weight).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriteria {
    pub predicates: Vec<SuccessPredicate>,
    pub threshold: f64,
}

impl SuccessCriteria {
    /// Fraction of total weight satisfied by the named predicates.
    /// Empty criteria score 0.
    pub fn score(&self, satisfied: &[&str]) -> f64 {
        let total: f64 = self.predicates.iter().map(|p| p.weight).sum();
        if total <= 0.0 {
            return 0.0;
        }
        let hit: f64 = self
            .predicates
            .iter()
            .filter(|p| satisfied.contains(&p.name.as_str()))
            .map(|p| p.weight)
            .sum();
        hit / total
    }

    pub fn is_satisfied(&self, satisfied: &[&str]) -> bool {
        self.score(satisfied) >= self.threshold
    }
}

// ── Learned pattern ───────────────────────────────────────────────────────────

/// A versioned, content-addressed learned pattern.
///
/// `(signature_hash, domain_id, version)` is unique; `version` is monotonic
/// per `(signature_hash, domain_id)`. The `supersedes` / `superseded_by`
/// self-references form an acyclic lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub id: PatternId,
    pub pattern_type: String,
    pub name: String,
    pub domain_id: DomainId,
    /// 64-character hex digest over the canonical serialization of the
    /// pattern's essential structure.
    pub signature_hash: String,
    pub version: i32,
    pub status: PatternStatus,
    pub success_criteria: SuccessCriteria,
    pub match_count: i64,
    pub success_rate: f64,
    pub supersedes: Option<PatternId>,
    pub superseded_by: Option<PatternId>,
    pub quality_metrics: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Candidate rollups ─────────────────────────────────────────────────────────

/// Per-rule / per-repo aggregation of finding-fix pairs. The lifecycle
/// reducer reads these when deciding promotions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternCandidate {
    pub rule_id: String,
    pub repo: String,
    pub domain_id: DomainId,
    pub pair_count: i64,
    pub confirmed_count: i64,
    /// Mean confidence over pairs at or above the configured floor.
    pub mean_confidence: f64,
    pub last_pair_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_edge_set() {
        use PatternStatus::*;
        assert!(Candidate.can_transition_to(Provisional));
        assert!(Provisional.can_transition_to(Validated));
        assert!(Provisional.can_transition_to(Deprecated));
        assert!(Validated.can_transition_to(Deprecated));
        assert!(Deprecated.can_transition_to(Archived));

        // No self-loops, no skips, no resurrection.
        for s in PatternStatus::ALL {
            assert!(!s.can_transition_to(*s));
        }
        assert!(!Candidate.can_transition_to(Validated));
        assert!(!Archived.can_transition_to(Candidate));
        assert!(!Deprecated.can_transition_to(Validated));
    }

    #[test]
    fn success_criteria_weights() {
        let c = SuccessCriteria {
            predicates: vec![
                SuccessPredicate { name: "tests_pass".into(), weight: 2.0 },
                SuccessPredicate { name: "finding_gone".into(), weight: 1.0 },
                SuccessPredicate { name: "no_regression".into(), weight: 1.0 },
            ],
            threshold: 0.75,
        };
        assert_eq!(c.score(&["tests_pass", "finding_gone"]), 0.75);
        assert!(c.is_satisfied(&["tests_pass", "finding_gone"]));
        assert!(!c.is_satisfied(&["finding_gone", "no_regression"]));
    }

    #[test]
    fn empty_criteria_never_satisfied() {
        let c = SuccessCriteria { predicates: vec![], threshold: 0.5 };
        assert_eq!(c.score(&["anything"]), 0.0);
        assert!(!c.is_satisfied(&[]));
    }
}
