use serde::{Deserialize, Serialize};

// ── FSM kinds ─────────────────────────────────────────────────────────────────

/// The three parallel state machines advanced by the reducer. Each kind has a
/// disjoint state alphabet; `(fsm_kind, entity_id)` addresses one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsmKind {
    Ingestion,
    PatternLearning,
    QualityAssessment,
}

impl FsmKind {
    pub const ALL: &'static [FsmKind] = &[
        FsmKind::Ingestion,
        FsmKind::PatternLearning,
        FsmKind::QualityAssessment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FsmKind::Ingestion => "ingestion",
            FsmKind::PatternLearning => "pattern_learning",
            FsmKind::QualityAssessment => "quality_assessment",
        }
    }

    /// The state a fresh instance of this kind starts in.
    pub fn initial_state(&self) -> FsmState {
        match self {
            FsmKind::Ingestion => FsmState::Received,
            FsmKind::PatternLearning => FsmState::Foundation,
            FsmKind::QualityAssessment => FsmState::Raw,
        }
    }

    /// The static edge set `(from, action, to)` for this kind. Transition
    /// legality is checked against this table and nothing else.
    pub fn edges(&self) -> &'static [(FsmState, FsmAction, FsmState)] {
        match self {
            FsmKind::Ingestion => &[
                (FsmState::Received, FsmAction::BeginProcessing, FsmState::Processing),
                (FsmState::Processing, FsmAction::CompleteIndexing, FsmState::Indexed),
                (FsmState::Processing, FsmAction::Fail, FsmState::Failed),
            ],
            FsmKind::PatternLearning => &[
                (FsmState::Foundation, FsmAction::BeginMatching, FsmState::Matching),
                (FsmState::Matching, FsmAction::BeginValidation, FsmState::Validation),
                (FsmState::Validation, FsmAction::BeginTraceability, FsmState::Traceability),
                (FsmState::Traceability, FsmAction::Complete, FsmState::Completed),
                (FsmState::Matching, FsmAction::Fail, FsmState::Failed),
                (FsmState::Validation, FsmAction::Fail, FsmState::Failed),
                (FsmState::Traceability, FsmAction::Fail, FsmState::Failed),
            ],
            FsmKind::QualityAssessment => &[
                (FsmState::Raw, FsmAction::BeginAssessment, FsmState::Assessing),
                (FsmState::Assessing, FsmAction::Score, FsmState::Scored),
                (FsmState::Assessing, FsmAction::Fail, FsmState::Failed),
                (FsmState::Scored, FsmAction::Store, FsmState::Stored),
            ],
        }
    }

    /// Resolve `(from, action)` against the edge set. `None` means the
    /// transition is illegal for this kind.
    pub fn apply(&self, from: FsmState, action: FsmAction) -> Option<FsmState> {
        self.edges()
            .iter()
            .find(|(f, a, _)| *f == from && *a == action)
            .map(|(_, _, to)| *to)
    }

    /// Whether `state` has no outgoing edges for this kind.
    pub fn is_terminal(&self, state: FsmState) -> bool {
        !self.edges().iter().any(|(f, _, _)| *f == state)
    }

    /// Whether `state` belongs to this kind's alphabet at all.
    pub fn owns_state(&self, state: FsmState) -> bool {
        state == self.initial_state()
            || self
                .edges()
                .iter()
                .any(|(f, _, t)| *f == state || *t == state)
    }
}

impl std::fmt::Display for FsmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── States ────────────────────────────────────────────────────────────────────

/// Union of the three kinds' state alphabets. `Failed` is shared spelling;
/// the alphabets stay disjoint because `(fsm_kind, state)` is what is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FsmState {
    // Ingestion
    Received,
    Processing,
    Indexed,
    // Pattern-learning
    Foundation,
    Matching,
    Validation,
    Traceability,
    Completed,
    // Quality-assessment
    Raw,
    Assessing,
    Scored,
    Stored,
    // Shared failure sink
    Failed,
}

impl FsmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsmState::Received => "RECEIVED",
            FsmState::Processing => "PROCESSING",
            FsmState::Indexed => "INDEXED",
            FsmState::Foundation => "FOUNDATION",
            FsmState::Matching => "MATCHING",
            FsmState::Validation => "VALIDATION",
            FsmState::Traceability => "TRACEABILITY",
            FsmState::Completed => "COMPLETED",
            FsmState::Raw => "RAW",
            FsmState::Assessing => "ASSESSING",
            FsmState::Scored => "SCORED",
            FsmState::Stored => "STORED",
            FsmState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for FsmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Actions ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsmAction {
    BeginProcessing,
    CompleteIndexing,
    BeginMatching,
    BeginValidation,
    BeginTraceability,
    Complete,
    BeginAssessment,
    Score,
    Store,
    Fail,
}

impl FsmAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsmAction::BeginProcessing => "begin_processing",
            FsmAction::CompleteIndexing => "complete_indexing",
            FsmAction::BeginMatching => "begin_matching",
            FsmAction::BeginValidation => "begin_validation",
            FsmAction::BeginTraceability => "begin_traceability",
            FsmAction::Complete => "complete",
            FsmAction::BeginAssessment => "begin_assessment",
            FsmAction::Score => "score",
            FsmAction::Store => "store",
            FsmAction::Fail => "fail",
        }
    }
}

impl std::fmt::Display for FsmAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foundation_has_exactly_one_outgoing_edge() {
        let outgoing: Vec<_> = FsmKind::PatternLearning
            .edges()
            .iter()
            .filter(|(f, _, _)| *f == FsmState::Foundation)
            .collect();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].1, FsmAction::BeginMatching);
    }

    #[test]
    fn apply_resolves_legal_edges_only() {
        assert_eq!(
            FsmKind::Ingestion.apply(FsmState::Received, FsmAction::BeginProcessing),
            Some(FsmState::Processing)
        );
        // `complete` is not an edge out of FOUNDATION.
        assert_eq!(
            FsmKind::PatternLearning.apply(FsmState::Foundation, FsmAction::Complete),
            None
        );
        // Cross-kind action does not leak between alphabets.
        assert_eq!(
            FsmKind::Ingestion.apply(FsmState::Foundation, FsmAction::BeginMatching),
            None
        );
    }

    #[test]
    fn terminal_states() {
        assert!(FsmKind::Ingestion.is_terminal(FsmState::Indexed));
        assert!(FsmKind::Ingestion.is_terminal(FsmState::Failed));
        assert!(!FsmKind::QualityAssessment.is_terminal(FsmState::Scored));
        assert!(FsmKind::QualityAssessment.is_terminal(FsmState::Stored));
    }

    #[test]
    fn every_edge_stays_inside_its_alphabet() {
        for kind in FsmKind::ALL {
            for (from, _, to) in kind.edges() {
                assert!(kind.owns_state(*from), "{kind} does not own {from}");
                assert!(kind.owns_state(*to), "{kind} does not own {to}");
            }
        }
    }
}
