use std::sync::Arc;

use chrono::{DateTime, Utc};
use mnemon_domain::{CorrelationId, EventId, LearnedPattern, PatternId, PatternStatus};
use mnemon_store::{DisableEventRow, LifecycleTransitionRow, PatternStore};
use tracing::{info, warn};

use crate::error::PatternError;
use crate::lineage;

/// Aggregated pair confidence required to validate a provisional pattern.
const VALIDATION_CONFIDENCE: f64 = 0.75;

/// One applied lifecycle transition.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleOutcome {
    pub pattern_id: PatternId,
    pub from_status: PatternStatus,
    pub to_status: PatternStatus,
    pub occurred_at: DateTime<Utc>,
}

/// The sole writer of pattern status and its audit trail.
///
/// Every transition is one store transaction: the status row, the
/// current-lifecycle row, the audit row, and — when the transition disables
/// the pattern — the disable event plus the current-disabled view all land
/// or roll back together. Patterns are never hard-deleted; the terminal
/// state is ARCHIVED.
pub struct LifecycleReducer {
    store: Arc<dyn PatternStore>,
    confidence_floor: f64,
}

impl LifecycleReducer {
    pub fn new(store: Arc<dyn PatternStore>, confidence_floor: f64) -> Self {
        Self { store, confidence_floor }
    }

    /// Apply one explicit transition. Illegal edges (self-loops included)
    /// are rejected before any write.
    pub async fn transition(
        &self,
        pattern_id: &PatternId,
        to_status: PatternStatus,
        actor: &str,
        reason: &str,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) -> Result<LifecycleOutcome, PatternError> {
        let pattern = self.require(pattern_id).await?;
        let from_status = pattern.status;
        if !from_status.can_transition_to(to_status) {
            warn!(
                pattern_id = %pattern_id,
                from = %from_status,
                to = %to_status,
                correlation_id = %correlation_id,
                "invalid lifecycle transition"
            );
            return Err(PatternError::InvalidLifecycleTransition {
                from: from_status,
                to: to_status,
            });
        }

        let transition = LifecycleTransitionRow {
            pattern_id: *pattern_id,
            from_status,
            to_status,
            actor: actor.to_string(),
            reason: reason.to_string(),
            correlation_id,
            occurred_at: now,
        };
        // Entering DEPRECATED is what disables a pattern; archival is
        // bookkeeping on an already-disabled one.
        let disable = (to_status == PatternStatus::Deprecated).then(|| DisableEventRow {
            event_id: EventId::new(),
            pattern_id: *pattern_id,
            pattern_class: pattern.pattern_type.clone(),
            actor: actor.to_string(),
            reason: reason.to_string(),
            correlation_id,
            event_at: now,
        });

        self.store
            .apply_lifecycle_transition(pattern_id, to_status, &transition, disable.as_ref())
            .await?;

        info!(
            pattern_id = %pattern_id,
            from = %from_status,
            to = %to_status,
            actor,
            correlation_id = %correlation_id,
            "lifecycle transition applied"
        );
        Ok(LifecycleOutcome {
            pattern_id: *pattern_id,
            from_status,
            to_status,
            occurred_at: now,
        })
    }

    /// Promotion: CANDIDATE rises to PROVISIONAL unconditionally;
    /// PROVISIONAL rises to VALIDATED only on sufficient aggregated pair
    /// confidence for the pattern's domain.
    pub async fn promote(
        &self,
        pattern_id: &PatternId,
        actor: &str,
        reason: &str,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) -> Result<LifecycleOutcome, PatternError> {
        let pattern = self.require(pattern_id).await?;
        let to_status = match pattern.status {
            PatternStatus::Candidate => PatternStatus::Provisional,
            PatternStatus::Provisional => {
                let evidence = self.promotion_evidence(&pattern).await?;
                if evidence < VALIDATION_CONFIDENCE {
                    return Err(PatternError::InsufficientEvidence {
                        score: evidence,
                        required: VALIDATION_CONFIDENCE,
                    });
                }
                PatternStatus::Validated
            }
            other => {
                return Err(PatternError::InvalidLifecycleTransition {
                    from: other,
                    to: PatternStatus::Validated,
                })
            }
        };
        self.transition(pattern_id, to_status, actor, reason, correlation_id, now)
            .await
    }

    /// Highest mean pair confidence among this domain's candidate rollups.
    /// Pairs below the configured floor never reach the rollups, so the
    /// floor property holds here by construction.
    async fn promotion_evidence(&self, pattern: &LearnedPattern) -> Result<f64, PatternError> {
        let candidates = self.store.list_candidates(self.confidence_floor).await?;
        Ok(candidates
            .iter()
            .filter(|c| c.domain_id == pattern.domain_id)
            .map(|c| c.mean_confidence)
            .fold(0.0, f64::max))
    }

    /// Success-metric write-back on behalf of the feedback scorer, keeping
    /// pattern rows single-writer.
    pub async fn record_success_metrics(
        &self,
        pattern_id: &PatternId,
        match_count: i64,
        success_rate: f64,
        now: DateTime<Utc>,
    ) -> Result<(), PatternError> {
        self.store
            .update_success_metrics(pattern_id, match_count, success_rate, now)
            .await?;
        Ok(())
    }

    /// Version chain for the read surface, newest first. Verifies the
    /// global acyclicity invariant as a side effect.
    pub async fn lineage(&self, pattern_id: &PatternId) -> Result<Vec<PatternId>, PatternError> {
        let edges = self.store.lineage_edges().await?;
        lineage::assert_acyclic(&edges, None)?;
        Ok(lineage::lineage_chain(&edges, *pattern_id))
    }

    async fn require(&self, pattern_id: &PatternId) -> Result<LearnedPattern, PatternError> {
        Ok(self
            .store
            .get_pattern(pattern_id)
            .await?
            .ok_or_else(|| {
                mnemon_store::StoreError::NotFound(format!("pattern {pattern_id}"))
            })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_domain::{DomainId, PatternCandidate, SuccessCriteria};
    use mnemon_store::InMemoryStore;
    use serde_json::Value;

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn t0() -> DateTime<Utc> {
        t("2026-03-01T00:00:00Z")
    }

    fn pattern(domain: DomainId, status: PatternStatus) -> LearnedPattern {
        LearnedPattern {
            id: PatternId::new(),
            pattern_type: "edit_sequence".into(),
            name: "edit-then-test".into(),
            domain_id: domain,
            signature_hash: "b".repeat(64),
            version: 1,
            status,
            success_criteria: SuccessCriteria { predicates: vec![], threshold: 0.5 },
            match_count: 0,
            success_rate: 0.0,
            supersedes: None,
            superseded_by: None,
            quality_metrics: Value::Null,
            created_at: t0(),
            updated_at: t0(),
        }
    }

    async fn seeded(status: PatternStatus) -> (Arc<InMemoryStore>, LearnedPattern) {
        let store = Arc::new(InMemoryStore::new());
        let p = pattern(DomainId::new(), status);
        store.insert_pattern(&p).await.unwrap();
        (store, p)
    }

    #[tokio::test]
    async fn promotion_with_evidence_validates_and_audits() {
        let (store, p) = seeded(PatternStatus::Provisional).await;
        store
            .upsert_candidate(&PatternCandidate {
                rule_id: "r1".into(),
                repo: "org/repo".into(),
                domain_id: p.domain_id,
                pair_count: 4,
                confirmed_count: 3,
                mean_confidence: 0.9,
                last_pair_at: t0(),
            })
            .await
            .unwrap();

        let reducer = LifecycleReducer::new(store.clone(), 0.5);
        let outcome = reducer
            .promote(&p.id, "operator", "strong pairs", CorrelationId::new(), t("2026-03-01T01:00:00Z"))
            .await
            .unwrap();

        assert_eq!(outcome.from_status, PatternStatus::Provisional);
        assert_eq!(outcome.to_status, PatternStatus::Validated);
        let transitions = store.lifecycle_transitions(&p.id).await.unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from_status, PatternStatus::Provisional);
        assert_eq!(transitions[0].to_status, PatternStatus::Validated);
    }

    #[tokio::test]
    async fn promotion_without_evidence_is_refused() {
        let (store, p) = seeded(PatternStatus::Provisional).await;
        let reducer = LifecycleReducer::new(store, 0.5);
        let err = reducer
            .promote(&p.id, "operator", "hopeful", CorrelationId::new(), t0())
            .await;
        assert!(matches!(err, Err(PatternError::InsufficientEvidence { .. })));
    }

    #[tokio::test]
    async fn self_loop_is_invalid() {
        let (store, p) = seeded(PatternStatus::Validated).await;
        let reducer = LifecycleReducer::new(store, 0.5);
        let err = reducer
            .transition(&p.id, PatternStatus::Validated, "x", "y", CorrelationId::new(), t0())
            .await;
        assert!(matches!(
            err,
            Err(PatternError::InvalidLifecycleTransition { .. })
        ));
    }

    #[tokio::test]
    async fn deprecation_records_disable_event_and_view() {
        let (store, p) = seeded(PatternStatus::Provisional).await;
        let reducer = LifecycleReducer::new(store.clone(), 0.5);

        reducer
            .transition(
                &p.id,
                PatternStatus::Deprecated,
                "operator",
                "low success rate",
                CorrelationId::new(),
                t("2026-03-01T02:00:00Z"),
            )
            .await
            .unwrap();

        let current = store.disabled_current().await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].pattern_id, p.id);
        assert_eq!(current[0].reason, "low success rate");
    }

    #[tokio::test]
    async fn archival_does_not_add_a_disable_event() {
        let (store, p) = seeded(PatternStatus::Deprecated).await;
        let reducer = LifecycleReducer::new(store.clone(), 0.5);
        reducer
            .transition(&p.id, PatternStatus::Archived, "janitor", "retention", CorrelationId::new(), t0())
            .await
            .unwrap();
        assert!(store.disabled_current().await.unwrap().is_empty());
    }
}
