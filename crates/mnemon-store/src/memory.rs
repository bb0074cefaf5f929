use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemon_domain::{
    DomainId, EntityId, FindingFixPair, FindingId, FixId, FsmKind, FsmState, LearnedPattern,
    PatternCandidate, PatternId, PatternInjection, PatternStatus, ReviewFinding, ReviewFix,
    RoutingFeedbackScore, SessionId,
};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::rows::{
    DbMetadata, DisableEventRow, DomainTaxonomyRow, FsmHistoryRow, FsmInstance, LeaseOutcome,
    LifecycleTransitionRow, PatternLifecycleRow, TransitionOutcome, WorkflowExecution,
};
use crate::store::{
    FeedbackStore, FsmStore, MetaStore, PairInsert, PatternStore, ReviewStore,
};

#[derive(Debug, Default)]
struct Inner {
    fsm: HashMap<(FsmKind, EntityId), FsmInstance>,
    fsm_history: Vec<FsmHistoryRow>,
    patterns: HashMap<PatternId, LearnedPattern>,
    lifecycle: HashMap<PatternId, PatternLifecycleRow>,
    lifecycle_transitions: Vec<LifecycleTransitionRow>,
    disable_events: Vec<DisableEventRow>,
    disabled_current: HashMap<PatternId, DisableEventRow>,
    candidates: HashMap<(String, String), PatternCandidate>,
    findings: HashMap<FindingId, ReviewFinding>,
    fixes: HashMap<FixId, ReviewFix>,
    pairs: HashMap<(FindingId, String), FindingFixPair>,
    scores: HashMap<SessionId, RoutingFeedbackScore>,
    injections: Vec<PatternInjection>,
    metadata: Option<DbMetadata>,
    workflows: HashMap<Uuid, WorkflowExecution>,
    domains: HashMap<DomainId, DomainTaxonomyRow>,
    fail_next_lifecycle_transition: bool,
}

/// In-memory implementation of the full store surface.
///
/// All data is lost on process exit. Drives the in-process bus path and
/// every scenario test. Mutations take the single write lock, so each
/// method is atomic exactly like one Postgres transaction.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: make the next `apply_lifecycle_transition` fail after its
    /// validations, proving none of the transition's effects leak.
    pub async fn fail_next_lifecycle_transition(&self) {
        self.inner.write().await.fail_next_lifecycle_transition = true;
    }
}

// ── FsmStore ──────────────────────────────────────────────────────────────────

#[async_trait]
impl FsmStore for InMemoryStore {
    async fn get_instance(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
    ) -> Result<Option<FsmInstance>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.fsm.get(&(kind, entity_id.clone())).cloned())
    }

    async fn ensure_instance(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
        now: DateTime<Utc>,
    ) -> Result<FsmInstance, StoreError> {
        let mut guard = self.inner.write().await;
        let instance = guard
            .fsm
            .entry((kind, entity_id.clone()))
            .or_insert_with(|| FsmInstance::new(kind, entity_id.clone(), now));
        Ok(instance.clone())
    }

    async fn try_acquire_lease(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
        new_lease_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome, StoreError> {
        let mut guard = self.inner.write().await;
        let instance = guard
            .fsm
            .get_mut(&(kind, entity_id.clone()))
            .ok_or_else(|| StoreError::NotFound(format!("fsm {kind}/{entity_id}")))?;

        if instance.lease_live_at(now) {
            return Ok(LeaseOutcome::Held {
                holder: instance.lease_id.expect("live lease has an id"),
                expires_at: instance.lease_expires_at.expect("live lease has expiry"),
            });
        }

        instance.lease_id = Some(new_lease_id);
        instance.lease_epoch += 1;
        instance.lease_expires_at = Some(expires_at);
        Ok(LeaseOutcome::Granted {
            lease_id: new_lease_id,
            lease_epoch: instance.lease_epoch,
            expires_at,
        })
    }

    async fn renew_lease(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
        lease_id: Uuid,
        lease_epoch: i64,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut guard = self.inner.write().await;
        let instance = guard
            .fsm
            .get_mut(&(kind, entity_id.clone()))
            .ok_or_else(|| StoreError::NotFound(format!("fsm {kind}/{entity_id}")))?;

        if instance.lease_id != Some(lease_id)
            || instance.lease_epoch != lease_epoch
            || !instance.lease_live_at(now)
        {
            return Ok(TransitionOutcome::StaleLease);
        }
        instance.lease_expires_at = Some(expires_at);
        Ok(TransitionOutcome::Applied)
    }

    async fn transition_with_lease(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
        lease_id: Uuid,
        lease_epoch: i64,
        to_state: FsmState,
        metadata: Value,
        history: FsmHistoryRow,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut guard = self.inner.write().await;
        let instance = guard
            .fsm
            .get_mut(&(kind, entity_id.clone()))
            .ok_or_else(|| StoreError::NotFound(format!("fsm {kind}/{entity_id}")))?;

        if instance.lease_id != Some(lease_id)
            || instance.lease_epoch != lease_epoch
            || !instance.lease_live_at(now)
        {
            return Ok(TransitionOutcome::StaleLease);
        }

        instance.previous_state = Some(instance.current_state);
        instance.current_state = to_state;
        instance.transition_at = history.occurred_at;
        instance.metadata = metadata;
        guard.fsm_history.push(history);
        Ok(TransitionOutcome::Applied)
    }

    async fn release_lease(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
        lease_id: Uuid,
        lease_epoch: i64,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if let Some(instance) = guard.fsm.get_mut(&(kind, entity_id.clone())) {
            if instance.lease_id == Some(lease_id) && instance.lease_epoch == lease_epoch {
                instance.lease_id = None;
                instance.lease_expires_at = None;
            }
        }
        Ok(())
    }

    async fn history(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
    ) -> Result<Vec<FsmHistoryRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .fsm_history
            .iter()
            .filter(|h| h.fsm_kind == kind && &h.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn prune_history(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut guard = self.inner.write().await;
        let before = guard.fsm_history.len();
        guard.fsm_history.retain(|h| h.occurred_at >= older_than);
        Ok((before - guard.fsm_history.len()) as u64)
    }
}

// ── PatternStore ──────────────────────────────────────────────────────────────

#[async_trait]
impl PatternStore for InMemoryStore {
    async fn get_pattern(&self, id: &PatternId) -> Result<Option<LearnedPattern>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.patterns.get(id).cloned())
    }

    async fn latest_by_signature(
        &self,
        signature_hash: &str,
        domain_id: &DomainId,
    ) -> Result<Option<LearnedPattern>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .patterns
            .values()
            .filter(|p| p.signature_hash == signature_hash && &p.domain_id == domain_id)
            .max_by_key(|p| p.version)
            .cloned())
    }

    async fn insert_pattern(&self, pattern: &LearnedPattern) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let duplicate = guard.patterns.values().any(|p| {
            p.signature_hash == pattern.signature_hash
                && p.domain_id == pattern.domain_id
                && p.version == pattern.version
        });
        if duplicate {
            return Err(StoreError::UniqueViolation(format!(
                "learned_patterns ({}, {}, v{})",
                pattern.signature_hash, pattern.domain_id, pattern.version
            )));
        }
        guard.patterns.insert(pattern.id, pattern.clone());
        guard.lifecycle.insert(
            pattern.id,
            PatternLifecycleRow {
                pattern_id: pattern.id,
                status: pattern.status,
                transition_count: 0,
                updated_at: pattern.created_at,
            },
        );
        Ok(())
    }

    async fn link_supersedes(
        &self,
        old_id: &PatternId,
        new_id: &PatternId,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;

        // Walking supersedes links from `old` must never reach `new`.
        let mut cursor = Some(*old_id);
        while let Some(id) = cursor {
            if id == *new_id {
                return Err(StoreError::LineageCycle {
                    from: new_id.to_string(),
                    to: old_id.to_string(),
                });
            }
            cursor = guard.patterns.get(&id).and_then(|p| p.supersedes);
        }

        let old = guard
            .patterns
            .get_mut(old_id)
            .ok_or_else(|| StoreError::NotFound(format!("pattern {old_id}")))?;
        old.superseded_by = Some(*new_id);
        let new = guard
            .patterns
            .get_mut(new_id)
            .ok_or_else(|| StoreError::NotFound(format!("pattern {new_id}")))?;
        new.supersedes = Some(*old_id);
        Ok(())
    }

    async fn list_patterns(
        &self,
        status: Option<PatternStatus>,
        limit: u32,
    ) -> Result<Vec<LearnedPattern>, StoreError> {
        let guard = self.inner.read().await;
        let mut all: Vec<LearnedPattern> = guard
            .patterns
            .values()
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all.truncate(limit as usize);
        Ok(all)
    }

    async fn lineage_edges(&self) -> Result<Vec<(PatternId, Option<PatternId>)>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .patterns
            .values()
            .map(|p| (p.id, p.supersedes))
            .collect())
    }

    async fn apply_lifecycle_transition(
        &self,
        pattern_id: &PatternId,
        to_status: PatternStatus,
        transition: &LifecycleTransitionRow,
        disable: Option<&DisableEventRow>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.patterns.contains_key(pattern_id) {
            return Err(StoreError::NotFound(format!("pattern {pattern_id}")));
        }
        if guard.fail_next_lifecycle_transition {
            guard.fail_next_lifecycle_transition = false;
            return Err(StoreError::Internal("injected transition fault".to_string()));
        }

        // Single write-lock section: every effect lands or none do.
        let pattern = guard.patterns.get_mut(pattern_id).expect("checked above");
        pattern.status = to_status;
        pattern.updated_at = transition.occurred_at;
        let row = guard
            .lifecycle
            .entry(*pattern_id)
            .or_insert_with(|| PatternLifecycleRow {
                pattern_id: *pattern_id,
                status: to_status,
                transition_count: 0,
                updated_at: transition.occurred_at,
            });
        row.status = to_status;
        row.transition_count += 1;
        row.updated_at = transition.occurred_at;
        guard.lifecycle_transitions.push(transition.clone());
        if let Some(event) = disable {
            guard.disable_events.push(event.clone());
            let current = guard.disabled_current.entry(*pattern_id);
            match current {
                std::collections::hash_map::Entry::Occupied(mut o)
                    if o.get().event_at <= event.event_at =>
                {
                    o.insert(event.clone());
                }
                std::collections::hash_map::Entry::Vacant(v) => {
                    v.insert(event.clone());
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn update_success_metrics(
        &self,
        pattern_id: &PatternId,
        match_count: i64,
        success_rate: f64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let pattern = guard
            .patterns
            .get_mut(pattern_id)
            .ok_or_else(|| StoreError::NotFound(format!("pattern {pattern_id}")))?;
        pattern.match_count = match_count;
        pattern.success_rate = success_rate;
        pattern.updated_at = now;
        Ok(())
    }

    async fn get_lifecycle(
        &self,
        pattern_id: &PatternId,
    ) -> Result<Option<PatternLifecycleRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.lifecycle.get(pattern_id).cloned())
    }

    async fn lifecycle_transitions(
        &self,
        pattern_id: &PatternId,
    ) -> Result<Vec<LifecycleTransitionRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .lifecycle_transitions
            .iter()
            .filter(|t| &t.pattern_id == pattern_id)
            .cloned()
            .collect())
    }

    async fn disabled_current(&self) -> Result<Vec<DisableEventRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.disabled_current.values().cloned().collect())
    }

    async fn upsert_candidate(&self, candidate: &PatternCandidate) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.candidates.insert(
            (candidate.rule_id.clone(), candidate.repo.clone()),
            candidate.clone(),
        );
        Ok(())
    }

    async fn list_candidates(
        &self,
        min_confidence: f64,
    ) -> Result<Vec<PatternCandidate>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .candidates
            .values()
            .filter(|c| c.mean_confidence >= min_confidence)
            .cloned()
            .collect())
    }
}

// ── ReviewStore ───────────────────────────────────────────────────────────────

#[async_trait]
impl ReviewStore for InMemoryStore {
    async fn upsert_finding(&self, finding: &ReviewFinding) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .findings
            .insert(finding.finding_id.clone(), finding.clone());
        Ok(())
    }

    async fn get_finding(
        &self,
        finding_id: &FindingId,
    ) -> Result<Option<ReviewFinding>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.findings.get(finding_id).cloned())
    }

    async fn upsert_fix(&self, fix: &ReviewFix) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.fixes.insert(fix.fix_id.clone(), fix.clone());
        Ok(())
    }

    async fn fixes_for_finding(
        &self,
        finding_id: &FindingId,
    ) -> Result<Vec<ReviewFix>, StoreError> {
        let guard = self.inner.read().await;
        let mut fixes: Vec<ReviewFix> = guard
            .fixes
            .values()
            .filter(|f| &f.finding_id == finding_id)
            .cloned()
            .collect();
        fixes.sort_by(|a, b| a.fix_id.cmp(&b.fix_id));
        Ok(fixes)
    }

    async fn try_insert_pair(&self, pair: &FindingFixPair) -> Result<PairInsert, StoreError> {
        let mut guard = self.inner.write().await;
        let key = (pair.finding_id.clone(), pair.fix_commit_sha.as_str().to_string());
        if guard.pairs.contains_key(&key) {
            return Ok(PairInsert::AlreadyExists);
        }
        guard.pairs.insert(key, pair.clone());
        Ok(PairInsert::Inserted)
    }

    async fn get_pair(
        &self,
        finding_id: &FindingId,
        fix_commit_sha: &str,
    ) -> Result<Option<FindingFixPair>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .pairs
            .get(&(finding_id.clone(), fix_commit_sha.to_string()))
            .cloned())
    }

    async fn replace_pair(&self, pair: &FindingFixPair) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let key = (pair.finding_id.clone(), pair.fix_commit_sha.as_str().to_string());
        if !guard.pairs.contains_key(&key) {
            return Err(StoreError::NotFound(format!(
                "pair ({}, {})",
                pair.finding_id, pair.fix_commit_sha
            )));
        }
        guard.pairs.insert(key, pair.clone());
        Ok(())
    }

    async fn confirm_pair(
        &self,
        finding_id: &FindingId,
        fix_commit_sha: &str,
    ) -> Result<FindingFixPair, StoreError> {
        let mut guard = self.inner.write().await;
        let pair = guard
            .pairs
            .get_mut(&(finding_id.clone(), fix_commit_sha.to_string()))
            .ok_or_else(|| {
                StoreError::NotFound(format!("pair ({finding_id}, {fix_commit_sha})"))
            })?;
        pair.disappearance_confirmed = true;
        Ok(pair.clone())
    }

    async fn pairs_above_floor(&self, floor: f64) -> Result<Vec<FindingFixPair>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .pairs
            .values()
            .filter(|p| p.confidence_score >= floor)
            .cloned()
            .collect())
    }
}

// ── FeedbackStore ─────────────────────────────────────────────────────────────

#[async_trait]
impl FeedbackStore for InMemoryStore {
    async fn upsert_score(&self, score: &RoutingFeedbackScore) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.scores.insert(score.session_id.clone(), score.clone());
        Ok(())
    }

    async fn get_score(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<RoutingFeedbackScore>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.scores.get(session_id).cloned())
    }

    async fn record_injection(&self, injection: &PatternInjection) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.injections.push(injection.clone());
        Ok(())
    }

    async fn injections_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<PatternInjection>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .injections
            .iter()
            .filter(|i| &i.session_id == session_id)
            .cloned()
            .collect())
    }
}

// ── MetaStore ─────────────────────────────────────────────────────────────────

#[async_trait]
impl MetaStore for InMemoryStore {
    async fn get_metadata(&self) -> Result<Option<DbMetadata>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.metadata.clone())
    }

    async fn init_metadata(&self, metadata: &DbMetadata) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.metadata.is_none() {
            guard.metadata = Some(metadata.clone());
        }
        Ok(())
    }

    async fn set_schema_version(&self, version: i32) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        match guard.metadata.as_mut() {
            Some(meta) => {
                meta.schema_version = version;
                Ok(())
            }
            None => Err(StoreError::MetadataMissing),
        }
    }

    async fn record_handshake(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        match guard.metadata.as_mut() {
            Some(meta) => {
                meta.handshake_at = Some(at);
                Ok(())
            }
            None => Err(StoreError::MetadataMissing),
        }
    }

    async fn record_workflow_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .workflows
            .insert(execution.execution_id, execution.clone());
        Ok(())
    }

    async fn finish_workflow_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .workflows
            .insert(execution.execution_id, execution.clone());
        Ok(())
    }

    async fn get_domain(
        &self,
        domain_id: &DomainId,
    ) -> Result<Option<DomainTaxonomyRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.domains.get(domain_id).cloned())
    }

    async fn upsert_domain(&self, domain: &DomainTaxonomyRow) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.domains.insert(domain.domain_id, domain.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_domain::{CorrelationId, FsmAction, SuccessCriteria};

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn t0() -> DateTime<Utc> {
        t("2026-03-01T00:00:00Z")
    }

    fn pattern(domain: DomainId) -> LearnedPattern {
        LearnedPattern {
            id: PatternId::new(),
            pattern_type: "edit_sequence".into(),
            name: "retry-on-timeout".into(),
            domain_id: domain,
            signature_hash: "a".repeat(64),
            version: 1,
            status: PatternStatus::Candidate,
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

    #[tokio::test]
    async fn lease_cas_single_winner() {
        let store = InMemoryStore::new();
        let entity = EntityId::new("E7");
        store
            .ensure_instance(FsmKind::PatternLearning, &entity, t0())
            .await
            .unwrap();

        let a = store
            .try_acquire_lease(FsmKind::PatternLearning, &entity, Uuid::new_v4(), t("2026-03-01T00:05:00Z"), t0())
            .await
            .unwrap();
        let b = store
            .try_acquire_lease(FsmKind::PatternLearning, &entity, Uuid::new_v4(), t("2026-03-01T00:05:00Z"), t0())
            .await
            .unwrap();

        assert!(matches!(a, LeaseOutcome::Granted { lease_epoch: 1, .. }));
        assert!(matches!(b, LeaseOutcome::Held { .. }));
    }

    #[tokio::test]
    async fn expired_lease_is_harvested_with_epoch_bump() {
        let store = InMemoryStore::new();
        let entity = EntityId::new("E8");
        store
            .ensure_instance(FsmKind::Ingestion, &entity, t0())
            .await
            .unwrap();

        let expiry = t("2026-03-01T00:05:00Z");
        store
            .try_acquire_lease(FsmKind::Ingestion, &entity, Uuid::new_v4(), expiry, t0())
            .await
            .unwrap();

        // A propose at the exact expiry instant succeeds for the new proposer.
        let second = store
            .try_acquire_lease(FsmKind::Ingestion, &entity, Uuid::new_v4(), t("2026-03-01T00:10:00Z"), expiry)
            .await
            .unwrap();
        assert!(matches!(second, LeaseOutcome::Granted { lease_epoch: 2, .. }));
    }

    #[tokio::test]
    async fn stale_lease_blocks_transition() {
        let store = InMemoryStore::new();
        let entity = EntityId::new("E9");
        store
            .ensure_instance(FsmKind::Ingestion, &entity, t0())
            .await
            .unwrap();
        let grant = store
            .try_acquire_lease(FsmKind::Ingestion, &entity, Uuid::new_v4(), t("2026-03-01T00:05:00Z"), t0())
            .await
            .unwrap();
        let LeaseOutcome::Granted { lease_id, lease_epoch, .. } = grant else {
            panic!("expected grant");
        };

        let history = FsmHistoryRow {
            fsm_kind: FsmKind::Ingestion,
            entity_id: entity.clone(),
            from_state: FsmState::Received,
            to_state: FsmState::Processing,
            action: FsmAction::BeginProcessing,
            duration_ms: 10,
            success: true,
            error_message: None,
            correlation_id: CorrelationId::new(),
            occurred_at: t("2026-03-01T00:00:10Z"),
        };

        // Wrong epoch is stale.
        let stale = store
            .transition_with_lease(
                FsmKind::Ingestion,
                &entity,
                lease_id,
                lease_epoch + 1,
                FsmState::Processing,
                Value::Null,
                history.clone(),
                t("2026-03-01T00:00:10Z"),
            )
            .await
            .unwrap();
        assert_eq!(stale, TransitionOutcome::StaleLease);
        assert!(store.history(FsmKind::Ingestion, &entity).await.unwrap().is_empty());

        // Correct pair applies and appends history atomically.
        let applied = store
            .transition_with_lease(
                FsmKind::Ingestion,
                &entity,
                lease_id,
                lease_epoch,
                FsmState::Processing,
                Value::Null,
                history,
                t("2026-03-01T00:00:10Z"),
            )
            .await
            .unwrap();
        assert_eq!(applied, TransitionOutcome::Applied);
        let inst = store
            .get_instance(FsmKind::Ingestion, &entity)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inst.current_state, FsmState::Processing);
        assert_eq!(inst.previous_state, Some(FsmState::Received));
        assert_eq!(store.history(FsmKind::Ingestion, &entity).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_pattern_version_is_unique_violation() {
        let store = InMemoryStore::new();
        let domain = DomainId::new();
        let p = pattern(domain);
        store.insert_pattern(&p).await.unwrap();

        let mut dup = pattern(domain);
        dup.id = PatternId::new();
        assert!(matches!(
            store.insert_pattern(&dup).await,
            Err(StoreError::UniqueViolation(_))
        ));
    }

    #[tokio::test]
    async fn supersedes_cycle_is_rejected() {
        let store = InMemoryStore::new();
        let domain = DomainId::new();
        let a = pattern(domain);
        let mut b = pattern(domain);
        b.id = PatternId::new();
        b.version = 2;
        store.insert_pattern(&a).await.unwrap();
        store.insert_pattern(&b).await.unwrap();

        store.link_supersedes(&a.id, &b.id).await.unwrap();
        assert!(matches!(
            store.link_supersedes(&b.id, &a.id).await,
            Err(StoreError::LineageCycle { .. })
        ));
    }

    #[tokio::test]
    async fn injected_fault_rolls_back_whole_transition() {
        let store = InMemoryStore::new();
        let domain = DomainId::new();
        let mut p = pattern(domain);
        p.status = PatternStatus::Provisional;
        store.insert_pattern(&p).await.unwrap();

        store.fail_next_lifecycle_transition().await;
        let transition = LifecycleTransitionRow {
            pattern_id: p.id,
            from_status: PatternStatus::Provisional,
            to_status: PatternStatus::Validated,
            actor: "reducer".into(),
            reason: "promotion".into(),
            correlation_id: CorrelationId::new(),
            occurred_at: t("2026-03-01T01:00:00Z"),
        };
        let err = store
            .apply_lifecycle_transition(&p.id, PatternStatus::Validated, &transition, None)
            .await;
        assert!(err.is_err());

        // Nothing landed: status, audit log and lifecycle row are untouched.
        let stored = store.get_pattern(&p.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PatternStatus::Provisional);
        assert!(store.lifecycle_transitions(&p.id).await.unwrap().is_empty());
        assert_eq!(
            store.get_lifecycle(&p.id).await.unwrap().unwrap().transition_count,
            0
        );
    }

    #[tokio::test]
    async fn disabled_current_tracks_latest_event() {
        let store = InMemoryStore::new();
        let domain = DomainId::new();
        let mut p = pattern(domain);
        p.status = PatternStatus::Provisional;
        store.insert_pattern(&p).await.unwrap();

        for (i, at) in ["2026-03-01T01:00:00Z", "2026-03-01T02:00:00Z"].iter().enumerate() {
            let to = if i == 0 { PatternStatus::Deprecated } else { PatternStatus::Archived };
            let from = if i == 0 { PatternStatus::Provisional } else { PatternStatus::Deprecated };
            let transition = LifecycleTransitionRow {
                pattern_id: p.id,
                from_status: from,
                to_status: to,
                actor: "reducer".into(),
                reason: format!("step {i}"),
                correlation_id: CorrelationId::new(),
                occurred_at: t(at),
            };
            let disable = DisableEventRow {
                event_id: mnemon_domain::EventId::new(),
                pattern_id: p.id,
                pattern_class: "edit_sequence".into(),
                actor: "reducer".into(),
                reason: format!("step {i}"),
                correlation_id: transition.correlation_id,
                event_at: t(at),
            };
            store
                .apply_lifecycle_transition(&p.id, to, &transition, Some(&disable))
                .await
                .unwrap();
        }

        let current = store.disabled_current().await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].event_at, t("2026-03-01T02:00:00Z"));
        assert_eq!(current[0].reason, "step 1");
    }
}
