use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemon_domain::{
    DomainId, EntityId, FindingFixPair, FindingId, FsmKind, FsmState, LearnedPattern,
    PatternCandidate, PatternId, PatternInjection, PatternStatus, ReviewFinding, ReviewFix,
    RoutingFeedbackScore, SessionId,
};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;
use crate::rows::{
    DbMetadata, DisableEventRow, DomainTaxonomyRow, FsmHistoryRow, FsmInstance, LeaseOutcome,
    LifecycleTransitionRow, PatternLifecycleRow, TransitionOutcome, WorkflowExecution,
};

// ── FSM aggregate ─────────────────────────────────────────────────────────────

/// Persistence for FSM instances, leases and history. The FSM reducer is the
/// only caller of the mutating methods; the lease CAS itself lives here so
/// that both store backends enforce identical semantics.
#[async_trait]
pub trait FsmStore: Send + Sync + 'static {
    async fn get_instance(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
    ) -> Result<Option<FsmInstance>, StoreError>;

    /// Insert the initial-state row for `(kind, entity_id)` unless it
    /// already exists. Returns the row either way.
    async fn ensure_instance(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
        now: DateTime<Utc>,
    ) -> Result<FsmInstance, StoreError>;

    /// Compare-and-set lease acquisition. Succeeds when the row carries no
    /// lease or its `lease_expires_at <= now`; the epoch increments on every
    /// grant. Exactly one concurrent caller can win.
    async fn try_acquire_lease(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
        new_lease_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome, StoreError>;

    /// Extend a held lease. `StaleLease` via `TransitionOutcome` when the
    /// presented pair no longer matches.
    async fn renew_lease(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
        lease_id: Uuid,
        lease_epoch: i64,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Apply a state change guarded by `(lease_id, lease_epoch)` and append
    /// the history row in the same transaction. No history without a state
    /// change; no state change without history.
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
    ) -> Result<TransitionOutcome, StoreError>;

    /// Drop the lease if the presented pair still matches; harmless no-op
    /// otherwise.
    async fn release_lease(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
        lease_id: Uuid,
        lease_epoch: i64,
    ) -> Result<(), StoreError>;

    async fn history(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
    ) -> Result<Vec<FsmHistoryRow>, StoreError>;

    /// Delete history rows older than the cutoff. Returns the count removed.
    async fn prune_history(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;
}

// ── Pattern aggregate ─────────────────────────────────────────────────────────

#[async_trait]
pub trait PatternStore: Send + Sync + 'static {
    async fn get_pattern(&self, id: &PatternId) -> Result<Option<LearnedPattern>, StoreError>;

    /// Latest version for `(signature_hash, domain_id)`, if any.
    async fn latest_by_signature(
        &self,
        signature_hash: &str,
        domain_id: &DomainId,
    ) -> Result<Option<LearnedPattern>, StoreError>;

    /// Insert a new pattern version. Fails with `UniqueViolation` when
    /// `(signature_hash, domain_id, version)` already exists — the learning
    /// pipeline treats that as an idempotent replay, not an error.
    async fn insert_pattern(&self, pattern: &LearnedPattern) -> Result<(), StoreError>;

    /// Point the superseded pattern at its successor. Rejects edges that
    /// would close a cycle in the supersedes lineage.
    async fn link_supersedes(
        &self,
        old_id: &PatternId,
        new_id: &PatternId,
    ) -> Result<(), StoreError>;

    async fn list_patterns(
        &self,
        status: Option<PatternStatus>,
        limit: u32,
    ) -> Result<Vec<LearnedPattern>, StoreError>;

    /// All `(id, supersedes)` edges, for lineage traversal.
    async fn lineage_edges(&self) -> Result<Vec<(PatternId, Option<PatternId>)>, StoreError>;

    /// Atomically apply one lifecycle transition: update the pattern row's
    /// status, upsert the current-lifecycle row, append the audit row, and —
    /// when `disable` is set — append the disable event and refresh the
    /// current-disabled view. All five effects commit or roll back together.
    async fn apply_lifecycle_transition(
        &self,
        pattern_id: &PatternId,
        to_status: PatternStatus,
        transition: &LifecycleTransitionRow,
        disable: Option<&DisableEventRow>,
    ) -> Result<(), StoreError>;

    /// Success-metric write-back, routed through the lifecycle reducer so
    /// pattern rows stay single-writer.
    async fn update_success_metrics(
        &self,
        pattern_id: &PatternId,
        match_count: i64,
        success_rate: f64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get_lifecycle(
        &self,
        pattern_id: &PatternId,
    ) -> Result<Option<PatternLifecycleRow>, StoreError>;

    async fn lifecycle_transitions(
        &self,
        pattern_id: &PatternId,
    ) -> Result<Vec<LifecycleTransitionRow>, StoreError>;

    /// The materialized view: latest disable event per pattern.
    async fn disabled_current(&self) -> Result<Vec<DisableEventRow>, StoreError>;

    async fn upsert_candidate(&self, candidate: &PatternCandidate) -> Result<(), StoreError>;

    async fn list_candidates(
        &self,
        min_confidence: f64,
    ) -> Result<Vec<PatternCandidate>, StoreError>;
}

// ── Review aggregate ──────────────────────────────────────────────────────────

/// Outcome of a conditional pair insert.
#[derive(Debug, Clone, PartialEq)]
pub enum PairInsert {
    Inserted,
    /// A pair for `(finding_id, fix_commit_sha)` already exists; duplicate
    /// emissions collapse here.
    AlreadyExists,
}

#[async_trait]
pub trait ReviewStore: Send + Sync + 'static {
    /// Idempotent by `finding_id`: replaying the same observation is a no-op.
    async fn upsert_finding(&self, finding: &ReviewFinding) -> Result<(), StoreError>;

    async fn get_finding(
        &self,
        finding_id: &FindingId,
    ) -> Result<Option<ReviewFinding>, StoreError>;

    /// Idempotent by `fix_id`.
    async fn upsert_fix(&self, fix: &ReviewFix) -> Result<(), StoreError>;

    async fn fixes_for_finding(
        &self,
        finding_id: &FindingId,
    ) -> Result<Vec<ReviewFix>, StoreError>;

    /// Unique on `(finding_id, fix_commit_sha)`.
    async fn try_insert_pair(&self, pair: &FindingFixPair) -> Result<PairInsert, StoreError>;

    async fn get_pair(
        &self,
        finding_id: &FindingId,
        fix_commit_sha: &str,
    ) -> Result<Option<FindingFixPair>, StoreError>;

    /// Overwrite the pair row for the pair's `(finding_id, fix_commit_sha)`
    /// key. Used when a later fix in the same commit wins the tie-break.
    async fn replace_pair(&self, pair: &FindingFixPair) -> Result<(), StoreError>;

    /// Flip `disappearance_confirmed` on an existing pair; returns the
    /// updated row or `NotFound`.
    async fn confirm_pair(
        &self,
        finding_id: &FindingId,
        fix_commit_sha: &str,
    ) -> Result<FindingFixPair, StoreError>;

    /// Pairs at or above the confidence floor — the promotion input set.
    async fn pairs_above_floor(&self, floor: f64) -> Result<Vec<FindingFixPair>, StoreError>;
}

// ── Feedback aggregate ────────────────────────────────────────────────────────

#[async_trait]
pub trait FeedbackStore: Send + Sync + 'static {
    /// Idempotent by unique `session_id`.
    async fn upsert_score(&self, score: &RoutingFeedbackScore) -> Result<(), StoreError>;

    async fn get_score(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<RoutingFeedbackScore>, StoreError>;

    async fn record_injection(&self, injection: &PatternInjection) -> Result<(), StoreError>;

    async fn injections_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<PatternInjection>, StoreError>;
}

// ── Metadata & workflow aggregate ────────────────────────────────────────────

#[async_trait]
pub trait MetaStore: Send + Sync + 'static {
    async fn get_metadata(&self) -> Result<Option<DbMetadata>, StoreError>;

    /// Create the singleton row if missing; otherwise leave it untouched.
    async fn init_metadata(&self, metadata: &DbMetadata) -> Result<(), StoreError>;

    async fn set_schema_version(&self, version: i32) -> Result<(), StoreError>;

    async fn record_handshake(&self, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn record_workflow_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<(), StoreError>;

    async fn finish_workflow_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<(), StoreError>;

    async fn get_domain(
        &self,
        domain_id: &DomainId,
    ) -> Result<Option<DomainTaxonomyRow>, StoreError>;

    async fn upsert_domain(&self, domain: &DomainTaxonomyRow) -> Result<(), StoreError>;
}

/// The full persistence surface. Both backends implement every aggregate;
/// single-writer discipline is enforced by which component holds which
/// trait object, not by the store.
pub trait Store:
    FsmStore + PatternStore + ReviewStore + FeedbackStore + MetaStore + Send + Sync + 'static
{
}

impl<T> Store for T where
    T: FsmStore + PatternStore + ReviewStore + FeedbackStore + MetaStore + Send + Sync + 'static
{
}
