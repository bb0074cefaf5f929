use chrono::{DateTime, Utc};
use mnemon_domain::{
    CorrelationId, DomainId, EntityId, EventId, FsmAction, FsmKind, FsmState, PatternId,
    PatternStatus, SessionId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ── FSM rows ──────────────────────────────────────────────────────────────────

/// One `(fsm_kind, entity_id)` state-machine row, including its lease
/// columns. Created on the first event for the entity, mutated only through
/// a held lease, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsmInstance {
    pub fsm_kind: FsmKind,
    pub entity_id: EntityId,
    pub current_state: FsmState,
    pub previous_state: Option<FsmState>,
    pub transition_at: DateTime<Utc>,
    pub metadata: Value,
    pub lease_id: Option<Uuid>,
    /// Monotonic: incremented on every successful acquisition.
    pub lease_epoch: i64,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl FsmInstance {
    /// A fresh instance in the kind's initial state, with no lease.
    pub fn new(kind: FsmKind, entity_id: EntityId, created_at: DateTime<Utc>) -> Self {
        Self {
            fsm_kind: kind,
            entity_id,
            current_state: kind.initial_state(),
            previous_state: None,
            transition_at: created_at,
            metadata: Value::Null,
            lease_id: None,
            lease_epoch: 0,
            lease_expires_at: None,
        }
    }

    /// A lease is live strictly before its expiry instant; at the exact
    /// instant it is already expired and a new proposer may take over.
    pub fn lease_live_at(&self, now: DateTime<Utc>) -> bool {
        match (self.lease_id, self.lease_expires_at) {
            (Some(_), Some(expires)) => expires > now,
            _ => false,
        }
    }
}

/// Append-only record of one applied transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsmHistoryRow {
    pub fsm_kind: FsmKind,
    pub entity_id: EntityId,
    pub from_state: FsmState,
    pub to_state: FsmState,
    pub action: FsmAction,
    /// Time spent in `from_state`.
    pub duration_ms: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub correlation_id: CorrelationId,
    pub occurred_at: DateTime<Utc>,
}

/// Result of a lease acquisition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseOutcome {
    Granted {
        lease_id: Uuid,
        lease_epoch: i64,
        expires_at: DateTime<Utc>,
    },
    /// A live lease is held by someone else.
    Held {
        holder: Uuid,
        expires_at: DateTime<Utc>,
    },
}

/// Result of a lease-guarded transition write.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied,
    /// The presented `(lease_id, lease_epoch)` no longer matches the row,
    /// or the lease expired.
    StaleLease,
}

// ── Workflow executions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Succeeded => write!(f, "succeeded"),
            WorkflowStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A record of one pattern-learning pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub execution_id: Uuid,
    pub session_id: SessionId,
    pub correlation_id: CorrelationId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: WorkflowStatus,
    pub patterns_extracted: i32,
    pub patterns_learned: i32,
    pub error_message: Option<String>,
}

// ── Taxonomy ──────────────────────────────────────────────────────────────────

/// Default session-success duration ceiling when a domain row does not
/// override it: 15 minutes.
pub const DEFAULT_SESSION_DURATION_CEILING_MS: i64 = 900_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainTaxonomyRow {
    pub domain_id: DomainId,
    pub name: String,
    pub parent_id: Option<DomainId>,
    pub session_success_duration_ceiling_ms: i64,
}

// ── Pattern lifecycle rows ────────────────────────────────────────────────────

/// Current lifecycle row per pattern, maintained alongside the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternLifecycleRow {
    pub pattern_id: PatternId,
    pub status: PatternStatus,
    pub transition_count: i64,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit row; exactly one per successful transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleTransitionRow {
    pub pattern_id: PatternId,
    pub from_status: PatternStatus,
    pub to_status: PatternStatus,
    pub actor: String,
    pub reason: String,
    pub correlation_id: CorrelationId,
    pub occurred_at: DateTime<Utc>,
}

/// Append-only disable event. `disabled_patterns_current` exposes, per
/// pattern, the row with the latest `event_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisableEventRow {
    pub event_id: EventId,
    pub pattern_id: PatternId,
    pub pattern_class: String,
    pub actor: String,
    pub reason: String,
    pub correlation_id: CorrelationId,
    pub event_at: DateTime<Utc>,
}

// ── DB metadata singleton ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbMetadata {
    pub schema_version: i32,
    pub installed_by: String,
    pub installed_at: DateTime<Utc>,
    pub handshake_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_instance_starts_in_initial_state() {
        let inst = FsmInstance::new(
            FsmKind::PatternLearning,
            EntityId::new("E7"),
            "2026-03-01T00:00:00Z".parse().unwrap(),
        );
        assert_eq!(inst.current_state, FsmState::Foundation);
        assert_eq!(inst.lease_epoch, 0);
        assert!(inst.lease_id.is_none());
    }

    #[test]
    fn lease_expires_at_the_exact_instant() {
        let t0: DateTime<Utc> = "2026-03-01T00:00:00Z".parse().unwrap();
        let mut inst = FsmInstance::new(FsmKind::Ingestion, EntityId::new("e"), t0);
        inst.lease_id = Some(Uuid::new_v4());
        inst.lease_expires_at = Some(t0 + chrono::Duration::seconds(300));

        let just_before = t0 + chrono::Duration::seconds(299);
        let exactly = t0 + chrono::Duration::seconds(300);
        assert!(inst.lease_live_at(just_before));
        assert!(!inst.lease_live_at(exactly));
    }
}
