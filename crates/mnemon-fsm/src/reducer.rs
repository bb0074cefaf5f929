use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mnemon_domain::{CorrelationId, EntityId, FsmAction, FsmKind, FsmState};
use mnemon_store::{FsmHistoryRow, FsmStore, LeaseOutcome, TransitionOutcome};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::FsmError;

/// Proof of exclusive mutation rights on one FSM instance, valid until
/// `expires_at`. Carries everything `transition` needs so the reducer never
/// re-reads state it already validated under the lease.
#[derive(Debug, Clone)]
pub struct LeaseToken {
    pub fsm_kind: FsmKind,
    pub entity_id: EntityId,
    pub lease_id: Uuid,
    pub lease_epoch: i64,
    pub expires_at: DateTime<Utc>,
    pub from_state: FsmState,
    /// When the instance entered `from_state`; basis for `duration_ms`.
    pub entered_at: DateTime<Utc>,
    pub action: FsmAction,
    pub payload: Value,
    pub correlation_id: CorrelationId,
    pub requester_id: String,
}

impl LeaseToken {
    /// Time left on the lease at `now`; zero once expired. Handlers derive
    /// their effective deadline as `min(handler_timeout, remaining)`.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone)]
pub enum ProposeOutcome {
    Granted(LeaseToken),
    /// Lost the compare-and-set. Retry only via message redelivery so
    /// idempotency accounting stays intact.
    Conflict {
        holder: Uuid,
        expires_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    Applied { to_state: FsmState },
    StaleLease,
}

/// The FSM reducer: the only component that writes `fsm_state`.
///
/// Mutual exclusion is the lease CAS in the store; legality is the static
/// edge set on `FsmKind`. Time is always passed in by the caller — the
/// reducer never reads a clock.
pub struct FsmReducer {
    store: Arc<dyn FsmStore>,
    lease_ttl: Duration,
}

impl FsmReducer {
    pub fn new(store: Arc<dyn FsmStore>, lease_ttl: Duration) -> Self {
        Self { store, lease_ttl }
    }

    /// Validate `action` against the entity's current state, then try to
    /// acquire the lease. The instance row is created on first contact.
    #[allow(clippy::too_many_arguments)]
    pub async fn propose(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
        action: FsmAction,
        payload: Value,
        correlation_id: CorrelationId,
        requester_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ProposeOutcome, FsmError> {
        let instance = self.store.ensure_instance(kind, entity_id, now).await?;

        // Illegal actions are rejected before any lease traffic: no state
        // change, no history row, nothing to release.
        if kind.apply(instance.current_state, action).is_none() {
            warn!(
                fsm_kind = %kind,
                entity_id = %entity_id,
                state = %instance.current_state,
                action = %action,
                correlation_id = %correlation_id,
                "invalid transition proposed"
            );
            return Err(FsmError::InvalidTransition {
                kind,
                from: instance.current_state,
                action,
            });
        }

        let lease_id = Uuid::new_v4();
        let expires_at = now + chrono::Duration::from_std(self.lease_ttl).expect("ttl fits");
        match self
            .store
            .try_acquire_lease(kind, entity_id, lease_id, expires_at, now)
            .await?
        {
            LeaseOutcome::Granted { lease_id, lease_epoch, expires_at } => {
                debug!(
                    fsm_kind = %kind,
                    entity_id = %entity_id,
                    lease_epoch,
                    requester_id,
                    "lease granted"
                );
                Ok(ProposeOutcome::Granted(LeaseToken {
                    fsm_kind: kind,
                    entity_id: entity_id.clone(),
                    lease_id,
                    lease_epoch,
                    expires_at,
                    from_state: instance.current_state,
                    entered_at: instance.transition_at,
                    action,
                    payload,
                    correlation_id,
                    requester_id: requester_id.to_string(),
                }))
            }
            LeaseOutcome::Held { holder, expires_at } => {
                debug!(
                    fsm_kind = %kind,
                    entity_id = %entity_id,
                    holder = %holder,
                    "lease contention"
                );
                Ok(ProposeOutcome::Conflict { holder, expires_at })
            }
        }
    }

    /// Apply the proposed transition. State change and history row land in
    /// one transaction; a stale or stolen lease applies nothing.
    pub async fn transition(
        &self,
        token: &LeaseToken,
        to_state: FsmState,
        metadata: Value,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, FsmError> {
        let expected = token
            .fsm_kind
            .apply(token.from_state, token.action)
            .ok_or(FsmError::InvalidTransition {
                kind: token.fsm_kind,
                from: token.from_state,
                action: token.action,
            })?;
        if expected != to_state {
            return Err(FsmError::TargetMismatch { declared: to_state, actual: expected });
        }

        let success = error_message.is_none();
        let history = FsmHistoryRow {
            fsm_kind: token.fsm_kind,
            entity_id: token.entity_id.clone(),
            from_state: token.from_state,
            to_state,
            action: token.action,
            duration_ms: (now - token.entered_at).num_milliseconds().max(0),
            success,
            error_message,
            correlation_id: token.correlation_id,
            occurred_at: now,
        };

        let metadata = if metadata.is_null() { token.payload.clone() } else { metadata };
        let outcome = self
            .store
            .transition_with_lease(
                token.fsm_kind,
                &token.entity_id,
                token.lease_id,
                token.lease_epoch,
                to_state,
                metadata,
                history,
                now,
            )
            .await?;

        match outcome {
            TransitionOutcome::Applied => {
                info!(
                    fsm_kind = %token.fsm_kind,
                    entity_id = %token.entity_id,
                    from = %token.from_state,
                    to = %to_state,
                    action = %token.action,
                    correlation_id = %token.correlation_id,
                    "transition applied"
                );
                Ok(TransitionResult::Applied { to_state })
            }
            TransitionOutcome::StaleLease => Ok(TransitionResult::StaleLease),
        }
    }

    /// Extend the lease by one TTL from `now`. Long-running handlers renew
    /// before expiry; a stale token cannot be renewed.
    pub async fn renew(
        &self,
        token: &mut LeaseToken,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, FsmError> {
        let expires_at = now + chrono::Duration::from_std(self.lease_ttl).expect("ttl fits");
        let outcome = self
            .store
            .renew_lease(
                token.fsm_kind,
                &token.entity_id,
                token.lease_id,
                token.lease_epoch,
                expires_at,
                now,
            )
            .await?;
        Ok(match outcome {
            TransitionOutcome::Applied => {
                token.expires_at = expires_at;
                TransitionResult::Applied { to_state: token.from_state }
            }
            TransitionOutcome::StaleLease => TransitionResult::StaleLease,
        })
    }

    pub async fn release(&self, token: &LeaseToken) -> Result<(), FsmError> {
        self.store
            .release_lease(
                token.fsm_kind,
                &token.entity_id,
                token.lease_id,
                token.lease_epoch,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_store::InMemoryStore;

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn t0() -> DateTime<Utc> {
        t("2026-03-01T00:00:00Z")
    }

    fn reducer(store: Arc<InMemoryStore>) -> FsmReducer {
        FsmReducer::new(store, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn propose_then_transition_appends_history() {
        let store = Arc::new(InMemoryStore::new());
        let reducer = reducer(store.clone());
        let entity = EntityId::new("session-1");

        let outcome = reducer
            .propose(
                FsmKind::Ingestion,
                &entity,
                FsmAction::BeginProcessing,
                Value::Null,
                CorrelationId::new(),
                "worker-a",
                t0(),
            )
            .await
            .unwrap();
        let ProposeOutcome::Granted(token) = outcome else {
            panic!("expected grant");
        };

        let applied = reducer
            .transition(&token, FsmState::Processing, Value::Null, None, t("2026-03-01T00:00:02Z"))
            .await
            .unwrap();
        assert_eq!(applied, TransitionResult::Applied { to_state: FsmState::Processing });

        let history = store.history(FsmKind::Ingestion, &entity).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_state, FsmState::Received);
        assert_eq!(history[0].to_state, FsmState::Processing);
        assert_eq!(history[0].duration_ms, 2000);
        assert!(history[0].success);
    }

    #[tokio::test]
    async fn two_proposers_race_one_wins() {
        let store = Arc::new(InMemoryStore::new());
        let reducer = reducer(store.clone());
        let entity = EntityId::new("E7");

        let first = reducer
            .propose(
                FsmKind::PatternLearning,
                &entity,
                FsmAction::BeginMatching,
                Value::Null,
                CorrelationId::new(),
                "proposer-1",
                t0(),
            )
            .await
            .unwrap();
        let second = reducer
            .propose(
                FsmKind::PatternLearning,
                &entity,
                FsmAction::BeginMatching,
                Value::Null,
                CorrelationId::new(),
                "proposer-2",
                t0(),
            )
            .await
            .unwrap();

        let ProposeOutcome::Granted(token) = first else {
            panic!("first proposer should win");
        };
        assert!(matches!(second, ProposeOutcome::Conflict { .. }));

        reducer
            .transition(&token, FsmState::Matching, Value::Null, None, t("2026-03-01T00:00:01Z"))
            .await
            .unwrap();
        let history = store.history(FsmKind::PatternLearning, &entity).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn illegal_action_leaves_no_trace() {
        let store = Arc::new(InMemoryStore::new());
        let reducer = reducer(store.clone());
        let entity = EntityId::new("E4");

        // FOUNDATION's only outgoing edge is begin_matching.
        let err = reducer
            .propose(
                FsmKind::PatternLearning,
                &entity,
                FsmAction::Complete,
                Value::Null,
                CorrelationId::new(),
                "proposer",
                t0(),
            )
            .await;
        assert!(matches!(err, Err(FsmError::InvalidTransition { .. })));

        let instance = store
            .get_instance(FsmKind::PatternLearning, &entity)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.current_state, FsmState::Foundation);
        assert!(instance.lease_id.is_none());
        assert!(store
            .history(FsmKind::PatternLearning, &entity)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn new_proposer_wins_at_exact_expiry() {
        let store = Arc::new(InMemoryStore::new());
        let reducer = reducer(store.clone());
        let entity = EntityId::new("E5");

        let first = reducer
            .propose(
                FsmKind::Ingestion,
                &entity,
                FsmAction::BeginProcessing,
                Value::Null,
                CorrelationId::new(),
                "stale-holder",
                t0(),
            )
            .await
            .unwrap();
        let ProposeOutcome::Granted(stale_token) = first else {
            panic!("expected grant");
        };

        // Exactly at expiry the lease is takeable.
        let at_expiry = stale_token.expires_at;
        let second = reducer
            .propose(
                FsmKind::Ingestion,
                &entity,
                FsmAction::BeginProcessing,
                Value::Null,
                CorrelationId::new(),
                "fresh-holder",
                at_expiry,
            )
            .await
            .unwrap();
        let ProposeOutcome::Granted(fresh_token) = second else {
            panic!("fresh proposer should win at expiry instant");
        };

        // The stale holder's writes are refused...
        let stale = reducer
            .transition(&stale_token, FsmState::Processing, Value::Null, None, at_expiry)
            .await
            .unwrap();
        assert_eq!(stale, TransitionResult::StaleLease);

        // ...and the fresh holder's go through.
        let applied = reducer
            .transition(&fresh_token, FsmState::Processing, Value::Null, None, at_expiry)
            .await
            .unwrap();
        assert!(matches!(applied, TransitionResult::Applied { .. }));
    }

    #[tokio::test]
    async fn renew_extends_and_release_frees() {
        let store = Arc::new(InMemoryStore::new());
        let reducer = reducer(store.clone());
        let entity = EntityId::new("E6");

        let ProposeOutcome::Granted(mut token) = reducer
            .propose(
                FsmKind::QualityAssessment,
                &entity,
                FsmAction::BeginAssessment,
                Value::Null,
                CorrelationId::new(),
                "worker",
                t0(),
            )
            .await
            .unwrap()
        else {
            panic!("expected grant");
        };

        let renewed_at = t("2026-03-01T00:04:00Z");
        let renewed = reducer.renew(&mut token, renewed_at).await.unwrap();
        assert!(matches!(renewed, TransitionResult::Applied { .. }));
        assert_eq!(token.expires_at, renewed_at + chrono::Duration::seconds(300));

        reducer.release(&token).await.unwrap();
        let other = reducer
            .propose(
                FsmKind::QualityAssessment,
                &entity,
                FsmAction::BeginAssessment,
                Value::Null,
                CorrelationId::new(),
                "other",
                t("2026-03-01T00:04:01Z"),
            )
            .await
            .unwrap();
        assert!(matches!(other, ProposeOutcome::Granted(_)));
    }

    #[tokio::test]
    async fn history_count_equals_state_changes() {
        let store = Arc::new(InMemoryStore::new());
        let reducer = reducer(store.clone());
        let entity = EntityId::new("E10");

        let steps = [
            (FsmAction::BeginMatching, FsmState::Matching),
            (FsmAction::BeginValidation, FsmState::Validation),
            (FsmAction::BeginTraceability, FsmState::Traceability),
            (FsmAction::Complete, FsmState::Completed),
        ];
        let mut at = t0();
        for (action, to) in steps {
            at += chrono::Duration::seconds(1);
            let ProposeOutcome::Granted(token) = reducer
                .propose(
                    FsmKind::PatternLearning,
                    &entity,
                    action,
                    Value::Null,
                    CorrelationId::new(),
                    "pipeline",
                    at,
                )
                .await
                .unwrap()
            else {
                panic!("expected grant");
            };
            reducer
                .transition(&token, to, Value::Null, None, at)
                .await
                .unwrap();
            reducer.release(&token).await.unwrap();
        }

        let history = store
            .history(FsmKind::PatternLearning, &entity)
            .await
            .unwrap();
        assert_eq!(history.len(), 4);
        // Every row is a legal edge.
        for row in &history {
            assert_eq!(
                FsmKind::PatternLearning.apply(row.from_state, row.action),
                Some(row.to_state)
            );
        }
    }
}
