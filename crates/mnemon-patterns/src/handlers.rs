use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mnemon_domain::{
    ArchivePatternV1, ClaudeHookEventV1, DeprecatePatternV1, DisablePatternV1, EntityId, Envelope,
    ErrorKind, EventId, EventPayload, FsmAction, FsmKind, FsmState, HookKind, IntentClassifiedV1,
    LearnPatternsV1, PatternDeprecatedV1, PatternLifecycleTransitionV1, PatternPromotedV1,
    PatternStatus, ProducerId, PromotePatternV1, SessionId,
};
use mnemon_dispatch::{Handler, HandlerContext, Outcome};
use mnemon_fsm::{FsmReducer, ProposeOutcome};
use serde_json::Value;
use tracing::warn;

use crate::error::PatternError;
use crate::intent::classify_intent;
use crate::lifecycle::{LifecycleOutcome, LifecycleReducer};
use crate::pipeline::LearningPipeline;

/// Convert a pattern-side failure into the dispatch outcome the error
/// taxonomy prescribes.
fn failure_outcome(e: PatternError) -> Outcome {
    match e {
        PatternError::LeaseConflict { .. } => {
            Outcome::retry(ErrorKind::Conflict, e.to_string())
        }
        PatternError::Fsm(mnemon_fsm::FsmError::InvalidTransition { .. })
        | PatternError::Fsm(mnemon_fsm::FsmError::TargetMismatch { .. })
        | PatternError::InvalidLifecycleTransition { .. }
        | PatternError::InsufficientEvidence { .. }
        | PatternError::LineageCycle(_) => Outcome::reject(ErrorKind::InvalidTransition, e.to_string()),
        PatternError::Store(mnemon_store::StoreError::NotFound(_)) => {
            Outcome::reject(ErrorKind::Quarantined, e.to_string())
        }
        PatternError::Store(_) | PatternError::Fsm(mnemon_fsm::FsmError::Store(_)) => {
            Outcome::retry(ErrorKind::TransientIo, e.to_string())
        }
        PatternError::Memory(_) => Outcome::retry(ErrorKind::TransientIo, e.to_string()),
        PatternError::Serialization(_) | PatternError::Domain(_) => {
            Outcome::reject(ErrorKind::SchemaViolation, e.to_string())
        }
    }
}

// ── Learning command ──────────────────────────────────────────────────────────

pub struct LearnPatternsHandler {
    pipeline: Arc<LearningPipeline>,
}

impl LearnPatternsHandler {
    pub fn new(pipeline: Arc<LearningPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl Handler for LearnPatternsHandler {
    fn name(&self) -> &'static str {
        "learn_patterns"
    }

    async fn handle(&self, envelope: &Envelope, ctx: &HandlerContext) -> Outcome {
        let cmd: LearnPatternsV1 = match envelope.payload_as() {
            Ok(cmd) => cmd,
            Err(e) => return Outcome::reject(ErrorKind::SchemaViolation, e.to_string()),
        };
        match self.pipeline.run(&cmd, ctx.correlation_id, ctx.now).await {
            Ok(report) => Outcome::Ok(report.produced),
            Err(e) => failure_outcome(e),
        }
    }
}

// ── Lifecycle commands ────────────────────────────────────────────────────────

pub struct PromotePatternHandler {
    reducer: Arc<LifecycleReducer>,
    producer_id: ProducerId,
}

impl PromotePatternHandler {
    pub fn new(reducer: Arc<LifecycleReducer>, producer_id: ProducerId) -> Self {
        Self { reducer, producer_id }
    }
}

fn transition_event(
    outcome: &LifecycleOutcome,
    actor: &str,
    reason: &str,
    producer_id: &ProducerId,
    ctx: &HandlerContext,
) -> Result<Envelope, mnemon_domain::DomainError> {
    PatternLifecycleTransitionV1 {
        event_id: EventId::new(),
        pattern_id: outcome.pattern_id,
        from_status: outcome.from_status,
        to_status: outcome.to_status,
        actor: actor.to_string(),
        reason: reason.to_string(),
        transitioned_at: outcome.occurred_at,
    }
    .into_envelope(ctx.correlation_id, producer_id.clone(), ctx.now)
}

#[async_trait]
impl Handler for PromotePatternHandler {
    fn name(&self) -> &'static str {
        "promote_pattern"
    }

    async fn handle(&self, envelope: &Envelope, ctx: &HandlerContext) -> Outcome {
        let cmd: PromotePatternV1 = match envelope.payload_as() {
            Ok(cmd) => cmd,
            Err(e) => return Outcome::reject(ErrorKind::SchemaViolation, e.to_string()),
        };
        let outcome = match self
            .reducer
            .promote(&cmd.pattern_id, &cmd.actor, &cmd.reason, ctx.correlation_id, ctx.now)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return failure_outcome(e),
        };

        let promoted = PatternPromotedV1 {
            event_id: EventId::new(),
            pattern_id: outcome.pattern_id,
            from_status: outcome.from_status,
            to_status: outcome.to_status,
            promoted_at: outcome.occurred_at,
        }
        .into_envelope(ctx.correlation_id, self.producer_id.clone(), ctx.now);
        let audit = transition_event(&outcome, &cmd.actor, &cmd.reason, &self.producer_id, ctx);
        match (promoted, audit) {
            (Ok(a), Ok(b)) => Outcome::Ok(vec![a, b]),
            (Err(e), _) | (_, Err(e)) => {
                Outcome::reject(ErrorKind::SchemaViolation, e.to_string())
            }
        }
    }
}

pub struct DeprecatePatternHandler {
    reducer: Arc<LifecycleReducer>,
    producer_id: ProducerId,
}

impl DeprecatePatternHandler {
    pub fn new(reducer: Arc<LifecycleReducer>, producer_id: ProducerId) -> Self {
        Self { reducer, producer_id }
    }

    async fn deprecate(
        &self,
        pattern_id: &mnemon_domain::PatternId,
        actor: &str,
        reason: &str,
        ctx: &HandlerContext,
    ) -> Result<Vec<Envelope>, Outcome> {
        let outcome = self
            .reducer
            .transition(
                pattern_id,
                PatternStatus::Deprecated,
                actor,
                reason,
                ctx.correlation_id,
                ctx.now,
            )
            .await
            .map_err(failure_outcome)?;

        let deprecated = PatternDeprecatedV1 {
            event_id: EventId::new(),
            pattern_id: outcome.pattern_id,
            from_status: outcome.from_status,
            reason: reason.to_string(),
            deprecated_at: outcome.occurred_at,
        }
        .into_envelope(ctx.correlation_id, self.producer_id.clone(), ctx.now)
        .map_err(|e| Outcome::reject(ErrorKind::SchemaViolation, e.to_string()))?;
        let audit = transition_event(&outcome, actor, reason, &self.producer_id, ctx)
            .map_err(|e| Outcome::reject(ErrorKind::SchemaViolation, e.to_string()))?;
        Ok(vec![deprecated, audit])
    }
}

#[async_trait]
impl Handler for DeprecatePatternHandler {
    fn name(&self) -> &'static str {
        "deprecate_pattern"
    }

    async fn handle(&self, envelope: &Envelope, ctx: &HandlerContext) -> Outcome {
        let cmd: DeprecatePatternV1 = match envelope.payload_as() {
            Ok(cmd) => cmd,
            Err(e) => return Outcome::reject(ErrorKind::SchemaViolation, e.to_string()),
        };
        match self.deprecate(&cmd.pattern_id, &cmd.actor, &cmd.reason, ctx).await {
            Ok(events) => Outcome::Ok(events),
            Err(outcome) => outcome,
        }
    }
}

/// Disable rides the same PROVISIONAL|VALIDATED → DEPRECATED edge; the
/// command's `pattern_class` is advisory and logged if it disagrees with
/// the stored pattern type.
pub struct DisablePatternHandler {
    inner: DeprecatePatternHandler,
}

impl DisablePatternHandler {
    pub fn new(reducer: Arc<LifecycleReducer>, producer_id: ProducerId) -> Self {
        Self { inner: DeprecatePatternHandler::new(reducer, producer_id) }
    }
}

#[async_trait]
impl Handler for DisablePatternHandler {
    fn name(&self) -> &'static str {
        "disable_pattern"
    }

    async fn handle(&self, envelope: &Envelope, ctx: &HandlerContext) -> Outcome {
        let cmd: DisablePatternV1 = match envelope.payload_as() {
            Ok(cmd) => cmd,
            Err(e) => return Outcome::reject(ErrorKind::SchemaViolation, e.to_string()),
        };
        match self
            .inner
            .deprecate(&cmd.pattern_id, &cmd.actor, &cmd.reason, ctx)
            .await
        {
            Ok(events) => Outcome::Ok(events),
            Err(outcome) => outcome,
        }
    }
}

pub struct ArchivePatternHandler {
    reducer: Arc<LifecycleReducer>,
    producer_id: ProducerId,
}

impl ArchivePatternHandler {
    pub fn new(reducer: Arc<LifecycleReducer>, producer_id: ProducerId) -> Self {
        Self { reducer, producer_id }
    }
}

#[async_trait]
impl Handler for ArchivePatternHandler {
    fn name(&self) -> &'static str {
        "archive_pattern"
    }

    async fn handle(&self, envelope: &Envelope, ctx: &HandlerContext) -> Outcome {
        let cmd: ArchivePatternV1 = match envelope.payload_as() {
            Ok(cmd) => cmd,
            Err(e) => return Outcome::reject(ErrorKind::SchemaViolation, e.to_string()),
        };
        let outcome = match self
            .reducer
            .transition(
                &cmd.pattern_id,
                PatternStatus::Archived,
                &cmd.actor,
                &cmd.reason,
                ctx.correlation_id,
                ctx.now,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return failure_outcome(e),
        };
        match transition_event(&outcome, &cmd.actor, &cmd.reason, &self.producer_id, ctx) {
            Ok(event) => Outcome::Ok(vec![event]),
            Err(e) => Outcome::reject(ErrorKind::SchemaViolation, e.to_string()),
        }
    }
}

// ── Hook ingestion & intent classification ────────────────────────────────────

const HOOK_BUFFER_SESSIONS: usize = 4096;

/// Consumes developer-activity hook events: drives the per-session
/// ingestion FSM and, when the session ends, runs the pure intent
/// classifier over the buffered events and emits `intent_classified`.
pub struct ClaudeHookHandler {
    fsm: Arc<FsmReducer>,
    producer_id: ProducerId,
    /// Per-session hook buffer. Bounded; a session evicted under pressure
    /// simply classifies from whatever remains.
    buffer: Mutex<HashMap<SessionId, Vec<ClaudeHookEventV1>>>,
}

impl ClaudeHookHandler {
    pub fn new(fsm: Arc<FsmReducer>, producer_id: ProducerId) -> Self {
        Self { fsm, producer_id, buffer: Mutex::new(HashMap::new()) }
    }

    async fn advance_ingestion(
        &self,
        session_id: &SessionId,
        action: FsmAction,
        to_state: FsmState,
        ctx: &HandlerContext,
    ) -> Result<(), Outcome> {
        let entity = EntityId::new(session_id.as_str());
        let propose = self
            .fsm
            .propose(
                FsmKind::Ingestion,
                &entity,
                action,
                Value::Null,
                ctx.correlation_id,
                "hook-ingest",
                ctx.now,
            )
            .await;
        match propose {
            Ok(ProposeOutcome::Granted(token)) => {
                let result = self.fsm.transition(&token, to_state, Value::Null, None, ctx.now).await;
                let _ = self.fsm.release(&token).await;
                match result {
                    Ok(_) => Ok(()),
                    Err(e) => Err(failure_outcome(e.into())),
                }
            }
            Ok(ProposeOutcome::Conflict { holder, .. }) => Err(Outcome::retry(
                ErrorKind::Conflict,
                format!("ingestion lease held by {holder}"),
            )),
            // The FSM may already be past this edge on redelivery; that is
            // not an error for ingestion bookkeeping.
            Err(mnemon_fsm::FsmError::InvalidTransition { .. }) => Ok(()),
            Err(e) => Err(failure_outcome(e.into())),
        }
    }
}

#[async_trait]
impl Handler for ClaudeHookHandler {
    fn name(&self) -> &'static str {
        "claude_hook_event"
    }

    async fn handle(&self, envelope: &Envelope, ctx: &HandlerContext) -> Outcome {
        let event: ClaudeHookEventV1 = match envelope.payload_as() {
            Ok(event) => event,
            Err(e) => return Outcome::reject(ErrorKind::SchemaViolation, e.to_string()),
        };
        let session_id = event.session_id.clone();

        if let Err(outcome) = self
            .advance_ingestion(&session_id, FsmAction::BeginProcessing, FsmState::Processing, ctx)
            .await
        {
            return outcome;
        }

        let ended = event.hook == HookKind::SessionEnded;
        {
            let mut guard = self.buffer.lock().expect("hook buffer lock poisoned");
            if guard.len() >= HOOK_BUFFER_SESSIONS && !guard.contains_key(&session_id) {
                warn!(sessions = guard.len(), "hook buffer full, evicting oldest session");
                if let Some(oldest) = guard.keys().next().cloned() {
                    guard.remove(&oldest);
                }
            }
            guard.entry(session_id.clone()).or_default().push(event);
        }

        if !ended {
            return Outcome::Ok(vec![]);
        }

        let events = self
            .buffer
            .lock()
            .expect("hook buffer lock poisoned")
            .remove(&session_id)
            .unwrap_or_default();
        let (intent, confidence) = classify_intent(&events);

        if let Err(outcome) = self
            .advance_ingestion(&session_id, FsmAction::CompleteIndexing, FsmState::Indexed, ctx)
            .await
        {
            return outcome;
        }

        let classified = IntentClassifiedV1 {
            session_id,
            intent,
            confidence,
            classified_at: ctx.now,
        }
        .into_envelope(ctx.correlation_id, self.producer_id.clone(), ctx.now);
        match classified {
            Ok(event) => Outcome::Ok(vec![event]),
            Err(e) => Outcome::reject(ErrorKind::SchemaViolation, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_domain::{CorrelationId, EventKind};
    use mnemon_store::{FsmStore, InMemoryStore};
    use std::time::Duration;

    fn ctx() -> HandlerContext {
        HandlerContext::new(
            CorrelationId::new(),
            "2026-03-01T00:00:00Z".parse().unwrap(),
            Duration::from_secs(60),
        )
    }

    fn hook_envelope(session: &str, hook: HookKind) -> Envelope {
        ClaudeHookEventV1 {
            session_id: SessionId::new(session),
            hook,
            tool_name: Some("cargo test".into()),
            file_path: Some("src/lib.rs".into()),
            detail: Value::Null,
            hooked_at: "2026-03-01T00:00:00Z".parse().unwrap(),
        }
        .into_envelope(
            CorrelationId::new(),
            ProducerId::new("hooks"),
            "2026-03-01T00:00:00Z".parse().unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn session_end_classifies_and_indexes() {
        let store = Arc::new(InMemoryStore::new());
        let fsm = Arc::new(FsmReducer::new(store.clone(), Duration::from_secs(300)));
        let handler = ClaudeHookHandler::new(fsm, ProducerId::new("mnemon"));

        let c = ctx();
        let first = handler
            .handle(&hook_envelope("s1", HookKind::FileEdited), &c)
            .await;
        assert!(matches!(first, Outcome::Ok(ref v) if v.is_empty()));

        let last = handler
            .handle(&hook_envelope("s1", HookKind::SessionEnded), &c)
            .await;
        let Outcome::Ok(events) = last else {
            panic!("expected ok");
        };
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::IntentClassified);

        let instance = store
            .get_instance(FsmKind::Ingestion, &EntityId::new("s1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.current_state, FsmState::Indexed);
    }

    #[tokio::test]
    async fn malformed_payload_is_schema_violation() {
        let store = Arc::new(InMemoryStore::new());
        let fsm = Arc::new(FsmReducer::new(store, Duration::from_secs(300)));
        let handler = ClaudeHookHandler::new(fsm, ProducerId::new("mnemon"));

        let mut envelope = hook_envelope("s1", HookKind::FileEdited);
        envelope.payload = serde_json::json!({"nonsense": true});
        let outcome = handler.handle(&envelope, &ctx()).await;
        assert!(matches!(
            outcome,
            Outcome::Reject { kind: ErrorKind::SchemaViolation, .. }
        ));
    }
}
