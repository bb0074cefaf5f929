use std::sync::Arc;

use async_trait::async_trait;
use mnemon_domain::{
    Envelope, ErrorKind, EventPayload, FindingObservedV1, FindingResolvedV1, FixAppliedV1,
    PairCreatedV1, PatternInjectedV1, ProducerId, SessionOutcomeV1,
};
use mnemon_dispatch::{Handler, HandlerContext, Outcome};

use crate::error::ReviewError;
use crate::feedback::FeedbackScorer;
use crate::pairing::PairingEngine;

fn failure_outcome(e: ReviewError) -> Outcome {
    match e {
        ReviewError::Store(mnemon_store::StoreError::NotFound(_)) => {
            Outcome::reject(ErrorKind::Quarantined, e.to_string())
        }
        ReviewError::Store(_) => Outcome::retry(ErrorKind::TransientIo, e.to_string()),
        ReviewError::Domain(_) | ReviewError::Serialization(_) => {
            Outcome::reject(ErrorKind::SchemaViolation, e.to_string())
        }
        ReviewError::Pattern(inner) => match inner {
            mnemon_patterns::PatternError::Store(mnemon_store::StoreError::NotFound(_)) => {
                Outcome::reject(ErrorKind::Quarantined, inner.to_string())
            }
            mnemon_patterns::PatternError::Store(_) | mnemon_patterns::PatternError::Memory(_) => {
                Outcome::retry(ErrorKind::TransientIo, inner.to_string())
            }
            other => Outcome::reject(ErrorKind::Quarantined, other.to_string()),
        },
    }
}

// ── Pairing handlers ──────────────────────────────────────────────────────────

pub struct FindingObservedHandler {
    engine: Arc<PairingEngine>,
}

impl FindingObservedHandler {
    pub fn new(engine: Arc<PairingEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Handler for FindingObservedHandler {
    fn name(&self) -> &'static str {
        "finding_observed"
    }

    async fn handle(&self, envelope: &Envelope, _ctx: &HandlerContext) -> Outcome {
        let event: FindingObservedV1 = match envelope.payload_as() {
            Ok(event) => event,
            Err(e) => return Outcome::reject(ErrorKind::SchemaViolation, e.to_string()),
        };
        if let Err(e) = event.validate() {
            return Outcome::reject(ErrorKind::SchemaViolation, e.to_string());
        }
        match self.engine.observe_finding(&event).await {
            Ok(()) => Outcome::Ok(vec![]),
            Err(e) => failure_outcome(e),
        }
    }
}

pub struct FixAppliedHandler {
    engine: Arc<PairingEngine>,
}

impl FixAppliedHandler {
    pub fn new(engine: Arc<PairingEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Handler for FixAppliedHandler {
    fn name(&self) -> &'static str {
        "fix_applied"
    }

    async fn handle(&self, envelope: &Envelope, ctx: &HandlerContext) -> Outcome {
        let event: FixAppliedV1 = match envelope.payload_as() {
            Ok(event) => event,
            Err(e) => return Outcome::reject(ErrorKind::SchemaViolation, e.to_string()),
        };
        if let Err(e) = event.validate() {
            return Outcome::reject(ErrorKind::SchemaViolation, e.to_string());
        }
        match self.engine.apply_fix(&event, ctx.now).await {
            Ok(()) => Outcome::Ok(vec![]),
            Err(e) => failure_outcome(e),
        }
    }
}

pub struct FindingResolvedHandler {
    engine: Arc<PairingEngine>,
    producer_id: ProducerId,
}

impl FindingResolvedHandler {
    pub fn new(engine: Arc<PairingEngine>, producer_id: ProducerId) -> Self {
        Self { engine, producer_id }
    }
}

#[async_trait]
impl Handler for FindingResolvedHandler {
    fn name(&self) -> &'static str {
        "finding_resolved"
    }

    async fn handle(&self, envelope: &Envelope, ctx: &HandlerContext) -> Outcome {
        let event: FindingResolvedV1 = match envelope.payload_as() {
            Ok(event) => event,
            Err(e) => return Outcome::reject(ErrorKind::SchemaViolation, e.to_string()),
        };
        if let Err(e) = event.validate() {
            return Outcome::reject(ErrorKind::SchemaViolation, e.to_string());
        }

        let pair = match self.engine.resolve_finding(&event, ctx.now).await {
            Ok(pair) => pair,
            Err(e) => return failure_outcome(e),
        };
        let Some(pair) = pair else {
            // Duplicate resolution: nothing new downstream.
            return Outcome::Ok(vec![]);
        };

        let announced = PairCreatedV1 {
            pair_id: pair.pair_id,
            finding_id: pair.finding_id.clone(),
            fix_commit_sha: pair.fix_commit_sha.clone(),
            diff_hunks: pair.diff_hunks.clone(),
            confidence_score: pair.confidence_score,
            disappearance_confirmed: pair.disappearance_confirmed,
            pairing_type: pair.pairing_type,
            created_at: pair.created_at,
        }
        .into_envelope(ctx.correlation_id, self.producer_id.clone(), ctx.now);
        match announced {
            Ok(event) => Outcome::Ok(vec![event]),
            Err(e) => Outcome::reject(ErrorKind::SchemaViolation, e.to_string()),
        }
    }
}

// ── Feedback handlers ─────────────────────────────────────────────────────────

pub struct SessionOutcomeHandler {
    scorer: Arc<FeedbackScorer>,
}

impl SessionOutcomeHandler {
    pub fn new(scorer: Arc<FeedbackScorer>) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl Handler for SessionOutcomeHandler {
    fn name(&self) -> &'static str {
        "session_outcome"
    }

    async fn handle(&self, envelope: &Envelope, ctx: &HandlerContext) -> Outcome {
        let event: SessionOutcomeV1 = match envelope.payload_as() {
            Ok(event) => event,
            Err(e) => return Outcome::reject(ErrorKind::SchemaViolation, e.to_string()),
        };
        if let Err(e) = event.validate() {
            return Outcome::reject(ErrorKind::SchemaViolation, e.to_string());
        }
        match self.scorer.score_session(&event, ctx.now).await {
            Ok(()) => Outcome::Ok(vec![]),
            Err(e) => failure_outcome(e),
        }
    }
}

pub struct PatternInjectedHandler {
    scorer: Arc<FeedbackScorer>,
}

impl PatternInjectedHandler {
    pub fn new(scorer: Arc<FeedbackScorer>) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl Handler for PatternInjectedHandler {
    fn name(&self) -> &'static str {
        "pattern_injected"
    }

    async fn handle(&self, envelope: &Envelope, _ctx: &HandlerContext) -> Outcome {
        let event: PatternInjectedV1 = match envelope.payload_as() {
            Ok(event) => event,
            Err(e) => return Outcome::reject(ErrorKind::SchemaViolation, e.to_string()),
        };
        match self.scorer.record_injection(&event).await {
            Ok(()) => Outcome::Ok(vec![]),
            Err(e) => failure_outcome(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_domain::{
        CommitSha, CorrelationId, DomainId, EventKind, FindingId, FixId, LineRange, ResolutionId,
        RunId, Severity,
    };
    use mnemon_patterns::LifecycleReducer;
    use mnemon_store::InMemoryStore;
    use std::time::Duration;

    use crate::pairing::PairingConfig;

    fn ctx() -> HandlerContext {
        HandlerContext::new(
            CorrelationId::new(),
            "2026-03-01T12:00:00Z".parse().unwrap(),
            Duration::from_secs(60),
        )
    }

    fn engine(store: Arc<InMemoryStore>) -> Arc<PairingEngine> {
        Arc::new(PairingEngine::new(
            store.clone(),
            store,
            PairingConfig::new(0.5, DomainId::new()),
        ))
    }

    fn finding_envelope() -> Envelope {
        FindingObservedV1 {
            finding_id: FindingId::new("F1"),
            repo: "org/repo".into(),
            pr_id: 12,
            rule_id: "r1".into(),
            severity: Severity::Warning,
            file_path: "src/main.rs".into(),
            line_start: 10,
            line_end: Some(12),
            tool_name: "linter".into(),
            tool_version: "1.0".into(),
            normalized_message: "m".into(),
            raw_message: "m".into(),
            commit_sha_observed: CommitSha("c1aaaaa".into()),
            observed_at: "2026-03-01T10:00:00Z".parse().unwrap(),
        }
        .into_envelope(
            CorrelationId::new(),
            ProducerId::new("review-ingest"),
            "2026-03-01T10:00:01Z".parse().unwrap(),
        )
        .unwrap()
    }

    fn fix_envelope() -> Envelope {
        FixAppliedV1 {
            fix_id: FixId::new("X1"),
            finding_id: FindingId::new("F1"),
            fix_commit_sha: CommitSha("c2bbbbb".into()),
            file_path: "src/main.rs".into(),
            diff_hunks: vec!["@@ -9,5 +9,5 @@".into()],
            touched_line_range: LineRange(9, 13),
            tool_autofix: true,
            applied_at: "2026-03-01T11:00:00Z".parse().unwrap(),
        }
        .into_envelope(
            CorrelationId::new(),
            ProducerId::new("review-ingest"),
            "2026-03-01T11:00:01Z".parse().unwrap(),
        )
        .unwrap()
    }

    fn resolution_envelope() -> Envelope {
        FindingResolvedV1 {
            resolution_id: ResolutionId::new("R1"),
            finding_id: FindingId::new("F1"),
            fix_commit_sha: CommitSha("c2bbbbb".into()),
            verified_at_commit_sha: CommitSha("c3ccccc".into()),
            ci_run_id: RunId::new("ci-1"),
            resolved_at: "2026-03-01T12:00:00Z".parse().unwrap(),
        }
        .into_envelope(
            CorrelationId::new(),
            ProducerId::new("ci"),
            "2026-03-01T12:00:01Z".parse().unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn happy_pairing_emits_pair_created() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store.clone());
        let producer = ProducerId::new("mnemon");

        let c = ctx();
        let observed = FindingObservedHandler::new(engine.clone())
            .handle(&finding_envelope(), &c)
            .await;
        assert!(matches!(observed, Outcome::Ok(_)));

        let fixed = FixAppliedHandler::new(engine.clone())
            .handle(&fix_envelope(), &c)
            .await;
        assert!(matches!(fixed, Outcome::Ok(_)));

        let resolved = FindingResolvedHandler::new(engine, producer)
            .handle(&resolution_envelope(), &c)
            .await;
        let Outcome::Ok(events) = resolved else {
            panic!("expected ok outcome");
        };
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::PairCreated);

        let payload: PairCreatedV1 = events[0].payload_as().unwrap();
        assert_eq!(payload.confidence_score, 0.95);
        assert!(payload.disappearance_confirmed);
        assert_eq!(payload.pairing_type, mnemon_domain::PairingType::Autofix);
    }

    #[tokio::test]
    async fn invalid_pr_id_is_rejected_as_schema_violation() {
        let store = Arc::new(InMemoryStore::new());
        let handler = FindingObservedHandler::new(engine(store));

        let mut envelope = finding_envelope();
        envelope.payload["pr_id"] = serde_json::json!(0);
        let outcome = handler.handle(&envelope, &ctx()).await;
        assert!(matches!(
            outcome,
            Outcome::Reject { kind: ErrorKind::SchemaViolation, .. }
        ));
    }

    #[tokio::test]
    async fn session_outcome_without_injections_is_ok() {
        let store = Arc::new(InMemoryStore::new());
        let lifecycle = Arc::new(LifecycleReducer::new(store.clone(), 0.5));
        let scorer = Arc::new(FeedbackScorer::new(
            store.clone(),
            store.clone(),
            store,
            lifecycle,
        ));
        let handler = SessionOutcomeHandler::new(scorer);

        let envelope = SessionOutcomeV1 {
            session_id: mnemon_domain::SessionId::new("s1"),
            agent_selected: "rust-agent".into(),
            agent_recommended: "rust-agent".into(),
            routing_confidence: 0.8,
            injection_occurred: false,
            patterns_injected_count: 0,
            tool_calls_count: 2,
            duration_ms: 1000,
            ended_at: "2026-03-01T12:00:00Z".parse().unwrap(),
        }
        .into_envelope(
            CorrelationId::new(),
            ProducerId::new("router"),
            "2026-03-01T12:00:01Z".parse().unwrap(),
        )
        .unwrap();

        assert!(matches!(handler.handle(&envelope, &ctx()).await, Outcome::Ok(_)));
    }
}
