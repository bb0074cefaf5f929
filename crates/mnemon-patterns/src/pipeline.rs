use std::sync::Arc;

use chrono::{DateTime, Utc};
use mnemon_domain::{
    CorrelationId, Envelope, EntityId, EventId, EventPayload, FsmAction, FsmKind, FsmState,
    LearnPatternsV1, LearnedPattern, PatternId, PatternLearnedV1, PatternStatus, PatternStoredV1,
    ProducerId,
};
use mnemon_fsm::{FsmReducer, ProposeOutcome};
use mnemon_memsvc::{MemoryOp, MemoryRequest, MemoryService};
use mnemon_store::{MetaStore, PatternStore, WorkflowExecution, WorkflowStatus};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PatternError;
use crate::extract::{extract_patterns, ExtractedPattern};
use crate::signature::signature_hash;
use crate::trace::parse_trace;

/// Result of one learning-pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub execution_id: Uuid,
    pub patterns_extracted: usize,
    pub patterns_learned: usize,
    /// Events to emit with the inbound offset commit.
    pub produced: Vec<Envelope>,
}

/// The pattern-learning pipeline: trace parsing and extraction are pure;
/// the learning stage is the only I/O. A run drives the session's
/// pattern-learning FSM through its stages and each stored pattern's
/// quality-assessment FSM to STORED, records a workflow execution row, and
/// mirrors learned patterns into the external memory service.
///
/// The whole pipeline is safe to retry end-to-end: replays hit the same
/// signatures and collapse into no-op upserts.
pub struct LearningPipeline {
    patterns: Arc<dyn PatternStore>,
    meta: Arc<dyn MetaStore>,
    fsm: Arc<FsmReducer>,
    memory: Arc<dyn MemoryService>,
    producer_id: ProducerId,
}

impl LearningPipeline {
    pub fn new(
        patterns: Arc<dyn PatternStore>,
        meta: Arc<dyn MetaStore>,
        fsm: Arc<FsmReducer>,
        memory: Arc<dyn MemoryService>,
        producer_id: ProducerId,
    ) -> Self {
        Self { patterns, meta, fsm, memory, producer_id }
    }

    pub async fn run(
        &self,
        cmd: &LearnPatternsV1,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) -> Result<PipelineReport, PatternError> {
        let execution_id = Uuid::new_v4();
        let mut execution = WorkflowExecution {
            execution_id,
            session_id: cmd.session_id.clone(),
            correlation_id,
            started_at: now,
            finished_at: None,
            status: WorkflowStatus::Running,
            patterns_extracted: 0,
            patterns_learned: 0,
            error_message: None,
        };
        self.meta.record_workflow_execution(&execution).await?;

        let entity = EntityId::new(cmd.session_id.as_str());
        let result = self
            .run_stages(cmd, &entity, correlation_id, now)
            .await;

        match result {
            Ok(report) => {
                execution.finished_at = Some(now);
                execution.status = WorkflowStatus::Succeeded;
                execution.patterns_extracted = report.patterns_extracted as i32;
                execution.patterns_learned = report.patterns_learned as i32;
                self.meta.finish_workflow_execution(&execution).await?;
                Ok(PipelineReport { execution_id, ..report })
            }
            Err(e) => {
                // Park the session FSM in FAILED when a fail edge exists
                // from wherever the pipeline stopped.
                self.try_fail(&entity, &e, correlation_id, now).await;
                execution.finished_at = Some(now);
                execution.status = WorkflowStatus::Failed;
                execution.error_message = Some(e.to_string());
                self.meta.finish_workflow_execution(&execution).await?;
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        cmd: &LearnPatternsV1,
        entity: &EntityId,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) -> Result<PipelineReport, PatternError> {
        // Stage 1: parse (pure).
        self.advance(entity, FsmAction::BeginMatching, FsmState::Matching, correlation_id, now)
            .await?;
        let trace = parse_trace(&cmd.trace);

        // Stage 2: extract (pure).
        self.advance(entity, FsmAction::BeginValidation, FsmState::Validation, correlation_id, now)
            .await?;
        let extracted = extract_patterns(&trace);

        // Stage 3: learn (the only I/O stage).
        self.advance(
            entity,
            FsmAction::BeginTraceability,
            FsmState::Traceability,
            correlation_id,
            now,
        )
        .await?;

        let mut produced = Vec::new();
        let mut learned = 0usize;
        for candidate in &extracted {
            if let Some(pattern) = self
                .learn_one(cmd, candidate, correlation_id, now)
                .await?
            {
                learned += 1;
                produced.push(
                    PatternLearnedV1 {
                        event_id: EventId::new(),
                        pattern_id: pattern.id,
                        domain_id: pattern.domain_id,
                        signature_hash: pattern.signature_hash.clone(),
                        version: pattern.version,
                        learned_at: now,
                    }
                    .into_envelope(correlation_id, self.producer_id.clone(), now)?,
                );

                self.assess_quality(&pattern, correlation_id, now).await?;
                produced.push(
                    PatternStoredV1 {
                        event_id: EventId::new(),
                        pattern_id: pattern.id,
                        stored_at: now,
                    }
                    .into_envelope(correlation_id, self.producer_id.clone(), now)?,
                );
            }
        }

        self.advance(entity, FsmAction::Complete, FsmState::Completed, correlation_id, now)
            .await?;

        info!(
            session_id = %cmd.session_id,
            correlation_id = %correlation_id,
            extracted = extracted.len(),
            learned,
            "learning pipeline completed"
        );
        Ok(PipelineReport {
            execution_id: Uuid::nil(), // stamped by run()
            patterns_extracted: extracted.len(),
            patterns_learned: learned,
            produced,
        })
    }

    /// Upsert one extracted candidate. Identical replays collapse; changed
    /// content under the same signature becomes the next version and
    /// supersedes its predecessor.
    async fn learn_one(
        &self,
        cmd: &LearnPatternsV1,
        candidate: &ExtractedPattern,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) -> Result<Option<LearnedPattern>, PatternError> {
        let existing = self
            .patterns
            .latest_by_signature(&candidate.signature_hash, &cmd.domain_id)
            .await?;

        let content_hash = signature_hash(&json!({
            "essential": candidate.essential,
            "criteria": candidate.success_criteria,
            "quality": candidate.quality_metrics,
        }));

        let (version, supersedes) = match &existing {
            None => (1, None),
            Some(prev) => {
                let prev_hash = signature_hash(&json!({
                    "essential": prev_quality_field(prev, "essential"),
                    "criteria": prev.success_criteria,
                    "quality": prev_quality_field(prev, "metrics"),
                }));
                if prev_hash == content_hash {
                    // Same signature, same content: a retry, not a new version.
                    return Ok(None);
                }
                (prev.version + 1, Some(prev.id))
            }
        };

        let pattern = LearnedPattern {
            id: PatternId::new(),
            pattern_type: candidate.pattern_type.clone(),
            name: candidate.name.clone(),
            domain_id: cmd.domain_id,
            signature_hash: candidate.signature_hash.clone(),
            version,
            status: PatternStatus::Candidate,
            success_criteria: candidate.success_criteria.clone(),
            match_count: 0,
            success_rate: 0.0,
            supersedes: None,
            superseded_by: None,
            quality_metrics: quality_with_essential(candidate),
            created_at: now,
            updated_at: now,
        };

        match self.patterns.insert_pattern(&pattern).await {
            Ok(()) => {}
            Err(mnemon_store::StoreError::UniqueViolation(_)) => {
                // Concurrent replay inserted the same version first.
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }
        if let Some(old_id) = supersedes {
            self.patterns.link_supersedes(&old_id, &pattern.id).await?;
        }

        self.mirror_to_memory(&pattern, correlation_id).await;
        Ok(Some(pattern))
    }

    /// Drive the pattern's quality-assessment FSM RAW → STORED.
    async fn assess_quality(
        &self,
        pattern: &LearnedPattern,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) -> Result<(), PatternError> {
        let entity = EntityId::new(pattern.id.to_string());
        self.advance(&entity, FsmAction::BeginAssessment, FsmState::Assessing, correlation_id, now)
            .await?;
        self.advance(&entity, FsmAction::Score, FsmState::Scored, correlation_id, now)
            .await?;
        self.advance(&entity, FsmAction::Store, FsmState::Stored, correlation_id, now)
            .await?;
        Ok(())
    }

    /// Mirror the pattern into the external memory service. Failures
    /// degrade the mirror, never the pipeline: the circuit breaker in the
    /// client keeps a dead dependency from stalling learning.
    async fn mirror_to_memory(&self, pattern: &LearnedPattern, correlation_id: CorrelationId) {
        let request = MemoryRequest {
            correlation_id,
            op: MemoryOp::UpsertVector,
            payload: json!({
                "id": pattern.id.to_string(),
                "signature_hash": pattern.signature_hash,
                "pattern_type": pattern.pattern_type,
                "name": pattern.name,
                "domain_id": pattern.domain_id.to_string(),
                "version": pattern.version,
            }),
        };
        if let Err(e) = self.memory.call(request).await {
            warn!(
                pattern_id = %pattern.id,
                correlation_id = %correlation_id,
                error = %e,
                "memory mirror failed, continuing degraded"
            );
        }
    }

    async fn advance(
        &self,
        entity: &EntityId,
        action: FsmAction,
        to_state: FsmState,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) -> Result<(), PatternError> {
        let kind = if to_state == FsmState::Matching
            || to_state == FsmState::Validation
            || to_state == FsmState::Traceability
            || to_state == FsmState::Completed
        {
            FsmKind::PatternLearning
        } else {
            FsmKind::QualityAssessment
        };

        let outcome = self
            .fsm
            .propose(
                kind,
                entity,
                action,
                Value::Null,
                correlation_id,
                "learning-pipeline",
                now,
            )
            .await?;
        match outcome {
            ProposeOutcome::Granted(token) => {
                self.fsm
                    .transition(&token, to_state, Value::Null, None, now)
                    .await?;
                self.fsm.release(&token).await?;
                Ok(())
            }
            ProposeOutcome::Conflict { holder, .. } => {
                Err(PatternError::LeaseConflict { holder: holder.to_string() })
            }
        }
    }

    /// Best-effort fail edge after a mid-pipeline error; states without a
    /// fail edge (FOUNDATION, terminal) are left as they are.
    async fn try_fail(
        &self,
        entity: &EntityId,
        error: &PatternError,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) {
        let propose = self
            .fsm
            .propose(
                FsmKind::PatternLearning,
                entity,
                FsmAction::Fail,
                Value::Null,
                correlation_id,
                "learning-pipeline",
                now,
            )
            .await;
        if let Ok(ProposeOutcome::Granted(token)) = propose {
            let _ = self
                .fsm
                .transition(
                    &token,
                    FsmState::Failed,
                    Value::Null,
                    Some(error.to_string()),
                    now,
                )
                .await;
            let _ = self.fsm.release(&token).await;
        }
    }
}

/// Stored patterns carry `{essential, metrics}` in `quality_metrics`; the
/// replay comparison reads both halves back out.
fn prev_quality_field(pattern: &LearnedPattern, field: &str) -> Value {
    pattern
        .quality_metrics
        .get(field)
        .cloned()
        .unwrap_or(Value::Null)
}

fn quality_with_essential(candidate: &ExtractedPattern) -> Value {
    json!({
        "essential": candidate.essential,
        "metrics": candidate.quality_metrics,
    })
}
