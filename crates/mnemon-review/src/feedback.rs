use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mnemon_domain::{
    PatternId, PatternInjectedV1, PatternInjection, RoutingFeedbackScore, SessionOutcomeV1,
};
use mnemon_patterns::LifecycleReducer;
use mnemon_store::{FeedbackStore, MetaStore, PatternStore, DEFAULT_SESSION_DURATION_CEILING_MS};
use tracing::{debug, info, warn};

use crate::error::ReviewError;

/// Joins per-session routing outcomes with the patterns injected into the
/// session and rolls the result up into per-pattern success metrics.
///
/// Metric write-back goes through the lifecycle reducer so that
/// `learned_patterns` keeps a single writer.
pub struct FeedbackScorer {
    feedback: Arc<dyn FeedbackStore>,
    patterns: Arc<dyn PatternStore>,
    meta: Arc<dyn MetaStore>,
    lifecycle: Arc<LifecycleReducer>,
}

impl FeedbackScorer {
    pub fn new(
        feedback: Arc<dyn FeedbackStore>,
        patterns: Arc<dyn PatternStore>,
        meta: Arc<dyn MetaStore>,
        lifecycle: Arc<LifecycleReducer>,
    ) -> Self {
        Self { feedback, patterns, meta, lifecycle }
    }

    /// Persist an injection observation. The array carries no database FK;
    /// this is where referential integrity is enforced: ids that resolve to
    /// no stored pattern are dropped with a warning, an empty array is a
    /// valid observation.
    pub async fn record_injection(&self, event: &PatternInjectedV1) -> Result<(), ReviewError> {
        let mut kept: Vec<PatternId> = Vec::with_capacity(event.pattern_ids.len());
        for id in &event.pattern_ids {
            if self.patterns.get_pattern(id).await?.is_some() {
                kept.push(*id);
            } else {
                warn!(
                    session_id = %event.session_id,
                    pattern_id = %id,
                    "injection references unknown pattern, dropped"
                );
            }
        }

        self.feedback
            .record_injection(&PatternInjection {
                session_id: event.session_id.clone(),
                run_id: event.run_id.clone(),
                pattern_ids: kept,
                occurred_at: event.injected_at,
            })
            .await?;
        Ok(())
    }

    /// Score one finished session and update every injected pattern's
    /// rolling success rate. Idempotent per session: replays overwrite the
    /// same score row; metric updates are keyed off the recomputed rate, so
    /// a duplicate delivery collapses at the dispatcher before reaching
    /// here.
    pub async fn score_session(
        &self,
        event: &SessionOutcomeV1,
        now: DateTime<Utc>,
    ) -> Result<(), ReviewError> {
        let score = RoutingFeedbackScore {
            session_id: event.session_id.clone(),
            agent_selected: event.agent_selected.clone(),
            agent_recommended: event.agent_recommended.clone(),
            routing_confidence: event.routing_confidence,
            injection_occurred: event.injection_occurred,
            patterns_injected_count: event.patterns_injected_count,
            tool_calls_count: event.tool_calls_count,
            duration_ms: event.duration_ms,
            processed_at: now,
        };
        self.feedback.upsert_score(&score).await?;

        let injections = self
            .feedback
            .injections_for_session(&event.session_id)
            .await?;
        let pattern_ids: BTreeSet<PatternId> = injections
            .iter()
            .flat_map(|i| i.pattern_ids.iter().copied())
            .collect();
        if pattern_ids.is_empty() {
            debug!(session_id = %event.session_id, "no injected patterns to score");
            return Ok(());
        }

        for pattern_id in pattern_ids {
            let Some(pattern) = self.patterns.get_pattern(&pattern_id).await? else {
                warn!(pattern_id = %pattern_id, "injected pattern vanished before scoring");
                continue;
            };
            let ceiling = match self.meta.get_domain(&pattern.domain_id).await? {
                Some(domain) => domain.session_success_duration_ceiling_ms,
                None => DEFAULT_SESSION_DURATION_CEILING_MS,
            };
            let success = score.is_success(ceiling);

            let match_count = pattern.match_count + 1;
            let successes =
                pattern.success_rate * pattern.match_count as f64 + f64::from(u8::from(success));
            let success_rate = successes / match_count as f64;

            self.lifecycle
                .record_success_metrics(&pattern_id, match_count, success_rate, now)
                .await?;
            info!(
                session_id = %event.session_id,
                pattern_id = %pattern_id,
                success,
                match_count,
                success_rate,
                "pattern success metrics updated"
            );
        }
        Ok(())
    }
}
