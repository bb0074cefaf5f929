use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use mnemon_domain::{
    DomainId, FindingFixPair, FindingObservedV1, FindingResolvedV1, FixAppliedV1, PairId,
    PairingType, PatternCandidate, ReviewFinding, ReviewFix,
};
use mnemon_store::{PairInsert, PatternStore, ReviewStore};
use tracing::{debug, info};

use crate::error::ReviewError;

#[derive(Debug, Clone)]
pub struct PairingConfig {
    /// Pairs below this confidence are excluded from promotion inputs.
    pub confidence_floor: f64,
    /// Window for classifying a fix as temporally related to a finding.
    pub temporal_window: Duration,
    /// Domain the review stream belongs to; candidate rollups are scoped
    /// to it.
    pub domain_id: DomainId,
}

impl PairingConfig {
    pub fn new(confidence_floor: f64, domain_id: DomainId) -> Self {
        Self {
            confidence_floor,
            temporal_window: Duration::hours(24),
            domain_id,
        }
    }
}

/// Correlates review findings with fix commits.
///
/// Candidate pairs are created on `fix_applied` and confirmed on
/// `finding_resolved`; a resolution without a candidate creates an inferred
/// pair. Uniqueness on `(finding_id, fix_commit_sha)` collapses duplicate
/// deliveries, and the same-commit tie-break is recomputed from the full
/// persisted fix set, so arrival order never changes the winner.
pub struct PairingEngine {
    review: Arc<dyn ReviewStore>,
    patterns: Arc<dyn PatternStore>,
    config: PairingConfig,
}

impl PairingEngine {
    pub fn new(
        review: Arc<dyn ReviewStore>,
        patterns: Arc<dyn PatternStore>,
        config: PairingConfig,
    ) -> Self {
        Self { review, patterns, config }
    }

    /// Persist an observed finding. Idempotent by `finding_id`.
    pub async fn observe_finding(&self, event: &FindingObservedV1) -> Result<(), ReviewError> {
        let finding = ReviewFinding {
            finding_id: event.finding_id.clone(),
            repo: event.repo.clone(),
            pr_id: event.pr_id,
            rule_id: event.rule_id.clone(),
            severity: event.severity,
            file_path: event.file_path.clone(),
            line_start: event.line_start,
            line_end: event.line_end,
            tool_name: event.tool_name.clone(),
            tool_version: event.tool_version.clone(),
            normalized_message: event.normalized_message.clone(),
            raw_message: event.raw_message.clone(),
            commit_sha_observed: event.commit_sha_observed.clone(),
            observed_at: event.observed_at,
        };
        self.review.upsert_finding(&finding).await?;
        debug!(finding_id = %finding.finding_id, rule_id = %finding.rule_id, "finding persisted");
        Ok(())
    }

    /// Persist a fix and, when its finding is known, create or refresh the
    /// candidate pair for `(finding_id, fix_commit_sha)`.
    pub async fn apply_fix(
        &self,
        event: &FixAppliedV1,
        now: DateTime<Utc>,
    ) -> Result<(), ReviewError> {
        let fix = ReviewFix {
            fix_id: event.fix_id.clone(),
            finding_id: event.finding_id.clone(),
            fix_commit_sha: event.fix_commit_sha.clone(),
            file_path: event.file_path.clone(),
            diff_hunks: event.diff_hunks.clone(),
            touched_line_range: event.touched_line_range,
            tool_autofix: event.tool_autofix,
            applied_at: event.applied_at,
        };
        self.review.upsert_fix(&fix).await?;

        let Some(finding) = self.review.get_finding(&event.finding_id).await? else {
            // Fix arrived before its finding (cross-partition reorder). The
            // fix is persisted; a later resolution still pairs it.
            debug!(finding_id = %event.finding_id, "fix without known finding");
            return Ok(());
        };

        self.refresh_candidate_pair(&finding, fix.fix_commit_sha.as_str(), now)
            .await
    }

    /// Recompute the winning fix for `(finding, commit)` and upsert the
    /// candidate pair accordingly.
    async fn refresh_candidate_pair(
        &self,
        finding: &ReviewFinding,
        fix_commit_sha: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ReviewError> {
        let fixes: Vec<ReviewFix> = self
            .review
            .fixes_for_finding(&finding.finding_id)
            .await?
            .into_iter()
            .filter(|f| f.fix_commit_sha.as_str() == fix_commit_sha)
            .collect();
        let Some(winner) = select_winning_fix(finding, &fixes) else {
            return Ok(());
        };

        let pairing_type = classify_pairing(finding, winner, self.config.temporal_window);
        let pair = FindingFixPair {
            pair_id: PairId::new(),
            finding_id: finding.finding_id.clone(),
            fix_commit_sha: winner.fix_commit_sha.clone(),
            diff_hunks: winner.diff_hunks.clone(),
            confidence_score: pairing_type.initial_confidence(),
            disappearance_confirmed: false,
            pairing_type,
            created_at: now,
        };

        match self.review.try_insert_pair(&pair).await? {
            PairInsert::Inserted => {
                info!(
                    finding_id = %pair.finding_id,
                    fix_commit_sha = %pair.fix_commit_sha,
                    pairing_type = %pair.pairing_type,
                    confidence = pair.confidence_score,
                    "candidate pair created"
                );
                self.bump_candidate_rollup(finding, &pair, false, now).await
            }
            PairInsert::AlreadyExists => {
                let existing = self
                    .review
                    .get_pair(&pair.finding_id, fix_commit_sha)
                    .await?
                    .expect("pair reported existing");
                // A later fix in the same commit may win the tie-break; a
                // confirmed pair is settled evidence and never rewritten.
                if !existing.disappearance_confirmed
                    && existing.diff_hunks != pair.diff_hunks
                {
                    let refreshed = FindingFixPair {
                        pair_id: existing.pair_id,
                        disappearance_confirmed: existing.disappearance_confirmed,
                        created_at: existing.created_at,
                        ..pair
                    };
                    self.review.replace_pair(&refreshed).await?;
                }
                Ok(())
            }
        }
    }

    /// Confirm disappearance. Returns the pair to announce when it was
    /// newly confirmed; `None` when the resolution was a duplicate.
    pub async fn resolve_finding(
        &self,
        event: &FindingResolvedV1,
        now: DateTime<Utc>,
    ) -> Result<Option<FindingFixPair>, ReviewError> {
        let sha = event.fix_commit_sha.as_str();
        let existing = self.review.get_pair(&event.finding_id, sha).await?;

        let (pair, newly_created) = match existing {
            Some(pair) if pair.disappearance_confirmed => {
                // Duplicate resolution: nothing new to announce.
                return Ok(None);
            }
            Some(_) => {
                let confirmed = self.review.confirm_pair(&event.finding_id, sha).await?;
                (confirmed, false)
            }
            None => {
                // No candidate: the resolution itself is the only evidence.
                let inferred = FindingFixPair {
                    pair_id: PairId::new(),
                    finding_id: event.finding_id.clone(),
                    fix_commit_sha: event.fix_commit_sha.clone(),
                    diff_hunks: vec![],
                    confidence_score: PairingType::Inferred.initial_confidence(),
                    disappearance_confirmed: true,
                    pairing_type: PairingType::Inferred,
                    created_at: now,
                };
                match self.review.try_insert_pair(&inferred).await? {
                    PairInsert::Inserted => (inferred, true),
                    PairInsert::AlreadyExists => {
                        let confirmed =
                            self.review.confirm_pair(&event.finding_id, sha).await?;
                        (confirmed, false)
                    }
                }
            }
        };

        info!(
            finding_id = %pair.finding_id,
            fix_commit_sha = %pair.fix_commit_sha,
            confidence = pair.confidence_score,
            "disappearance confirmed"
        );
        if let Some(finding) = self.review.get_finding(&event.finding_id).await? {
            self.bump_candidate_rollup(&finding, &pair, !newly_created, now)
                .await?;
        }
        Ok(Some(pair))
    }

    /// Fold one pair event into the per-rule/per-repo rollup. Pairs below
    /// the confidence floor never reach promotion inputs.
    async fn bump_candidate_rollup(
        &self,
        finding: &ReviewFinding,
        pair: &FindingFixPair,
        confirmation_only: bool,
        now: DateTime<Utc>,
    ) -> Result<(), ReviewError> {
        if pair.confidence_score < self.config.confidence_floor {
            return Ok(());
        }

        let existing = self
            .patterns
            .list_candidates(0.0)
            .await?
            .into_iter()
            .find(|c| c.rule_id == finding.rule_id && c.repo == finding.repo);

        let candidate = match existing {
            None => PatternCandidate {
                rule_id: finding.rule_id.clone(),
                repo: finding.repo.clone(),
                domain_id: self.config.domain_id,
                pair_count: 1,
                confirmed_count: i64::from(pair.disappearance_confirmed),
                mean_confidence: pair.confidence_score,
                last_pair_at: now,
            },
            Some(mut candidate) => {
                if confirmation_only {
                    candidate.confirmed_count += 1;
                } else {
                    let count = candidate.pair_count as f64;
                    candidate.mean_confidence =
                        (candidate.mean_confidence * count + pair.confidence_score)
                            / (count + 1.0);
                    candidate.pair_count += 1;
                    candidate.confirmed_count += i64::from(pair.disappearance_confirmed);
                }
                candidate.last_pair_at = now;
                candidate
            }
        };
        self.patterns.upsert_candidate(&candidate).await?;
        Ok(())
    }
}

/// Same-commit tie-break: the fix with the largest overlap between its
/// touched range and the finding's range wins; ties go to the
/// lexicographically smallest `fix_id`.
fn select_winning_fix<'a>(finding: &ReviewFinding, fixes: &'a [ReviewFix]) -> Option<&'a ReviewFix> {
    let target = finding.line_range();
    fixes.iter().min_by(|a, b| {
        let overlap_a = a.touched_line_range.overlap(&target);
        let overlap_b = b.touched_line_range.overlap(&target);
        overlap_b
            .cmp(&overlap_a)
            .then_with(|| a.fix_id.cmp(&b.fix_id))
    })
}

fn classify_pairing(
    finding: &ReviewFinding,
    fix: &ReviewFix,
    temporal_window: Duration,
) -> PairingType {
    if fix.tool_autofix {
        return PairingType::Autofix;
    }
    let same_file = fix.file_path == finding.file_path;
    if same_file && fix.touched_line_range.overlap(&finding.line_range()) > 0 {
        return PairingType::SameCommit;
    }
    if same_file {
        return PairingType::SamePr;
    }
    if (fix.applied_at - finding.observed_at).abs() <= temporal_window {
        return PairingType::Temporal;
    }
    PairingType::Inferred
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_domain::{CommitSha, FindingId, FixId, LineRange, ResolutionId, RunId, Severity};
    use mnemon_store::InMemoryStore;

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn engine(store: Arc<InMemoryStore>) -> PairingEngine {
        PairingEngine::new(
            store.clone(),
            store,
            PairingConfig::new(0.5, DomainId::new()),
        )
    }

    fn finding_event() -> FindingObservedV1 {
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
            normalized_message: "unused variable".into(),
            raw_message: "warning: unused".into(),
            commit_sha_observed: CommitSha("c1aaaaa".into()),
            observed_at: t("2026-03-01T10:00:00Z"),
        }
    }

    fn fix_event(fix_id: &str, range: LineRange, autofix: bool) -> FixAppliedV1 {
        FixAppliedV1 {
            fix_id: FixId::new(fix_id),
            finding_id: FindingId::new("F1"),
            fix_commit_sha: CommitSha("c2bbbbb".into()),
            file_path: "src/main.rs".into(),
            diff_hunks: vec![format!("@@ {fix_id} @@")],
            touched_line_range: range,
            tool_autofix: autofix,
            applied_at: t("2026-03-01T11:00:00Z"),
        }
    }

    fn resolution_event() -> FindingResolvedV1 {
        FindingResolvedV1 {
            resolution_id: ResolutionId::new("R1"),
            finding_id: FindingId::new("F1"),
            fix_commit_sha: CommitSha("c2bbbbb".into()),
            verified_at_commit_sha: CommitSha("c3ccccc".into()),
            ci_run_id: RunId::new("ci-900"),
            resolved_at: t("2026-03-01T12:00:00Z"),
        }
    }

    #[tokio::test]
    async fn happy_pairing_autofix_confirmed() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store.clone());

        engine.observe_finding(&finding_event()).await.unwrap();
        engine
            .apply_fix(&fix_event("X1", LineRange(9, 13), true), t("2026-03-01T11:00:01Z"))
            .await
            .unwrap();
        let pair = engine
            .resolve_finding(&resolution_event(), t("2026-03-01T12:00:01Z"))
            .await
            .unwrap()
            .expect("pair should be announced");

        assert_eq!(pair.pairing_type, PairingType::Autofix);
        assert_eq!(pair.confidence_score, 0.95);
        assert!(pair.disappearance_confirmed);
    }

    #[tokio::test]
    async fn unconfirmed_pair_stays_silent() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store.clone());

        engine.observe_finding(&finding_event()).await.unwrap();
        engine
            .apply_fix(&fix_event("X1", LineRange(9, 13), true), t("2026-03-01T11:00:01Z"))
            .await
            .unwrap();

        let pair = store
            .get_pair(&FindingId::new("F1"), "c2bbbbb")
            .await
            .unwrap()
            .unwrap();
        assert!(!pair.disappearance_confirmed);
        assert_eq!(pair.confidence_score, 0.95);
    }

    #[tokio::test]
    async fn duplicate_resolution_announces_once() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store.clone());

        engine.observe_finding(&finding_event()).await.unwrap();
        engine
            .apply_fix(&fix_event("X1", LineRange(9, 13), true), t("2026-03-01T11:00:01Z"))
            .await
            .unwrap();

        let first = engine
            .resolve_finding(&resolution_event(), t("2026-03-01T12:00:01Z"))
            .await
            .unwrap();
        let second = engine
            .resolve_finding(&resolution_event(), t("2026-03-01T12:00:02Z"))
            .await
            .unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn resolution_without_candidate_infers_pair() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store.clone());

        engine.observe_finding(&finding_event()).await.unwrap();
        let pair = engine
            .resolve_finding(&resolution_event(), t("2026-03-01T12:00:01Z"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pair.pairing_type, PairingType::Inferred);
        assert_eq!(pair.confidence_score, 0.30);
        assert!(pair.disappearance_confirmed);
    }

    #[tokio::test]
    async fn same_commit_tie_breaks_on_overlap_then_fix_id() {
        let store = Arc::new(InMemoryStore::new());
        let engine1 = engine(store.clone());
        engine1.observe_finding(&finding_event()).await.unwrap();

        // X2 overlaps 1 line, X1 overlaps all 3: X1 wins despite arriving second.
        engine1
            .apply_fix(&fix_event("X2", LineRange(12, 20), false), t("2026-03-01T11:00:01Z"))
            .await
            .unwrap();
        engine1
            .apply_fix(&fix_event("X1", LineRange(9, 13), false), t("2026-03-01T11:00:02Z"))
            .await
            .unwrap();

        let pair = store
            .get_pair(&FindingId::new("F1"), "c2bbbbb")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pair.diff_hunks, vec!["@@ X1 @@".to_string()]);

        // Equal overlap: smallest fix_id wins.
        let store2 = Arc::new(InMemoryStore::new());
        let engine2 = engine(store2.clone());
        engine2.observe_finding(&finding_event()).await.unwrap();
        engine2
            .apply_fix(&fix_event("X9", LineRange(10, 12), false), t("2026-03-01T11:00:01Z"))
            .await
            .unwrap();
        engine2
            .apply_fix(&fix_event("X3", LineRange(10, 12), false), t("2026-03-01T11:00:02Z"))
            .await
            .unwrap();
        let pair2 = store2
            .get_pair(&FindingId::new("F1"), "c2bbbbb")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pair2.diff_hunks, vec!["@@ X3 @@".to_string()]);
    }

    #[tokio::test]
    async fn low_confidence_pairs_stay_out_of_rollups() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store.clone());

        engine.observe_finding(&finding_event()).await.unwrap();
        // Resolution-only pair is inferred at 0.30 < 0.5 floor.
        engine
            .resolve_finding(&resolution_event(), t("2026-03-01T12:00:01Z"))
            .await
            .unwrap();

        assert!(store.list_candidates(0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn confirmed_pairs_feed_rollups() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store.clone());

        engine.observe_finding(&finding_event()).await.unwrap();
        engine
            .apply_fix(&fix_event("X1", LineRange(9, 13), true), t("2026-03-01T11:00:01Z"))
            .await
            .unwrap();
        engine
            .resolve_finding(&resolution_event(), t("2026-03-01T12:00:01Z"))
            .await
            .unwrap();

        let candidates = store.list_candidates(0.5).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].rule_id, "r1");
        assert_eq!(candidates[0].pair_count, 1);
        assert_eq!(candidates[0].confirmed_count, 1);
        assert_eq!(candidates[0].mean_confidence, 0.95);
    }

    #[tokio::test]
    async fn missing_line_end_pairs_single_line() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store.clone());

        let mut finding = finding_event();
        finding.line_end = None;
        engine.observe_finding(&finding).await.unwrap();

        // Overlaps [10,10] only.
        engine
            .apply_fix(&fix_event("X1", LineRange(10, 10), false), t("2026-03-01T11:00:01Z"))
            .await
            .unwrap();
        let pair = store
            .get_pair(&FindingId::new("F1"), "c2bbbbb")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pair.pairing_type, PairingType::SameCommit);
    }
}
