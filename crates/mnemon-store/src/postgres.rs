use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mnemon_domain::{
    CommitSha, CorrelationId, DomainId, EntityId, EventId, FindingFixPair, FindingId, FixId,
    FsmKind, FsmState, LearnedPattern, LineRange, PatternCandidate, PatternId, PatternInjection,
    PatternStatus, ReviewFinding, ReviewFix, RoutingFeedbackScore, SessionId,
};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::migrations;
use crate::rows::{
    DbMetadata, DisableEventRow, DomainTaxonomyRow, FsmHistoryRow, FsmInstance, LeaseOutcome,
    LifecycleTransitionRow, PatternLifecycleRow, TransitionOutcome, WorkflowExecution,
};
use crate::store::{
    FeedbackStore, FsmStore, MetaStore, PairInsert, PatternStore, ReviewStore,
};

/// Persistent store backed by PostgreSQL.
///
/// Connects without touching the schema; `migrate()` is an explicit step so
/// that `serve` can refuse to start on a version mismatch instead of
/// silently mutating a live database.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(url)
            .await
            .map_err(|e| StoreError::Internal(format!("postgres connect: {e}")))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply all pending migrations. Returns the resulting schema version.
    pub async fn migrate(&self, installed_by: &str) -> Result<i32, StoreError> {
        migrations::migrate(&self.pool, installed_by).await
    }

    /// Roll the schema back to `target`, newest migration first.
    pub async fn rollback_to(&self, target: i32) -> Result<i32, StoreError> {
        migrations::rollback_to(&self.pool, target).await
    }
}

// ── Row mapping helpers ───────────────────────────────────────────────────────

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Internal(e.to_string())
}

fn enum_str<T: serde::Serialize>(v: &T) -> Result<String, StoreError> {
    match serde_json::to_value(v)? {
        Value::String(s) => Ok(s),
        other => Err(StoreError::Internal(format!(
            "enum serialized to non-string: {other}"
        ))),
    }
}

fn parse_enum<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    serde_json::from_value(Value::String(s.to_string())).map_err(StoreError::Serialization)
}

fn fsm_instance_from_row(row: &PgRow) -> Result<FsmInstance, StoreError> {
    Ok(FsmInstance {
        fsm_kind: parse_enum(row.try_get::<&str, _>("fsm_kind").map_err(db_err)?)?,
        entity_id: EntityId::new(row.try_get::<String, _>("entity_id").map_err(db_err)?),
        current_state: parse_enum(row.try_get::<&str, _>("current_state").map_err(db_err)?)?,
        previous_state: row
            .try_get::<Option<String>, _>("previous_state")
            .map_err(db_err)?
            .map(|s| parse_enum(&s))
            .transpose()?,
        transition_at: row.try_get("transition_at").map_err(db_err)?,
        metadata: row.try_get("metadata").map_err(db_err)?,
        lease_id: row.try_get("lease_id").map_err(db_err)?,
        lease_epoch: row.try_get("lease_epoch").map_err(db_err)?,
        lease_expires_at: row.try_get("lease_expires_at").map_err(db_err)?,
    })
}

fn history_from_row(row: &PgRow) -> Result<FsmHistoryRow, StoreError> {
    Ok(FsmHistoryRow {
        fsm_kind: parse_enum(row.try_get::<&str, _>("fsm_kind").map_err(db_err)?)?,
        entity_id: EntityId::new(row.try_get::<String, _>("entity_id").map_err(db_err)?),
        from_state: parse_enum(row.try_get::<&str, _>("from_state").map_err(db_err)?)?,
        to_state: parse_enum(row.try_get::<&str, _>("to_state").map_err(db_err)?)?,
        action: parse_enum(row.try_get::<&str, _>("action").map_err(db_err)?)?,
        duration_ms: row.try_get("duration_ms").map_err(db_err)?,
        success: row.try_get("success").map_err(db_err)?,
        error_message: row.try_get("error_message").map_err(db_err)?,
        correlation_id: CorrelationId(row.try_get("correlation_id").map_err(db_err)?),
        occurred_at: row.try_get("occurred_at").map_err(db_err)?,
    })
}

fn pattern_from_row(row: &PgRow) -> Result<LearnedPattern, StoreError> {
    Ok(LearnedPattern {
        id: PatternId(row.try_get("id").map_err(db_err)?),
        pattern_type: row.try_get("pattern_type").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        domain_id: DomainId(row.try_get("domain_id").map_err(db_err)?),
        signature_hash: row
            .try_get::<String, _>("signature_hash")
            .map_err(db_err)?
            .trim_end()
            .to_string(),
        version: row.try_get("version").map_err(db_err)?,
        status: parse_enum(row.try_get::<&str, _>("status").map_err(db_err)?)?,
        success_criteria: serde_json::from_value(
            row.try_get::<Value, _>("success_criteria").map_err(db_err)?,
        )?,
        match_count: row.try_get("match_count").map_err(db_err)?,
        success_rate: row.try_get("success_rate").map_err(db_err)?,
        supersedes: row
            .try_get::<Option<Uuid>, _>("supersedes")
            .map_err(db_err)?
            .map(PatternId),
        superseded_by: row
            .try_get::<Option<Uuid>, _>("superseded_by")
            .map_err(db_err)?
            .map(PatternId),
        quality_metrics: row.try_get("quality_metrics").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn finding_from_row(row: &PgRow) -> Result<ReviewFinding, StoreError> {
    Ok(ReviewFinding {
        finding_id: FindingId::new(row.try_get::<String, _>("finding_id").map_err(db_err)?),
        repo: row.try_get("repo").map_err(db_err)?,
        pr_id: row.try_get("pr_id").map_err(db_err)?,
        rule_id: row.try_get("rule_id").map_err(db_err)?,
        severity: parse_enum(row.try_get::<&str, _>("severity").map_err(db_err)?)?,
        file_path: row.try_get("file_path").map_err(db_err)?,
        line_start: row.try_get::<i32, _>("line_start").map_err(db_err)? as u32,
        line_end: row
            .try_get::<Option<i32>, _>("line_end")
            .map_err(db_err)?
            .map(|n| n as u32),
        tool_name: row.try_get("tool_name").map_err(db_err)?,
        tool_version: row.try_get("tool_version").map_err(db_err)?,
        normalized_message: row.try_get("normalized_message").map_err(db_err)?,
        raw_message: row.try_get("raw_message").map_err(db_err)?,
        commit_sha_observed: CommitSha(
            row.try_get::<String, _>("commit_sha_observed").map_err(db_err)?,
        ),
        observed_at: row.try_get("observed_at").map_err(db_err)?,
    })
}

fn pair_from_row(row: &PgRow) -> Result<FindingFixPair, StoreError> {
    Ok(FindingFixPair {
        pair_id: mnemon_domain::PairId(row.try_get("pair_id").map_err(db_err)?),
        finding_id: FindingId::new(row.try_get::<String, _>("finding_id").map_err(db_err)?),
        fix_commit_sha: CommitSha(row.try_get::<String, _>("fix_commit_sha").map_err(db_err)?),
        diff_hunks: serde_json::from_value(
            row.try_get::<Value, _>("diff_hunks").map_err(db_err)?,
        )?,
        confidence_score: row.try_get("confidence_score").map_err(db_err)?,
        disappearance_confirmed: row.try_get("disappearance_confirmed").map_err(db_err)?,
        pairing_type: parse_enum(row.try_get::<&str, _>("pairing_type").map_err(db_err)?)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

fn disable_from_row(row: &PgRow) -> Result<DisableEventRow, StoreError> {
    Ok(DisableEventRow {
        event_id: EventId(row.try_get("event_id").map_err(db_err)?),
        pattern_id: PatternId(row.try_get("pattern_id").map_err(db_err)?),
        pattern_class: row.try_get("pattern_class").map_err(db_err)?,
        actor: row.try_get("actor").map_err(db_err)?,
        reason: row.try_get("reason").map_err(db_err)?,
        correlation_id: CorrelationId(row.try_get("correlation_id").map_err(db_err)?),
        event_at: row.try_get("event_at").map_err(db_err)?,
    })
}

// ── FsmStore ──────────────────────────────────────────────────────────────────

#[async_trait]
impl FsmStore for PostgresStore {
    async fn get_instance(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
    ) -> Result<Option<FsmInstance>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM fsm_state WHERE fsm_kind = $1 AND entity_id = $2",
        )
        .bind(enum_str(&kind)?)
        .bind(entity_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(fsm_instance_from_row).transpose()
    }

    async fn ensure_instance(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
        now: DateTime<Utc>,
    ) -> Result<FsmInstance, StoreError> {
        sqlx::query(
            "INSERT INTO fsm_state (fsm_kind, entity_id, current_state, transition_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (fsm_kind, entity_id) DO NOTHING",
        )
        .bind(enum_str(&kind)?)
        .bind(entity_id.as_str())
        .bind(enum_str(&kind.initial_state())?)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.get_instance(kind, entity_id)
            .await?
            .ok_or_else(|| StoreError::Internal("fsm row vanished after insert".to_string()))
    }

    async fn try_acquire_lease(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
        new_lease_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome, StoreError> {
        // CAS: only a row without a live lease accepts the update. The
        // comparison is `<= now`, so a lease is takeable at its exact
        // expiry instant.
        let granted = sqlx::query(
            "UPDATE fsm_state
             SET lease_id = $3, lease_epoch = lease_epoch + 1, lease_expires_at = $4
             WHERE fsm_kind = $1 AND entity_id = $2
               AND (lease_id IS NULL OR lease_expires_at <= $5)
             RETURNING lease_epoch",
        )
        .bind(enum_str(&kind)?)
        .bind(entity_id.as_str())
        .bind(new_lease_id)
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        if let Some(row) = granted {
            return Ok(LeaseOutcome::Granted {
                lease_id: new_lease_id,
                lease_epoch: row.try_get("lease_epoch").map_err(db_err)?,
                expires_at,
            });
        }

        let holder = sqlx::query(
            "SELECT lease_id, lease_expires_at FROM fsm_state
             WHERE fsm_kind = $1 AND entity_id = $2",
        )
        .bind(enum_str(&kind)?)
        .bind(entity_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::NotFound(format!("fsm {kind}/{entity_id}")))?;

        Ok(LeaseOutcome::Held {
            holder: holder
                .try_get::<Option<Uuid>, _>("lease_id")
                .map_err(db_err)?
                .unwrap_or(Uuid::nil()),
            expires_at: holder
                .try_get::<Option<DateTime<Utc>>, _>("lease_expires_at")
                .map_err(db_err)?
                .unwrap_or(now),
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
        let result = sqlx::query(
            "UPDATE fsm_state SET lease_expires_at = $5
             WHERE fsm_kind = $1 AND entity_id = $2
               AND lease_id = $3 AND lease_epoch = $4 AND lease_expires_at > $6",
        )
        .bind(enum_str(&kind)?)
        .bind(entity_id.as_str())
        .bind(lease_id)
        .bind(lease_epoch)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(if result.rows_affected() == 1 {
            TransitionOutcome::Applied
        } else {
            TransitionOutcome::StaleLease
        })
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
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let updated = sqlx::query(
            "UPDATE fsm_state
             SET previous_state = current_state, current_state = $5,
                 transition_at = $6, metadata = $7
             WHERE fsm_kind = $1 AND entity_id = $2
               AND lease_id = $3 AND lease_epoch = $4 AND lease_expires_at > $8",
        )
        .bind(enum_str(&kind)?)
        .bind(entity_id.as_str())
        .bind(lease_id)
        .bind(lease_epoch)
        .bind(enum_str(&to_state)?)
        .bind(history.occurred_at)
        .bind(&metadata)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() != 1 {
            tx.rollback().await.map_err(db_err)?;
            return Ok(TransitionOutcome::StaleLease);
        }

        sqlx::query(
            "INSERT INTO fsm_state_history
             (fsm_kind, entity_id, from_state, to_state, action, duration_ms,
              success, error_message, correlation_id, occurred_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(enum_str(&history.fsm_kind)?)
        .bind(history.entity_id.as_str())
        .bind(enum_str(&history.from_state)?)
        .bind(enum_str(&history.to_state)?)
        .bind(enum_str(&history.action)?)
        .bind(history.duration_ms)
        .bind(history.success)
        .bind(&history.error_message)
        .bind(history.correlation_id.0)
        .bind(history.occurred_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(TransitionOutcome::Applied)
    }

    async fn release_lease(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
        lease_id: Uuid,
        lease_epoch: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE fsm_state SET lease_id = NULL, lease_expires_at = NULL
             WHERE fsm_kind = $1 AND entity_id = $2
               AND lease_id = $3 AND lease_epoch = $4",
        )
        .bind(enum_str(&kind)?)
        .bind(entity_id.as_str())
        .bind(lease_id)
        .bind(lease_epoch)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn history(
        &self,
        kind: FsmKind,
        entity_id: &EntityId,
    ) -> Result<Vec<FsmHistoryRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM fsm_state_history
             WHERE fsm_kind = $1 AND entity_id = $2 ORDER BY seq",
        )
        .bind(enum_str(&kind)?)
        .bind(entity_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(history_from_row).collect()
    }

    async fn prune_history(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM fsm_state_history WHERE occurred_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

// ── PatternStore ──────────────────────────────────────────────────────────────

#[async_trait]
impl PatternStore for PostgresStore {
    async fn get_pattern(&self, id: &PatternId) -> Result<Option<LearnedPattern>, StoreError> {
        let row = sqlx::query("SELECT * FROM learned_patterns WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(pattern_from_row).transpose()
    }

    async fn latest_by_signature(
        &self,
        signature_hash: &str,
        domain_id: &DomainId,
    ) -> Result<Option<LearnedPattern>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM learned_patterns
             WHERE signature_hash = $1 AND domain_id = $2
             ORDER BY version DESC LIMIT 1",
        )
        .bind(signature_hash)
        .bind(domain_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(pattern_from_row).transpose()
    }

    async fn insert_pattern(&self, pattern: &LearnedPattern) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let result = sqlx::query(
            "INSERT INTO learned_patterns
             (id, pattern_type, name, domain_id, signature_hash, version, status,
              success_criteria, match_count, success_rate, supersedes, superseded_by,
              quality_metrics, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(pattern.id.0)
        .bind(&pattern.pattern_type)
        .bind(&pattern.name)
        .bind(pattern.domain_id.0)
        .bind(&pattern.signature_hash)
        .bind(pattern.version)
        .bind(enum_str(&pattern.status)?)
        .bind(serde_json::to_value(&pattern.success_criteria)?)
        .bind(pattern.match_count)
        .bind(pattern.success_rate)
        .bind(pattern.supersedes.map(|p| p.0))
        .bind(pattern.superseded_by.map(|p| p.0))
        .bind(&pattern.quality_metrics)
        .bind(pattern.created_at)
        .bind(pattern.updated_at)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(StoreError::UniqueViolation(format!(
                    "learned_patterns ({}, {}, v{})",
                    pattern.signature_hash, pattern.domain_id, pattern.version
                )));
            }
            Err(e) => return Err(db_err(e)),
        }

        sqlx::query(
            "INSERT INTO pattern_lifecycle (pattern_id, status, transition_count, updated_at)
             VALUES ($1, $2, 0, $3)",
        )
        .bind(pattern.id.0)
        .bind(enum_str(&pattern.status)?)
        .bind(pattern.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn link_supersedes(
        &self,
        old_id: &PatternId,
        new_id: &PatternId,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Cycle check: the supersedes chain starting at `old` must not
        // contain `new`.
        let cycle: Option<(Uuid,)> = sqlx::query_as(
            "WITH RECURSIVE chain AS (
                 SELECT id, supersedes FROM learned_patterns WHERE id = $1
                 UNION ALL
                 SELECT p.id, p.supersedes
                 FROM learned_patterns p JOIN chain c ON p.id = c.supersedes
             )
             SELECT id FROM chain WHERE id = $2 LIMIT 1",
        )
        .bind(old_id.0)
        .bind(new_id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        if cycle.is_some() {
            tx.rollback().await.map_err(db_err)?;
            return Err(StoreError::LineageCycle {
                from: new_id.to_string(),
                to: old_id.to_string(),
            });
        }

        sqlx::query("UPDATE learned_patterns SET superseded_by = $2 WHERE id = $1")
            .bind(old_id.0)
            .bind(new_id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("UPDATE learned_patterns SET supersedes = $2 WHERE id = $1")
            .bind(new_id.0)
            .bind(old_id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_patterns(
        &self,
        status: Option<PatternStatus>,
        limit: u32,
    ) -> Result<Vec<LearnedPattern>, StoreError> {
        let rows = match status {
            Some(status) => sqlx::query(
                "SELECT * FROM learned_patterns WHERE status = $1
                 ORDER BY updated_at DESC LIMIT $2",
            )
            .bind(enum_str(&status)?)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?,
            None => sqlx::query(
                "SELECT * FROM learned_patterns ORDER BY updated_at DESC LIMIT $1",
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?,
        };
        rows.iter().map(pattern_from_row).collect()
    }

    async fn lineage_edges(&self) -> Result<Vec<(PatternId, Option<PatternId>)>, StoreError> {
        let rows: Vec<(Uuid, Option<Uuid>)> =
            sqlx::query_as("SELECT id, supersedes FROM learned_patterns")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|(id, sup)| (PatternId(id), sup.map(PatternId)))
            .collect())
    }

    async fn apply_lifecycle_transition(
        &self,
        pattern_id: &PatternId,
        to_status: PatternStatus,
        transition: &LifecycleTransitionRow,
        disable: Option<&DisableEventRow>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let updated = sqlx::query(
            "UPDATE learned_patterns SET status = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(pattern_id.0)
        .bind(enum_str(&to_status)?)
        .bind(transition.occurred_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if updated.rows_affected() != 1 {
            tx.rollback().await.map_err(db_err)?;
            return Err(StoreError::NotFound(format!("pattern {pattern_id}")));
        }

        sqlx::query(
            "INSERT INTO pattern_lifecycle (pattern_id, status, transition_count, updated_at)
             VALUES ($1, $2, 1, $3)
             ON CONFLICT (pattern_id) DO UPDATE SET
                 status = EXCLUDED.status,
                 transition_count = pattern_lifecycle.transition_count + 1,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(pattern_id.0)
        .bind(enum_str(&to_status)?)
        .bind(transition.occurred_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "INSERT INTO pattern_lifecycle_transitions
             (pattern_id, from_status, to_status, actor, reason, correlation_id, occurred_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(transition.pattern_id.0)
        .bind(enum_str(&transition.from_status)?)
        .bind(enum_str(&transition.to_status)?)
        .bind(&transition.actor)
        .bind(&transition.reason)
        .bind(transition.correlation_id.0)
        .bind(transition.occurred_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if let Some(event) = disable {
            sqlx::query(
                "INSERT INTO pattern_disable_events
                 (event_id, pattern_id, pattern_class, actor, reason, correlation_id, event_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(event.event_id.0)
            .bind(event.pattern_id.0)
            .bind(&event.pattern_class)
            .bind(&event.actor)
            .bind(&event.reason)
            .bind(event.correlation_id.0)
            .bind(event.event_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            sqlx::query(
                "INSERT INTO disabled_patterns_current
                 (pattern_id, event_id, pattern_class, actor, reason, correlation_id, event_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (pattern_id) DO UPDATE SET
                     event_id = EXCLUDED.event_id,
                     pattern_class = EXCLUDED.pattern_class,
                     actor = EXCLUDED.actor,
                     reason = EXCLUDED.reason,
                     correlation_id = EXCLUDED.correlation_id,
                     event_at = EXCLUDED.event_at
                 WHERE disabled_patterns_current.event_at <= EXCLUDED.event_at",
            )
            .bind(event.pattern_id.0)
            .bind(event.event_id.0)
            .bind(&event.pattern_class)
            .bind(&event.actor)
            .bind(&event.reason)
            .bind(event.correlation_id.0)
            .bind(event.event_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn update_success_metrics(
        &self,
        pattern_id: &PatternId,
        match_count: i64,
        success_rate: f64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE learned_patterns
             SET match_count = $2, success_rate = $3, updated_at = $4
             WHERE id = $1",
        )
        .bind(pattern_id.0)
        .bind(match_count)
        .bind(success_rate)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() != 1 {
            return Err(StoreError::NotFound(format!("pattern {pattern_id}")));
        }
        Ok(())
    }

    async fn get_lifecycle(
        &self,
        pattern_id: &PatternId,
    ) -> Result<Option<PatternLifecycleRow>, StoreError> {
        let row = sqlx::query("SELECT * FROM pattern_lifecycle WHERE pattern_id = $1")
            .bind(pattern_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| {
            Ok(PatternLifecycleRow {
                pattern_id: PatternId(r.try_get("pattern_id").map_err(db_err)?),
                status: parse_enum(r.try_get::<&str, _>("status").map_err(db_err)?)?,
                transition_count: r.try_get("transition_count").map_err(db_err)?,
                updated_at: r.try_get("updated_at").map_err(db_err)?,
            })
        })
        .transpose()
    }

    async fn lifecycle_transitions(
        &self,
        pattern_id: &PatternId,
    ) -> Result<Vec<LifecycleTransitionRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM pattern_lifecycle_transitions
             WHERE pattern_id = $1 ORDER BY seq",
        )
        .bind(pattern_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter()
            .map(|r| {
                Ok(LifecycleTransitionRow {
                    pattern_id: PatternId(r.try_get("pattern_id").map_err(db_err)?),
                    from_status: parse_enum(r.try_get::<&str, _>("from_status").map_err(db_err)?)?,
                    to_status: parse_enum(r.try_get::<&str, _>("to_status").map_err(db_err)?)?,
                    actor: r.try_get("actor").map_err(db_err)?,
                    reason: r.try_get("reason").map_err(db_err)?,
                    correlation_id: CorrelationId(r.try_get("correlation_id").map_err(db_err)?),
                    occurred_at: r.try_get("occurred_at").map_err(db_err)?,
                })
            })
            .collect()
    }

    async fn disabled_current(&self) -> Result<Vec<DisableEventRow>, StoreError> {
        let rows = sqlx::query("SELECT * FROM disabled_patterns_current ORDER BY event_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(disable_from_row).collect()
    }

    async fn upsert_candidate(&self, candidate: &PatternCandidate) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO pattern_candidates
             (rule_id, repo, domain_id, pair_count, confirmed_count, mean_confidence, last_pair_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (rule_id, repo) DO UPDATE SET
                 pair_count = EXCLUDED.pair_count,
                 confirmed_count = EXCLUDED.confirmed_count,
                 mean_confidence = EXCLUDED.mean_confidence,
                 last_pair_at = EXCLUDED.last_pair_at",
        )
        .bind(&candidate.rule_id)
        .bind(&candidate.repo)
        .bind(candidate.domain_id.0)
        .bind(candidate.pair_count)
        .bind(candidate.confirmed_count)
        .bind(candidate.mean_confidence)
        .bind(candidate.last_pair_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_candidates(
        &self,
        min_confidence: f64,
    ) -> Result<Vec<PatternCandidate>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM pattern_candidates WHERE mean_confidence >= $1
             ORDER BY last_pair_at DESC",
        )
        .bind(min_confidence)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter()
            .map(|r| {
                Ok(PatternCandidate {
                    rule_id: r.try_get("rule_id").map_err(db_err)?,
                    repo: r.try_get("repo").map_err(db_err)?,
                    domain_id: DomainId(r.try_get("domain_id").map_err(db_err)?),
                    pair_count: r.try_get("pair_count").map_err(db_err)?,
                    confirmed_count: r.try_get("confirmed_count").map_err(db_err)?,
                    mean_confidence: r.try_get("mean_confidence").map_err(db_err)?,
                    last_pair_at: r.try_get("last_pair_at").map_err(db_err)?,
                })
            })
            .collect()
    }
}

// ── ReviewStore ───────────────────────────────────────────────────────────────

#[async_trait]
impl ReviewStore for PostgresStore {
    async fn upsert_finding(&self, finding: &ReviewFinding) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO review_findings
             (finding_id, repo, pr_id, rule_id, severity, file_path, line_start, line_end,
              tool_name, tool_version, normalized_message, raw_message,
              commit_sha_observed, observed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             ON CONFLICT (finding_id) DO NOTHING",
        )
        .bind(finding.finding_id.as_str())
        .bind(&finding.repo)
        .bind(finding.pr_id)
        .bind(&finding.rule_id)
        .bind(enum_str(&finding.severity)?)
        .bind(&finding.file_path)
        .bind(finding.line_start as i32)
        .bind(finding.line_end.map(|n| n as i32))
        .bind(&finding.tool_name)
        .bind(&finding.tool_version)
        .bind(&finding.normalized_message)
        .bind(&finding.raw_message)
        .bind(finding.commit_sha_observed.as_str())
        .bind(finding.observed_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_finding(
        &self,
        finding_id: &FindingId,
    ) -> Result<Option<ReviewFinding>, StoreError> {
        let row = sqlx::query("SELECT * FROM review_findings WHERE finding_id = $1")
            .bind(finding_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(finding_from_row).transpose()
    }

    async fn upsert_fix(&self, fix: &ReviewFix) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO review_fixes
             (fix_id, finding_id, fix_commit_sha, file_path, diff_hunks,
              touched_line_start, touched_line_end, tool_autofix, applied_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (fix_id) DO NOTHING",
        )
        .bind(fix.fix_id.as_str())
        .bind(fix.finding_id.as_str())
        .bind(fix.fix_commit_sha.as_str())
        .bind(&fix.file_path)
        .bind(serde_json::to_value(&fix.diff_hunks)?)
        .bind(fix.touched_line_range.start() as i32)
        .bind(fix.touched_line_range.end() as i32)
        .bind(fix.tool_autofix)
        .bind(fix.applied_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn fixes_for_finding(
        &self,
        finding_id: &FindingId,
    ) -> Result<Vec<ReviewFix>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM review_fixes WHERE finding_id = $1 ORDER BY fix_id",
        )
        .bind(finding_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter()
            .map(|r| {
                Ok(ReviewFix {
                    fix_id: FixId::new(r.try_get::<String, _>("fix_id").map_err(db_err)?),
                    finding_id: FindingId::new(
                        r.try_get::<String, _>("finding_id").map_err(db_err)?,
                    ),
                    fix_commit_sha: CommitSha(
                        r.try_get::<String, _>("fix_commit_sha").map_err(db_err)?,
                    ),
                    file_path: r.try_get("file_path").map_err(db_err)?,
                    diff_hunks: serde_json::from_value(
                        r.try_get::<Value, _>("diff_hunks").map_err(db_err)?,
                    )?,
                    touched_line_range: LineRange(
                        r.try_get::<i32, _>("touched_line_start").map_err(db_err)? as u32,
                        r.try_get::<i32, _>("touched_line_end").map_err(db_err)? as u32,
                    ),
                    tool_autofix: r.try_get("tool_autofix").map_err(db_err)?,
                    applied_at: r.try_get("applied_at").map_err(db_err)?,
                })
            })
            .collect()
    }

    async fn try_insert_pair(&self, pair: &FindingFixPair) -> Result<PairInsert, StoreError> {
        let result = sqlx::query(
            "INSERT INTO finding_fix_pairs
             (pair_id, finding_id, fix_commit_sha, diff_hunks, confidence_score,
              disappearance_confirmed, pairing_type, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (finding_id, fix_commit_sha) DO NOTHING",
        )
        .bind(pair.pair_id.0)
        .bind(pair.finding_id.as_str())
        .bind(pair.fix_commit_sha.as_str())
        .bind(serde_json::to_value(&pair.diff_hunks)?)
        .bind(pair.confidence_score)
        .bind(pair.disappearance_confirmed)
        .bind(enum_str(&pair.pairing_type)?)
        .bind(pair.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(if result.rows_affected() == 1 {
            PairInsert::Inserted
        } else {
            PairInsert::AlreadyExists
        })
    }

    async fn get_pair(
        &self,
        finding_id: &FindingId,
        fix_commit_sha: &str,
    ) -> Result<Option<FindingFixPair>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM finding_fix_pairs
             WHERE finding_id = $1 AND fix_commit_sha = $2",
        )
        .bind(finding_id.as_str())
        .bind(fix_commit_sha)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(pair_from_row).transpose()
    }

    async fn replace_pair(&self, pair: &FindingFixPair) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE finding_fix_pairs
             SET pair_id = $3, diff_hunks = $4, confidence_score = $5,
                 disappearance_confirmed = $6, pairing_type = $7, created_at = $8
             WHERE finding_id = $1 AND fix_commit_sha = $2",
        )
        .bind(pair.finding_id.as_str())
        .bind(pair.fix_commit_sha.as_str())
        .bind(pair.pair_id.0)
        .bind(serde_json::to_value(&pair.diff_hunks)?)
        .bind(pair.confidence_score)
        .bind(pair.disappearance_confirmed)
        .bind(enum_str(&pair.pairing_type)?)
        .bind(pair.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() != 1 {
            return Err(StoreError::NotFound(format!(
                "pair ({}, {})",
                pair.finding_id, pair.fix_commit_sha
            )));
        }
        Ok(())
    }

    async fn confirm_pair(
        &self,
        finding_id: &FindingId,
        fix_commit_sha: &str,
    ) -> Result<FindingFixPair, StoreError> {
        let row = sqlx::query(
            "UPDATE finding_fix_pairs SET disappearance_confirmed = TRUE
             WHERE finding_id = $1 AND fix_commit_sha = $2
             RETURNING *",
        )
        .bind(finding_id.as_str())
        .bind(fix_commit_sha)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::NotFound(format!("pair ({finding_id}, {fix_commit_sha})")))?;
        pair_from_row(&row)
    }

    async fn pairs_above_floor(&self, floor: f64) -> Result<Vec<FindingFixPair>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM finding_fix_pairs WHERE confidence_score >= $1",
        )
        .bind(floor)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(pair_from_row).collect()
    }
}

// ── FeedbackStore ─────────────────────────────────────────────────────────────

#[async_trait]
impl FeedbackStore for PostgresStore {
    async fn upsert_score(&self, score: &RoutingFeedbackScore) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO routing_feedback_scores
             (session_id, agent_selected, agent_recommended, routing_confidence,
              injection_occurred, patterns_injected_count, tool_calls_count,
              duration_ms, processed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (session_id) DO UPDATE SET
                 agent_selected = EXCLUDED.agent_selected,
                 agent_recommended = EXCLUDED.agent_recommended,
                 routing_confidence = EXCLUDED.routing_confidence,
                 injection_occurred = EXCLUDED.injection_occurred,
                 patterns_injected_count = EXCLUDED.patterns_injected_count,
                 tool_calls_count = EXCLUDED.tool_calls_count,
                 duration_ms = EXCLUDED.duration_ms,
                 processed_at = EXCLUDED.processed_at",
        )
        .bind(score.session_id.as_str())
        .bind(&score.agent_selected)
        .bind(&score.agent_recommended)
        .bind(score.routing_confidence)
        .bind(score.injection_occurred)
        .bind(score.patterns_injected_count)
        .bind(score.tool_calls_count)
        .bind(score.duration_ms)
        .bind(score.processed_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_score(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<RoutingFeedbackScore>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM routing_feedback_scores WHERE session_id = $1",
        )
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| {
            Ok(RoutingFeedbackScore {
                session_id: SessionId::new(r.try_get::<String, _>("session_id").map_err(db_err)?),
                agent_selected: r.try_get("agent_selected").map_err(db_err)?,
                agent_recommended: r.try_get("agent_recommended").map_err(db_err)?,
                routing_confidence: r.try_get("routing_confidence").map_err(db_err)?,
                injection_occurred: r.try_get("injection_occurred").map_err(db_err)?,
                patterns_injected_count: r.try_get("patterns_injected_count").map_err(db_err)?,
                tool_calls_count: r.try_get("tool_calls_count").map_err(db_err)?,
                duration_ms: r.try_get("duration_ms").map_err(db_err)?,
                processed_at: r.try_get("processed_at").map_err(db_err)?,
            })
        })
        .transpose()
    }

    async fn record_injection(&self, injection: &PatternInjection) -> Result<(), StoreError> {
        let ids: Vec<Uuid> = injection.pattern_ids.iter().map(|p| p.0).collect();
        sqlx::query(
            "INSERT INTO pattern_injections (session_id, run_id, pattern_ids, occurred_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(injection.session_id.as_str())
        .bind(injection.run_id.as_str())
        .bind(&ids)
        .bind(injection.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn injections_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<PatternInjection>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM pattern_injections WHERE session_id = $1 ORDER BY seq",
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter()
            .map(|r| {
                let ids: Vec<Uuid> = r.try_get("pattern_ids").map_err(db_err)?;
                Ok(PatternInjection {
                    session_id: SessionId::new(
                        r.try_get::<String, _>("session_id").map_err(db_err)?,
                    ),
                    run_id: mnemon_domain::RunId::new(
                        r.try_get::<String, _>("run_id").map_err(db_err)?,
                    ),
                    pattern_ids: ids.into_iter().map(PatternId).collect(),
                    occurred_at: r.try_get("occurred_at").map_err(db_err)?,
                })
            })
            .collect()
    }
}

// ── MetaStore ─────────────────────────────────────────────────────────────────

#[async_trait]
impl MetaStore for PostgresStore {
    async fn get_metadata(&self) -> Result<Option<DbMetadata>, StoreError> {
        let row = sqlx::query(
            "SELECT schema_version, installed_by, installed_at, handshake_at
             FROM db_metadata WHERE singleton",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| {
            Ok(DbMetadata {
                schema_version: r.try_get("schema_version").map_err(db_err)?,
                installed_by: r.try_get("installed_by").map_err(db_err)?,
                installed_at: r.try_get("installed_at").map_err(db_err)?,
                handshake_at: r.try_get("handshake_at").map_err(db_err)?,
            })
        })
        .transpose()
    }

    async fn init_metadata(&self, metadata: &DbMetadata) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO db_metadata (singleton, schema_version, installed_by, installed_at)
             VALUES (TRUE, $1, $2, $3)
             ON CONFLICT (singleton) DO NOTHING",
        )
        .bind(metadata.schema_version)
        .bind(&metadata.installed_by)
        .bind(metadata.installed_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_schema_version(&self, version: i32) -> Result<(), StoreError> {
        sqlx::query("UPDATE db_metadata SET schema_version = $1 WHERE singleton")
            .bind(version)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn record_handshake(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE db_metadata SET handshake_at = $1 WHERE singleton")
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn record_workflow_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO workflow_executions
             (execution_id, session_id, correlation_id, started_at, finished_at,
              status, patterns_extracted, patterns_learned, error_message)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (execution_id) DO NOTHING",
        )
        .bind(execution.execution_id)
        .bind(execution.session_id.as_str())
        .bind(execution.correlation_id.0)
        .bind(execution.started_at)
        .bind(execution.finished_at)
        .bind(enum_str(&execution.status)?)
        .bind(execution.patterns_extracted)
        .bind(execution.patterns_learned)
        .bind(&execution.error_message)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn finish_workflow_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE workflow_executions
             SET finished_at = $2, status = $3, patterns_extracted = $4,
                 patterns_learned = $5, error_message = $6
             WHERE execution_id = $1",
        )
        .bind(execution.execution_id)
        .bind(execution.finished_at)
        .bind(enum_str(&execution.status)?)
        .bind(execution.patterns_extracted)
        .bind(execution.patterns_learned)
        .bind(&execution.error_message)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_domain(
        &self,
        domain_id: &DomainId,
    ) -> Result<Option<DomainTaxonomyRow>, StoreError> {
        let row = sqlx::query("SELECT * FROM domain_taxonomy WHERE domain_id = $1")
            .bind(domain_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| {
            Ok(DomainTaxonomyRow {
                domain_id: DomainId(r.try_get("domain_id").map_err(db_err)?),
                name: r.try_get("name").map_err(db_err)?,
                parent_id: r
                    .try_get::<Option<Uuid>, _>("parent_id")
                    .map_err(db_err)?
                    .map(DomainId),
                session_success_duration_ceiling_ms: r
                    .try_get("session_success_duration_ceiling_ms")
                    .map_err(db_err)?,
            })
        })
        .transpose()
    }

    async fn upsert_domain(&self, domain: &DomainTaxonomyRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO domain_taxonomy
             (domain_id, name, parent_id, session_success_duration_ceiling_ms)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (domain_id) DO UPDATE SET
                 name = EXCLUDED.name,
                 parent_id = EXCLUDED.parent_id,
                 session_success_duration_ceiling_ms =
                     EXCLUDED.session_success_duration_ceiling_ms",
        )
        .bind(domain.domain_id.0)
        .bind(&domain.name)
        .bind(domain.parent_id.map(|d| d.0))
        .bind(domain.session_success_duration_ceiling_ms)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
