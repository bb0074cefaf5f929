use sqlx::PgPool;
use tracing::info;

use crate::error::StoreError;

/// One forward migration and its paired rollback. Numbering is monotonic;
/// duplicate numeric prefixes are tolerated for parallel ranges as long as
/// the two halves touch disjoint columns.
pub struct Migration {
    pub number: u32,
    pub name: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

/// The schema version this binary expects to find at boot.
pub const EXPECTED_SCHEMA_VERSION: i32 = 7;

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        number: 1,
        name: "create_fsm",
        up: r#"
CREATE TABLE fsm_state (
    fsm_kind         TEXT NOT NULL,
    entity_id        TEXT NOT NULL,
    current_state    TEXT NOT NULL,
    previous_state   TEXT,
    transition_at    TIMESTAMPTZ NOT NULL,
    metadata         JSONB NOT NULL DEFAULT 'null'::jsonb,
    lease_id         UUID,
    lease_epoch      BIGINT NOT NULL DEFAULT 0,
    lease_expires_at TIMESTAMPTZ,
    PRIMARY KEY (fsm_kind, entity_id)
);

CREATE TABLE fsm_state_history (
    seq            BIGSERIAL PRIMARY KEY,
    fsm_kind       TEXT NOT NULL,
    entity_id      TEXT NOT NULL,
    from_state     TEXT NOT NULL,
    to_state       TEXT NOT NULL,
    action         TEXT NOT NULL,
    duration_ms    BIGINT NOT NULL,
    success        BOOLEAN NOT NULL,
    error_message  TEXT,
    correlation_id UUID NOT NULL,
    occurred_at    TIMESTAMPTZ NOT NULL
);
CREATE INDEX idx_fsm_history_entity
    ON fsm_state_history (fsm_kind, entity_id, seq);
CREATE INDEX idx_fsm_history_occurred
    ON fsm_state_history (occurred_at);
"#,
        down: r#"
DROP TABLE fsm_state_history;
DROP TABLE fsm_state;
"#,
    },
    Migration {
        number: 2,
        name: "create_domain_taxonomy",
        up: r#"
CREATE TABLE domain_taxonomy (
    domain_id  UUID PRIMARY KEY,
    name       TEXT NOT NULL UNIQUE,
    parent_id  UUID REFERENCES domain_taxonomy (domain_id) ON DELETE RESTRICT,
    session_success_duration_ceiling_ms BIGINT NOT NULL DEFAULT 900000
);
"#,
        down: r#"
DROP TABLE domain_taxonomy;
"#,
    },
    Migration {
        number: 3,
        name: "create_learned_patterns",
        up: r#"
CREATE TABLE learned_patterns (
    id               UUID PRIMARY KEY,
    pattern_type     TEXT NOT NULL,
    name             TEXT NOT NULL,
    domain_id        UUID NOT NULL REFERENCES domain_taxonomy (domain_id) ON DELETE RESTRICT,
    signature_hash   CHAR(64) NOT NULL,
    version          INTEGER NOT NULL,
    status           TEXT NOT NULL,
    success_criteria JSONB NOT NULL,
    match_count      BIGINT NOT NULL DEFAULT 0,
    success_rate     DOUBLE PRECISION NOT NULL DEFAULT 0,
    supersedes       UUID REFERENCES learned_patterns (id) ON DELETE RESTRICT,
    superseded_by    UUID REFERENCES learned_patterns (id) ON DELETE RESTRICT,
    quality_metrics  JSONB NOT NULL DEFAULT 'null'::jsonb,
    created_at       TIMESTAMPTZ NOT NULL,
    updated_at       TIMESTAMPTZ NOT NULL,
    UNIQUE (signature_hash, domain_id, version)
);
CREATE INDEX idx_learned_patterns_status ON learned_patterns (status);

CREATE TABLE pattern_lifecycle (
    pattern_id       UUID PRIMARY KEY REFERENCES learned_patterns (id) ON DELETE RESTRICT,
    status           TEXT NOT NULL,
    transition_count BIGINT NOT NULL DEFAULT 0,
    updated_at       TIMESTAMPTZ NOT NULL
);

CREATE TABLE pattern_lifecycle_transitions (
    seq            BIGSERIAL PRIMARY KEY,
    pattern_id     UUID NOT NULL REFERENCES learned_patterns (id) ON DELETE RESTRICT,
    from_status    TEXT NOT NULL,
    to_status      TEXT NOT NULL,
    actor          TEXT NOT NULL,
    reason         TEXT NOT NULL,
    correlation_id UUID NOT NULL,
    occurred_at    TIMESTAMPTZ NOT NULL
);
CREATE INDEX idx_lifecycle_transitions_pattern
    ON pattern_lifecycle_transitions (pattern_id, seq);
"#,
        down: r#"
DROP TABLE pattern_lifecycle_transitions;
DROP TABLE pattern_lifecycle;
DROP TABLE learned_patterns;
"#,
    },
    Migration {
        number: 4,
        name: "create_disable_events",
        up: r#"
CREATE TABLE pattern_disable_events (
    event_id       UUID PRIMARY KEY,
    pattern_id     UUID NOT NULL REFERENCES learned_patterns (id) ON DELETE RESTRICT,
    pattern_class  TEXT NOT NULL,
    actor          TEXT NOT NULL,
    reason         TEXT NOT NULL,
    correlation_id UUID NOT NULL,
    event_at       TIMESTAMPTZ NOT NULL
);
CREATE INDEX idx_disable_events_pattern
    ON pattern_disable_events (pattern_id, event_at DESC);

-- Maintained transactionally by the lifecycle reducer, not by a DB-side
-- refresh: one row per pattern, always the latest disable event.
CREATE TABLE disabled_patterns_current (
    pattern_id     UUID PRIMARY KEY REFERENCES learned_patterns (id) ON DELETE RESTRICT,
    event_id       UUID NOT NULL,
    pattern_class  TEXT NOT NULL,
    actor          TEXT NOT NULL,
    reason         TEXT NOT NULL,
    correlation_id UUID NOT NULL,
    event_at       TIMESTAMPTZ NOT NULL
);
"#,
        down: r#"
DROP TABLE disabled_patterns_current;
DROP TABLE pattern_disable_events;
"#,
    },
    Migration {
        number: 5,
        name: "create_review",
        up: r#"
CREATE TABLE review_findings (
    finding_id         TEXT PRIMARY KEY,
    repo               TEXT NOT NULL,
    pr_id              BIGINT NOT NULL,
    rule_id            TEXT NOT NULL,
    severity           TEXT NOT NULL,
    file_path          TEXT NOT NULL,
    line_start         INTEGER NOT NULL,
    line_end           INTEGER,
    tool_name          TEXT NOT NULL,
    tool_version       TEXT NOT NULL,
    normalized_message TEXT NOT NULL,
    raw_message        TEXT NOT NULL,
    commit_sha_observed TEXT NOT NULL,
    observed_at        TIMESTAMPTZ NOT NULL
);
CREATE INDEX idx_findings_rule ON review_findings (rule_id, repo);

CREATE TABLE review_fixes (
    fix_id             TEXT PRIMARY KEY,
    finding_id         TEXT NOT NULL REFERENCES review_findings (finding_id),
    fix_commit_sha     TEXT NOT NULL,
    file_path          TEXT NOT NULL,
    diff_hunks         JSONB NOT NULL,
    touched_line_start INTEGER NOT NULL,
    touched_line_end   INTEGER NOT NULL,
    tool_autofix       BOOLEAN NOT NULL,
    applied_at         TIMESTAMPTZ NOT NULL
);
CREATE INDEX idx_fixes_finding ON review_fixes (finding_id);

CREATE TABLE finding_fix_pairs (
    pair_id                 UUID PRIMARY KEY,
    finding_id              TEXT NOT NULL REFERENCES review_findings (finding_id),
    fix_commit_sha          TEXT NOT NULL,
    diff_hunks              JSONB NOT NULL,
    confidence_score        DOUBLE PRECISION NOT NULL,
    disappearance_confirmed BOOLEAN NOT NULL,
    pairing_type            TEXT NOT NULL,
    created_at              TIMESTAMPTZ NOT NULL,
    UNIQUE (finding_id, fix_commit_sha)
);

CREATE TABLE pattern_candidates (
    rule_id         TEXT NOT NULL,
    repo            TEXT NOT NULL,
    domain_id       UUID NOT NULL REFERENCES domain_taxonomy (domain_id) ON DELETE RESTRICT,
    pair_count      BIGINT NOT NULL,
    confirmed_count BIGINT NOT NULL,
    mean_confidence DOUBLE PRECISION NOT NULL,
    last_pair_at    TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (rule_id, repo)
);
"#,
        down: r#"
DROP TABLE pattern_candidates;
DROP TABLE finding_fix_pairs;
DROP TABLE review_fixes;
DROP TABLE review_findings;
"#,
    },
    Migration {
        number: 6,
        name: "create_feedback",
        up: r#"
CREATE TABLE routing_feedback_scores (
    session_id              TEXT PRIMARY KEY,
    agent_selected          TEXT NOT NULL,
    agent_recommended       TEXT NOT NULL,
    routing_confidence      DOUBLE PRECISION NOT NULL,
    injection_occurred      BOOLEAN NOT NULL,
    patterns_injected_count BIGINT NOT NULL,
    tool_calls_count        BIGINT NOT NULL,
    duration_ms             BIGINT NOT NULL,
    processed_at            TIMESTAMPTZ NOT NULL
);

-- pattern_ids carries no FK: arrays cannot, so the application layer is the
-- sole integrity authority for these references.
CREATE TABLE pattern_injections (
    seq         BIGSERIAL PRIMARY KEY,
    session_id  TEXT NOT NULL,
    run_id      TEXT NOT NULL,
    pattern_ids UUID[] NOT NULL,
    occurred_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX idx_injections_session ON pattern_injections (session_id);
"#,
        down: r#"
DROP TABLE pattern_injections;
DROP TABLE routing_feedback_scores;
"#,
    },
    Migration {
        number: 7,
        name: "create_workflow_executions",
        up: r#"
CREATE TABLE workflow_executions (
    execution_id       UUID PRIMARY KEY,
    session_id         TEXT NOT NULL,
    correlation_id     UUID NOT NULL,
    started_at         TIMESTAMPTZ NOT NULL,
    finished_at        TIMESTAMPTZ,
    status             TEXT NOT NULL,
    patterns_extracted INTEGER NOT NULL DEFAULT 0,
    patterns_learned   INTEGER NOT NULL DEFAULT 0,
    error_message      TEXT
);
CREATE INDEX idx_workflow_session ON workflow_executions (session_id, started_at DESC);
"#,
        down: r#"
DROP TABLE workflow_executions;
"#,
    },
];

/// Validate the shipped chain: numbering must never decrease, and a repeated
/// number is only legal for a differently-named parallel migration.
pub fn validate_chain(migrations: &[Migration]) -> Result<(), StoreError> {
    for pair in migrations.windows(2) {
        if pair[1].number < pair[0].number {
            return Err(StoreError::Migration {
                number: pair[1].number,
                name: pair[1].name,
                message: format!("number decreases after {}", pair[0].number),
            });
        }
        if pair[1].number == pair[0].number && pair[1].name == pair[0].name {
            return Err(StoreError::Migration {
                number: pair[1].number,
                name: pair[1].name,
                message: "duplicate number with identical name".to_string(),
            });
        }
    }
    Ok(())
}

/// Apply every migration beyond the recorded schema version, in order, each
/// in its own transaction, bumping `db_metadata.schema_version` as part of
/// that transaction.
pub async fn migrate(pool: &PgPool, installed_by: &str) -> Result<i32, StoreError> {
    validate_chain(MIGRATIONS)?;
    bootstrap_metadata(pool, installed_by).await?;

    let current: i32 =
        sqlx::query_scalar("SELECT schema_version FROM db_metadata WHERE singleton")
            .fetch_one(pool)
            .await
            .map_err(|e| StoreError::Internal(format!("read schema_version: {e}")))?;

    let mut version = current;
    for (idx, m) in MIGRATIONS.iter().enumerate() {
        // Position in the chain, not the numeric prefix, decides whether a
        // migration already ran: versions count applied entries.
        if (idx as i32) < current {
            continue;
        }
        info!(number = m.number, name = m.name, "applying migration");
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| StoreError::Internal(format!("begin migration tx: {e}")))?;
        sqlx::raw_sql(m.up)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Migration {
                number: m.number,
                name: m.name,
                message: e.to_string(),
            })?;
        version = idx as i32 + 1;
        sqlx::query("UPDATE db_metadata SET schema_version = $1 WHERE singleton")
            .bind(version)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Internal(format!("bump schema_version: {e}")))?;
        tx.commit()
            .await
            .map_err(|e| StoreError::Internal(format!("commit migration: {e}")))?;
    }
    Ok(version)
}

/// Roll back, newest first, until the recorded version equals `target`.
pub async fn rollback_to(pool: &PgPool, target: i32) -> Result<i32, StoreError> {
    let current: i32 =
        sqlx::query_scalar("SELECT schema_version FROM db_metadata WHERE singleton")
            .fetch_one(pool)
            .await
            .map_err(|e| StoreError::Internal(format!("read schema_version: {e}")))?;

    let mut version = current;
    while version > target {
        let m = &MIGRATIONS[(version - 1) as usize];
        info!(number = m.number, name = m.name, "rolling back migration");
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| StoreError::Internal(format!("begin rollback tx: {e}")))?;
        sqlx::raw_sql(m.down)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Migration {
                number: m.number,
                name: m.name,
                message: e.to_string(),
            })?;
        version -= 1;
        sqlx::query("UPDATE db_metadata SET schema_version = $1 WHERE singleton")
            .bind(version)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Internal(format!("bump schema_version: {e}")))?;
        tx.commit()
            .await
            .map_err(|e| StoreError::Internal(format!("commit rollback: {e}")))?;
    }
    Ok(version)
}

/// Create the metadata table and singleton row when absent. The `singleton`
/// column pins the table to exactly one row.
async fn bootstrap_metadata(pool: &PgPool, installed_by: &str) -> Result<(), StoreError> {
    sqlx::raw_sql(
        r#"
CREATE TABLE IF NOT EXISTS db_metadata (
    singleton      BOOLEAN PRIMARY KEY DEFAULT TRUE CHECK (singleton),
    schema_version INTEGER NOT NULL,
    installed_by   TEXT NOT NULL,
    installed_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    handshake_at   TIMESTAMPTZ
);
"#,
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::Internal(format!("bootstrap db_metadata: {e}")))?;

    sqlx::query(
        "INSERT INTO db_metadata (singleton, schema_version, installed_by)
         VALUES (TRUE, 0, $1)
         ON CONFLICT (singleton) DO NOTHING",
    )
    .bind(installed_by)
    .execute(pool)
    .await
    .map_err(|e| StoreError::Internal(format!("seed db_metadata: {e}")))?;
    Ok(())
}
