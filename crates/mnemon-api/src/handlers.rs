use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use mnemon_bus::FleetStatus;
use mnemon_domain::{EntityId, EventKind, FsmKind, PatternId, PatternStatus};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Ready means the store answers; a degraded fleet does not fail readiness,
/// it is reported on /status instead.
pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.store.get_metadata().await?;
    Ok(StatusCode::OK)
}

pub async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let fleet = match &*state.fleet_status.borrow() {
        FleetStatus::Idle => json!({"state": "idle"}),
        FleetStatus::Running => json!({"state": "running"}),
        FleetStatus::Degraded(reason) => json!({"state": "degraded", "reason": reason}),
        FleetStatus::Draining => json!({"state": "draining"}),
        FleetStatus::Stopped => json!({"state": "stopped"}),
    };
    let open_circuits: Vec<String> = state
        .dispatcher
        .open_circuits(Utc::now())
        .into_iter()
        .map(|k| k.to_string())
        .collect();
    let metadata = state.store.get_metadata().await?;

    Ok(Json(json!({
        "fleet": fleet,
        "open_circuits": open_circuits,
        "quarantined": state.dispatcher.quarantine().len(),
        "registered_routes": state.dispatcher.registry().len(),
        "schema_version": metadata.map(|m| m.schema_version),
    })))
}

// ── Patterns ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PatternsQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

pub async fn list_patterns(
    State(state): State<AppState>,
    Query(query): Query<PatternsQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            PatternStatus::ALL
                .iter()
                .copied()
                .find(|p| p.as_str() == s)
                .ok_or_else(|| ApiError::bad_request(format!("unknown status '{s}'")))
        })
        .transpose()?;
    let patterns = state
        .store
        .list_patterns(status, query.limit.unwrap_or(100))
        .await?;
    Ok(Json(json!(patterns)))
}

fn parse_pattern_id(id: &str) -> Result<PatternId, ApiError> {
    Uuid::parse_str(id)
        .map(PatternId)
        .map_err(|_| ApiError::bad_request(format!("'{id}' is not a pattern id")))
}

pub async fn get_pattern(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let pattern_id = parse_pattern_id(&id)?;
    let pattern = state
        .store
        .get_pattern(&pattern_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("pattern '{id}' not found")))?;
    let lifecycle = state.store.get_lifecycle(&pattern_id).await?;
    let transitions = state.store.lifecycle_transitions(&pattern_id).await?;
    Ok(Json(json!({
        "pattern": pattern,
        "lifecycle": lifecycle,
        "transitions": transitions,
    })))
}

pub async fn get_pattern_lineage(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let pattern_id = parse_pattern_id(&id)?;
    let chain = state.lifecycle.lineage(&pattern_id).await?;
    let ids: Vec<String> = chain.iter().map(|p| p.to_string()).collect();
    Ok(Json(json!({ "lineage": ids })))
}

pub async fn list_disabled(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let disabled = state.store.disabled_current().await?;
    Ok(Json(json!(disabled)))
}

// ── Pairs ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PairsQuery {
    pub min_confidence: Option<f64>,
}

pub async fn list_pairs(
    State(state): State<AppState>,
    Query(query): Query<PairsQuery>,
) -> Result<Json<Value>, ApiError> {
    let pairs = state
        .store
        .pairs_above_floor(query.min_confidence.unwrap_or(0.0))
        .await?;
    Ok(Json(json!(pairs)))
}

pub async fn list_candidates(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let candidates = state.store.list_candidates(0.0).await?;
    Ok(Json(json!(candidates)))
}

// ── FSM ───────────────────────────────────────────────────────────────────────

fn parse_fsm_kind(kind: &str) -> Result<FsmKind, ApiError> {
    FsmKind::ALL
        .iter()
        .copied()
        .find(|k| k.as_str() == kind)
        .ok_or_else(|| ApiError::bad_request(format!("unknown fsm kind '{kind}'")))
}

pub async fn get_fsm(
    State(state): State<AppState>,
    Path((kind, entity)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let kind = parse_fsm_kind(&kind)?;
    let entity_id = EntityId::new(entity);
    let instance = state
        .store
        .get_instance(kind, &entity_id)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(format!("fsm {kind}/{entity_id} not found"))
        })?;
    let history = state.store.history(kind, &entity_id).await?;
    Ok(Json(json!({ "instance": instance, "history": history })))
}

// ── Quarantine ────────────────────────────────────────────────────────────────

pub async fn list_quarantined(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let records = state.dispatcher.quarantine().snapshot();
    Ok(Json(json!(records)))
}

// ── Routes ────────────────────────────────────────────────────────────────────

pub async fn list_routes(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let routes: Vec<Value> = state
        .dispatcher
        .registry()
        .routes()
        .map(|(kind, version): (EventKind, u32)| json!({"kind": kind, "version": version}))
        .collect();
    Ok(Json(json!(routes)))
}
