use axum::body::Bytes;
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::auth;
use crate::error::ApiError;
use crate::models::event::{
    ChainVerification, EventPage, EventQuery, EventRecord, LastHashResponse, VerifyChainRequest,
};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/events", post(append_event).get(query_events))
        .route("/api/events/verify-chain", post(verify_chain))
        .route("/api/events/last-hash/{agent_id}", get(last_hash))
        .route("/api/events/by-hash/{hash}", get(get_event_by_hash))
        .route("/api/events/linkage/{agent_id}", get(check_linkage))
        .route("/api/events/{id}", get(get_event))
}

/// Append a client-signed event. The only credential accepted here is the
/// per-request agent signature: possession of the agent key is what makes
/// the chain attributable.
async fn append_event(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<EventRecord>), ApiError> {
    let agent = auth::authenticate_agent(&state, &headers, "POST", uri.path(), &body).await?;

    let submitted: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("request body is not valid JSON: {e}")))?;

    let event = state.ledger.admit(&agent, submitted).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn query_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Result<Json<EventPage>, ApiError> {
    Ok(Json(state.ledger.query(query).await?))
}

async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<EventRecord>, ApiError> {
    let event = state
        .ledger
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no such event: {id}")))?;
    Ok(Json(event))
}

async fn last_hash(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<LastHashResponse>, ApiError> {
    let hash = state.ledger.last_hash(&agent_id).await?;
    Ok(Json(LastHashResponse {
        agent_id,
        last_hash: hash,
    }))
}

async fn verify_chain(
    State(state): State<AppState>,
    Json(req): Json<VerifyChainRequest>,
) -> Result<Json<ChainVerification>, ApiError> {
    Ok(Json(state.ledger.verify_chain(&req.agent_id).await?))
}

async fn get_event_by_hash(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<EventRecord>, ApiError> {
    let event = state
        .ledger
        .get_by_hash(&hash)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no event with hash: {hash}")))?;
    Ok(Json(event))
}

/// Pointer-only integrity audit; no signature work.
async fn check_linkage(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let first_broken = state.ledger.check_linkage(&agent_id).await?;
    Ok(Json(serde_json::json!({
        "agentId": agent_id,
        "valid": first_broken.is_none(),
        "firstBrokenEvent": first_broken,
    })))
}
