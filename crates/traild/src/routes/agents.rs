use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::models::agent::{Agent, AgentListQuery, RegisterAgentRequest, RevokeAgentRequest};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/agents", post(register_agent).get(list_agents))
        .route("/api/agents/{id}", get(get_agent))
        .route("/api/agents/{id}/revoke", post(revoke_agent))
}

async fn register_agent(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Json(req): Json<RegisterAgentRequest>,
) -> Result<(StatusCode, Json<Agent>), ApiError> {
    let agent = state.registry.register(req).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<AgentListQuery>,
) -> Result<Json<Vec<Agent>>, ApiError> {
    Ok(Json(state.registry.list(query).await?))
}

async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Agent>, ApiError> {
    let agent = state
        .registry
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no such agent: {id}")))?;
    Ok(Json(agent))
}

async fn revoke_agent(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Path(id): Path<String>,
    body: axum::body::Bytes,
) -> Result<Json<Agent>, ApiError> {
    // the body is optional; an empty one means "no reason given"
    let req: RevokeAgentRequest = if body.is_empty() {
        RevokeAgentRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::Validation(format!("invalid revoke body: {e}")))?
    };
    let agent = state.registry.revoke(&id, req.reason.as_deref()).await?;

    // A revoked agent keeps its chain but loses its live grants.
    let revoked = state.capabilities.revoke_all_for_agent(&id).await?;
    if revoked > 0 {
        tracing::info!(agent_id = %id, capabilities = revoked, "revoked live capabilities");
    }

    Ok(Json(agent))
}
