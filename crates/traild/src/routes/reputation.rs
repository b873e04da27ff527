use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::models::reputation::{
    DomainScoreRequest, DowngradeAssessment, RecordOutcomeRequest, RecordOutcomeResponse,
    Reputation,
};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/reputation", get(list))
        .route("/api/reputation/{agent_id}", get(get_reputation))
        .route("/api/reputation/{agent_id}/domain", post(update_domain))
        .route(
            "/api/reputation/{agent_id}/should-downgrade",
            get(should_downgrade),
        )
        .route("/api/outcomes", post(record_outcome))
}

async fn list(State(state): State<AppState>) -> Result<Json<Vec<Reputation>>, ApiError> {
    Ok(Json(state.reputation.list().await?))
}

async fn get_reputation(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<Reputation>, ApiError> {
    let reputation = state
        .reputation
        .get(&agent_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no reputation for agent: {agent_id}")))?;
    Ok(Json(reputation))
}

async fn record_outcome(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Json(req): Json<RecordOutcomeRequest>,
) -> Result<(StatusCode, Json<RecordOutcomeResponse>), ApiError> {
    let (reputation, outcome) = state.reputation.record_outcome(req).await?;
    Ok((
        StatusCode::CREATED,
        Json(RecordOutcomeResponse {
            reputation,
            outcome,
        }),
    ))
}

async fn update_domain(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Path(agent_id): Path<String>,
    Json(req): Json<DomainScoreRequest>,
) -> Result<Json<Reputation>, ApiError> {
    Ok(Json(
        state
            .reputation
            .update_domain_score(&agent_id, &req.domain, req.score)
            .await?,
    ))
}

async fn should_downgrade(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<DowngradeAssessment>, ApiError> {
    Ok(Json(state.reputation.should_downgrade(&agent_id).await?))
}
