use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::models::capability::{
    Capability, CapabilityListQuery, CheckPermissionRequest, CheckPermissionResponse,
    MintCapabilityRequest, MintCapabilityResponse, ValidateTokenRequest, ValidateTokenResponse,
};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/capabilities", post(mint).get(list))
        .route("/api/capabilities/validate", post(validate))
        .route("/api/capabilities/check-permission", post(check_permission))
        .route("/api/capabilities/{id}/revoke", post(revoke))
}

async fn mint(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Json(req): Json<MintCapabilityRequest>,
) -> Result<(StatusCode, Json<MintCapabilityResponse>), ApiError> {
    let (capability, token) = state.capabilities.mint(req).await?;
    Ok((
        StatusCode::CREATED,
        Json(MintCapabilityResponse { capability, token }),
    ))
}

async fn validate(
    State(state): State<AppState>,
    Json(req): Json<ValidateTokenRequest>,
) -> Result<Json<ValidateTokenResponse>, ApiError> {
    Ok(Json(state.capabilities.validate(&req.token).await?))
}

async fn check_permission(
    State(state): State<AppState>,
    Json(req): Json<CheckPermissionRequest>,
) -> Result<Json<CheckPermissionResponse>, ApiError> {
    Ok(Json(
        state
            .capabilities
            .check_permission(&req.agent_id, &req.action)
            .await?,
    ))
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<CapabilityListQuery>,
) -> Result<Json<Vec<Capability>>, ApiError> {
    Ok(Json(state.capabilities.list(query).await?))
}

async fn revoke(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<Capability>, ApiError> {
    Ok(Json(state.capabilities.revoke(id).await?))
}
