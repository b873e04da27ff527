//! Request authentication
//!
//! Two credentials are admissible:
//! - the shared service key (administrative mutations), checked by comparing
//!   SHA-256 digests so the comparison cost is independent of the secret;
//! - a per-request Ed25519 agent signature over `METHOD:PATH:BODY:TIMESTAMP`
//!   with a bounded clock skew (event appends).

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;

use trail_core::{canonicalize, sha256, PublicKey, Signature};

use crate::error::ApiError;
use crate::models::agent::Agent;
use crate::state::AppState;

pub const SERVICE_KEY_HEADER: &str = "x-service-key";
pub const AGENT_ID_HEADER: &str = "x-agent-id";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Extractor proving the caller presented the service key.
pub struct ServiceAuth;

impl<S> FromRequestParts<S> for ServiceAuth
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let presented = parts
            .headers
            .get(SERVICE_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing service key".to_string()))?;

        if !service_key_matches(presented, &state.config.service_api_key) {
            return Err(ApiError::Unauthorized("invalid service key".to_string()));
        }
        Ok(ServiceAuth)
    }
}

/// Compare by digest: equal-length, data-independent comparison regardless
/// of how much of the presented key matches.
pub fn service_key_matches(presented: &str, configured: &str) -> bool {
    sha256(presented.as_bytes()) == sha256(configured.as_bytes())
}

/// Verify the three agent-signature headers against the request.
///
/// The signed payload is `METHOD:PATH:BODY:TIMESTAMP`, where BODY is the
/// RFC 8785 canonicalization of the JSON body (empty string when there is no
/// body), so signatures reproduce across clients regardless of their JSON
/// serializer.
pub async fn authenticate_agent(
    state: &AppState,
    headers: &HeaderMap,
    method: &str,
    path: &str,
    body: &[u8],
) -> Result<Agent, ApiError> {
    let agent_id = header_str(headers, AGENT_ID_HEADER)?;
    let timestamp_raw = header_str(headers, TIMESTAMP_HEADER)?;
    let signature_hex = header_str(headers, SIGNATURE_HEADER)?;

    let timestamp: i64 = timestamp_raw
        .parse()
        .map_err(|_| ApiError::Unauthorized("timestamp header must be unix seconds".to_string()))?;
    let now = chrono::Utc::now().timestamp();
    if !within_window(now, timestamp, state.config.signature_timestamp_window) {
        return Err(ApiError::Unauthorized(
            "request timestamp outside the allowed window".to_string(),
        ));
    }

    let agent = state
        .registry
        .get(agent_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("unknown agent".to_string()))?;
    if !agent.is_active() {
        return Err(ApiError::Forbidden("agent is revoked".to_string()));
    }

    let signature = Signature::from_hex(signature_hex)
        .map_err(|_| ApiError::Unauthorized("malformed signature header".to_string()))?;
    let public_key = PublicKey::from_hex(&agent.public_key)
        .map_err(|e| ApiError::Internal(format!("stored public key invalid: {e}")))?;

    let payload = signing_payload(method, path, body, timestamp_raw)?;
    if !public_key.verify(payload.as_bytes(), &signature) {
        return Err(ApiError::SignatureInvalid);
    }

    Ok(agent)
}

/// Build the exact string an agent signs for a request.
pub fn signing_payload(
    method: &str,
    path: &str,
    body: &[u8],
    timestamp: &str,
) -> Result<String, ApiError> {
    let canonical_body = if body.is_empty() {
        String::new()
    } else {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ApiError::Validation(format!("request body is not valid JSON: {e}")))?;
        canonicalize(&value)
            .map_err(|e| ApiError::Validation(format!("request body is not canonicalizable: {e}")))?
    };
    Ok(format!("{method}:{path}:{canonical_body}:{timestamp}"))
}

/// Inclusive at the boundary: a skew of exactly the window is accepted.
pub fn within_window(now: i64, timestamp: i64, window: i64) -> bool {
    (now - timestamp).abs() <= window
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ApiError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {name} header")))
}
