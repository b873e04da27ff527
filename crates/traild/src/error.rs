use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// API-boundary error taxonomy.
///
/// Every variant carries a stable `code` string so clients can branch without
/// parsing messages.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("previous hash mismatch: chain head moved or client is out of date")]
    ChainBroken {
        expected: Option<String>,
        actual: Option<String>,
    },
    #[error("submitted hash does not match canonical bytes")]
    HashMismatch { expected: String, actual: String },
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("rate limit exceeded")]
    RateLimited { retry_after: u64 },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ChainBroken { .. } => StatusCode::BAD_REQUEST,
            ApiError::HashMismatch { .. } => StatusCode::BAD_REQUEST,
            ApiError::SignatureInvalid => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::ChainBroken { .. } => "CHAIN_BROKEN",
            ApiError::HashMismatch { .. } => "HASH_MISMATCH",
            ApiError::SignatureInvalid => "SIGNATURE_INVALID",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::Database(_) | ApiError::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        // Never leak internal details to clients.
        let message = match &self {
            ApiError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "database error".to_string()
            }
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = serde_json::json!({ "error": message, "code": code });
        match &self {
            ApiError::ChainBroken { expected, actual } => {
                body["expected"] = serde_json::json!(expected);
                body["actual"] = serde_json::json!(actual);
            }
            ApiError::HashMismatch { expected, actual } => {
                body["expected"] = serde_json::json!(expected);
                body["actual"] = serde_json::json!(actual);
            }
            ApiError::RateLimited { retry_after } => {
                body["retryAfter"] = serde_json::json!(retry_after);
            }
            _ => {}
        }

        if let ApiError::RateLimited { retry_after } = &self {
            return (
                status,
                [("Retry-After", retry_after.to_string())],
                Json(body),
            )
                .into_response();
        }

        (status, Json(body)).into_response()
    }
}

/// Map a unique-constraint violation onto a domain conflict, leaving other
/// database errors untouched.
pub fn on_unique_violation(e: sqlx::Error, conflict: &str) -> ApiError {
    if let sqlx::Error::Database(ref db) = e {
        if db.is_unique_violation() {
            return ApiError::Conflict(conflict.to_string());
        }
    }
    ApiError::Database(e)
}
