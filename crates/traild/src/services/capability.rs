//! Capability engine: scoped, expiring bearer tokens
//!
//! Only the SHA-256 of a token is stored; the plaintext leaves the service
//! exactly once, in the mint response.

use chrono::Utc;
use rand_core::{OsRng, RngCore};
use serde_json::Value;
use uuid::Uuid;

use trail_core::sha256;

use crate::db::PgPool;
use crate::error::{on_unique_violation, ApiError};
use crate::models::capability::{
    Capability, CapabilityListQuery, CheckPermissionResponse, MintCapabilityRequest,
    ValidateTokenResponse, STATUS_ACTIVE, STATUS_REVOKED,
};

#[derive(Clone)]
pub struct CapabilityService {
    db: PgPool,
}

impl CapabilityService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn mint(
        &self,
        req: MintCapabilityRequest,
    ) -> Result<(Capability, String), ApiError> {
        validate_scope(&req.scope)?;
        if req.expires_at <= Utc::now() {
            return Err(ApiError::Validation(
                "expiresAt must be in the future".to_string(),
            ));
        }

        let agent_exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM agents WHERE agent_id = $1)")
                .bind(&req.agent_id)
                .fetch_one(&self.db)
                .await?;
        if !agent_exists {
            return Err(ApiError::NotFound(format!("no such agent: {}", req.agent_id)));
        }

        let mut token_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut token_bytes);
        let token = hex::encode(token_bytes);
        let token_hash = sha256(token.as_bytes()).to_hex();

        let row = sqlx::query(
            r#"INSERT INTO capabilities (id, agent_id, scope, issued_by, expires_at, token_hash)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING *"#,
        )
        .bind(Uuid::new_v4())
        .bind(&req.agent_id)
        .bind(&req.scope)
        .bind(&req.issued_by)
        .bind(req.expires_at)
        .bind(&token_hash)
        .fetch_one(&self.db)
        .await
        .map_err(|e| on_unique_violation(e, "token collision, retry mint"))?;

        let capability = Capability::from_row(&row)?;
        tracing::info!(
            capability_id = %capability.id,
            agent_id = %capability.agent_id,
            "capability minted"
        );
        Ok((capability, token))
    }

    /// Look a token up by hash. Elapsed `expires_at` is invalid regardless
    /// of whether the expiry sweep has caught up with the stored status.
    pub async fn validate(&self, token: &str) -> Result<ValidateTokenResponse, ApiError> {
        let token_hash = sha256(token.trim().as_bytes()).to_hex();

        let row = sqlx::query("SELECT * FROM capabilities WHERE token_hash = $1")
            .bind(&token_hash)
            .fetch_optional(&self.db)
            .await?;

        let capability = match row {
            Some(row) => Capability::from_row(&row)?,
            None => return Ok(denied("unknown token")),
        };

        if capability.status == STATUS_REVOKED {
            return Ok(denied("capability has been revoked"));
        }
        if capability.status != STATUS_ACTIVE || capability.expires_at <= Utc::now() {
            return Ok(denied("capability has expired"));
        }

        Ok(ValidateTokenResponse {
            valid: true,
            capability: Some(capability),
            reason: None,
        })
    }

    /// Does any live capability grant `action`?
    pub async fn check_permission(
        &self,
        agent_id: &str,
        action: &str,
    ) -> Result<CheckPermissionResponse, ApiError> {
        let rows = sqlx::query(
            r#"SELECT * FROM capabilities
               WHERE agent_id = $1 AND status = $2 AND expires_at > now()
               ORDER BY issued_at ASC"#,
        )
        .bind(agent_id)
        .bind(STATUS_ACTIVE)
        .fetch_all(&self.db)
        .await?;

        for row in &rows {
            let capability = Capability::from_row(row)?;
            if let Some(grant) = match_scope(&capability.scope, action) {
                return Ok(CheckPermissionResponse {
                    allowed: true,
                    scope: Some(grant),
                    reason: None,
                });
            }
        }

        Ok(CheckPermissionResponse {
            allowed: false,
            scope: None,
            reason: Some(format!("no active capability grants {action}")),
        })
    }

    /// Revoke a capability. Terminal; revoking twice is a conflict.
    pub async fn revoke(&self, id: Uuid) -> Result<Capability, ApiError> {
        let row = sqlx::query(
            r#"UPDATE capabilities SET status = 'revoked', revoked_at = now()
               WHERE id = $1 AND status = $2
               RETURNING *"#,
        )
        .bind(id)
        .bind(STATUS_ACTIVE)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => {
                let capability = Capability::from_row(&row)?;
                tracing::info!(capability_id = %capability.id, "capability revoked");
                Ok(capability)
            }
            None => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM capabilities WHERE id = $1)")
                        .bind(id)
                        .fetch_one(&self.db)
                        .await?;
                if exists {
                    Err(ApiError::Conflict("capability is not active".to_string()))
                } else {
                    Err(ApiError::NotFound(format!("no such capability: {id}")))
                }
            }
        }
    }

    /// Revoke every active capability of an agent; returns the affected row
    /// count as reported by the database.
    pub async fn revoke_all_for_agent(&self, agent_id: &str) -> Result<u64, ApiError> {
        let result = sqlx::query(
            r#"UPDATE capabilities SET status = 'revoked', revoked_at = now()
               WHERE agent_id = $1 AND status = $2"#,
        )
        .bind(agent_id)
        .bind(STATUS_ACTIVE)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Transition every active capability past its expiry; returns the
    /// affected row count as reported by the database.
    pub async fn expire_sweep(&self) -> Result<u64, ApiError> {
        let result = sqlx::query(
            r#"UPDATE capabilities SET status = 'expired'
               WHERE status = $1 AND expires_at <= now()"#,
        )
        .bind(STATUS_ACTIVE)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list(&self, query: CapabilityListQuery) -> Result<Vec<Capability>, ApiError> {
        let active_only = query.active_only.unwrap_or(false);

        let rows = sqlx::query(
            r#"SELECT * FROM capabilities
               WHERE ($1::text IS NULL OR agent_id = $1)
                 AND (NOT $2 OR (status = 'active' AND expires_at > now()))
               ORDER BY issued_at DESC"#,
        )
        .bind(&query.agent_id)
        .bind(active_only)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(Capability::from_row)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }
}

fn denied(reason: &str) -> ValidateTokenResponse {
    ValidateTokenResponse {
        valid: false,
        capability: None,
        reason: Some(reason.to_string()),
    }
}

/// A scope grants `action` if it contains the exact key or the namespace
/// wildcard. The returned value is the grant: `true` or a constraint object
/// the caller interprets.
pub fn match_scope(scope: &Value, action: &str) -> Option<Value> {
    let entries = scope.as_object()?;

    if let Some(grant) = entries.get(action).filter(|g| is_grant(g)) {
        return Some(grant.clone());
    }

    let namespace = action.split_once(':')?.0;
    entries
        .get(&format!("{namespace}:*"))
        .filter(|g| is_grant(g))
        .cloned()
}

fn is_grant(value: &Value) -> bool {
    matches!(value, Value::Bool(true) | Value::Object(_))
}

/// Scope keys must look like `namespace:verb` (or `namespace:*`); values
/// must be `true` or a constraint object.
fn validate_scope(scope: &Value) -> Result<(), ApiError> {
    let entries = scope
        .as_object()
        .ok_or_else(|| ApiError::Validation("scope must be an object".to_string()))?;
    if entries.is_empty() {
        return Err(ApiError::Validation("scope must not be empty".to_string()));
    }

    for (key, value) in entries {
        match key.split_once(':') {
            Some((ns, verb)) if !ns.is_empty() && !verb.is_empty() => {}
            _ => {
                return Err(ApiError::Validation(format!(
                    "scope key {key:?} is not of the form namespace:verb"
                )));
            }
        }
        if !is_grant(value) {
            return Err(ApiError::Validation(format!(
                "scope value for {key:?} must be true or a constraint object"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Value {
        serde_json::json!({
            "tool:web.read": true,
            "tool:wallet.send": {"max_value": 100, "max_per_hour": 5},
            "memory:*": true,
        })
    }

    #[test]
    fn exact_match_wins_and_carries_constraints() {
        let grant = match_scope(&scope(), "tool:wallet.send").unwrap();
        assert_eq!(grant["max_value"], 100);

        let grant = match_scope(&scope(), "tool:web.read").unwrap();
        assert_eq!(grant, Value::Bool(true));
    }

    #[test]
    fn wildcard_grants_any_verb_in_namespace() {
        assert!(match_scope(&scope(), "memory:write").is_some());
        assert!(match_scope(&scope(), "memory:anything.at.all").is_some());
    }

    #[test]
    fn unrelated_actions_are_denied() {
        assert!(match_scope(&scope(), "tool:x.post").is_none());
        assert!(match_scope(&scope(), "payments:send").is_none());
        assert!(match_scope(&scope(), "no-colon").is_none());
    }

    #[test]
    fn false_and_scalar_values_do_not_grant() {
        let scope = serde_json::json!({"tool:a": false, "tool:b": "yes", "tool:c": null});
        assert!(match_scope(&scope, "tool:a").is_none());
        assert!(match_scope(&scope, "tool:b").is_none());
        assert!(match_scope(&scope, "tool:c").is_none());
    }

    #[test]
    fn wildcard_key_itself_matches_wildcard_lookup() {
        let scope = serde_json::json!({"tool:*": true});
        assert!(match_scope(&scope, "tool:wallet.send").is_some());
    }

    #[test]
    fn scope_validation() {
        assert!(validate_scope(&scope()).is_ok());
        assert!(validate_scope(&serde_json::json!({})).is_err());
        assert!(validate_scope(&serde_json::json!([])).is_err());
        assert!(validate_scope(&serde_json::json!({"noverb": true})).is_err());
        assert!(validate_scope(&serde_json::json!({"tool:x": 5})).is_err());
    }
}
