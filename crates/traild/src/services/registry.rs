use trail_core::PublicKey;

use crate::db::PgPool;
use crate::error::{on_unique_violation, ApiError};
use crate::models::agent::{Agent, AgentListQuery, RegisterAgentRequest, STATUS_ACTIVE};

/// Agent lifecycle: register, look up, revoke.
///
/// The agent identifier is derived, never chosen: SHA-256 over the raw
/// public key bytes, lowercase hex.
#[derive(Clone)]
pub struct RegistryService {
    db: PgPool,
}

impl RegistryService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn register(&self, req: RegisterAgentRequest) -> Result<Agent, ApiError> {
        let key_hex = req.public_key.trim();
        if key_hex.len() != 64
            || !key_hex
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(ApiError::Validation(
                "publicKey must be 64 lowercase hex characters".to_string(),
            ));
        }
        let public_key = PublicKey::from_hex(key_hex)
            .map_err(|e| ApiError::Validation(format!("invalid Ed25519 public key: {e}")))?;

        let agent_id = public_key.fingerprint().to_hex();
        let metadata = req.metadata.unwrap_or_else(|| serde_json::json!({}));
        if !metadata.is_object() {
            return Err(ApiError::Validation("metadata must be an object".to_string()));
        }

        let row = sqlx::query(
            r#"INSERT INTO agents (agent_id, public_key, name, owner, metadata)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING *"#,
        )
        .bind(&agent_id)
        .bind(key_hex)
        .bind(&req.name)
        .bind(&req.owner)
        .bind(&metadata)
        .fetch_one(&self.db)
        .await
        .map_err(|e| on_unique_violation(e, "public key already registered"))?;

        let agent = Agent::from_row(&row)?;
        tracing::info!(agent_id = %agent.agent_id, "agent registered");
        Ok(agent)
    }

    pub async fn get(&self, agent_id: &str) -> Result<Option<Agent>, ApiError> {
        let row = sqlx::query("SELECT * FROM agents WHERE agent_id = $1")
            .bind(agent_id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(Agent::from_row).transpose().map_err(Into::into)
    }

    pub async fn list(&self, query: AgentListQuery) -> Result<Vec<Agent>, ApiError> {
        if let Some(status) = &query.status {
            if status != "active" && status != "revoked" {
                return Err(ApiError::Validation(format!("unknown status: {status}")));
            }
        }

        let rows = sqlx::query(
            r#"SELECT * FROM agents
               WHERE ($1::text IS NULL OR status = $1)
                 AND ($2::text IS NULL OR owner = $2)
               ORDER BY created_at DESC"#,
        )
        .bind(&query.status)
        .bind(&query.owner)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(Agent::from_row)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    /// Revoke an agent. Terminal: there is no way back to `active`.
    pub async fn revoke(&self, agent_id: &str, reason: Option<&str>) -> Result<Agent, ApiError> {
        let row = sqlx::query(
            r#"UPDATE agents
               SET status = 'revoked',
                   revoked_at = now(),
                   metadata = CASE
                       WHEN $2::text IS NULL THEN metadata
                       ELSE jsonb_set(metadata, '{revocation_reason}', to_jsonb($2::text))
                   END
               WHERE agent_id = $1 AND status = $3
               RETURNING *"#,
        )
        .bind(agent_id)
        .bind(reason)
        .bind(STATUS_ACTIVE)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => {
                let agent = Agent::from_row(&row)?;
                tracing::info!(agent_id = %agent.agent_id, "agent revoked");
                Ok(agent)
            }
            None => match self.get(agent_id).await? {
                Some(_) => Err(ApiError::Conflict("agent already revoked".to_string())),
                None => Err(ApiError::NotFound(format!("no such agent: {agent_id}"))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn lowercase_hex_gate() {
        // mirrors the validation in register(): mixed case must not pass
        let upper = "A".repeat(64);
        assert!(!upper
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));

        let lower = "a".repeat(64);
        assert!(lower
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }
}
