//! Event ledger: admission pipeline, chain verification, queries
//!
//! Admission runs inside a transaction holding a row lock on the agent, so
//! concurrent appends for one agent serialize and the chain-head comparison
//! always sees the true head. Appends for different agents do not contend.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use trail_core::event::{ChainIssueKind, EventType};
use trail_core::{canonicalize, sha256, PublicKey, Signature};

use crate::db::PgPool;
use crate::error::{on_unique_violation, ApiError};
use crate::models::agent::Agent;
use crate::models::event::{ChainVerification, EventPage, EventQuery, EventRecord};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

#[derive(Clone)]
pub struct LedgerService {
    db: PgPool,
}

impl LedgerService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Admit a client-signed event into the agent's chain.
    ///
    /// `submitted` is the raw request body; the hash and signature are
    /// checked over the canonicalization of exactly what the client sent
    /// (minus `hash`/`signature`), so heterogeneous clients interoperate as
    /// long as they canonicalize per RFC 8785.
    pub async fn admit(
        &self,
        authenticated_agent: &Agent,
        submitted: Value,
    ) -> Result<EventRecord, ApiError> {
        let fields = AdmissionFields::parse(&submitted)?;
        if fields.agent_id != authenticated_agent.agent_id {
            return Err(ApiError::Validation(
                "agent_id does not match the authenticated agent".to_string(),
            ));
        }

        let mut tx = self.db.begin().await?;

        // Lock the agent row: admissions for this agent serialize here.
        let agent_row = sqlx::query("SELECT * FROM agents WHERE agent_id = $1 FOR UPDATE")
            .bind(&fields.agent_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("unknown agent".to_string()))?;
        let agent = Agent::from_row(&agent_row)?;
        if !agent.is_active() {
            return Err(ApiError::Forbidden("agent is revoked".to_string()));
        }

        // Current chain head under the lock.
        let head: Option<String> = sqlx::query_scalar(
            r#"SELECT hash FROM events WHERE agent_id = $1
               ORDER BY timestamp DESC, id DESC LIMIT 1"#,
        )
        .bind(&fields.agent_id)
        .fetch_optional(&mut *tx)
        .await?;

        // Rebuild the pre-image the client hashed and signed. Server-side
        // substitutions only apply to fields the client omitted entirely.
        let mut pre_image = fields.body.clone();
        pre_image.remove("hash");
        pre_image.remove("signature");

        let timestamp = match fields.timestamp {
            Some(ts) => ts,
            None => {
                let now = truncate_to_millis(Utc::now());
                pre_image.insert(
                    "timestamp".to_string(),
                    Value::String(trail_core::canonical_timestamp(now)),
                );
                now
            }
        };
        if !pre_image.contains_key("prev_hash") {
            pre_image.insert(
                "prev_hash".to_string(),
                head.clone().map(Value::String).unwrap_or(Value::Null),
            );
        }

        let canonical = canonicalize(&Value::Object(pre_image.clone()))
            .map_err(|e| ApiError::Validation(format!("event is not canonicalizable: {e}")))?;
        let bytes = canonical.as_bytes();

        let computed = sha256(bytes).to_hex();
        if computed != fields.hash {
            return Err(ApiError::HashMismatch {
                expected: computed,
                actual: fields.hash,
            });
        }

        let public_key = PublicKey::from_hex(&agent.public_key)
            .map_err(|e| ApiError::Internal(format!("stored public key invalid: {e}")))?;
        if !public_key.verify(bytes, &fields.signature) {
            return Err(ApiError::SignatureInvalid);
        }

        // Replays are rejected idempotently before the head comparison: a
        // verbatim resubmission reads as a duplicate, not a chain break.
        let duplicate: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM events WHERE hash = $1)")
                .bind(&fields.hash)
                .fetch_one(&mut *tx)
                .await?;
        if duplicate {
            return Err(ApiError::Conflict("duplicate event hash".to_string()));
        }

        // The client's view of the head (as covered by its signature) must
        // match ours; a stale view means a concurrent append won the race.
        let client_prev = match pre_image.get("prev_hash") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };
        if client_prev != head {
            return Err(ApiError::ChainBroken {
                expected: head,
                actual: client_prev,
            });
        }

        let row = sqlx::query(
            r#"INSERT INTO events
                   (agent_id, event_type, timestamp, prev_hash, hash, payload, signature, correlation_id)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING *"#,
        )
        .bind(&fields.agent_id)
        .bind(fields.event_type.as_str())
        .bind(timestamp)
        .bind(&client_prev)
        .bind(&fields.hash)
        .bind(&fields.payload)
        .bind(fields.signature.to_hex())
        .bind(fields.correlation_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| on_unique_violation(e, "duplicate event hash"))?;

        tx.commit().await?;

        let event = EventRecord::from_row(&row)?;
        tracing::info!(
            agent_id = %event.agent_id,
            event_id = event.id,
            event_type = %event.event_type,
            "event admitted"
        );
        Ok(event)
    }

    /// Full chain verification: recanonicalize, rehash, verify every
    /// signature, and check linkage. All violations are reported.
    pub async fn verify_chain(&self, agent_id: &str) -> Result<ChainVerification, ApiError> {
        let agent = self
            .agent(agent_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("no such agent: {agent_id}")))?;
        let public_key = PublicKey::from_hex(&agent.public_key)
            .map_err(|e| ApiError::Internal(format!("stored public key invalid: {e}")))?;

        let events = self.chain(agent_id).await?;
        let signed = events
            .iter()
            .map(EventRecord::to_signed_event)
            .collect::<Result<Vec<_>, _>>()?;

        let report = trail_core::verify_chain(&signed, &public_key);
        Ok(ChainVerification {
            valid: report.valid,
            errors: report
                .issues
                .iter()
                .map(|issue| {
                    let kind = match issue.kind {
                        ChainIssueKind::HashMismatch => "hash mismatch",
                        ChainIssueKind::SignatureInvalid => "signature invalid",
                        ChainIssueKind::LinkMismatch => "chain link broken",
                    };
                    format!("event {}: {kind}: {}", issue.index, issue.detail)
                })
                .collect(),
            total_events: report.total,
            first_invalid_event: report.first_invalid,
        })
    }

    /// Cheap integrity audit: walks `prev_hash` pointers only.
    pub async fn check_linkage(&self, agent_id: &str) -> Result<Option<usize>, ApiError> {
        let events = self.chain(agent_id).await?;
        let signed = events
            .iter()
            .map(EventRecord::to_signed_event)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(trail_core::check_linkage(&signed))
    }

    pub async fn last_hash(&self, agent_id: &str) -> Result<Option<String>, ApiError> {
        if self.agent(agent_id).await?.is_none() {
            return Err(ApiError::NotFound(format!("no such agent: {agent_id}")));
        }
        let head = sqlx::query_scalar(
            r#"SELECT hash FROM events WHERE agent_id = $1
               ORDER BY timestamp DESC, id DESC LIMIT 1"#,
        )
        .bind(agent_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(head)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<EventRecord>, ApiError> {
        let row = sqlx::query("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref()
            .map(EventRecord::from_row)
            .transpose()
            .map_err(Into::into)
    }

    pub async fn get_by_hash(&self, hash: &str) -> Result<Option<EventRecord>, ApiError> {
        let row = sqlx::query("SELECT * FROM events WHERE hash = $1")
            .bind(hash)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref()
            .map(EventRecord::from_row)
            .transpose()
            .map_err(Into::into)
    }

    /// Filtered query, newest first, with the total count of matching rows.
    pub async fn query(&self, query: EventQuery) -> Result<EventPage, ApiError> {
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = query.offset.unwrap_or(0).max(0);

        if let Some(event_type) = &query.event_type {
            event_type
                .parse::<EventType>()
                .map_err(|e| ApiError::Validation(e.to_string()))?;
        }

        let rows = sqlx::query(
            r#"SELECT * FROM events
               WHERE ($1::text IS NULL OR agent_id = $1)
                 AND ($2::text IS NULL OR event_type = $2)
                 AND ($3::uuid IS NULL OR correlation_id = $3)
                 AND ($4::timestamptz IS NULL OR timestamp >= $4)
                 AND ($5::timestamptz IS NULL OR timestamp <= $5)
               ORDER BY timestamp DESC, id DESC
               LIMIT $6 OFFSET $7"#,
        )
        .bind(&query.agent_id)
        .bind(&query.event_type)
        .bind(query.correlation_id)
        .bind(query.since)
        .bind(query.until)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM events
               WHERE ($1::text IS NULL OR agent_id = $1)
                 AND ($2::text IS NULL OR event_type = $2)
                 AND ($3::uuid IS NULL OR correlation_id = $3)
                 AND ($4::timestamptz IS NULL OR timestamp >= $4)
                 AND ($5::timestamptz IS NULL OR timestamp <= $5)"#,
        )
        .bind(&query.agent_id)
        .bind(&query.event_type)
        .bind(query.correlation_id)
        .bind(query.since)
        .bind(query.until)
        .fetch_one(&self.db)
        .await?;

        let events = rows
            .iter()
            .map(EventRecord::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EventPage {
            events,
            total,
            limit,
            offset,
        })
    }

    /// All events for an agent in chain order.
    async fn chain(&self, agent_id: &str) -> Result<Vec<EventRecord>, ApiError> {
        let rows = sqlx::query(
            "SELECT * FROM events WHERE agent_id = $1 ORDER BY timestamp ASC, id ASC",
        )
        .bind(agent_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(EventRecord::from_row)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    async fn agent(&self, agent_id: &str) -> Result<Option<Agent>, ApiError> {
        let row = sqlx::query("SELECT * FROM agents WHERE agent_id = $1")
            .bind(agent_id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(Agent::from_row).transpose().map_err(Into::into)
    }
}

/// Typed view of an admission request body.
struct AdmissionFields {
    body: Map<String, Value>,
    agent_id: String,
    event_type: EventType,
    timestamp: Option<DateTime<Utc>>,
    payload: Value,
    correlation_id: Option<Uuid>,
    hash: String,
    signature: Signature,
}

impl AdmissionFields {
    fn parse(submitted: &Value) -> Result<Self, ApiError> {
        let body = submitted
            .as_object()
            .ok_or_else(|| ApiError::Validation("event body must be a JSON object".to_string()))?
            .clone();

        let agent_id = require_str(&body, "agent_id")?.to_string();

        let event_type: EventType = require_str(&body, "event_type")?
            .parse()
            .map_err(|e: trail_core::Error| ApiError::Validation(e.to_string()))?;

        let timestamp = match body.get("timestamp") {
            None => None,
            Some(Value::String(raw)) => Some(parse_canonical_timestamp(raw)?),
            Some(_) => {
                return Err(ApiError::Validation("timestamp must be a string".to_string()));
            }
        };

        let payload = body
            .get("payload")
            .cloned()
            .ok_or_else(|| ApiError::Validation("payload is required".to_string()))?;
        if !payload.is_object() {
            return Err(ApiError::Validation("payload must be an object".to_string()));
        }

        let correlation_id = match body.get("correlation_id") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(raw.parse::<Uuid>().map_err(|_| {
                ApiError::Validation("correlation_id must be a UUID".to_string())
            })?),
            Some(_) => {
                return Err(ApiError::Validation(
                    "correlation_id must be a UUID string".to_string(),
                ));
            }
        };

        let hash = require_str(&body, "hash")?.to_string();
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()) {
            return Err(ApiError::Validation(
                "hash must be 64 lowercase hex characters".to_string(),
            ));
        }

        let signature = Signature::from_hex(require_str(&body, "signature")?)
            .map_err(|_| ApiError::Validation("signature must be 128 hex characters".to_string()))?;

        // prev_hash, when present, must be null or 64 hex; its value is
        // checked against the chain head later, under the agent lock.
        match body.get("prev_hash") {
            None | Some(Value::Null) => {}
            Some(Value::String(raw)) => {
                trail_core::Hash::from_hex(raw).map_err(|_| {
                    ApiError::Validation("prev_hash must be 64 hex characters or null".to_string())
                })?;
            }
            Some(_) => {
                return Err(ApiError::Validation(
                    "prev_hash must be a hex string or null".to_string(),
                ));
            }
        }

        Ok(Self {
            body,
            agent_id,
            event_type,
            timestamp,
            payload,
            correlation_id,
            hash,
            signature,
        })
    }
}

fn require_str<'a>(body: &'a Map<String, Value>, field: &str) -> Result<&'a str, ApiError> {
    body.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::Validation(format!("{field} is required and must be a string")))
}

/// Parse a timestamp and insist on the canonical wire rendering, so that
/// what we persist recanonicalizes to the exact bytes the client signed.
fn parse_canonical_timestamp(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    let parsed: DateTime<Utc> = raw
        .parse()
        .map_err(|_| ApiError::Validation("timestamp must be RFC 3339".to_string()))?;
    if trail_core::canonical_timestamp(parsed) != raw {
        return Err(ApiError::Validation(
            "timestamp must be RFC 3339 UTC with millisecond precision (e.g. 2026-01-01T00:00:00.000Z)"
                .to_string(),
        ));
    }
    Ok(parsed)
}

fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}
