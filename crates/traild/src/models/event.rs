use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

use trail_core::event::{EventDraft, SignedEvent};
use trail_core::{Hash, Signature};

use crate::db::Row as PgRow;
use crate::error::ApiError;

/// A persisted event in its signed wire form (snake_case by design: these
/// fields are covered by the hash and signature).
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub id: i64,
    pub agent_id: String,
    pub event_type: String,
    #[serde(with = "ts_canonical")]
    pub timestamp: DateTime<Utc>,
    pub prev_hash: Option<String>,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub hash: String,
    pub signature: String,
}

/// Serialize timestamps exactly as they were signed: RFC 3339 UTC with
/// millisecond precision. Re-canonicalizing a response body must reproduce
/// the submitted hash.
mod ts_canonical {
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    pub fn serialize<S>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&trail_core::canonical_timestamp(*ts))
    }
}

impl EventRecord {
    pub fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            agent_id: row.try_get("agent_id")?,
            event_type: row.try_get("event_type")?,
            timestamp: row.try_get("timestamp")?,
            prev_hash: row.try_get("prev_hash")?,
            payload: row.try_get("payload")?,
            correlation_id: row.try_get("correlation_id")?,
            hash: row.try_get("hash")?,
            signature: row.try_get("signature")?,
        })
    }

    /// Reconstruct the verifiable form. Rows were validated at admission, so
    /// a parse failure here means the stored row is corrupt.
    pub fn to_signed_event(&self) -> Result<SignedEvent, ApiError> {
        let corrupt = |what: &str| ApiError::Internal(format!("corrupt stored event: {what}"));

        let prev_hash = match &self.prev_hash {
            Some(h) => Some(Hash::from_hex(h).map_err(|_| corrupt("prev_hash"))?),
            None => None,
        };

        Ok(SignedEvent {
            draft: EventDraft {
                agent_id: self.agent_id.clone(),
                event_type: self.event_type.parse().map_err(|_| corrupt("event_type"))?,
                timestamp: self.timestamp,
                prev_hash,
                payload: self.payload.clone(),
                correlation_id: self.correlation_id,
            },
            hash: Hash::from_hex(&self.hash).map_err(|_| corrupt("hash"))?,
            signature: Signature::from_hex(&self.signature).map_err(|_| corrupt("signature"))?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQuery {
    pub agent_id: Option<String>,
    pub event_type: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPage {
    pub events: Vec<EventRecord>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VerifyChainRequest {
    pub agent_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub valid: bool,
    pub errors: Vec<String>,
    pub total_events: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_invalid_event: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastHashResponse {
    pub agent_id: String,
    pub last_hash: Option<String>,
}
