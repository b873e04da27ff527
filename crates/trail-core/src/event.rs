//! Signed, hash-linked audit events
//!
//! Each agent owns a linear chain: every event carries the hash of its
//! predecessor, the hash of its own canonical bytes, and an Ed25519 signature
//! over those same bytes. The pre-image for both hash and signature is the
//! wire object minus `hash` and `signature`, canonicalized per RFC 8785.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::canonical::canonicalize;
use crate::error::{Error, Result};
use crate::hashing::{sha256, Hash};
use crate::signing::{Keypair, PublicKey, Signature};

/// Closed set of tags an agent can record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    InputReceived,
    DecisionMade,
    ToolCallRequested,
    ToolCallResult,
    ResponseEmitted,
    MemoryCreated,
    MemoryUpdated,
    CapabilityGranted,
    CapabilityRevoked,
    PolicyViolation,
    ErrorOccurred,
    SystemEvent,
}

impl EventType {
    pub const ALL: [EventType; 12] = [
        EventType::InputReceived,
        EventType::DecisionMade,
        EventType::ToolCallRequested,
        EventType::ToolCallResult,
        EventType::ResponseEmitted,
        EventType::MemoryCreated,
        EventType::MemoryUpdated,
        EventType::CapabilityGranted,
        EventType::CapabilityRevoked,
        EventType::PolicyViolation,
        EventType::ErrorOccurred,
        EventType::SystemEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::InputReceived => "input_received",
            EventType::DecisionMade => "decision_made",
            EventType::ToolCallRequested => "tool_call_requested",
            EventType::ToolCallResult => "tool_call_result",
            EventType::ResponseEmitted => "response_emitted",
            EventType::MemoryCreated => "memory_created",
            EventType::MemoryUpdated => "memory_updated",
            EventType::CapabilityGranted => "capability_granted",
            EventType::CapabilityRevoked => "capability_revoked",
            EventType::PolicyViolation => "policy_violation",
            EventType::ErrorOccurred => "error_occurred",
            EventType::SystemEvent => "system_event",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnknownEventType(s.to_string()))
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a timestamp in the canonical wire form: RFC 3339 UTC, millisecond
/// precision, `Z` suffix. Signers and verifiers must agree on this format or
/// hashes stop reproducing.
pub fn canonical_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// An event before hashing and signing.
///
/// Serde output matches the signed wire form exactly, timestamp rendering
/// included, so a serialized event recanonicalizes to the bytes that were
/// hashed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventDraft {
    pub agent_id: String,
    pub event_type: EventType,
    #[serde(with = "ts_serde")]
    pub timestamp: DateTime<Utc>,
    pub prev_hash: Option<Hash>,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

mod ts_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, s: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&canonical_timestamp(*ts))
    }

    pub fn deserialize<'de, D>(d: D) -> std::result::Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl EventDraft {
    /// The JCS pre-image: the wire object minus `hash` and `signature`.
    ///
    /// `prev_hash` is always present (`null` for the genesis event);
    /// `correlation_id` is omitted entirely when absent.
    pub fn pre_image(&self) -> Value {
        let mut map = Map::new();
        map.insert("agent_id".into(), Value::String(self.agent_id.clone()));
        map.insert(
            "event_type".into(),
            Value::String(self.event_type.as_str().to_string()),
        );
        map.insert(
            "timestamp".into(),
            Value::String(canonical_timestamp(self.timestamp)),
        );
        map.insert(
            "prev_hash".into(),
            match &self.prev_hash {
                Some(h) => Value::String(h.to_hex()),
                None => Value::Null,
            },
        );
        map.insert("payload".into(), self.payload.clone());
        if let Some(cid) = &self.correlation_id {
            map.insert("correlation_id".into(), Value::String(cid.to_string()));
        }
        Value::Object(map)
    }

    /// Canonical bytes to be hashed and signed.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(canonicalize(&self.pre_image())?.into_bytes())
    }

    /// Hash and sign, producing the wire-ready event.
    pub fn seal(self, keypair: &Keypair) -> Result<SignedEvent> {
        let bytes = self.canonical_bytes()?;
        let hash = sha256(&bytes);
        let signature = keypair.sign(&bytes);
        Ok(SignedEvent {
            draft: self,
            hash,
            signature,
        })
    }
}

/// A complete event as exchanged over the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedEvent {
    #[serde(flatten)]
    pub draft: EventDraft,
    pub hash: Hash,
    pub signature: Signature,
}

impl SignedEvent {
    /// Recompute the canonical bytes and check both the hash and the
    /// signature under the given key.
    pub fn verify(&self, public_key: &PublicKey) -> Result<()> {
        let bytes = self.draft.canonical_bytes()?;
        if sha256(&bytes) != self.hash {
            return Err(Error::EventHashMismatch);
        }
        if !public_key.verify(&bytes, &self.signature) {
            return Err(Error::EventSignatureInvalid);
        }
        Ok(())
    }
}

/// Category of a chain verification failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainIssueKind {
    HashMismatch,
    SignatureInvalid,
    LinkMismatch,
}

/// A single violation found while walking a chain.
#[derive(Clone, Debug, Serialize)]
pub struct ChainIssue {
    /// Zero-based position of the offending event in chronological order
    pub index: usize,
    pub kind: ChainIssueKind,
    pub detail: String,
}

/// Outcome of a full chain verification.
#[derive(Clone, Debug, Serialize)]
pub struct ChainReport {
    pub valid: bool,
    pub total: usize,
    pub issues: Vec<ChainIssue>,
    pub first_invalid: Option<usize>,
}

/// Verify an agent's chain in chronological order.
///
/// Every event is recanonicalized, rehashed, and signature-checked; linkage
/// requires the first event to carry no predecessor and every later event to
/// point at the stored hash of the one before it. All violations are
/// collected, not just the first. An empty chain is vacuously valid.
pub fn verify_chain(events: &[SignedEvent], public_key: &PublicKey) -> ChainReport {
    let mut issues = Vec::new();
    let mut expected_prev: Option<Hash> = None;

    for (index, event) in events.iter().enumerate() {
        match event.draft.canonical_bytes() {
            Ok(bytes) => {
                let computed = sha256(&bytes);
                if computed != event.hash {
                    issues.push(ChainIssue {
                        index,
                        kind: ChainIssueKind::HashMismatch,
                        detail: format!(
                            "stored hash {} does not match recomputed {}",
                            event.hash, computed
                        ),
                    });
                }
                if !public_key.verify(&bytes, &event.signature) {
                    issues.push(ChainIssue {
                        index,
                        kind: ChainIssueKind::SignatureInvalid,
                        detail: "signature does not verify under the agent key".to_string(),
                    });
                }
            }
            Err(e) => issues.push(ChainIssue {
                index,
                kind: ChainIssueKind::HashMismatch,
                detail: format!("cannot canonicalize event: {e}"),
            }),
        }

        if event.draft.prev_hash != expected_prev {
            issues.push(ChainIssue {
                index,
                kind: ChainIssueKind::LinkMismatch,
                detail: format!(
                    "prev_hash is {}, expected {}",
                    fmt_link(&event.draft.prev_hash),
                    fmt_link(&expected_prev)
                ),
            });
        }

        expected_prev = Some(event.hash);
    }

    let first_invalid = issues.iter().map(|i| i.index).min();
    ChainReport {
        valid: issues.is_empty(),
        total: events.len(),
        issues,
        first_invalid,
    }
}

/// Pointer-only linkage walk; no signature or hash recomputation.
///
/// Returns the index of the first event whose `prev_hash` does not match.
pub fn check_linkage(events: &[SignedEvent]) -> Option<usize> {
    let mut expected_prev: Option<Hash> = None;
    for (index, event) in events.iter().enumerate() {
        if event.draft.prev_hash != expected_prev {
            return Some(index);
        }
        expected_prev = Some(event.hash);
    }
    None
}

fn fmt_link(hash: &Option<Hash>) -> String {
    match hash {
        Some(h) => h.to_hex(),
        None => "null".to_string(),
    }
}
