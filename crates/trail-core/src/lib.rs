#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! # trail-core
//!
//! Cryptographic core for the agent audit trail:
//! - Canonical JSON (RFC 8785), the single source of truth for hashing and
//!   signing bytes
//! - SHA-256 hashing
//! - Ed25519 signing and verification, including the agent identifier
//!   (SHA-256 fingerprint of the public key)
//! - Signed, hash-linked events and chain verification
//! - Password-based keystore (scrypt + AES-256-GCM)
//!
//! ## Quick start
//!
//! ```rust
//! use trail_core::{EventDraft, EventType, Keypair};
//!
//! let keypair = Keypair::generate();
//! let agent_id = keypair.public_key().fingerprint().to_hex();
//!
//! let event = EventDraft {
//!     agent_id,
//!     event_type: EventType::InputReceived,
//!     timestamp: chrono::Utc::now(),
//!     prev_hash: None,
//!     payload: serde_json::json!({"prompt": "hello"}),
//!     correlation_id: None,
//! }
//! .seal(&keypair)
//! .unwrap();
//!
//! assert!(event.verify(&keypair.public_key()).is_ok());
//! ```

pub mod canonical;
pub mod error;
pub mod event;
pub mod hashing;
pub mod keystore;
pub mod signing;

pub use canonical::{canonical_bytes, canonicalize};
pub use error::{Error, Result};
pub use event::{
    canonical_timestamp, check_linkage, verify_chain, ChainIssue, ChainIssueKind, ChainReport,
    EventDraft, EventType, SignedEvent,
};
pub use hashing::{sha256, sha256_hex, Hash};
pub use keystore::{decrypt_key, encrypt_key, Keystore};
pub use signing::{Keypair, PublicKey, Signature};
