//! Property tests for signing, hashing, and canonicalization

use proptest::prelude::*;

use trail_core::{canonicalize, sha256, EventDraft, EventType, Keypair, Signature};

fn arb_json_leaf() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::from),
        any::<i64>().prop_map(serde_json::Value::from),
        "[a-zA-Z0-9 _.:-]{0,24}".prop_map(serde_json::Value::from),
    ]
}

fn arb_json() -> impl Strategy<Value = serde_json::Value> {
    arb_json_leaf().prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::from),
            prop::collection::btree_map("[a-z_]{1,12}", inner, 0..4)
                .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn canonicalization_is_deterministic(value in arb_json()) {
        let a = canonicalize(&value).unwrap();
        let b = canonicalize(&value).unwrap();
        prop_assert_eq!(&a, &b);

        // parsing the canonical form back and re-canonicalizing is a fixpoint
        let reparsed: serde_json::Value = serde_json::from_str(&a).unwrap();
        prop_assert_eq!(canonicalize(&reparsed).unwrap(), a);
    }

    #[test]
    fn sign_verify_round_trip(seed in any::<[u8; 32]>(), msg in prop::collection::vec(any::<u8>(), 0..256)) {
        let keypair = Keypair::from_seed(&seed);
        let sig = keypair.sign(&msg);
        prop_assert!(keypair.public_key().verify(&msg, &sig));
    }

    #[test]
    fn flipped_message_byte_breaks_verification(
        seed in any::<[u8; 32]>(),
        msg in prop::collection::vec(any::<u8>(), 1..256),
        idx in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let keypair = Keypair::from_seed(&seed);
        let sig = keypair.sign(&msg);

        let mut tampered = msg.clone();
        let i = idx.index(tampered.len());
        tampered[i] ^= 1 << bit;
        prop_assert!(!keypair.public_key().verify(&tampered, &sig));
    }

    #[test]
    fn flipped_signature_byte_breaks_verification(
        seed in any::<[u8; 32]>(),
        msg in prop::collection::vec(any::<u8>(), 0..64),
        idx in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let keypair = Keypair::from_seed(&seed);
        let sig = keypair.sign(&msg);

        let mut bytes = sig.to_bytes();
        let i = idx.index(bytes.len());
        bytes[i] ^= 1 << bit;
        let tampered = Signature::from_bytes(&bytes);
        prop_assert!(!keypair.public_key().verify(&msg, &tampered));
    }

    #[test]
    fn sealed_events_always_verify(seed in any::<[u8; 32]>(), payload in arb_json()) {
        let keypair = Keypair::from_seed(&seed);
        let event = EventDraft {
            agent_id: keypair.public_key().fingerprint().to_hex(),
            event_type: EventType::ToolCallResult,
            timestamp: "2026-03-01T12:00:00.000Z".parse().unwrap(),
            prev_hash: None,
            payload,
            correlation_id: None,
        }
        .seal(&keypair)
        .unwrap();

        prop_assert!(event.verify(&keypair.public_key()).is_ok());
        prop_assert_eq!(event.hash, sha256(&event.draft.canonical_bytes().unwrap()));
    }
}
