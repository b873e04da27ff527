//! Integration tests for the traild HTTP API
//!
//! These require a running daemon with a PostgreSQL database behind it.
//! Run with:
//!   TRAILD_URL=http://127.0.0.1:8080 SERVICE_API_KEY=dev-service-key \
//!     cargo test -p traild --test integration -- --ignored

use chrono::{DateTime, Utc};
use serde_json::json;

use trail_core::event::{EventDraft, EventType, SignedEvent};
use trail_core::{canonicalize, Hash, Keypair};

fn base_url() -> String {
    std::env::var("TRAILD_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
}

fn service_key() -> String {
    std::env::var("SERVICE_API_KEY").unwrap_or_else(|_| "dev-service-key".to_string())
}

fn now_millis() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).expect("in range")
}

async fn register_agent(client: &reqwest::Client, keypair: &Keypair) -> String {
    let resp = client
        .post(format!("{}/api/agents", base_url()))
        .header("x-service-key", service_key())
        .json(&json!({ "publicKey": keypair.public_key().to_hex(), "name": "itest" }))
        .send()
        .await
        .expect("Failed to connect to daemon");
    assert_eq!(resp.status(), 201, "register failed: {}", resp.text().await.unwrap());

    let agent: serde_json::Value = resp.json().await.unwrap();
    agent["agentId"].as_str().unwrap().to_string()
}

fn sealed_event(
    keypair: &Keypair,
    agent_id: &str,
    event_type: EventType,
    prev: Option<Hash>,
    payload: serde_json::Value,
) -> SignedEvent {
    EventDraft {
        agent_id: agent_id.to_string(),
        event_type,
        timestamp: now_millis(),
        prev_hash: prev,
        payload,
        correlation_id: None,
    }
    .seal(keypair)
    .unwrap()
}

async fn post_event(
    client: &reqwest::Client,
    keypair: &Keypair,
    agent_id: &str,
    event: &SignedEvent,
) -> reqwest::Response {
    let body = serde_json::to_value(event).unwrap();
    let canonical_body = canonicalize(&body).unwrap();
    let ts = Utc::now().timestamp().to_string();
    let payload = format!("POST:/api/events:{canonical_body}:{ts}");
    let signature = keypair.sign(payload.as_bytes());

    client
        .post(format!("{}/api/events", base_url()))
        .header("x-agent-id", agent_id)
        .header("x-timestamp", ts)
        .header("x-signature", signature.to_hex())
        .header("content-type", "application/json")
        .body(canonical_body)
        .send()
        .await
        .expect("Failed to connect to daemon")
}

#[tokio::test]
#[ignore = "requires running daemon"]
async fn health_endpoint() {
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/api/health", base_url()))
        .send()
        .await
        .expect("Failed to connect to daemon");

    assert!(resp.status().is_success());
    let health: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
#[ignore = "requires running daemon"]
async fn happy_chain_of_three() {
    let client = reqwest::Client::new();
    let keypair = Keypair::generate();
    let agent_id = register_agent(&client, &keypair).await;

    let types = [
        EventType::InputReceived,
        EventType::DecisionMade,
        EventType::ResponseEmitted,
    ];
    let mut prev = None;
    let mut last_hash = String::new();
    for (i, event_type) in types.into_iter().enumerate() {
        let event = sealed_event(&keypair, &agent_id, event_type, prev, json!({"i": i + 1}));
        let resp = post_event(&client, &keypair, &agent_id, &event).await;
        assert_eq!(resp.status(), 201, "append {i}: {}", resp.text().await.unwrap());
        prev = Some(event.hash);
        last_hash = event.hash.to_hex();
    }

    let resp = client
        .get(format!("{}/api/events/last-hash/{agent_id}", base_url()))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["lastHash"], json!(last_hash));

    let resp = client
        .post(format!("{}/api/events/verify-chain", base_url()))
        .json(&json!({ "agentId": agent_id }))
        .send()
        .await
        .unwrap();
    let verification: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(verification["valid"], json!(true));
    assert_eq!(verification["totalEvents"], json!(3));
}

#[tokio::test]
#[ignore = "requires running daemon"]
async fn replayed_event_is_rejected_as_duplicate() {
    let client = reqwest::Client::new();
    let keypair = Keypair::generate();
    let agent_id = register_agent(&client, &keypair).await;

    let event = sealed_event(
        &keypair,
        &agent_id,
        EventType::InputReceived,
        None,
        json!({"i": 1}),
    );
    let resp = post_event(&client, &keypair, &agent_id, &event).await;
    assert_eq!(resp.status(), 201);

    // verbatim resubmission: same bytes, fresh request signature
    let resp = post_event(&client, &keypair, &agent_id, &event).await;
    assert_eq!(resp.status(), 409);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], json!("CONFLICT"));

    // the stored chain is unchanged
    let resp = client
        .post(format!("{}/api/events/verify-chain", base_url()))
        .json(&json!({ "agentId": agent_id }))
        .send()
        .await
        .unwrap();
    let verification: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(verification["valid"], json!(true));
    assert_eq!(verification["totalEvents"], json!(1));
}

#[tokio::test]
#[ignore = "requires running daemon"]
async fn stale_head_is_a_chain_break() {
    let client = reqwest::Client::new();
    let keypair = Keypair::generate();
    let agent_id = register_agent(&client, &keypair).await;

    let first = sealed_event(
        &keypair,
        &agent_id,
        EventType::InputReceived,
        None,
        json!({"i": 1}),
    );
    assert_eq!(post_event(&client, &keypair, &agent_id, &first).await.status(), 201);

    // signed against an empty chain although the head has moved
    let stale = sealed_event(
        &keypair,
        &agent_id,
        EventType::DecisionMade,
        None,
        json!({"i": 2}),
    );
    let resp = post_event(&client, &keypair, &agent_id, &stale).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], json!("CHAIN_BROKEN"));
    assert_eq!(body["expected"], json!(first.hash.to_hex()));
}

#[tokio::test]
#[ignore = "requires running daemon"]
async fn event_signed_with_the_wrong_key_is_rejected() {
    let client = reqwest::Client::new();
    let keypair_a = Keypair::generate();
    let keypair_b = Keypair::generate();
    let agent_a = register_agent(&client, &keypair_a).await;

    // event body claims agent A but is sealed with B's key; the request
    // itself is signed by A so it reaches the event-signature check
    let event = sealed_event(
        &keypair_b,
        &agent_a,
        EventType::InputReceived,
        None,
        json!({"i": 1}),
    );
    let resp = post_event(&client, &keypair_a, &agent_a, &event).await;
    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], json!("SIGNATURE_INVALID"));

    // nothing persisted
    let resp = client
        .get(format!("{}/api/events/last-hash/{agent_a}", base_url()))
        .send()
        .await
        .unwrap();
    let last: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(last["lastHash"], json!(null));
}

#[tokio::test]
#[ignore = "requires running daemon"]
async fn capability_enforcement_round_trip() {
    let client = reqwest::Client::new();
    let keypair = Keypair::generate();
    let agent_id = register_agent(&client, &keypair).await;

    let resp = client
        .post(format!("{}/api/capabilities", base_url()))
        .header("x-service-key", service_key())
        .json(&json!({
            "agentId": agent_id,
            "scope": { "tool:web.read": true, "tool:wallet.send": { "max_value": 100 } },
            "issuedBy": "itest",
            "expiresAt": Utc::now() + chrono::Duration::hours(1),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let minted: serde_json::Value = resp.json().await.unwrap();
    let token = minted["token"].as_str().unwrap().to_string();
    let capability_id = minted["capability"]["id"].as_str().unwrap().to_string();

    // the plaintext token validates
    let resp = client
        .post(format!("{}/api/capabilities/validate", base_url()))
        .json(&json!({ "token": token }))
        .send()
        .await
        .unwrap();
    let validation: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(validation["valid"], json!(true));

    let check = |action: &str| {
        let client = client.clone();
        let agent_id = agent_id.clone();
        let action = action.to_string();
        async move {
            let resp = client
                .post(format!("{}/api/capabilities/check-permission", base_url()))
                .json(&json!({ "agentId": agent_id, "action": action }))
                .send()
                .await
                .unwrap();
            resp.json::<serde_json::Value>().await.unwrap()
        }
    };

    let allowed = check("tool:wallet.send").await;
    assert_eq!(allowed["allowed"], json!(true));
    assert_eq!(allowed["scope"]["max_value"], json!(100));

    let denied = check("tool:x.post").await;
    assert_eq!(denied["allowed"], json!(false));

    // revoke, then both checks deny
    let resp = client
        .post(format!(
            "{}/api/capabilities/{capability_id}/revoke",
            base_url()
        ))
        .header("x-service-key", service_key())
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    assert_eq!(check("tool:wallet.send").await["allowed"], json!(false));
    assert_eq!(check("tool:web.read").await["allowed"], json!(false));

    // revoking twice is a conflict
    let resp = client
        .post(format!(
            "{}/api/capabilities/{capability_id}/revoke",
            base_url()
        ))
        .header("x-service-key", service_key())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
#[ignore = "requires running daemon"]
async fn reputation_follows_outcomes() {
    let client = reqwest::Client::new();
    let keypair = Keypair::generate();
    let agent_id = register_agent(&client, &keypair).await;

    // a fresh agent starts at 50.0 with no actions
    let resp = client
        .get(format!("{}/api/reputation/{agent_id}", base_url()))
        .send()
        .await
        .unwrap();
    let reputation: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(reputation["overallScore"], json!(50.0));
    assert_eq!(reputation["totalActions"], json!(0));

    let event = sealed_event(
        &keypair,
        &agent_id,
        EventType::ToolCallResult,
        None,
        json!({"i": 1}),
    );
    let resp = post_event(&client, &keypair, &agent_id, &event).await;
    assert_eq!(resp.status(), 201);
    let event_id = resp.json::<serde_json::Value>().await.unwrap()["id"]
        .as_i64()
        .unwrap();

    let record = |outcome: &str| {
        let client = client.clone();
        let agent_id = agent_id.clone();
        let outcome = outcome.to_string();
        async move {
            let resp = client
                .post(format!("{}/api/outcomes", base_url()))
                .header("x-service-key", service_key())
                .json(&json!({
                    "agentId": agent_id,
                    "eventId": event_id,
                    "outcomeType": outcome,
                    "reporter": "itest",
                }))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 201);
            resp.json::<serde_json::Value>().await.unwrap()
        }
    };

    let after_success = record("success").await;
    assert_eq!(after_success["reputation"]["overallScore"], json!(50.5));
    assert_eq!(after_success["reputation"]["successRate"], json!(1.0));

    let after_harmful = record("harmful").await;
    assert_eq!(after_harmful["reputation"]["overallScore"], json!(48.5));
    assert_eq!(after_harmful["reputation"]["successRate"], json!(0.5));
    assert_eq!(after_harmful["reputation"]["failureRate"], json!(0.5));
    assert_eq!(after_harmful["reputation"]["harmfulActions"], json!(1));

    for _ in 0..4 {
        record("harmful").await;
    }

    let resp = client
        .get(format!(
            "{}/api/reputation/{agent_id}/should-downgrade",
            base_url()
        ))
        .send()
        .await
        .unwrap();
    let assessment: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(assessment["shouldDowngrade"], json!(true));
    assert!(assessment["reasons"]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r.as_str().unwrap() == "Too many harmful actions: 5"));
}

#[tokio::test]
#[ignore = "requires running daemon"]
async fn admin_mutations_require_the_service_key() {
    let client = reqwest::Client::new();
    let keypair = Keypair::generate();

    let resp = client
        .post(format!("{}/api/agents", base_url()))
        .json(&json!({ "publicKey": keypair.public_key().to_hex() }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{}/api/agents", base_url()))
        .header("x-service-key", "definitely-wrong")
        .json(&json!({ "publicKey": keypair.public_key().to_hex() }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
#[ignore = "requires running daemon"]
async fn duplicate_public_key_conflicts() {
    let client = reqwest::Client::new();
    let keypair = Keypair::generate();
    register_agent(&client, &keypair).await;

    let resp = client
        .post(format!("{}/api/agents", base_url()))
        .header("x-service-key", service_key())
        .json(&json!({ "publicKey": keypair.public_key().to_hex() }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
#[ignore = "requires running daemon"]
async fn revoked_agent_cannot_append() {
    let client = reqwest::Client::new();
    let keypair = Keypair::generate();
    let agent_id = register_agent(&client, &keypair).await;

    let resp = client
        .post(format!("{}/api/agents/{agent_id}/revoke", base_url()))
        .header("x-service-key", service_key())
        .json(&json!({ "reason": "test revocation" }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let event = sealed_event(
        &keypair,
        &agent_id,
        EventType::InputReceived,
        None,
        json!({"i": 1}),
    );
    let resp = post_event(&client, &keypair, &agent_id, &event).await;
    assert_eq!(resp.status(), 403);
}
