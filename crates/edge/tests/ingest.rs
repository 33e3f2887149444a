//! Ingestion contract tests against a live in-process edge.

mod common;

use hmac::{Hmac, Mac};
use hookly_domain::{ProviderKind, WebhookStatus};
use sha2::Sha256;

use common::spawn_edge;

const SECRET: &str = "whsec_integration";

fn github_signature(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[tokio::test]
async fn valid_signature_is_recorded_as_pending() {
    let edge = spawn_edge().await;
    let endpoint_id = edge.create_endpoint("alice", ProviderKind::Github, SECRET);

    let payload = br#"{"a":1}"#;
    let response = reqwest::Client::new()
        .post(edge.http_url(&format!("/h/{endpoint_id}")))
        .header("X-Hub-Signature-256", github_signature(SECRET, payload))
        .header("Content-Type", "application/json")
        .body(payload.to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let counts = edge.state.store.status_counts("alice").unwrap();
    assert_eq!(counts.pending, 1);

    let meta = edge.state.store.dispatchable(10).unwrap();
    let webhook = edge.state.store.get_webhook(&meta[0].id).unwrap().unwrap();
    assert_eq!(webhook.endpoint_id, endpoint_id);
    assert_eq!(webhook.status, WebhookStatus::Pending);
    assert_eq!(webhook.attempts, 0);
    assert!(webhook.signature_valid);
    assert_eq!(webhook.payload, payload);
    // Captured headers include the signature, lowercased by the stack.
    assert!(webhook.headers.contains("x-hub-signature-256"));
}

#[tokio::test]
async fn bad_signature_is_recorded_but_still_accepted() {
    let edge = spawn_edge().await;
    let endpoint_id = edge.create_endpoint("alice", ProviderKind::Github, SECRET);

    let response = reqwest::Client::new()
        .post(edge.http_url(&format!("/h/{endpoint_id}")))
        .header("X-Hub-Signature-256", "sha256=deadbeef")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let meta = edge.state.store.dispatchable(10).unwrap();
    let webhook = edge.state.store.get_webhook(&meta[0].id).unwrap().unwrap();
    assert!(!webhook.signature_valid);
    assert_eq!(webhook.status, WebhookStatus::Pending);
}

#[tokio::test]
async fn unknown_endpoint_is_404_and_wrong_method_is_405() {
    let edge = spawn_edge().await;

    let response = reqwest::Client::new()
        .post(edge.http_url("/h/nonexistent"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let endpoint_id = edge.create_endpoint("alice", ProviderKind::Generic, SECRET);
    let response = reqwest::Client::new()
        .get(edge.http_url(&format!("/h/{endpoint_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);
}

#[tokio::test]
async fn muted_endpoints_swallow_silently() {
    let edge = spawn_edge().await;
    let endpoint_id = edge.create_endpoint("alice", ProviderKind::Generic, SECRET);
    edge.state
        .store
        .update_endpoint(
            &endpoint_id,
            "alice",
            hookly_store::EndpointPatch {
                muted: Some(true),
                ..Default::default()
            },
            chrono::Utc::now(),
        )
        .unwrap();

    let response = reqwest::Client::new()
        .post(edge.http_url(&format!("/h/{endpoint_id}")))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let counts = edge.state.store.status_counts("alice").unwrap();
    assert_eq!(counts.pending, 0);
}

#[tokio::test]
async fn undecryptable_secret_records_invalid_signature() {
    let edge = spawn_edge().await;
    let now = chrono::Utc::now();
    let endpoint = hookly_domain::Endpoint {
        id: hookly_domain::generate_id(),
        owner_id: "alice".into(),
        name: "broken".into(),
        provider_kind: ProviderKind::Github,
        // Garbage ciphertext: decryption will fail.
        signature_secret: vec![0u8; 7],
        verification_config: None,
        destination_url: "http://localhost:3000/hook".into(),
        muted: false,
        created_at: now,
        updated_at: now,
    };
    edge.state.store.insert_endpoint(&endpoint).unwrap();

    let response = reqwest::Client::new()
        .post(edge.http_url(&format!("/h/{}", endpoint.id)))
        .header("X-Hub-Signature-256", github_signature(SECRET, b"{}"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let meta = edge.state.store.dispatchable(10).unwrap();
    let webhook = edge.state.store.get_webhook(&meta[0].id).unwrap().unwrap();
    assert!(!webhook.signature_valid);
}

#[tokio::test]
async fn payload_limit_is_100_mib_inclusive() {
    let edge = spawn_edge().await;
    let endpoint_id = edge.create_endpoint("alice", ProviderKind::Generic, SECRET);
    let client = reqwest::Client::new();

    // One byte over: rejected before anything is stored.
    let over = vec![0u8; hookly_protocol::MAX_PAYLOAD_BYTES + 1];
    let response = client
        .post(edge.http_url(&format!("/h/{endpoint_id}")))
        .body(over)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 413);
    assert_eq!(edge.state.store.status_counts("alice").unwrap().pending, 0);

    // Exactly at the limit: accepted and persisted in full.
    let exact = vec![0u8; hookly_protocol::MAX_PAYLOAD_BYTES];
    let response = client
        .post(edge.http_url(&format!("/h/{endpoint_id}")))
        .body(exact)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let meta = edge.state.store.dispatchable(10).unwrap();
    let webhook = edge.state.store.get_webhook(&meta[0].id).unwrap().unwrap();
    assert_eq!(webhook.payload.len(), hookly_protocol::MAX_PAYLOAD_BYTES);
}
