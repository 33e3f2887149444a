//! Control API surface: CRUD, status, and owner scoping over HTTP.

mod common;

use hookly_domain::ProviderKind;
use serde_json::json;

use common::spawn_edge;

#[tokio::test]
async fn create_and_list_endpoints() {
    let edge = spawn_edge().await;
    let token = edge.mint_token("alice");
    let client = reqwest::Client::new();

    let response = client
        .post(edge.http_url("/api/v1/endpoints"))
        .bearer_auth(&token)
        .json(&json!({
            "name": "payments",
            "provider_kind": "stripe",
            "secret": "whsec_abc",
            "destination_url": "http://localhost:3000/stripe",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let created: serde_json::Value = response.json().await.unwrap();

    let id = created["id"].as_str().unwrap();
    assert_eq!(id.len(), 64);
    assert_eq!(created["provider_kind"], "stripe");
    assert!(created["ingest_url"].as_str().unwrap().ends_with(&format!("/h/{id}")));
    // Secrets are never rendered.
    assert!(created.get("secret").is_none());
    assert!(created.get("signature_secret").is_none());

    // The stored secret is ciphertext, but decrypts back.
    let stored = edge.state.store.get_endpoint(id).unwrap().unwrap();
    assert_ne!(stored.signature_secret, b"whsec_abc");
    assert_eq!(
        edge.state.cipher.decrypt_string(&stored.signature_secret).unwrap(),
        "whsec_abc"
    );

    let response = client
        .get(edge.http_url("/api/v1/endpoints"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let listed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(listed["endpoints"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn requests_without_a_valid_token_are_401() {
    let edge = spawn_edge().await;
    let client = reqwest::Client::new();

    let response = client
        .get(edge.http_url("/api/v1/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .get(edge.http_url("/api/v1/status"))
        .bearer_auth("hk_not_real")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn custom_endpoints_validate_their_config() {
    let edge = spawn_edge().await;
    let token = edge.mint_token("alice");
    let client = reqwest::Client::new();

    // Custom without a config: rejected with a named diagnostic.
    let response = client
        .post(edge.http_url("/api/v1/endpoints"))
        .bearer_auth(&token)
        .json(&json!({
            "name": "custom",
            "provider_kind": "custom",
            "secret": "s",
            "destination_url": "http://localhost:3000/x",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);

    // timestamped_hmac without a timestamp header: also rejected.
    let response = client
        .post(edge.http_url("/api/v1/endpoints"))
        .bearer_auth(&token)
        .json(&json!({
            "name": "custom",
            "provider_kind": "custom",
            "secret": "s",
            "destination_url": "http://localhost:3000/x",
            "verification_config": {
                "method": "timestamped_hmac",
                "signature_header": "X-Sig",
            },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);

    // Config on a non-custom endpoint: rejected.
    let response = client
        .post(edge.http_url("/api/v1/endpoints"))
        .bearer_auth(&token)
        .json(&json!({
            "name": "github",
            "provider_kind": "github",
            "secret": "s",
            "destination_url": "http://localhost:3000/x",
            "verification_config": {
                "method": "hmac_sha256",
                "signature_header": "X-Sig",
            },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);

    // A well-formed custom endpoint goes through.
    let response = client
        .post(edge.http_url("/api/v1/endpoints"))
        .bearer_auth(&token)
        .json(&json!({
            "name": "custom",
            "provider_kind": "custom",
            "secret": "s",
            "destination_url": "http://localhost:3000/x",
            "verification_config": {
                "method": "hmac_sha256",
                "signature_header": "X-Sig",
                "signature_prefix": "sha256=",
            },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn update_is_owner_scoped_and_reencrypts() {
    let edge = spawn_edge().await;
    let alice = edge.mint_token("alice");
    let bob = edge.mint_token("bob");
    let endpoint_id = edge.create_endpoint("alice", ProviderKind::Github, "old_secret");
    let client = reqwest::Client::new();

    // A foreign owner sees 404, not 403: existence is not leaked.
    let response = client
        .patch(edge.http_url(&format!("/api/v1/endpoints/{endpoint_id}")))
        .bearer_auth(&bob)
        .json(&json!({ "muted": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = client
        .patch(edge.http_url(&format!("/api/v1/endpoints/{endpoint_id}")))
        .bearer_auth(&alice)
        .json(&json!({ "muted": true, "secret": "new_secret" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let updated: serde_json::Value = response.json().await.unwrap();
    assert_eq!(updated["muted"], true);

    let stored = edge.state.store.get_endpoint(&endpoint_id).unwrap().unwrap();
    assert!(stored.muted);
    assert_eq!(
        edge.state.cipher.decrypt_string(&stored.signature_secret).unwrap(),
        "new_secret"
    );
}

#[tokio::test]
async fn delete_cascades_and_status_counts() {
    let edge = spawn_edge().await;
    let token = edge.mint_token("alice");
    let endpoint_id = edge.create_endpoint("alice", ProviderKind::Generic, "s");
    let client = reqwest::Client::new();

    // Two webhooks in, one failed.
    for _ in 0..2 {
        let response = client
            .post(edge.http_url(&format!("/h/{endpoint_id}")))
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }
    let metas = edge.state.store.dispatchable(10).unwrap();
    edge.state
        .store
        .mark_failed(&metas[0].id, Some("nope"), chrono::Utc::now())
        .unwrap();

    let response = client
        .get(edge.http_url("/api/v1/status"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let status: serde_json::Value = response.json().await.unwrap();
    assert_eq!(status["pending"], 1);
    assert_eq!(status["failed"], 1);
    assert_eq!(status["dead_letter"], 0);
    assert_eq!(status["connected_endpoints"].as_array().unwrap().len(), 0);

    // Delete: webhooks go with the endpoint.
    let response = client
        .delete(edge.http_url(&format!("/api/v1/endpoints/{endpoint_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let counts = edge.state.store.status_counts("alice").unwrap();
    assert_eq!(counts.pending + counts.failed + counts.dead_letter, 0);
    assert!(edge.state.store.get_endpoint(&endpoint_id).unwrap().is_none());
}
