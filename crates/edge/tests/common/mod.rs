//! Shared harness: boots a full in-process edge (real store, real router,
//! real dispatcher) on an ephemeral port.

// Each test binary uses a different slice of this harness.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hookly_domain::{generate_id, generate_token, ApiToken, Endpoint, ProviderKind};
use hookly_edge::config::EdgeConfig;
use hookly_edge::notify::{FailureInfo, Notifier};
use hookly_edge::relay::registry::ConnRegistry;
use hookly_edge::state::AppState;
use hookly_edge::tokens::{token_hash, TokenManager};
use hookly_edge::{dispatch, http};
use hookly_store::{SecretCipher, Store};
use tokio_util::sync::CancellationToken;

pub const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// Notifier that counts calls instead of talking to Telegram.
#[derive(Default)]
pub struct CountingNotifier {
    pub failures: AtomicUsize,
    pub dead_letters: AtomicUsize,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify_delivery_failure(&self, _info: &FailureInfo) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    async fn notify_dead_letter(&self, _info: &FailureInfo) {
        self.dead_letters.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct TestEdge {
    pub addr: SocketAddr,
    pub state: AppState,
    pub notifier: Arc<CountingNotifier>,
    pub shutdown: CancellationToken,
    _tmp: tempfile::TempDir,
}

impl TestEdge {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/relay/ws", self.addr)
    }

    /// Insert a bearer token for `owner`, returning the plaintext.
    pub fn mint_token(&self, owner: &str) -> String {
        let token = generate_token();
        self.state
            .store
            .insert_api_token(&ApiToken {
                id: generate_id(),
                owner_id: owner.to_string(),
                token_hash: token_hash(&token),
                name: "test".into(),
                created_at: Utc::now(),
                last_used_at: None,
                revoked: false,
            })
            .unwrap();
        token
    }

    /// Insert an endpoint with an encrypted secret, returning its id.
    pub fn create_endpoint(&self, owner: &str, kind: ProviderKind, secret: &str) -> String {
        let now = Utc::now();
        let endpoint = Endpoint {
            id: generate_id(),
            owner_id: owner.to_string(),
            name: "test endpoint".into(),
            provider_kind: kind,
            signature_secret: self.state.cipher.encrypt(secret.as_bytes()).unwrap(),
            verification_config: None,
            destination_url: "http://localhost:3000/hook".into(),
            muted: false,
            created_at: now,
            updated_at: now,
        };
        self.state.store.insert_endpoint(&endpoint).unwrap();
        endpoint.id
    }
}

/// Boot an edge with the dispatcher running. The scheduler is not
/// started; maintenance tests drive it directly with a synthetic clock.
pub async fn spawn_edge() -> TestEdge {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("hookly.db");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = Arc::new(EdgeConfig {
        database_path: db_path.clone(),
        encryption_key: TEST_KEY.to_string(),
        port: addr.port(),
        base_url: format!("http://{addr}"),
        telegram: None,
    });

    let store = Arc::new(Store::open(&db_path).unwrap());
    let cipher = Arc::new(SecretCipher::from_hex(TEST_KEY).unwrap());
    let registry = Arc::new(ConnRegistry::new());
    let tokens = Arc::new(TokenManager::new(store.clone()));
    let notifier = Arc::new(CountingNotifier::default());

    let shutdown = CancellationToken::new();
    let state = AppState {
        config,
        store,
        cipher,
        registry,
        notifier: notifier.clone(),
        tokens,
        shutdown: shutdown.clone(),
    };

    tokio::spawn(dispatch::run_dispatcher(state.clone(), shutdown.child_token()));

    let app = http::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestEdge {
        addr,
        state,
        notifier,
        shutdown,
        _tmp: tmp,
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
