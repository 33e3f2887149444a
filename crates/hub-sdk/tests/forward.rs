//! Forwarder classification against real local HTTP servers.

use std::collections::HashMap;
use std::time::Duration;

use axum::routing::post;
use axum::Router;
use chrono::Utc;
use hookly_hub_sdk::Forwarder;
use hookly_protocol::WebhookEnvelope;
use tokio::net::TcpListener;

async fn serve_status(status: u16) -> String {
    let app = Router::new().route(
        "/hook",
        post(move || async move { axum::http::StatusCode::from_u16(status).unwrap() }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/hook")
}

fn envelope() -> WebhookEnvelope {
    WebhookEnvelope {
        id: "w1".into(),
        endpoint_id: "ep1".into(),
        destination_url: String::new(),
        received_at: Utc::now(),
        headers: HashMap::new(),
        payload: b"{}".to_vec(),
        attempt: 1,
    }
}

#[tokio::test]
async fn two_hundred_is_success() {
    let url = serve_status(200).await;
    let outcome = Forwarder::new().unwrap().forward(&envelope(), &url).await;
    assert!(outcome.success);
    assert_eq!(outcome.status_code, Some(200));
    assert!(outcome.error_message.is_none());
}

#[tokio::test]
async fn four_xx_is_permanent() {
    let url = serve_status(422).await;
    let outcome = Forwarder::new().unwrap().forward(&envelope(), &url).await;
    assert!(!outcome.success);
    assert!(outcome.permanent_failure);
    assert_eq!(outcome.status_code, Some(422));
}

#[tokio::test]
async fn five_xx_is_transient() {
    let url = serve_status(503).await;
    let outcome = Forwarder::new().unwrap().forward(&envelope(), &url).await;
    assert!(!outcome.success);
    assert!(!outcome.permanent_failure);
    assert_eq!(outcome.status_code, Some(503));
}

#[tokio::test]
async fn connection_refused_is_transient_with_a_reason() {
    // Port 9 (discard) is almost certainly closed on loopback.
    let outcome = Forwarder::new()
        .unwrap()
        .forward(&envelope(), "http://127.0.0.1:9/hook")
        .await;
    assert!(!outcome.success);
    assert!(!outcome.permanent_failure);
    assert!(outcome.status_code.is_none());
    let reason = outcome.error_message.unwrap();
    assert!(!reason.is_empty());
}

#[tokio::test]
async fn timeout_is_transient() {
    let app = Router::new().route(
        "/hook",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            axum::http::StatusCode::OK
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let forwarder = Forwarder::with_timeout(Duration::from_millis(300)).unwrap();
    let outcome = forwarder
        .forward(&envelope(), &format!("http://{addr}/hook"))
        .await;
    assert!(!outcome.success);
    assert!(!outcome.permanent_failure);
    assert!(outcome.status_code.is_none());
    assert!(outcome.error_message.is_some());
}
