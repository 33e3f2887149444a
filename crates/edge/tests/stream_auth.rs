//! Stream AUTH validation against a live in-process edge: every rejection
//! code, in the order the handler checks them, plus the accept path.

mod common;

use futures_util::{SinkExt, StreamExt};
use hookly_domain::ProviderKind;
use hookly_protocol::{EdgeFrame, HubFrame};
use tokio_tungstenite::tungstenite::Message;

use common::{spawn_edge, TestEdge};

type Ws = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Send a first frame and return the edge's reply, keeping the socket
/// alive so accepted registrations are not immediately torn down.
async fn handshake(edge: &TestEdge, frame: HubFrame) -> (EdgeFrame, Ws) {
    let (ws, _) = tokio_tungstenite::connect_async(edge.ws_url()).await.unwrap();
    let (mut sink, mut stream) = ws.split();

    let json = serde_json::to_string(&frame).unwrap();
    sink.send(Message::Text(json)).await.unwrap();

    let deadline = std::time::Duration::from_secs(5);
    let response = tokio::time::timeout(deadline, async {
        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Text(text) = msg {
                if let Ok(frame) = serde_json::from_str::<EdgeFrame>(&text) {
                    return frame;
                }
            }
        }
        panic!("stream closed without a connect_response");
    })
    .await
    .expect("timed out waiting for connect_response");

    let ws = sink.reunite(stream).unwrap();
    (response, ws)
}

async fn connect_and_respond(edge: &TestEdge, frame: HubFrame) -> EdgeFrame {
    handshake(edge, frame).await.0
}

fn connect(token: &str, endpoint_ids: Vec<String>) -> HubFrame {
    HubFrame::Connect {
        hub_id: "test-hub".into(),
        token: token.into(),
        endpoint_ids,
    }
}

fn expect_rejection(frame: EdgeFrame, code: &str) {
    match frame {
        EdgeFrame::ConnectResponse { success, error } => {
            assert!(!success);
            let error = error.expect("rejection must carry an error");
            assert!(
                error.starts_with(&format!("{code}: ")),
                "expected {code} prefix, got {error:?}"
            );
        }
        other => panic!("expected connect_response, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_token_is_token_missing() {
    let edge = spawn_edge().await;
    let response = connect_and_respond(&edge, connect("", vec!["e1".into()])).await;
    expect_rejection(response, "TOKEN_MISSING");
}

#[tokio::test]
async fn unknown_token_is_token_invalid() {
    let edge = spawn_edge().await;
    let response = connect_and_respond(&edge, connect("hk_who", vec!["e1".into()])).await;
    expect_rejection(response, "TOKEN_INVALID");
}

#[tokio::test]
async fn revoked_token_is_token_revoked() {
    let edge = spawn_edge().await;
    let token = edge.mint_token("alice");
    let hash = hookly_edge::tokens::token_hash(&token);
    let record = edge.state.store.find_token_by_hash(&hash).unwrap().unwrap();
    edge.state.store.revoke_token(&record.id).unwrap();

    let response = connect_and_respond(&edge, connect(&token, vec!["e1".into()])).await;
    expect_rejection(response, "TOKEN_REVOKED");
}

#[tokio::test]
async fn empty_endpoint_list_is_no_endpoints() {
    let edge = spawn_edge().await;
    let token = edge.mint_token("alice");
    let response = connect_and_respond(&edge, connect(&token, vec![])).await;
    expect_rejection(response, "NO_ENDPOINTS");
}

#[tokio::test]
async fn missing_endpoint_is_endpoint_not_found() {
    let edge = spawn_edge().await;
    let token = edge.mint_token("alice");
    let response = connect_and_respond(&edge, connect(&token, vec!["ghost".into()])).await;
    expect_rejection(response, "ENDPOINT_NOT_FOUND");
}

#[tokio::test]
async fn foreign_endpoint_is_endpoint_access_denied() {
    let edge = spawn_edge().await;
    let token = edge.mint_token("alice");
    let bobs = edge.create_endpoint("bob", ProviderKind::Generic, "s");
    let response = connect_and_respond(&edge, connect(&token, vec![bobs])).await;
    expect_rejection(response, "ENDPOINT_ACCESS_DENIED");
}

#[tokio::test]
async fn valid_connect_is_accepted_and_registered() {
    let edge = spawn_edge().await;
    let token = edge.mint_token("alice");
    let endpoint_id = edge.create_endpoint("alice", ProviderKind::Generic, "s");

    let (response, _ws) =
        handshake(&edge, connect(&token, vec![endpoint_id.clone()])).await;
    match response {
        EdgeFrame::ConnectResponse { success, error } => {
            assert!(success, "unexpected rejection: {error:?}");
        }
        other => panic!("expected connect_response, got {other:?}"),
    }

    assert!(common::wait_until(std::time::Duration::from_secs(2), || {
        edge.state.registry.connected_endpoints().contains(&endpoint_id)
    })
    .await);
}

#[tokio::test]
async fn mixed_endpoint_list_short_circuits_on_the_first_failure() {
    let edge = spawn_edge().await;
    let token = edge.mint_token("alice");
    let mine = edge.create_endpoint("alice", ProviderKind::Generic, "s");

    // Own endpoint first, then a missing one: still rejected.
    let response =
        connect_and_respond(&edge, connect(&token, vec![mine, "ghost".into()])).await;
    expect_rejection(response, "ENDPOINT_NOT_FOUND");
}
