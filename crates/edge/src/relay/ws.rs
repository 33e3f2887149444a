//! WebSocket endpoint for hub connections.
//!
//! Flow:
//! 1. Hub connects to `GET /relay/ws` and upgrades.
//! 2. Hub sends `connect` with its bearer token and claimed endpoints.
//! 3. The edge validates and answers `connect_response`; rejections carry
//!    a structured `"<CODE>: <message>"` error and close the stream.
//! 4. READY: a writer task drains the connection's outbound queue and
//!    heartbeats every 30 s; the reader loop processes acks and hub
//!    heartbeats, and a 10 s staleness tick closes streams silent for 60 s.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use hookly_protocol::{AuthErrorCode, EdgeFrame, HubFrame, WebhookEnvelope, MAX_FRAME_BYTES};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::notify::FailureInfo;
use crate::relay::registry::STALE_AFTER_SECS;
use crate::state::AppState;
use crate::tokens::TokenError;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const HEARTBEAT_INTERVAL_SECS: u64 = 30;
const STALE_CHECK_INTERVAL_SECS: u64 = 10;

/// GET /relay/ws — upgrade to the relay stream.
pub async fn relay_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_BYTES)
        .max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    // ── AUTH: first frame must be `connect` ─────────────────────────
    let Some((hub_id, token, endpoint_ids)) = wait_for_connect(&mut stream).await else {
        tracing::warn!("hub disconnected before sending connect");
        return;
    };

    match authorize(&state, &token, &endpoint_ids) {
        Ok(_principal) => {
            let accepted = EdgeFrame::ConnectResponse {
                success: true,
                error: None,
            };
            if send_frame(&mut sink, &accepted).await.is_err() {
                tracing::warn!(hub_id = %hub_id, "failed to send connect_response");
                return;
            }
        }
        Err(error) => {
            tracing::info!(hub_id = %hub_id, error = %error, "hub connection rejected");
            let rejected = EdgeFrame::ConnectResponse {
                success: false,
                error: Some(error),
            };
            let _ = send_frame(&mut sink, &rejected).await;
            let _ = sink.close().await;
            return;
        }
    }

    // ── READY ───────────────────────────────────────────────────────
    let registration = state.registry.register(&hub_id, endpoint_ids);
    let conn_id = registration.conn_id;
    tracing::info!(hub_id = %hub_id, conn_id, "hub connected");

    let writer = tokio::spawn(run_writer(
        sink,
        registration.queue_rx,
        state.shutdown.child_token(),
    ));

    let mut stale_tick =
        tokio::time::interval(std::time::Duration::from_secs(STALE_CHECK_INTERVAL_SECS));
    stale_tick.tick().await; // immediate first tick

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<HubFrame>(&text) {
                    Ok(HubFrame::Ack {
                        webhook_id,
                        success,
                        status_code,
                        error_message,
                        permanent_failure,
                    }) => {
                        handle_ack(
                            &state,
                            &webhook_id,
                            success,
                            status_code,
                            error_message,
                            permanent_failure,
                        )
                        .await;
                    }
                    Ok(HubFrame::Heartbeat { .. }) => {
                        state.registry.heartbeat(&hub_id, conn_id);
                    }
                    Ok(HubFrame::Connect { .. }) => {
                        tracing::debug!(hub_id = %hub_id, "ignoring duplicate connect frame");
                    }
                    Err(e) => {
                        tracing::debug!(hub_id = %hub_id, error = %e, "unparseable frame");
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(hub_id = %hub_id, error = %e, "stream error");
                    break;
                }
            },
            _ = stale_tick.tick() => {
                if state.registry.is_stale(&hub_id, conn_id, STALE_AFTER_SECS) {
                    tracing::info!(hub_id = %hub_id, "hub heartbeat deadline exceeded, closing");
                    break;
                }
            }
            _ = state.shutdown.cancelled() => break,
        }
    }

    state.registry.remove(&hub_id, conn_id);
    writer.abort();
    tracing::info!(hub_id = %hub_id, conn_id, "hub disconnected");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Writer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drains the connection's outbound queue to the socket and emits edge
/// heartbeats. On shutdown the current frame finishes, the rest of the
/// queue does not.
async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<WebhookEnvelope>,
    shutdown: CancellationToken,
) {
    let mut heartbeat =
        tokio::time::interval(std::time::Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    heartbeat.tick().await; // immediate first tick

    loop {
        tokio::select! {
            maybe = queue.recv() => match maybe {
                Some(envelope) => {
                    let frame = EdgeFrame::Webhook { envelope };
                    if send_frame(&mut sink, &frame).await.is_err() {
                        break;
                    }
                }
                // Queue closed: registration superseded or removed.
                None => break,
            },
            _ = heartbeat.tick() => {
                let frame = EdgeFrame::Heartbeat {
                    timestamp: Utc::now().timestamp_millis(),
                };
                if send_frame(&mut sink, &frame).await.is_err() {
                    break;
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
    let _ = sink.close().await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ack handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Apply one ack. Transitions are guarded in the store, so acks for
/// webhooks already in a terminal state are no-ops; either way the
/// endpoint's in-flight reservation is released.
pub(crate) async fn handle_ack(
    state: &AppState,
    webhook_id: &str,
    success: bool,
    status_code: Option<u16>,
    error_message: Option<String>,
    permanent_failure: bool,
) {
    let now = Utc::now();

    let meta = match state.store.webhook_meta(webhook_id) {
        Ok(Some(meta)) => meta,
        Ok(None) => {
            // Endpoint (and row) deleted while the envelope was in flight.
            tracing::debug!(webhook_id, "ack for a vanished webhook");
            state.registry.finish_dispatch_by_webhook(webhook_id);
            return;
        }
        Err(e) => {
            tracing::error!(webhook_id, error = %e, "store fault while handling ack");
            state.registry.finish_dispatch_by_webhook(webhook_id);
            return;
        }
    };

    if success {
        match state.store.mark_delivered(webhook_id, now) {
            Ok(true) => tracing::info!(webhook_id, status_code, "webhook delivered"),
            Ok(false) => tracing::debug!(webhook_id, "stale ack ignored"),
            Err(e) => tracing::error!(webhook_id, error = %e, "failed to mark delivered"),
        }
    } else if permanent_failure {
        match state
            .store
            .mark_failed(webhook_id, error_message.as_deref(), now)
        {
            Ok(true) => {
                tracing::warn!(
                    webhook_id,
                    status_code,
                    error = error_message.as_deref().unwrap_or(""),
                    "webhook failed permanently"
                );
                schedule_failure_notification(state, webhook_id, &meta.endpoint_id);
            }
            Ok(false) => tracing::debug!(webhook_id, "stale ack ignored"),
            Err(e) => tracing::error!(webhook_id, error = %e, "failed to mark failed"),
        }
    } else {
        match state
            .store
            .record_attempt(webhook_id, error_message.as_deref(), now)
        {
            Ok(true) => tracing::info!(
                webhook_id,
                status_code,
                attempts = meta.attempts + 1,
                "delivery attempt failed, will retry"
            ),
            Ok(false) => tracing::debug!(webhook_id, "stale ack ignored"),
            Err(e) => tracing::error!(webhook_id, error = %e, "failed to record attempt"),
        }
    }

    state.registry.finish_dispatch(&meta.endpoint_id, webhook_id);
}

/// Fire the one-shot failure notification if this webhook still has it.
/// Runs detached: a slow notification backend must not stall ack handling.
fn schedule_failure_notification(state: &AppState, webhook_id: &str, endpoint_id: &str) {
    let state = state.clone();
    let webhook_id = webhook_id.to_string();
    let endpoint_id = endpoint_id.to_string();
    tokio::spawn(async move {
        match state.store.claim_notification(&webhook_id) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                tracing::warn!(webhook_id = %webhook_id, error = %e, "notification latch failed");
                return;
            }
        }

        let webhook = state.store.get_webhook(&webhook_id).ok().flatten();
        let endpoint = state.store.get_endpoint(&endpoint_id).ok().flatten();
        let info = FailureInfo {
            webhook_id: webhook_id.clone(),
            endpoint_id: endpoint_id.clone(),
            endpoint_name: endpoint.map(|e| e.name).unwrap_or_else(|| endpoint_id.clone()),
            attempts: webhook.as_ref().map(|w| w.attempts).unwrap_or(0),
            error_message: webhook.and_then(|w| w.error_message),
        };
        state.notifier.notify_delivery_failure(&info).await;
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handshake helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn wait_for_connect(
    stream: &mut SplitStream<WebSocket>,
) -> Option<(String, String, Vec<String>)> {
    let deadline = std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS);
    tokio::time::timeout(deadline, async {
        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Text(text) = msg {
                if let Ok(HubFrame::Connect {
                    hub_id,
                    token,
                    endpoint_ids,
                }) = serde_json::from_str::<HubFrame>(&text)
                {
                    return Some((hub_id, token, endpoint_ids));
                }
            }
        }
        None
    })
    .await
    .unwrap_or(None)
}

/// AUTH validation in order, short-circuiting on the first failure.
/// Every rejection is a `"<CODE>: <message>"` string; store faults get a
/// codeless message the hub treats as transient.
fn authorize(
    state: &AppState,
    token: &str,
    endpoint_ids: &[String],
) -> Result<hookly_domain::Principal, String> {
    let principal = state.tokens.resolve(token).map_err(|e| match &e {
        TokenError::Store(inner) => {
            tracing::error!(error = %inner, "store fault during stream auth");
            "internal error: store unavailable".to_string()
        }
        _ => e
            .auth_code()
            .map(|code| code.format(&e))
            .unwrap_or_else(|| e.to_string()),
    })?;

    if endpoint_ids.is_empty() {
        return Err(AuthErrorCode::NoEndpoints.format("connect listed no endpoint ids"));
    }

    for endpoint_id in endpoint_ids {
        match state.store.get_endpoint(endpoint_id) {
            Ok(Some(endpoint)) => {
                if endpoint.owner_id != principal.owner_id {
                    return Err(AuthErrorCode::EndpointAccessDenied
                        .format(format!("endpoint {endpoint_id} belongs to another owner")));
                }
            }
            Ok(None) => {
                return Err(AuthErrorCode::EndpointNotFound
                    .format(format!("endpoint {endpoint_id} does not exist")));
            }
            Err(e) => {
                tracing::error!(endpoint_id = %endpoint_id, error = %e, "store fault during stream auth");
                return Err("internal error: store unavailable".to_string());
            }
        }
    }

    Ok(principal)
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: &EdgeFrame,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).map_err(axum::Error::new)?;
    sink.send(Message::Text(json)).await
}
