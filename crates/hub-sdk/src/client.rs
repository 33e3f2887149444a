//! The relay client: dials the edge, claims endpoints, and runs the
//! receive → forward → ack loop until shutdown or a permanent rejection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use hookly_protocol::{AuthErrorCode, EdgeFrame, HubFrame, MAX_FRAME_BYTES};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;
use crate::forwarder::Forwarder;
use crate::reconnect::ReconnectBackoff;
use crate::HubError;

/// Hubs heartbeat more often than the edge's 30 s cadence to keep
/// intermediary proxies from idling the connection out.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const CONNECT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// One connection attempt's failure mode.
enum ConnectError {
    /// Structured auth rejection; retrying cannot help.
    Rejected(String),
    /// Anything else: network failure, edge restart, torn stream.
    Transport(anyhow::Error),
}

pub struct RelayClient {
    ws_url: String,
    hub_id: String,
    token: String,
    endpoint_ids: Vec<String>,
    destination_overrides: HashMap<String, String>,
    heartbeat_interval: Duration,
    backoff: ReconnectBackoff,
    forwarder: Arc<Forwarder>,
}

impl RelayClient {
    pub fn new(
        ws_url: String,
        hub_id: String,
        token: String,
        endpoint_ids: Vec<String>,
    ) -> Result<Self, HubError> {
        Ok(Self {
            ws_url,
            hub_id,
            token,
            endpoint_ids,
            destination_overrides: HashMap::new(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            backoff: ReconnectBackoff::default(),
            forwarder: Arc::new(Forwarder::new()?),
        })
    }

    /// Assemble a client from a loaded config plus the stored token.
    pub fn from_config(config: &HubConfig, token: String) -> Result<Self, HubError> {
        let mut client = Self::new(
            config.ws_url(),
            config.hub_id.clone(),
            token,
            config.endpoint_ids(),
        )?;
        client.destination_overrides = config.destination_overrides();
        Ok(client)
    }

    pub fn with_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_forwarder(mut self, forwarder: Forwarder) -> Self {
        self.forwarder = Arc::new(forwarder);
        self
    }

    pub fn with_destination_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.destination_overrides = overrides;
        self
    }

    /// Run until shutdown. Reconnects with backoff on stream loss; the
    /// backoff resets only after a connection that completed its
    /// handshake. Permanent auth rejections abort immediately.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), HubError> {
        let mut attempt: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                return Err(HubError::Shutdown);
            }

            let result = tokio::select! {
                r = self.connect_and_run(&shutdown) => r,
                _ = shutdown.cancelled() => {
                    tracing::info!(hub_id = %self.hub_id, "shutdown requested");
                    return Err(HubError::Shutdown);
                }
            };

            match result {
                Ok(handshake_completed) => {
                    tracing::info!(
                        hub_id = %self.hub_id,
                        handshake_completed,
                        "connection closed"
                    );
                    if handshake_completed {
                        attempt = 0;
                    }
                }
                Err(ConnectError::Rejected(error)) => {
                    tracing::error!(hub_id = %self.hub_id, error = %error, "edge rejected connection");
                    return Err(HubError::Rejected(error));
                }
                Err(ConnectError::Transport(e)) => {
                    tracing::warn!(hub_id = %self.hub_id, attempt, error = %e, "connection lost");
                }
            }

            if self.backoff.should_give_up(attempt) {
                return Err(HubError::ReconnectExhausted(attempt));
            }

            let delay = self.backoff.delay_for_attempt(attempt);
            tracing::info!(
                hub_id = %self.hub_id,
                delay_ms = delay.as_millis() as u64,
                attempt = attempt + 1,
                "reconnecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return Err(HubError::Shutdown),
            }
            attempt += 1;
        }
    }

    /// One connection lifecycle: dial → connect/response → message loop.
    /// `Ok(true)` when the handshake completed before the stream ended.
    async fn connect_and_run(&self, shutdown: &CancellationToken) -> Result<bool, ConnectError> {
        tracing::info!(url = %self.ws_url, hub_id = %self.hub_id, "connecting to edge");

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(MAX_FRAME_BYTES);
        ws_config.max_frame_size = Some(MAX_FRAME_BYTES);

        let (ws, _response) =
            tokio_tungstenite::connect_async_with_config(&self.ws_url, Some(ws_config), false)
                .await
                .map_err(|e| ConnectError::Transport(e.into()))?;
        let (mut sink, mut stream) = ws.split();

        // ── Send connect ────────────────────────────────────────────
        let connect = HubFrame::Connect {
            hub_id: self.hub_id.clone(),
            token: self.token.clone(),
            endpoint_ids: self.endpoint_ids.clone(),
        };
        let json = serde_json::to_string(&connect).map_err(|e| ConnectError::Transport(e.into()))?;
        sink.send(Message::Text(json))
            .await
            .map_err(|e| ConnectError::Transport(e.into()))?;

        // ── Await connect_response ──────────────────────────────────
        let response = tokio::time::timeout(CONNECT_RESPONSE_TIMEOUT, async {
            while let Some(Ok(msg)) = stream.next().await {
                if let Message::Text(text) = msg {
                    if let Ok(EdgeFrame::ConnectResponse { success, error }) =
                        serde_json::from_str(&text)
                    {
                        return Some((success, error));
                    }
                }
            }
            None
        })
        .await;

        match response {
            Ok(Some((true, _))) => {}
            Ok(Some((false, error))) => {
                let error = error.unwrap_or_else(|| "connection rejected".to_string());
                return if AuthErrorCode::parse(&error).is_some() {
                    Err(ConnectError::Rejected(error))
                } else {
                    Err(ConnectError::Transport(anyhow!("edge refused: {error}")))
                };
            }
            Ok(None) => {
                return Err(ConnectError::Transport(anyhow!(
                    "stream closed before connect_response"
                )))
            }
            Err(_) => {
                return Err(ConnectError::Transport(anyhow!("connect_response timeout")))
            }
        }

        tracing::info!(
            hub_id = %self.hub_id,
            endpoints = self.endpoint_ids.len(),
            "connected to edge"
        );

        // ── Message loop ────────────────────────────────────────────
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<HubFrame>(64);

        // Heartbeat task.
        let heartbeat_tx = outbound_tx.clone();
        let heartbeat_interval = self.heartbeat_interval;
        let heartbeat_task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(heartbeat_interval);
            tick.tick().await;
            loop {
                tick.tick().await;
                let frame = HubFrame::Heartbeat {
                    timestamp: Utc::now().timestamp_millis(),
                };
                if heartbeat_tx.send(frame).await.is_err() {
                    break;
                }
            }
        });

        // Writer task: outbound frames (heartbeats + acks) to the socket.
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize outbound frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        });

        // Reader loop: envelopes in, forwards spawned, acks fed back.
        loop {
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<EdgeFrame>(&text) {
                            Ok(EdgeFrame::Webhook { envelope }) => {
                                let destination = self
                                    .destination_overrides
                                    .get(&envelope.endpoint_id)
                                    .cloned()
                                    .unwrap_or_else(|| envelope.destination_url.clone());
                                let forwarder = self.forwarder.clone();
                                let ack_tx = outbound_tx.clone();
                                tokio::spawn(async move {
                                    tracing::info!(
                                        webhook_id = %envelope.id,
                                        destination = %destination,
                                        attempt = envelope.attempt,
                                        "forwarding webhook"
                                    );
                                    let outcome =
                                        forwarder.forward(&envelope, &destination).await;
                                    tracing::info!(
                                        webhook_id = %envelope.id,
                                        success = outcome.success,
                                        status = outcome.status_code,
                                        "forward finished"
                                    );
                                    let _ = ack_tx.send(outcome.into_ack(envelope.id)).await;
                                });
                            }
                            Ok(EdgeFrame::Heartbeat { .. }) => {
                                tracing::trace!("edge heartbeat");
                            }
                            Ok(EdgeFrame::ConnectResponse { .. }) => {
                                tracing::debug!("ignoring duplicate connect_response");
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "unparseable frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(hub_id = %self.hub_id, "edge closed the stream");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "stream error");
                        break;
                    }
                },
                _ = shutdown.cancelled() => break,
            }
        }

        heartbeat_task.abort();
        writer_task.abort();
        Ok(true)
    }
}
