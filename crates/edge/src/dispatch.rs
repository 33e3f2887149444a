//! The dispatch loop: selects eligible pending webhooks and pushes them
//! onto the right connection's outbound queue.
//!
//! Selection happens in three layers:
//! 1. The store returns each endpoint's oldest pending webhook (in-order).
//! 2. The backoff gate skips rows attempted too recently.
//! 3. The registry's in-flight reservation skips endpoints with an
//!    unacked envelope and routes the rest to their hub.
//!
//! Enqueueing is non-blocking; a full or closed queue just means the row
//! stays `pending` for the next tick.

use std::collections::HashMap;

use chrono::Utc;
use hookly_domain::{backoff_deadline, WebhookMeta};
use hookly_protocol::WebhookEnvelope;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

const TICK_SECS: u64 = 1;

/// Upper bound on rows considered per tick.
const SELECT_BATCH: usize = 100;

pub async fn run_dispatcher(state: AppState, shutdown: CancellationToken) {
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(TICK_SECS));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.cancelled() => {
                tracing::debug!("dispatcher stopping");
                return;
            }
        }

        if !state.registry.has_connections() {
            continue;
        }
        dispatch_round(&state).await;
    }
}

/// One pass over the dispatch frontier. Store faults are logged and leave
/// the round; the next tick retries.
pub async fn dispatch_round(state: &AppState) {
    let now = Utc::now();

    let candidates = match state.store.dispatchable(SELECT_BATCH) {
        Ok(candidates) => candidates,
        Err(e) => {
            tracing::error!(error = %e, "dispatch selection failed, skipping tick");
            return;
        }
    };

    for meta in candidates {
        // Backoff gate: not yet due for another attempt.
        if let Some(last) = meta.last_attempt_at {
            if now < backoff_deadline(last, meta.attempts) {
                continue;
            }
        }

        // No hub currently serves this endpoint.
        let Some(conn) = state.registry.route_for(&meta.endpoint_id) else {
            continue;
        };

        // An earlier envelope for this endpoint is still unacked.
        if !state.registry.try_begin_dispatch(&meta.endpoint_id, &meta.id) {
            continue;
        }

        let envelope = match build_envelope(state, &meta) {
            Some(envelope) => envelope,
            None => {
                state.registry.finish_dispatch(&meta.endpoint_id, &meta.id);
                continue;
            }
        };

        tracing::debug!(
            webhook_id = %meta.id,
            endpoint_id = %meta.endpoint_id,
            hub_id = %conn.hub_id,
            attempt = envelope.attempt,
            "dispatching webhook"
        );
        if !state.registry.send(&conn, envelope) {
            // Dropped on overflow or a dying connection; retry next tick.
            state.registry.finish_dispatch(&meta.endpoint_id, &meta.id);
        }
    }
}

/// Load the full row and its endpoint, and assemble the wire envelope.
fn build_envelope(state: &AppState, meta: &WebhookMeta) -> Option<WebhookEnvelope> {
    let webhook = match state.store.get_webhook(&meta.id) {
        Ok(Some(webhook)) => webhook,
        Ok(None) => return None,
        Err(e) => {
            tracing::error!(webhook_id = %meta.id, error = %e, "failed to load webhook");
            return None;
        }
    };
    let endpoint = match state.store.get_endpoint(&meta.endpoint_id) {
        Ok(Some(endpoint)) => endpoint,
        Ok(None) => return None,
        Err(e) => {
            tracing::error!(endpoint_id = %meta.endpoint_id, error = %e, "failed to load endpoint");
            return None;
        }
    };

    let headers: HashMap<String, String> = match serde_json::from_str(&webhook.headers) {
        Ok(headers) => headers,
        Err(e) => {
            tracing::warn!(webhook_id = %meta.id, error = %e, "corrupt stored headers, sending none");
            HashMap::new()
        }
    };

    Some(WebhookEnvelope {
        id: webhook.id,
        endpoint_id: webhook.endpoint_id,
        destination_url: endpoint.destination_url,
        received_at: webhook.received_at,
        headers,
        payload: webhook.payload,
        attempt: webhook.attempts + 1,
    })
}
