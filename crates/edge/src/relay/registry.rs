//! In-memory registry of connected hubs and endpoint routing.
//!
//! Two maps live under one lock: `hub_id → connection` and
//! `endpoint_id → hub_id`. Each connection owns a bounded outbound queue;
//! the stream handler's writer task drains it. Everything else in the
//! process talks to connections exclusively through this API.
//!
//! The registry also tracks the per-endpoint in-flight reservation that
//! enforces "at most one dispatched-but-unacked webhook per endpoint".
//! A dispatched row is still `pending` in the store, so the store alone
//! cannot distinguish waiting from in-flight; reservations are released
//! on ack or when the owning connection goes away, which is what makes
//! drop-on-supersede safe to re-deliver.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use hookly_protocol::WebhookEnvelope;
use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Envelopes buffered per connection before drops kick in.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 1000;

/// A hub is considered gone after this long without a heartbeat.
pub const STALE_AFTER_SECS: i64 = 60;

/// Handle for pushing envelopes to one connected hub.
#[derive(Clone)]
pub struct Connection {
    pub hub_id: String,
    pub conn_id: u64,
    queue: mpsc::Sender<WebhookEnvelope>,
}

/// What `register` hands back to the stream handler: the receiving half
/// of the outbound queue plus the generation id guarding later removal.
pub struct Registration {
    pub conn_id: u64,
    pub queue_rx: mpsc::Receiver<WebhookEnvelope>,
}

struct HubEntry {
    conn_id: u64,
    queue: mpsc::Sender<WebhookEnvelope>,
    endpoint_ids: Vec<String>,
    last_heartbeat: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    hubs: HashMap<String, HubEntry>,
    /// endpoint_id → hub_id. An endpoint routes to exactly one hub.
    routes: HashMap<String, String>,
    /// endpoint_id → webhook_id currently dispatched and unacked.
    in_flight: HashMap<String, String>,
    next_conn_id: u64,
}

#[derive(Default)]
pub struct ConnRegistry {
    inner: RwLock<Inner>,
}

impl ConnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hub serving `endpoint_ids`. A hub reconnecting under the
    /// same id supersedes its old connection (last writer wins): the old
    /// queue's sender is dropped here, which closes it and lets the old
    /// writer task run out. Queued-but-unsent envelopes are dropped; their
    /// webhooks are still `pending` and will be re-selected.
    pub fn register(&self, hub_id: &str, endpoint_ids: Vec<String>) -> Registration {
        let (queue_tx, queue_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let mut inner = self.inner.write();

        inner.next_conn_id += 1;
        let conn_id = inner.next_conn_id;

        if let Some(old) = inner.hubs.remove(hub_id) {
            tracing::info!(hub_id, old_conn = old.conn_id, new_conn = conn_id, "hub superseded");
            release_hub_endpoints(&mut inner, hub_id, &old.endpoint_ids);
        }

        for endpoint_id in &endpoint_ids {
            if let Some(prev_hub) = inner.routes.insert(endpoint_id.clone(), hub_id.to_string()) {
                if prev_hub != hub_id {
                    tracing::info!(
                        endpoint_id,
                        from = %prev_hub,
                        to = %hub_id,
                        "endpoint rerouted"
                    );
                    inner.in_flight.remove(endpoint_id);
                    if let Some(prev_entry) = inner.hubs.get_mut(&prev_hub) {
                        prev_entry.endpoint_ids.retain(|e| e != endpoint_id);
                    }
                }
            }
        }

        inner.hubs.insert(
            hub_id.to_string(),
            HubEntry {
                conn_id,
                queue: queue_tx,
                endpoint_ids: endpoint_ids.clone(),
                last_heartbeat: Utc::now(),
            },
        );

        tracing::info!(hub_id, conn_id, endpoints = endpoint_ids.len(), "hub registered");
        Registration { conn_id, queue_rx }
    }

    /// Remove a hub's registration. `conn_id` guards against a superseded
    /// handler's cleanup evicting its successor.
    pub fn remove(&self, hub_id: &str, conn_id: u64) {
        let mut inner = self.inner.write();
        match inner.hubs.get(hub_id) {
            Some(entry) if entry.conn_id == conn_id => {}
            _ => return,
        }
        if let Some(entry) = inner.hubs.remove(hub_id) {
            release_hub_endpoints(&mut inner, hub_id, &entry.endpoint_ids);
            tracing::info!(hub_id, conn_id, "hub removed");
        }
    }

    /// The connection currently serving an endpoint, if any hub claims it.
    pub fn route_for(&self, endpoint_id: &str) -> Option<Connection> {
        let inner = self.inner.read();
        let hub_id = inner.routes.get(endpoint_id)?;
        let entry = inner.hubs.get(hub_id)?;
        Some(Connection {
            hub_id: hub_id.clone(),
            conn_id: entry.conn_id,
            queue: entry.queue.clone(),
        })
    }

    /// Non-blocking enqueue. Overflow drops the envelope with a warning —
    /// not an error, the webhook stays `pending` and is re-selected later.
    pub fn send(&self, conn: &Connection, envelope: WebhookEnvelope) -> bool {
        match conn.queue.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                tracing::warn!(
                    hub_id = %conn.hub_id,
                    webhook_id = %envelope.id,
                    "outbound queue full, dropping envelope"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Touch a hub's liveness timestamp.
    pub fn heartbeat(&self, hub_id: &str, conn_id: u64) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.hubs.get_mut(hub_id) {
            if entry.conn_id == conn_id {
                entry.last_heartbeat = Utc::now();
            }
        }
    }

    /// True when the hub's last heartbeat is older than `timeout_secs`.
    /// A hub that is no longer registered counts as stale.
    pub fn is_stale(&self, hub_id: &str, conn_id: u64, timeout_secs: i64) -> bool {
        let inner = self.inner.read();
        match inner.hubs.get(hub_id) {
            Some(entry) if entry.conn_id == conn_id => {
                Utc::now() - entry.last_heartbeat > Duration::seconds(timeout_secs)
            }
            _ => true,
        }
    }

    /// Every endpoint currently routed to a live connection.
    pub fn connected_endpoints(&self) -> Vec<String> {
        self.inner.read().routes.keys().cloned().collect()
    }

    pub fn has_connections(&self) -> bool {
        !self.inner.read().hubs.is_empty()
    }

    // ── In-flight reservations ──────────────────────────────────────

    /// Reserve an endpoint for one webhook's dispatch. Returns `false`
    /// while any reservation is held for that endpoint — including one
    /// for the same webhook, so an unacked envelope is never re-sent on
    /// the next tick.
    pub fn try_begin_dispatch(&self, endpoint_id: &str, webhook_id: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.in_flight.contains_key(endpoint_id) {
            return false;
        }
        inner
            .in_flight
            .insert(endpoint_id.to_string(), webhook_id.to_string());
        true
    }

    /// Release a reservation after an ack. Only releases when the acked
    /// webhook still holds it, so a stale ack cannot free a newer dispatch.
    pub fn finish_dispatch(&self, endpoint_id: &str, webhook_id: &str) {
        let mut inner = self.inner.write();
        if inner
            .in_flight
            .get(endpoint_id)
            .is_some_and(|w| w.as_str() == webhook_id)
        {
            inner.in_flight.remove(endpoint_id);
        }
    }

    /// Release by webhook id alone, for acks whose row has disappeared
    /// (endpoint deleted mid-flight).
    pub fn finish_dispatch_by_webhook(&self, webhook_id: &str) {
        let mut inner = self.inner.write();
        inner.in_flight.retain(|_, w| w.as_str() != webhook_id);
    }
}

/// Drop routing entries and reservations for a departing hub. Routes an
/// endpoint has since handed to another hub are left alone.
fn release_hub_endpoints(inner: &mut Inner, hub_id: &str, endpoint_ids: &[String]) {
    for endpoint_id in endpoint_ids {
        if inner.routes.get(endpoint_id).is_some_and(|h| h.as_str() == hub_id) {
            inner.routes.remove(endpoint_id);
            inner.in_flight.remove(endpoint_id);
        }
    }
}
