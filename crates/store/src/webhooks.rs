//! Webhook rows and their lifecycle transitions.
//!
//! Transition statements are guarded on `status = 'pending'`, which makes
//! acks idempotent: a late or duplicate ack against a terminal row updates
//! nothing and the caller sees `false`. `attempts` only ever grows.

use chrono::{DateTime, Utc};
use hookly_domain::{StatusCounts, Webhook, WebhookMeta, WebhookStatus};
use rusqlite::{params, OptionalExtension, Row};

use crate::{opt_ts, parse_opt_ts, parse_ts, ts, Result, Store, StoreError};

impl Store {
    pub fn insert_webhook(&self, webhook: &Webhook) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO webhooks (id, endpoint_id, received_at, headers, payload,
                                   signature_valid, status, attempts, last_attempt_at,
                                   delivered_at, error_message, notification_sent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                webhook.id,
                webhook.endpoint_id,
                ts(webhook.received_at),
                webhook.headers,
                webhook.payload,
                webhook.signature_valid,
                webhook.status.as_str(),
                webhook.attempts,
                opt_ts(webhook.last_attempt_at),
                opt_ts(webhook.delivered_at),
                webhook.error_message,
                webhook.notification_sent,
            ],
        )?;
        Ok(())
    }

    /// Full row, payload included.
    pub fn get_webhook(&self, id: &str) -> Result<Option<Webhook>> {
        self.conn()?
            .query_row(
                "SELECT id, endpoint_id, received_at, headers, payload, signature_valid,
                        status, attempts, last_attempt_at, delivered_at, error_message,
                        notification_sent
                 FROM webhooks WHERE id = ?1",
                params![id],
                row_to_webhook,
            )
            .optional()
            .map_err(StoreError::from)?
            .transpose()
    }

    /// Metadata projection, used on hot paths that must not drag payloads
    /// through memory.
    pub fn webhook_meta(&self, id: &str) -> Result<Option<WebhookMeta>> {
        self.conn()?
            .query_row(
                "SELECT id, endpoint_id, received_at, status, attempts, last_attempt_at
                 FROM webhooks WHERE id = ?1",
                params![id],
                row_to_meta,
            )
            .optional()
            .map_err(StoreError::from)?
            .transpose()
    }

    /// The dispatch frontier: for each endpoint, its single oldest pending
    /// webhook, oldest endpoints first. Webhook N+1 of an endpoint never
    /// appears while webhook N is still pending — that is the in-order
    /// guarantee. The caller applies the backoff gate and in-flight
    /// exclusion on the returned metadata.
    pub fn dispatchable(&self, limit: usize) -> Result<Vec<WebhookMeta>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT w.id, w.endpoint_id, w.received_at, w.status, w.attempts, w.last_attempt_at
             FROM webhooks w
             WHERE w.status = 'pending'
               AND NOT EXISTS (
                   SELECT 1 FROM webhooks p
                   WHERE p.endpoint_id = w.endpoint_id
                     AND p.status = 'pending'
                     AND (p.received_at < w.received_at
                          OR (p.received_at = w.received_at AND p.id < w.id))
               )
             ORDER BY w.received_at
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_meta)?;
        let mut metas = Vec::new();
        for row in rows {
            metas.push(row??);
        }
        Ok(metas)
    }

    /// `pending → delivered`. Counts the attempt that succeeded.
    pub fn mark_delivered(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn()?.execute(
            "UPDATE webhooks
             SET status = 'delivered', delivered_at = ?2, last_attempt_at = ?2,
                 attempts = attempts + 1, error_message = NULL
             WHERE id = ?1 AND status = 'pending'",
            params![id, ts(now)],
        )?;
        Ok(affected > 0)
    }

    /// `pending → failed` (permanent destination failure).
    pub fn mark_failed(
        &self,
        id: &str,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn()?.execute(
            "UPDATE webhooks
             SET status = 'failed', last_attempt_at = ?3, attempts = attempts + 1,
                 error_message = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, error_message, ts(now)],
        )?;
        Ok(affected > 0)
    }

    /// Transient failure: stays `pending`, the attempt is counted, and the
    /// next dispatch is gated by backoff from `last_attempt_at`.
    pub fn record_attempt(
        &self,
        id: &str,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn()?.execute(
            "UPDATE webhooks
             SET attempts = attempts + 1, last_attempt_at = ?3, error_message = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, error_message, ts(now)],
        )?;
        Ok(affected > 0)
    }

    /// Reset a webhook for redelivery from scratch. Safe on any state.
    pub fn replay_webhook(&self, id: &str) -> Result<bool> {
        let affected = self.conn()?.execute(
            "UPDATE webhooks
             SET status = 'pending', attempts = 0, error_message = NULL,
                 delivered_at = NULL, last_attempt_at = NULL
             WHERE id = ?1",
            params![id],
        )?;
        Ok(affected > 0)
    }

    /// Flip the notification latch. Returns `true` exactly once per
    /// webhook: the affected-row count of the guarded UPDATE is the
    /// at-most-once decision, so concurrent callers cannot both win.
    pub fn claim_notification(&self, id: &str) -> Result<bool> {
        let affected = self.conn()?.execute(
            "UPDATE webhooks SET notification_sent = 1
             WHERE id = ?1 AND notification_sent = 0",
            params![id],
        )?;
        Ok(affected > 0)
    }

    /// Move every pending webhook received before `cutoff` to
    /// `dead_letter`, returning the affected rows' metadata so the caller
    /// can notify per webhook.
    pub fn sweep_dead_letters(&self, cutoff: DateTime<Utc>) -> Result<Vec<WebhookMeta>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let swept = {
            let mut stmt = tx.prepare(
                "SELECT id, endpoint_id, received_at, status, attempts, last_attempt_at
                 FROM webhooks
                 WHERE status = 'pending' AND received_at < ?1",
            )?;
            let rows = stmt.query_map(params![ts(cutoff)], row_to_meta)?;
            let mut swept = Vec::new();
            for row in rows {
                swept.push(row??);
            }
            swept
        };
        tx.execute(
            "UPDATE webhooks SET status = 'dead_letter'
             WHERE status = 'pending' AND received_at < ?1",
            params![ts(cutoff)],
        )?;
        tx.commit()?;
        Ok(swept)
    }

    /// Retention: delivered webhooks older than `cutoff` are gone for good.
    pub fn purge_delivered(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(self.conn()?.execute(
            "DELETE FROM webhooks WHERE status = 'delivered' AND delivered_at < ?1",
            params![ts(cutoff)],
        )?)
    }

    pub fn purge_failed(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(self.conn()?.execute(
            "DELETE FROM webhooks WHERE status = 'failed' AND last_attempt_at < ?1",
            params![ts(cutoff)],
        )?)
    }

    pub fn purge_dead_letters(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(self.conn()?.execute(
            "DELETE FROM webhooks WHERE status = 'dead_letter' AND received_at < ?1",
            params![ts(cutoff)],
        )?)
    }

    /// Queue counts across all of an owner's endpoints.
    pub fn status_counts(&self, owner_id: &str) -> Result<StatusCounts> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT w.status, COUNT(*) FROM webhooks w
             JOIN endpoints e ON e.id = w.endpoint_id
             WHERE e.owner_id = ?1
             GROUP BY w.status",
        )?;
        let rows = stmt.query_map(params![owner_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;
        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "pending" => counts.pending = count,
                "failed" => counts.failed = count,
                "dead_letter" => counts.dead_letter = count,
                _ => {}
            }
        }
        Ok(counts)
    }
}

fn row_to_webhook(row: &Row<'_>) -> rusqlite::Result<Result<Webhook>> {
    let received_raw: String = row.get(2)?;
    let status_raw: String = row.get(6)?;
    let last_attempt_raw: Option<String> = row.get(8)?;
    let delivered_raw: Option<String> = row.get(9)?;
    Ok(build_webhook(
        row.get(0)?,
        row.get(1)?,
        received_raw,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        status_raw,
        row.get(7)?,
        last_attempt_raw,
        delivered_raw,
        row.get(10)?,
        row.get(11)?,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_webhook(
    id: String,
    endpoint_id: String,
    received_raw: String,
    headers: String,
    payload: Vec<u8>,
    signature_valid: bool,
    status_raw: String,
    attempts: u32,
    last_attempt_raw: Option<String>,
    delivered_raw: Option<String>,
    error_message: Option<String>,
    notification_sent: bool,
) -> Result<Webhook> {
    Ok(Webhook {
        id,
        endpoint_id,
        received_at: parse_ts(&received_raw)?,
        headers,
        payload,
        signature_valid,
        status: status_raw
            .parse::<WebhookStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        attempts,
        last_attempt_at: parse_opt_ts(last_attempt_raw)?,
        delivered_at: parse_opt_ts(delivered_raw)?,
        error_message,
        notification_sent,
    })
}

fn row_to_meta(row: &Row<'_>) -> rusqlite::Result<Result<WebhookMeta>> {
    let received_raw: String = row.get(2)?;
    let status_raw: String = row.get(3)?;
    let last_attempt_raw: Option<String> = row.get(5)?;
    let id: String = row.get(0)?;
    let endpoint_id: String = row.get(1)?;
    let attempts: u32 = row.get(4)?;
    Ok((|| {
        Ok(WebhookMeta {
            id,
            endpoint_id,
            received_at: parse_ts(&received_raw)?,
            status: status_raw
                .parse::<WebhookStatus>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            attempts,
            last_attempt_at: parse_opt_ts(last_attempt_raw)?,
        })
    })())
}
