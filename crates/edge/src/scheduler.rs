//! Periodic maintenance: dead-letter sweep and retention.
//!
//! Runs once at startup, then hourly. All cutoffs are computed from a
//! `now` passed into [`run_maintenance`] so tests can advance the clock.

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::notify::FailureInfo;
use crate::state::AppState;

const INTERVAL_SECS: u64 = 3600;

/// Pending webhooks older than this are dead-lettered.
const DEAD_LETTER_AFTER_DAYS: i64 = 7;

/// Delivered and failed webhooks are kept this long after resolution.
const RETAIN_RESOLVED_DAYS: i64 = 7;

/// Dead-lettered webhooks are kept this long after receipt.
const RETAIN_DEAD_LETTER_DAYS: i64 = 14;

pub async fn run_scheduler(state: AppState, shutdown: CancellationToken) {
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(INTERVAL_SECS));
    loop {
        tokio::select! {
            // First tick completes immediately, giving the startup run.
            _ = tick.tick() => run_maintenance(&state, Utc::now()).await,
            _ = shutdown.cancelled() => {
                tracing::debug!("scheduler stopping");
                return;
            }
        }
    }
}

/// One maintenance pass at the given clock. Deletions are permanent.
pub async fn run_maintenance(state: &AppState, now: DateTime<Utc>) {
    // ── Dead-letter sweep ───────────────────────────────────────────
    let cutoff = now - Duration::days(DEAD_LETTER_AFTER_DAYS);
    match state.store.sweep_dead_letters(cutoff) {
        Ok(swept) if swept.is_empty() => {}
        Ok(swept) => {
            tracing::warn!(count = swept.len(), "webhooks dead-lettered");
            for meta in swept {
                match state.store.claim_notification(&meta.id) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        tracing::warn!(webhook_id = %meta.id, error = %e, "notification latch failed");
                        continue;
                    }
                }
                let endpoint_name = state
                    .store
                    .get_endpoint(&meta.endpoint_id)
                    .ok()
                    .flatten()
                    .map(|e| e.name)
                    .unwrap_or_else(|| meta.endpoint_id.clone());
                let info = FailureInfo {
                    webhook_id: meta.id.clone(),
                    endpoint_id: meta.endpoint_id.clone(),
                    endpoint_name,
                    attempts: meta.attempts,
                    error_message: None,
                };
                state.notifier.notify_dead_letter(&info).await;
            }
        }
        Err(e) => tracing::error!(error = %e, "dead-letter sweep failed"),
    }

    // ── Retention ───────────────────────────────────────────────────
    let resolved_cutoff = now - Duration::days(RETAIN_RESOLVED_DAYS);
    let dead_cutoff = now - Duration::days(RETAIN_DEAD_LETTER_DAYS);

    match state.store.purge_delivered(resolved_cutoff) {
        Ok(0) => {}
        Ok(n) => tracing::info!(count = n, "purged delivered webhooks"),
        Err(e) => tracing::error!(error = %e, "delivered retention failed"),
    }
    match state.store.purge_failed(resolved_cutoff) {
        Ok(0) => {}
        Ok(n) => tracing::info!(count = n, "purged failed webhooks"),
        Err(e) => tracing::error!(error = %e, "failed retention failed"),
    }
    match state.store.purge_dead_letters(dead_cutoff) {
        Ok(0) => {}
        Ok(n) => tracing::info!(count = n, "purged dead-lettered webhooks"),
        Err(e) => tracing::error!(error = %e, "dead-letter retention failed"),
    }
}
