//! Out-of-band alerting for delivery failures and dead-lettered webhooks.
//!
//! Notifications are best-effort: backends log and swallow their own
//! errors. At-most-once per webhook is enforced by the store's
//! notification latch, not here.

use async_trait::async_trait;
use serde_json::json;

use crate::config::TelegramConfig;

/// Everything a failure message needs; assembled by the ack handler and
/// the scheduler from the webhook row and its endpoint.
#[derive(Debug, Clone)]
pub struct FailureInfo {
    pub webhook_id: String,
    pub endpoint_id: String,
    pub endpoint_name: String,
    pub attempts: u32,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// A delivery hit a permanent failure and will not be retried.
    async fn notify_delivery_failure(&self, info: &FailureInfo);

    /// A webhook aged out of the retry window.
    async fn notify_dead_letter(&self, info: &FailureInfo);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// No-op backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Used when no notification channel is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify_delivery_failure(&self, info: &FailureInfo) {
        tracing::debug!(webhook_id = %info.webhook_id, "notification skipped (no backend)");
    }

    async fn notify_dead_letter(&self, info: &FailureInfo) {
        tracing::debug!(webhook_id = %info.webhook_id, "notification skipped (no backend)");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Telegram backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TelegramNotifier {
    http: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn send(&self, html: String) {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.config.bot_token
        );
        let body = json!({
            "chat_id": self.config.chat_id,
            "text": html,
            "parse_mode": "HTML",
        });

        match self.http.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "telegram rejected notification");
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to reach telegram");
            }
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify_delivery_failure(&self, info: &FailureInfo) {
        let reason = info.error_message.as_deref().unwrap_or("unknown error");
        self.send(format!(
            "<b>⚠️ Webhook delivery failed</b>\n\
             Endpoint: <b>{}</b>\n\
             Webhook: <code>{}</code>\n\
             Attempts: {}\n\
             Reason: {}",
            escape_html(&info.endpoint_name),
            escape_html(&info.webhook_id),
            info.attempts,
            escape_html(reason),
        ))
        .await;
    }

    async fn notify_dead_letter(&self, info: &FailureInfo) {
        self.send(format!(
            "<b>💀 Webhook dead-lettered</b>\n\
             Endpoint: <b>{}</b>\n\
             Webhook: <code>{}</code>\n\
             Undelivered after {} attempt(s); it will be kept for 14 days.",
            escape_html(&info.endpoint_name),
            escape_html(&info.webhook_id),
            info.attempts,
        ))
        .await;
    }
}

/// Minimal escaping for Telegram's HTML parse mode.
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_escaping_covers_the_three_metacharacters() {
        assert_eq!(
            escape_html("<b>a & b</b>"),
            "&lt;b&gt;a &amp; b&lt;/b&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }
}
