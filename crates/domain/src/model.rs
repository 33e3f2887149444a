//! Core records: endpoints, captured webhooks, and API tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which signature scheme an endpoint expects from its producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Stripe,
    Github,
    Telegram,
    Generic,
    Custom,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Stripe => "stripe",
            ProviderKind::Github => "github",
            ProviderKind::Telegram => "telegram",
            ProviderKind::Generic => "generic",
            ProviderKind::Custom => "custom",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(ProviderKind::Stripe),
            "github" => Ok(ProviderKind::Github),
            "telegram" => Ok(ProviderKind::Telegram),
            "generic" => Ok(ProviderKind::Generic),
            "custom" => Ok(ProviderKind::Custom),
            other => Err(UnknownVariant {
                field: "provider_kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Delivery lifecycle state of a captured webhook.
///
/// `delivered`, `failed`, and `dead_letter` are terminal: the only
/// transitions out of them are deletion (retention) and an explicit replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Pending,
    Delivered,
    Failed,
    DeadLetter,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Pending => "pending",
            WebhookStatus::Delivered => "delivered",
            WebhookStatus::Failed => "failed",
            WebhookStatus::DeadLetter => "dead_letter",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WebhookStatus::Pending)
    }
}

impl std::str::FromStr for WebhookStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WebhookStatus::Pending),
            "delivered" => Ok(WebhookStatus::Delivered),
            "failed" => Ok(WebhookStatus::Failed),
            "dead_letter" => Ok(WebhookStatus::DeadLetter),
            other => Err(UnknownVariant {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// A stored enum column held a value this build doesn't know.
#[derive(Debug, thiserror::Error)]
#[error("unknown {field} value: {value:?}")]
pub struct UnknownVariant {
    pub field: &'static str,
    pub value: String,
}

/// A routable destination. Secrets are held as AES-256-GCM ciphertext;
/// the plaintext is never persisted.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub provider_kind: ProviderKind,
    pub signature_secret: Vec<u8>,
    /// Ciphertext JSON; present iff `provider_kind` is `custom`.
    pub verification_config: Option<Vec<u8>>,
    pub destination_url: String,
    pub muted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A captured delivery attempt, exactly as persisted.
#[derive(Debug, Clone)]
pub struct Webhook {
    pub id: String,
    pub endpoint_id: String,
    pub received_at: DateTime<Utc>,
    /// JSON object, header name (lowercased by the HTTP stack) → value.
    pub headers: String,
    pub payload: Vec<u8>,
    pub signature_valid: bool,
    pub status: WebhookStatus,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub notification_sent: bool,
}

/// Selection-sized projection of a webhook row. The dispatcher works on
/// these and only loads the full row (payload included) for the ones it
/// actually sends.
#[derive(Debug, Clone)]
pub struct WebhookMeta {
    pub id: String,
    pub endpoint_id: String,
    pub received_at: DateTime<Utc>,
    pub status: WebhookStatus,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

/// An opaque bearer token, stored only as a SHA-256 hex digest.
#[derive(Debug, Clone)]
pub struct ApiToken {
    pub id: String,
    pub owner_id: String,
    pub token_hash: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

/// The principal a bearer token resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub token_id: String,
    pub owner_id: String,
}

/// Per-owner queue counts for the status surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub failed: u64,
    pub dead_letter: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn provider_kind_round_trips_through_text() {
        for kind in [
            ProviderKind::Stripe,
            ProviderKind::Github,
            ProviderKind::Telegram,
            ProviderKind::Generic,
            ProviderKind::Custom,
        ] {
            assert_eq!(ProviderKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(ProviderKind::from_str("smtp").is_err());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            WebhookStatus::Pending,
            WebhookStatus::Delivered,
            WebhookStatus::Failed,
            WebhookStatus::DeadLetter,
        ] {
            assert_eq!(WebhookStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(WebhookStatus::from_str("archived").is_err());
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!WebhookStatus::Pending.is_terminal());
        assert!(WebhookStatus::Delivered.is_terminal());
        assert!(WebhookStatus::Failed.is_terminal());
        assert!(WebhookStatus::DeadLetter.is_terminal());
    }
}
