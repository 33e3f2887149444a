//! Relay protocol: the framed messages exchanged between the edge and a
//! connected hub over one bidirectional WebSocket stream.
//!
//! Hubs dial out to the edge, authenticate with a bearer token in the
//! first frame, and then receive webhook envelopes which they acknowledge
//! with a delivery classification. Both directions carry heartbeats.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on a single WebSocket message. Payloads are capped at
/// [`MAX_PAYLOAD_BYTES`] but travel base64-encoded inside a JSON frame,
/// so the frame cap leaves headroom for the 4/3 expansion plus headers.
pub const MAX_FRAME_BYTES: usize = 192 * 1024 * 1024;

/// Largest webhook payload accepted at ingestion and carried in an envelope.
pub const MAX_PAYLOAD_BYTES: usize = 100 * 1024 * 1024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Hub → Edge messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubFrame {
    /// Always the first frame on a new stream.
    Connect {
        hub_id: String,
        token: String,
        endpoint_ids: Vec<String>,
    },

    /// Outcome of forwarding one envelope to the local service.
    Ack {
        webhook_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        /// True for failures that retrying cannot fix (4xx from the
        /// destination). Stops redelivery.
        #[serde(default)]
        permanent_failure: bool,
    },

    /// Liveness signal; the edge closes streams silent for 60 s.
    Heartbeat { timestamp: i64 },
}

/// Edge → Hub messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeFrame {
    /// Reply to `Connect`. On rejection `error` is `"<CODE>: <message>"`;
    /// the codes are the stable wire contract (see [`AuthErrorCode`]).
    ConnectResponse {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// One webhook pushed for delivery.
    Webhook { envelope: WebhookEnvelope },

    Heartbeat { timestamp: i64 },
}

/// The on-wire record of a webhook pushed to a hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub id: String,
    pub endpoint_id: String,
    /// Default target; the hub may override it from local config.
    pub destination_url: String,
    pub received_at: DateTime<Utc>,
    /// Header name (lowercase) → value, as captured at ingestion.
    pub headers: HashMap<String, String>,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// 1-based attempt counter: `stored attempts + 1` at dispatch time.
    pub attempt: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth error codes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structured rejection codes carried as the prefix of
/// `ConnectResponse.error`. Every code is permanent: a hub receiving one
/// must stop reconnecting and surface the error to its operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorCode {
    TokenMissing,
    TokenInvalid,
    TokenRevoked,
    NoEndpoints,
    EndpointNotFound,
    EndpointAccessDenied,
}

impl AuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthErrorCode::TokenMissing => "TOKEN_MISSING",
            AuthErrorCode::TokenInvalid => "TOKEN_INVALID",
            AuthErrorCode::TokenRevoked => "TOKEN_REVOKED",
            AuthErrorCode::NoEndpoints => "NO_ENDPOINTS",
            AuthErrorCode::EndpointNotFound => "ENDPOINT_NOT_FOUND",
            AuthErrorCode::EndpointAccessDenied => "ENDPOINT_ACCESS_DENIED",
        }
    }

    /// Render the wire form: `"<CODE>: <message>"`.
    pub fn format(&self, message: impl std::fmt::Display) -> String {
        format!("{}: {}", self.as_str(), message)
    }

    /// Recover the code from a `ConnectResponse.error` string. Returns
    /// `None` for anything that doesn't start with a known code, which
    /// callers should treat as transient.
    pub fn parse(error: &str) -> Option<Self> {
        let code = error.split(':').next()?.trim();
        match code {
            "TOKEN_MISSING" => Some(AuthErrorCode::TokenMissing),
            "TOKEN_INVALID" => Some(AuthErrorCode::TokenInvalid),
            "TOKEN_REVOKED" => Some(AuthErrorCode::TokenRevoked),
            "NO_ENDPOINTS" => Some(AuthErrorCode::NoEndpoints),
            "ENDPOINT_NOT_FOUND" => Some(AuthErrorCode::EndpointNotFound),
            "ENDPOINT_ACCESS_DENIED" => Some(AuthErrorCode::EndpointAccessDenied),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload encoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_frame_round_trips() {
        let frame = HubFrame::Connect {
            hub_id: "laptop".into(),
            token: "hk_abc".into(),
            endpoint_ids: vec!["e1".into(), "e2".into()],
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"connect""#));
        let back: HubFrame = serde_json::from_str(&json).unwrap();
        match back {
            HubFrame::Connect { hub_id, endpoint_ids, .. } => {
                assert_eq!(hub_id, "laptop");
                assert_eq!(endpoint_ids.len(), 2);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn ack_defaults_permanent_failure_to_false() {
        let json = r#"{"type":"ack","webhook_id":"w1","success":false}"#;
        let frame: HubFrame = serde_json::from_str(json).unwrap();
        match frame {
            HubFrame::Ack { permanent_failure, success, .. } => {
                assert!(!success);
                assert!(!permanent_failure);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn envelope_payload_travels_as_base64() {
        let envelope = WebhookEnvelope {
            id: "w1".into(),
            endpoint_id: "e1".into(),
            destination_url: "http://localhost:3000/hook".into(),
            received_at: Utc::now(),
            headers: HashMap::from([("content-type".to_string(), "application/json".to_string())]),
            payload: vec![0x00, 0xff, 0x10, 0x20],
            attempt: 1,
        };
        let json = serde_json::to_string(&EdgeFrame::Webhook { envelope }).unwrap();
        assert!(json.contains(r#""payload":"AP8QIA==""#));

        let back: EdgeFrame = serde_json::from_str(&json).unwrap();
        match back {
            EdgeFrame::Webhook { envelope } => {
                assert_eq!(envelope.payload, vec![0x00, 0xff, 0x10, 0x20]);
                assert_eq!(envelope.attempt, 1);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn auth_codes_round_trip_through_the_error_string() {
        let rendered = AuthErrorCode::TokenRevoked.format("token was revoked by its owner");
        assert_eq!(rendered, "TOKEN_REVOKED: token was revoked by its owner");
        assert_eq!(
            AuthErrorCode::parse(&rendered),
            Some(AuthErrorCode::TokenRevoked)
        );
    }

    #[test]
    fn unknown_error_prefix_parses_to_none() {
        assert_eq!(AuthErrorCode::parse("stream reset by peer"), None);
        assert_eq!(AuthErrorCode::parse(""), None);
    }

    #[test]
    fn frame_cap_covers_encoded_max_payload() {
        // base64 expands 4/3; the cap must absorb that plus JSON framing.
        assert!(MAX_FRAME_BYTES > MAX_PAYLOAD_BYTES / 3 * 4 + 1024 * 1024);
    }
}
