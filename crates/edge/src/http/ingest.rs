//! Public webhook ingestion: `POST /h/{endpoint_id}`.
//!
//! The endpoint answers 200 once the webhook row is durably written;
//! nothing downstream (dispatch, delivery) is awaited here. Signature
//! verification is observational — an invalid or unverifiable signature
//! is recorded on the row, never rejected, so producers cannot probe
//! secrets through status codes.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use hookly_domain::{generate_id, Webhook, WebhookStatus};
use hookly_verifier::VerificationConfig;

use crate::http::api_error;
use crate::state::AppState;

/// Maximum accepted payload: 100 MiB exactly; one byte more is 413.
pub const MAX_BODY_BYTES: usize = hookly_protocol::MAX_PAYLOAD_BYTES;

pub async fn ingest(
    State(state): State<AppState>,
    Path(endpoint_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let endpoint = match state.store.get_endpoint(&endpoint_id) {
        Ok(Some(endpoint)) => endpoint,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "unknown endpoint"),
        Err(e) => {
            tracing::error!(endpoint_id = %endpoint_id, error = %e, "store fault during ingestion");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable");
        }
    };

    // Muted endpoints swallow deliveries: body already read, nothing kept.
    if endpoint.muted {
        return StatusCode::OK.into_response();
    }

    let header_map = flatten_headers(&headers);
    let signature_valid = verify_signature(&state, &endpoint, &header_map, &body);

    let headers_json = match serde_json::to_string(&header_map) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(endpoint_id = %endpoint_id, error = %e, "failed to encode headers");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };

    let webhook = Webhook {
        id: generate_id(),
        endpoint_id: endpoint.id.clone(),
        received_at: Utc::now(),
        headers: headers_json,
        payload: body.to_vec(),
        signature_valid,
        status: WebhookStatus::Pending,
        attempts: 0,
        last_attempt_at: None,
        delivered_at: None,
        error_message: None,
        notification_sent: false,
    };

    if let Err(e) = state.store.insert_webhook(&webhook) {
        tracing::error!(endpoint_id = %endpoint_id, error = %e, "failed to persist webhook");
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable");
    }

    tracing::info!(
        endpoint_id = %endpoint_id,
        webhook_id = %webhook.id,
        bytes = webhook.payload.len(),
        signature_valid,
        "webhook received"
    );
    StatusCode::OK.into_response()
}

/// Decrypt the endpoint's secret (and custom config) and run verification.
/// Any failure along the way records the delivery as unverified.
fn verify_signature(
    state: &AppState,
    endpoint: &hookly_domain::Endpoint,
    headers: &HashMap<String, String>,
    payload: &[u8],
) -> bool {
    let secret = match state.cipher.decrypt_string(&endpoint.signature_secret) {
        Ok(secret) => secret,
        Err(e) => {
            tracing::warn!(
                endpoint_id = %endpoint.id,
                error = %e,
                "cannot decrypt signature secret, recording signature as invalid"
            );
            return false;
        }
    };

    let config = endpoint.verification_config.as_ref().and_then(|ciphertext| {
        let plaintext = state.cipher.decrypt(ciphertext).ok()?;
        VerificationConfig::from_json(&plaintext)
    });

    hookly_verifier::verify(
        endpoint.provider_kind,
        config.as_ref(),
        &secret,
        headers,
        payload,
        Utc::now().timestamp(),
    )
}

/// Collapse the header multimap into the persisted string map. Names
/// arrive lowercased from the HTTP stack; repeated headers are joined
/// with a comma per usual HTTP semantics.
fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn flatten_joins_repeated_headers() {
        let mut headers = HeaderMap::new();
        headers.append("x-tag", HeaderValue::from_static("a"));
        headers.append("x-tag", HeaderValue::from_static("b"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let map = flatten_headers(&headers);
        assert_eq!(map.get("x-tag").map(String::as_str), Some("a, b"));
        assert_eq!(
            map.get("content-type").map(String::as_str),
            Some("application/json")
        );
    }
}
