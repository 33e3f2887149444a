//! Control API: endpoint CRUD, replay, and queue status, scoped to the
//! authenticated owner. This is a thin request/response layer over the
//! store; the delivery plane never calls it.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use hookly_domain::{generate_id, Endpoint, ProviderKind, StatusCounts};
use hookly_store::EndpointPatch;
use hookly_verifier::VerificationConfig;
use serde::{Deserialize, Serialize};

use crate::http::api_error;
use crate::http::auth::Owner;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateEndpointRequest {
    pub name: String,
    pub provider_kind: ProviderKind,
    /// Plaintext signing secret; encrypted before it touches the store.
    pub secret: String,
    pub destination_url: String,
    #[serde(default)]
    pub verification_config: Option<serde_json::Value>,
    #[serde(default)]
    pub muted: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateEndpointRequest {
    pub name: Option<String>,
    pub destination_url: Option<String>,
    pub muted: Option<bool>,
    pub provider_kind: Option<ProviderKind>,
    pub secret: Option<String>,
    pub verification_config: Option<serde_json::Value>,
}

/// Endpoint as the API renders it. Secrets never leave the process.
#[derive(Debug, Serialize)]
pub struct EndpointResponse {
    pub id: String,
    pub name: String,
    pub provider_kind: ProviderKind,
    pub destination_url: String,
    pub muted: bool,
    pub ingest_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EndpointResponse {
    fn from_endpoint(endpoint: Endpoint, state: &AppState) -> Self {
        Self {
            ingest_url: state.config.ingest_url(&endpoint.id),
            id: endpoint.id,
            name: endpoint.name,
            provider_kind: endpoint.provider_kind,
            destination_url: endpoint.destination_url,
            muted: endpoint.muted,
            created_at: endpoint.created_at,
            updated_at: endpoint.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub counts: StatusCounts,
    /// Endpoints of this owner currently served by a connected hub.
    pub connected_endpoints: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `POST /api/v1/endpoints`
pub async fn create_endpoint(
    State(state): State<AppState>,
    Owner(principal): Owner,
    Json(req): Json<CreateEndpointRequest>,
) -> Response {
    if let Err(message) = validate_destination(&req.destination_url) {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, message);
    }
    let config_json = match validate_config_pairing(req.provider_kind, req.verification_config) {
        Ok(config) => config,
        Err(message) => return api_error(StatusCode::UNPROCESSABLE_ENTITY, message),
    };

    let secret_ct = match state.cipher.encrypt(req.secret.as_bytes()) {
        Ok(ct) => ct,
        Err(e) => {
            tracing::error!(error = %e, "secret encryption failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };
    let config_ct = match config_json {
        Some(json) => match state.cipher.encrypt(json.as_bytes()) {
            Ok(ct) => Some(ct),
            Err(e) => {
                tracing::error!(error = %e, "config encryption failed");
                return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
            }
        },
        None => None,
    };

    let now = Utc::now();
    let endpoint = Endpoint {
        id: generate_id(),
        owner_id: principal.owner_id,
        name: req.name,
        provider_kind: req.provider_kind,
        signature_secret: secret_ct,
        verification_config: config_ct,
        destination_url: req.destination_url,
        muted: req.muted,
        created_at: now,
        updated_at: now,
    };

    if let Err(e) = state.store.insert_endpoint(&endpoint) {
        tracing::error!(error = %e, "failed to insert endpoint");
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable");
    }

    tracing::info!(endpoint_id = %endpoint.id, owner_id = %endpoint.owner_id, "endpoint created");
    (
        StatusCode::CREATED,
        Json(EndpointResponse::from_endpoint(endpoint, &state)),
    )
        .into_response()
}

/// `GET /api/v1/endpoints`
pub async fn list_endpoints(
    State(state): State<AppState>,
    Owner(principal): Owner,
) -> Response {
    match state.store.list_endpoints(&principal.owner_id) {
        Ok(endpoints) => {
            let out: Vec<EndpointResponse> = endpoints
                .into_iter()
                .map(|e| EndpointResponse::from_endpoint(e, &state))
                .collect();
            Json(serde_json::json!({ "endpoints": out })).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to list endpoints");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable")
        }
    }
}

/// `PATCH /api/v1/endpoints/:id` — 404 for missing *or* foreign endpoints.
pub async fn update_endpoint(
    State(state): State<AppState>,
    Owner(principal): Owner,
    Path(id): Path<String>,
    Json(req): Json<UpdateEndpointRequest>,
) -> Response {
    let current = match state.store.get_endpoint_owned(&id, &principal.owner_id) {
        Ok(Some(endpoint)) => endpoint,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "endpoint not found"),
        Err(e) => {
            tracing::error!(error = %e, "failed to load endpoint");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable");
        }
    };

    if let Some(url) = &req.destination_url {
        if let Err(message) = validate_destination(url) {
            return api_error(StatusCode::UNPROCESSABLE_ENTITY, message);
        }
    }

    // Validate the post-patch kind/config pairing before writing anything.
    let effective_kind = req.provider_kind.unwrap_or(current.provider_kind);
    let config_patch: Option<Option<Vec<u8>>> = match (&req.verification_config, effective_kind) {
        (Some(value), ProviderKind::Custom) => {
            match validate_config_pairing(ProviderKind::Custom, Some(value.clone())) {
                Ok(Some(json)) => match state.cipher.encrypt(json.as_bytes()) {
                    Ok(ct) => Some(Some(ct)),
                    Err(e) => {
                        tracing::error!(error = %e, "config encryption failed");
                        return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
                    }
                },
                Ok(None) => Some(None),
                Err(message) => return api_error(StatusCode::UNPROCESSABLE_ENTITY, message),
            }
        }
        (Some(_), _) => {
            return api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "verification_config is only valid for custom endpoints",
            )
        }
        // Moving away from custom drops any stored config.
        (None, kind) if kind != ProviderKind::Custom && current.verification_config.is_some() => {
            Some(None)
        }
        (None, ProviderKind::Custom)
            if req.provider_kind == Some(ProviderKind::Custom)
                && current.verification_config.is_none() =>
        {
            return api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "custom endpoints require a verification_config",
            )
        }
        (None, _) => None,
    };

    let secret_patch = match &req.secret {
        Some(secret) => match state.cipher.encrypt(secret.as_bytes()) {
            Ok(ct) => Some(ct),
            Err(e) => {
                tracing::error!(error = %e, "secret encryption failed");
                return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
            }
        },
        None => None,
    };

    let patch = EndpointPatch {
        name: req.name,
        destination_url: req.destination_url,
        muted: req.muted,
        provider_kind: req.provider_kind,
        signature_secret: secret_patch,
        verification_config: config_patch,
    };

    match state
        .store
        .update_endpoint(&id, &principal.owner_id, patch, Utc::now())
    {
        Ok(Some(endpoint)) => {
            Json(EndpointResponse::from_endpoint(endpoint, &state)).into_response()
        }
        Ok(None) => api_error(StatusCode::NOT_FOUND, "endpoint not found"),
        Err(e) => {
            tracing::error!(error = %e, "failed to update endpoint");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable")
        }
    }
}

/// `DELETE /api/v1/endpoints/:id` — cascades to the endpoint's webhooks.
pub async fn delete_endpoint(
    State(state): State<AppState>,
    Owner(principal): Owner,
    Path(id): Path<String>,
) -> Response {
    match state.store.delete_endpoint(&id, &principal.owner_id) {
        Ok(true) => {
            tracing::info!(endpoint_id = %id, "endpoint deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => api_error(StatusCode::NOT_FOUND, "endpoint not found"),
        Err(e) => {
            tracing::error!(error = %e, "failed to delete endpoint");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable")
        }
    }
}

/// `POST /api/v1/webhooks/:id/replay` — reset a webhook for redelivery.
pub async fn replay_webhook(
    State(state): State<AppState>,
    Owner(principal): Owner,
    Path(id): Path<String>,
) -> Response {
    // Ownership travels through the webhook's endpoint.
    let meta = match state.store.webhook_meta(&id) {
        Ok(Some(meta)) => meta,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "webhook not found"),
        Err(e) => {
            tracing::error!(error = %e, "failed to load webhook");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable");
        }
    };
    match state
        .store
        .get_endpoint_owned(&meta.endpoint_id, &principal.owner_id)
    {
        Ok(Some(_)) => {}
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "webhook not found"),
        Err(e) => {
            tracing::error!(error = %e, "failed to load endpoint");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable");
        }
    }

    match state.store.replay_webhook(&id) {
        Ok(true) => {
            tracing::info!(webhook_id = %id, "webhook replayed");
            Json(serde_json::json!({ "ok": true })).into_response()
        }
        Ok(false) => api_error(StatusCode::NOT_FOUND, "webhook not found"),
        Err(e) => {
            tracing::error!(error = %e, "failed to replay webhook");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable")
        }
    }
}

/// `GET /api/v1/status` — queue counts plus connected endpoints.
pub async fn status(State(state): State<AppState>, Owner(principal): Owner) -> Response {
    let counts = match state.store.status_counts(&principal.owner_id) {
        Ok(counts) => counts,
        Err(e) => {
            tracing::error!(error = %e, "failed to count webhooks");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable");
        }
    };

    let owned = match state.store.list_endpoints(&principal.owner_id) {
        Ok(endpoints) => endpoints,
        Err(e) => {
            tracing::error!(error = %e, "failed to list endpoints");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable");
        }
    };

    let connected = state.registry.connected_endpoints();
    let mut connected_endpoints: Vec<String> = owned
        .into_iter()
        .map(|e| e.id)
        .filter(|id| connected.contains(id))
        .collect();
    connected_endpoints.sort();

    Json(StatusResponse {
        counts,
        connected_endpoints,
    })
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn validate_destination(url: &str) -> Result<(), String> {
    match url::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        Ok(parsed) => Err(format!(
            "destination_url must be http or https, got {:?}",
            parsed.scheme()
        )),
        Err(e) => Err(format!("destination_url is not a valid URL: {e}")),
    }
}

/// `verification_config` is present iff the endpoint is `custom`, and must
/// parse as a valid config. Returns the canonical JSON to encrypt.
fn validate_config_pairing(
    kind: ProviderKind,
    config: Option<serde_json::Value>,
) -> Result<Option<String>, String> {
    match (kind, config) {
        (ProviderKind::Custom, Some(value)) => {
            let parsed: VerificationConfig = serde_json::from_value(value)
                .map_err(|e| format!("verification_config is malformed: {e}"))?;
            parsed.validate()?;
            serde_json::to_string(&parsed)
                .map(Some)
                .map_err(|e| format!("verification_config is malformed: {e}"))
        }
        (ProviderKind::Custom, None) => {
            Err("custom endpoints require a verification_config".into())
        }
        (_, Some(_)) => Err("verification_config is only valid for custom endpoints".into()),
        (_, None) => Ok(None),
    }
}
