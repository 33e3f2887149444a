//! HTTP surface: public ingestion + relay upgrade, and the bearer-token
//! protected control API.

pub mod auth;
pub mod control;
pub mod ingest;

use std::convert::Infallible;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::relay::ws::relay_ws;
use crate::state::AppState;

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Build the full router.
///
/// `/h/{endpoint_id}` and `/relay/ws` are public by design: ingestion is
/// authenticated by endpoint-id entropy plus signatures, the relay stream
/// authenticates inside its first frame. Everything under `/api/v1` wants
/// a bearer token, enforced per-handler by the [`auth::Owner`] extractor.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route(
            "/h/:endpoint_id",
            post(ingest::ingest)
                .layer::<_, Infallible>(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(axum::extract::DefaultBodyLimit::max(ingest::MAX_BODY_BYTES)),
        )
        .route("/relay/ws", get(relay_ws))
        .route(
            "/api/v1/endpoints",
            post(control::create_endpoint).get(control::list_endpoints),
        )
        .route(
            "/api/v1/endpoints/:id",
            axum::routing::patch(control::update_endpoint).delete(control::delete_endpoint),
        )
        .route("/api/v1/webhooks/:id/replay", post(control::replay_webhook))
        .route("/api/v1/status", get(control::status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}
