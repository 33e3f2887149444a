//! Bearer-token extraction for the control API.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Response;
use hookly_domain::Principal;

use crate::http::api_error;
use crate::state::AppState;
use crate::tokens::TokenError;

/// Extracts `Authorization: Bearer <token>` and resolves it to the
/// owning principal. Handlers that take an [`Owner`] are authenticated;
/// failures answer 401 (or 500 on a store fault) before the handler runs.
pub struct Owner(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for Owner {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");

        match state.tokens.resolve(token) {
            Ok(principal) => Ok(Owner(principal)),
            Err(TokenError::Store(e)) => {
                tracing::error!(error = %e, "store fault during API auth");
                Err(api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error",
                ))
            }
            Err(e) => Err(api_error(
                StatusCode::UNAUTHORIZED,
                format!("invalid or missing API token: {e}"),
            )),
        }
    }
}
