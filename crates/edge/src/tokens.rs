//! Bearer-token resolution against the store.

use std::sync::Arc;

use chrono::Utc;
use hookly_domain::Principal;
use hookly_protocol::AuthErrorCode;
use hookly_store::{Store, StoreError};
use sha2::{Digest, Sha256};

/// Why a token failed to resolve.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("no token provided")]
    Missing,

    #[error("token not recognized")]
    Invalid,

    #[error("token has been revoked")]
    Revoked,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TokenError {
    /// The wire code for stream rejections. Store faults are not auth
    /// failures and have no code.
    pub fn auth_code(&self) -> Option<AuthErrorCode> {
        match self {
            TokenError::Missing => Some(AuthErrorCode::TokenMissing),
            TokenError::Invalid => Some(AuthErrorCode::TokenInvalid),
            TokenError::Revoked => Some(AuthErrorCode::TokenRevoked),
            TokenError::Store(_) => None,
        }
    }
}

pub struct TokenManager {
    store: Arc<Store>,
}

impl TokenManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Resolve a plaintext bearer token to its principal.
    ///
    /// Tokens are looked up by SHA-256 hex digest, so the plaintext never
    /// touches the store. A successful resolution stamps `last_used_at`.
    pub fn resolve(&self, token: &str) -> Result<Principal, TokenError> {
        if token.trim().is_empty() {
            return Err(TokenError::Missing);
        }

        let hash = hex::encode(Sha256::digest(token.as_bytes()));
        let Some(record) = self.store.find_token_by_hash(&hash)? else {
            return Err(TokenError::Invalid);
        };
        if record.revoked {
            return Err(TokenError::Revoked);
        }

        if let Err(e) = self.store.touch_token(&record.id, Utc::now()) {
            tracing::warn!(token_id = %record.id, error = %e, "failed to stamp last_used_at");
        }

        Ok(Principal {
            token_id: record.id,
            owner_id: record.owner_id,
        })
    }
}

/// Hash a plaintext token the way the store expects it.
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
