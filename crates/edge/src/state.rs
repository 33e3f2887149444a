//! Shared application state passed to all handlers and background tasks.

use std::sync::Arc;

use hookly_store::{SecretCipher, Store};
use tokio_util::sync::CancellationToken;

use crate::config::EdgeConfig;
use crate::notify::Notifier;
use crate::relay::registry::ConnRegistry;
use crate::tokens::TokenManager;

/// Capability bundle handed to each task at construction. Tasks hold the
/// pieces they need and never reach back into an owner, which keeps the
/// registry/dispatcher/stream-handler ownership graph acyclic.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EdgeConfig>,
    pub store: Arc<Store>,
    pub cipher: Arc<SecretCipher>,
    pub registry: Arc<ConnRegistry>,
    pub notifier: Arc<dyn Notifier>,
    pub tokens: Arc<TokenManager>,
    /// Root cancellation token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}
