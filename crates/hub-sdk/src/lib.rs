//! Hub SDK: the consumer side of the Hookly relay.
//!
//! A hub dials out to the edge over WebSocket, claims its endpoints with
//! a bearer token, receives webhook envelopes, forwards each to a local
//! service, and acknowledges with a delivery classification. No inbound
//! ports are ever opened.

pub mod client;
pub mod config;
pub mod credentials;
pub mod forwarder;
pub mod reconnect;

pub use client::RelayClient;
pub use config::{EndpointRoute, HubConfig};
pub use credentials::CredentialStore;
pub use forwarder::{DeliveryOutcome, Forwarder};
pub use reconnect::ReconnectBackoff;

/// Top-level SDK error.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("config: {0}")]
    Config(String),

    #[error("credentials: {0}")]
    Credentials(String),

    /// The edge rejected the connection with a permanent auth error.
    /// Reconnecting cannot help; the message carries the wire code.
    #[error("connection rejected: {0}")]
    Rejected(String),

    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),

    #[error("shutdown requested")]
    Shutdown,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
