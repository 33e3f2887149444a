//! Shared model types for the Hookly delivery plane.
//!
//! Everything here is plain data: the records the store persists, the
//! enums that travel between components, opaque-id generation, and the
//! retry backoff curve. No I/O.

pub mod backoff;
pub mod id;
pub mod model;

pub use backoff::{backoff_deadline, dispatch_backoff_secs};
pub use id::{generate_id, generate_token};
pub use model::{
    ApiToken, Endpoint, Principal, ProviderKind, StatusCounts, Webhook, WebhookMeta,
    WebhookStatus,
};
