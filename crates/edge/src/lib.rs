//! The Hookly edge: the public-internet process.
//!
//! Receives signed webhooks over HTTP, persists them, and pushes each one
//! over a persistent WebSocket stream to whichever hub currently serves
//! its endpoint. Retries with backoff, dead-letters after seven days, and
//! notifies on permanent failures.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod http;
pub mod notify;
pub mod relay;
pub mod scheduler;
pub mod state;
pub mod tokens;
