//! Durable state for the delivery plane: endpoints, captured webhooks, and
//! API tokens in a single SQLite database.
//!
//! The store is the only cross-task coordination surface. Status
//! transitions are single `UPDATE` statements guarded on the current
//! status, so they are atomic and idempotent: acking a webhook that
//! already reached a terminal state is a no-op. Queries that depend on
//! time take `now`/cutoff parameters so tests can drive a synthetic clock.

pub mod crypto;
mod endpoints;
mod tokens;
mod webhooks;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

pub use crypto::{CryptoError, SecretCipher};
pub use endpoints::EndpointPatch;

/// Store-level failures. Callers treat any of these as a `StoreFault`:
/// log, answer 500 (ingestion) or skip the tick (dispatcher).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the database at `path` and ensure the
    /// schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory database, used by tests and scratch tooling.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=3000;
             PRAGMA foreign_keys=ON;",
        )?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS endpoints (
                 id                  TEXT PRIMARY KEY,
                 owner_id            TEXT NOT NULL,
                 name                TEXT NOT NULL,
                 provider_kind       TEXT NOT NULL,
                 signature_secret    BLOB NOT NULL,
                 verification_config BLOB,
                 destination_url     TEXT NOT NULL,
                 muted               INTEGER NOT NULL DEFAULT 0,
                 created_at          TEXT NOT NULL,
                 updated_at          TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_endpoints_owner
                 ON endpoints(owner_id);
             CREATE INDEX IF NOT EXISTS idx_endpoints_owner_created
                 ON endpoints(owner_id, created_at DESC);

             CREATE TABLE IF NOT EXISTS webhooks (
                 id                TEXT PRIMARY KEY,
                 endpoint_id       TEXT NOT NULL
                     REFERENCES endpoints(id) ON DELETE CASCADE,
                 received_at       TEXT NOT NULL,
                 headers           TEXT NOT NULL,
                 payload           BLOB NOT NULL,
                 signature_valid   INTEGER NOT NULL,
                 status            TEXT NOT NULL DEFAULT 'pending',
                 attempts          INTEGER NOT NULL DEFAULT 0,
                 last_attempt_at   TEXT,
                 delivered_at      TEXT,
                 error_message     TEXT,
                 notification_sent INTEGER NOT NULL DEFAULT 0
             );
             CREATE INDEX IF NOT EXISTS idx_webhooks_endpoint
                 ON webhooks(endpoint_id);
             CREATE INDEX IF NOT EXISTS idx_webhooks_status
                 ON webhooks(status);
             CREATE INDEX IF NOT EXISTS idx_webhooks_received
                 ON webhooks(received_at);
             CREATE INDEX IF NOT EXISTS idx_webhooks_status_received
                 ON webhooks(status, received_at);

             CREATE TABLE IF NOT EXISTS api_tokens (
                 id           TEXT PRIMARY KEY,
                 owner_id     TEXT NOT NULL,
                 token_hash   TEXT NOT NULL UNIQUE,
                 name         TEXT NOT NULL,
                 created_at   TEXT NOT NULL,
                 last_used_at TEXT,
                 revoked      INTEGER NOT NULL DEFAULT 0
             );",
        )?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timestamp encoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

// Timestamps are stored as fixed-precision RFC 3339 UTC text so that SQL
// string comparison agrees with chronological order.

pub(crate) fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn opt_ts(t: Option<DateTime<Utc>>) -> Option<String> {
    t.map(ts)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

pub(crate) fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|r| parse_ts(&r)).transpose()
}
