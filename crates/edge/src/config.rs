//! Edge configuration, read from the environment once at startup.
//!
//! Security-relevant settings have no silent defaults: a missing or
//! malformed `ENCRYPTION_KEY` stops the process with a diagnostic that
//! names the variable and the expected shape.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is required: {hint}")]
    Missing { var: &'static str, hint: &'static str },

    #[error("{var} is invalid ({value:?}): {hint}")]
    Invalid {
        var: &'static str,
        value: String,
        hint: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// SQLite database file (`DATABASE_PATH`, default `hookly.db`).
    pub database_path: PathBuf,
    /// 64 hex chars = 32-byte AES-256-GCM key (`ENCRYPTION_KEY`, required).
    pub encryption_key: String,
    /// Listen port (`PORT`, default 8080).
    pub port: u16,
    /// Public base URL used to render ingest URLs (`BASE_URL`).
    pub base_url: String,
    /// Telegram notifications; requires both `TELEGRAM_BOT_TOKEN` and
    /// `TELEGRAM_CHAT_ID`. Unset means the no-op notifier.
    pub telegram: Option<TelegramConfig>,
}

impl EdgeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_path = env_or("DATABASE_PATH", "hookly.db").into();

        let encryption_key = match std::env::var("ENCRYPTION_KEY") {
            Ok(key) if !key.trim().is_empty() => key.trim().to_string(),
            _ => {
                return Err(ConfigError::Missing {
                    var: "ENCRYPTION_KEY",
                    hint: "set it to 64 hex characters (32 random bytes); \
                           secrets at rest are unreadable without it",
                })
            }
        };
        if encryption_key.len() != 64 || hex::decode(&encryption_key).is_err() {
            return Err(ConfigError::Invalid {
                var: "ENCRYPTION_KEY",
                value: format!("<{} chars>", encryption_key.len()),
                hint: "expected exactly 64 hex characters (32 bytes)",
            });
        }

        let port_raw = env_or("PORT", "8080");
        let port = port_raw.parse::<u16>().map_err(|_| ConfigError::Invalid {
            var: "PORT",
            value: port_raw.clone(),
            hint: "expected a TCP port number",
        })?;

        let base_url = env_or("BASE_URL", &format!("http://localhost:{port}"));
        let base_url = base_url.trim_end_matches('/').to_string();

        let telegram = match (
            non_empty_env("TELEGRAM_BOT_TOKEN"),
            non_empty_env("TELEGRAM_CHAT_ID"),
        ) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig { bot_token, chat_id }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::Missing {
                    var: "TELEGRAM_CHAT_ID",
                    hint: "TELEGRAM_BOT_TOKEN is set; both are needed for notifications",
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::Missing {
                    var: "TELEGRAM_BOT_TOKEN",
                    hint: "TELEGRAM_CHAT_ID is set; both are needed for notifications",
                })
            }
        };

        Ok(Self {
            database_path,
            encryption_key,
            port,
            base_url,
            telegram,
        })
    }

    /// The public URL producers POST to for a given endpoint.
    pub fn ingest_url(&self, endpoint_id: &str) -> String {
        format!("{}/h/{}", self.base_url, endpoint_id)
    }
}

fn env_or(var: &str, default: &str) -> String {
    non_empty_env(var).unwrap_or_else(|| default.to_string())
}

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
