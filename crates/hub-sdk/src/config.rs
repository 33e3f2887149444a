//! Hub configuration, loaded from a YAML file.
//!
//! ```yaml
//! edge_url: https://hooks.example.com
//! hub_id: build-box          # defaults to the machine hostname
//! endpoints:
//!   - id: <endpoint_id>
//!     destination: http://localhost:3000/hooks   # optional override
//! ```
//!
//! The bearer token is *not* part of the YAML; see
//! [`CredentialStore`](crate::credentials::CredentialStore).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::HubError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Base URL of the edge, http(s).
    pub edge_url: String,

    /// This hub's self-chosen identifier. Reconnecting under the same id
    /// supersedes the previous connection.
    #[serde(default = "default_hub_id")]
    pub hub_id: String,

    #[serde(default)]
    pub endpoints: Vec<EndpointRoute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointRoute {
    pub id: String,
    /// Local URL overriding the endpoint's default destination.
    #[serde(default)]
    pub destination: Option<String>,
}

fn default_hub_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "hookly-hub".to_string())
}

impl HubConfig {
    pub fn load(path: &Path) -> Result<Self, HubError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HubError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_yaml::from_str(&raw)
            .map_err(|e| HubError::Config(format!("{} is not valid YAML: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation: misconfiguration stops the process with a
    /// named diagnostic instead of failing later mid-connection.
    pub fn validate(&self) -> Result<(), HubError> {
        let parsed = url::Url::parse(&self.edge_url)
            .map_err(|e| HubError::Config(format!("edge_url is not a valid URL: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(HubError::Config(format!(
                "edge_url must be http or https, got {:?}",
                parsed.scheme()
            )));
        }
        if self.hub_id.trim().is_empty() {
            return Err(HubError::Config("hub_id must not be empty".into()));
        }
        if self.endpoints.is_empty() {
            return Err(HubError::Config(
                "at least one endpoint must be configured".into(),
            ));
        }
        for route in &self.endpoints {
            if route.id.trim().is_empty() {
                return Err(HubError::Config("endpoint id must not be empty".into()));
            }
            if let Some(destination) = &route.destination {
                url::Url::parse(destination).map_err(|e| {
                    HubError::Config(format!(
                        "destination for endpoint {} is not a valid URL: {e}",
                        route.id
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// The WebSocket URL of the edge's relay endpoint.
    pub fn ws_url(&self) -> String {
        let base = self.edge_url.trim_end_matches('/');
        let switched = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{switched}/relay/ws")
    }

    pub fn endpoint_ids(&self) -> Vec<String> {
        self.endpoints.iter().map(|r| r.id.clone()).collect()
    }

    /// endpoint_id → local destination override.
    pub fn destination_overrides(&self) -> HashMap<String, String> {
        self.endpoints
            .iter()
            .filter_map(|r| r.destination.clone().map(|d| (r.id.clone(), d)))
            .collect()
    }
}
