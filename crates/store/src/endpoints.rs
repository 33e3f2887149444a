//! Endpoint rows. Owner scoping is enforced here: mutating queries match
//! on `(id, owner_id)` so a foreign id behaves exactly like a missing one.

use chrono::{DateTime, Utc};
use hookly_domain::{Endpoint, ProviderKind};
use rusqlite::{params, OptionalExtension, Row};

use crate::{parse_ts, ts, Result, Store, StoreError};

/// Partial update for an endpoint. `None` leaves the column untouched;
/// the nested option on `verification_config` distinguishes "clear it"
/// from "keep it".
#[derive(Debug, Default)]
pub struct EndpointPatch {
    pub name: Option<String>,
    pub destination_url: Option<String>,
    pub muted: Option<bool>,
    pub provider_kind: Option<ProviderKind>,
    pub signature_secret: Option<Vec<u8>>,
    pub verification_config: Option<Option<Vec<u8>>>,
}

impl Store {
    pub fn insert_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO endpoints (id, owner_id, name, provider_kind, signature_secret,
                                    verification_config, destination_url, muted,
                                    created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                endpoint.id,
                endpoint.owner_id,
                endpoint.name,
                endpoint.provider_kind.as_str(),
                endpoint.signature_secret,
                endpoint.verification_config,
                endpoint.destination_url,
                endpoint.muted,
                ts(endpoint.created_at),
                ts(endpoint.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_endpoint(&self, id: &str) -> Result<Option<Endpoint>> {
        self.conn()?
            .query_row(
                &format!("SELECT {COLUMNS} FROM endpoints WHERE id = ?1"),
                params![id],
                row_to_endpoint,
            )
            .optional()
            .map_err(StoreError::from)?
            .transpose()
    }

    pub fn get_endpoint_owned(&self, id: &str, owner_id: &str) -> Result<Option<Endpoint>> {
        self.conn()?
            .query_row(
                &format!("SELECT {COLUMNS} FROM endpoints WHERE id = ?1 AND owner_id = ?2"),
                params![id, owner_id],
                row_to_endpoint,
            )
            .optional()
            .map_err(StoreError::from)?
            .transpose()
    }

    /// All endpoints for an owner, newest first.
    pub fn list_endpoints(&self, owner_id: &str) -> Result<Vec<Endpoint>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM endpoints
             WHERE owner_id = ?1
             ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![owner_id], row_to_endpoint)?;
        let mut endpoints = Vec::new();
        for row in rows {
            endpoints.push(row??);
        }
        Ok(endpoints)
    }

    /// Apply a patch. Returns the updated endpoint, or `None` when no row
    /// matches `(id, owner_id)`.
    pub fn update_endpoint(
        &self,
        id: &str,
        owner_id: &str,
        patch: EndpointPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Endpoint>> {
        let Some(mut endpoint) = self.get_endpoint_owned(id, owner_id)? else {
            return Ok(None);
        };

        if let Some(name) = patch.name {
            endpoint.name = name;
        }
        if let Some(url) = patch.destination_url {
            endpoint.destination_url = url;
        }
        if let Some(muted) = patch.muted {
            endpoint.muted = muted;
        }
        if let Some(kind) = patch.provider_kind {
            endpoint.provider_kind = kind;
        }
        if let Some(secret) = patch.signature_secret {
            endpoint.signature_secret = secret;
        }
        if let Some(config) = patch.verification_config {
            endpoint.verification_config = config;
        }
        endpoint.updated_at = now;

        self.conn()?.execute(
            "UPDATE endpoints
             SET name = ?2, provider_kind = ?3, signature_secret = ?4,
                 verification_config = ?5, destination_url = ?6, muted = ?7,
                 updated_at = ?8
             WHERE id = ?1 AND owner_id = ?9",
            params![
                endpoint.id,
                endpoint.name,
                endpoint.provider_kind.as_str(),
                endpoint.signature_secret,
                endpoint.verification_config,
                endpoint.destination_url,
                endpoint.muted,
                ts(endpoint.updated_at),
                owner_id,
            ],
        )?;
        Ok(Some(endpoint))
    }

    /// Delete an endpoint; its webhooks go with it (CASCADE).
    pub fn delete_endpoint(&self, id: &str, owner_id: &str) -> Result<bool> {
        let affected = self.conn()?.execute(
            "DELETE FROM endpoints WHERE id = ?1 AND owner_id = ?2",
            params![id, owner_id],
        )?;
        Ok(affected > 0)
    }
}

const COLUMNS: &str = "id, owner_id, name, provider_kind, signature_secret, \
                       verification_config, destination_url, muted, created_at, updated_at";

fn row_to_endpoint(row: &Row<'_>) -> rusqlite::Result<Result<Endpoint>> {
    let kind_raw: String = row.get(3)?;
    let created_raw: String = row.get(8)?;
    let updated_raw: String = row.get(9)?;
    Ok(build_endpoint(
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        kind_raw,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        created_raw,
        updated_raw,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_endpoint(
    id: String,
    owner_id: String,
    name: String,
    kind_raw: String,
    signature_secret: Vec<u8>,
    verification_config: Option<Vec<u8>>,
    destination_url: String,
    muted: bool,
    created_raw: String,
    updated_raw: String,
) -> Result<Endpoint> {
    Ok(Endpoint {
        id,
        owner_id,
        name,
        provider_kind: kind_raw
            .parse::<ProviderKind>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        signature_secret,
        verification_config,
        destination_url,
        muted,
        created_at: parse_ts(&created_raw)?,
        updated_at: parse_ts(&updated_raw)?,
    })
}
