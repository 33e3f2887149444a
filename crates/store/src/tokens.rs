//! API token rows. Only the SHA-256 hex digest of a token is ever stored;
//! issuance happens outside the delivery plane.

use chrono::{DateTime, Utc};
use hookly_domain::ApiToken;
use rusqlite::{params, OptionalExtension, Row};

use crate::{opt_ts, parse_opt_ts, parse_ts, ts, Result, Store, StoreError};

impl Store {
    pub fn insert_api_token(&self, token: &ApiToken) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO api_tokens (id, owner_id, token_hash, name, created_at,
                                     last_used_at, revoked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                token.id,
                token.owner_id,
                token.token_hash,
                token.name,
                ts(token.created_at),
                opt_ts(token.last_used_at),
                token.revoked,
            ],
        )?;
        Ok(())
    }

    pub fn find_token_by_hash(&self, token_hash: &str) -> Result<Option<ApiToken>> {
        self.conn()?
            .query_row(
                "SELECT id, owner_id, token_hash, name, created_at, last_used_at, revoked
                 FROM api_tokens WHERE token_hash = ?1",
                params![token_hash],
                row_to_token,
            )
            .optional()
            .map_err(StoreError::from)?
            .transpose()
    }

    pub fn touch_token(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn()?.execute(
            "UPDATE api_tokens SET last_used_at = ?2 WHERE id = ?1",
            params![id, ts(now)],
        )?;
        Ok(())
    }

    pub fn revoke_token(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn()?
            .execute("UPDATE api_tokens SET revoked = 1 WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

fn row_to_token(row: &Row<'_>) -> rusqlite::Result<Result<ApiToken>> {
    let created_raw: String = row.get(4)?;
    let last_used_raw: Option<String> = row.get(5)?;
    let id: String = row.get(0)?;
    let owner_id: String = row.get(1)?;
    let token_hash: String = row.get(2)?;
    let name: String = row.get(3)?;
    let revoked: bool = row.get(6)?;
    Ok((|| {
        Ok(ApiToken {
            id,
            owner_id,
            token_hash,
            name,
            created_at: parse_ts(&created_raw)?,
            last_used_at: parse_opt_ts(last_used_raw)?,
            revoked,
        })
    })())
}
