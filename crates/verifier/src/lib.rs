//! Webhook signature verification.
//!
//! Decides whether a delivery's signature matches the endpoint's secret for
//! each supported provider scheme. Verification is observational: the result
//! is recorded on the stored webhook, never enforced at ingestion, so this
//! library returns a plain `bool` and treats every malformed input (missing
//! header, bad hex, unparseable timestamp, broken config) as *invalid*
//! rather than an error.
//!
//! All secret comparisons run in constant time: both sides are normalized
//! through SHA-256 before `ct_eq`, so runtime is independent of where a
//! mismatch occurs and of attacker-controlled lengths.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use hookly_domain::ProviderKind;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Maximum clock skew accepted for timestamped schemes, in seconds.
pub const DEFAULT_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Verify one delivery.
///
/// `headers` maps header names (any case) to values; lookups are
/// case-insensitive. `config` is consulted only for [`ProviderKind::Custom`].
/// `now_unix` is the verification clock, injected for testability.
pub fn verify(
    kind: ProviderKind,
    config: Option<&VerificationConfig>,
    secret: &str,
    headers: &HashMap<String, String>,
    payload: &[u8],
    now_unix: i64,
) -> bool {
    match kind {
        ProviderKind::Stripe => verify_stripe(secret, headers, payload, now_unix),
        ProviderKind::Github => verify_prefixed_hmac_sha256(
            secret,
            header(headers, "X-Hub-Signature-256"),
            payload,
        ),
        ProviderKind::Generic => verify_prefixed_hmac_sha256(
            secret,
            header(headers, "X-Webhook-Signature"),
            payload,
        ),
        ProviderKind::Telegram => {
            match header(headers, "X-Telegram-Bot-Api-Secret-Token") {
                Some(token) => ct_str_eq(token, secret),
                None => false,
            }
        }
        ProviderKind::Custom => match config {
            Some(config) => verify_custom(config, secret, headers, payload, now_unix),
            None => false,
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider schemes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stripe: `Stripe-Signature: t=<ts>,v1=<hex>[,v1=<hex>…]`.
///
/// The signed payload is `"<ts>." + body`; any matching `v1` candidate is
/// accepted. Deliveries outside the ±300 s window are invalid regardless
/// of the MAC.
fn verify_stripe(
    secret: &str,
    headers: &HashMap<String, String>,
    payload: &[u8],
    now_unix: i64,
) -> bool {
    let Some(value) = header(headers, "Stripe-Signature") else {
        return false;
    };

    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();
    for part in value.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => timestamp = ts.parse().ok(),
            Some(("v1", sig)) => candidates.push(sig),
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return false;
    };
    if (now_unix - timestamp).abs() > DEFAULT_TIMESTAMP_TOLERANCE_SECS {
        return false;
    }
    if candidates.is_empty() {
        return false;
    }

    let expected = timestamped_hmac_sha256(secret, timestamp, payload);

    // No early exit: every candidate is compared so runtime depends only
    // on the (public) candidate count.
    let mut matched = false;
    for candidate in candidates {
        matched |= hex_matches(candidate, &expected);
    }
    matched
}

/// GitHub-style check shared by `github` and `generic`:
/// a required `sha256=` prefix followed by hex HMAC-SHA256 of the body.
fn verify_prefixed_hmac_sha256(secret: &str, value: Option<&str>, payload: &[u8]) -> bool {
    let Some(value) = value else { return false };
    let Some(signature_hex) = value.strip_prefix("sha256=") else {
        return false;
    };
    hex_matches(signature_hex, &hmac_sha256(secret, payload))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Custom scheme
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Operator-supplied verification scheme for endpoints of kind `custom`.
/// Stored encrypted as JSON alongside the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    pub method: VerificationMethod,
    /// Header carrying the signature (matched case-insensitively).
    pub signature_header: String,
    /// Literal prefix to require and strip from the header value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_prefix: Option<String>,
    /// Required when `method` is `timestamped_hmac`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_header: Option<String>,
    /// Clock-skew window for `timestamped_hmac`, in seconds.
    #[serde(default = "default_tolerance")]
    pub timestamp_tolerance: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    /// Constant-time string equality between header value and secret.
    Static,
    /// Hex HMAC-SHA256 of the raw body.
    HmacSha256,
    /// Hex HMAC-SHA1 of the raw body.
    HmacSha1,
    /// Hex HMAC-SHA256 of `"<ts>." + body`, with a timestamp window.
    TimestampedHmac,
}

fn default_tolerance() -> i64 {
    DEFAULT_TIMESTAMP_TOLERANCE_SECS
}

impl VerificationConfig {
    /// Parse and validate stored config JSON. `None` means the config is
    /// unusable and the delivery must be recorded as unverified.
    pub fn from_json(bytes: &[u8]) -> Option<Self> {
        let config: Self = serde_json::from_slice(bytes).ok()?;
        config.validate().ok()?;
        Some(config)
    }

    /// Structural validation, used by the control surface to reject bad
    /// configs at write time with a named diagnostic.
    pub fn validate(&self) -> Result<(), String> {
        if self.signature_header.trim().is_empty() {
            return Err("verification_config.signature_header must not be empty".into());
        }
        if self.method == VerificationMethod::TimestampedHmac {
            match &self.timestamp_header {
                Some(h) if !h.trim().is_empty() => {}
                _ => {
                    return Err(
                        "verification_config.timestamp_header is required for timestamped_hmac"
                            .into(),
                    )
                }
            }
        }
        if self.timestamp_tolerance <= 0 {
            return Err("verification_config.timestamp_tolerance must be positive".into());
        }
        Ok(())
    }
}

fn verify_custom(
    config: &VerificationConfig,
    secret: &str,
    headers: &HashMap<String, String>,
    payload: &[u8],
    now_unix: i64,
) -> bool {
    if config.validate().is_err() {
        return false;
    }

    let Some(raw) = header(headers, &config.signature_header) else {
        return false;
    };
    let value = match &config.signature_prefix {
        Some(prefix) => match raw.strip_prefix(prefix.as_str()) {
            Some(stripped) => stripped,
            None => return false,
        },
        None => raw,
    };

    match config.method {
        VerificationMethod::Static => ct_str_eq(value, secret),
        VerificationMethod::HmacSha256 => hex_matches(value, &hmac_sha256(secret, payload)),
        VerificationMethod::HmacSha1 => hex_matches(value, &hmac_sha1(secret, payload)),
        VerificationMethod::TimestampedHmac => {
            let Some(ts_header) = &config.timestamp_header else {
                return false;
            };
            let Some(timestamp) = header(headers, ts_header).and_then(|v| v.parse::<i64>().ok())
            else {
                return false;
            };
            if (now_unix - timestamp).abs() > config.timestamp_tolerance {
                return false;
            }
            hex_matches(value, &timestamped_hmac_sha256(secret, timestamp, payload))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Primitives
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Case-insensitive header lookup.
fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn hmac_sha256(secret: &str, payload: &[u8]) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

fn hmac_sha1(secret: &str, payload: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

fn timestamped_hmac_sha256(secret: &str, timestamp: i64, payload: &[u8]) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Compare a hex-encoded candidate against expected MAC bytes.
/// Hex-decode failure counts as a mismatch.
fn hex_matches(candidate_hex: &str, expected: &[u8]) -> bool {
    match hex::decode(candidate_hex.trim()) {
        Ok(candidate) => ct_bytes_eq(&candidate, expected),
        Err(_) => false,
    }
}

/// Constant-time equality via SHA-256 normalization: hashing both sides to
/// a fixed length lets `ct_eq` always compare 32 bytes, so neither length
/// nor mismatch position leaks.
fn ct_bytes_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

fn ct_str_eq(a: &str, b: &str) -> bool {
    ct_bytes_eq(a.as_bytes(), b.as_bytes())
}
