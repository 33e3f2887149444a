//! Opaque identifier generation.
//!
//! Ids double as capability URLs (`/h/{endpoint_id}` is unauthenticated),
//! so they carry enough entropy that guessing one is not a realistic
//! attack: 48 random bytes, URL-safe base64 without padding, 64 characters.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;

const ID_BYTES: usize = 48;

/// Generate an opaque, URL-safe, 64-character identifier.
pub fn generate_id() -> String {
    let mut buf = [0u8; ID_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Generate an API bearer token. Same entropy as [`generate_id`], with a
/// recognizable prefix so leaked tokens can be scanned for.
pub fn generate_token() -> String {
    format!("hk_{}", generate_id())
}
