//! On-disk storage for the hub's bearer token.
//!
//! The token is sealed with AES-256-GCM under a key derived from machine
//! identity (hostname + user). That deters casual copying of the file to
//! another machine; it is **not** a security boundary — anyone who can
//! run code as this user can recover the token. Treat file permissions
//! as the real control.

use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::HubError;

const NONCE_LEN: usize = 12;
const TOKEN_FILE: &str = "token.enc";

pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store rooted in `dir` (usually the directory holding the config).
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(TOKEN_FILE),
        }
    }

    pub fn store(&self, token: &str) -> Result<(), HubError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HubError::Credentials(format!("cannot create {}: {e}", parent.display())))?;
        }

        let cipher = machine_cipher();
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, token.as_bytes())
            .map_err(|_| HubError::Credentials("encryption failed".into()))?;

        let mut data = Vec::with_capacity(NONCE_LEN + sealed.len());
        data.extend_from_slice(&nonce);
        data.extend_from_slice(&sealed);

        std::fs::write(&self.path, STANDARD.encode(&data)).map_err(|e| {
            HubError::Credentials(format!("cannot write {}: {e}", self.path.display()))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600));
        }

        Ok(())
    }

    pub fn load(&self) -> Result<String, HubError> {
        let encoded = std::fs::read_to_string(&self.path).map_err(|_| {
            HubError::Credentials(format!(
                "no token stored at {}; run `hookly-hub set-token` first",
                self.path.display()
            ))
        })?;

        let data = STANDARD
            .decode(encoded.trim())
            .map_err(|_| HubError::Credentials("token file is corrupt".into()))?;
        if data.len() < NONCE_LEN {
            return Err(HubError::Credentials("token file is corrupt".into()));
        }

        let (nonce, sealed) = data.split_at(NONCE_LEN);
        let token = machine_cipher()
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| {
                HubError::Credentials(
                    "cannot decrypt the stored token (was it written on another machine?); \
                     run `hookly-hub set-token` again"
                        .into(),
                )
            })?;

        String::from_utf8(token)
            .map_err(|_| HubError::Credentials("token file is corrupt".into()))
    }
}

fn machine_cipher() -> Aes256Gcm {
    let key = machine_key();
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))
}

/// 32 bytes derived from hostname + user.
fn machine_key() -> [u8; 32] {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default();
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(b"hookly-hub-credential\0");
    hasher.update(host.as_bytes());
    hasher.update(b"\0");
    hasher.update(user.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_loads_a_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());

        store.store("hk_secret_token").unwrap();
        assert_eq!(store.load().unwrap(), "hk_secret_token");

        // The plaintext never hits the disk.
        let on_disk = std::fs::read_to_string(dir.path().join(TOKEN_FILE)).unwrap();
        assert!(!on_disk.contains("hk_secret_token"));
    }

    #[test]
    fn load_without_store_names_the_fix() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        let err = store.load().unwrap_err().to_string();
        assert!(err.contains("set-token"));
    }

    #[test]
    fn corrupt_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        std::fs::write(dir.path().join(TOKEN_FILE), "not base64 at all!").unwrap();
        let err = store.load().unwrap_err().to_string();
        assert!(err.contains("corrupt"));
    }
}
