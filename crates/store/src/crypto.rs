//! At-rest encryption for endpoint secrets.
//!
//! AES-256-GCM with a process-level key loaded once at startup. Each
//! ciphertext is a fresh random 96-bit nonce followed by the sealed bytes.
//! The cipher is injected wherever it is needed; nothing discovers the key
//! globally, so tests stay hermetic and key rotation is a restart.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption key must be 64 hex characters (32 bytes)")]
    BadKey,

    #[error("encryption failed")]
    Encrypt,

    /// Wrong key, truncated data, or tampering. Callers on the ingestion
    /// path record the delivery as unverified instead of failing it.
    #[error("decryption failed")]
    Decrypt,
}

#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    /// Build from a 64-hex-character key string (32 bytes).
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| CryptoError::BadKey)?;
        if bytes.len() != 32 {
            return Err(CryptoError::BadKey);
        }
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&bytes)),
        })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Encrypt)?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_LEN {
            return Err(CryptoError::Decrypt);
        }
        let (nonce, sealed) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Decrypt)
    }

    /// Decrypt a ciphertext that must contain UTF-8 (signature secrets).
    pub fn decrypt_string(&self, data: &[u8]) -> Result<String, CryptoError> {
        let plaintext = self.decrypt(data)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
    }
}
