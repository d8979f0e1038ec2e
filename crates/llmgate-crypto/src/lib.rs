//! At-rest encryption for credential blobs, API-key hashing, and the PKCE
//! primitives used by the OAuth manager.
//!
//! The envelope is AES-256-GCM with a random 96-bit nonce prepended to the
//! ciphertext, then the whole thing base64-encoded.

mod master_key;
mod pkce;

pub use master_key::{MasterKey, MasterKeyError};
pub use pkce::PkceParams;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed: invalid key or corrupted ciphertext")]
    Decrypt,
    #[error("invalid base64 envelope: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("ciphertext too short")]
    Truncated,
}

/// Encrypt an opaque credential blob (JSON bytes) at rest.
pub fn encrypt(key: &MasterKey, plaintext: &[u8]) -> Result<String, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Encrypt)?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(combined))
}

/// Decrypt a blob produced by [`encrypt`].
pub fn decrypt(key: &MasterKey, envelope: &str) -> Result<Vec<u8>, CryptoError> {
    let combined = BASE64.decode(envelope)?;
    if combined.len() < NONCE_LEN {
        return Err(CryptoError::Truncated);
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Decrypt)?;
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::Decrypt)
}

/// One-way hash of an issued API-key secret, stored as `APIKey.key_hash`.
/// Never reversible; lookups hash the bearer token and compare.
pub fn hash_api_key(secret: &str) -> String {
    blake3::hash(secret.as_bytes()).to_hex().to_string()
}

/// Generates a fresh gateway-issued API-key secret, e.g. `lg-<32 hex chars>`.
pub fn generate_api_key_secret() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    format!("lg-{}", hex_encode(&bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_the_envelope() {
        let key = MasterKey::generate();
        let plaintext = br#"{"api_key":"sk-live-abc123"}"#;
        let encrypted = encrypt(&key, plaintext).unwrap();
        assert_ne!(encrypted.as_bytes(), plaintext);
        let decrypted = decrypt(&key, &encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let key_a = MasterKey::generate();
        let key_b = MasterKey::generate();
        let encrypted = encrypt(&key_a, b"secret").unwrap();
        assert!(decrypt(&key_b, &encrypted).is_err());
    }

    #[test]
    fn same_plaintext_yields_different_ciphertext() {
        let key = MasterKey::generate();
        let a = encrypt(&key, b"same").unwrap();
        let b = encrypt(&key, b"same").unwrap();
        assert_ne!(a, b);
        assert_eq!(decrypt(&key, &a).unwrap(), decrypt(&key, &b).unwrap());
    }

    #[test]
    fn api_key_hash_is_deterministic_and_one_way() {
        let h1 = hash_api_key("lg-abc");
        let h2 = hash_api_key("lg-abc");
        assert_eq!(h1, h2);
        assert_ne!(h1, "lg-abc");
    }
}
