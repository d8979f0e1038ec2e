use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use sha2::{Digest, Sha256};

const KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum MasterKeyError {
    #[error("encryption master key must be at least 32 bytes, got {0}")]
    TooShort(usize),
}

/// A 256-bit AES key. At least 32 bytes are required; keys longer than
/// that are folded down with SHA-256 so operators can supply a
/// passphrase-derived secret of any length.
#[derive(Clone)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    pub fn from_bytes(raw: &[u8]) -> Result<Self, MasterKeyError> {
        if raw.len() < KEY_LEN {
            return Err(MasterKeyError::TooShort(raw.len()));
        }
        if raw.len() == KEY_LEN {
            let mut key = [0u8; KEY_LEN];
            key.copy_from_slice(raw);
            return Ok(Self(key));
        }
        let digest = Sha256::digest(raw);
        Ok(Self(digest.into()))
    }

    /// Parses a key from hex or base64 text, falling back to raw bytes.
    pub fn from_config_str(value: &str) -> Result<Self, MasterKeyError> {
        let trimmed = value.trim();
        if trimmed.len() >= KEY_LEN * 2 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            let bytes = decode_hex(trimmed);
            return Self::from_bytes(&bytes);
        }
        if let Ok(bytes) = BASE64.decode(trimmed) {
            return Self::from_bytes(&bytes);
        }
        Self::from_bytes(trimmed.as_bytes())
    }

    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

fn decode_hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .filter_map(|i| s.get(i..i + 2))
        .filter_map(|pair| u8::from_str_radix(pair, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_keys() {
        assert!(MasterKey::from_bytes(b"too-short").is_err());
    }

    #[test]
    fn accepts_exact_32_bytes() {
        let raw = [7u8; 32];
        let key = MasterKey::from_bytes(&raw).unwrap();
        assert_eq!(key.as_bytes(), &raw);
    }

    #[test]
    fn folds_longer_keys_deterministically() {
        let raw = vec![9u8; 64];
        let a = MasterKey::from_bytes(&raw).unwrap();
        let b = MasterKey::from_bytes(&raw).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }
}
