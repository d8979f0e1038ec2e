use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// PKCE parameters for the Anthropic authorization-code flow.
#[derive(Debug, Clone)]
pub struct PkceParams {
    pub code_verifier: String,
    pub code_challenge: String,
    pub state: String,
}

impl PkceParams {
    /// `code_verifier` is 32 random bytes, base64url-encoded (no padding);
    /// `code_challenge` is `base64url(SHA-256(code_verifier))`; `state` is
    /// 32 random bytes rendered as hex.
    pub fn generate() -> Self {
        let mut verifier_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut verifier_bytes);
        let code_verifier = BASE64_URL.encode(verifier_bytes);
        let code_challenge = Self::challenge_for(&code_verifier);

        let mut state_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut state_bytes);
        let state = state_bytes.iter().fold(String::new(), |mut acc, b| {
            use std::fmt::Write;
            let _ = write!(acc, "{b:02x}");
            acc
        });

        Self {
            code_verifier,
            code_challenge,
            state,
        }
    }

    pub fn challenge_for(code_verifier: &str) -> String {
        let digest = Sha256::digest(code_verifier.as_bytes());
        BASE64_URL.encode(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `base64url(SHA-256(v))` equals the `code_challenge` sent in the
    /// auth URL, for every generated verifier.
    #[test]
    fn challenge_matches_verifier_sha256() {
        for _ in 0..16 {
            let params = PkceParams::generate();
            assert_eq!(
                params.code_challenge,
                PkceParams::challenge_for(&params.code_verifier)
            );
        }
    }

    #[test]
    fn state_is_64_hex_chars() {
        let params = PkceParams::generate();
        assert_eq!(params.state.len(), 64);
        assert!(params.state.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn verifier_and_state_are_not_reused() {
        let a = PkceParams::generate();
        let b = PkceParams::generate();
        assert_ne!(a.code_verifier, b.code_verifier);
        assert_ne!(a.state, b.state);
    }
}
