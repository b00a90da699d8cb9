// Minimal PKCE helper for S256 challenge
use base64::{engine::general_purpose, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Verifier/challenge pair for one login attempt. Never persisted.
#[derive(Debug)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn new() -> Result<Self> {
        let verifier = random_url_safe(64)?;
        // The challenge hashes the encoded verifier string, not the raw
        // random bytes.
        let hash = Sha256::digest(verifier.as_bytes());
        let challenge = general_purpose::URL_SAFE_NO_PAD.encode(hash);
        Ok(Self { verifier, challenge })
    }
}

/// n cryptographically random bytes, base64url encoded without padding.
/// Used for the PKCE verifier and for the anti-CSRF state parameter.
pub fn random_url_safe(n: usize) -> Result<String> {
    let mut buf = vec![0u8; n];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| Error::Config(format!("entropy source failure: {}", e)))?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(buf))
}
