//! Opaque refresh token values and their keyed hashes.
//!
//! The raw value is returned to the client once. Only `HMAC-SHA256(pepper, value)`
//! is persisted, so a leaked table cannot be replayed without the pepper.

use super::access::TokenError;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

const REFRESH_TOKEN_BYTES: usize = 32;

#[derive(Clone)]
pub struct RefreshTokenHasher {
    mac: Hmac<Sha256>,
}

impl RefreshTokenHasher {
    /// # Errors
    /// Returns an error if the pepper cannot key the MAC.
    pub fn new(pepper: &SecretString) -> Result<Self, TokenError> {
        let mac = Hmac::<Sha256>::new_from_slice(pepper.expose_secret().as_bytes())
            .map_err(|err| TokenError::Random(err.to_string()))?;
        Ok(Self { mac })
    }

    #[must_use]
    pub fn hash(&self, value: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(value.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

/// 256 random bits, URL-safe base64 without padding.
///
/// # Errors
/// Returns an error if the OS RNG fails.
pub fn generate_refresh_value() -> Result<String, TokenError> {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| TokenError::Random(err.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}
