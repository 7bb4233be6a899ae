//! Small helpers for email handling and single-use link tokens.

use crate::error::AuthError;
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Random token for verification and reset links.
///
/// Only the caller sees the raw value; storage keeps [`hash_link_token`].
pub(crate) fn generate_link_token() -> Result<String, AuthError> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| AuthError::Internal(format!("failed to generate token: {err}")))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

pub(crate) fn hash_link_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Frontend link carried in outbound emails, e.g. `{base}/verify-email?token=...`.
pub(crate) fn build_link(frontend_base_url: &str, path: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/{path}?token={token}")
}

/// Fallback display name: the local part of the address.
pub(crate) fn default_display_name(email_normalized: &str) -> String {
    email_normalized
        .split('@')
        .next()
        .unwrap_or(email_normalized)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
        assert!(!valid_email("a b@example.com"));
    }

    #[test]
    fn link_trims_trailing_slash() {
        assert_eq!(
            build_link("https://custodia.dev/", "verify-email", "abc"),
            "https://custodia.dev/verify-email?token=abc"
        );
    }

    #[test]
    fn tokens_are_unique_and_hashed() -> Result<()> {
        let first = generate_link_token()?;
        let second = generate_link_token()?;
        assert_ne!(first, second);
        assert_eq!(first.len(), 43);
        assert_eq!(hash_link_token(&first).len(), 32);
        assert_ne!(hash_link_token(&first), hash_link_token(&second));
        Ok(())
    }

    #[test]
    fn display_name_defaults_to_local_part() {
        assert_eq!(default_display_name("alice@example.com"), "alice");
    }
}
