//! Password hashing (Argon2id, PHC strings) and the strength policy applied on
//! registration and password changes.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use thiserror::Error;

pub const DEFAULT_MIN_LENGTH: usize = 8;
pub const DEFAULT_MIN_CLASSES: usize = 3;
pub const MAX_LENGTH: usize = 128;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("invalid argon2 parameters: {0}")]
    Params(String),
    #[error("failed to hash password: {0}")]
    Hash(String),
    #[error("hashing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Minimum length plus how many of {upper, lower, digit, symbol} must appear.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PasswordPolicy {
    min_length: usize,
    min_classes: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_LENGTH,
            min_classes: DEFAULT_MIN_CLASSES,
        }
    }
}

impl PasswordPolicy {
    #[must_use]
    pub fn new(min_length: usize, min_classes: usize) -> Self {
        Self {
            min_length: min_length.max(1),
            min_classes: min_classes.min(4),
        }
    }

    /// Returns a user-facing reason when the password does not satisfy the policy.
    #[must_use]
    pub fn violation(&self, password: &str) -> Option<String> {
        let length = password.chars().count();
        if length < self.min_length {
            return Some(format!(
                "Password must be at least {} characters long",
                self.min_length
            ));
        }
        if length > MAX_LENGTH {
            return Some(format!("Password must be at most {MAX_LENGTH} characters long"));
        }

        let classes = [
            password.chars().any(char::is_uppercase),
            password.chars().any(char::is_lowercase),
            password.chars().any(|c| c.is_ascii_digit()),
            password
                .chars()
                .any(|c| !c.is_alphanumeric() && !c.is_whitespace()),
        ]
        .into_iter()
        .filter(|present| *present)
        .count();

        if classes < self.min_classes {
            return Some(format!(
                "Password must contain at least {} of: uppercase letter, lowercase letter, digit, symbol",
                self.min_classes
            ));
        }
        None
    }
}

/// Argon2id hasher. Work runs on the blocking pool so request tasks are not stalled.
#[derive(Clone, Debug)]
pub struct PasswordHasher {
    params: Params,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl PasswordHasher {
    /// Build a hasher with explicit cost parameters (memory in KiB, iterations, lanes).
    ///
    /// # Errors
    /// Returns an error if the parameters are rejected by argon2.
    pub fn with_cost(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, PasswordError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|err| PasswordError::Params(err.to_string()))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password into a PHC string.
    ///
    /// # Errors
    /// Returns an error if hashing fails or the blocking task panics.
    pub async fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let argon2 = self.argon2();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|err| PasswordError::Hash(err.to_string()))
        })
        .await?
    }

    /// Verify a password against a stored PHC string.
    ///
    /// A malformed stored hash verifies as `false`.
    ///
    /// # Errors
    /// Returns an error only if the blocking task panics.
    pub async fn verify(&self, password: &str, stored: &str) -> Result<bool, PasswordError> {
        let argon2 = self.argon2();
        let password = password.to_owned();
        let stored = stored.to_owned();
        tokio::task::spawn_blocking(move || {
            PasswordHash::new(&stored).is_ok_and(|parsed| {
                argon2
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
        })
        .await
        .map_err(PasswordError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn fast_hasher() -> Result<PasswordHasher> {
        Ok(PasswordHasher::with_cost(1024, 1, 1)?)
    }

    #[test]
    fn policy_accepts_three_of_four_classes() {
        let policy = PasswordPolicy::default();
        assert_eq!(policy.violation("Str0ng!Pass"), None);
        assert_eq!(policy.violation("lowercase1!"), None);
        assert_eq!(policy.violation("NoDigitsHere!"), None);
    }

    #[test]
    fn policy_rejects_short_or_uniform_passwords() {
        let policy = PasswordPolicy::default();
        assert!(policy.violation("Sh0rt!").is_some());
        assert!(policy.violation("alllowercase").is_some());
        assert!(policy.violation("lowercase123").is_some());
    }

    #[test]
    fn policy_respects_configuration() {
        let policy = PasswordPolicy::new(4, 1);
        assert_eq!(policy.violation("abcd"), None);
        assert!(policy.violation("abc").is_some());
    }

    #[tokio::test]
    async fn hash_and_verify() -> Result<()> {
        let hasher = fast_hasher()?;
        let hash = hasher.hash("Str0ng!Pass").await?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("Str0ng!Pass", &hash).await?);
        assert!(!hasher.verify("Wr0ng!Pass", &hash).await?);
        Ok(())
    }

    #[tokio::test]
    async fn hashes_are_salted() -> Result<()> {
        let hasher = fast_hasher()?;
        let first = hasher.hash("Str0ng!Pass").await?;
        let second = hasher.hash("Str0ng!Pass").await?;
        assert_ne!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_hash_does_not_verify() -> Result<()> {
        let hasher = fast_hasher()?;
        assert!(!hasher.verify("Str0ng!Pass", "not-a-phc-string").await?);
        Ok(())
    }
}
