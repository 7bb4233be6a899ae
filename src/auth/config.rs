//! Settings for the authentication flows.

use crate::password::PasswordPolicy;

const DEFAULT_VERIFICATION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_RESET_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_FRONTEND_BASE_URL: &str = "http://localhost:8080";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    verification_ttl_seconds: i64,
    reset_ttl_seconds: i64,
    password_policy: PasswordPolicy,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            verification_ttl_seconds: DEFAULT_VERIFICATION_TTL_SECONDS,
            reset_ttl_seconds: DEFAULT_RESET_TTL_SECONDS,
            password_policy: PasswordPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_verification_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_ttl_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_reset_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_ttl_seconds = seconds.max(1);
        self
    }

    #[must_use]
    pub fn with_password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.password_policy = policy;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn verification_ttl_seconds(&self) -> i64 {
        self.verification_ttl_seconds
    }

    #[must_use]
    pub fn reset_ttl_seconds(&self) -> i64 {
        self.reset_ttl_seconds
    }

    #[must_use]
    pub fn password_policy(&self) -> &PasswordPolicy {
        &self.password_policy
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new(DEFAULT_FRONTEND_BASE_URL.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttls_are_clamped_positive() {
        let config = AuthConfig::default()
            .with_verification_ttl_seconds(0)
            .with_reset_ttl_seconds(-5);
        assert_eq!(config.verification_ttl_seconds(), 1);
        assert_eq!(config.reset_ttl_seconds(), 1);
        assert_eq!(config.frontend_base_url(), DEFAULT_FRONTEND_BASE_URL);
    }
}
