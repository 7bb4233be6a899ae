//! HS256 access tokens bound to an account and a session.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_ACCESS_TTL_SECONDS: u64 = 15 * 60;
pub const DEFAULT_REFRESH_TTL_SECONDS: u64 = 30 * 24 * 60 * 60;
pub const DEFAULT_ISSUER: &str = "custodia";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("failed to generate random token: {0}")]
    Random(String),
    #[error("token lifetime out of range")]
    Lifetime,
}

#[derive(Clone, Debug)]
pub struct TokenConfig {
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            access_ttl: Duration::from_secs(DEFAULT_ACCESS_TTL_SECONDS),
            refresh_ttl: Duration::from_secs(DEFAULT_REFRESH_TTL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: u64) -> Self {
        self.access_ttl = Duration::from_secs(seconds.max(1));
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: u64) -> Self {
        self.refresh_ttl = Duration::from_secs(seconds.max(1));
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Claims carried by an access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Account id.
    pub sub: Uuid,
    /// Session id.
    pub sid: Uuid,
    pub email: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

#[derive(Clone, Debug)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies access tokens.
#[derive(Clone)]
pub struct AccessTokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    config: TokenConfig,
}

impl AccessTokenSigner {
    #[must_use]
    pub fn new(secret: &SecretString, config: TokenConfig) -> Self {
        let key = secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer()]);
        validation.set_required_spec_claims(&["exp", "iat", "sub", "iss"]);
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            validation,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Sign a token valid from `now` for the configured access lifetime.
    ///
    /// # Errors
    /// Returns an error if the lifetime overflows or signing fails.
    pub fn issue(
        &self,
        account_id: Uuid,
        email: &str,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AccessToken, TokenError> {
        let ttl = ChronoDuration::from_std(self.config.access_ttl).map_err(|_| TokenError::Lifetime)?;
        let expires_at = now.checked_add_signed(ttl).ok_or(TokenError::Lifetime)?;
        let claims = AccessClaims {
            sub: account_id,
            sid: session_id,
            email: email.to_string(),
            iss: self.config.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(AccessToken { token, expires_at })
    }

    /// Verify signature, issuer and expiry.
    ///
    /// # Errors
    /// Returns an error for any invalid, expired or foreign token.
    pub fn verify(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let data = decode::<AccessClaims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims)
    }
}
