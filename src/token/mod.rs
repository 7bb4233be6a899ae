//! Access and refresh token issuance.

pub mod access;
pub mod refresh;
pub mod repo;

pub use access::{AccessClaims, AccessToken, AccessTokenSigner, TokenConfig, TokenError};
pub use refresh::{generate_refresh_value, RefreshTokenHasher};
pub use repo::{RefreshTokenRecord, RefreshTokenStore};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::SecretString;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Token pair handed to the client after login or refresh.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenIssuer {
    signer: AccessTokenSigner,
    hasher: RefreshTokenHasher,
}

impl TokenIssuer {
    /// # Errors
    /// Returns an error if the refresh pepper cannot key the MAC.
    pub fn new(
        jwt_secret: &SecretString,
        refresh_pepper: &SecretString,
        config: TokenConfig,
    ) -> Result<Self, TokenError> {
        Ok(Self {
            signer: AccessTokenSigner::new(jwt_secret, config),
            hasher: RefreshTokenHasher::new(refresh_pepper)?,
        })
    }

    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        self.signer.config()
    }

    /// Mint an access token and a fresh refresh token for a session.
    ///
    /// The refresh token never outlives its session. The returned record holds
    /// only the hash and is what the caller persists.
    ///
    /// # Errors
    /// Returns an error if signing or random generation fails.
    pub fn issue(
        &self,
        account_id: Uuid,
        email: &str,
        session_id: Uuid,
        session_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(IssuedTokens, RefreshTokenRecord), TokenError> {
        let access = self.signer.issue(account_id, email, session_id, now)?;

        let refresh_ttl =
            ChronoDuration::from_std(self.config().refresh_ttl()).map_err(|_| TokenError::Lifetime)?;
        let refresh_expires_at = now
            .checked_add_signed(refresh_ttl)
            .ok_or(TokenError::Lifetime)?
            .min(session_expires_at);
        let refresh_value = generate_refresh_value()?;

        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            session_id,
            account_id,
            token_hash: self.hasher.hash(&refresh_value),
            issued_at: now,
            expires_at: refresh_expires_at,
            consumed_at: None,
            revoked_at: None,
        };

        Ok((
            IssuedTokens {
                access_token: access.token,
                refresh_token: refresh_value,
                token_type: "Bearer",
                expires_at: access.expires_at,
                refresh_expires_at,
            },
            record,
        ))
    }

    /// # Errors
    /// Returns an error for any invalid, expired or foreign token.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.signer.verify(token)
    }

    #[must_use]
    pub fn hash_refresh(&self, value: &str) -> Vec<u8> {
        self.hasher.hash(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn issuer() -> Result<TokenIssuer> {
        Ok(TokenIssuer::new(
            &SecretString::from("jwt-secret".to_string()),
            &SecretString::from("pepper".to_string()),
            TokenConfig::new(),
        )?)
    }

    #[test]
    fn refresh_record_stores_hash_not_value() -> Result<()> {
        let issuer = issuer()?;
        let now = Utc::now();
        let session_id = Uuid::new_v4();
        let (tokens, record) = issuer.issue(
            Uuid::new_v4(),
            "alice@example.com",
            session_id,
            now + ChronoDuration::days(60),
            now,
        )?;

        assert_ne!(record.token_hash, tokens.refresh_token.as_bytes());
        assert_eq!(record.token_hash, issuer.hash_refresh(&tokens.refresh_token));
        assert_eq!(record.session_id, session_id);
        assert!(record.is_usable(now));
        assert_eq!(issuer.verify_access(&tokens.access_token)?.sid, session_id);
        Ok(())
    }

    #[test]
    fn refresh_never_outlives_session() -> Result<()> {
        let issuer = issuer()?;
        let now = Utc::now();
        let session_expires_at = now + ChronoDuration::hours(1);
        let (tokens, record) =
            issuer.issue(Uuid::new_v4(), "a@b.io", Uuid::new_v4(), session_expires_at, now)?;
        assert_eq!(record.expires_at, session_expires_at);
        assert_eq!(tokens.refresh_expires_at, session_expires_at);
        Ok(())
    }
}
