//! Second-factor enrollment for the authenticated caller.

use super::{types::Principal, AuthService};
use crate::{
    error::AuthError,
    totp::{MfaMethodSummary, TotpSetup},
};
use chrono::Utc;

impl AuthService {
    /// Start TOTP enrollment. The method stays inactive until [`Self::mfa_verify`].
    ///
    /// # Errors
    /// `MfaAlreadyEnabled` when TOTP is already active.
    pub async fn mfa_setup(&self, principal: &Principal) -> Result<TotpSetup, AuthError> {
        self.totp
            .setup(principal.account_id, &principal.email, Utc::now())
            .await
    }

    /// # Errors
    /// `MfaMethodNotFound` without a pending setup, `InvalidMfaCode` for a wrong code.
    pub async fn mfa_verify(
        &self,
        principal: &Principal,
        code: &str,
        ip: Option<String>,
    ) -> Result<(), AuthError> {
        self.totp
            .verify_setup(principal.account_id, code, Utc::now(), ip)
            .await
    }

    /// Remove TOTP after re-checking the account password.
    ///
    /// # Errors
    /// `InvalidCredentials` for a wrong password, `LockedOut` while the
    /// account lock is set, `MfaMethodNotFound` when nothing is configured.
    pub async fn mfa_disable(
        &self,
        principal: &Principal,
        password: &str,
        ip: Option<String>,
    ) -> Result<(), AuthError> {
        let account = self
            .stores
            .accounts
            .find_by_id(principal.account_id)
            .await?
            .ok_or(AuthError::SessionInvalid)?;
        self.recheck_password(&account, password).await?;
        self.totp.disable(account.id, Utc::now(), ip).await
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn mfa_methods(&self, principal: &Principal) -> Result<Vec<MfaMethodSummary>, AuthError> {
        self.totp.list(principal.account_id).await
    }

    /// # Errors
    /// Always `Unsupported`; security keys are not offered.
    pub fn webauthn_register(&self, principal: &Principal) -> Result<(), AuthError> {
        self.webauthn.register_begin(principal.account_id)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{harness, last_link_token, Harness};
    use super::*;
    use crate::{
        auth::{LoginOutcome, LoginRequest, RegisterRequest},
        session::ClientInfo,
    };
    use anyhow::{Context, Result};
    use totp_rs::Secret;

    const PASSWORD: &str = "Str0ng!Pass";

    async fn login(h: &Harness, code: Option<String>) -> Result<LoginOutcome, AuthError> {
        h.service
            .login(LoginRequest {
                email: "alice@example.com".to_string(),
                password: PASSWORD.to_string(),
                mfa_code: code,
                client: ClientInfo::default(),
            })
            .await
    }

    fn current_code(h: &Harness, setup: &TotpSetup) -> Result<String> {
        let secret = Secret::Encoded(setup.secret.clone())
            .to_bytes()
            .map_err(|err| anyhow::anyhow!("{err}"))?;
        Ok(h.service
            .totp
            .verifier()
            .code_at(&secret, u64::try_from(Utc::now().timestamp())?)?)
    }

    #[tokio::test]
    async fn enrolled_totp_gates_login() -> Result<()> {
        let h = harness()?;
        h.service
            .register(RegisterRequest {
                email: "alice@example.com".to_string(),
                password: PASSWORD.to_string(),
                ..RegisterRequest::default()
            })
            .await?;
        let token = last_link_token(&h.store, "verification_link")
            .await
            .context("missing token")?;
        h.service.verify_email(&token, None).await?;

        let outcome = login(&h, None).await?;
        let principal = h.service.authenticate(&outcome.tokens.access_token).await?;

        let setup = h.service.mfa_setup(&principal).await?;
        assert!(setup.otpauth_uri.starts_with("otpauth://totp/"));
        h.service
            .mfa_verify(&principal, &current_code(&h, &setup)?, None)
            .await?;

        assert!(matches!(login(&h, None).await, Err(AuthError::InvalidMfaCode)));
        let attempts = h.store.login_attempts().await;
        assert_eq!(
            attempts.last().map(|attempt| attempt.reason),
            Some(super::super::reason::MFA_REQUIRED_OR_INVALID)
        );
        login(&h, Some(current_code(&h, &setup)?)).await?;

        assert!(matches!(
            h.service.mfa_disable(&principal, "Wr0ng!Pass", None).await,
            Err(AuthError::InvalidCredentials)
        ));
        h.service.mfa_disable(&principal, PASSWORD, None).await?;
        assert!(h.service.mfa_methods(&principal).await?.is_empty());
        login(&h, None).await?;

        assert!(matches!(
            h.service.webauthn_register(&principal),
            Err(AuthError::Unsupported("webauthn"))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_on_disable_counts_toward_the_lock() -> Result<()> {
        let h = harness()?;
        h.service
            .register(RegisterRequest {
                email: "alice@example.com".to_string(),
                password: PASSWORD.to_string(),
                ..RegisterRequest::default()
            })
            .await?;
        let token = last_link_token(&h.store, "verification_link")
            .await
            .context("missing token")?;
        h.service.verify_email(&token, None).await?;
        let outcome = login(&h, None).await?;
        let principal = h.service.authenticate(&outcome.tokens.access_token).await?;

        for _ in 0..crate::rate_limit::LOCK_THRESHOLD {
            assert!(matches!(
                h.service.mfa_disable(&principal, "Wr0ng!Pass", None).await,
                Err(AuthError::InvalidCredentials)
            ));
        }
        assert_eq!(
            h.service.limiter().failures("alice@example.com").await?,
            crate::rate_limit::LOCK_THRESHOLD
        );
        assert!(matches!(
            h.service.mfa_disable(&principal, PASSWORD, None).await,
            Err(AuthError::LockedOut { .. })
        ));
        Ok(())
    }
}
