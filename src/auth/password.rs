//! Password reset and password change.

use super::{
    types::Principal,
    utils::{build_link, generate_link_token, hash_link_token, normalize_email, valid_email},
    AuthService,
};
use crate::{
    error::AuthError,
    outbox::NewOutboxEvent,
    store::{AccountStatus, AuditRecord, PasswordReset},
};
use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

const RESET_PATH: &str = "reset-password";

impl AuthService {
    /// Queue a reset link for the account behind `email`.
    ///
    /// Always succeeds for well-formed input so the endpoint does not reveal
    /// which addresses are registered.
    ///
    /// # Errors
    /// `InvalidEmail` for malformed input, or a store failure.
    pub async fn request_password_reset(
        &self,
        email: &str,
        ip: Option<String>,
    ) -> Result<(), AuthError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }

        let Some(account) = self
            .stores
            .accounts
            .find_by_email(&email)
            .await?
            .filter(|account| account.status == AccountStatus::Active)
        else {
            debug!("password reset requested for unknown or inactive email");
            return Ok(());
        };

        let now = Utc::now();
        let token = generate_link_token()?;
        let expires_at = now + ChronoDuration::seconds(self.config.reset_ttl_seconds());
        let link = build_link(self.config.frontend_base_url(), RESET_PATH, &token);

        let reset = PasswordReset {
            id: Uuid::new_v4(),
            account_id: account.id,
            token_hash: hash_link_token(&token),
            expires_at,
            consumed_at: None,
            created_at: now,
        };
        let audit = AuditRecord::new(account.id, "password.reset_requested", now).with_ip(ip);
        let event = NewOutboxEvent::password_reset_requested(account.id, &email, &link, expires_at);

        self.stores
            .accounts
            .create_password_reset(reset, audit, event)
            .await?;
        info!(account_id = %account.id, "password reset requested");
        Ok(())
    }

    /// Set a new password from a reset link.
    ///
    /// The link is single-use and only honored for active accounts. Every session of the account is revoked and the
    /// login throttling state is cleared.
    ///
    /// # Errors
    /// `WeakPassword` for a policy violation, `InvalidOrExpiredToken` for an
    /// unknown, used or expired link.
    pub async fn confirm_password_reset(
        &self,
        token: &str,
        new_password: &str,
        ip: Option<String>,
    ) -> Result<(), AuthError> {
        if let Some(violation) = self.config.password_policy().violation(new_password) {
            return Err(AuthError::WeakPassword(violation));
        }
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidOrExpiredToken);
        }

        let now = Utc::now();
        let reset = self
            .stores
            .accounts
            .find_password_reset(&hash_link_token(token), now)
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;
        let account = self
            .stores
            .accounts
            .find_by_id(reset.account_id)
            .await?
            .filter(|account| account.status == AccountStatus::Active)
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        let password_hash = self.hasher.hash(new_password).await?;
        let audit = AuditRecord::new(account.id, "password.changed", now)
            .with_metadata(serde_json::json!({ "via": "reset" }))
            .with_ip(ip);
        let event = NewOutboxEvent::password_changed(account.id, &account.email, now);
        if !self
            .stores
            .accounts
            .complete_password_reset(reset.id, &password_hash, now, audit, event)
            .await?
        {
            return Err(AuthError::InvalidOrExpiredToken);
        }

        let revoked = self.sessions.revoke_all(account.id, None, now, None).await?;
        self.clear_failures(&account.email).await;
        info!(account_id = %account.id, sessions = revoked.len(), "password reset completed");
        Ok(())
    }

    /// Change the password of the authenticated caller.
    ///
    /// Other sessions are revoked; the calling session stays.
    ///
    /// # Errors
    /// `InvalidCredentials` when the current password is wrong, `LockedOut`
    /// while the account lock is set, `WeakPassword` for a policy violation.
    pub async fn change_password(
        &self,
        principal: &Principal,
        current_password: &str,
        new_password: &str,
        ip: Option<String>,
    ) -> Result<(), AuthError> {
        let account = self
            .stores
            .accounts
            .find_by_id(principal.account_id)
            .await?
            .ok_or(AuthError::SessionInvalid)?;

        self.recheck_password(&account, current_password).await?;
        if let Some(violation) = self.config.password_policy().violation(new_password) {
            return Err(AuthError::WeakPassword(violation));
        }

        let now = Utc::now();
        let password_hash = self.hasher.hash(new_password).await?;
        let audit = AuditRecord::new(account.id, "password.changed", now)
            .with_metadata(serde_json::json!({ "via": "change" }))
            .with_ip(ip);
        let event = NewOutboxEvent::password_changed(account.id, &account.email, now);
        self.stores
            .accounts
            .update_password(account.id, &password_hash, audit, event)
            .await?;

        let revoked = self
            .sessions
            .revoke_all(account.id, Some(principal.session_id), now, None)
            .await?;
        info!(account_id = %account.id, sessions = revoked.len(), "password changed");
        Ok(())
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

    const PASSWORD: &str = "Str0ng!Pass";
    const NEXT: &str = "N3w!Secret";

    async fn login(h: &Harness, password: &str) -> Result<LoginOutcome, AuthError> {
        h.service
            .login(LoginRequest {
                email: "alice@example.com".to_string(),
                password: password.to_string(),
                mfa_code: None,
                client: ClientInfo::default(),
            })
            .await
    }

    async fn alice(h: &Harness) -> Result<LoginOutcome> {
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
        Ok(login(h, PASSWORD).await?)
    }

    #[tokio::test]
    async fn reset_is_single_use_and_revokes_sessions() -> Result<()> {
        let h = harness()?;
        let outcome = alice(&h).await?;

        h.service.request_password_reset("nobody@example.com", None).await?;
        h.service.request_password_reset("alice@example.com", None).await?;
        let token = last_link_token(&h.store, "reset_link")
            .await
            .context("missing reset token")?;

        assert!(matches!(
            h.service.confirm_password_reset(&token, "weak", None).await,
            Err(AuthError::WeakPassword(_))
        ));
        h.service.confirm_password_reset(&token, NEXT, None).await?;
        assert!(matches!(
            h.service.confirm_password_reset(&token, NEXT, None).await,
            Err(AuthError::InvalidOrExpiredToken)
        ));

        assert!(h.service.authenticate(&outcome.tokens.access_token).await.is_err());
        assert!(matches!(
            login(&h, PASSWORD).await,
            Err(AuthError::InvalidCredentials)
        ));
        login(&h, NEXT).await?;

        let events: Vec<String> = h
            .store
            .outbox_records()
            .await
            .into_iter()
            .map(|record| record.event_type)
            .collect();
        assert!(events.contains(&"PasswordResetRequested".to_string()));
        assert!(events.contains(&"PasswordChanged".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn reset_link_is_refused_for_inactive_accounts() -> Result<()> {
        let h = harness()?;
        let outcome = alice(&h).await?;
        h.service.request_password_reset("alice@example.com", None).await?;
        let token = last_link_token(&h.store, "reset_link")
            .await
            .context("missing reset token")?;

        h.store
            .set_status(outcome.account.id, AccountStatus::Disabled)
            .await;
        assert!(matches!(
            h.service.confirm_password_reset(&token, NEXT, None).await,
            Err(AuthError::InvalidOrExpiredToken)
        ));

        // The link was not consumed and still works once the account is back.
        h.store
            .set_status(outcome.account.id, AccountStatus::Active)
            .await;
        h.service.confirm_password_reset(&token, NEXT, None).await?;
        Ok(())
    }

    #[tokio::test]
    async fn wrong_current_password_counts_toward_the_lock() -> Result<()> {
        let h = harness()?;
        let outcome = alice(&h).await?;
        let principal = h.service.authenticate(&outcome.tokens.access_token).await?;

        for _ in 0..crate::rate_limit::LOCK_THRESHOLD {
            assert!(matches!(
                h.service
                    .change_password(&principal, "Wr0ng!Pass", NEXT, None)
                    .await,
                Err(AuthError::InvalidCredentials)
            ));
        }
        assert!(matches!(
            h.service
                .change_password(&principal, PASSWORD, NEXT, None)
                .await,
            Err(AuthError::LockedOut { .. })
        ));
        assert!(matches!(login(&h, PASSWORD).await, Err(AuthError::LockedOut { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn change_keeps_current_session_only() -> Result<()> {
        let h = harness()?;
        let first = alice(&h).await?;
        let second = login(&h, PASSWORD).await?;
        let principal = h.service.authenticate(&first.tokens.access_token).await?;

        assert!(matches!(
            h.service
                .change_password(&principal, "Wr0ng!Pass", NEXT, None)
                .await,
            Err(AuthError::InvalidCredentials)
        ));
        h.service
            .change_password(&principal, PASSWORD, NEXT, None)
            .await?;

        assert!(h.service.authenticate(&first.tokens.access_token).await.is_ok());
        assert!(h.service.authenticate(&second.tokens.access_token).await.is_err());
        assert!(h
            .store
            .audit_actions()
            .await
            .contains(&"password.changed"));
        Ok(())
    }
}
