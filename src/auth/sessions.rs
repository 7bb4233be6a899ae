//! Bearer authentication, logout and session management.

use super::{
    types::{Principal, SessionView},
    AuthService,
};
use crate::{error::AuthError, store::AuditRecord};
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

impl AuthService {
    /// Resolve an access token into the calling principal.
    ///
    /// The token signature and expiry are checked first, then the session it
    /// names must still be active.
    ///
    /// # Errors
    /// `SessionInvalid` for a bad token or an inactive session.
    pub async fn authenticate(&self, access_token: &str) -> Result<Principal, AuthError> {
        let claims = self.tokens.verify_access(access_token).map_err(|err| {
            debug!("access token rejected: {err}");
            AuthError::SessionInvalid
        })?;

        let view = self.sessions.resolve(&claims, Utc::now()).await?;
        Ok(Principal {
            account_id: view.account_id,
            email: view.email,
            session_id: view.session_id,
        })
    }

    /// End the caller's session. Repeating the call is harmless.
    ///
    /// # Errors
    /// Returns an error if the durable store fails.
    pub async fn logout(&self, principal: &Principal, ip: Option<String>) -> Result<(), AuthError> {
        let now = Utc::now();
        let audit = AuditRecord::new(principal.account_id, "user.logged_out", now)
            .with_metadata(serde_json::json!({ "session_id": principal.session_id }))
            .with_ip(ip);
        let revoked = self
            .sessions
            .revoke(principal.session_id, principal.account_id, now, Some(audit))
            .await?;
        if revoked {
            info!(account_id = %principal.account_id, session_id = %principal.session_id, "logged out");
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error if the durable store fails.
    pub async fn list_sessions(&self, principal: &Principal) -> Result<Vec<SessionView>, AuthError> {
        let sessions = self
            .sessions
            .list_active(principal.account_id, Utc::now())
            .await?;
        Ok(sessions
            .iter()
            .map(|session| SessionView::new(session, principal.session_id))
            .collect())
    }

    /// Revoke one of the caller's sessions.
    ///
    /// # Errors
    /// `SessionNotFound` when the id is unknown, foreign or already revoked.
    pub async fn revoke_session(
        &self,
        principal: &Principal,
        session_id: Uuid,
        ip: Option<String>,
    ) -> Result<(), AuthError> {
        let now = Utc::now();
        let audit = AuditRecord::new(principal.account_id, "session.revoked", now)
            .with_metadata(serde_json::json!({ "session_id": session_id }))
            .with_ip(ip);
        if self
            .sessions
            .revoke(session_id, principal.account_id, now, Some(audit))
            .await?
        {
            info!(account_id = %principal.account_id, %session_id, "session revoked");
            Ok(())
        } else {
            Err(AuthError::SessionNotFound)
        }
    }

    /// Revoke every active session of the caller, optionally keeping the current one.
    /// Returns how many sessions were revoked.
    ///
    /// # Errors
    /// Returns an error if the durable store fails.
    pub async fn revoke_all_sessions(
        &self,
        principal: &Principal,
        keep_current: bool,
        ip: Option<String>,
    ) -> Result<usize, AuthError> {
        let now = Utc::now();
        let except = keep_current.then_some(principal.session_id);
        let audit = AuditRecord::new(principal.account_id, "sessions.revoked_all", now)
            .with_metadata(serde_json::json!({ "kept_current": keep_current }))
            .with_ip(ip);
        let revoked = self
            .sessions
            .revoke_all(principal.account_id, except, now, Some(audit))
            .await?;
        info!(account_id = %principal.account_id, count = revoked.len(), "sessions revoked");
        Ok(revoked.len())
    }

    /// Revoke a single refresh token owned by the caller.
    ///
    /// # Errors
    /// `InvalidOrExpiredToken` when the token is unknown, foreign or already dead.
    pub async fn revoke_refresh_token(
        &self,
        principal: &Principal,
        refresh_token: &str,
    ) -> Result<(), AuthError> {
        let value = refresh_token.trim();
        if value.is_empty() {
            return Err(AuthError::InvalidOrExpiredToken);
        }
        let hash = self.tokens.hash_refresh(value);
        if self
            .stores
            .refresh_tokens
            .revoke(&hash, principal.account_id, Utc::now())
            .await?
        {
            debug!(account_id = %principal.account_id, "refresh token revoked");
            Ok(())
        } else {
            Err(AuthError::InvalidOrExpiredToken)
        }
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

    async fn logged_in(h: &Harness, email: &str) -> Result<LoginOutcome> {
        h.service
            .register(RegisterRequest {
                email: email.to_string(),
                password: "Str0ng!Pass".to_string(),
                ..RegisterRequest::default()
            })
            .await?;
        let token = last_link_token(&h.store, "verification_link")
            .await
            .context("missing token")?;
        h.service.verify_email(&token, None).await?;
        login_again(h, email).await
    }

    async fn login_again(h: &Harness, email: &str) -> Result<LoginOutcome> {
        Ok(h.service
            .login(LoginRequest {
                email: email.to_string(),
                password: "Str0ng!Pass".to_string(),
                mfa_code: None,
                client: ClientInfo::default(),
            })
            .await?)
    }

    #[tokio::test]
    async fn authenticate_survives_cache_loss() -> Result<()> {
        let h = harness()?;
        let outcome = logged_in(&h, "alice@example.com").await?;

        let principal = h.service.authenticate(&outcome.tokens.access_token).await?;
        assert_eq!(principal.session_id, outcome.session_id);

        h.cache.flush().await;
        let again = h.service.authenticate(&outcome.tokens.access_token).await?;
        assert_eq!(again, principal);
        assert!(h.cache.session_ids().await.contains(&outcome.session_id));

        h.cache.set_available(false);
        assert_eq!(
            h.service.authenticate(&outcome.tokens.access_token).await?,
            principal
        );
        Ok(())
    }

    #[tokio::test]
    async fn logout_kills_session_and_refresh_token() -> Result<()> {
        let h = harness()?;
        let outcome = logged_in(&h, "alice@example.com").await?;
        let principal = h.service.authenticate(&outcome.tokens.access_token).await?;

        h.service.logout(&principal, None).await?;
        h.service.logout(&principal, None).await?;

        assert!(matches!(
            h.service.authenticate(&outcome.tokens.access_token).await,
            Err(AuthError::SessionInvalid)
        ));
        assert!(matches!(
            h.service.refresh(&outcome.tokens.refresh_token).await,
            Err(AuthError::InvalidOrExpiredToken)
        ));
        assert!(!h.cache.session_ids().await.contains(&outcome.session_id));
        assert_eq!(
            h.store
                .audit_actions()
                .await
                .iter()
                .filter(|action| **action == "user.logged_out")
                .count(),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn list_and_revoke_sessions() -> Result<()> {
        let h = harness()?;
        let first = logged_in(&h, "alice@example.com").await?;
        let second = login_again(&h, "alice@example.com").await?;
        let third = login_again(&h, "alice@example.com").await?;
        let principal = h.service.authenticate(&first.tokens.access_token).await?;

        let sessions = h.service.list_sessions(&principal).await?;
        assert_eq!(sessions.len(), 3);
        assert_eq!(sessions.iter().filter(|session| session.current).count(), 1);

        h.service
            .revoke_session(&principal, second.session_id, None)
            .await?;
        assert!(matches!(
            h.service
                .revoke_session(&principal, second.session_id, None)
                .await,
            Err(AuthError::SessionNotFound)
        ));

        let revoked = h.service.revoke_all_sessions(&principal, true, None).await?;
        assert_eq!(revoked, 1);
        assert!(h.service.authenticate(&third.tokens.access_token).await.is_err());
        assert!(h.service.authenticate(&first.tokens.access_token).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn foreign_sessions_cannot_be_revoked() -> Result<()> {
        let h = harness()?;
        let alice = logged_in(&h, "alice@example.com").await?;
        let bob = logged_in(&h, "bob@example.com").await?;
        let principal = h.service.authenticate(&alice.tokens.access_token).await?;

        assert!(matches!(
            h.service.revoke_session(&principal, bob.session_id, None).await,
            Err(AuthError::SessionNotFound)
        ));
        assert!(matches!(
            h.service
                .revoke_refresh_token(&principal, &bob.tokens.refresh_token)
                .await,
            Err(AuthError::InvalidOrExpiredToken)
        ));

        h.service
            .revoke_refresh_token(&principal, &alice.tokens.refresh_token)
            .await?;
        assert!(h.service.refresh(&alice.tokens.refresh_token).await.is_err());
        assert!(h.service.refresh(&bob.tokens.refresh_token).await.is_ok());
        Ok(())
    }
}
