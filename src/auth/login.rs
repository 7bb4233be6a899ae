//! Login and refresh-token rotation.

use super::{
    reason,
    types::{AccountView, LoginOutcome, LoginRequest},
    utils::normalize_email,
    AuthService,
};
use crate::{
    error::AuthError,
    store::{Account, AccountStatus},
    token::IssuedTokens,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Which rejections feed the throttling counter.
fn counts_as_failure(err: &AuthError) -> bool {
    matches!(
        err,
        AuthError::InvalidCredentials | AuthError::UserNotFound | AuthError::InvalidMfaCode
    )
}

fn lifecycle_rejection(account: &Account, now: DateTime<Utc>) -> Option<(AuthError, &'static str)> {
    match account.status {
        AccountStatus::Deleted => Some((AuthError::UserNotFound, reason::USER_NOT_FOUND)),
        AccountStatus::Disabled => Some((AuthError::AccountDisabled, reason::ACCOUNT_DISABLED)),
        _ if account.is_locked_at(now) => Some((AuthError::AccountLocked, reason::ACCOUNT_LOCKED)),
        _ if !account.is_verified() => {
            Some((AuthError::EmailNotVerified, reason::EMAIL_NOT_VERIFIED))
        }
        _ => None,
    }
}

impl AuthService {
    /// Authenticate with email and password (plus a TOTP code when enrolled)
    /// and open a new session.
    ///
    /// # Errors
    /// `RateLimited` or `LockedOut` from the throttling gate;
    /// `InvalidCredentials` for unknown emails and wrong passwords;
    /// `EmailNotVerified`, `AccountLocked`, `AccountDisabled` for accounts that
    /// may not log in; `InvalidMfaCode` when the second factor is missing or wrong.
    pub async fn login(&self, request: LoginRequest) -> Result<LoginOutcome, AuthError> {
        let email = normalize_email(&request.email);
        if email.is_empty() || request.password.is_empty() {
            return Err(AuthError::Validation(
                "email and password are required".to_string(),
            ));
        }

        let ip = request.client.ip.as_deref();
        let now = Utc::now();

        let rate_limit = match self.limiter.check_login(&email, ip, now).await {
            Ok(status) => status,
            Err(err) => {
                let code = match err {
                    AuthError::LockedOut { .. } => reason::LOCKED_OUT,
                    AuthError::RateLimited(_) => reason::RATE_LIMITED,
                    _ => reason::INTERNAL_ERROR,
                };
                self.record_attempt(None, &email, ip, false, code, now).await;
                return Err(err);
            }
        };

        let account = match self.authenticate_credentials(&email, &request, now).await {
            Ok(account) => account,
            Err((err, code, account_id)) => {
                self.record_attempt(account_id, &email, ip, false, code, now).await;
                if counts_as_failure(&err) {
                    self.count_failure(&email).await;
                }
                debug!(email, reason = code, "login rejected");
                return Err(err);
            }
        };

        let (session_id, tokens) = match self.open_session(&account, &request, now).await {
            Ok(opened) => opened,
            Err(err) => {
                self.record_attempt(Some(account.id), &email, ip, false, reason::INTERNAL_ERROR, now)
                    .await;
                return Err(err);
            }
        };

        self.record_attempt(Some(account.id), &email, ip, true, reason::SUCCESS, now)
            .await;
        if let Err(err) = self.stores.accounts.record_login(account.id, ip, now).await {
            warn!(account_id = %account.id, "failed to record last login: {err}");
        }
        self.clear_failures(&email).await;

        info!(account_id = %account.id, %session_id, "login succeeded");
        let mut view = AccountView::from(&account);
        view.last_login_at = Some(now);
        Ok(LoginOutcome {
            account: view,
            session_id,
            tokens,
            rate_limit,
        })
    }

    /// Lookup, lifecycle gate, password check, then the second factor.
    async fn authenticate_credentials(
        &self,
        email: &str,
        request: &LoginRequest,
        now: DateTime<Utc>,
    ) -> Result<Account, (AuthError, &'static str, Option<Uuid>)> {
        let internal = |err: AuthError| (err, reason::INTERNAL_ERROR, None);

        let Some(account) = self
            .stores
            .accounts
            .find_by_email(email)
            .await
            .map_err(|err| internal(err.into()))?
        else {
            return Err((AuthError::InvalidCredentials, reason::INVALID_CREDENTIALS, None));
        };

        if let Some((err, code)) = lifecycle_rejection(&account, now) {
            return Err((err, code, Some(account.id)));
        }

        let matches = self
            .hasher
            .verify(&request.password, &account.password_hash)
            .await
            .map_err(|err| (err.into(), reason::INTERNAL_ERROR, Some(account.id)))?;
        if !matches {
            return Err((
                AuthError::InvalidCredentials,
                reason::INVALID_CREDENTIALS,
                Some(account.id),
            ));
        }

        match self
            .totp
            .verify_login(account.id, request.mfa_code.as_deref(), now)
            .await
        {
            Ok(_) => Ok(account),
            Err(AuthError::InvalidMfaCode) => Err((
                AuthError::InvalidMfaCode,
                reason::MFA_REQUIRED_OR_INVALID,
                Some(account.id),
            )),
            Err(err) => Err((err, reason::INTERNAL_ERROR, Some(account.id))),
        }
    }

    /// Durable session (cache best-effort) and the token pair.
    async fn open_session(
        &self,
        account: &Account,
        request: &LoginRequest,
        now: DateTime<Utc>,
    ) -> Result<(Uuid, IssuedTokens), AuthError> {
        let session = self
            .sessions
            .create(account.id, &account.email, &request.client, now)
            .await?;
        let (tokens, record) =
            self.tokens
                .issue(account.id, &account.email, session.id, session.expires_at, now)?;
        self.stores.refresh_tokens.insert(&record).await?;
        Ok((session.id, tokens))
    }

    /// Rotate a refresh token: consume it, then mint a new pair for the same session.
    ///
    /// # Errors
    /// `InvalidOrExpiredToken` for every rejection (unknown, consumed,
    /// revoked, expired, or a session that is no longer active).
    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, AuthError> {
        let value = refresh_token.trim();
        if value.is_empty() {
            return Err(AuthError::InvalidOrExpiredToken);
        }

        let now = Utc::now();
        let hash = self.tokens.hash_refresh(value);
        let Some(record) = self.stores.refresh_tokens.consume(&hash, now).await? else {
            debug!("refresh token rejected");
            return Err(AuthError::InvalidOrExpiredToken);
        };

        let session = self
            .sessions
            .find_active(record.session_id, now)
            .await?
            .filter(|session| session.account_id == record.account_id)
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        let account = self
            .stores
            .accounts
            .find_by_id(record.account_id)
            .await?
            .filter(|account| lifecycle_rejection(account, now).is_none())
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        let (tokens, next) =
            self.tokens
                .issue(account.id, &account.email, session.id, session.expires_at, now)?;
        self.stores.refresh_tokens.insert(&next).await?;

        debug!(account_id = %account.id, session_id = %session.id, "refresh token rotated");
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{harness, last_link_token, Harness};
    use super::*;
    use crate::{
        auth::RegisterRequest,
        session::ClientInfo,
        store::AccountStore,
    };
    use anyhow::{Context, Result};

    const PASSWORD: &str = "Str0ng!Pass";

    async fn verified(h: &Harness, email: &str) -> Result<AccountView> {
        h.service
            .register(RegisterRequest {
                email: email.to_string(),
                password: PASSWORD.to_string(),
                ..RegisterRequest::default()
            })
            .await?;
        let token = last_link_token(&h.store, "verification_link")
            .await
            .context("missing token")?;
        Ok(h.service.verify_email(&token, None).await?)
    }

    fn login(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            mfa_code: None,
            client: ClientInfo {
                user_agent: Some("test-agent".to_string()),
                ip: Some("198.51.100.7".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn login_creates_durable_and_cached_session() -> Result<()> {
        let h = harness()?;
        let account = verified(&h, "alice@example.com").await?;

        let outcome = h.service.login(login("ALICE@example.com", PASSWORD)).await?;
        assert_eq!(outcome.account.id, account.id);
        assert!(outcome.account.last_login_at.is_some());

        let session = h
            .store
            .session(outcome.session_id)
            .await
            .context("missing durable session")?;
        assert_eq!(session.user_agent.as_deref(), Some("test-agent"));
        assert!(h.cache.session_ids().await.contains(&outcome.session_id));
        assert_eq!(h.store.refresh_tokens_for(outcome.session_id).await.len(), 1);

        let attempts = h.store.login_attempts().await;
        let last = attempts.last().context("missing attempt")?;
        assert!(last.success);
        assert_eq!(last.reason, reason::SUCCESS);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() -> Result<()> {
        let h = harness()?;
        verified(&h, "alice@example.com").await?;

        let unknown = h.service.login(login("nobody@example.com", PASSWORD)).await;
        let wrong = h.service.login(login("alice@example.com", "Wr0ng!Pass")).await;
        assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
        assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));

        let attempts = h.store.login_attempts().await;
        assert_eq!(attempts.len(), 2);
        assert!(attempts[0].account_id.is_none());
        assert!(attempts[1].account_id.is_some());
        assert!(attempts
            .iter()
            .all(|attempt| attempt.reason == reason::INVALID_CREDENTIALS && !attempt.success));
        Ok(())
    }

    #[tokio::test]
    async fn lifecycle_states_have_distinct_errors() -> Result<()> {
        let h = harness()?;
        h.service
            .register(RegisterRequest {
                email: "pending@example.com".to_string(),
                password: PASSWORD.to_string(),
                ..RegisterRequest::default()
            })
            .await?;
        assert!(matches!(
            h.service.login(login("pending@example.com", PASSWORD)).await,
            Err(AuthError::EmailNotVerified)
        ));

        let account = verified(&h, "carol@example.com").await?;
        h.store.set_status(account.id, AccountStatus::Disabled).await;
        assert!(matches!(
            h.service.login(login("carol@example.com", PASSWORD)).await,
            Err(AuthError::AccountDisabled)
        ));
        h.store.set_status(account.id, AccountStatus::Locked).await;
        assert!(matches!(
            h.service.login(login("carol@example.com", PASSWORD)).await,
            Err(AuthError::AccountLocked)
        ));
        h.store.set_status(account.id, AccountStatus::Deleted).await;
        assert!(matches!(
            h.service.login(login("carol@example.com", PASSWORD)).await,
            Err(AuthError::UserNotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn fifth_failure_locks_even_the_right_password() -> Result<()> {
        let h = harness()?;
        verified(&h, "alice@example.com").await?;

        for _ in 0..5 {
            assert!(matches!(
                h.service.login(login("alice@example.com", "Wr0ng!Pass")).await,
                Err(AuthError::InvalidCredentials)
            ));
        }
        let locked = h.service.login(login("alice@example.com", PASSWORD)).await;
        assert!(matches!(locked, Err(AuthError::LockedOut { .. })));

        let last = h.store.login_attempts().await;
        assert_eq!(last.last().map(|attempt| attempt.reason), Some(reason::LOCKED_OUT));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_rotates_and_rejects_replay() -> Result<()> {
        let h = harness()?;
        verified(&h, "alice@example.com").await?;
        let outcome = h.service.login(login("alice@example.com", PASSWORD)).await?;

        let rotated = h.service.refresh(&outcome.tokens.refresh_token).await?;
        assert_ne!(rotated.refresh_token, outcome.tokens.refresh_token);
        assert!(matches!(
            h.service.refresh(&outcome.tokens.refresh_token).await,
            Err(AuthError::InvalidOrExpiredToken)
        ));
        assert!(matches!(
            h.service.refresh("garbage").await,
            Err(AuthError::InvalidOrExpiredToken)
        ));
        h.service.refresh(&rotated.refresh_token).await?;
        Ok(())
    }

    #[tokio::test]
    async fn refresh_fails_once_the_account_is_disabled() -> Result<()> {
        let h = harness()?;
        let account = verified(&h, "alice@example.com").await?;
        let outcome = h.service.login(login("alice@example.com", PASSWORD)).await?;

        h.store.set_status(account.id, AccountStatus::Disabled).await;
        assert!(matches!(
            h.service.refresh(&outcome.tokens.refresh_token).await,
            Err(AuthError::InvalidOrExpiredToken)
        ));
        let stored = h.store.find_by_id(account.id).await?.context("missing account")?;
        assert_eq!(stored.status, AccountStatus::Disabled);
        Ok(())
    }
}
