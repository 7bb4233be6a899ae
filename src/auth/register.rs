//! Registration and email verification.

use super::{
    types::{AccountView, RegisterRequest},
    utils::{
        build_link, default_display_name, generate_link_token, hash_link_token, normalize_email,
        valid_email,
    },
    AuthService,
};
use crate::{
    error::AuthError,
    outbox::NewOutboxEvent,
    store::{AuditRecord, NewAccount, StoreError},
};
use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

const VERIFY_PATH: &str = "verify-email";
const DEFAULT_LOCALE: &str = "en";
const DEFAULT_TIMEZONE: &str = "UTC";

impl AuthService {
    /// Create an unverified account and queue the verification email.
    ///
    /// No tokens are issued; the account cannot log in until verified.
    ///
    /// # Errors
    /// `InvalidEmail`, `WeakPassword`, `EmailExists`, or a store failure.
    pub async fn register(&self, request: RegisterRequest) -> Result<AccountView, AuthError> {
        let email = normalize_email(&request.email);
        if !valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }
        if let Some(violation) = self.config.password_policy().violation(&request.password) {
            return Err(AuthError::WeakPassword(violation));
        }
        if self.stores.accounts.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailExists);
        }

        let now = Utc::now();
        let password_hash = self.hasher.hash(&request.password).await?;
        let token = generate_link_token()?;
        let display_name = request
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(|| default_display_name(&email), str::to_string);

        let account_id = Uuid::new_v4();
        let link = build_link(self.config.frontend_base_url(), VERIFY_PATH, &token);
        let account = NewAccount {
            id: account_id,
            email: email.clone(),
            password_hash,
            display_name: display_name.clone(),
            locale: DEFAULT_LOCALE.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            verification_token_hash: hash_link_token(&token),
            verification_expires_at: now
                + ChronoDuration::seconds(self.config.verification_ttl_seconds()),
            created_at: now,
        };
        let audit = AuditRecord::new(account_id, "user.registered", now)
            .with_metadata(serde_json::json!({ "email": email }))
            .with_ip(request.ip);
        let event = NewOutboxEvent::email_verification_requested(account_id, &email, &display_name, &link);

        let account = match self.stores.accounts.register(account, audit, event).await {
            Ok(account) => account,
            Err(StoreError::Conflict(_)) => return Err(AuthError::EmailExists),
            Err(err) => return Err(err.into()),
        };

        info!(account_id = %account.id, "account registered");
        Ok(AccountView::from(&account))
    }

    /// Consume a verification link.
    ///
    /// Presenting the same valid link again succeeds without writing anything.
    ///
    /// # Errors
    /// `InvalidOrExpiredToken` for unknown or expired links.
    pub async fn verify_email(
        &self,
        token: &str,
        ip: Option<String>,
    ) -> Result<AccountView, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidOrExpiredToken);
        }

        let account = self
            .stores
            .accounts
            .find_by_verification_hash(&hash_link_token(token))
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        if account.is_verified() {
            debug!(account_id = %account.id, "email already verified");
            return Ok(AccountView::from(&account));
        }

        let now = Utc::now();
        if !matches!(account.verification_expires_at, Some(expires_at) if expires_at > now) {
            return Err(AuthError::InvalidOrExpiredToken);
        }

        let audit = AuditRecord::new(account.id, "email.verified", now).with_ip(ip);
        let event = NewOutboxEvent::user_created(account.id, &account.email, now);
        if self
            .stores
            .accounts
            .mark_verified(account.id, audit, event)
            .await?
        {
            info!(account_id = %account.id, "email verified");
        }

        let account = self
            .stores
            .accounts
            .find_by_id(account.id)
            .await?
            .ok_or_else(|| AuthError::Internal("verified account vanished".to_string()))?;
        Ok(AccountView::from(&account))
    }

    /// Issue a fresh verification link.
    ///
    /// Unknown and already verified addresses succeed silently so the endpoint
    /// cannot be used to probe for accounts.
    ///
    /// # Errors
    /// `InvalidEmail` for malformed input, or a store failure.
    pub async fn resend_verification(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }

        let Some(account) = self.stores.accounts.find_by_email(&email).await? else {
            debug!("verification resend for unknown email");
            return Ok(());
        };
        if account.is_verified() {
            debug!(account_id = %account.id, "verification resend for verified account");
            return Ok(());
        }

        let now = Utc::now();
        let token = generate_link_token()?;
        let link = build_link(self.config.frontend_base_url(), VERIFY_PATH, &token);
        let display_name = default_display_name(&email);
        let event =
            NewOutboxEvent::email_verification_requested(account.id, &email, &display_name, &link);

        self.stores
            .accounts
            .replace_verification_token(
                account.id,
                hash_link_token(&token),
                now + ChronoDuration::seconds(self.config.verification_ttl_seconds()),
                event,
            )
            .await?;
        info!(account_id = %account.id, "verification email re-queued");
        Ok(())
    }
}
