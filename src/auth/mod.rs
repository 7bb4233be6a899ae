//! Authentication core.
//!
//! [`AuthService`] orchestrates registration, email verification, login,
//! refresh-token rotation, session revocation, password reset and MFA
//! enrollment. Every collaborator is injected; the service keeps no state of
//! its own beyond configuration.
//!
//! Flow Overview (login):
//! 1) Throttling gate (IP window, account lock, account window).
//! 2) Account lookup and lifecycle checks.
//! 3) Password, then TOTP when enrolled.
//! 4) Durable session, best-effort cached view, token pair.
//! 5) Ledger row and limiter reset.
//!
//! Every terminal outcome after the gate lands in the login ledger with a
//! stable reason code.

pub mod config;
mod login;
mod mfa;
mod password;
mod register;
mod sessions;
pub mod types;
pub(crate) mod utils;

pub use config::AuthConfig;
pub use types::{AccountView, LoginOutcome, LoginRequest, Principal, RegisterRequest, SessionView};

use crate::{
    password::PasswordHasher,
    rate_limit::RateLimiter,
    session::SessionStore,
    error::AuthError,
    store::{Account, LoginAttempt, Stores},
    token::TokenIssuer,
    totp::TotpService,
    webauthn::WebauthnService,
};
use chrono::{DateTime, Utc};
use tracing::{error, warn};
use uuid::Uuid;

/// Stable reason codes written to the login ledger.
pub mod reason {
    pub const SUCCESS: &str = "success";
    pub const INVALID_CREDENTIALS: &str = "invalid_credentials";
    pub const USER_NOT_FOUND: &str = "user_not_found";
    pub const EMAIL_NOT_VERIFIED: &str = "email_not_verified";
    pub const ACCOUNT_LOCKED: &str = "account_locked";
    pub const ACCOUNT_DISABLED: &str = "account_disabled";
    pub const MFA_REQUIRED_OR_INVALID: &str = "mfa_required_or_invalid";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const LOCKED_OUT: &str = "locked_out";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

#[derive(Clone)]
pub struct AuthService {
    stores: Stores,
    sessions: SessionStore,
    tokens: TokenIssuer,
    hasher: PasswordHasher,
    limiter: RateLimiter,
    totp: TotpService,
    webauthn: WebauthnService,
    config: AuthConfig,
}

impl AuthService {
    #[must_use]
    pub fn new(
        stores: Stores,
        sessions: SessionStore,
        tokens: TokenIssuer,
        hasher: PasswordHasher,
        limiter: RateLimiter,
        totp: TotpService,
        config: AuthConfig,
    ) -> Self {
        Self {
            stores,
            sessions,
            tokens,
            hasher,
            limiter,
            totp,
            webauthn: WebauthnService,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Append to the login ledger. A failed write is logged and swallowed so
    /// the caller still gets the outcome it earned.
    async fn record_attempt(
        &self,
        account_id: Option<Uuid>,
        email: &str,
        ip: Option<&str>,
        success: bool,
        reason: &'static str,
        at: DateTime<Utc>,
    ) {
        let attempt = LoginAttempt {
            account_id,
            email: email.to_string(),
            ip: ip.map(str::to_string),
            success,
            reason,
            attempted_at: at,
        };
        if let Err(err) = self.stores.attempts.record(attempt).await {
            error!(email, reason, "failed to record login attempt: {err}");
        }
    }

    /// Feed a credential failure into the throttling state.
    async fn count_failure(&self, email: &str) {
        match self.limiter.record_failure(email).await {
            Ok(outcome) => {
                if let Some(locked_for) = outcome.locked_for {
                    warn!(
                        email,
                        failures = outcome.failures,
                        lock_seconds = locked_for.as_secs(),
                        "login throttled by lock"
                    );
                }
            }
            Err(err) => warn!(email, "failed to record login failure: {err}"),
        }
    }

    /// Re-check the password of a signed-in account before a sensitive change.
    /// Mismatches count toward the same lock as failed logins.
    async fn recheck_password(&self, account: &Account, password: &str) -> Result<(), AuthError> {
        self.limiter.ensure_unlocked(&account.email).await?;
        if !self.hasher.verify(password, &account.password_hash).await? {
            self.count_failure(&account.email).await;
            warn!(account_id = %account.id, "password re-check failed");
            return Err(AuthError::InvalidCredentials);
        }
        Ok(())
    }

    /// Reset throttling for an account after proof of credentials.
    async fn clear_failures(&self, email: &str) {
        if let Err(err) = self.limiter.record_success(email).await {
            warn!(email, "failed to clear login throttling: {err}");
        }
    }
}
