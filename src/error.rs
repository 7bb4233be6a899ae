//! Error taxonomy shared by the authentication core and the HTTP layer.
//!
//! Every failure the core can report is a variant of [`AuthError`]. Each variant
//! belongs to exactly one [`ErrorKind`] bucket and carries a stable machine code.
//! Callers match on variants; nothing branches on message text.

use crate::{
    password::PasswordError, rate_limit::RateLimitStatus, store::StoreError, token::TokenError,
    totp::TotpError,
};
use std::time::Duration;
use thiserror::Error;

/// Coarse classification used for status mapping and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    Conflict,
    RateLimit,
    Internal,
    External,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email address")]
    InvalidEmail,
    #[error("{0}")]
    WeakPassword(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0} is not supported")]
    Unsupported(&'static str),

    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("user not found")]
    UserNotFound,
    #[error("invalid or missing MFA code")]
    InvalidMfaCode,
    #[error("invalid or expired token")]
    InvalidOrExpiredToken,
    #[error("session is not valid")]
    SessionInvalid,

    #[error("email address is not verified")]
    EmailNotVerified,
    #[error("account is locked")]
    AccountLocked,
    #[error("account is disabled")]
    AccountDisabled,

    #[error("session not found")]
    SessionNotFound,
    #[error("MFA method not found")]
    MfaMethodNotFound,

    #[error("an account with this email already exists")]
    EmailExists,
    #[error("MFA is already enabled")]
    MfaAlreadyEnabled,

    #[error("too many requests")]
    RateLimited(RateLimitStatus),
    #[error("too many failed attempts, account temporarily locked")]
    LockedOut { retry_after: Duration },

    #[error("dependency unavailable: {0}")]
    External(String),
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidEmail | Self::WeakPassword(_) | Self::Validation(_) | Self::Unsupported(_) => {
                ErrorKind::Validation
            }
            Self::InvalidCredentials
            | Self::UserNotFound
            | Self::InvalidMfaCode
            | Self::InvalidOrExpiredToken
            | Self::SessionInvalid => ErrorKind::Authentication,
            Self::EmailNotVerified | Self::AccountLocked | Self::AccountDisabled => {
                ErrorKind::Authorization
            }
            Self::SessionNotFound | Self::MfaMethodNotFound => ErrorKind::NotFound,
            Self::EmailExists | Self::MfaAlreadyEnabled => ErrorKind::Conflict,
            Self::RateLimited(_) | Self::LockedOut { .. } => ErrorKind::RateLimit,
            Self::External(_) => ErrorKind::External,
            Self::Store(StoreError::Conflict(_)) => ErrorKind::Conflict,
            Self::Store(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable code surfaced to clients.
    ///
    /// `UserNotFound` shares the `INVALID_CREDENTIALS` code so that an unknown
    /// email cannot be told apart from a wrong password.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidEmail => "INVALID_EMAIL",
            Self::WeakPassword(_) => "WEAK_PASSWORD",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unsupported(_) => "UNSUPPORTED",
            Self::InvalidCredentials | Self::UserNotFound => "INVALID_CREDENTIALS",
            Self::InvalidMfaCode => "INVALID_MFA_CODE",
            Self::InvalidOrExpiredToken => "INVALID_TOKEN",
            Self::SessionInvalid => "UNAUTHORIZED",
            Self::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            Self::AccountLocked | Self::LockedOut { .. } => "ACCOUNT_LOCKED",
            Self::AccountDisabled => "ACCOUNT_DISABLED",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::MfaMethodNotFound => "MFA_METHOD_NOT_FOUND",
            Self::EmailExists => "EMAIL_EXISTS",
            Self::MfaAlreadyEnabled => "MFA_ALREADY_ENABLED",
            Self::RateLimited(_) => "RATE_LIMIT_EXCEEDED",
            Self::External(_) => "EXTERNAL_ERROR",
            Self::Store(StoreError::Conflict(_)) => "CONFLICT",
            Self::Store(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to return to the caller.
    ///
    /// Internal and dependency failures are masked; credential failures share
    /// one message.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "An internal error occurred".to_string(),
            ErrorKind::External => "A required service is temporarily unavailable".to_string(),
            _ => match self {
                Self::UserNotFound => Self::InvalidCredentials.to_string(),
                Self::Store(StoreError::Conflict(_)) => "Resource already exists".to_string(),
                other => other.to_string(),
            },
        }
    }

    /// Seconds the caller should wait before retrying, for throttling errors.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::LockedOut { retry_after } => Some(*retry_after),
            Self::RateLimited(status) => status.retry_after,
            _ => None,
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(err: PasswordError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Jwt(_) => Self::InvalidOrExpiredToken,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<TotpError> for AuthError {
    fn from(err: TotpError) -> Self {
        Self::Internal(err.to_string())
    }
}

pub type Result<T, E = AuthError> = std::result::Result<T, E>;
