//! Durable storage contracts.
//!
//! Each entity gets a narrow trait. [`postgres::PgStore`] implements all of them
//! against Postgres (the per-entity SQL lives next to the owning module), and
//! [`memory::MemoryStore`] implements them in process for tests and local runs.
//! Methods that take an [`AuditRecord`] or [`NewOutboxEvent`] persist those rows
//! in the same transaction as the state change.

pub mod memory;
pub mod postgres;

use crate::{
    outbox::{NewOutboxEvent, OutboxStore},
    session::repo::SessionRepo,
    token::repo::RefreshTokenStore,
    totp::repo::MfaStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VerificationState {
    Unverified,
    Verified,
}

impl VerificationState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Verified => "verified",
        }
    }

    /// # Errors
    /// Returns an error for values outside the persisted enum.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "unverified" => Ok(Self::Unverified),
            "verified" => Ok(Self::Verified),
            other => Err(StoreError::Corrupt(format!("verification state {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Locked,
    Disabled,
    Deleted,
}

impl AccountStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Locked => "locked",
            Self::Disabled => "disabled",
            Self::Deleted => "deleted",
        }
    }

    /// # Errors
    /// Returns an error for values outside the persisted enum.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "active" => Ok(Self::Active),
            "locked" => Ok(Self::Locked),
            "disabled" => Ok(Self::Disabled),
            "deleted" => Ok(Self::Deleted),
            other => Err(StoreError::Corrupt(format!("account status {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub verification: VerificationState,
    pub verification_token_hash: Option<Vec<u8>>,
    pub verification_expires_at: Option<DateTime<Utc>>,
    pub status: AccountStatus,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub lockout_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.verification == VerificationState::Verified
    }

    /// Durable lock set by moderation, independent of the throttling lock.
    #[must_use]
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.status == AccountStatus::Locked || self.lockout_until.is_some_and(|until| until > now)
    }
}

/// Everything needed to insert an account together with its profile.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    pub locale: String,
    pub timezone: String,
    pub verification_token_hash: Vec<u8>,
    pub verification_expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub account_id: Option<Uuid>,
    pub action: &'static str,
    pub metadata: Value,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    #[must_use]
    pub fn new(account_id: Uuid, action: &'static str, created_at: DateTime<Utc>) -> Self {
        Self {
            account_id: Some(account_id),
            action,
            metadata: Value::Object(serde_json::Map::new()),
            ip: None,
            created_at,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }
}

/// Append-only login ledger row.
#[derive(Debug, Clone)]
pub struct LoginAttempt {
    pub account_id: Option<Uuid>,
    pub email: String,
    pub ip: Option<String>,
    pub success: bool,
    pub reason: &'static str,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PasswordReset {
    pub id: Uuid,
    pub account_id: Uuid,
    pub token_hash: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert account, profile, audit and outbox rows atomically.
    /// Fails with [`StoreError::Conflict`] when the email is taken.
    async fn register(
        &self,
        account: NewAccount,
        audit: AuditRecord,
        event: NewOutboxEvent,
    ) -> Result<Account, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn find_by_verification_hash(&self, hash: &[u8]) -> Result<Option<Account>, StoreError>;

    /// Flip an unverified account to verified and clear the token expiry.
    /// The token hash is kept so a repeated link resolves to the same account.
    /// Returns `false` without writing anything when it was already verified.
    async fn mark_verified(
        &self,
        account_id: Uuid,
        audit: AuditRecord,
        event: NewOutboxEvent,
    ) -> Result<bool, StoreError>;

    /// Replace the pending verification token of an unverified account.
    async fn replace_verification_token(
        &self,
        account_id: Uuid,
        token_hash: Vec<u8>,
        expires_at: DateTime<Utc>,
        event: NewOutboxEvent,
    ) -> Result<bool, StoreError>;

    async fn record_login(
        &self,
        account_id: Uuid,
        ip: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn create_password_reset(
        &self,
        reset: PasswordReset,
        audit: AuditRecord,
        event: NewOutboxEvent,
    ) -> Result<(), StoreError>;

    /// Unconsumed, unexpired reset matching the hash.
    async fn find_password_reset(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<PasswordReset>, StoreError>;

    /// Consume the reset (compare-and-set) and store the new hash in one transaction.
    async fn complete_password_reset(
        &self,
        reset_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
        audit: AuditRecord,
        event: NewOutboxEvent,
    ) -> Result<bool, StoreError>;

    async fn update_password(
        &self,
        account_id: Uuid,
        password_hash: &str,
        audit: AuditRecord,
        event: NewOutboxEvent,
    ) -> Result<(), StoreError>;

    async fn record_audit(&self, audit: AuditRecord) -> Result<(), StoreError>;

    async fn delete_expired_password_resets(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait LoginAttemptStore: Send + Sync {
    async fn record(&self, attempt: LoginAttempt) -> Result<(), StoreError>;

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Handles to every durable store the core needs.
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn AccountStore>,
    pub attempts: Arc<dyn LoginAttemptStore>,
    pub sessions: Arc<dyn SessionRepo>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub mfa: Arc<dyn MfaStore>,
    pub outbox: Arc<dyn OutboxStore>,
}

impl Stores {
    /// Share one backend that implements every store trait.
    #[must_use]
    pub fn from_backend<B>(backend: &Arc<B>) -> Self
    where
        B: AccountStore
            + LoginAttemptStore
            + SessionRepo
            + RefreshTokenStore
            + MfaStore
            + OutboxStore
            + 'static,
    {
        Self {
            accounts: backend.clone(),
            attempts: backend.clone(),
            sessions: backend.clone(),
            refresh_tokens: backend.clone(),
            mfa: backend.clone(),
            outbox: backend.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() -> anyhow::Result<()> {
        for status in [
            AccountStatus::Active,
            AccountStatus::Locked,
            AccountStatus::Disabled,
            AccountStatus::Deleted,
        ] {
            assert_eq!(AccountStatus::parse(status.as_str())?, status);
        }
        assert!(AccountStatus::parse("banned").is_err());
        assert!(VerificationState::parse("pending").is_err());
        Ok(())
    }

    #[test]
    fn durable_lock_respects_lockout_until() {
        let now = Utc::now();
        let mut account = Account {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            password_hash: String::new(),
            verification: VerificationState::Verified,
            verification_token_hash: None,
            verification_expires_at: None,
            status: AccountStatus::Active,
            last_login_at: None,
            last_login_ip: None,
            lockout_until: None,
            created_at: now,
            updated_at: now,
        };
        assert!(!account.is_locked_at(now));

        account.lockout_until = Some(now + chrono::Duration::minutes(5));
        assert!(account.is_locked_at(now));
        assert!(!account.is_locked_at(now + chrono::Duration::minutes(6)));

        account.lockout_until = None;
        account.status = AccountStatus::Locked;
        assert!(account.is_locked_at(now));
    }
}
