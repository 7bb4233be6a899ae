//! Postgres implementation of the account and login-attempt stores.
//!
//! `PgStore` also implements the session, refresh token, MFA and outbox traits;
//! that SQL lives in the `repo` module of each of those domains.

use super::{
    Account, AccountStatus, AccountStore, AuditRecord, LoginAttempt, LoginAttemptStore,
    NewAccount, PasswordReset, StoreError, VerificationState,
};
use crate::outbox::{repo::insert_event, NewOutboxEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Connection, PgPool, Postgres, Row, Transaction};
use tracing::Instrument;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        Ok(self.pool.begin().await?)
    }

    /// Acquire a connection and ping it. Used by the health endpoint.
    ///
    /// # Errors
    /// Returns an error if no connection can be acquired or the ping fails.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let acquire_span = tracing::info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self.pool.acquire().instrument(acquire_span).await?;
        let ping_span =
            tracing::info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping().instrument(ping_span).await?;
        Ok(())
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Map unique violations to [`StoreError::Conflict`], everything else to `Database`.
pub(crate) fn map_write_error(err: sqlx::Error) -> StoreError {
    if is_unique_violation(&err) {
        let constraint = match &err {
            sqlx::Error::Database(db_err) => db_err.constraint().unwrap_or("unique").to_string(),
            _ => "unique".to_string(),
        };
        StoreError::Conflict(constraint)
    } else {
        StoreError::Database(err)
    }
}

pub(crate) async fn insert_audit(
    tx: &mut Transaction<'_, Postgres>,
    audit: &AuditRecord,
) -> Result<(), StoreError> {
    let query = r"
        INSERT INTO audit_log (account_id, action, metadata, ip, created_at)
        VALUES ($1, $2, $3, $4, $5)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(audit.account_id)
        .bind(audit.action)
        .bind(&audit.metadata)
        .bind(audit.ip.as_deref())
        .bind(audit.created_at)
        .execute(&mut **tx)
        .instrument(span)
        .await?;
    Ok(())
}

const ACCOUNT_COLUMNS: &str = r"
    id, email, password_hash, verification_state, verification_token_hash,
    verification_expires_at, status, last_login_at, last_login_ip, lockout_until,
    created_at, updated_at
";

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let verification: String = row.try_get("verification_state")?;
    let status: String = row.try_get("status")?;
    Ok(Account {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        verification: VerificationState::parse(&verification)?,
        verification_token_hash: row.try_get("verification_token_hash")?,
        verification_expires_at: row.try_get("verification_expires_at")?,
        status: AccountStatus::parse(&status)?,
        last_login_at: row.try_get("last_login_at")?,
        last_login_ip: row.try_get("last_login_ip")?,
        lockout_until: row.try_get("lockout_until")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl PgStore {
    async fn fetch_account(&self, filter: &str, bind: AccountKey<'_>) -> Result<Option<Account>, StoreError> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {filter}");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let statement = sqlx::query(&query);
        let statement = match bind {
            AccountKey::Id(id) => statement.bind(id),
            AccountKey::Email(email) => statement.bind(email),
            AccountKey::Hash(hash) => statement.bind(hash),
        };
        let row = statement
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }
}

enum AccountKey<'a> {
    Id(Uuid),
    Email(&'a str),
    Hash(&'a [u8]),
}

#[async_trait]
impl AccountStore for PgStore {
    async fn register(
        &self,
        account: NewAccount,
        audit: AuditRecord,
        event: NewOutboxEvent,
    ) -> Result<Account, StoreError> {
        // Account, profile, audit row and verification event commit together.
        let mut tx = self.begin().await?;

        let query = format!(
            r"
            INSERT INTO accounts
                (id, email, password_hash, verification_state, verification_token_hash,
                 verification_expires_at, status, created_at, updated_at)
            VALUES ($1, $2, $3, 'unverified', $4, $5, 'active', $6, $6)
            RETURNING {ACCOUNT_COLUMNS}
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(account.id)
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(&account.verification_token_hash)
            .bind(account.verification_expires_at)
            .bind(account.created_at)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await
            .map_err(map_write_error)?;
        let created = account_from_row(&row)?;

        let query = r"
            INSERT INTO profiles (account_id, display_name, locale, timezone)
            VALUES ($1, $2, $3, $4)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(account.id)
            .bind(&account.display_name)
            .bind(&account.locale)
            .bind(&account.timezone)
            .execute(&mut *tx)
            .instrument(span)
            .await?;

        insert_audit(&mut tx, &audit).await?;
        insert_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        self.fetch_account("id = $1", AccountKey::Id(id)).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        self.fetch_account("email = $1", AccountKey::Email(email)).await
    }

    async fn find_by_verification_hash(&self, hash: &[u8]) -> Result<Option<Account>, StoreError> {
        self.fetch_account("verification_token_hash = $1", AccountKey::Hash(hash))
            .await
    }

    async fn mark_verified(
        &self,
        account_id: Uuid,
        audit: AuditRecord,
        event: NewOutboxEvent,
    ) -> Result<bool, StoreError> {
        let mut tx = self.begin().await?;

        let query = r"
            UPDATE accounts
            SET verification_state = 'verified',
                verification_expires_at = NULL,
                updated_at = $2
            WHERE id = $1 AND verification_state = 'unverified'
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(audit.created_at)
            .execute(&mut *tx)
            .instrument(span)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_audit(&mut tx, &audit).await?;
        insert_event(&mut tx, &event).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn replace_verification_token(
        &self,
        account_id: Uuid,
        token_hash: Vec<u8>,
        expires_at: DateTime<Utc>,
        event: NewOutboxEvent,
    ) -> Result<bool, StoreError> {
        let mut tx = self.begin().await?;

        let query = r"
            UPDATE accounts
            SET verification_token_hash = $2,
                verification_expires_at = $3,
                updated_at = NOW()
            WHERE id = $1 AND verification_state = 'unverified'
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(&token_hash)
            .bind(expires_at)
            .execute(&mut *tx)
            .instrument(span)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_event(&mut tx, &event).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn record_login(
        &self,
        account_id: Uuid,
        ip: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let query = r"
            UPDATE accounts
            SET last_login_at = $2, last_login_ip = $3, updated_at = $2
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(account_id)
            .bind(at)
            .bind(ip)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn create_password_reset(
        &self,
        reset: PasswordReset,
        audit: AuditRecord,
        event: NewOutboxEvent,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        // One outstanding reset per account.
        let query = "DELETE FROM password_resets WHERE account_id = $1 AND consumed_at IS NULL";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(reset.account_id)
            .execute(&mut *tx)
            .instrument(span)
            .await?;

        let query = r"
            INSERT INTO password_resets (id, account_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(reset.id)
            .bind(reset.account_id)
            .bind(&reset.token_hash)
            .bind(reset.expires_at)
            .bind(reset.created_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .map_err(map_write_error)?;

        insert_audit(&mut tx, &audit).await?;
        insert_event(&mut tx, &event).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_password_reset(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<PasswordReset>, StoreError> {
        let query = r"
            SELECT id, account_id, token_hash, expires_at, consumed_at, created_at
            FROM password_resets
            WHERE token_hash = $1 AND consumed_at IS NULL AND expires_at > $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;

        row.map(|row| -> Result<PasswordReset, StoreError> {
            Ok(PasswordReset {
                id: row.try_get("id")?,
                account_id: row.try_get("account_id")?,
                token_hash: row.try_get("token_hash")?,
                expires_at: row.try_get("expires_at")?,
                consumed_at: row.try_get("consumed_at")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn complete_password_reset(
        &self,
        reset_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
        audit: AuditRecord,
        event: NewOutboxEvent,
    ) -> Result<bool, StoreError> {
        let mut tx = self.begin().await?;

        let query = r"
            UPDATE password_resets
            SET consumed_at = $2
            WHERE id = $1 AND consumed_at IS NULL AND expires_at > $2
            RETURNING account_id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(reset_id)
            .bind(now)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(false);
        };
        let account_id: Uuid = row.try_get("account_id")?;

        update_password_hash(&mut tx, account_id, password_hash, now).await?;
        insert_audit(&mut tx, &audit).await?;
        insert_event(&mut tx, &event).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn update_password(
        &self,
        account_id: Uuid,
        password_hash: &str,
        audit: AuditRecord,
        event: NewOutboxEvent,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        update_password_hash(&mut tx, account_id, password_hash, audit.created_at).await?;
        insert_audit(&mut tx, &audit).await?;
        insert_event(&mut tx, &event).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_audit(&self, audit: AuditRecord) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        insert_audit(&mut tx, &audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_expired_password_resets(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let query = "DELETE FROM password_resets WHERE expires_at <= $1 OR consumed_at IS NOT NULL";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }
}

async fn update_password_hash(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    password_hash: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let query = "UPDATE accounts SET password_hash = $2, updated_at = $3 WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(password_hash)
        .bind(now)
        .execute(&mut **tx)
        .instrument(span)
        .await?;
    Ok(())
}

#[async_trait]
impl LoginAttemptStore for PgStore {
    async fn record(&self, attempt: LoginAttempt) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO login_attempts (account_id, email, ip, success, reason, attempted_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(attempt.account_id)
            .bind(&attempt.email)
            .bind(attempt.ip.as_deref())
            .bind(attempt.success)
            .bind(attempt.reason)
            .bind(attempt.attempted_at)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let query = "DELETE FROM login_attempts WHERE attempted_at < $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct FakeDbError {
        code: &'static str,
        constraint: Option<&'static str>,
    }

    impl fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "fake database error {}", self.code)
        }
    }

    impl StdError for FakeDbError {}

    impl DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            "fake database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn constraint(&self) -> Option<&str> {
            self.constraint
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    #[test]
    fn unique_violation_maps_to_conflict() {
        let err = sqlx::Error::Database(Box::new(FakeDbError {
            code: "23505",
            constraint: Some("accounts_email_key"),
        }));
        assert!(matches!(
            map_write_error(err),
            StoreError::Conflict(constraint) if constraint == "accounts_email_key"
        ));
    }

    #[test]
    fn other_errors_stay_database_errors() {
        let err = sqlx::Error::Database(Box::new(FakeDbError {
            code: "40001",
            constraint: None,
        }));
        assert!(matches!(map_write_error(err), StoreError::Database(_)));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
