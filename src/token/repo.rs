use crate::store::{
    postgres::{map_write_error, PgStore},
    StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Row};
use tracing::Instrument;
use uuid::Uuid;

/// Persisted refresh token. Only the keyed hash of the value is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub account_id: Uuid,
    pub token_hash: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.consumed_at.is_none() && self.revoked_at.is_none() && self.expires_at > now
    }
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), StoreError>;

    /// Compare-and-set consumption: flips `consumed_at` only while the token is
    /// unconsumed, unrevoked and unexpired, and returns the row when it did.
    /// Of two concurrent calls with the same hash at most one gets `Some`.
    async fn consume(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Revoke one token owned by `account_id`.
    async fn revoke(
        &self,
        token_hash: &[u8],
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Drop tokens that can no longer be used.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

fn record_from_row(row: &PgRow) -> Result<RefreshTokenRecord, sqlx::Error> {
    Ok(RefreshTokenRecord {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        account_id: row.try_get("account_id")?,
        token_hash: row.try_get("token_hash")?,
        issued_at: row.try_get("issued_at")?,
        expires_at: row.try_get("expires_at")?,
        consumed_at: row.try_get("consumed_at")?,
        revoked_at: row.try_get("revoked_at")?,
    })
}

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO refresh_tokens
                (id, session_id, account_id, token_hash, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(record.id)
            .bind(record.session_id)
            .bind(record.account_id)
            .bind(&record.token_hash)
            .bind(record.issued_at)
            .bind(record.expires_at)
            .execute(self.pool())
            .instrument(span)
            .await
            .map_err(map_write_error)?;
        Ok(())
    }

    async fn consume(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let query = r"
            UPDATE refresh_tokens
            SET consumed_at = $2
            WHERE token_hash = $1
              AND consumed_at IS NULL
              AND revoked_at IS NULL
              AND expires_at > $2
            RETURNING id, session_id, account_id, token_hash, issued_at, expires_at,
                      consumed_at, revoked_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(self.pool())
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(record_from_row).transpose()?)
    }

    async fn revoke(
        &self,
        token_hash: &[u8],
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let query = r"
            UPDATE refresh_tokens
            SET revoked_at = $3
            WHERE token_hash = $1 AND account_id = $2 AND revoked_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(token_hash)
            .bind(account_id)
            .bind(now)
            .execute(self.pool())
            .instrument(span)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let query = r"
            DELETE FROM refresh_tokens
            WHERE expires_at <= $1 OR consumed_at IS NOT NULL OR revoked_at IS NOT NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(now)
            .execute(self.pool())
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }
}
