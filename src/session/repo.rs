use super::Session;
use crate::store::{
    postgres::{insert_audit, PgStore},
    AuditRecord, StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Postgres, Row, Transaction};
use tracing::Instrument;
use uuid::Uuid;

/// Durable session records. This is the source of truth for session validity.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<(), StoreError>;

    async fn find(&self, id: Uuid) -> Result<Option<Session>, StoreError>;

    async fn list_active(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError>;

    /// Revoke one active session of `account_id` together with its refresh tokens.
    async fn revoke(
        &self,
        session_id: Uuid,
        account_id: Uuid,
        now: DateTime<Utc>,
        audit: Option<AuditRecord>,
    ) -> Result<bool, StoreError>;

    /// Revoke every active session of the account (optionally sparing one) and
    /// their refresh tokens. Returns the ids that were revoked.
    async fn revoke_all(
        &self,
        account_id: Uuid,
        except: Option<Uuid>,
        now: DateTime<Utc>,
        audit: Option<AuditRecord>,
    ) -> Result<Vec<Uuid>, StoreError>;

    /// Remove sessions that expired before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

fn session_from_row(row: &PgRow) -> Result<Session, sqlx::Error> {
    Ok(Session {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        user_agent: row.try_get("user_agent")?,
        ip: row.try_get("ip")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
    })
}

async fn revoke_refresh_tokens(
    tx: &mut Transaction<'_, Postgres>,
    session_ids: &[Uuid],
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let query = r"
        UPDATE refresh_tokens
        SET revoked_at = $2
        WHERE session_id = ANY($1) AND revoked_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(session_ids)
        .bind(now)
        .execute(&mut **tx)
        .instrument(span)
        .await?;
    Ok(())
}

#[async_trait]
impl SessionRepo for PgStore {
    async fn insert(&self, session: &Session) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO sessions (id, account_id, user_agent, ip, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session.id)
            .bind(session.account_id)
            .bind(session.user_agent.as_deref())
            .bind(session.ip.as_deref())
            .bind(session.created_at)
            .bind(session.expires_at)
            .execute(self.pool())
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let query = r"
            SELECT id, account_id, user_agent, ip, created_at, expires_at, revoked_at
            FROM sessions
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(self.pool())
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(session_from_row).transpose()?)
    }

    async fn list_active(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, StoreError> {
        let query = r"
            SELECT id, account_id, user_agent, ip, created_at, expires_at, revoked_at
            FROM sessions
            WHERE account_id = $1 AND revoked_at IS NULL AND expires_at > $2
            ORDER BY created_at DESC
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(account_id)
            .bind(now)
            .fetch_all(self.pool())
            .instrument(span)
            .await?;
        Ok(rows
            .iter()
            .map(session_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn revoke(
        &self,
        session_id: Uuid,
        account_id: Uuid,
        now: DateTime<Utc>,
        audit: Option<AuditRecord>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.begin().await?;

        let query = r"
            UPDATE sessions
            SET revoked_at = $3
            WHERE id = $1 AND account_id = $2 AND revoked_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(session_id)
            .bind(account_id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(span)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        revoke_refresh_tokens(&mut tx, &[session_id], now).await?;
        if let Some(audit) = audit {
            insert_audit(&mut tx, &audit).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn revoke_all(
        &self,
        account_id: Uuid,
        except: Option<Uuid>,
        now: DateTime<Utc>,
        audit: Option<AuditRecord>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut tx = self.begin().await?;

        let query = r"
            UPDATE sessions
            SET revoked_at = $2
            WHERE account_id = $1
              AND revoked_at IS NULL
              AND expires_at > $2
              AND ($3::uuid IS NULL OR id <> $3)
            RETURNING id
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(account_id)
            .bind(now)
            .bind(except)
            .fetch_all(&mut *tx)
            .instrument(span)
            .await?;
        let revoked = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<Result<Vec<_>, _>>()?;

        if !revoked.is_empty() {
            revoke_refresh_tokens(&mut tx, &revoked, now).await?;
        }
        if let Some(audit) = audit {
            insert_audit(&mut tx, &audit).await?;
        }
        tx.commit().await?;
        Ok(revoked)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        // Refresh tokens go with their session (ON DELETE CASCADE).
        let query = "DELETE FROM sessions WHERE expires_at <= $1";
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
