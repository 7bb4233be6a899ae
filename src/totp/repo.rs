use super::models::{MfaKind, MfaMethod};
use crate::store::{
    postgres::{insert_audit, PgStore},
    AuditRecord, StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::Instrument;
use uuid::Uuid;

#[async_trait]
pub trait MfaStore: Send + Sync {
    /// Store a pending (disabled) method, replacing any pending one of the same kind.
    /// Fails with [`StoreError::Conflict`] when an enabled method of that kind exists.
    async fn save_pending(&self, method: &MfaMethod) -> Result<(), StoreError>;

    async fn find(&self, account_id: Uuid, kind: MfaKind) -> Result<Option<MfaMethod>, StoreError>;

    /// Flip a pending method to enabled.
    async fn enable(
        &self,
        method_id: Uuid,
        account_id: Uuid,
        audit: AuditRecord,
    ) -> Result<bool, StoreError>;

    async fn touch(&self, method_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn remove(
        &self,
        account_id: Uuid,
        kind: MfaKind,
        audit: AuditRecord,
    ) -> Result<bool, StoreError>;

    async fn list(&self, account_id: Uuid) -> Result<Vec<MfaMethod>, StoreError>;
}

const METHOD_COLUMNS: &str =
    "id, account_id, kind, secret_ciphertext, label, enabled, created_at, last_used_at";

#[async_trait]
impl MfaStore for PgStore {
    async fn save_pending(&self, method: &MfaMethod) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO mfa_methods
                (id, account_id, kind, secret_ciphertext, label, enabled, created_at)
            VALUES ($1, $2, $3, $4, $5, FALSE, $6)
            ON CONFLICT (account_id, kind) DO UPDATE
            SET id = EXCLUDED.id,
                secret_ciphertext = EXCLUDED.secret_ciphertext,
                label = EXCLUDED.label,
                created_at = EXCLUDED.created_at,
                last_used_at = NULL
            WHERE mfa_methods.enabled = FALSE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(method.id)
            .bind(method.account_id)
            .bind(method.kind.as_str())
            .bind(&method.secret_ciphertext)
            .bind(method.label.as_deref())
            .bind(method.created_at)
            .execute(self.pool())
            .instrument(span)
            .await?;

        // The conditional upsert touches nothing when an enabled row is in the way.
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict("mfa_methods_account_id_kind_key".to_string()));
        }
        Ok(())
    }

    async fn find(&self, account_id: Uuid, kind: MfaKind) -> Result<Option<MfaMethod>, StoreError> {
        let query =
            format!("SELECT {METHOD_COLUMNS} FROM mfa_methods WHERE account_id = $1 AND kind = $2");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        Ok(sqlx::query_as::<_, MfaMethod>(&query)
            .bind(account_id)
            .bind(kind.as_str())
            .fetch_optional(self.pool())
            .instrument(span)
            .await?)
    }

    async fn enable(
        &self,
        method_id: Uuid,
        account_id: Uuid,
        audit: AuditRecord,
    ) -> Result<bool, StoreError> {
        let mut tx = self.begin().await?;
        let query = r"
            UPDATE mfa_methods
            SET enabled = TRUE
            WHERE id = $1 AND account_id = $2 AND enabled = FALSE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(method_id)
            .bind(account_id)
            .execute(&mut *tx)
            .instrument(span)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        insert_audit(&mut tx, &audit).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn touch(&self, method_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let query = "UPDATE mfa_methods SET last_used_at = $2 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(method_id)
            .bind(at)
            .execute(self.pool())
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn remove(
        &self,
        account_id: Uuid,
        kind: MfaKind,
        audit: AuditRecord,
    ) -> Result<bool, StoreError> {
        let mut tx = self.begin().await?;
        let query = "DELETE FROM mfa_methods WHERE account_id = $1 AND kind = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(kind.as_str())
            .execute(&mut *tx)
            .instrument(span)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        insert_audit(&mut tx, &audit).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn list(&self, account_id: Uuid) -> Result<Vec<MfaMethod>, StoreError> {
        let query = format!(
            "SELECT {METHOD_COLUMNS} FROM mfa_methods WHERE account_id = $1 ORDER BY created_at"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        Ok(sqlx::query_as::<_, MfaMethod>(&query)
            .bind(account_id)
            .fetch_all(self.pool())
            .instrument(span)
            .await?)
    }
}
