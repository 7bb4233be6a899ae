use super::{NewOutboxEvent, OutboxRecord, OutboxStore};
use crate::store::{postgres::PgStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row, Transaction};
use tracing::Instrument;

/// Append an event inside the caller's transaction.
pub(crate) async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    event: &NewOutboxEvent,
) -> Result<(), StoreError> {
    let query = r"
        INSERT INTO outbox_events (aggregate_id, topic, event_type, payload)
        VALUES ($1, $2, $3, $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(event.aggregate_id)
        .bind(event.topic)
        .bind(event.event_type)
        .bind(&event.payload)
        .execute(&mut **tx)
        .instrument(span)
        .await?;
    Ok(())
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        let query = r"
            SELECT id, aggregate_id, topic, event_type, payload, created_at, published_at
            FROM outbox_events
            WHERE published_at IS NULL
            ORDER BY created_at, id
            LIMIT $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(self.pool())
            .instrument(span)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(OutboxRecord {
                    id: row.try_get("id")?,
                    aggregate_id: row.try_get("aggregate_id")?,
                    topic: row.try_get("topic")?,
                    event_type: row.try_get("event_type")?,
                    payload: row.try_get("payload")?,
                    created_at: row.try_get("created_at")?,
                    published_at: row.try_get("published_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    async fn mark_published(&self, id: i64, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let query = "UPDATE outbox_events SET published_at = $2 WHERE id = $1 AND published_at IS NULL";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(at)
            .execute(self.pool())
            .instrument(span)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let query = "DELETE FROM outbox_events WHERE published_at IS NOT NULL AND published_at < $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(cutoff)
            .execute(self.pool())
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }
}
