//! Transactional outbox on PostgreSQL.

use async_trait::async_trait;
use ratchet_core::{OutboxRecord, OutboxSource, OutboxStatus, StoreError};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

/// PostgreSQL outbox store.
#[derive(Clone)]
pub struct PgOutbox {
    pool: PgPool,
}

impl PgOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Append a pending record inside the caller's open transaction.
    ///
    /// The insert participates in that transaction's atomicity: it commits
    /// with the caller's domain write or not at all. Payload encoding
    /// failure is [`StoreError::Serialization`]; any other failure should
    /// abort the caller's transaction.
    pub async fn append<T>(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: &str,
        event_type: &str,
        payload: &T,
    ) -> Result<Uuid, StoreError>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO outbox_records (id, aggregate_id, event_type, payload, status)
            VALUES ($1, $2, $3, $4, 'pending')
            "#,
        )
        .bind(id)
        .bind(aggregate_id)
        .bind(event_type)
        .bind(payload)
        .execute(&mut **tx)
        .await
        .map_err(StoreError::backend)?;

        Ok(id)
    }
}

#[async_trait]
impl OutboxSource for PgOutbox {
    /// Fetch pending records, oldest first.
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_id, event_type, payload, status, created_at, published_at
            FROM outbox_records
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(rows
            .into_iter()
            .map(|row| OutboxRecord {
                id: row.get("id"),
                aggregate_id: row.get("aggregate_id"),
                event_type: row.get("event_type"),
                payload: row.get("payload"),
                status: OutboxStatus::parse(row.get("status"))
                    .unwrap_or(OutboxStatus::Pending),
                created_at: row.get("created_at"),
                published_at: row.get("published_at"),
            })
            .collect())
    }

    /// Transition to `processed` and stamp `published_at`.
    ///
    /// The status guard makes the update idempotent and keeps terminal
    /// statuses from rewinding.
    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE outbox_records
            SET status = 'processed',
                published_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(())
    }

    /// Transition to `failed`. Terminal: nothing re-drives a failed record
    /// automatically.
    async fn mark_failed(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE outbox_records
            SET status = 'failed'
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(())
    }
}
