//! Durable topic channel on PostgreSQL.
//!
//! Publishing resolves queue bindings in-process and inserts one message row
//! per matched queue in a single transaction — the commit is the broker
//! acknowledgment. Consumers claim messages with `FOR UPDATE SKIP LOCKED`
//! under a lease; ack deletes the row, nack releases it for redelivery.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ratchet_core::{
    topic_matches, DeliverySource, Envelope, EventChannel, InboundMessage, PublishError,
};
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

/// PostgreSQL message channel.
#[derive(Clone)]
pub struct PgChannel {
    pool: PgPool,
    publish_timeout: Duration,
    prefetch: i64,
    poll_interval: Duration,
    lease: Duration,
}

impl PgChannel {
    /// Create a channel with default settings.
    ///
    /// Defaults: 5s publish deadline, prefetch 100, 250ms claim poll,
    /// 60s lease.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            publish_timeout: Duration::from_secs(5),
            prefetch: 100,
            poll_interval: Duration::from_millis(250),
            lease: Duration::from_secs(60),
        }
    }

    /// Set the publish acknowledgment deadline.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Set the per-subscriber prefetch limit (messages claimed per batch).
    pub fn with_prefetch(mut self, prefetch: i64) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    /// Set the idle poll interval for subscribers.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the claim lease. A consumer that neither acks nor nacks within
    /// the lease is presumed dead; `reclaim_expired` returns its messages.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Return leased-but-abandoned messages to pending.
    ///
    /// Run periodically by a maintenance task. This recovers messages whose
    /// consumer died between claim and ack; it is crash recovery, not a
    /// retry cap.
    pub async fn reclaim_expired(&self) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE channel_messages
            SET status = 'pending',
                lease_expires_at = NULL
            WHERE status = 'inflight'
              AND lease_expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn route_and_insert(
        &self,
        routing_key: &str,
        body: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        let bindings = sqlx::query("SELECT queue, pattern FROM channel_bindings")
            .fetch_all(&self.pool)
            .await?;

        let queues: BTreeSet<String> = bindings
            .into_iter()
            .filter(|row| topic_matches(row.get("pattern"), routing_key))
            .map(|row| row.get("queue"))
            .collect();

        // Topic exchange semantics: no bound queue, message dropped.
        if queues.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for queue in queues {
            sqlx::query(
                r#"
                INSERT INTO channel_messages (id, queue, routing_key, body, status)
                VALUES ($1, $2, $3, $4, 'pending')
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(queue)
            .bind(routing_key)
            .bind(body)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await
    }
}

#[async_trait]
impl EventChannel for PgChannel {
    async fn publish(&self, routing_key: &str, envelope: &Envelope) -> Result<(), PublishError> {
        let body = serde_json::to_value(envelope)?;

        match tokio::time::timeout(self.publish_timeout, self.route_and_insert(routing_key, &body))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(PublishError::Backend(err.to_string())),
            // The insert may still commit after the deadline; callers treat
            // this as maybe-enqueued per at-least-once semantics.
            Err(_) => Err(PublishError::Timeout(self.publish_timeout)),
        }
    }

    async fn bind_queue(
        &self,
        queue: &str,
        patterns: &[&str],
    ) -> anyhow::Result<Arc<dyn DeliverySource>> {
        for pattern in patterns {
            sqlx::query(
                r#"
                INSERT INTO channel_bindings (queue, pattern)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(queue)
            .bind(pattern)
            .execute(&self.pool)
            .await?;
        }

        Ok(Arc::new(PgDeliverySource {
            pool: self.pool.clone(),
            queue: queue.to_string(),
            prefetch: self.prefetch,
            poll_interval: self.poll_interval,
            lease: self.lease,
            buffer: Mutex::new(VecDeque::new()),
        }))
    }
}

/// Subscriber end of a [`PgChannel`] queue.
///
/// Claims up to `prefetch` messages at a time and hands them out one by
/// one; the claimed-but-unacked window is the prefetch bound.
pub struct PgDeliverySource {
    pool: PgPool,
    queue: String,
    prefetch: i64,
    poll_interval: Duration,
    lease: Duration,
    buffer: Mutex<VecDeque<InboundMessage>>,
}

impl PgDeliverySource {
    /// Claim ready messages for this queue.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` so concurrent subscribers never
    /// contend on the same rows.
    async fn claim_batch(&self) -> Result<Vec<InboundMessage>, sqlx::Error> {
        let lease_expires_at =
            Utc::now() + chrono::Duration::from_std(self.lease).unwrap_or(chrono::Duration::seconds(60));

        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM channel_messages
                WHERE queue = $1
                  AND status = 'pending'
                ORDER BY created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE channel_messages
            SET status = 'inflight',
                lease_expires_at = $3
            WHERE id IN (SELECT id FROM claimable)
            RETURNING id, routing_key, body
            "#,
        )
        .bind(&self.queue)
        .bind(self.prefetch)
        .bind(lease_expires_at)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let body: serde_json::Value = row.get("body");
                Ok(InboundMessage {
                    routing_key: row.get("routing_key"),
                    body: serde_json::to_vec(&body)
                        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                    delivery_id: row.get("id"),
                })
            })
            .collect()
    }
}

#[async_trait]
impl DeliverySource for PgDeliverySource {
    async fn next(&self) -> Option<InboundMessage> {
        loop {
            if let Some(msg) = self
                .buffer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
            {
                return Some(msg);
            }

            match self.claim_batch().await {
                Ok(claimed) if !claimed.is_empty() => {
                    self.buffer
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .extend(claimed);
                }
                Ok(_) => tokio::time::sleep(self.poll_interval).await,
                Err(err) => {
                    warn!(queue = %self.queue, error = %err, "claim failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Remove the message permanently.
    async fn ack(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM channel_messages WHERE id = $1")
            .bind(msg.delivery_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Release the message for redelivery.
    async fn nack_requeue(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE channel_messages
            SET status = 'pending',
                lease_expires_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(msg.delivery_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
