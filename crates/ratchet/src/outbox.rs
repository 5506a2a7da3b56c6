//! Transactional outbox records and the relay-facing store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Lifecycle of an outbox record.
///
/// Transitions are `Pending -> Processed` or `Pending -> Failed`, never
/// reversed and never skipping `Pending`. `Failed` is terminal with no
/// automatic retry; re-driving a failed record is an operator action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processed" => Some(Self::Processed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Durable notification written in the same transaction as the domain
/// mutation it announces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: Uuid,
    /// Identifier of the domain entity the notification concerns.
    pub aggregate_id: String,
    /// Classification string, used as the routing key on publish.
    pub event_type: String,
    /// Opaque event body; the core does not interpret its shape.
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    /// Set when the record reaches `Processed`.
    pub published_at: Option<DateTime<Utc>>,
}

/// Store contract consumed by the relay.
///
/// Appending records is backend-specific because it must participate in the
/// caller's open transaction; see `ratchet-postgres::PgOutbox::append` and
/// [`crate::memory::MemoryOutbox::append`].
#[async_trait]
pub trait OutboxSource: Send + Sync {
    /// Fetch up to `limit` pending records, oldest `created_at` first.
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Transition a record to `Processed` and stamp `published_at`.
    /// Re-marking a terminal record is a no-op, not an error.
    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError>;

    /// Transition a record to `Failed`. Idempotent like `mark_processed`.
    async fn mark_failed(&self, id: Uuid) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Processed,
            OutboxStatus::Failed,
        ] {
            assert_eq!(OutboxStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OutboxStatus::parse("inflight"), None);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!OutboxStatus::Pending.is_terminal());
        assert!(OutboxStatus::Processed.is_terminal());
        assert!(OutboxStatus::Failed.is_terminal());
    }
}
