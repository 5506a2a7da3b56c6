//! In-memory backends for testing and single-process scenarios.
//!
//! [`MemoryOutbox`] and [`MemoryChannel`] implement the same contracts as
//! the Postgres backends but keep everything in process memory. They honor
//! the delivery semantics (manual ack, nack-requeue, prefetch bound, topic
//! bindings) without surviving a restart — durability comes from the
//! `ratchet-postgres` backends.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use crate::channel::{DeliverySource, EventChannel, InboundMessage};
use crate::envelope::{topic_matches, Envelope};
use crate::error::{PublishError, StoreError};
use crate::outbox::{OutboxRecord, OutboxSource, OutboxStatus};

/// In-memory outbox store.
///
/// Records keep insertion order, which doubles as creation-time order.
#[derive(Clone, Default)]
pub struct MemoryOutbox {
    records: Arc<Mutex<Vec<OutboxRecord>>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pending record.
    ///
    /// The in-memory store has no real transactions; appends are atomic
    /// under the store lock, which is enough for the scenarios it backs.
    pub fn append<T>(
        &self,
        aggregate_id: &str,
        event_type: &str,
        payload: &T,
    ) -> Result<Uuid, StoreError>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        let id = Uuid::new_v4();
        let record = OutboxRecord {
            id,
            aggregate_id: aggregate_id.to_string(),
            event_type: event_type.to_string(),
            payload,
            status: OutboxStatus::Pending,
            created_at: Utc::now(),
            published_at: None,
        };
        self.records.lock().unwrap_or_else(|e| e.into_inner()).push(record);
        Ok(id)
    }

    /// Snapshot of all records, in creation order.
    pub fn records(&self) -> Vec<OutboxRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Current status of a record, if it exists.
    pub fn status_of(&self, id: Uuid) -> Option<OutboxStatus> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.status)
    }

    fn mark(&self, id: Uuid, status: OutboxStatus) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            // Terminal statuses never rewind; re-marking is a no-op.
            if record.status == OutboxStatus::Pending {
                record.status = status;
                if status == OutboxStatus::Processed {
                    record.published_at = Some(Utc::now());
                }
            }
        }
    }
}

#[async_trait]
impl OutboxSource for MemoryOutbox {
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .iter()
            .filter(|r| r.status == OutboxStatus::Pending)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError> {
        self.mark(id, OutboxStatus::Processed);
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid) -> Result<(), StoreError> {
        self.mark(id, OutboxStatus::Failed);
        Ok(())
    }
}

struct MemoryQueue {
    bindings: Vec<String>,
    tx: UnboundedSender<InboundMessage>,
    rx: Arc<tokio::sync::Mutex<UnboundedReceiver<InboundMessage>>>,
}

/// In-memory topic exchange.
///
/// Publishing routes to every queue with a matching binding; unroutable
/// messages are dropped. Queue depth is unbounded; the prefetch limit bounds
/// unacknowledged in-flight deliveries per subscriber instead.
#[derive(Clone)]
pub struct MemoryChannel {
    queues: Arc<DashMap<String, MemoryQueue>>,
    prefetch: usize,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            prefetch: 100,
        }
    }

    /// Set the prefetch limit handed to subscribers.
    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }
}

#[async_trait]
impl EventChannel for MemoryChannel {
    async fn publish(&self, routing_key: &str, envelope: &Envelope) -> Result<(), PublishError> {
        let body = envelope.to_bytes()?;

        // Collect matching senders first; never hold a map guard across a send.
        let targets: Vec<UnboundedSender<InboundMessage>> = self
            .queues
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .bindings
                    .iter()
                    .any(|pattern| topic_matches(pattern, routing_key))
            })
            .map(|entry| entry.value().tx.clone())
            .collect();

        for tx in targets {
            let msg = InboundMessage {
                routing_key: routing_key.to_string(),
                body: body.clone(),
                delivery_id: Uuid::new_v4(),
            };
            tx.send(msg).map_err(|_| PublishError::Closed)?;
        }
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        patterns: &[&str],
    ) -> anyhow::Result<Arc<dyn DeliverySource>> {
        let mut entry = self.queues.entry(queue.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            MemoryQueue {
                bindings: Vec::new(),
                tx,
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
            }
        });

        for pattern in patterns {
            if !entry.bindings.iter().any(|b| b == pattern) {
                entry.bindings.push((*pattern).to_string());
            }
        }

        Ok(Arc::new(MemoryDeliverySource {
            rx: Arc::clone(&entry.rx),
            requeue: entry.tx.clone(),
            prefetch: Arc::new(Semaphore::new(self.prefetch)),
            inflight: DashMap::new(),
        }))
    }
}

/// Subscriber end of a [`MemoryChannel`] queue.
pub struct MemoryDeliverySource {
    rx: Arc<tokio::sync::Mutex<UnboundedReceiver<InboundMessage>>>,
    requeue: UnboundedSender<InboundMessage>,
    prefetch: Arc<Semaphore>,
    inflight: DashMap<Uuid, OwnedSemaphorePermit>,
}

#[async_trait]
impl DeliverySource for MemoryDeliverySource {
    async fn next(&self) -> Option<InboundMessage> {
        // Holding a permit per unacked message enforces the prefetch bound.
        let permit = self.prefetch.clone().acquire_owned().await.ok()?;
        let msg = self.rx.lock().await.recv().await?;
        self.inflight.insert(msg.delivery_id, permit);
        Some(msg)
    }

    async fn ack(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        self.inflight.remove(&msg.delivery_id);
        Ok(())
    }

    async fn nack_requeue(&self, msg: &InboundMessage) -> anyhow::Result<()> {
        self.inflight.remove(&msg.delivery_id);
        self.requeue
            .send(msg.clone())
            .map_err(|_| anyhow::anyhow!("queue closed"))
    }
}

/// Buffered fan-in used by tests that only need to observe published
/// envelopes without a full queue round-trip.
#[derive(Clone, Default)]
pub struct RecordingChannel {
    published: Arc<Mutex<VecDeque<(String, Envelope)>>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelopes published so far, in order.
    pub fn published(&self) -> Vec<(String, Envelope)> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventChannel for RecordingChannel {
    async fn publish(&self, routing_key: &str, envelope: &Envelope) -> Result<(), PublishError> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back((routing_key.to_string(), envelope.clone()));
        Ok(())
    }

    async fn bind_queue(
        &self,
        _queue: &str,
        _patterns: &[&str],
    ) -> anyhow::Result<Arc<dyn DeliverySource>> {
        anyhow::bail!("recording channel has no delivery side")
    }
}
