//! Cross-component delivery scenarios: relay batching, partial failure,
//! at-least-once republish, redelivery, and pool shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::memory::{MemoryChannel, MemoryOutbox, RecordingChannel};
use crate::{
    ConsumeError, DeliverySource, Envelope, EventChannel, MessageHandler, OutboxRecord,
    OutboxSource, OutboxStatus, PublishError, Relay, StoreError, WorkerPool,
};

/// Channel wrapper that rejects publishes for chosen routing keys.
struct FlakyChannel {
    inner: MemoryChannel,
    reject: Vec<String>,
}

#[async_trait]
impl EventChannel for FlakyChannel {
    async fn publish(&self, routing_key: &str, envelope: &Envelope) -> Result<(), PublishError> {
        if self.reject.iter().any(|k| k == routing_key) {
            return Err(PublishError::Backend("connection reset".into()));
        }
        self.inner.publish(routing_key, envelope).await
    }

    async fn bind_queue(
        &self,
        queue: &str,
        patterns: &[&str],
    ) -> anyhow::Result<Arc<dyn DeliverySource>> {
        self.inner.bind_queue(queue, patterns).await
    }
}

/// Store wrapper whose `mark_processed` fails a fixed number of times,
/// simulating a crash between broker ack and bookkeeping.
struct AmnesiacStore {
    inner: MemoryOutbox,
    mark_failures: AtomicUsize,
}

#[async_trait]
impl OutboxSource for AmnesiacStore {
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, StoreError> {
        self.inner.fetch_pending(limit).await
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError> {
        if self.mark_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            (n > 0).then(|| n - 1)
        }).is_ok()
        {
            return Err(StoreError::backend(std::io::Error::other("lost connection")));
        }
        self.inner.mark_processed(id).await
    }

    async fn mark_failed(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.mark_failed(id).await
    }
}

#[tokio::test]
async fn tick_drains_oldest_first_up_to_batch_size() {
    let outbox = MemoryOutbox::new();
    let channel = RecordingChannel::new();

    for n in 1..=3 {
        outbox.append("agg", "order.paid", &json!({"n": n})).unwrap();
    }

    let relay = Relay::new(outbox.clone(), channel.clone()).with_batch_size(2);
    let stats = relay.tick().await;

    assert_eq!(stats.fetched, 2);
    assert_eq!(stats.published, 2);

    let published = channel.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].1.data["n"], 1);
    assert_eq!(published[1].1.data["n"], 2);

    // The third row is still pending for the next tick.
    let pending = outbox.fetch_pending(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload["n"], 3);
}

#[tokio::test]
async fn one_rejected_record_does_not_stop_the_batch() {
    let outbox = MemoryOutbox::new();
    let ok_a = outbox.append("a", "order.paid", &json!({"n": 1})).unwrap();
    let bad = outbox.append("b", "order.refunded", &json!({"n": 2})).unwrap();
    let ok_b = outbox.append("c", "order.paid", &json!({"n": 3})).unwrap();

    let channel = FlakyChannel {
        inner: MemoryChannel::new(),
        reject: vec!["order.refunded".into()],
    };
    let relay = Relay::new(outbox.clone(), channel).with_batch_size(10);

    let stats = relay.tick().await;
    assert_eq!(stats.fetched, 3);
    assert_eq!(stats.published, 2);
    assert_eq!(stats.failed, 1);

    assert_eq!(outbox.status_of(ok_a), Some(OutboxStatus::Processed));
    assert_eq!(outbox.status_of(ok_b), Some(OutboxStatus::Processed));
    // Publish failure is terminal: no retry scheduling.
    assert_eq!(outbox.status_of(bad), Some(OutboxStatus::Failed));
    assert!(outbox.fetch_pending(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn crash_between_publish_and_mark_republishes() {
    let outbox = MemoryOutbox::new();
    let id = outbox.append("agg", "order.paid", &json!({"orderId": "o-1"})).unwrap();

    let channel = RecordingChannel::new();
    let store = AmnesiacStore {
        inner: outbox.clone(),
        mark_failures: AtomicUsize::new(1),
    };
    let relay = Relay::new(store, channel.clone());

    // First tick publishes but fails to record it; the row stays pending.
    relay.tick().await;
    assert_eq!(outbox.status_of(id), Some(OutboxStatus::Pending));

    // Next tick republishes the same record, then marks it.
    relay.tick().await;
    assert_eq!(outbox.status_of(id), Some(OutboxStatus::Processed));

    let published = channel.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].1, published[1].1);
}

#[tokio::test]
async fn poll_failure_abandons_tick_and_rows_survive() {
    struct BrokenStore;

    #[async_trait]
    impl OutboxSource for BrokenStore {
        async fn fetch_pending(&self, _limit: i64) -> Result<Vec<OutboxRecord>, StoreError> {
            Err(StoreError::backend(std::io::Error::other("db down")))
        }
        async fn mark_processed(&self, _id: Uuid) -> Result<(), StoreError> {
            unreachable!("nothing fetched, nothing marked")
        }
        async fn mark_failed(&self, _id: Uuid) -> Result<(), StoreError> {
            unreachable!("nothing fetched, nothing marked")
        }
    }

    let relay = Relay::new(BrokenStore, RecordingChannel::new());
    let stats = relay.tick().await;
    assert_eq!(stats, crate::TickStats::default());
}

/// Handler that fails each message a configured number of times before
/// succeeding, and records every natural key it completed.
struct RetryThenSucceed {
    failures_left: Mutex<usize>,
    attempts: AtomicUsize,
    completed: Mutex<Vec<String>>,
}

#[async_trait]
impl MessageHandler for RetryThenSucceed {
    async fn handle(&self, _routing_key: &str, body: &[u8]) -> Result<(), ConsumeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(ConsumeError::transient(std::io::Error::other("render failed")));
            }
        }
        let envelope = Envelope::from_bytes(body)?;
        let key = envelope.data["orderId"].as_str().unwrap_or_default().to_string();
        self.completed.lock().unwrap().push(key);
        Ok(())
    }
}

#[tokio::test]
async fn failed_handler_gets_redelivered_until_success() {
    let channel = MemoryChannel::new();
    let source = channel.bind_queue("invoices", &["order.paid"]).await.unwrap();

    let handler = Arc::new(RetryThenSucceed {
        failures_left: Mutex::new(2),
        attempts: AtomicUsize::new(0),
        completed: Mutex::new(Vec::new()),
    });

    let cancel = CancellationToken::new();
    let pool = WorkerPool::start(source, handler.clone(), 2, cancel.clone());

    let envelope = Envelope::new("order.paid", &json!({"orderId": "o-1"})).unwrap();
    channel.publish("order.paid", &envelope).await.unwrap();

    // Two nack-requeues, then success.
    tokio::time::timeout(Duration::from_secs(5), async {
        while handler.completed.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("message never completed");

    assert_eq!(handler.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(*handler.completed.lock().unwrap(), vec!["o-1".to_string()]);

    pool.shutdown().await;
}

#[tokio::test]
async fn non_retryable_failures_are_dropped_not_requeued() {
    struct RejectAll {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for RejectAll {
        async fn handle(&self, _routing_key: &str, _body: &[u8]) -> Result<(), ConsumeError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(ConsumeError::UnrecognizedEventType("order.shredded".into()))
        }
    }

    let channel = MemoryChannel::new();
    let source = channel.bind_queue("invoices", &["#"]).await.unwrap();
    let handler = Arc::new(RejectAll {
        attempts: AtomicUsize::new(0),
    });

    let cancel = CancellationToken::new();
    let pool = WorkerPool::start(source, handler.clone(), 1, cancel.clone());

    let envelope = Envelope::new("order.shredded", &json!({})).unwrap();
    channel.publish("order.shredded", &envelope).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.shutdown().await;

    // Acked and dropped on the first attempt; no redelivery loop.
    assert_eq!(handler.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn keys_settle_identically_regardless_of_delivery_order() {
    // Process two independent keys in both relative orders; each key's final
    // state must be the same either way.
    for flip in [false, true] {
        let channel = MemoryChannel::new();
        let source = channel.bind_queue("invoices", &["order.paid"]).await.unwrap();

        let handler = Arc::new(RetryThenSucceed {
            failures_left: Mutex::new(0),
            attempts: AtomicUsize::new(0),
            completed: Mutex::new(Vec::new()),
        });

        let cancel = CancellationToken::new();
        let pool = WorkerPool::start(source, handler.clone(), 1, cancel.clone());

        let mut keys = vec!["o-1", "o-2"];
        if flip {
            keys.reverse();
        }
        for key in &keys {
            let envelope = Envelope::new("order.paid", &json!({"orderId": key})).unwrap();
            channel.publish("order.paid", &envelope).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while handler.completed.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("messages never completed");
        pool.shutdown().await;

        let mut completed = handler.completed.lock().unwrap().clone();
        completed.sort();
        assert_eq!(completed, vec!["o-1".to_string(), "o-2".to_string()]);
    }
}

#[tokio::test]
async fn burst_of_random_keys_all_complete_exactly_once() {
    let channel = MemoryChannel::new().with_prefetch(8);
    let source = channel.bind_queue("invoices", &["order.paid"]).await.unwrap();

    let handler = Arc::new(RetryThenSucceed {
        failures_left: Mutex::new(0),
        attempts: AtomicUsize::new(0),
        completed: Mutex::new(Vec::new()),
    });

    let cancel = CancellationToken::new();
    let pool = WorkerPool::start(source, handler.clone(), 4, cancel.clone());

    let mut keys: Vec<String> = (0..50).map(|n| format!("o-{n}")).collect();
    fastrand::shuffle(&mut keys);
    for key in &keys {
        let envelope = Envelope::new("order.paid", &json!({"orderId": key})).unwrap();
        channel.publish("order.paid", &envelope).await.unwrap();
    }

    tokio::time::timeout(Duration::from_secs(10), async {
        while handler.completed.lock().unwrap().len() < keys.len() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("burst never drained");
    pool.shutdown().await;

    let mut completed = handler.completed.lock().unwrap().clone();
    completed.sort();
    keys.sort();
    assert_eq!(completed, keys);
}

#[tokio::test]
async fn relay_run_stops_on_cancel_after_finishing_tick() {
    let outbox = MemoryOutbox::new();
    outbox.append("agg", "order.paid", &json!({"n": 1})).unwrap();

    let channel = RecordingChannel::new();
    let relay = Relay::new(outbox.clone(), channel.clone())
        .with_interval(Duration::from_millis(10));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(relay.run(cancel.clone()));

    tokio::time::timeout(Duration::from_secs(5), async {
        while channel.published().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("relay never published");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("relay did not stop")
        .unwrap();
}
