//! Outbox relay: a single polling worker draining pending records into the
//! channel.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::EventChannel;
use crate::envelope::Envelope;
use crate::error::PublishError;
use crate::outbox::{OutboxRecord, OutboxSource};

/// Outcome counters for one relay tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    /// Pending records fetched this tick.
    pub fetched: usize,
    /// Records published and marked processed.
    pub published: usize,
    /// Records whose publish failed and were marked failed (terminal).
    pub failed: usize,
}

/// Background worker that turns outbox rows into channel messages.
///
/// Strictly serial: one tick at a time, records within a tick published one
/// by one in creation order. Decoupling publish from the original
/// transaction means a slow channel never blocks domain writes; the cost is
/// publish latency bounded by the interval, and duplicates at the
/// publish/mark boundary.
pub struct Relay<S, C> {
    store: S,
    channel: C,
    interval: Duration,
    batch_size: i64,
}

impl<S, C> Relay<S, C> {
    pub fn new(store: S, channel: C) -> Self {
        Self {
            store,
            channel,
            interval: Duration::from_secs(5),
            batch_size: 10,
        }
    }

    /// Set the polling interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the maximum records drained per tick.
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }
}

impl<S: OutboxSource, C: EventChannel> Relay<S, C> {
    /// Run one tick: fetch a batch of pending records and publish each.
    ///
    /// A fetch failure abandons the tick — the rows stay pending and the
    /// next tick retries. A single record's publish failure marks only that
    /// record failed; its siblings are still attempted.
    pub async fn tick(&self) -> TickStats {
        let records = match self.store.fetch_pending(self.batch_size).await {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "outbox poll failed, abandoning tick");
                return TickStats::default();
            }
        };

        let mut stats = TickStats {
            fetched: records.len(),
            ..TickStats::default()
        };

        for record in records {
            self.process_record(record, &mut stats).await;
        }
        stats
    }

    async fn process_record(&self, record: OutboxRecord, stats: &mut TickStats) {
        let envelope = Envelope::from_value(record.event_type.clone(), record.payload.clone());

        match self.channel.publish(&record.event_type, &envelope).await {
            Ok(()) => {
                stats.published += 1;
                if let Err(err) = self.store.mark_processed(record.id).await {
                    // The record stays pending and is republished next tick;
                    // consumers absorb the duplicate.
                    warn!(id = %record.id, error = %err, "mark processed failed");
                }
            }
            Err(err) => {
                stats.failed += 1;
                log_publish_failure(&record, &err);
                if let Err(err) = self.store.mark_failed(record.id).await {
                    warn!(id = %record.id, error = %err, "mark failed failed");
                }
            }
        }
    }

    /// Poll on a fixed interval until `cancel` fires.
    ///
    /// Ticks never overlap: the next one is not started while the previous
    /// is still running. On cancellation the in-flight tick completes before
    /// the loop exits.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.interval, batch_size = self.batch_size, "outbox relay started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let stats = self.tick().await;
                    if stats.fetched > 0 {
                        debug!(
                            fetched = stats.fetched,
                            published = stats.published,
                            failed = stats.failed,
                            "relay tick"
                        );
                    }
                }
            }
        }
        info!("outbox relay stopped");
    }
}

fn log_publish_failure(record: &OutboxRecord, err: &PublishError) {
    match err {
        // The broker ack may have raced the deadline; the message can still
        // surface downstream even though the record is parked as failed.
        PublishError::Timeout(_) => warn!(
            id = %record.id,
            event_type = %record.event_type,
            error = %err,
            "publish unacknowledged, marking failed"
        ),
        _ => warn!(
            id = %record.id,
            event_type = %record.event_type,
            error = %err,
            "publish failed, marking failed"
        ),
    }
}
