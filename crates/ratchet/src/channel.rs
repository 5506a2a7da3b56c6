//! Message channel contracts: topic-routed publish, queue binding, and
//! manually-acknowledged delivery.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::envelope::Envelope;
use crate::error::PublishError;

/// A delivered message. Transport-level only — created by the channel on
/// delivery, gone once acked or nacked.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Routing key the message was published under.
    pub routing_key: String,
    /// Serialized [`Envelope`].
    pub body: Vec<u8>,
    /// Opaque delivery identity for ack/nack. Stable across redeliveries of
    /// the same message.
    pub delivery_id: Uuid,
}

/// A durable topic-routed publish/subscribe transport.
///
/// Publishing binds a routing key to the channel's topic space; subscribing
/// binds a named queue to one or more routing-key patterns so multiple
/// logical consumers can coexist.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Publish an envelope under a routing key.
    ///
    /// Returns only once the backend acknowledged receipt (not delivery) or
    /// the bounded deadline elapsed. On [`PublishError::Timeout`] the message
    /// may still have been enqueued — callers must treat publish as
    /// at-least-once and only record success on a clean `Ok`.
    ///
    /// A routing key no queue is bound to is dropped silently (topic
    /// exchange semantics).
    async fn publish(&self, routing_key: &str, envelope: &Envelope) -> Result<(), PublishError>;

    /// Declare `queue`, bind it to each pattern, and return the shared
    /// delivery stream consumers pull from.
    async fn bind_queue(
        &self,
        queue: &str,
        patterns: &[&str],
    ) -> anyhow::Result<Arc<dyn DeliverySource>>;
}

/// Shared stream of deliveries for one queue, with manual acknowledgment.
///
/// Multiple workers may pull from one source concurrently; each message is
/// handed to exactly one of them. Unacknowledged in-flight messages are
/// bounded by the source's prefetch limit, which is the backpressure control
/// keeping a slow consumer from being overrun.
#[async_trait]
pub trait DeliverySource: Send + Sync {
    /// Next delivery. `None` means the channel shut down and no further
    /// deliveries will arrive; transient backend failures are retried
    /// internally, not surfaced here.
    async fn next(&self) -> Option<InboundMessage>;

    /// Acknowledge: remove the message permanently.
    async fn ack(&self, msg: &InboundMessage) -> anyhow::Result<()>;

    /// Negative-acknowledge with requeue: the backend will redeliver,
    /// possibly to a different worker and out of order. There is no
    /// redelivery cap and no dead-letter routing — a handler that always
    /// fails retries forever.
    async fn nack_requeue(&self, msg: &InboundMessage) -> anyhow::Result<()>;
}
