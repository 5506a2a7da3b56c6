//! Error taxonomy for the delivery core.
//!
//! The split matters more than the variants: transient failures are retried
//! (relay: next tick, consumer: nack-requeue), non-retryable failures are
//! logged and dropped, and an idempotency hit is success, not an error.

use thiserror::Error;

/// Error publishing an envelope to the channel.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The envelope could not be encoded. Non-retryable.
    #[error("failed to encode event: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend did not acknowledge receipt within the deadline.
    ///
    /// A timeout does NOT guarantee the message was not enqueued — the
    /// acknowledgment can race a connection drop. Callers must only mark
    /// records processed after a clean `Ok`, accepting duplicate publishes.
    #[error("publish not acknowledged within {0:?}")]
    Timeout(std::time::Duration),

    /// The channel is shut down.
    #[error("channel closed")]
    Closed,

    /// Transport failure talking to the backend.
    #[error("channel backend: {0}")]
    Backend(String),
}

/// Error from the outbox store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The payload could not be encoded. Non-retryable; aborts the caller's
    /// transaction.
    #[error("failed to encode payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend failure. Transient from the relay's point of view: rows stay
    /// pending and are retried on the next tick.
    #[error("outbox backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wrap a backend-specific error.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Error from a message handler, carrying its retry disposition.
///
/// Only [`ConsumeError::Transient`] causes a nack-with-requeue; everything
/// else is acknowledged and dropped, since redelivery cannot fix it.
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// The payload was structurally valid but semantically malformed.
    #[error("invalid payload: {0}")]
    Validation(String),

    /// The message body could not be decoded at all.
    #[error("failed to decode message: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The envelope names an event type this consumer does not know.
    /// Distinct from a malformed body and never fatal.
    #[error("unrecognized event type {0:?}")]
    UnrecognizedEventType(String),

    /// A side effect or commit failed in a way redelivery can fix.
    #[error("transient failure: {0}")]
    Transient(#[source] anyhow::Error),
}

impl ConsumeError {
    /// Build a transient (requeueing) error from any error value.
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self::Transient(err.into())
    }

    /// Whether redelivery should be requested for this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
