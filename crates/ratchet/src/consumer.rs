//! Bounded consumer pool: N fixed workers over one shared delivery stream.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{DeliverySource, InboundMessage};
use crate::error::ConsumeError;

/// Per-message processing logic supplied by the application.
///
/// Implementations must be safe under concurrent calls from multiple
/// workers; clients they hold (pools, stores) are shared, not per-worker.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, routing_key: &str, body: &[u8]) -> Result<(), ConsumeError>;
}

/// Fixed-size worker pool owning its own lifecycle.
///
/// The worker count is a configured constant, not derived from load.
/// Delivery order across workers is not guaranteed. A handler error never
/// crashes a worker: the message is nacked (retryable) or acked-and-dropped
/// (non-retryable) and the worker moves on.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawn `workers` tasks pulling from `source` and invoking `handler`.
    ///
    /// Workers stop pulling when `cancel` fires but finish the message they
    /// hold first; anything claimed-but-unacked at a hard kill is redelivered
    /// by the channel backend.
    pub fn start(
        source: Arc<dyn DeliverySource>,
        handler: Arc<dyn MessageHandler>,
        workers: usize,
        cancel: CancellationToken,
    ) -> Self {
        let handles = (0..workers)
            .map(|worker| {
                let source = Arc::clone(&source);
                let handler = Arc::clone(&handler);
                let cancel = cancel.clone();
                tokio::spawn(async move { worker_loop(worker, source, handler, cancel).await })
            })
            .collect();

        info!(workers, "consumer pool started");
        Self { handles, cancel }
    }

    /// Stop accepting deliveries and drain in-flight handlers.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("consumer pool stopped");
    }
}

async fn worker_loop(
    worker: usize,
    source: Arc<dyn DeliverySource>,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = source.next() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        dispose(worker, &*source, &*handler, &msg).await;
    }
    debug!(worker, "worker stopped");
}

async fn dispose(
    worker: usize,
    source: &dyn DeliverySource,
    handler: &dyn MessageHandler,
    msg: &InboundMessage,
) {
    match handler.handle(&msg.routing_key, &msg.body).await {
        Ok(()) => {
            if let Err(err) = source.ack(msg).await {
                warn!(worker, routing_key = %msg.routing_key, error = %err, "ack failed");
            }
        }
        Err(err) if err.is_retryable() => {
            warn!(
                worker,
                routing_key = %msg.routing_key,
                error = %err,
                "processing failed, requeueing"
            );
            if let Err(err) = source.nack_requeue(msg).await {
                warn!(worker, routing_key = %msg.routing_key, error = %err, "nack failed");
            }
        }
        Err(err) => {
            // Redelivery cannot fix these; drop the message.
            warn!(
                worker,
                routing_key = %msg.routing_key,
                error = %err,
                "dropping unprocessable message"
            );
            if let Err(err) = source.ack(msg).await {
                warn!(worker, routing_key = %msg.routing_key, error = %err, "ack failed");
            }
        }
    }
}
