//! Inbound processor for `order.paid` events.
//!
//! Per message: decode → idempotency pre-check → render → upload → atomic
//! commit of the invoice row and its `invoice.generated` outbox record →
//! ack. The pre-check is a cheap guard that skips rendering and upload for
//! known duplicates; the unique constraint on the order id is what actually
//! closes the race between concurrent deliveries of the same key.

use async_trait::async_trait;
use ratchet_core::{ConsumeError, MessageHandler};
use tracing::{debug, info};
use uuid::Uuid;

use crate::events::{DomainEvent, OrderPaid};
use crate::invoice::{Invoice, InvoiceRepository, RepositoryError};
use crate::render::DocumentRenderer;
use crate::storage::ObjectStore;

pub struct InvoiceProcessor<R, S, D> {
    repo: R,
    store: S,
    renderer: D,
    key_prefix: String,
}

impl<R, S, D> InvoiceProcessor<R, S, D> {
    pub fn new(repo: R, store: S, renderer: D, key_prefix: impl Into<String>) -> Self {
        Self {
            repo,
            store,
            renderer,
            key_prefix: key_prefix.into(),
        }
    }

    fn document_key(&self, order: &OrderPaid) -> String {
        format!(
            "{}/{}/{}.txt",
            self.key_prefix, order.user_id, order.order_id
        )
    }
}

impl<R, S, D> InvoiceProcessor<R, S, D>
where
    R: InvoiceRepository,
    S: ObjectStore,
    D: DocumentRenderer,
{
    async fn process_order_paid(&self, order: OrderPaid) -> Result<(), ConsumeError> {
        // Events without an order id carry nothing to invoice.
        if order.order_id.is_empty() {
            return Ok(());
        }

        let existing = self
            .repo
            .find_by_order_id(&order.order_id)
            .await
            .map_err(ConsumeError::transient)?;
        if existing.is_some() {
            debug!(order_id = %order.order_id, "invoice already exists, skipping");
            return Ok(());
        }

        let invoice_id = Uuid::new_v4();
        let document = self
            .renderer
            .render(&order, invoice_id)
            .map_err(ConsumeError::transient)?;

        let stored_key = self
            .store
            .put(&self.document_key(&order), document)
            .await
            .map_err(ConsumeError::transient)?;

        let invoice = Invoice {
            id: invoice_id,
            ..Invoice::completed(
                &order.order_id,
                &order.user_id,
                order.total_amount,
                &stored_key,
            )
        };

        match self.repo.create_with_event(invoice).await {
            Ok(()) => {
                info!(order_id = %order.order_id, invoice_id = %invoice_id, "invoice generated");
                Ok(())
            }
            // A concurrent delivery won the unique key; this one is done.
            Err(RepositoryError::Conflict(order_id)) => {
                debug!(order_id = %order_id, "duplicate suppressed by natural key");
                Ok(())
            }
            Err(err) => Err(ConsumeError::transient(err)),
        }
    }
}

#[async_trait]
impl<R, S, D> MessageHandler for InvoiceProcessor<R, S, D>
where
    R: InvoiceRepository,
    S: ObjectStore,
    D: DocumentRenderer,
{
    async fn handle(&self, _routing_key: &str, body: &[u8]) -> Result<(), ConsumeError> {
        match DomainEvent::decode(body)? {
            DomainEvent::OrderPaid(order) => self.process_order_paid(order).await,
            // Known but not ours to handle; acknowledge without effect.
            other => {
                debug!(event_type = other.event_type(), "ignoring event");
                Ok(())
            }
        }
    }
}
