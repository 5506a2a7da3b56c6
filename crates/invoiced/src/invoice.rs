//! Invoice entity and repositories.
//!
//! The natural key is the order id: one invoice per paid order, enforced by
//! a unique constraint at the storage layer. A conflict on that key is the
//! idempotency signal, not a failure.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ratchet_core::StoreError;
use ratchet_postgres::PgOutbox;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::events::{self, InvoiceGenerated};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceStatus {
    Pending,
    Completed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invoice {
    pub id: Uuid,
    pub order_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub status: InvoiceStatus,
    /// Object-store key of the rendered document.
    pub document_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Build a completed invoice for a paid order.
    pub fn completed(order_id: &str, user_id: &str, amount: Decimal, document_key: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id: order_id.to_string(),
            user_id: user_id.to_string(),
            amount,
            status: InvoiceStatus::Completed,
            document_key: document_key.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// An invoice for this order already exists — the idempotency signal.
    #[error("an invoice for order {0} already exists")]
    Conflict(String),

    #[error("failed to encode outbox payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("repository backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl RepositoryError {
    fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

impl From<StoreError> for RepositoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Serialization(e) => Self::Serialization(e),
            StoreError::Backend(e) => Self::Backend(e),
        }
    }
}

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Invoice>, RepositoryError>;

    /// Insert the invoice and append its `invoice.generated` outbox record
    /// in one ACID transaction — the second delivery hop inherits the same
    /// atomicity as the first.
    async fn create_with_event(&self, invoice: Invoice) -> Result<(), RepositoryError>;
}

/// PostgreSQL invoice repository.
#[derive(Clone)]
pub struct PgInvoiceRepository {
    pool: PgPool,
    outbox: PgOutbox,
}

impl PgInvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        let outbox = PgOutbox::new(pool.clone());
        Self { pool, outbox }
    }
}

#[async_trait]
impl InvoiceRepository for PgInvoiceRepository {
    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Invoice>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, order_id, user_id, amount, status, document_key, created_at, updated_at
            FROM invoices
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::backend)?;

        Ok(row.map(|row| Invoice {
            id: row.get("id"),
            order_id: row.get("order_id"),
            user_id: row.get("user_id"),
            amount: row.get("amount"),
            status: InvoiceStatus::parse(row.get("status")).unwrap_or(InvoiceStatus::Completed),
            document_key: row.get("document_key"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn create_with_event(&self, invoice: Invoice) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::backend)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO invoices (id, order_id, user_id, amount, status, document_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(invoice.id)
        .bind(&invoice.order_id)
        .bind(&invoice.user_id)
        .bind(invoice.amount)
        .bind(invoice.status.as_str())
        .bind(&invoice.document_key)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if err
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                return Err(RepositoryError::Conflict(invoice.order_id));
            }
            return Err(RepositoryError::backend(err));
        }

        self.outbox
            .append(
                &mut tx,
                &invoice.id.to_string(),
                events::INVOICE_GENERATED,
                &InvoiceGenerated {
                    order_id: invoice.order_id.clone(),
                    invoice_url: invoice.document_key.clone(),
                },
            )
            .await?;

        tx.commit().await.map_err(RepositoryError::backend)
    }
}

/// In-memory invoice repository for tests and single-process use.
///
/// The check-and-insert runs under one lock, which stands in for the
/// database's unique constraint.
#[derive(Clone, Default)]
pub struct MemoryInvoiceRepository {
    invoices: Arc<Mutex<HashMap<String, Invoice>>>,
    outbox: ratchet_core::memory::MemoryOutbox,
}

impl MemoryInvoiceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// The outbox that `create_with_event` appends to.
    pub fn outbox(&self) -> &ratchet_core::memory::MemoryOutbox {
        &self.outbox
    }

    pub fn len(&self) -> usize {
        self.invoices.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl InvoiceRepository for MemoryInvoiceRepository {
    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Invoice>, RepositoryError> {
        Ok(self
            .invoices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(order_id)
            .cloned())
    }

    async fn create_with_event(&self, invoice: Invoice) -> Result<(), RepositoryError> {
        let mut invoices = self.invoices.lock().unwrap_or_else(|e| e.into_inner());
        if invoices.contains_key(&invoice.order_id) {
            return Err(RepositoryError::Conflict(invoice.order_id));
        }

        self.outbox.append(
            &invoice.id.to_string(),
            events::INVOICE_GENERATED,
            &InvoiceGenerated {
                order_id: invoice.order_id.clone(),
                invoice_url: invoice.document_key.clone(),
            },
        )?;
        invoices.insert(invoice.order_id.clone(), invoice);
        Ok(())
    }
}
