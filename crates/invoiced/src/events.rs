//! Domain event payloads and decode-or-reject typing.
//!
//! Wire format is the channel envelope `{"eventType", "data"}` with
//! camelCase field names. Monetary fields use `Decimal`, which serializes
//! as a string — amounts round-trip without floating-point loss.

use chrono::{DateTime, Utc};
use ratchet_core::{ConsumeError, Envelope};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Routing key of the event that triggers invoice generation.
pub const ORDER_PAID: &str = "order.paid";
/// Routing key announced once an invoice document exists.
pub const INVOICE_GENERATED: &str = "invoice.generated";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub id: String,
    pub name: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
    pub phone_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: String,
    pub name: String,
    pub price: Decimal,
    pub quantity: u32,
}

/// Payload of `order.paid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPaid {
    pub order_id: String,
    pub user_id: String,
    pub user_email: String,
    pub user_name: String,
    pub total_amount: Decimal,
    pub subtotal: Decimal,
    pub taxed_amount: Decimal,
    pub payment_id: String,
    pub items: Vec<LineItem>,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub created_at: DateTime<Utc>,
}

/// Payload of `invoice.generated`, published through the outbox after the
/// invoice row commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceGenerated {
    pub order_id: String,
    pub invoice_url: String,
}

/// Tagged union over the event types this service understands.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    OrderPaid(OrderPaid),
    InvoiceGenerated(InvoiceGenerated),
}

impl DomainEvent {
    /// Decode a message body, rejecting explicitly.
    ///
    /// An undecodable envelope is a serialization failure; a known event
    /// type with a malformed body is a validation failure; an unknown event
    /// type is its own non-fatal outcome. None of these are retryable.
    pub fn decode(body: &[u8]) -> Result<Self, ConsumeError> {
        let envelope = Envelope::from_bytes(body)?;
        match envelope.event_type.as_str() {
            ORDER_PAID => envelope
                .decode()
                .map(Self::OrderPaid)
                .map_err(|e| ConsumeError::Validation(e.to_string())),
            INVOICE_GENERATED => envelope
                .decode()
                .map(Self::InvoiceGenerated)
                .map_err(|e| ConsumeError::Validation(e.to_string())),
            other => Err(ConsumeError::UnrecognizedEventType(other.to_string())),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::OrderPaid(_) => ORDER_PAID,
            Self::InvoiceGenerated(_) => INVOICE_GENERATED,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn address() -> Address {
        Address {
            id: "addr-1".into(),
            name: "Ada Lovelace".into(),
            street: "12 Analytical Way".into(),
            city: "London".into(),
            state: "LDN".into(),
            zip_code: "N1 9GU".into(),
            country: "UK".into(),
            phone_number: "+44 20 7946 0958".into(),
        }
    }

    pub fn order_paid(order_id: &str) -> OrderPaid {
        OrderPaid {
            order_id: order_id.into(),
            user_id: "user-7".into(),
            user_email: "ada@example.com".into(),
            user_name: "Ada Lovelace".into(),
            total_amount: Decimal::new(12999, 2),
            subtotal: Decimal::new(11999, 2),
            taxed_amount: Decimal::new(1000, 2),
            payment_id: "pay-42".into(),
            items: vec![LineItem {
                product_id: "prod-1".into(),
                name: "Difference Engine".into(),
                price: Decimal::new(11999, 2),
                quantity: 1,
            }],
            shipping_address: address(),
            billing_address: address(),
            created_at: DateTime::from_timestamp(1_700_000_000, 0).expect("valid fixed timestamp"),
        }
    }

    pub fn order_paid_body(order_id: &str) -> Vec<u8> {
        Envelope::new(ORDER_PAID, &order_paid(order_id))
            .unwrap()
            .to_bytes()
            .unwrap()
    }
}
