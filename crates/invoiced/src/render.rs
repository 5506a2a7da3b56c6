//! Document rendering collaborator boundary.
//!
//! Rendering is a pure transformation: validated event data in, document
//! bytes out. The shipped renderer produces a deterministic plain-text
//! invoice; richer engines plug in behind the same trait.

use thiserror::Error;
use uuid::Uuid;

use crate::events::{Address, OrderPaid};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render failed: {0}")]
    Failed(String),
}

pub trait DocumentRenderer: Send + Sync {
    fn render(&self, order: &OrderPaid, invoice_id: Uuid) -> Result<Vec<u8>, RenderError>;
}

/// Plain-text invoice renderer.
#[derive(Debug, Clone, Default)]
pub struct TextRenderer;

impl DocumentRenderer for TextRenderer {
    fn render(&self, order: &OrderPaid, invoice_id: Uuid) -> Result<Vec<u8>, RenderError> {
        let mut doc = String::new();

        doc.push_str("INVOICE\n");
        doc.push_str(&format!("Invoice No: INV-{invoice_id}\n"));
        doc.push_str(&format!("Order:      {}\n", order.order_id));
        doc.push_str(&format!("Payment:    {}\n", order.payment_id));
        doc.push_str(&format!(
            "Billed to:  {} <{}>\n\n",
            order.user_name, order.user_email
        ));

        doc.push_str("Items\n");
        for item in &order.items {
            doc.push_str(&format!(
                "  {} x{} @ {} = {}\n",
                item.name,
                item.quantity,
                item.price,
                item.price * rust_decimal::Decimal::from(item.quantity),
            ));
        }

        doc.push_str(&format!("\nSubtotal: {}\n", order.subtotal));
        doc.push_str(&format!("Tax:      {}\n", order.taxed_amount));
        doc.push_str(&format!("Total:    {}\n\n", order.total_amount));

        doc.push_str("Ship to:\n");
        push_address(&mut doc, &order.shipping_address);
        doc.push_str("Bill to:\n");
        push_address(&mut doc, &order.billing_address);

        Ok(doc.into_bytes())
    }
}

fn push_address(doc: &mut String, address: &Address) {
    doc.push_str(&format!(
        "  {}\n  {}\n  {}, {} {}\n  {}\n",
        address.name, address.street, address.city, address.state, address.zip_code,
        address.country,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::fixtures::order_paid;

    #[test]
    fn renders_totals_and_line_items() {
        let order = order_paid("o-1");
        let invoice_id = Uuid::nil();

        let bytes = TextRenderer.render(&order, invoice_id).unwrap();
        let doc = String::from_utf8(bytes).unwrap();

        assert!(doc.contains("Order:      o-1"));
        assert!(doc.contains("Difference Engine x1 @ 119.99 = 119.99"));
        assert!(doc.contains("Total:    129.99"));
        assert!(doc.contains("12 Analytical Way"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let order = order_paid("o-1");
        let invoice_id = Uuid::nil();

        assert_eq!(
            TextRenderer.render(&order, invoice_id).unwrap(),
            TextRenderer.render(&order, invoice_id).unwrap()
        );
    }
}
