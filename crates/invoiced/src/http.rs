//! Download endpoint: trade an order id for a time-limited document URL.
//!
//! Sits outside the delivery core — it only reads the invoice store and
//! asks the object store to presign.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::invoice::InvoiceRepository;
use crate::storage::ObjectStore;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn InvoiceRepository>,
    pub store: Arc<dyn ObjectStore>,
    pub url_ttl: Duration,
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    pub url: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/invoice/download/:order_id", get(download_invoice))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn download_invoice(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<DownloadResponse>, (StatusCode, &'static str)> {
    let order_id = order_id.trim();
    if order_id.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "orderId required"));
    }

    let invoice = state
        .repo
        .find_by_order_id(order_id)
        .await
        .map_err(|err| {
            warn!(order_id, error = %err, "invoice lookup failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "lookup failed")
        })?
        .ok_or((StatusCode::NOT_FOUND, "invoice not found"))?;

    let url = state
        .store
        .signed_url(&invoice.document_key, state.url_ttl)
        .await
        .map_err(|err| {
            warn!(order_id, error = %err, "presign failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to sign download url")
        })?;

    Ok(Json(DownloadResponse { url }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{Invoice, MemoryInvoiceRepository};
    use crate::storage::MemoryObjectStore;
    use rust_decimal::Decimal;

    async fn state_with_invoice() -> AppState {
        let repo = MemoryInvoiceRepository::new();
        let store = MemoryObjectStore::default();

        let invoice = Invoice::completed("o-1", "u-1", Decimal::new(999, 2), "inv/o-1.txt");
        repo.create_with_event(invoice).await.unwrap();
        store.put("inv/o-1.txt", b"doc".to_vec()).await.unwrap();

        AppState {
            repo: Arc::new(repo),
            store: Arc::new(store),
            url_ttl: Duration::from_secs(900),
        }
    }

    #[tokio::test]
    async fn existing_invoice_yields_signed_url() {
        let state = state_with_invoice().await;
        let response = download_invoice(State(state), Path("o-1".to_string()))
            .await
            .unwrap();
        assert!(response.0.url.contains("inv/o-1.txt"));
        assert!(response.0.url.contains("expires="));
    }

    #[tokio::test]
    async fn missing_invoice_is_not_found() {
        let state = state_with_invoice().await;
        let err = download_invoice(State(state), Path("o-404".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn blank_order_id_is_bad_request() {
        let state = state_with_invoice().await;
        let err = download_invoice(State(state), Path("  ".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }
}
