use std::sync::Arc;

use anyhow::{Context, Result};
use ratchet_core::{EventChannel, Relay, WorkerPool};
use ratchet_postgres::{PgChannel, PgOutbox};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use invoiced::config::AppConfig;
use invoiced::events;
use invoiced::http::{self, AppState};
use invoiced::invoice::PgInvoiceRepository;
use invoiced::processor::InvoiceProcessor;
use invoiced::render::TextRenderer;
use invoiced::storage::MemoryObjectStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = AppConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_max_conns)
        .min_connections(cfg.db_min_conns)
        .connect(&cfg.database_url)
        .await
        .context("connecting to postgres")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("running migrations")?;

    let cancel = CancellationToken::new();

    let channel = PgChannel::new(pool.clone())
        .with_publish_timeout(cfg.publish_timeout)
        .with_prefetch(cfg.prefetch);

    let relay = Relay::new(PgOutbox::new(pool.clone()), channel.clone())
        .with_interval(cfg.relay_interval)
        .with_batch_size(cfg.relay_batch_size);
    let relay_task = tokio::spawn(relay.run(cancel.clone()));

    let repo = PgInvoiceRepository::new(pool.clone());
    let store = MemoryObjectStore::default();

    let source = channel
        .bind_queue(&cfg.queue_name, &[events::ORDER_PAID])
        .await
        .context("binding consumer queue")?;
    let processor = InvoiceProcessor::new(
        repo.clone(),
        store.clone(),
        TextRenderer,
        cfg.storage_prefix.clone(),
    );
    let workers = WorkerPool::start(
        source,
        Arc::new(processor),
        cfg.worker_count,
        cancel.clone(),
    );

    let app = http::router(AppState {
        repo: Arc::new(repo),
        store: Arc::new(store),
        url_ttl: cfg.url_ttl,
    });

    let listener = tokio::net::TcpListener::bind(cfg.address())
        .await
        .with_context(|| format!("binding {}", cfg.address()))?;
    info!(address = %cfg.address(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("http server")?;

    // Drain: finish the in-flight relay tick and in-flight handlers.
    cancel.cancel();
    workers.shutdown().await;
    relay_task.await.context("joining relay")?;

    info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
    cancel.cancel();
}
