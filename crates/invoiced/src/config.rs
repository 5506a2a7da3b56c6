//! Environment-driven configuration.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub db_max_conns: u32,
    pub db_min_conns: u32,

    /// Outbox relay poll interval.
    pub relay_interval: Duration,
    /// Max outbox records drained per relay tick.
    pub relay_batch_size: i64,

    /// Queue this service consumes `order.paid` from.
    pub queue_name: String,
    /// Fixed consumer pool size.
    pub worker_count: usize,
    /// Max unacknowledged in-flight deliveries per subscriber.
    pub prefetch: i64,
    /// Publish acknowledgment deadline.
    pub publish_timeout: Duration,

    /// Object-store key prefix for rendered documents.
    pub storage_prefix: String,
    /// Signed download URL lifetime.
    pub url_ttl: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let host = env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env_parse("PORT", 4005u16)?;

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let db_max_conns = env_parse("DB_MAX_CONNS", 10u32)?;
        let db_min_conns = env_parse("DB_MIN_CONNS", 2u32)?;

        let relay_interval = Duration::from_millis(env_parse("RELAY_INTERVAL_MS", 5000u64)?);
        let relay_batch_size = env_parse("RELAY_BATCH_SIZE", 10i64)?;

        let queue_name = env::var("QUEUE_NAME")
            .unwrap_or_else(|_| "invoice_service_processor".to_string());
        let worker_count = env_parse("WORKER_COUNT", 50usize)?;
        let prefetch = env_parse("PREFETCH", 100i64)?;
        let publish_timeout = Duration::from_millis(env_parse("PUBLISH_TIMEOUT_MS", 5000u64)?);

        let storage_prefix = env::var("STORAGE_PREFIX")
            .unwrap_or_else(|_| "uploads/invoices".to_string());
        let url_ttl = Duration::from_secs(env_parse("URL_TTL_SECS", 900u64)?);

        Ok(Self {
            host,
            port,
            database_url,
            db_max_conns,
            db_min_conns,
            relay_interval,
            relay_batch_size,
            queue_name,
            worker_count,
            prefetch,
            publish_timeout,
            storage_prefix,
            url_ttl,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T>(key: &str, fallback: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => Ok(fallback),
    }
}
