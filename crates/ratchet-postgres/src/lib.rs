//! PostgreSQL backends for the ratchet delivery core.
//!
//! This crate provides the durable implementations of the `ratchet-core`
//! contracts: [`PgOutbox`] for the transactional outbox and [`PgChannel`]
//! for the topic-routed message channel.
//!
//! # Features
//!
//! - Outbox appends participate in the caller's transaction — never
//!   committed independently
//! - Guarded status updates keep marks idempotent and monotonic
//! - Message claims use `FOR UPDATE SKIP LOCKED` with a lease timeout
//! - Lease reclaim returns messages abandoned by crashed consumers
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE outbox_records (
//!     id           UUID PRIMARY KEY,
//!     aggregate_id TEXT NOT NULL,
//!     event_type   TEXT NOT NULL,
//!     payload      JSONB NOT NULL,
//!     status       TEXT NOT NULL DEFAULT 'pending', -- pending|processed|failed
//!     created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     published_at TIMESTAMPTZ
//! );
//! CREATE INDEX idx_outbox_pending ON outbox_records (created_at)
//!     WHERE status = 'pending';
//!
//! CREATE TABLE channel_bindings (
//!     queue   TEXT NOT NULL,
//!     pattern TEXT NOT NULL,
//!     PRIMARY KEY (queue, pattern)
//! );
//!
//! CREATE TABLE channel_messages (
//!     id               UUID PRIMARY KEY,
//!     queue            TEXT NOT NULL,
//!     routing_key      TEXT NOT NULL,
//!     body             JSONB NOT NULL,
//!     status           TEXT NOT NULL DEFAULT 'pending', -- pending|inflight
//!     lease_expires_at TIMESTAMPTZ,
//!     created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! CREATE INDEX idx_channel_ready ON channel_messages (queue, created_at)
//!     WHERE status = 'pending';
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use ratchet_postgres::{PgChannel, PgOutbox};
//! use ratchet_core::Relay;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/mydb").await?;
//! let outbox = PgOutbox::new(pool.clone());
//! let channel = PgChannel::new(pool);
//!
//! tokio::spawn(Relay::new(outbox, channel.clone()).run(cancel));
//! ```

mod channel;
mod outbox;

pub use channel::{PgChannel, PgDeliverySource};
pub use outbox::PgOutbox;
