//! # invoiced
//!
//! Invoice generation service: consumes `order.paid` events with bounded
//! concurrency and idempotent effects, renders and stores an invoice
//! document, and announces `invoice.generated` back through the
//! transactional outbox — so the second hop of notification enjoys the same
//! atomicity guarantee as the first.
//!
//! Delivery mechanics (outbox, relay, channel, worker pool) live in
//! `ratchet-core`/`ratchet-postgres`; this crate supplies the domain.

pub mod config;
pub mod events;
pub mod http;
pub mod invoice;
pub mod processor;
pub mod render;
pub mod storage;
