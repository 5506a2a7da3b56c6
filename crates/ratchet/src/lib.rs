//! # Ratchet
//!
//! A reliable event-delivery core: a transactional outbox, a durable
//! topic-routed message channel, a relay that drains one into the other, and
//! a bounded consumer pool with manual acknowledgment. Like its namesake, it
//! only moves forward — outbox records never leave a terminal status, and
//! delivery is at-least-once rather than at-most-once.
//!
//! ## Core Concepts
//!
//! Ratchet separates **committing a fact** from **announcing it**:
//! - [`OutboxRecord`] = a notification written in the same transaction as the
//!   domain mutation it announces
//! - [`Envelope`] = the wire shape of an announcement (`{eventType, data}`)
//!
//! The key principle: **one transaction = one domain write + its outbox
//! rows**. A crash before commit loses both; a crash after commit loses
//! neither.
//!
//! ## Architecture
//!
//! ```text
//! domain write ──┐ (one ACID transaction)
//!                ├─► outbox append
//!                ▼
//!          Outbox Store ◄─── fetch_pending / mark_* ─── Relay (interval tick)
//!                                                          │
//!                                                          ▼ publish()
//!                                                    Event Channel
//!                                                   (topic exchange)
//!                                                          │
//!                                              bind_queue ─┴─► DeliverySource
//!                                                                │ next()
//!                                                          WorkerPool (N fixed)
//!                                                                │
//!                                                  handler ──► ack / nack-requeue
//!                                                                │
//!                                            result row + next outbox row (again
//!                                            one transaction — the chain repeats)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Atomicity** - an outbox record exists iff its domain mutation committed
//! 2. **Monotonic status** - `pending → processed` or `pending → failed`, never back
//! 3. **At-least-once** - a crash between publish and mark republishes; consumers
//!    must be idempotent
//! 4. **Bounded in-flight** - the prefetch limit caps unacknowledged deliveries
//! 5. **No ordering across aggregates** - poll order is global creation time and
//!    redelivery may reorder
//!
//! ## Guarantees
//!
//! - **At-least-once publish**: duplicates are possible at the publish/mark
//!   boundary, by design
//! - **Exactly-once effect**: pushed to consumers via idempotency keys, not to
//!   the transport
//! - **Crash-safe**: every step is recoverable from durable state
//!
//! The in-memory backends in [`memory`] implement the same contracts for
//! tests and single-process use; durable backends live in `ratchet-postgres`.

// Core modules
mod channel;
mod consumer;
mod envelope;
mod error;
mod outbox;
mod relay;

// In-memory backends (tests and single-process use)
pub mod memory;

// Cross-component scenario tests (test-only)
#[cfg(test)]
mod delivery_tests;

// Re-export envelope types
pub use envelope::{topic_matches, Envelope};

// Re-export error types
pub use error::{ConsumeError, PublishError, StoreError};

// Re-export outbox types
pub use outbox::{OutboxRecord, OutboxSource, OutboxStatus};

// Re-export channel types
pub use channel::{DeliverySource, EventChannel, InboundMessage};

// Re-export relay types
pub use relay::{Relay, TickStats};

// Re-export consumer types
pub use consumer::{MessageHandler, WorkerPool};

// Re-export commonly used external types
pub use async_trait::async_trait;
