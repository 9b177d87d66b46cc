//! Dispatch engine for outbound messages.
//!
//! Drains pending messages in FIFO order, delivers each to the configured
//! webhook, and records the outcome with retry bookkeeping. The engine is
//! built from three parts:
//!
//! ```text
//!   Scheduler ── ticks ──▶ MessageService ── claims ──▶ MessageStore
//!                              │     │
//!                              │     └── records ──▶ SentMessageCache
//!                              ▼
//!                        WebhookClient (rate limited, timed)
//! ```
//!
//! Row claiming uses `FOR UPDATE SKIP LOCKED` so concurrent workers
//! partition the pending set without blocking; post-claim writes are
//! version-checked. Delivery never retries inline - a failed message loops
//! back to `pending` and is reclaimed by a later cycle until its attempt
//! budget runs out.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod limiter;
pub mod scheduler;
pub mod service;

pub use client::{WebhookClient, WebhookConfig, WebhookDelivery, WebhookSender};
pub use limiter::TokenBucket;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStats};
pub use service::{MessageService, SentPage};
