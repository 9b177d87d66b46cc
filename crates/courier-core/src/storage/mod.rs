//! Persistence layer for messages.
//!
//! The store is the only authority on message state: all mutations flow
//! through it. Consumers depend on the [`MessageStore`] / [`StoreTx`]
//! capability contracts rather than a concrete backend, so the dispatch
//! service and scheduler can be exercised against in-memory doubles while
//! production wires in PostgreSQL.
//!
//! Concurrency discipline, enforced by the contract:
//!
//! - claiming pending rows is non-blocking between claimants and FIFO-biased
//!   (`FOR UPDATE SKIP LOCKED` in the Postgres implementation);
//! - every update is version-checked, so a write racing a duplicate claim
//!   fails with `NOT_FOUND` instead of clobbering the row.

use async_trait::async_trait;

use crate::{
    error::Result,
    models::{Message, MessageId, MessageStats},
};

mod postgres;

pub use postgres::PgMessageStore;

/// Capability contract for message persistence.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Inserts a new message.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` on a duplicate id, `Database` otherwise.
    async fn create(&self, message: &Message) -> Result<()>;

    /// Loads a message by id, reconstructing and re-validating it.
    ///
    /// # Errors
    ///
    /// `NotFound` when the id is absent; `Database` when the row cannot be
    /// reconstructed into a valid message.
    async fn find_by_id(&self, id: MessageId) -> Result<Message>;

    /// Lists sent messages, newest `sent_at` first.
    async fn find_sent(&self, limit: i64, offset: i64) -> Result<Vec<Message>>;

    /// Computes aggregate counts in a single scan.
    async fn stats(&self) -> Result<MessageStats>;

    /// Opens a transaction for a dispatch batch.
    ///
    /// Rows claimed through the returned handle stay claimed until the
    /// handle commits, rolls back, or is dropped.
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;
}

/// A store transaction holding row claims for one dispatch batch.
#[async_trait]
pub trait StoreTx: Send {
    /// Claims up to `limit` pending messages in FIFO order by `created_at`.
    ///
    /// Concurrent callers receive disjoint subsets without blocking on one
    /// another; the claim is held for the lifetime of this transaction.
    async fn find_pending(&mut self, limit: i64) -> Result<Vec<Message>>;

    /// Writes the message iff the stored version matches `message.version`.
    ///
    /// On success the persisted version advances by one and the in-memory
    /// counter is advanced to match.
    ///
    /// # Errors
    ///
    /// `NotFound` ("optimistic lock or missing") when zero rows matched.
    async fn update(&mut self, message: &mut Message) -> Result<()>;

    /// Commits the batch, releasing all claims.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rolls the batch back, releasing all claims.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
