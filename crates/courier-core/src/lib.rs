//! Domain model and persistence for the courier dispatch service.
//!
//! Provides the validated value types, the message state machine, the error
//! taxonomy, and the capability contracts (store, cache) every other crate
//! builds on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use cache::{RedisSentCache, SentMessageCache};
pub use error::{AppError, Result};
pub use models::{
    CachedSend, Message, MessageContent, MessageId, MessageStats, MessageStatus, PhoneNumber,
};
pub use storage::{MessageStore, PgMessageStore, StoreTx};
pub use time::{Clock, SystemClock};
