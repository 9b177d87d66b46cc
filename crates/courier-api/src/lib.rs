//! Administrative HTTP surface for the courier service.
//!
//! Exposes message creation and inspection, scheduler lifecycle control,
//! and health probes over JSON, with optional bearer-token authentication
//! and figment-based configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use courier_core::{cache::RedisSentCache, storage::PgMessageStore};
use courier_dispatch::{scheduler::Scheduler, service::MessageService};

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use config::Config;
pub use server::{create_router, serve};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The dispatch service behind the message endpoints.
    pub service: Arc<MessageService>,
    /// The process-wide scheduler instance.
    pub scheduler: Arc<Scheduler>,
    /// Concrete store handle, used by health probes.
    pub store: PgMessageStore,
    /// Concrete cache handle, used by health probes.
    pub cache: RedisSentCache,
}
