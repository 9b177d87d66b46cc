//! In-memory sent-send cache double.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;

use courier_core::{
    cache::SentMessageCache,
    error::{AppError, Result},
    models::{CachedSend, MessageId},
};

/// In-memory [`SentMessageCache`] with injectable write failures.
#[derive(Clone, Default)]
pub struct MemorySentCache {
    entries: Arc<Mutex<HashMap<MessageId, CachedSend>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemorySentCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail, simulating an unavailable cache.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock").len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SentMessageCache for MemorySentCache {
    async fn cache(&self, entry: &CachedSend) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database("cache unavailable".to_string()));
        }
        self.entries.lock().expect("cache lock").insert(entry.message_id, entry.clone());
        Ok(())
    }

    async fn get(&self, message_id: MessageId) -> Result<CachedSend> {
        self.entries
            .lock()
            .expect("cache lock")
            .get(&message_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("message {message_id} not in cache")))
    }

    async fn exists(&self, message_id: MessageId) -> Result<bool> {
        Ok(self.entries.lock().expect("cache lock").contains_key(&message_id))
    }
}
