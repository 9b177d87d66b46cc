//! Sent-send cache.
//!
//! Records the webhook-issued identifier of every successful send under
//! `message:sent:{id}` with a single deployment-wide TTL. Entries are
//! derived state: writes are best-effort (the dispatch service logs and
//! swallows failures) and a read miss simply means the record aged out or
//! the cache was unavailable at write time.

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use tracing::{debug, warn};

use crate::{
    error::{AppError, Result},
    models::{CachedSend, MessageId},
};

/// Capability contract for the idempotency cache of successful sends.
#[async_trait]
pub trait SentMessageCache: Send + Sync {
    /// Stores a send record under the message id, refreshing the TTL.
    async fn cache(&self, entry: &CachedSend) -> Result<()>;

    /// Fetches the cached record for a message id.
    ///
    /// # Errors
    ///
    /// `NotFound` when the entry is absent, expired, or unreadable.
    async fn get(&self, message_id: MessageId) -> Result<CachedSend>;

    /// Whether a record exists for the message id.
    async fn exists(&self, message_id: MessageId) -> Result<bool>;
}

/// Redis-backed implementation of [`SentMessageCache`].
#[derive(Clone)]
pub struct RedisSentCache {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisSentCache {
    /// Connects to Redis and verifies the connection with a `PING`.
    ///
    /// # Errors
    ///
    /// Returns `Database` when the server is unreachable.
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| AppError::Database(format!("invalid redis url: {e}")))?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Database(format!("failed to connect to redis: {e}")))?;

        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(Self { conn, ttl })
    }

    /// Verifies cache connectivity.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn key(message_id: MessageId) -> String {
        format!("message:sent:{message_id}")
    }
}

#[async_trait]
impl SentMessageCache for RedisSentCache {
    async fn cache(&self, entry: &CachedSend) -> Result<()> {
        let key = Self::key(entry.message_id);
        let payload = serde_json::to_string(entry)
            .map_err(|e| AppError::Internal(format!("failed to encode cache entry: {e}")))?;

        let mut conn = self.conn.clone();
        let () = conn.set_ex(&key, payload, self.ttl.as_secs()).await?;

        debug!(
            message_id = %entry.message_id,
            webhook_message_id = %entry.webhook_message_id,
            "cached sent message"
        );
        Ok(())
    }

    async fn get(&self, message_id: MessageId) -> Result<CachedSend> {
        let key = Self::key(message_id);
        let mut conn = self.conn.clone();

        let payload: Option<String> = match conn.get(&key).await {
            Ok(value) => value,
            Err(error) => {
                warn!(%message_id, %error, "cache read failed");
                None
            },
        };

        let payload = payload
            .ok_or_else(|| AppError::NotFound(format!("message {message_id} not in cache")))?;

        serde_json::from_str(&payload)
            .map_err(|_| AppError::NotFound(format!("message {message_id} not in cache")))
    }

    async fn exists(&self, message_id: MessageId) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(Self::key(message_id)).await?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_scheme_is_stable() {
        let id = MessageId(uuid::Uuid::nil());
        assert_eq!(
            RedisSentCache::key(id),
            "message:sent:00000000-0000-0000-0000-000000000000"
        );
    }
}
