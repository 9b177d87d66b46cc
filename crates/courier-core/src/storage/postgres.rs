//! PostgreSQL message store.
//!
//! Row claiming relies on `FOR UPDATE SKIP LOCKED` so concurrent dispatch
//! workers partition the pending set without blocking each other; updates
//! are guarded by the `version` column. Reconstructing a row re-runs the
//! value-type parsers - a row that no longer validates is a store fault,
//! never silently repaired.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::error;
use uuid::Uuid;

use super::{MessageStore, StoreTx};
use crate::{
    error::{AppError, Result},
    models::{Message, MessageContent, MessageId, MessageStats, MessageStatus, PhoneNumber},
};

/// Persisted row shape of the `messages` table.
#[derive(Debug, sqlx::FromRow)]
struct MessageRecord {
    id: Uuid,
    phone_number: String,
    content: String,
    status: MessageStatus,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    attempts: i32,
    max_attempts: i32,
    last_error: Option<String>,
    error_code: Option<String>,
    webhook_message_id: Option<String>,
    webhook_response: Option<String>,
    version: i64,
}

impl MessageRecord {
    /// Reconstructs the domain message, re-validating every value type.
    fn into_message(self, char_limit: usize) -> Result<Message> {
        let id = MessageId(self.id);

        let phone_number = PhoneNumber::parse(&self.phone_number)
            .map_err(|e| AppError::Database(format!("corrupt row {id}: {e}")))?;
        let content = MessageContent::parse(&self.content, char_limit)
            .map_err(|e| AppError::Database(format!("corrupt row {id}: {e}")))?;

        Ok(Message {
            id,
            phone_number,
            content,
            status: self.status,
            created_at: self.created_at,
            sent_at: self.sent_at,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            last_error: self.last_error,
            error_code: self.error_code,
            webhook_message_id: self.webhook_message_id,
            webhook_response: self.webhook_response,
            version: self.version,
        })
    }
}

/// PostgreSQL-backed implementation of [`MessageStore`].
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
    char_limit: usize,
}

impl PgMessageStore {
    /// Creates a store over the given pool.
    ///
    /// `char_limit` is the content bound re-applied when rows are
    /// reconstructed.
    pub fn new(pool: PgPool, char_limit: usize) -> Self {
        Self { pool, char_limit }
    }

    /// Verifies database connectivity with a trivial query.
    ///
    /// # Errors
    ///
    /// Returns `Database` when the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn create(&self, message: &Message) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (
                id, phone_number, content, status, created_at, sent_at,
                attempts, max_attempts, last_error, error_code,
                webhook_message_id, webhook_response, version
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13
            )
            "#,
        )
        .bind(message.id)
        .bind(message.phone_number.as_str())
        .bind(message.content.as_str())
        .bind(message.status)
        .bind(message.created_at)
        .bind(message.sent_at)
        .bind(message.attempts)
        .bind(message.max_attempts)
        .bind(&message.last_error)
        .bind(&message.error_code)
        .bind(&message.webhook_message_id)
        .bind(&message.webhook_response)
        .bind(message.version)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Message> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, phone_number, content, status, created_at, sent_at,
                   attempts, max_attempts, last_error, error_code,
                   webhook_message_id, webhook_response, version
            FROM messages
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("message {id} not found")))?;

        record.into_message(self.char_limit)
    }

    async fn find_sent(&self, limit: i64, offset: i64) -> Result<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, phone_number, content, status, created_at, sent_at,
                   attempts, max_attempts, last_error, error_code,
                   webhook_message_id, webhook_response, version
            FROM messages
            WHERE status = 'sent'
            ORDER BY sent_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(|r| r.into_message(self.char_limit)).collect()
    }

    async fn stats(&self) -> Result<MessageStats> {
        let stats = sqlx::query_as::<_, MessageStats>(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                   COUNT(*) FILTER (WHERE status = 'sent') AS sent,
                   COUNT(*) FILTER (WHERE status = 'failed') AS failed
            FROM messages
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx, char_limit: self.char_limit }))
    }
}

/// A live Postgres transaction holding row locks for one dispatch batch.
///
/// Dropping the handle without committing rolls the transaction back, which
/// releases the locks - a crashed worker frees its claims via connection
/// teardown.
struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
    char_limit: usize,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn find_pending(&mut self, limit: i64) -> Result<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, phone_number, content, status, created_at, sent_at,
                   attempts, max_attempts, last_error, error_code,
                   webhook_message_id, webhook_response, version
            FROM messages
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        records.into_iter().map(|r| r.into_message(self.char_limit)).collect()
    }

    async fn update(&mut self, message: &mut Message) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = $3,
                sent_at = $4,
                attempts = $5,
                last_error = $6,
                error_code = $7,
                webhook_message_id = $8,
                webhook_response = $9,
                version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(message.id)
        .bind(message.version)
        .bind(message.status)
        .bind(message.sent_at)
        .bind(message.attempts)
        .bind(&message.last_error)
        .bind(&message.error_code)
        .bind(&message.webhook_message_id)
        .bind(&message.webhook_response)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            error!(message_id = %message.id, version = message.version, "optimistic lock miss");
            return Err(AppError::NotFound(format!(
                "message {}: optimistic lock or missing",
                message.id
            )));
        }

        message.increment_version();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
