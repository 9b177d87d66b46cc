//! Dispatch service: the use-cases over store, cache, and webhook client.
//!
//! The interesting operation is [`MessageService::process_pending_messages`],
//! the per-tick transaction script. One transaction spans the whole batch:
//! the claim, every per-message state write, and the lock release all commit
//! together at the end. A message whose delivery fails does not roll back
//! its siblings - its own `mark_failed` write was issued in the same
//! transaction before commit.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use courier_core::{
    cache::SentMessageCache,
    error::{AppError, Result},
    models::{CachedSend, Message, MessageContent, MessageId, MessageStats, PhoneNumber},
    storage::{MessageStore, StoreTx},
};

use crate::client::WebhookSender;

/// Default page size when the requested one is out of bounds.
const DEFAULT_PAGE_SIZE: i64 = 20;
/// Largest allowed page size.
const MAX_PAGE_SIZE: i64 = 100;

/// One page of sent messages plus the paging echo.
#[derive(Debug, Clone)]
pub struct SentPage {
    /// Messages on this page, newest `sent_at` first.
    pub messages: Vec<Message>,
    /// Total number of sent messages across all pages.
    pub total: i64,
    /// The (clamped) page that was served.
    pub page: i64,
    /// The (clamped) page size that was served.
    pub page_size: i64,
}

/// Orchestrates message creation, reads, and the dispatch batch cycle.
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    cache: Arc<dyn SentMessageCache>,
    webhook: Arc<dyn WebhookSender>,
    char_limit: usize,
    max_attempts: i32,
}

impl MessageService {
    /// Wires the service over its collaborators.
    pub fn new(
        store: Arc<dyn MessageStore>,
        cache: Arc<dyn SentMessageCache>,
        webhook: Arc<dyn WebhookSender>,
        char_limit: usize,
        max_attempts: i32,
    ) -> Self {
        Self { store, cache, webhook, char_limit, max_attempts }
    }

    /// Validates inputs and persists a new pending message.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed phone number or content; store errors
    /// pass through.
    pub async fn create_message(&self, phone_number: &str, content: &str) -> Result<Message> {
        let phone_number = PhoneNumber::parse(phone_number)?;
        let content = MessageContent::parse(content, self.char_limit)?;

        let message = Message::new(phone_number, content, self.max_attempts);
        self.store.create(&message).await?;

        info!(
            message_id = %message.id,
            phone_number = %message.phone_number,
            "message created"
        );

        Ok(message)
    }

    /// Loads a message by id.
    pub async fn get_message(&self, id: MessageId) -> Result<Message> {
        self.store.find_by_id(id).await
    }

    /// Lists sent messages with clamped pagination.
    ///
    /// `page` is clamped up to 1; `page_size` outside `1..=100` falls back
    /// to the default of 20.
    pub async fn get_sent_messages(&self, page: i64, page_size: i64) -> Result<SentPage> {
        let page = page.max(1);
        let page_size = if (1..=MAX_PAGE_SIZE).contains(&page_size) {
            page_size
        } else {
            DEFAULT_PAGE_SIZE
        };
        let offset = (page - 1) * page_size;

        let messages = self.store.find_sent(page_size, offset).await?;
        let stats = self.store.stats().await?;

        Ok(SentPage { messages, total: stats.sent, page, page_size })
    }

    /// Aggregate message counts.
    pub async fn get_stats(&self) -> Result<MessageStats> {
        self.store.stats().await
    }

    /// Processes one batch of pending messages.
    ///
    /// Claims up to `batch_size` messages inside a transaction, attempts
    /// delivery for each, records the outcome on the message, and commits
    /// everything at once. Per-message delivery failures are captured on the
    /// message and do not fail the batch; they surface in the success count
    /// only.
    ///
    /// Returns the number of messages delivered.
    ///
    /// # Errors
    ///
    /// Store faults on the claim or the commit fail the whole tick as
    /// `Database`-class errors; the batch's writes are lost with the
    /// transaction.
    pub async fn process_pending_messages(
        &self,
        cancel: &CancellationToken,
        batch_size: i64,
    ) -> Result<usize> {
        let mut tx = self.store.begin().await?;

        let messages = match tx.find_pending(batch_size).await {
            Ok(messages) => messages,
            Err(error) => {
                let _ = tx.rollback().await;
                return Err(error);
            },
        };

        if messages.is_empty() {
            tx.rollback().await?;
            return Ok(0);
        }

        info!(count = messages.len(), batch_size, "processing pending messages");

        let mut success_count = 0;
        for mut message in messages {
            match self.dispatch_one(cancel, tx.as_mut(), &mut message).await {
                Ok(()) => success_count += 1,
                Err(error) => {
                    error!(
                        message_id = %message.id,
                        error = %error,
                        "failed to process message"
                    );
                },
            }
        }

        tx.commit().await?;

        info!(successful = success_count, "batch processing completed");

        Ok(success_count)
    }

    /// Delivers a single claimed message and records the outcome.
    ///
    /// The three writes (`processing`, then `sent` or `failed`) happen in
    /// program order within the enclosing transaction.
    async fn dispatch_one(
        &self,
        cancel: &CancellationToken,
        tx: &mut dyn StoreTx,
        message: &mut Message,
    ) -> Result<()> {
        message.mark_processing()?;
        tx.update(message).await?;

        let delivery =
            match self.webhook.send(cancel, &message.phone_number, &message.content).await {
                Ok(delivery) => delivery,
                Err(error) => {
                    message.mark_failed(error.to_string(), error.code())?;

                    // Log-only on a failed secondary update: the outer commit
                    // must still run so the batch's locks are released.
                    if let Err(update_error) = tx.update(message).await {
                        error!(
                            message_id = %message.id,
                            error = %update_error,
                            "failed to record webhook failure"
                        );
                    }

                    return Err(error);
                },
            };

        let response_json = serde_json::json!({
            "message": delivery.message,
            "messageId": delivery.message_id,
        })
        .to_string();

        message.mark_sent(delivery.message_id.clone(), response_json)?;
        tx.update(message).await?;

        let sent_at = message.sent_at.ok_or_else(|| {
            AppError::Internal(format!("message {} sent without timestamp", message.id))
        })?;
        let entry = CachedSend {
            message_id: message.id,
            webhook_message_id: delivery.message_id.clone(),
            sent_at,
            phone_number: message.phone_number.to_string(),
        };

        if let Err(cache_error) = self.cache.cache(&entry).await {
            warn!(
                message_id = %message.id,
                error = %cache_error,
                "failed to cache sent message (non-critical)"
            );
        }

        info!(
            message_id = %message.id,
            webhook_message_id = %delivery.message_id,
            attempts = message.attempts,
            "message sent"
        );

        Ok(())
    }
}
