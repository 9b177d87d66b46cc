//! Dispatch service behavior against in-memory collaborators.
//!
//! Exercises the batch transaction script end to end: claim, deliver,
//! record, cache, commit - including the retry loop, attempt exhaustion,
//! and the non-critical cache path.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use courier_core::{
    cache::SentMessageCache,
    error::AppError,
    models::{Message, MessageContent, MessageStatus, PhoneNumber},
};
use courier_dispatch::service::MessageService;
use courier_testing::{MemoryMessageStore, MemorySentCache, ScriptedWebhook};

const CHAR_LIMIT: usize = 160;

struct Env {
    store: MemoryMessageStore,
    cache: MemorySentCache,
    webhook: ScriptedWebhook,
    service: MessageService,
}

fn env_with(webhook: ScriptedWebhook, max_attempts: i32) -> Env {
    let store = MemoryMessageStore::new();
    let cache = MemorySentCache::new();
    let service = MessageService::new(
        Arc::new(store.clone()),
        Arc::new(cache.clone()),
        Arc::new(webhook.clone()),
        CHAR_LIMIT,
        max_attempts,
    );
    Env { store, cache, webhook, service }
}

fn pending_message(store: &MemoryMessageStore, max_attempts: i32) -> Message {
    let message = Message::new(
        PhoneNumber::parse("+905551234567").unwrap(),
        MessageContent::parse("Hello", CHAR_LIMIT).unwrap(),
        max_attempts,
    );
    store.insert(message.clone());
    message
}

#[tokio::test]
async fn happy_path_delivers_and_caches() {
    let env = env_with(ScriptedWebhook::always_ok(), 3);
    env.webhook.push_ok("w-1");
    let message = pending_message(&env.store, 3);

    let cancel = CancellationToken::new();
    let sent = env.service.process_pending_messages(&cancel, 1).await.unwrap();
    assert_eq!(sent, 1);

    let stored = env.store.get(message.id).unwrap();
    assert_eq!(stored.status, MessageStatus::Sent);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.webhook_message_id.as_deref(), Some("w-1"));
    assert!(stored.sent_at.is_some());
    assert!(stored.last_error.is_none());
    assert!(stored.webhook_response.as_deref().unwrap().contains("w-1"));

    let stats = env.service.get_stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.failed, 0);

    let cached = env.cache.get(message.id).await.unwrap();
    assert_eq!(cached.webhook_message_id, "w-1");
    assert_eq!(cached.phone_number, "+905551234567");
    assert!(env.cache.exists(message.id).await.unwrap());
}

#[tokio::test]
async fn transient_failures_then_success() {
    let env = env_with(ScriptedWebhook::always_ok(), 3);
    env.webhook.push_server_error();
    env.webhook.push_server_error();
    env.webhook.push_ok("w-9");
    let message = pending_message(&env.store, 3);

    let cancel = CancellationToken::new();

    // Cycle 1: 500 from the webhook.
    let sent = env.service.process_pending_messages(&cancel, 1).await.unwrap();
    assert_eq!(sent, 0);
    let stored = env.store.get(message.id).unwrap();
    assert_eq!(stored.status, MessageStatus::Pending);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.error_code.as_deref(), Some("SERVER_ERROR"));

    // Cycle 2: another 500.
    env.service.process_pending_messages(&cancel, 1).await.unwrap();
    let stored = env.store.get(message.id).unwrap();
    assert_eq!(stored.status, MessageStatus::Pending);
    assert_eq!(stored.attempts, 2);

    // Cycle 3: delivered, errors cleared.
    let sent = env.service.process_pending_messages(&cancel, 1).await.unwrap();
    assert_eq!(sent, 1);
    let stored = env.store.get(message.id).unwrap();
    assert_eq!(stored.status, MessageStatus::Sent);
    assert_eq!(stored.attempts, 3);
    assert!(stored.last_error.is_none());
    assert!(stored.error_code.is_none());
    assert_eq!(stored.webhook_message_id.as_deref(), Some("w-9"));
}

#[tokio::test]
async fn exhausted_attempts_fail_terminally() {
    let env = env_with(ScriptedWebhook::always_ok(), 2);
    env.webhook.push_invalid_response("bad phone");
    env.webhook.push_invalid_response("bad phone");
    let message = pending_message(&env.store, 2);

    let cancel = CancellationToken::new();
    env.service.process_pending_messages(&cancel, 1).await.unwrap();
    env.service.process_pending_messages(&cancel, 1).await.unwrap();

    let stored = env.store.get(message.id).unwrap();
    assert_eq!(stored.status, MessageStatus::Failed);
    assert_eq!(stored.attempts, 2);
    assert_eq!(stored.error_code.as_deref(), Some("INVALID_RESPONSE"));
    assert!(stored.last_error.as_deref().unwrap().contains("bad phone"));

    // Terminal: a further cycle finds nothing to claim.
    let sent = env.service.process_pending_messages(&cancel, 1).await.unwrap();
    assert_eq!(sent, 0);
    assert_eq!(env.webhook.call_count(), 2);
}

#[tokio::test]
async fn cache_failure_is_non_critical() {
    let env = env_with(ScriptedWebhook::always_ok(), 3);
    env.cache.fail_writes();
    let message = pending_message(&env.store, 3);

    let cancel = CancellationToken::new();
    let sent = env.service.process_pending_messages(&cancel, 1).await.unwrap();

    assert_eq!(sent, 1);
    assert_eq!(env.store.get(message.id).unwrap().status, MessageStatus::Sent);
    assert!(env.cache.is_empty());
}

#[tokio::test]
async fn empty_batch_is_a_clean_no_op() {
    let env = env_with(ScriptedWebhook::always_ok(), 3);
    let cancel = CancellationToken::new();

    let sent = env.service.process_pending_messages(&cancel, 10).await.unwrap();
    assert_eq!(sent, 0);
    assert_eq!(env.webhook.call_count(), 0);
}

#[tokio::test]
async fn batch_failure_leaves_siblings_delivered() {
    let env = env_with(ScriptedWebhook::always_ok(), 3);
    env.webhook.push_ok("w-1");
    env.webhook.push_server_error();
    env.webhook.push_ok("w-3");

    for i in 0..3 {
        let mut message = pending_message(&env.store, 3);
        message.created_at += chrono::Duration::milliseconds(i);
        env.store.insert(message);
    }

    let cancel = CancellationToken::new();
    let sent = env.service.process_pending_messages(&cancel, 3).await.unwrap();
    assert_eq!(sent, 2);

    let stats = env.service.get_stats().await.unwrap();
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.pending, 1);
}

#[tokio::test]
async fn commit_failure_surfaces_database_error() {
    let env = env_with(ScriptedWebhook::always_ok(), 3);
    pending_message(&env.store, 3);
    env.store.fail_next_commit();

    let cancel = CancellationToken::new();
    let err = env.service.process_pending_messages(&cancel, 1).await.unwrap_err();
    assert!(matches!(err, AppError::Database(_)));
}

#[tokio::test]
async fn create_message_validates_inputs() {
    let env = env_with(ScriptedWebhook::always_ok(), 3);

    let err = env.service.create_message("05551234567", "Hello").await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = env.service.create_message("+905551234567", &"x".repeat(161)).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let message = env.service.create_message("+905551234567", &"x".repeat(160)).await.unwrap();
    assert_eq!(message.status, MessageStatus::Pending);
    assert_eq!(message.max_attempts, 3);
    assert_eq!(env.store.get(message.id).unwrap(), message);
}

#[tokio::test]
async fn get_message_reports_missing_ids() {
    let env = env_with(ScriptedWebhook::always_ok(), 3);
    let err = env.service.get_message(courier_core::models::MessageId::new()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn sent_listing_clamps_pagination() {
    let env = env_with(ScriptedWebhook::always_ok(), 3);

    // Deliver three messages through the pipeline.
    for _ in 0..3 {
        pending_message(&env.store, 3);
    }
    let cancel = CancellationToken::new();
    env.service.process_pending_messages(&cancel, 3).await.unwrap();

    let page = env.service.get_sent_messages(0, 0).await.unwrap();
    assert_eq!(page.page, 1);
    assert_eq!(page.page_size, 20);
    assert_eq!(page.total, 3);
    assert_eq!(page.messages.len(), 3);

    let page = env.service.get_sent_messages(1, 1000).await.unwrap();
    assert_eq!(page.page_size, 20);

    let page = env.service.get_sent_messages(2, 2).await.unwrap();
    assert_eq!(page.page, 2);
    assert_eq!(page.messages.len(), 1);

    // Newest sent_at first.
    let page = env.service.get_sent_messages(1, 10).await.unwrap();
    let sent_ats: Vec<_> = page.messages.iter().map(|m| m.sent_at.unwrap()).collect();
    let mut sorted = sent_ats.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(sent_ats, sorted);
}
