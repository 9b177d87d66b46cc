//! Webhook client behavior against a mock endpoint.
//!
//! Covers the response-classification order, the request contract (headers
//! and body shape), timeout handling, and token-bucket pacing.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{body_json, header, method, path},
    Mock, MockServer, Request, Respond, ResponseTemplate,
};

use courier_core::{
    error::AppError,
    models::{MessageContent, PhoneNumber},
};
use courier_dispatch::client::{WebhookClient, WebhookConfig, WebhookSender};

fn client_for(server: &MockServer, rate_limit: u32, timeout: Duration) -> WebhookClient {
    WebhookClient::new(WebhookConfig {
        url: format!("{}/webhook", server.uri()),
        auth_key: "test-auth-key".to_string(),
        timeout,
        rate_limit_per_second: rate_limit,
    })
    .expect("client should build")
}

fn phone() -> PhoneNumber {
    PhoneNumber::parse("+905551234567").unwrap()
}

fn content() -> MessageContent {
    MessageContent::parse("Hello courier", 160).unwrap()
}

#[tokio::test]
async fn successful_delivery_parses_message_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": "Accepted",
            "messageId": "w-1",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 10, Duration::from_secs(5));
    let cancel = CancellationToken::new();

    let delivery = client.send(&cancel, &phone(), &content()).await.unwrap();
    assert_eq!(delivery.message_id, "w-1");
    assert_eq!(delivery.message, "Accepted");

    server.verify().await;
}

#[tokio::test]
async fn request_carries_auth_header_and_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .and(header("x-ins-auth-key", "test-auth-key"))
        .and(header("content-type", "application/json"))
        .and(body_json(serde_json::json!({
            "to": "+905551234567",
            "content": "Hello courier",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": "ok",
            "messageId": "w-2",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 10, Duration::from_secs(5));
    let cancel = CancellationToken::new();

    client.send(&cancel, &phone(), &content()).await.unwrap();
    server.verify().await;
}

#[tokio::test]
async fn server_errors_are_retriable_class() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let client = client_for(&server, 10, Duration::from_secs(5));
    let cancel = CancellationToken::new();

    let err = client.send(&cancel, &phone(), &content()).await.unwrap_err();
    assert!(matches!(err, AppError::Server(_)));
    assert_eq!(err.code(), "SERVER_ERROR");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn client_errors_map_to_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad phone"))
        .mount(&server)
        .await;

    let client = client_for(&server, 10, Duration::from_secs(5));
    let cancel = CancellationToken::new();

    let err = client.send(&cancel, &phone(), &content()).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidResponse(_)));
    assert!(err.to_string().contains("bad phone"));
}

#[tokio::test]
async fn non_json_success_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;

    let client = client_for(&server, 10, Duration::from_secs(5));
    let cancel = CancellationToken::new();

    let err = client.send(&cancel, &phone(), &content()).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidResponse(_)));
}

#[tokio::test]
async fn missing_message_id_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "message": "ok" })),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, 10, Duration::from_secs(5));
    let cancel = CancellationToken::new();

    let err = client.send(&cancel, &phone(), &content()).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidResponse(_)));
    assert!(err.to_string().contains("messageId"));
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "message": "ok", "messageId": "w-3" }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, 10, Duration::from_millis(100));
    let cancel = CancellationToken::new();

    let err = client.send(&cancel, &phone(), &content()).await.unwrap_err();
    assert!(matches!(err, AppError::Timeout(_)));
    assert_eq!(err.code(), "TIMEOUT");
}

#[tokio::test]
async fn cancellation_mid_request_maps_to_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "message": "ok", "messageId": "w-4" }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, 10, Duration::from_secs(5));
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = client.send(&cancel, &phone(), &content()).await.unwrap_err();
    assert!(matches!(err, AppError::Timeout(_)));
}

/// Responds with a distinct messageId per request.
struct SequencedResponder;

impl Respond for SequencedResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst) + 1;
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": "ok",
            "messageId": format!("w-{n}"),
        }))
    }
}

#[tokio::test]
async fn rate_limit_paces_back_to_back_sends() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(SequencedResponder).mount(&server).await;

    // rate = burst = 2: the first two sends pass immediately, the third
    // waits for a refill.
    let client = client_for(&server, 2, Duration::from_secs(5));
    let cancel = CancellationToken::new();

    let start = Instant::now();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let delivery = client.send(&cancel, &phone(), &content()).await.unwrap();
        ids.push(delivery.message_id);
    }

    assert!(start.elapsed() >= Duration::from_millis(400), "third send should be paced");
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3, "all deliveries carry distinct webhook message ids");
}

#[tokio::test]
async fn cancelled_rate_limit_wait_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(SequencedResponder).mount(&server).await;

    let client = client_for(&server, 1, Duration::from_secs(5));
    let cancel = CancellationToken::new();

    // Drain the single-token burst, then cancel the waiter.
    client.send(&cancel, &phone(), &content()).await.unwrap();
    cancel.cancel();

    let err = client.send(&cancel, &phone(), &content()).await.unwrap_err();
    assert!(matches!(err, AppError::RateLimit(_)));
    assert!(err.to_string().contains("rate limit wait cancelled"));
}
