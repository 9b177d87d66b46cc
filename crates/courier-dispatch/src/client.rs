//! HTTP client for webhook delivery.
//!
//! Sends one message per call and classifies every outcome into the error
//! taxonomy that drives retry policy. The client itself never retries;
//! retry decisions belong to the dispatch service via the message's attempt
//! counter.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use courier_core::{
    error::{AppError, Result},
    models::{MessageContent, PhoneNumber},
};

use crate::limiter::TokenBucket;

/// Header carrying the webhook auth key.
const AUTH_HEADER: &str = "x-ins-auth-key";

/// Outcome of a successful webhook call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookDelivery {
    /// Identifier the webhook issued for this delivery.
    pub message_id: String,
    /// Acknowledgement text from the webhook.
    pub message: String,
}

/// Capability contract for outbound delivery.
///
/// Production uses [`WebhookClient`]; tests swap in scripted doubles that
/// honor the same classification contract.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// Delivers one message, honoring `cancel` at every suspension point.
    async fn send(
        &self,
        cancel: &CancellationToken,
        phone_number: &PhoneNumber,
        content: &MessageContent,
    ) -> Result<WebhookDelivery>;
}

/// Configuration for the webhook client.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Destination URL for deliveries.
    pub url: String,
    /// Value of the `x-ins-auth-key` header.
    pub auth_key: String,
    /// Fixed per-request timeout.
    pub timeout: Duration,
    /// Token-bucket rate and burst, in requests per second.
    pub rate_limit_per_second: u32,
}

#[derive(Debug, Serialize)]
struct WebhookRequest<'a> {
    to: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    #[serde(default)]
    message: String,
    #[serde(rename = "messageId", default)]
    message_id: String,
}

/// Rate-limited, timed webhook client over a pooled HTTP connection.
pub struct WebhookClient {
    http: reqwest::Client,
    url: String,
    auth_key: String,
    limiter: TokenBucket,
}

impl WebhookClient {
    /// Builds the client with the configured per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when the underlying HTTP client cannot be
    /// constructed.
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: config.url,
            auth_key: config.auth_key,
            limiter: TokenBucket::per_second(config.rate_limit_per_second),
        })
    }
}

#[async_trait]
impl WebhookSender for WebhookClient {
    async fn send(
        &self,
        cancel: &CancellationToken,
        phone_number: &PhoneNumber,
        content: &MessageContent,
    ) -> Result<WebhookDelivery> {
        self.limiter.acquire(cancel).await?;

        let request = WebhookRequest { to: phone_number.as_str(), content: content.as_str() };

        debug!(phone_number = %phone_number, "sending webhook request");

        let send = self
            .http
            .post(&self.url)
            .header(AUTH_HEADER, &self.auth_key)
            .json(&request)
            .send();

        let response = tokio::select! {
            () = cancel.cancelled() => {
                return Err(AppError::Timeout("webhook request cancelled".to_string()));
            }
            result = send => result.map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout("webhook request timeout".to_string())
                } else {
                    AppError::Network(format!("network error during webhook request: {e}"))
                }
            })?,
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::InvalidResponse(format!("failed to read response body: {e}")))?;

        debug!(phone_number = %phone_number, status = status.as_u16(), "webhook request completed");

        if status.is_server_error() {
            warn!(status = status.as_u16(), "webhook returned server error");
            return Err(AppError::Server(format!("webhook server error: {}", status.as_u16())));
        }
        if !status.is_success() {
            warn!(status = status.as_u16(), response_body = %body, "webhook returned error status");
            return Err(AppError::InvalidResponse(format!(
                "webhook returned status {}: {body}",
                status.as_u16()
            )));
        }

        let parsed: WebhookResponse = serde_json::from_str(&body).map_err(|_| {
            AppError::InvalidResponse("invalid JSON response from webhook".to_string())
        })?;

        if parsed.message_id.is_empty() {
            return Err(AppError::InvalidResponse(
                "webhook response missing messageId".to_string(),
            ));
        }

        Ok(WebhookDelivery { message_id: parsed.message_id, message: parsed.message })
    }
}
