//! HTTP handlers and response types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use courier_core::{error::AppError, models::Message};

pub mod health;
pub mod messages;
pub mod scheduler;

pub use health::{health_check, liveness_check, readiness_check};
pub use messages::{create_message, get_message, get_sent_messages, get_stats};
pub use scheduler::{scheduler_status, start_scheduler, stop_scheduler};

/// Error wrapper mapping the taxonomy codes onto HTTP statuses.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyExists(_) => StatusCode::CONFLICT,
            AppError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            AppError::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_)
            | AppError::Network(_)
            | AppError::InvalidResponse(_)
            | AppError::Server(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorResponse { error: self.0.to_string(), code: self.0.code() };
        (status, Json(body)).into_response()
    }
}

/// JSON error body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable message.
    pub error: String,
    /// Stable taxonomy code.
    pub code: &'static str,
}

/// Generic acknowledgement body.
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    /// What happened.
    pub message: &'static str,
}

/// One message, as exposed by the API.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    /// Message id.
    pub id: String,
    /// Recipient number.
    pub phone_number: String,
    /// Message body.
    pub content: String,
    /// Lifecycle status.
    pub status: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Delivery timestamp, present once sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    /// Delivery attempts consumed.
    pub attempts: i32,
    /// Attempt budget.
    pub max_attempts: i32,
    /// Last failure message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Last failure code, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Webhook-issued id, present once sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_message_id: Option<String>,
}

impl From<&Message> for MessageResponse {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.to_string(),
            phone_number: message.phone_number.to_string(),
            content: message.content.to_string(),
            status: message.status.to_string(),
            created_at: message.created_at,
            sent_at: message.sent_at,
            attempts: message.attempts,
            max_attempts: message.max_attempts,
            last_error: message.last_error.clone(),
            error_code: message.error_code.clone(),
            webhook_message_id: message.webhook_message_id.clone(),
        }
    }
}

/// One page of sent messages.
#[derive(Debug, Serialize)]
pub struct MessageListResponse {
    /// Messages on this page.
    pub messages: Vec<MessageResponse>,
    /// Total sent messages across all pages.
    pub total_count: i64,
    /// Served page number.
    pub page: i64,
    /// Served page size.
    pub page_size: i64,
}

/// Aggregate message counts.
#[derive(Debug, Serialize)]
pub struct MessageStatsResponse {
    /// All messages.
    pub total_messages: i64,
    /// Messages awaiting dispatch.
    pub pending_messages: i64,
    /// Delivered messages.
    pub sent_messages: i64,
    /// Terminally failed messages.
    pub failed_messages: i64,
}

/// Scheduler lifecycle and counters.
#[derive(Debug, Serialize)]
pub struct SchedulerStatusResponse {
    /// Whether the scheduler is running.
    pub is_running: bool,
    /// When the most recent cycle started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    /// Work tokens that produced an outcome.
    pub total_processed: u64,
    /// Successful outcomes.
    pub total_successful: u64,
    /// Failed outcomes.
    pub total_failed: u64,
}

#[cfg(test)]
mod tests {
    use courier_core::models::{MessageContent, PhoneNumber};

    use super::*;

    #[test]
    fn message_response_echoes_domain_fields() {
        let mut message = Message::new(
            PhoneNumber::parse("+905551234567").unwrap(),
            MessageContent::parse("Hello", 160).unwrap(),
            3,
        );
        message.mark_processing().unwrap();
        message.mark_sent("w-1".into(), "{}".into()).unwrap();

        let response = MessageResponse::from(&message);
        assert_eq!(response.phone_number, "+905551234567");
        assert_eq!(response.status, "sent");
        assert_eq!(response.attempts, 1);
        assert_eq!(response.webhook_message_id.as_deref(), Some("w-1"));
        assert!(response.sent_at.is_some());
        assert!(response.last_error.is_none());
    }
}
