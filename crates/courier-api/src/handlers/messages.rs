//! Message endpoints: create, read, list sent, stats.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use courier_core::models::MessageId;

use super::{ApiError, MessageListResponse, MessageResponse, MessageStatsResponse};
use crate::AppState;

/// Request body for `POST /api/v1/messages`.
#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    /// Recipient in E.164 form.
    pub phone_number: String,
    /// Message body.
    pub content: String,
}

/// Paging parameters for the sent listing.
#[derive(Debug, Deserialize)]
pub struct SentMessagesQuery {
    /// 1-based page number.
    #[serde(default = "default_page")]
    pub page: i64,
    /// Page size, clamped by the service to `1..=100`.
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

/// `POST /api/v1/messages` - validates and persists a new pending message.
pub async fn create_message(
    State(state): State<AppState>,
    Json(request): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let message = state.service.create_message(&request.phone_number, &request.content).await?;
    Ok((StatusCode::CREATED, Json(MessageResponse::from(&message))))
}

/// `GET /api/v1/messages/{id}` - loads one message.
pub async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    let message = state.service.get_message(MessageId(id)).await?;
    Ok(Json(MessageResponse::from(&message)))
}

/// `GET /api/v1/messages/sent` - pages through delivered messages.
pub async fn get_sent_messages(
    State(state): State<AppState>,
    Query(query): Query<SentMessagesQuery>,
) -> Result<Json<MessageListResponse>, ApiError> {
    let page = state.service.get_sent_messages(query.page, query.page_size).await?;

    Ok(Json(MessageListResponse {
        messages: page.messages.iter().map(MessageResponse::from).collect(),
        total_count: page.total,
        page: page.page,
        page_size: page.page_size,
    }))
}

/// `GET /api/v1/messages/stats` - aggregate counts per status.
pub async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<MessageStatsResponse>, ApiError> {
    let stats = state.service.get_stats().await?;

    Ok(Json(MessageStatsResponse {
        total_messages: stats.total,
        pending_messages: stats.pending,
        sent_messages: stats.sent,
        failed_messages: stats.failed,
    }))
}
