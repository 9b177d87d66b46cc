//! Domain model for outbound messages.
//!
//! Defines the validated value types, the message aggregate with its state
//! machine, and the derived records shared across the pipeline. State
//! transitions are strictly controlled:
//!
//! ```text
//!              create
//!    ∅ ──────────────────▶ pending (attempts = 0)
//!                              │
//!                    mark_processing (attempts += 1)
//!                              ▼
//!                         processing
//!              mark_sent │           │ mark_failed
//!                        ▼           ▼
//!                       sent     attempts < max ? pending : failed
//!                    (terminal)                    (terminal)
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed message identifier.
///
/// Wraps a UUID to prevent mixing with other id types. Assigned at creation
/// and stable for the lifetime of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Creates a new random message id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for MessageId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for MessageId {
    fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for MessageId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// A validated recipient phone number.
///
/// Accepts E.164-shaped values only: a leading `+`, a country-code first
/// digit of 1-9, then 1 to 14 further digits. Immutable once parsed;
/// equality is by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Parses and validates a phone number.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` when the value is empty or does not
    /// match the `+[1-9][0-9]{1,14}` shape.
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Err(AppError::Validation("phone number cannot be empty".to_string()));
        }

        let mut chars = value.chars();
        let valid = chars.next() == Some('+')
            && matches!(value.as_bytes().get(1), Some(b'1'..=b'9'))
            && chars.all(|c| c.is_ascii_digit())
            && (3..=16).contains(&value.len());

        if !valid {
            return Err(AppError::Validation(
                "invalid phone number format: must start with + and contain country code"
                    .to_string(),
            ));
        }

        Ok(Self(value.to_string()))
    }

    /// The validated value as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated message body.
///
/// Non-empty and bounded by a configured character limit. Length is counted
/// in Unicode code points, not bytes, so multi-byte content is not
/// penalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageContent(String);

impl MessageContent {
    /// Parses and validates message content against `max_chars`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` when empty or longer than the limit;
    /// the error reports both the limit and the actual count.
    pub fn parse(value: &str, max_chars: usize) -> Result<Self> {
        if value.is_empty() {
            return Err(AppError::Validation("message content cannot be empty".to_string()));
        }

        let char_count = value.chars().count();
        if char_count > max_chars {
            return Err(AppError::Validation(format!(
                "message content exceeds maximum length of {max_chars} characters (got {char_count})"
            )));
        }

        Ok(Self(value.to_string()))
    }

    /// The content as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in Unicode code points.
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    /// Whether the content is empty. Always false for parsed values.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MessageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message lifecycle status.
///
/// Persisted as a lowercase string; the database enforces the closed set
/// with a CHECK constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting to be claimed by a dispatch cycle.
    Pending,

    /// Claimed by a worker; a delivery attempt is in flight.
    ///
    /// Entering this state consumes one attempt.
    Processing,

    /// Delivered and acknowledged by the webhook. Terminal.
    Sent,

    /// Attempt budget exhausted. Terminal.
    Failed,
}

impl MessageStatus {
    /// Parses a persisted status string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for values outside the closed set.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(AppError::Validation(format!("invalid message status: {other}"))),
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<PgDb> for MessageStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for MessageStatus {
    fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        Self::parse(s).map_err(|e| e.to_string().into())
    }
}

impl sqlx::Encode<'_, PgDb> for MessageStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// The message aggregate scheduled for outbound delivery.
///
/// Mutated only through the transition methods below; everything else is
/// bookkeeping owned by the store (notably [`Message::increment_version`],
/// which the store calls after a successful row write).
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Unique identifier, assigned at creation.
    pub id: MessageId,

    /// Validated recipient number.
    pub phone_number: PhoneNumber,

    /// Validated body.
    pub content: MessageContent,

    /// Current lifecycle status.
    pub status: MessageStatus,

    /// Creation timestamp (UTC). Never changes.
    pub created_at: DateTime<Utc>,

    /// Set exactly when the message transitions to `sent`.
    pub sent_at: Option<DateTime<Utc>>,

    /// Delivery attempts consumed so far.
    ///
    /// Incremented on every `pending -> processing` transition, including
    /// re-entries on the retry path.
    pub attempts: i32,

    /// Attempt budget, fixed at creation from configuration.
    pub max_attempts: i32,

    /// Human message of the last failure; cleared on success.
    pub last_error: Option<String>,

    /// Taxonomy code of the last failure; cleared on success.
    pub error_code: Option<String>,

    /// Identifier issued by the webhook on success.
    pub webhook_message_id: Option<String>,

    /// Raw webhook success body.
    pub webhook_response: Option<String>,

    /// Optimistic-lock counter. Creation sets 1; every persisted update
    /// advances it by exactly one.
    pub version: i64,
}

impl Message {
    /// Creates a new pending message.
    pub fn new(phone_number: PhoneNumber, content: MessageContent, max_attempts: i32) -> Self {
        Self {
            id: MessageId::new(),
            phone_number,
            content,
            status: MessageStatus::Pending,
            created_at: Utc::now(),
            sent_at: None,
            attempts: 0,
            max_attempts,
            last_error: None,
            error_code: None,
            webhook_message_id: None,
            webhook_response: None,
            version: 1,
        }
    }

    /// Claims the message for a delivery attempt.
    ///
    /// Consumes one attempt. Valid only from `pending`; re-entering from a
    /// post-failure `pending` is the normal retry path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` when called outside `pending` - that is
    /// a programmer error, not user input.
    pub fn mark_processing(&mut self) -> Result<()> {
        if self.status != MessageStatus::Pending {
            return Err(AppError::Internal(format!(
                "cannot mark message {} as processing from status {}",
                self.id, self.status
            )));
        }

        self.status = MessageStatus::Processing;
        self.attempts += 1;
        Ok(())
    }

    /// Records a successful delivery.
    ///
    /// Sets the sent timestamp and the webhook identifiers, and clears any
    /// failure bookkeeping from earlier attempts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` when called outside `processing`.
    pub fn mark_sent(&mut self, webhook_message_id: String, webhook_response: String) -> Result<()> {
        if self.status != MessageStatus::Processing {
            return Err(AppError::Internal(format!(
                "cannot mark message {} as sent from status {}",
                self.id, self.status
            )));
        }

        self.status = MessageStatus::Sent;
        self.sent_at = Some(Utc::now());
        self.webhook_message_id = Some(webhook_message_id);
        self.webhook_response = Some(webhook_response);
        self.last_error = None;
        self.error_code = None;
        Ok(())
    }

    /// Records a failed delivery attempt.
    ///
    /// The message returns to `pending` while attempts remain, making it
    /// eligible for the next cycle; once the budget is exhausted it becomes
    /// terminally `failed`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` when called outside `processing`.
    pub fn mark_failed(&mut self, error_message: String, error_code: &str) -> Result<()> {
        if self.status != MessageStatus::Processing {
            return Err(AppError::Internal(format!(
                "cannot mark message {} as failed from status {}",
                self.id, self.status
            )));
        }

        self.last_error = Some(error_message);
        self.error_code = Some(error_code.to_string());

        if self.attempts >= self.max_attempts {
            self.status = MessageStatus::Failed;
        } else {
            self.status = MessageStatus::Pending;
        }
        Ok(())
    }

    /// Whether the message is still eligible for another delivery attempt.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts && self.status != MessageStatus::Sent
    }

    /// Advances the optimistic-lock counter.
    ///
    /// Called by the store only after the corresponding row write succeeded,
    /// keeping the in-memory counter aligned with the persisted one.
    pub fn increment_version(&mut self) {
        self.version += 1;
    }
}

/// Aggregate counts over the messages table, computed in a single scan.
#[derive(Debug, Clone, Copy, Default, Serialize, sqlx::FromRow)]
pub struct MessageStats {
    /// All messages regardless of status.
    pub total: i64,
    /// Messages waiting for dispatch.
    pub pending: i64,
    /// Successfully delivered messages.
    pub sent: i64,
    /// Terminally failed messages.
    pub failed: i64,
}

/// Cache record written for every successful send.
///
/// Derived state: losing an entry is non-fatal, the store remains the
/// authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSend {
    /// The courier-side message id.
    pub message_id: MessageId,
    /// The id the webhook issued for this delivery.
    pub webhook_message_id: String,
    /// When the message transitioned to `sent`.
    pub sent_at: DateTime<Utc>,
    /// Recipient number, kept for audit lookups.
    pub phone_number: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(max_attempts: i32) -> Message {
        Message::new(
            PhoneNumber::parse("+905551234567").unwrap(),
            MessageContent::parse("Hello", 160).unwrap(),
            max_attempts,
        )
    }

    #[test]
    fn phone_number_accepts_e164() {
        let phone = PhoneNumber::parse("+905551234567").unwrap();
        assert_eq!(phone.as_str(), "+905551234567");
        assert_eq!(PhoneNumber::parse("+12025550100").unwrap().to_string(), "+12025550100");
    }

    #[test]
    fn phone_number_round_trips() {
        let phone = PhoneNumber::parse("+447911123456").unwrap();
        assert_eq!(PhoneNumber::parse(phone.as_str()).unwrap(), phone);
    }

    #[test]
    fn phone_number_rejects_bad_shapes() {
        assert!(PhoneNumber::parse("").is_err());
        assert!(PhoneNumber::parse("05551234567").is_err()); // missing +
        assert!(PhoneNumber::parse("+05551234567").is_err()); // leading zero
        assert!(PhoneNumber::parse("+9").is_err()); // too short
        assert!(PhoneNumber::parse("+90555123456789012").is_err()); // too long
        assert!(PhoneNumber::parse("+90555a234567").is_err()); // non-digit
    }

    #[test]
    fn content_boundary_at_char_limit() {
        let at_limit = "x".repeat(160);
        assert!(MessageContent::parse(&at_limit, 160).is_ok());

        let over_limit = "x".repeat(161);
        let err = MessageContent::parse(&over_limit, 160).unwrap_err();
        assert!(err.to_string().contains("160"));
        assert!(err.to_string().contains("161"));
    }

    #[test]
    fn content_counts_code_points_not_bytes() {
        // 10 code points, 40 bytes
        let content = MessageContent::parse(&"🎉".repeat(10), 10).unwrap();
        assert_eq!(content.len(), 10);
        assert!(MessageContent::parse(&"🎉".repeat(11), 10).is_err());
    }

    #[test]
    fn content_rejects_empty() {
        assert!(MessageContent::parse("", 160).is_err());
    }

    #[test]
    fn status_string_round_trip() {
        for status in
            [MessageStatus::Pending, MessageStatus::Processing, MessageStatus::Sent, MessageStatus::Failed]
        {
            assert_eq!(MessageStatus::parse(&status.to_string()).unwrap(), status);
        }
        assert!(MessageStatus::parse("delivering").is_err());
    }

    #[test]
    fn new_message_starts_pending_with_version_one() {
        let m = message(3);
        assert_eq!(m.status, MessageStatus::Pending);
        assert_eq!(m.attempts, 0);
        assert_eq!(m.version, 1);
        assert!(m.sent_at.is_none());
    }

    #[test]
    fn processing_consumes_one_attempt() {
        let mut m = message(3);
        m.mark_processing().unwrap();
        assert_eq!(m.status, MessageStatus::Processing);
        assert_eq!(m.attempts, 1);
    }

    #[test]
    fn sent_is_terminal_and_clears_errors() {
        let mut m = message(3);
        m.mark_processing().unwrap();
        m.mark_failed("boom".into(), "SERVER_ERROR").unwrap();
        assert_eq!(m.status, MessageStatus::Pending);

        m.mark_processing().unwrap();
        m.mark_sent("w-1".into(), r#"{"messageId":"w-1"}"#.into()).unwrap();
        assert_eq!(m.status, MessageStatus::Sent);
        assert!(m.sent_at.is_some());
        assert_eq!(m.webhook_message_id.as_deref(), Some("w-1"));
        assert!(m.last_error.is_none());
        assert!(m.error_code.is_none());

        // sent is terminal
        assert!(m.mark_processing().is_err());
        assert!(!m.can_retry());
    }

    #[test]
    fn failure_loops_back_to_pending_until_budget_exhausted() {
        let mut m = message(2);

        m.mark_processing().unwrap();
        m.mark_failed("500".into(), "SERVER_ERROR").unwrap();
        assert_eq!(m.status, MessageStatus::Pending);
        assert_eq!(m.attempts, 1);
        assert!(m.can_retry());

        m.mark_processing().unwrap();
        m.mark_failed("500".into(), "SERVER_ERROR").unwrap();
        assert_eq!(m.status, MessageStatus::Failed);
        assert_eq!(m.attempts, 2);
        assert!(!m.can_retry());
        assert_eq!(m.error_code.as_deref(), Some("SERVER_ERROR"));
    }

    #[test]
    fn transitions_outside_preconditions_are_internal_errors() {
        let mut m = message(3);
        assert!(matches!(m.mark_sent("w".into(), "{}".into()), Err(AppError::Internal(_))));
        assert!(matches!(m.mark_failed("e".into(), "TIMEOUT"), Err(AppError::Internal(_))));

        m.mark_processing().unwrap();
        assert!(matches!(m.mark_processing(), Err(AppError::Internal(_))));
    }

    #[test]
    fn version_advances_by_one() {
        let mut m = message(3);
        m.increment_version();
        m.increment_version();
        assert_eq!(m.version, 3);
    }
}
