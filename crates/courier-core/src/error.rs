//! Error taxonomy for the dispatch pipeline.
//!
//! Every failure in the system carries one of the ten stable error codes.
//! The codes feed three consumers: the retry policy (via [`AppError::is_retryable`]),
//! the message record (`error_code` column), and the HTTP layer's status
//! mapping. Stack traces and source chains stay in logs; callers only see the
//! code and a human message.

use thiserror::Error;

/// Result type alias using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error with a stable taxonomy code.
#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// Bad input to create or parse a value.
    #[error("validation error: {0}")]
    Validation(String),

    /// Entity absent, or an optimistic-lock update matched zero rows.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate id on insert.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Unclassified store fault.
    #[error("database error: {0}")]
    Database(String),

    /// Deadline exceeded mid-webhook.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Transport failure reaching the webhook.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed or non-2xx-below-500 webhook reply.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Webhook replied with a 5xx status.
    #[error("server error: {0}")]
    Server(String),

    /// Rate-limit token wait was cancelled.
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// Programmer error or unexpected panic.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the stable taxonomy code for this error.
    ///
    /// These strings are persisted in the `error_code` column and surfaced
    /// to API clients, so they must never change.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Network(_) => "NETWORK_ERROR",
            Self::InvalidResponse(_) => "INVALID_RESPONSE",
            Self::Server(_) => "SERVER_ERROR",
            Self::RateLimit(_) => "RATE_LIMIT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a delivery failing with this error is worth another attempt.
    ///
    /// Retryable errors put the message back to `pending` until its attempt
    /// budget runs out. Non-retryable errors are surfaced to the caller
    /// instead of consuming attempts.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Timeout(_)
                | Self::Network(_)
                | Self::InvalidResponse(_)
                | Self::Server(_)
                | Self::RateLimit(_)
        )
    }

    /// Creates an internal error from a displayable source.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested row not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::AlreadyExists(format!("unique constraint violation: {db_err}"))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        Self::Database(format!("cache error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(AppError::Validation(String::new()).code(), "VALIDATION_ERROR");
        assert_eq!(AppError::NotFound(String::new()).code(), "NOT_FOUND");
        assert_eq!(AppError::AlreadyExists(String::new()).code(), "ALREADY_EXISTS");
        assert_eq!(AppError::Database(String::new()).code(), "DATABASE_ERROR");
        assert_eq!(AppError::Timeout(String::new()).code(), "TIMEOUT");
        assert_eq!(AppError::Network(String::new()).code(), "NETWORK_ERROR");
        assert_eq!(AppError::InvalidResponse(String::new()).code(), "INVALID_RESPONSE");
        assert_eq!(AppError::Server(String::new()).code(), "SERVER_ERROR");
        assert_eq!(AppError::RateLimit(String::new()).code(), "RATE_LIMIT");
        assert_eq!(AppError::Internal(String::new()).code(), "INTERNAL_ERROR");
    }

    #[test]
    fn retryable_classes_identified() {
        assert!(AppError::Server("500".into()).is_retryable());
        assert!(AppError::Timeout("deadline".into()).is_retryable());
        assert!(AppError::Network("refused".into()).is_retryable());
        assert!(AppError::InvalidResponse("bad body".into()).is_retryable());
        assert!(AppError::Database("down".into()).is_retryable());
        assert!(AppError::RateLimit("cancelled".into()).is_retryable());

        assert!(!AppError::Validation("bad phone".into()).is_retryable());
        assert!(!AppError::NotFound("missing".into()).is_retryable());
        assert!(!AppError::AlreadyExists("dup".into()).is_retryable());
        assert!(!AppError::Internal("bug".into()).is_retryable());
    }

    #[test]
    fn sqlx_row_not_found_maps_to_not_found() {
        let err = AppError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
