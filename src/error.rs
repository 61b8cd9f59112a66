/// Unified error types for the Postline scheduler
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the scheduler
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Malformed input; never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Addressed entity absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation or impossible state transition
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Spacing or daily-cap invariant violated; carries the offending
    /// neighbor times so the caller can retry with the override
    #[error("Spacing conflict: scheduling invariant violated")]
    SpacingConflict {
        min_spacing_minutes: i64,
        neighbors: Vec<DateTime<Utc>>,
    },

    /// Remote publishing quota exhausted
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: std::time::Duration },

    /// Transient I/O failure; caller may retry with backoff
    #[error("Transient error: {0}")]
    Transient(String),

    /// Permanent platform rejection (bad media, revoked auth, frozen account)
    #[error("Terminal error: {0}")]
    Terminal(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// Whether the worker layer should retry this error with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedulerError::Transient(_)
                | SchedulerError::RateLimited { .. }
                | SchedulerError::Database(_)
        )
    }

    /// Short machine-readable code persisted into posts.error_code
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Validation(_) => "validation",
            SchedulerError::NotFound(_) => "not_found",
            SchedulerError::Conflict(_) => "conflict",
            SchedulerError::SpacingConflict { .. } => "spacing_conflict",
            SchedulerError::RateLimited { .. } => "rate_limited",
            SchedulerError::Transient(_) => "transient_io",
            SchedulerError::Terminal(_) => "terminal",
            SchedulerError::Database(_) => "db_error",
            SchedulerError::Internal(_) => "internal",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_spacing_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neighbors: Option<Vec<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Convert SchedulerError to HTTP response
impl IntoResponse for SchedulerError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            SchedulerError::Validation(_) => {
                (StatusCode::BAD_REQUEST, "InvalidRequest", self.to_string())
            }
            SchedulerError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            SchedulerError::Conflict(_) => (StatusCode::CONFLICT, "Conflict", self.to_string()),
            SchedulerError::SpacingConflict { .. } => {
                (StatusCode::CONFLICT, "SpacingConflict", self.to_string())
            }
            SchedulerError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RateLimited",
                "Publishing quota exhausted".to_string(),
            ),
            SchedulerError::Terminal(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Terminal",
                self.to_string(),
            ),
            SchedulerError::Transient(_)
            | SchedulerError::Database(_)
            | SchedulerError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                // Don't leak details
                "Internal server error".to_string(),
            ),
        };

        let (min_spacing_minutes, neighbors) = match &self {
            SchedulerError::SpacingConflict {
                min_spacing_minutes,
                neighbors,
            } => (Some(*min_spacing_minutes), Some(neighbors.clone())),
            _ => (None, None),
        };
        let retry_after_secs = match &self {
            SchedulerError::RateLimited { retry_after } => Some(retry_after.as_secs()),
            _ => None,
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
            min_spacing_minutes,
            neighbors,
            retry_after_secs,
        });

        (status, body).into_response()
    }
}

/// Result type alias for scheduler operations
pub type SchedResult<T> = Result<T, SchedulerError>;
