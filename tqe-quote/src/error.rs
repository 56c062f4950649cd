//! Error types for tqe-quote
//!
//! `QuoteError` is the engine taxonomy; `ApiError` maps it onto HTTP.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// One rejected step field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn describe_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Engine error taxonomy
#[derive(Debug, Error)]
pub enum QuoteError {
    /// Missing or invalid step input; shown to the customer, blocks the transition
    #[error("Validation failed: {}", describe_fields(.0))]
    Validation(Vec<FieldError>),

    /// Store, pipeline or threshold service unreachable
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Field-scoped update lost a race twice
    #[error("Conflicting update on quote {0}")]
    Conflict(Uuid),

    /// Required pricing/eligibility constant missing or invalid
    #[error("Fatal configuration error: {0}")]
    FatalConfig(String),

    #[error("Quote not found: {0}")]
    NotFound(Uuid),

    #[error("Quote {0} has expired")]
    Expired(Uuid),

    #[error("Store error: {0}")]
    Store(#[from] tqe_common::Error),
}

impl QuoteError {
    /// Single-field validation failure
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        QuoteError::Validation(vec![FieldError::new(field, message)])
    }
}

impl From<sqlx::Error> for QuoteError {
    fn from(err: sqlx::Error) -> Self {
        QuoteError::Store(tqe_common::Error::Database(err))
    }
}

/// Result type for engine operations
pub type QuoteResult<T> = Result<T, QuoteError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Step validation failed (422)
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    /// Conflict (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Quote expired (410)
    #[error("Gone: {0}")]
    Gone(String),

    /// Dependency down (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<QuoteError> for ApiError {
    fn from(err: QuoteError) -> Self {
        match err {
            QuoteError::Validation(errors) => ApiError::Validation(errors),
            QuoteError::NotFound(id) => ApiError::NotFound(format!("Quote not found: {}", id)),
            QuoteError::Expired(id) => ApiError::Gone(format!("Quote {} has expired", id)),
            QuoteError::Conflict(id) => {
                ApiError::Conflict(format!("Quote {} was modified concurrently, retry", id))
            }
            QuoteError::DependencyUnavailable(msg) => ApiError::Unavailable(msg),
            QuoteError::FatalConfig(msg) => {
                // Operator path: full detail in the log, generic text to the customer
                tracing::error!(error = %msg, "Fatal configuration error");
                ApiError::Internal("Pricing is temporarily unavailable".to_string())
            }
            QuoteError::Store(e) => ApiError::from(e),
        }
    }
}

impl From<tqe_common::Error> for ApiError {
    fn from(err: tqe_common::Error) -> Self {
        match err {
            tqe_common::Error::NotFound(msg) => ApiError::NotFound(msg),
            tqe_common::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, errors) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            ApiError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_FAILED",
                describe_fields(&errors),
                Some(errors),
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            ApiError::Gone(msg) => (StatusCode::GONE, "EXPIRED", msg, None),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg, None)
            }
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg, None)
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
                "fields": errors.unwrap_or_default(),
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
