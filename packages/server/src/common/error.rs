//! Domain error taxonomy for the admission path.
//!
//! Worker-side render failures carry their own classification
//! (`kernel::jobs::RenderErrorKind`); everything surfaced by the broker's
//! admission and control operations maps onto this set and its HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{0}")]
    Validation(String),

    #[error("missing or invalid principal")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("insufficient credits: need {required}, have {available}")]
    InsufficientCredits { required: u32, available: i64 },

    #[error("free tier renders are limited to 720p")]
    QuotaResolution,

    #[error("daily render limit reached")]
    QuotaDaily,

    #[error("{0}")]
    Internal(String),
}

impl DomainError {
    /// Stable machine-readable code included in error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "VALIDATION",
            DomainError::Unauthorized => "UNAUTHORIZED",
            DomainError::Forbidden(_) => "FORBIDDEN",
            DomainError::NotFound(_) => "NOT_FOUND",
            DomainError::Conflict(_) => "CONFLICT",
            DomainError::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            DomainError::QuotaResolution => "QUOTA_RESOLUTION",
            DomainError::QuotaDaily => "QUOTA_DAILY",
            DomainError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DomainError::Validation(_) => StatusCode::BAD_REQUEST,
            DomainError::Unauthorized => StatusCode::UNAUTHORIZED,
            DomainError::Forbidden(_) => StatusCode::FORBIDDEN,
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::Conflict(_) => StatusCode::CONFLICT,
            DomainError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            DomainError::QuotaResolution => StatusCode::FORBIDDEN,
            DomainError::QuotaDaily => StatusCode::TOO_MANY_REQUESTS,
            DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for DomainError {
    fn from(err: anyhow::Error) -> Self {
        DomainError::Internal(format!("{err:#}"))
    }
}

impl IntoResponse for DomainError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}
