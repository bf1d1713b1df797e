//! API error type and its JSON body.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use natlang_core::{CoreError, PoolError, SealError};

use crate::error::CoordinatorError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request (400)
    #[error("{message}")]
    BadRequest { message: String, reason: Option<String> },

    /// Missing resource (404)
    #[error("{0}")]
    NotFound(String),

    /// Feature switched off on this node (403)
    #[error("{0}")]
    Forbidden(String),

    /// Chain tail moved under a concurrent seal, or the entry is already sealed (409)
    #[error("{0}")]
    Conflict(String),

    /// Too many submissions (429)
    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    /// Storage or integrity failure (500)
    #[error("{message}")]
    Internal { message: String, reason: Option<String> },
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>, reason: Option<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            reason,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn reason(&self) -> Option<String> {
        match self {
            Self::BadRequest { reason, .. } | Self::Internal { reason, .. } => reason.clone(),
            Self::RateLimited { retry_after_secs } => {
                Some(format!("Retry after {} seconds", retry_after_secs))
            }
            _ => None,
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::RateLimited { retry_after_secs } => Self::RateLimited { retry_after_secs },
            CoordinatorError::UnvalidatedDisabled => Self::Forbidden(e.to_string()),
            CoordinatorError::NoPendingEntries => Self::bad_request(e.to_string(), None),
            CoordinatorError::Seal(
                SealError::TailMismatch { .. }
                | SealError::AlreadySealed { .. }
                | SealError::DuplicateInBatch { .. },
            ) => Self::Conflict(e.to_string()),
            CoordinatorError::Pool(PoolError::AlreadySealed { .. }) => Self::Conflict(e.to_string()),
            CoordinatorError::Seal(
                SealError::DifficultyTooHigh { .. } | SealError::NonceExhausted { .. },
            ) => Self::bad_request("Cannot mine block", Some(e.to_string())),
            CoordinatorError::Core(CoreError::ChainIntegrity { .. }) => Self::Internal {
                message: "Chain integrity failure".to_string(),
                reason: Some(e.to_string()),
            },
            other => Self::Internal {
                message: "Internal error".to_string(),
                reason: Some(other.to_string()),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, reason = ?self.reason(), "Request failed");
        }

        let body = ErrorBody {
            error: self.to_string(),
            reason: self.reason(),
        };
        let mut response = (status, Json(body)).into_response();

        if let Self::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
