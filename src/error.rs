/// Unified error types for the Parley chat server
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the server
#[derive(Error, Debug)]
pub enum ChatError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Missing, expired or forged access token
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Authenticated but lacking the role for the operation
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Malformed input, invalid credentials, or a guard that is not a permission issue
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced user, group or file is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate registration or membership
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JWT encoding errors
    #[error("JWT error: {0}")]
    Jwt(String),
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ChatError {
    /// HTTP status this error maps to
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ChatError::Authorization(_) => StatusCode::FORBIDDEN,
            // Duplicate registration and duplicate membership both answer 400
            ChatError::Validation(_) | ChatError::Conflict(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ChatError::Database(_)
            | ChatError::Internal(_)
            | ChatError::Io(_)
            | ChatError::Jwt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ChatError::Authentication(_) => "AuthenticationRequired",
            ChatError::Authorization(_) => "Forbidden",
            ChatError::Validation(_) => "InvalidRequest",
            ChatError::NotFound(_) => "NotFound",
            ChatError::Conflict(_) => "Conflict",
            ChatError::RateLimitExceeded { .. } => "RateLimitExceeded",
            _ => "InternalServerError",
        }
    }
}

/// Convert ChatError to HTTP response
impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ChatError::Database(_) | ChatError::Internal(_) | ChatError::Io(_) | ChatError::Jwt(_) => {
                tracing::error!(error = %self, "request failed with server fault");
                "Internal server error".to_string() // Don't leak details
            }
            ChatError::RateLimitExceeded { .. } => "Rate limit exceeded".to_string(),
            _ => self.to_string(),
        };

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for server operations
pub type ChatResult<T> = Result<T, ChatError>;
