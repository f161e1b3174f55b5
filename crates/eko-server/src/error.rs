use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use eko_shared::{ErrorCode, ErrorInfo, ValidationError};
use eko_store::StoreError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Timed out")]
    Timeout,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServerError::NotFound("no such record".into()),
            StoreError::Constraint(msg) => ServerError::Conflict(msg),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<ValidationError> for ServerError {
    fn from(err: ValidationError) -> Self {
        ServerError::Validation(err.to_string())
    }
}

impl ServerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::ProtocolViolation(_) => ErrorCode::ProtocolViolation,
            ServerError::AuthFailure(_) => ErrorCode::AuthFailure,
            ServerError::Unauthorized(_) | ServerError::Forbidden(_) => ErrorCode::Unauthorized,
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::Conflict(_) => ErrorCode::Conflict,
            ServerError::Validation(_) => ErrorCode::Validation,
            ServerError::RateLimited => ErrorCode::RateLimited,
            ServerError::Timeout => ErrorCode::Timeout,
            ServerError::Io(_) | ServerError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether the connection has to be closed after reporting this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServerError::ProtocolViolation(_) | ServerError::AuthFailure(_)
        )
    }

    /// Wire form of the error. Internal details never leave the server:
    /// they are logged under a reference id and only the id is sent.
    pub fn to_error_info(&self) -> ErrorInfo {
        let message = match self {
            ServerError::Io(_) | ServerError::Internal(_) => {
                let reference = Uuid::new_v4();
                tracing::error!(%reference, error = %self, "Internal error");
                format!("internal error (ref {reference})")
            }
            other => other.to_string(),
        };
        ErrorInfo {
            code: self.code(),
            message,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Validation(_) | ServerError::ProtocolViolation(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::AuthFailure(_) | ServerError::Unauthorized(_) => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            ServerError::Timeout => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            ServerError::Io(_) | ServerError::Internal(_) => {
                let reference = Uuid::new_v4();
                tracing::error!(%reference, error = %self, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error (ref {reference})"),
                )
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
