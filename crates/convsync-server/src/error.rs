use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use convsync_shared::protocol::ErrorBody;
use convsync_shared::ValidationError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Absent or owned by someone else; the two are not distinguished.
    #[error("Not found")]
    NotFound,

    #[error("A newer copy of {0} is already stored")]
    Conflict(String),

    #[error("Blob too large: {size} bytes (max {max})")]
    BlobTooLarge { size: usize, max: usize },

    #[error("Request body exceeds {max} bytes")]
    PayloadTooLarge { max: usize },

    #[error("Blob storage error: {0}")]
    BlobStorage(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Invalid conversation: {0}")]
    Validation(#[from] ValidationError),

    #[error("Missing or invalid bearer token")]
    Unauthorized,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for ServerError {
    fn from(e: rusqlite::Error) -> Self {
        ServerError::Registry(e.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::BlobTooLarge { .. } | ServerError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, self.to_string())
            }
            ServerError::BadRequest(_) | ServerError::Validation(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            ServerError::BlobStorage(_) => {
                tracing::error!(error = %self, "blob storage failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Blob storage error".to_string())
            }
            ServerError::Registry(_) => {
                tracing::error!(error = %self, "registry failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Registry error".to_string())
            }
            ServerError::Internal(_) => {
                tracing::error!(error = %self, "internal failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (status, axum::Json(ErrorBody { error: message })).into_response()
    }
}
