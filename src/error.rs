use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::repository::RepositoryError;

/// Error taxonomy shared by services and HTTP handlers.
///
/// `NotFound` covers both absent rows and rows owned by another tenant.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("payload exceeds maximum of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("too many attempts, try again later")]
    RateLimited,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("storage backend error: {0}")]
    UpstreamStorage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(entity) => AppError::NotFound(entity),
            RepositoryError::Conflict(msg) => AppError::Conflict(msg),
            RepositoryError::Storage(msg) => AppError::Internal(msg),
        }
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(e: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("password hashing: {e}"))
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::UpstreamStorage(_) => StatusCode::BAD_GATEWAY,
            AppError::Configuration(_)
            | AppError::Encryption(_)
            | AppError::Decryption(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to the caller. Crypto, storage and internal
    /// failures keep their detail in the server log only.
    fn public_message(&self) -> String {
        match self {
            AppError::Configuration(_)
            | AppError::Encryption(_)
            | AppError::Decryption(_)
            | AppError::Internal(_) => "Internal server error".to_string(),
            AppError::UpstreamStorage(_) => "Storage backend unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_errors_hide_detail_from_callers() {
        let err = AppError::Decryption("aead::Error at key version 3".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn repository_errors_map_onto_taxonomy() {
        let nf: AppError = RepositoryError::NotFound("verification").into();
        assert_eq!(nf.status(), StatusCode::NOT_FOUND);
        let conflict: AppError = RepositoryError::Conflict("tenant name taken".into()).into();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::PayloadTooLarge { limit: 10 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}
