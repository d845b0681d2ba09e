use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::crypto::CryptoError;

/// Failures of the durable stores (PostgreSQL or in-memory).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {e}");
        StoreError::Database(e.to_string())
    }
}

/// Errors produced by the token managers.
///
/// This is a closed set: callers branch on the variant, the HTTP boundary
/// translates each one into a status code.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("TikTok integration not configured: no active credential")]
    NoActiveCredential,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from calls to the TikTok platform itself.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("TikTok client credentials not configured")]
    NotConfigured,

    #[error("Request failed: {0}")]
    Request(String),

    #[error("TikTok API error ({code}): {message}")]
    Api { code: String, message: String },

    #[error("Unexpected response: {0}")]
    Decode(String),
}

/// Unified error type for the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Insufficient permissions: {0}")]
    Forbidden(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid state parameter")]
    InvalidState,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CryptoError> for ApiError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidState => ApiError::InvalidState,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::InvalidToken(_) => (StatusCode::UNAUTHORIZED, "invalid_token"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::InvalidState => (StatusCode::BAD_REQUEST, "invalid_state"),
            ApiError::Token(TokenError::NoActiveCredential) => {
                (StatusCode::SERVICE_UNAVAILABLE, "integration_not_configured")
            }
            ApiError::Token(TokenError::InvalidInput(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_input")
            }
            ApiError::Token(TokenError::RefreshFailed(_)) => {
                (StatusCode::BAD_GATEWAY, "refresh_failed")
            }
            ApiError::Token(TokenError::Store(_)) | ApiError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
            }
            ApiError::Provider(ProviderError::NotConfigured) => {
                (StatusCode::SERVICE_UNAVAILABLE, "integration_not_configured")
            }
            ApiError::Provider(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!("{code}: {self}");
        }

        let body = json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
