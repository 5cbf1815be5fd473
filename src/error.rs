use thiserror::Error;

use crate::crypto::CipherError;
use crate::wb::WbError;

/// Application-wide error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Wildberries API error: {0}")]
    Wb(#[from] WbError),

    #[error("Login token expired or invalid")]
    TokenExpiredOrInvalid,

    #[error("API key is malformed (expected a JWT-shaped token)")]
    CredentialMalformed,

    #[error("Stored API key failed to decrypt")]
    DecryptionAuthFailure,

    #[error("Session invalid or expired")]
    SessionInvalidOrExpired,

    #[error("User not found")]
    UserNotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

/// A decryption authentication failure must stay a distinct, visible state —
/// it is how an operator notices a master-key mismatch. Everything else from
/// the cipher is a setup problem, not a user-recoverable one.
impl From<CipherError> for AppError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::AuthFailure => Self::DecryptionAuthFailure,
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convert AppError to HTTP status codes for web responses
impl AppError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Wb(WbError::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
            Self::Wb(_) => StatusCode::BAD_GATEWAY,
            Self::TokenExpiredOrInvalid => StatusCode::BAD_REQUEST,
            Self::CredentialMalformed => StatusCode::UNPROCESSABLE_ENTITY,
            Self::DecryptionAuthFailure => StatusCode::UNPROCESSABLE_ENTITY,
            Self::SessionInvalidOrExpired => StatusCode::UNAUTHORIZED,
            Self::UserNotFound => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16()
        });
        (status, axum::Json(body)).into_response()
    }
}
