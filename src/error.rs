//! Authentication Error Types
//!
//! Every credential operation fails with one of these kinds. The HTTP layer
//! maps each kind to a stable status code and error code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Authentication errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("User not found")]
    UserNotFound,

    #[error("User already exists")]
    UserAlreadyExists,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is locked. Try again later")]
    AccountLocked,

    #[error("Password does not meet requirements")]
    WeakPassword,

    #[error("Current password is incorrect")]
    InvalidPassword,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Token is missing")]
    MissingToken,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store failure: {0}")]
    StoreFailure(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::UserNotFound => "user_not_found",
            AuthError::UserAlreadyExists => "user_already_exists",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountLocked => "account_locked",
            AuthError::WeakPassword => "weak_password",
            AuthError::InvalidPassword => "invalid_password",
            AuthError::InvalidToken => "invalid_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenRevoked => "token_revoked",
            AuthError::MissingToken => "missing_token",
            AuthError::InvalidInput(_) => "invalid_input",
            AuthError::RateLimited => "rate_limited",
            AuthError::StoreFailure(_) | AuthError::Config(_) | AuthError::Internal(_) => {
                "internal_error"
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::UserAlreadyExists => StatusCode::CONFLICT,
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::TokenRevoked
            | AuthError::MissingToken => StatusCode::UNAUTHORIZED,
            AuthError::AccountLocked => StatusCode::FORBIDDEN,
            AuthError::WeakPassword | AuthError::InvalidPassword | AuthError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AuthError::StoreFailure(_) | AuthError::Config(_) | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            // Infrastructure details stay in the logs
            AuthError::StoreFailure(_) | AuthError::Config(_) | AuthError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            _ => self.to_string(),
        };

        (
            self.status(),
            Json(serde_json::json!({
                "error": self.code(),
                "message": message
            })),
        )
            .into_response()
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        AuthError::StoreFailure(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        tracing::error!("Password hashing error: {:?}", err);
        AuthError::Internal(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        tracing::debug!("JWT error: {:?}", err);
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        }
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::InvalidInput(err.to_string())
    }
}
