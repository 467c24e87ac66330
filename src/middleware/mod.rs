//! Credential Service Middleware

pub mod rate_limit;

use crate::error::AuthError;
use crate::extractors::AuthUser;
use crate::handlers::AuthState;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::any::Any;

pub use rate_limit::{rate_limit, RateDecision, RateLimiter};

/// Require authenticated user
///
/// Verifies the bearer access token and stores the resolved [`AuthUser`]
/// in request extensions for use by extractors.
pub async fn require_auth(
    State(auth): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = AuthUser::from_headers(req.headers(), &auth).map_err(|e| {
        tracing::debug!(error = %e, "Access token rejected");
        e
    })?;

    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

/// Panic handler for `CatchPanicLayer`
///
/// Logs the panic and answers with the generic `internal_error` body.
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    tracing::error!(panic = %detail, "Panic recovered");

    AuthError::Internal(detail).into_response()
}
