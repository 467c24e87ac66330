//! Credential Service HTTP Handlers
//!
//! REST API endpoints over [`AuthService`].
//!
//! The refresh token travels in an HttpOnly cookie: login and refresh set
//! it, refresh reads it, and logout or a failed refresh clear it.

use crate::config::RefreshCookieConfig;
use crate::error::AuthError;
use crate::extractors::AuthUser;
use crate::middleware::{self, RateLimiter};
use crate::models::*;
use crate::service::AuthService;

use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use std::sync::Arc;
use validator::Validate;

/// Shared auth service state
pub type AuthState = Arc<AuthService>;

/// Router state: the service plus the HTTP-only concerns around it
#[derive(Clone, FromRef)]
pub struct AppState {
    pub auth: AuthState,
    pub cookie: Arc<RefreshCookieConfig>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(auth: AuthState, cookie: RefreshCookieConfig, limiter: Arc<RateLimiter>) -> Self {
        Self {
            auth,
            cookie: Arc::new(cookie),
            limiter,
        }
    }
}

// ============================================
// Route Builder
// ============================================

/// Create authentication routes
///
/// Register and login are rate limited per client.
pub fn create_routes(state: AppState) -> Router {
    // Public routes (no authentication required)
    let limited = Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route_layer(axum_middleware::from_fn_with_state(
            state.limiter.clone(),
            middleware::rate_limit,
        ));

    let public = Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/refresh", post(refresh_token));

    // Protected routes (require authentication)
    let protected = Router::new()
        .route("/auth/me", get(get_current_user))
        .route("/auth/logout-all", post(logout_all))
        .route("/auth/change-password", post(change_password))
        .route_layer(axum_middleware::from_fn_with_state(
            state.auth.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(limited)
        .merge(public)
        .merge(protected)
        .with_state(state)
}

// ============================================
// Refresh Cookie
// ============================================

/// HttpOnly cookie carrying a plaintext refresh token
fn refresh_cookie(settings: &RefreshCookieConfig, value: String, max_age: i64) -> Cookie<'static> {
    let mut cookie = Cookie::build((settings.name.clone(), value))
        .http_only(true)
        .secure(settings.secure)
        .same_site(settings.same_site)
        .path(settings.path.clone())
        .max_age(time::Duration::seconds(max_age))
        .build();

    if let Some(domain) = &settings.domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

/// Expire the refresh cookie on the client
fn clear_refresh_cookie(jar: CookieJar, settings: &RefreshCookieConfig) -> CookieJar {
    let mut removal = Cookie::build((settings.name.clone(), ""))
        .http_only(true)
        .secure(settings.secure)
        .same_site(settings.same_site)
        .path(settings.path.clone())
        .build();

    if let Some(domain) = &settings.domain {
        removal.set_domain(domain.clone());
    }
    removal.make_removal();

    // `CookieJar::remove` only emits removals for cookies the request carried
    jar.add(removal)
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ============================================
// Registration
// ============================================

/// POST /auth/register
///
/// Register a new user account
pub async fn register(
    State(auth): State<AuthState>,
    client: ClientInfo,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AuthError> {
    req.validate()?;

    let user = auth.register(&req.email, &req.password, &client).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Registration successful",
            "user": user
        })),
    ))
}

// ============================================
// Login / Logout
// ============================================

/// POST /auth/login
///
/// Authenticate user and return access/refresh tokens
pub async fn login(
    State(auth): State<AuthState>,
    State(cookie): State<Arc<RefreshCookieConfig>>,
    jar: CookieJar,
    client: ClientInfo,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    req.validate()?;

    let response = auth.login(&req.email, &req.password, &client).await?;

    let jar = jar.add(refresh_cookie(
        &cookie,
        response.refresh_token.clone(),
        auth.config().refresh_token_ttl,
    ));

    Ok((jar, Json(response)))
}

/// POST /auth/logout
///
/// Revoke the refresh token from the cookie, or from the body when no cookie
/// is sent. The bearer token and both token sources are optional; the call
/// always succeeds and clears the cookie.
pub async fn logout(
    State(auth): State<AuthState>,
    State(cookie): State<Arc<RefreshCookieConfig>>,
    jar: CookieJar,
    user: Option<AuthUser>,
    client: ClientInfo,
    body: Option<Json<LogoutRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let presented = jar
        .get(&cookie.name)
        .map(|c| c.value().to_string())
        .or(req.refresh_token);

    auth.logout(
        user.as_ref().map(|u| u.id.as_str()),
        presented.as_deref(),
        &client,
    )
    .await;

    (
        clear_refresh_cookie(jar, &cookie),
        Json(MessageResponse::new("Logged out successfully")),
    )
}

/// POST /auth/logout-all
///
/// Revoke every session of the authenticated user
pub async fn logout_all(
    State(auth): State<AuthState>,
    State(cookie): State<Arc<RefreshCookieConfig>>,
    jar: CookieJar,
    user: AuthUser,
    client: ClientInfo,
) -> Result<impl IntoResponse, AuthError> {
    let revoked = auth.logout_all(&user.id, &client).await?;

    Ok((
        clear_refresh_cookie(jar, &cookie),
        Json(serde_json::json!({
            "message": "Logged out from all sessions",
            "revoked_sessions": revoked
        })),
    ))
}

// ============================================
// Token Refresh
// ============================================

/// POST /auth/refresh
///
/// Exchange a refresh token for a new token pair. The cookie wins over a
/// `refresh_token` body field. On failure the cookie is cleared.
pub async fn refresh_token(
    State(auth): State<AuthState>,
    State(cookie): State<Arc<RefreshCookieConfig>>,
    jar: CookieJar,
    client: ClientInfo,
    body: Option<Json<RefreshTokenRequest>>,
) -> Result<impl IntoResponse, (CookieJar, AuthError)> {
    let presented = jar
        .get(&cookie.name)
        .map(|c| c.value().to_string())
        .or_else(|| body.map(|Json(req)| req.refresh_token))
        .unwrap_or_default();

    match auth.refresh(&presented, &client).await {
        Ok(response) => {
            let jar = jar.add(refresh_cookie(
                &cookie,
                response.refresh_token.clone(),
                auth.config().refresh_token_ttl,
            ));
            Ok((jar, Json(response)))
        }
        Err(e) => Err((clear_refresh_cookie(jar, &cookie), e)),
    }
}

// ============================================
// Current User
// ============================================

/// GET /auth/me
pub async fn get_current_user(
    State(auth): State<AuthState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AuthError> {
    let profile = auth.get_profile(&user.id).await?;

    Ok(Json(profile))
}

/// POST /auth/change-password
///
/// Change password for authenticated user; all sessions are revoked
pub async fn change_password(
    State(auth): State<AuthState>,
    user: AuthUser,
    client: ClientInfo,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    req.validate()?;

    auth.change_password(&user.id, &req.current_password, &req.new_password, &client)
        .await?;

    Ok(Json(MessageResponse::new(
        "Password changed successfully. Please log in again.",
    )))
}
