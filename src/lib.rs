//! Credential Service
//!
//! Credential lifecycle management for an HTTP API:
//! - User registration with password strength policy
//! - Login with Argon2id verification and account lockout
//! - Short-lived JWT access tokens
//! - Opaque, single-use refresh tokens stored only as SHA-256 digests
//! - Logout of one session or all sessions
//! - Password change with session revocation
//! - Best-effort audit trail of security events
//!
//! # Configuration
//!
//! All configuration is loaded from environment variables:
//! - `JWT_SECRET` - Secret key for signing JWTs (required, min 32 chars)
//! - `ACCESS_TOKEN_TTL` - Access token lifetime in seconds (default: 900)
//! - `REFRESH_TOKEN_TTL` - Refresh token lifetime in seconds (default: 2592000)
//! - `MAX_LOGIN_ATTEMPTS` - Failed logins before lockout (default: 5)
//! - `ACCOUNT_LOCK_DURATION` - Lockout duration in seconds (default: 900)
//! - `DATABASE_URL` - PostgreSQL connection string (required by the server)
//! - `TRUSTED_PROXY` - Rate limit on forwarding headers instead of the peer address (default: false)
//! - `REFRESH_COOKIE_NAME` - Name of the HttpOnly refresh token cookie (default: refresh_token)
//!
//! See [`AuthConfig`] and [`ServerConfig`] for the full list.
//!
//! # Usage
//!
//! ```rust,ignore
//! use credential_service::{AuthConfig, AuthService, ClientInfo, CredentialStores};
//!
//! let auth = AuthService::from_config(CredentialStores::postgres(pool), AuthConfig::from_env()?)?;
//! let client = ClientInfo::default();
//!
//! auth.register("a@x.com", "Str0ng!Pass", &client).await?;
//! let session = auth.login("a@x.com", "Str0ng!Pass", &client).await?;
//! let rotated = auth.refresh(&session.refresh_token, &client).await?;
//! ```

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod password;
pub mod service;
pub mod store;
pub mod token;

// Re-export commonly used types
pub use config::{AuthConfig, RefreshCookieConfig, ServerConfig};
pub use error::AuthError;
pub use extractors::AuthUser;
pub use handlers::{create_routes, AppState, AuthState};
pub use middleware::RateLimiter;
pub use models::*;
pub use password::{Argon2Hasher, PasswordHasher, PasswordPolicy, StrengthPolicy};
pub use service::AuthService;
pub use store::{AuditStore, CredentialStores, RefreshTokenStore, UserStore};
pub use token::{IssuedRefreshToken, JwtTokenIssuer, TokenIssuer};
