//! Service Configuration
//!
//! All configuration values are loaded from environment variables.
//! No hardcoded secrets or sensitive data.

use crate::error::AuthError;
use crate::models::LockoutPolicy;
use crate::password::DEFAULT_COMMON_PASSWORDS;
use axum_extra::extract::cookie::SameSite;
use chrono::Duration;
use std::env;
use std::fmt;
use std::str::FromStr;

/// Credential lifecycle configuration loaded from environment
#[derive(Clone)]
pub struct AuthConfig {
    /// JWT secret key for signing access tokens (from JWT_SECRET env var)
    pub jwt_secret: String,

    /// JWT issuer (from JWT_ISSUER env var)
    pub jwt_issuer: String,

    /// JWT audience (from JWT_AUDIENCE env var)
    pub jwt_audience: String,

    /// Access token lifetime in seconds (from ACCESS_TOKEN_TTL env var)
    pub access_token_ttl: i64,

    /// Refresh token lifetime in seconds (from REFRESH_TOKEN_TTL env var)
    pub refresh_token_ttl: i64,

    /// Consecutive failed logins before lockout (from MAX_LOGIN_ATTEMPTS env var)
    pub max_login_attempts: i32,

    /// Account lockout duration in seconds (from ACCOUNT_LOCK_DURATION env var)
    pub lockout_duration: i64,

    /// Revoke every session of a user when a revoked refresh token is replayed
    /// (from REVOKE_ON_REUSE env var)
    pub revoke_on_reuse: bool,

    /// Minimum password length in characters (from MIN_PASSWORD_LENGTH env var)
    pub min_password_length: usize,

    /// Deny-listed password fragments (from COMMON_PASSWORDS env var, comma separated)
    pub common_passwords: Vec<String>,

    /// Argon2 memory cost in KiB (from ARGON2_MEMORY_COST env var)
    pub argon2_memory_cost: u32,

    /// Argon2 time cost (iterations) (from ARGON2_TIME_COST env var)
    pub argon2_time_cost: u32,

    /// Argon2 parallelism (from ARGON2_PARALLELISM env var)
    pub argon2_parallelism: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_issuer: "credential-service".to_string(),
            jwt_audience: "credential-service-api".to_string(),
            access_token_ttl: 900,       // 15 minutes
            refresh_token_ttl: 2_592_000, // 30 days
            max_login_attempts: 5,
            lockout_duration: 900,
            revoke_on_reuse: true,
            min_password_length: 8,
            common_passwords: DEFAULT_COMMON_PASSWORDS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            argon2_memory_cost: 65536, // 64 MiB
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("max_login_attempts", &self.max_login_attempts)
            .field("lockout_duration", &self.lockout_duration)
            .field("revoke_on_reuse", &self.revoke_on_reuse)
            .field("min_password_length", &self.min_password_length)
            .field("common_passwords", &self.common_passwords.len())
            .finish_non_exhaustive()
    }
}

impl AuthConfig {
    /// Load configuration from environment variables
    ///
    /// Unset variables fall back to their defaults; `JWT_SECRET` is required.
    pub fn from_env() -> Result<Self, AuthError> {
        let defaults = Self::default();

        let jwt_secret = env::var("JWT_SECRET").map_err(|_| {
            AuthError::Config("JWT_SECRET environment variable must be set".to_string())
        })?;

        let common_passwords = match env::var("COMMON_PASSWORDS") {
            Ok(list) => split_list(&list),
            Err(_) => defaults.common_passwords,
        };

        Ok(Self {
            jwt_secret,
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or(defaults.jwt_issuer),
            jwt_audience: env::var("JWT_AUDIENCE").unwrap_or(defaults.jwt_audience),
            access_token_ttl: env_or("ACCESS_TOKEN_TTL", defaults.access_token_ttl)?,
            refresh_token_ttl: env_or("REFRESH_TOKEN_TTL", defaults.refresh_token_ttl)?,
            max_login_attempts: env_or("MAX_LOGIN_ATTEMPTS", defaults.max_login_attempts)?,
            lockout_duration: env_or("ACCOUNT_LOCK_DURATION", defaults.lockout_duration)?,
            revoke_on_reuse: env_or("REVOKE_ON_REUSE", defaults.revoke_on_reuse)?,
            min_password_length: env_or("MIN_PASSWORD_LENGTH", defaults.min_password_length)?,
            common_passwords,
            argon2_memory_cost: env_or("ARGON2_MEMORY_COST", defaults.argon2_memory_cost)?,
            argon2_time_cost: env_or("ARGON2_TIME_COST", defaults.argon2_time_cost)?,
            argon2_parallelism: env_or("ARGON2_PARALLELISM", defaults.argon2_parallelism)?,
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.jwt_secret.len() < 32 {
            return Err(AuthError::Config(
                "JWT_SECRET must be at least 32 characters".to_string(),
            ));
        }

        if self.access_token_ttl <= 0 {
            return Err(AuthError::Config(
                "ACCESS_TOKEN_TTL must be positive".to_string(),
            ));
        }

        if self.refresh_token_ttl <= self.access_token_ttl {
            return Err(AuthError::Config(
                "REFRESH_TOKEN_TTL must be greater than ACCESS_TOKEN_TTL".to_string(),
            ));
        }

        if self.max_login_attempts < 1 {
            return Err(AuthError::Config(
                "MAX_LOGIN_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        if self.lockout_duration <= 0 {
            return Err(AuthError::Config(
                "ACCOUNT_LOCK_DURATION must be positive".to_string(),
            ));
        }

        if self.min_password_length < 8 {
            return Err(AuthError::Config(
                "MIN_PASSWORD_LENGTH must be at least 8".to_string(),
            ));
        }

        Ok(())
    }

    pub fn access_ttl(&self) -> Duration {
        Duration::seconds(self.access_token_ttl)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::seconds(self.refresh_token_ttl)
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            max_attempts: self.max_login_attempts,
            duration: Duration::seconds(self.lockout_duration),
        }
    }
}

/// HTTP server and infrastructure settings used by the binary
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// PostgreSQL connection string (from DATABASE_URL env var)
    pub database_url: String,

    /// Connection pool size (from DATABASE_MAX_CONNECTIONS env var)
    pub database_max_connections: u32,

    /// Listen address (from BIND_ADDRESS env var)
    pub bind_address: String,

    /// Requests per client per minute (from RATE_LIMIT_PER_MINUTE env var)
    pub rate_limit_per_minute: u32,

    /// CORS origins (from ALLOWED_ORIGINS env var, comma separated)
    pub allowed_origins: Vec<String>,

    /// Seconds between expired refresh token sweeps (from TOKEN_SWEEP_INTERVAL env var)
    pub token_sweep_interval: u64,

    /// Key rate limits on X-Forwarded-For / X-Real-IP instead of the peer
    /// address (from TRUSTED_PROXY env var)
    pub trusted_proxy: bool,

    /// Refresh token cookie attributes
    pub refresh_cookie: RefreshCookieConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, AuthError> {
        let database_url = env::var("DATABASE_URL").map_err(|_| {
            AuthError::Config("DATABASE_URL environment variable must be set".to_string())
        })?;

        Ok(Self {
            database_url,
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10)?,
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:9001".to_string()),
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", 60)?,
            allowed_origins: split_list(
                &env::var("ALLOWED_ORIGINS").unwrap_or_else(|_| "http://localhost:3000".to_string()),
            ),
            token_sweep_interval: env_or("TOKEN_SWEEP_INTERVAL", 3600)?,
            trusted_proxy: env_or("TRUSTED_PROXY", false)?,
            refresh_cookie: RefreshCookieConfig::from_env()?,
        })
    }
}

/// Attributes of the HttpOnly cookie carrying the refresh token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshCookieConfig {
    /// Cookie name (from REFRESH_COOKIE_NAME env var)
    pub name: String,

    /// Secure attribute (from COOKIE_SECURE env var)
    pub secure: bool,

    /// SameSite attribute (from COOKIE_SAME_SITE env var: strict, lax or none)
    pub same_site: SameSite,

    /// Path attribute (from COOKIE_PATH env var)
    pub path: String,

    /// Domain attribute, host-only when unset (from COOKIE_DOMAIN env var)
    pub domain: Option<String>,
}

impl Default for RefreshCookieConfig {
    fn default() -> Self {
        Self {
            name: "refresh_token".to_string(),
            secure: true,
            same_site: SameSite::Lax,
            path: "/".to_string(),
            domain: None,
        }
    }
}

impl RefreshCookieConfig {
    pub fn from_env() -> Result<Self, AuthError> {
        let defaults = Self::default();

        let same_site = match env::var("COOKIE_SAME_SITE") {
            Ok(raw) => parse_same_site(&raw)?,
            Err(_) => defaults.same_site,
        };

        Ok(Self {
            name: env::var("REFRESH_COOKIE_NAME").unwrap_or(defaults.name),
            secure: env_or("COOKIE_SECURE", defaults.secure)?,
            same_site,
            path: env::var("COOKIE_PATH").unwrap_or(defaults.path),
            domain: env::var("COOKIE_DOMAIN")
                .ok()
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
        })
    }
}

fn parse_same_site(raw: &str) -> Result<SameSite, AuthError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "strict" => Ok(SameSite::Strict),
        "lax" => Ok(SameSite::Lax),
        "none" => Ok(SameSite::None),
        _ => Err(AuthError::Config(format!(
            "COOKIE_SAME_SITE has an invalid value: {raw:?}"
        ))),
    }
}

/// Read and parse an env var, falling back to `default` when unset.
fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, AuthError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AuthError::Config(format!("{key} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "a".repeat(32),
            ..AuthConfig::default()
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_short_secret() {
        let config = AuthConfig {
            jwt_secret: "short".to_string(),
            ..valid_config()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_refresh_ttl_must_exceed_access_ttl() {
        let config = AuthConfig {
            access_token_ttl: 3600,
            refresh_token_ttl: 3600,
            ..valid_config()
        };

        assert!(matches!(config.validate(), Err(AuthError::Config(_))));
    }

    #[test]
    fn test_zero_login_attempts_rejected() {
        let config = AuthConfig {
            max_login_attempts: 0,
            ..valid_config()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lockout_policy() {
        let policy = valid_config().lockout_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.duration, Duration::minutes(15));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", valid_config());
        assert!(!rendered.contains(&"a".repeat(32)));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_parse_same_site() {
        assert_eq!(parse_same_site("Strict").unwrap(), SameSite::Strict);
        assert_eq!(parse_same_site(" lax ").unwrap(), SameSite::Lax);
        assert_eq!(parse_same_site("none").unwrap(), SameSite::None);
        assert!(matches!(parse_same_site("sometimes"), Err(AuthError::Config(_))));
    }

    #[test]
    fn test_refresh_cookie_defaults() {
        let cookie = RefreshCookieConfig::default();
        assert_eq!(cookie.name, "refresh_token");
        assert!(cookie.secure);
        assert_eq!(cookie.same_site, SameSite::Lax);
        assert_eq!(cookie.path, "/");
        assert_eq!(cookie.domain, None);
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(" http://a.test , ,http://b.test"),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }
}
