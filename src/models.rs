//! Credential Models
//!
//! Entities persisted by the stores, request/response DTOs, and JWT claims.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// User id recorded on audit entries for which no user could be resolved,
/// such as a login against an unknown email.
pub const UNKNOWN_USER_ID: Uuid = Uuid::nil();

// ============================================
// Database Entities
// ============================================

/// User role enum matching database type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lockout thresholds applied on failed logins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_attempts: i32,
    pub duration: Duration,
}

/// User entity from database
#[derive(Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub is_verified: bool,
    pub failed_login_attempts: i32,
    pub is_locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .field("role", &self.role)
            .field("is_verified", &self.is_verified)
            .field("failed_login_attempts", &self.failed_login_attempts)
            .field("is_locked", &self.is_locked)
            .field("locked_until", &self.locked_until)
            .field("last_login_at", &self.last_login_at)
            .field("last_login_ip", &self.last_login_ip)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl User {
    /// Build a freshly registered, unverified user with the default role.
    pub fn new(email: impl Into<String>, password_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            password_hash: password_hash.into(),
            role: UserRole::User,
            is_verified: false,
            failed_login_attempts: 0,
            is_locked: false,
            locked_until: None,
            last_login_at: None,
            last_login_ip: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if user account is locked at `now`
    ///
    /// A lock without `locked_until` is indefinite.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.is_locked && self.locked_until.map_or(true, |until| now < until)
    }

    /// The stored lock flag is still set but its deadline has passed.
    pub fn lock_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_locked && self.locked_until.is_some_and(|until| now >= until)
    }

    /// Count a failed login; locks the account once the policy threshold is reached.
    pub fn register_failed_attempt(&mut self, policy: &LockoutPolicy, now: DateTime<Utc>) {
        self.failed_login_attempts += 1;
        if self.failed_login_attempts >= policy.max_attempts {
            self.is_locked = true;
            self.locked_until = Some(now + policy.duration);
        }
        self.updated_at = now;
    }

    pub fn clear_lockout(&mut self) {
        self.failed_login_attempts = 0;
        self.is_locked = false;
        self.locked_until = None;
    }

    /// Apply a successful login: lockout state is reset and login info recorded.
    pub fn record_login(&mut self, ip_address: Option<&str>, now: DateTime<Utc>) {
        self.clear_lockout();
        self.last_login_at = Some(now);
        self.last_login_ip = ip_address.map(String::from);
        self.updated_at = now;
    }

    pub fn set_password_hash(&mut self, password_hash: impl Into<String>, now: DateTime<Utc>) {
        self.password_hash = password_hash.into();
        self.updated_at = now;
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile::from(self)
    }
}

/// Refresh token entity from database
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    /// Set when the token was revoked by rotation; points at its successor
    pub replaced_by: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefreshToken {
    pub fn new(
        user_id: Uuid,
        token_hash: impl Into<String>,
        ttl: Duration,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            token_hash: token_hash.into(),
            expires_at: now + ttl,
            is_revoked: false,
            replaced_by: None,
            ip_address: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Check if token is valid at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && !self.is_expired_at(now)
    }

    /// Revocation is one-way; nothing clears the flag again.
    pub fn revoke(&mut self, now: DateTime<Utc>) {
        if !self.is_revoked {
            self.is_revoked = true;
            self.updated_at = now;
        }
    }

    /// Revoke as part of a rotation to `successor`
    pub fn supersede(&mut self, successor: Uuid, now: DateTime<Utc>) {
        if !self.is_revoked {
            self.revoke(now);
            self.replaced_by = Some(successor);
        }
    }

    /// A revoked token that was rotated away, as opposed to logged out
    pub fn was_rotated(&self) -> bool {
        self.is_revoked && self.replaced_by.is_some()
    }
}

/// Security event kinds recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Register,
    Login,
    LoginFailed,
    Logout,
    TokenRefresh,
    AccountLocked,
    PasswordChange,
    PasswordReset,
    EmailVerification,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Register => "register",
            AuditAction::Login => "login",
            AuditAction::LoginFailed => "login_failed",
            AuditAction::Logout => "logout",
            AuditAction::TokenRefresh => "token_refresh",
            AuditAction::AccountLocked => "account_locked",
            AuditAction::PasswordChange => "password_change",
            AuditAction::PasswordReset => "password_reset",
            AuditAction::EmailVerification => "email_verification",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only audit entry
#[derive(Debug, Clone, Serialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub action: AuditAction,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditLog {
    pub fn new(user_id: Uuid, action: AuditAction, client: &ClientInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            action,
            ip_address: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Entry for an event with no resolvable user.
    pub fn anonymous(action: AuditAction, client: &ClientInfo) -> Self {
        Self::new(UNKNOWN_USER_ID, action, client)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Client information (IP, user agent) attached to sessions and audit entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn new(ip: Option<String>, user_agent: Option<String>) -> Self {
        Self { ip, user_agent }
    }
}

// ============================================
// Request DTOs
// ============================================

/// Registration request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Login request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Refresh token request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

/// Logout request; the refresh token is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Change password request (for authenticated users)
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(length(min = 1, message = "New password is required"))]
    pub new_password: String,

    #[validate(must_match(other = "new_password", message = "Passwords do not match"))]
    pub new_password_confirm: String,
}

// ============================================
// Response DTOs
// ============================================

/// Public projection of a user; never carries the password hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
            is_verified: user.is_verified,
            created_at: user.created_at,
        }
    }
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            role: user.role,
            is_verified: user.is_verified,
            created_at: user.created_at,
        }
    }
}

/// Login response with tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    /// Delivered to browsers in the refresh cookie, never in a JSON body
    #[serde(skip_serializing, default)]
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserProfile,
}

/// Token refresh response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Delivered to browsers in the refresh cookie, never in a JSON body
    #[serde(skip_serializing, default)]
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Simple message response
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ============================================
// JWT Claims
// ============================================

/// JWT claims for access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Issued at timestamp
    pub iat: i64,
    /// Expiration timestamp
    pub exp: i64,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// JWT ID (unique identifier)
    pub jti: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LockoutPolicy {
        LockoutPolicy {
            max_attempts: 3,
            duration: Duration::minutes(15),
        }
    }

    #[test]
    fn test_new_user_defaults() {
        let user = User::new("a@x.com", "hash");
        assert_eq!(user.role, UserRole::User);
        assert!(!user.is_verified);
        assert_eq!(user.failed_login_attempts, 0);
        assert!(!user.is_locked_at(Utc::now()));
    }

    #[test]
    fn test_failed_attempts_lock_at_threshold() {
        let now = Utc::now();
        let mut user = User::new("a@x.com", "hash");

        user.register_failed_attempt(&policy(), now);
        user.register_failed_attempt(&policy(), now);
        assert!(!user.is_locked_at(now));

        user.register_failed_attempt(&policy(), now);
        assert!(user.is_locked);
        assert_eq!(user.locked_until, Some(now + Duration::minutes(15)));
        assert!(user.is_locked_at(now));
        assert!(!user.lock_expired_at(now));
    }

    #[test]
    fn test_lock_expires() {
        let now = Utc::now();
        let mut user = User::new("a@x.com", "hash");
        user.is_locked = true;
        user.locked_until = Some(now - Duration::seconds(1));

        assert!(!user.is_locked_at(now));
        assert!(user.lock_expired_at(now));
    }

    #[test]
    fn test_lock_without_deadline_is_indefinite() {
        let mut user = User::new("a@x.com", "hash");
        user.is_locked = true;

        assert!(user.is_locked_at(Utc::now() + Duration::days(3650)));
        assert!(!user.lock_expired_at(Utc::now()));
    }

    #[test]
    fn test_record_login_resets_lockout() {
        let now = Utc::now();
        let mut user = User::new("a@x.com", "hash");
        for _ in 0..3 {
            user.register_failed_attempt(&policy(), now);
        }

        user.record_login(Some("10.0.0.1"), now);
        assert_eq!(user.failed_login_attempts, 0);
        assert!(!user.is_locked);
        assert!(user.locked_until.is_none());
        assert_eq!(user.last_login_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(user.last_login_at, Some(now));
    }

    #[test]
    fn test_password_hash_never_serialized() {
        let user = User::new("a@x.com", "super-secret-hash");
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("super-secret-hash"));
        assert!(!format!("{:?}", user).contains("super-secret-hash"));
    }

    #[test]
    fn test_refresh_token_validity() {
        let now = Utc::now();
        let mut token = RefreshToken::new(
            Uuid::new_v4(),
            "hash",
            Duration::hours(1),
            &ClientInfo::default(),
            now,
        );

        assert!(token.is_valid_at(now));
        assert!(!token.is_valid_at(now + Duration::hours(1)));

        token.revoke(now);
        assert!(!token.is_valid_at(now));
        assert!(!token.was_rotated());
    }

    #[test]
    fn test_supersede_records_successor_once() {
        let now = Utc::now();
        let successor = Uuid::new_v4();
        let mut token = RefreshToken::new(
            Uuid::new_v4(),
            "hash",
            Duration::hours(1),
            &ClientInfo::default(),
            now,
        );

        token.supersede(successor, now);
        assert!(token.was_rotated());
        assert_eq!(token.replaced_by, Some(successor));

        token.supersede(Uuid::new_v4(), now);
        assert_eq!(token.replaced_by, Some(successor));
    }

    #[test]
    fn test_token_responses_keep_refresh_token_out_of_json() {
        let response = TokenResponse {
            access_token: "access".into(),
            refresh_token: "plaintext-refresh".into(),
            token_type: "Bearer".into(),
            expires_in: 900,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("plaintext-refresh"));
        assert!(json.contains("access"));
    }

    #[test]
    fn test_audit_log_metadata() {
        let client = ClientInfo::new(Some("1.2.3.4".into()), Some("agent".into()));
        let entry = AuditLog::anonymous(AuditAction::LoginFailed, &client)
            .with_metadata("email", "nobody@x.com");

        assert_eq!(entry.user_id, UNKNOWN_USER_ID);
        assert_eq!(entry.metadata["email"], "nobody@x.com");
        assert_eq!(entry.ip_address.as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn test_audit_action_names() {
        assert_eq!(AuditAction::LoginFailed.as_str(), "login_failed");
        assert_eq!(
            serde_json::to_value(AuditAction::TokenRefresh).unwrap(),
            "token_refresh"
        );
        assert_eq!(AuditAction::EmailVerification.to_string(), "email_verification");
    }
}
