//! Authentication Service
//!
//! Credential lifecycle orchestration: registration, login with lockout,
//! refresh-token rotation, logout, password change and profile lookup.
//! All durable state lives behind the store traits; the service itself is
//! stateless and shared as `Arc<AuthService>`.

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::models::*;
use crate::password::{Argon2Hasher, PasswordHasher, PasswordPolicy, StrengthPolicy};
use crate::store::CredentialStores;
use crate::token::{JwtTokenIssuer, TokenIssuer};

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use validator::ValidateEmail;

const TOKEN_TYPE: &str = "Bearer";

/// Verified against on logins for unknown emails so both paths cost one hash check
const DUMMY_PASSWORD: &str = "credential-service-dummy-password";

/// Authentication service
pub struct AuthService {
    stores: CredentialStores,
    tokens: Arc<dyn TokenIssuer>,
    hasher: Arc<dyn PasswordHasher>,
    policy: Arc<dyn PasswordPolicy>,
    config: AuthConfig,
    dummy_hash: Option<String>,
}

impl AuthService {
    /// Assemble a service from explicit collaborators
    pub fn new(
        stores: CredentialStores,
        tokens: Arc<dyn TokenIssuer>,
        hasher: Arc<dyn PasswordHasher>,
        policy: Arc<dyn PasswordPolicy>,
        config: AuthConfig,
    ) -> Self {
        let dummy_hash = match hasher.hash(DUMMY_PASSWORD) {
            Ok(hash) => Some(hash),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to prepare dummy password hash");
                None
            }
        };

        Self {
            stores,
            tokens,
            hasher,
            policy,
            config,
            dummy_hash,
        }
    }

    /// Validate `config` and build the JWT issuer, Argon2id hasher and
    /// strength policy it describes.
    pub fn from_config(stores: CredentialStores, config: AuthConfig) -> Result<Self, AuthError> {
        config.validate()?;

        let tokens = Arc::new(JwtTokenIssuer::from_config(&config));
        let hasher = Arc::new(Argon2Hasher::from_config(&config)?);
        let policy = Arc::new(StrengthPolicy::from_config(&config));

        Ok(Self::new(stores, tokens, hasher, policy, config))
    }

    /// Get reference to config
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn stores(&self) -> &CredentialStores {
        &self.stores
    }

    // ============================================
    // Registration
    // ============================================

    /// Register a new user. No tokens are issued.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<UserProfile, AuthError> {
        let email = normalize_email(email);
        if !email.validate_email() {
            return Err(AuthError::InvalidInput("Invalid email format".into()));
        }

        if self.stores.users.exists_by_email(&email).await? {
            return Err(AuthError::UserAlreadyExists);
        }

        self.policy.validate_strength(password)?;

        let password_hash = self.hash_password(password).await?;
        let user = User::new(email, password_hash);

        // A concurrent registration surfaces here as UserAlreadyExists
        self.stores.users.create(&user).await?;

        self.record(AuditLog::new(user.id, AuditAction::Register, client))
            .await;

        tracing::info!(user_id = %user.id, email = %user.email, "User registered");

        Ok(user.profile())
    }

    // ============================================
    // Login
    // ============================================

    /// Authenticate with email and password
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<LoginResponse, AuthError> {
        let email = normalize_email(email);

        let mut user = match self.stores.users.find_by_email(&email).await? {
            Some(user) => user,
            None => {
                if let Some(dummy) = &self.dummy_hash {
                    let _ = self.verify_password(password, dummy).await;
                }
                self.record(
                    AuditLog::anonymous(AuditAction::LoginFailed, client)
                        .with_metadata("email", email),
                )
                .await;
                return Err(AuthError::InvalidCredentials);
            }
        };

        let now = Utc::now();

        if user.is_locked_at(now) {
            tracing::warn!(user_id = %user.id, "Login attempt on locked account");
            self.record(AuditLog::new(user.id, AuditAction::AccountLocked, client))
                .await;
            return Err(AuthError::AccountLocked);
        }

        if user.lock_expired_at(now) && self.stores.users.clear_expired_lockout(user.id, now).await? {
            tracing::info!(user_id = %user.id, "Expired account lock cleared");
            user.clear_lockout();
        }

        if !self.verify_password(password, &user.password_hash).await? {
            return Err(self.handle_failed_login(&user, client).await?);
        }

        let user = self
            .stores
            .users
            .record_successful_login(user.id, client.ip.as_deref(), now)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let access_token = self.tokens.issue_access_token(user.id)?;
        let issued = self.tokens.issue_refresh_token()?;

        let refresh_token = RefreshToken::new(
            user.id,
            &issued.hash,
            self.config.refresh_ttl(),
            client,
            now,
        );
        self.stores.refresh_tokens.create(&refresh_token).await?;

        self.record(AuditLog::new(user.id, AuditAction::Login, client))
            .await;

        tracing::info!(user_id = %user.id, "User logged in");

        Ok(LoginResponse {
            access_token,
            refresh_token: issued.plaintext,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.config.access_token_ttl,
            user: user.profile(),
        })
    }

    /// Count a wrong password and pick the error the caller sees: the attempt
    /// that reaches the threshold reports `AccountLocked`.
    async fn handle_failed_login(
        &self,
        user: &User,
        client: &ClientInfo,
    ) -> Result<AuthError, AuthError> {
        let now = Utc::now();
        let policy = self.config.lockout_policy();

        let updated = match self
            .stores
            .users
            .record_failed_login(user.id, &policy, now)
            .await?
        {
            Some(updated) => updated,
            None => return Ok(AuthError::InvalidCredentials),
        };

        self.record(
            AuditLog::new(updated.id, AuditAction::LoginFailed, client)
                .with_metadata("failed_attempts", updated.failed_login_attempts),
        )
        .await;

        if updated.is_locked_at(now) {
            tracing::warn!(
                user_id = %updated.id,
                failed_attempts = updated.failed_login_attempts,
                "Account locked due to failed attempts"
            );
            self.record(
                AuditLog::new(updated.id, AuditAction::AccountLocked, client)
                    .with_metadata("failed_attempts", updated.failed_login_attempts),
            )
            .await;
            return Ok(AuthError::AccountLocked);
        }

        Ok(AuthError::InvalidCredentials)
    }

    // ============================================
    // Token Refresh
    // ============================================

    /// Redeem a refresh token for a new access/refresh pair. Single use.
    pub async fn refresh(
        &self,
        presented: &str,
        client: &ClientInfo,
    ) -> Result<TokenResponse, AuthError> {
        let presented = presented.trim();
        if presented.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let token_hash = self.tokens.hash_token(presented);

        let stored = self
            .stores
            .refresh_tokens
            .find_by_hash(&token_hash)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let now = Utc::now();

        if !stored.is_valid_at(now) {
            // Tokens revoked by logout or password change are stale, not stolen
            if stored.was_rotated() && self.config.revoke_on_reuse {
                self.revoke_after_reuse(stored.user_id).await;
            }
            return Err(AuthError::TokenExpired);
        }

        let access_token = self.tokens.issue_access_token(stored.user_id)?;
        let issued = self.tokens.issue_refresh_token()?;
        let replacement = RefreshToken::new(
            stored.user_id,
            &issued.hash,
            self.config.refresh_ttl(),
            client,
            now,
        );

        if !self
            .stores
            .refresh_tokens
            .rotate(&token_hash, &replacement)
            .await?
        {
            tracing::warn!(user_id = %stored.user_id, "Refresh token already redeemed concurrently");
            return Err(AuthError::TokenExpired);
        }

        self.record(AuditLog::new(stored.user_id, AuditAction::TokenRefresh, client))
            .await;

        Ok(TokenResponse {
            access_token,
            refresh_token: issued.plaintext,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.config.access_token_ttl,
        })
    }

    /// A revoked token was presented again; treat the family as compromised.
    async fn revoke_after_reuse(&self, user_id: Uuid) {
        tracing::warn!(user_id = %user_id, "Revoked refresh token reused, revoking all sessions");

        if let Err(e) = self.stores.refresh_tokens.revoke_all_by_user(user_id).await {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to revoke sessions after token reuse");
        }
    }

    // ============================================
    // Logout
    // ============================================

    /// Revoke the presented refresh token if any. Never fails.
    pub async fn logout(
        &self,
        user_id: Option<&str>,
        refresh_token: Option<&str>,
        client: &ClientInfo,
    ) {
        if let Some(presented) = refresh_token.map(str::trim).filter(|t| !t.is_empty()) {
            let token_hash = self.tokens.hash_token(presented);
            if let Err(e) = self.stores.refresh_tokens.revoke_by_hash(&token_hash).await {
                tracing::warn!(error = %e, "Failed to revoke refresh token on logout");
            }
        }

        if let Some(user_id) = user_id.and_then(|id| Uuid::parse_str(id).ok()) {
            self.record(AuditLog::new(user_id, AuditAction::Logout, client))
                .await;
            tracing::info!(user_id = %user_id, "User logged out");
        }
    }

    /// Revoke every session of the user. Returns how many were revoked.
    pub async fn logout_all(&self, user_id: &str, client: &ClientInfo) -> Result<u64, AuthError> {
        let user_id = parse_user_id(user_id)?;

        let revoked = self
            .stores
            .refresh_tokens
            .revoke_all_by_user(user_id)
            .await?;

        self.record(
            AuditLog::new(user_id, AuditAction::Logout, client).with_metadata("all_sessions", true),
        )
        .await;

        tracing::info!(user_id = %user_id, revoked, "All refresh tokens revoked");

        Ok(revoked)
    }

    // ============================================
    // Password Change
    // ============================================

    /// Change password; every existing session is revoked afterwards.
    pub async fn change_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
        client: &ClientInfo,
    ) -> Result<(), AuthError> {
        let user_id = parse_user_id(user_id)?;

        let user = self
            .stores
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !self.verify_password(current_password, &user.password_hash).await? {
            return Err(AuthError::InvalidPassword);
        }

        self.policy.validate_strength(new_password)?;

        let password_hash = self.hash_password(new_password).await?;

        if !self
            .stores
            .users
            .update_password(user_id, &password_hash, Utc::now())
            .await?
        {
            return Err(AuthError::UserNotFound);
        }

        if let Err(e) = self.stores.refresh_tokens.revoke_all_by_user(user_id).await {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to revoke sessions after password change");
        }

        self.record(AuditLog::new(user_id, AuditAction::PasswordChange, client))
            .await;

        tracing::info!(user_id = %user_id, "Password changed");

        Ok(())
    }

    // ============================================
    // Profile
    // ============================================

    pub async fn get_profile(&self, user_id: &str) -> Result<UserProfile, AuthError> {
        let user_id = parse_user_id(user_id)?;

        self.stores
            .users
            .find_by_id(user_id)
            .await?
            .map(UserProfile::from)
            .ok_or(AuthError::UserNotFound)
    }

    // ============================================
    // Maintenance
    // ============================================

    /// Verify a bearer access token and return the user id it was issued for
    pub fn validate_access_token(&self, token: &str) -> Result<String, AuthError> {
        self.tokens.validate_access_token(token)
    }

    /// Delete refresh tokens past their expiry
    pub async fn purge_expired_tokens(&self) -> Result<u64, AuthError> {
        let deleted = self
            .stores
            .refresh_tokens
            .delete_expired(Utc::now())
            .await?;

        if deleted > 0 {
            tracing::info!(deleted, "Expired refresh tokens purged");
        }

        Ok(deleted)
    }

    /// Hashing and verification run on the blocking thread pool
    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_owned();

        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("password hashing task failed: {e}")))?
    }

    async fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_owned();
        let hash = hash.to_owned();

        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("password verification task failed: {e}")))?
    }

    /// Audit writes never fail the operation that produced them
    async fn record(&self, entry: AuditLog) {
        if let Err(e) = self.stores.audit.create(&entry).await {
            tracing::warn!(
                user_id = %entry.user_id,
                action = %entry.action,
                error = %e,
                "Failed to write audit log"
            );
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn parse_user_id(user_id: &str) -> Result<Uuid, AuthError> {
    Uuid::parse_str(user_id.trim())
        .map_err(|_| AuthError::InvalidInput("Invalid user id".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn test_parse_user_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_user_id(&id.to_string()).unwrap(), id);
        assert!(matches!(
            parse_user_id("not-a-uuid"),
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(parse_user_id(""), Err(AuthError::InvalidInput(_))));
    }
}
