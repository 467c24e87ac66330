//! Credential Stores
//!
//! Persistence contracts consumed by [`AuthService`](crate::service::AuthService).
//! `postgres` holds the production implementations, `memory` the in-process
//! ones used by tests and local tooling.

pub mod memory;
pub mod postgres;

use crate::error::AuthError;
use crate::models::{AuditLog, LockoutPolicy, RefreshToken, User};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// User persistence
///
/// The `record_*`, `clear_expired_lockout` and `update_password` operations
/// must each be a single atomic update of the user row.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `UserAlreadyExists` when the email is taken.
    async fn create(&self, user: &User) -> Result<(), AuthError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError>;

    /// Case-insensitive lookup.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    /// Overwrite every mutable column. Fails with `UserNotFound` for unknown ids.
    async fn update(&self, user: &User) -> Result<(), AuthError>;

    async fn exists_by_email(&self, email: &str) -> Result<bool, AuthError>;

    /// Increment the failed-login counter, locking the account when the
    /// threshold is reached. Returns the updated row.
    async fn record_failed_login(
        &self,
        id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, AuthError>;

    /// Reset lockout state and record login time and address.
    async fn record_successful_login(
        &self,
        id: Uuid,
        ip_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, AuthError>;

    /// Clear a lock whose deadline has passed. Returns whether anything changed.
    async fn clear_expired_lockout(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AuthError>;

    /// Returns `false` when the user does not exist.
    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AuthError>;
}

/// Refresh token persistence
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn create(&self, token: &RefreshToken) -> Result<(), AuthError>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, AuthError>;

    /// Returns `true` if this call revoked a previously active token.
    async fn revoke_by_hash(&self, token_hash: &str) -> Result<bool, AuthError>;

    /// Revoke every active token of the user. Returns how many were revoked.
    async fn revoke_all_by_user(&self, user_id: Uuid) -> Result<u64, AuthError>;

    /// Revoke `presented_hash` and persist `replacement` as one transaction.
    ///
    /// Returns `false`, persisting nothing, when the presented token was
    /// already revoked or has expired.
    async fn rotate(
        &self,
        presented_hash: &str,
        replacement: &RefreshToken,
    ) -> Result<bool, AuthError>;

    /// Delete tokens that expired before `now`. Returns how many were removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError>;
}

/// Audit trail sink; append only
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn create(&self, entry: &AuditLog) -> Result<(), AuthError>;
}

/// The three stores an [`AuthService`](crate::service::AuthService) runs against
#[derive(Clone)]
pub struct CredentialStores {
    pub users: Arc<dyn UserStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub audit: Arc<dyn AuditStore>,
}

impl CredentialStores {
    /// PostgreSQL-backed stores sharing one pool
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(postgres::PgUserStore::new(pool.clone())),
            refresh_tokens: Arc::new(postgres::PgRefreshTokenStore::new(pool.clone())),
            audit: Arc::new(postgres::PgAuditStore::new(pool)),
        }
    }

    /// Fresh, empty in-memory stores
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(memory::MemoryUserStore::default()),
            refresh_tokens: Arc::new(memory::MemoryRefreshTokenStore::default()),
            audit: Arc::new(memory::MemoryAuditStore::default()),
        }
    }
}
