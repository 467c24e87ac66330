//! In-memory stores
//!
//! Each mutating operation runs under a single write lock, which gives the
//! same per-row atomicity the PostgreSQL stores get from single statements.

use super::{AuditStore, RefreshTokenStore, UserStore};
use crate::error::AuthError;
use crate::models::{AuditAction, AuditLog, LockoutPolicy, RefreshToken, User};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

fn same_email(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

impl MemoryUserStore {
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: &User) -> Result<(), AuthError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| same_email(&u.email, &user.email)) {
            return Err(AuthError::UserAlreadyExists);
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| same_email(&u.email, email))
            .cloned())
    }

    async fn update(&self, user: &User) -> Result<(), AuthError> {
        let mut users = self.users.write().await;
        match users.get_mut(&user.id) {
            Some(stored) => {
                *stored = user.clone();
                Ok(())
            }
            None => Err(AuthError::UserNotFound),
        }
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, AuthError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .any(|u| same_email(&u.email, email)))
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, AuthError> {
        let mut users = self.users.write().await;
        Ok(users.get_mut(&id).map(|user| {
            user.register_failed_attempt(policy, now);
            user.clone()
        }))
    }

    async fn record_successful_login(
        &self,
        id: Uuid,
        ip_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, AuthError> {
        let mut users = self.users.write().await;
        Ok(users.get_mut(&id).map(|user| {
            user.record_login(ip_address, now);
            user.clone()
        }))
    }

    async fn clear_expired_lockout(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AuthError> {
        let mut users = self.users.write().await;
        match users.get_mut(&id) {
            Some(user) if user.lock_expired_at(now) => {
                user.clear_lockout();
                user.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AuthError> {
        let mut users = self.users.write().await;
        match users.get_mut(&id) {
            Some(user) => {
                user.set_password_hash(password_hash, now);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Refresh tokens keyed by hash
#[derive(Debug, Default)]
pub struct MemoryRefreshTokenStore {
    tokens: RwLock<HashMap<String, RefreshToken>>,
}

impl MemoryRefreshTokenStore {
    /// Snapshot of every stored token owned by `user_id`
    pub async fn tokens_for(&self, user_id: Uuid) -> Vec<RefreshToken> {
        self.tokens
            .read()
            .await
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn active_count(&self, user_id: Uuid) -> usize {
        let now = Utc::now();
        self.tokens
            .read()
            .await
            .values()
            .filter(|t| t.user_id == user_id && t.is_valid_at(now))
            .count()
    }
}

fn insert_unique(
    tokens: &mut HashMap<String, RefreshToken>,
    token: &RefreshToken,
) -> Result<(), AuthError> {
    if tokens.contains_key(&token.token_hash) {
        return Err(AuthError::StoreFailure(
            "duplicate refresh token hash".to_string(),
        ));
    }
    tokens.insert(token.token_hash.clone(), token.clone());
    Ok(())
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn create(&self, token: &RefreshToken) -> Result<(), AuthError> {
        let mut tokens = self.tokens.write().await;
        insert_unique(&mut tokens, token)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, AuthError> {
        Ok(self.tokens.read().await.get(token_hash).cloned())
    }

    async fn revoke_by_hash(&self, token_hash: &str) -> Result<bool, AuthError> {
        let mut tokens = self.tokens.write().await;
        match tokens.get_mut(token_hash) {
            Some(token) if !token.is_revoked => {
                token.revoke(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_by_user(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let now = Utc::now();
        let mut tokens = self.tokens.write().await;
        let mut revoked = 0;
        for token in tokens.values_mut() {
            if token.user_id == user_id && !token.is_revoked {
                token.revoke(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn rotate(
        &self,
        presented_hash: &str,
        replacement: &RefreshToken,
    ) -> Result<bool, AuthError> {
        let mut tokens = self.tokens.write().await;

        if tokens.contains_key(&replacement.token_hash) {
            return Err(AuthError::StoreFailure(
                "duplicate refresh token hash".to_string(),
            ));
        }

        let now = Utc::now();
        match tokens.get_mut(presented_hash) {
            Some(token) if token.is_valid_at(now) => token.supersede(replacement.id, now),
            _ => return Ok(false),
        }

        insert_unique(&mut tokens, replacement)?;
        Ok(true)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, token| !token.is_expired_at(now));
        Ok((before - tokens.len()) as u64)
    }
}

#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    entries: RwLock<Vec<AuditLog>>,
}

impl MemoryAuditStore {
    /// Snapshot of all entries in insertion order
    pub async fn entries(&self) -> Vec<AuditLog> {
        self.entries.read().await.clone()
    }

    pub async fn entries_with(&self, action: AuditAction) -> Vec<AuditLog> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn create(&self, entry: &AuditLog) -> Result<(), AuthError> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClientInfo;
    use chrono::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn token_for(user_id: Uuid, hash: &str, ttl: Duration) -> RefreshToken {
        RefreshToken::new(user_id, hash, ttl, &ClientInfo::default(), Utc::now())
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected_case_insensitively() {
        let store = MemoryUserStore::default();
        assert_ok!(store.create(&User::new("a@x.com", "h")).await);

        let err = store.create(&User::new("A@X.com", "h")).await.unwrap_err();
        assert_eq!(err, AuthError::UserAlreadyExists);
        assert!(store.exists_by_email("A@x.COM").await.unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_unknown_user() {
        let store = MemoryUserStore::default();
        assert_eq!(
            store.update(&User::new("a@x.com", "h")).await,
            Err(AuthError::UserNotFound)
        );
    }

    #[tokio::test]
    async fn test_failed_logins_are_counted_atomically() {
        let store = std::sync::Arc::new(MemoryUserStore::default());
        let user = User::new("a@x.com", "h");
        let user_id = user.id;
        store.create(&user).await.unwrap();

        let policy = LockoutPolicy {
            max_attempts: 100,
            duration: Duration::minutes(1),
        };

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .record_failed_login(user_id, &policy, Utc::now())
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = store.find_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(stored.failed_login_attempts, 20);
    }

    #[tokio::test]
    async fn test_clear_expired_lockout_only_when_expired() {
        let store = MemoryUserStore::default();
        let now = Utc::now();
        let mut user = User::new("a@x.com", "h");
        user.is_locked = true;
        user.failed_login_attempts = 5;
        user.locked_until = Some(now + Duration::minutes(5));
        store.create(&user).await.unwrap();

        assert!(!store.clear_expired_lockout(user.id, now).await.unwrap());
        assert!(store
            .clear_expired_lockout(user.id, now + Duration::minutes(6))
            .await
            .unwrap());

        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(!stored.is_locked);
        assert_eq!(stored.failed_login_attempts, 0);
    }

    #[tokio::test]
    async fn test_rotate_is_single_use() {
        let store = MemoryRefreshTokenStore::default();
        let user_id = Uuid::new_v4();
        store.create(&token_for(user_id, "old", Duration::hours(1))).await.unwrap();

        assert!(store.rotate("old", &token_for(user_id, "new-1", Duration::hours(1))).await.unwrap());
        assert!(!store.rotate("old", &token_for(user_id, "new-2", Duration::hours(1))).await.unwrap());

        let old = store.find_by_hash("old").await.unwrap().unwrap();
        let successor = store.find_by_hash("new-1").await.unwrap().unwrap();
        assert_eq!(old.replaced_by, Some(successor.id));

        // The losing rotation persisted nothing
        assert!(store.find_by_hash("new-2").await.unwrap().is_none());
        assert_eq!(store.active_count(user_id).await, 1);
    }

    #[tokio::test]
    async fn test_rotate_refuses_expired_token() {
        let store = MemoryRefreshTokenStore::default();
        let user_id = Uuid::new_v4();
        store.create(&token_for(user_id, "stale", Duration::seconds(-1))).await.unwrap();

        assert!(!store.rotate("stale", &token_for(user_id, "fresh", Duration::hours(1))).await.unwrap());

        let stale = store.find_by_hash("stale").await.unwrap().unwrap();
        assert!(!stale.is_revoked);
        assert!(store.find_by_hash("fresh").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_token_hash_rejected() {
        let store = MemoryRefreshTokenStore::default();
        let user_id = Uuid::new_v4();
        store.create(&token_for(user_id, "h", Duration::hours(1))).await.unwrap();
        assert_err!(store.create(&token_for(user_id, "h", Duration::hours(1))).await);
    }

    #[tokio::test]
    async fn test_revoke_all_by_user_leaves_other_users() {
        let store = MemoryRefreshTokenStore::default();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        for hash in ["a1", "a2", "a3"] {
            store.create(&token_for(alice, hash, Duration::hours(1))).await.unwrap();
        }
        store.create(&token_for(bob, "b1", Duration::hours(1))).await.unwrap();
        store.revoke_by_hash("a1").await.unwrap();

        assert_eq!(store.revoke_all_by_user(alice).await.unwrap(), 2);
        assert_eq!(store.active_count(alice).await, 0);
        assert_eq!(store.active_count(bob).await, 1);
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let store = MemoryRefreshTokenStore::default();
        let user_id = Uuid::new_v4();
        store.create(&token_for(user_id, "live", Duration::hours(1))).await.unwrap();
        store.create(&token_for(user_id, "dead", Duration::seconds(-5))).await.unwrap();

        assert_eq!(store.delete_expired(Utc::now()).await.unwrap(), 1);
        assert!(store.find_by_hash("dead").await.unwrap().is_none());
        assert!(store.find_by_hash("live").await.unwrap().is_some());
    }
}
