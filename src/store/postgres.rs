//! PostgreSQL stores
//!
//! Counter and lockout updates are single `UPDATE ... RETURNING` statements so
//! concurrent logins cannot lose increments.

use super::{AuditStore, RefreshTokenStore, UserStore};
use crate::error::AuthError;
use crate::models::{AuditLog, LockoutPolicy, RefreshToken, User};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

const MIGRATIONS: &[&str] = &[
    r#"
    DO $$ BEGIN
        CREATE TYPE user_role AS ENUM ('user', 'admin');
    EXCEPTION
        WHEN duplicate_object THEN NULL;
    END $$
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        email VARCHAR(255) NOT NULL,
        password_hash VARCHAR(255) NOT NULL,
        role user_role NOT NULL DEFAULT 'user',
        is_verified BOOLEAN NOT NULL DEFAULT FALSE,
        failed_login_attempts INTEGER NOT NULL DEFAULT 0,
        is_locked BOOLEAN NOT NULL DEFAULT FALSE,
        locked_until TIMESTAMPTZ,
        last_login_at TIMESTAMPTZ,
        last_login_ip VARCHAR(45),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email_lower ON users (LOWER(email))",
    r#"
    CREATE TABLE IF NOT EXISTS refresh_tokens (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        token_hash VARCHAR(64) NOT NULL UNIQUE,
        expires_at TIMESTAMPTZ NOT NULL,
        is_revoked BOOLEAN NOT NULL DEFAULT FALSE,
        replaced_by UUID,
        ip_address VARCHAR(45),
        user_agent TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "ALTER TABLE refresh_tokens ADD COLUMN IF NOT EXISTS replaced_by UUID",
    "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user_id ON refresh_tokens (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_expires_at ON refresh_tokens (expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS audit_logs (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        action VARCHAR(50) NOT NULL,
        ip_address VARCHAR(45),
        user_agent TEXT,
        metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_audit_logs_user_id ON audit_logs (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_audit_logs_action ON audit_logs (action)",
];

/// Create the schema if it does not exist yet. Safe to run on every start.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AuthError> {
    for statement in MIGRATIONS {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!(statements = MIGRATIONS.len(), "Database schema is up to date");
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

// ============================================
// Users
// ============================================

pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: &User) -> Result<(), AuthError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (
                id, email, password_hash, role, is_verified, failed_login_attempts,
                is_locked, locked_until, last_login_at, last_login_ip, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.is_verified)
        .bind(user.failed_login_attempts)
        .bind(user.is_locked)
        .bind(user.locked_until)
        .bind(user.last_login_at)
        .bind(&user.last_login_ip)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(AuthError::UserAlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn update(&self, user: &User) -> Result<(), AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                email = $2, password_hash = $3, role = $4, is_verified = $5,
                failed_login_attempts = $6, is_locked = $7, locked_until = $8,
                last_login_at = $9, last_login_ip = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.is_verified)
        .bind(user.failed_login_attempts)
        .bind(user.is_locked)
        .bind(user.locked_until)
        .bind(user.last_login_at)
        .bind(&user.last_login_ip)
        .bind(user.updated_at)
        .execute(&self.db)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(AuthError::UserNotFound),
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(AuthError::UserAlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, AuthError> {
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(email) = LOWER($1))")
                .bind(email)
                .fetch_one(&self.db)
                .await?;
        Ok(exists.0)
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET
                failed_login_attempts = failed_login_attempts + 1,
                is_locked = CASE WHEN failed_login_attempts + 1 >= $2 THEN TRUE ELSE is_locked END,
                locked_until = CASE WHEN failed_login_attempts + 1 >= $2 THEN $3 ELSE locked_until END,
                updated_at = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(policy.max_attempts)
        .bind(now + policy.duration)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn record_successful_login(
        &self,
        id: Uuid,
        ip_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET
                failed_login_attempts = 0,
                is_locked = FALSE,
                locked_until = NULL,
                last_login_at = $2,
                last_login_ip = $3,
                updated_at = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(ip_address)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn clear_expired_lockout(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                failed_login_attempts = 0,
                is_locked = FALSE,
                locked_until = NULL,
                updated_at = $2
            WHERE id = $1 AND is_locked AND locked_until IS NOT NULL AND locked_until <= $2
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AuthError> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = $3 WHERE id = $1")
                .bind(id)
                .bind(password_hash)
                .bind(now)
                .execute(&self.db)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================
// Refresh Tokens
// ============================================

pub struct PgRefreshTokenStore {
    db: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

const INSERT_REFRESH_TOKEN: &str = r#"
    INSERT INTO refresh_tokens (
        id, user_id, token_hash, expires_at, is_revoked, replaced_by, ip_address, user_agent, created_at, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
"#;

fn insert_refresh_token(
    token: &RefreshToken,
) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(INSERT_REFRESH_TOKEN)
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.is_revoked)
        .bind(token.replaced_by)
        .bind(&token.ip_address)
        .bind(&token.user_agent)
        .bind(token.created_at)
        .bind(token.updated_at)
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn create(&self, token: &RefreshToken) -> Result<(), AuthError> {
        insert_refresh_token(token).execute(&self.db).await?;
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, AuthError> {
        let token =
            sqlx::query_as::<_, RefreshToken>("SELECT * FROM refresh_tokens WHERE token_hash = $1")
                .bind(token_hash)
                .fetch_optional(&self.db)
                .await?;
        Ok(token)
    }

    async fn revoke_by_hash(&self, token_hash: &str) -> Result<bool, AuthError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET is_revoked = TRUE, updated_at = NOW() WHERE token_hash = $1 AND NOT is_revoked",
        )
        .bind(token_hash)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_by_user(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET is_revoked = TRUE, updated_at = NOW() WHERE user_id = $1 AND NOT is_revoked",
        )
        .bind(user_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    async fn rotate(
        &self,
        presented_hash: &str,
        replacement: &RefreshToken,
    ) -> Result<bool, AuthError> {
        let mut tx = self.db.begin().await?;

        let revoked = sqlx::query(
            "UPDATE refresh_tokens SET is_revoked = TRUE, replaced_by = $2, updated_at = NOW() WHERE token_hash = $1 AND NOT is_revoked AND expires_at > NOW()",
        )
        .bind(presented_hash)
        .bind(replacement.id)
        .execute(&mut *tx)
        .await?;

        if revoked.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_refresh_token(replacement).execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

// ============================================
// Audit Log
// ============================================

pub struct PgAuditStore {
    db: PgPool,
}

impl PgAuditStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn create(&self, entry: &AuditLog) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, user_id, action, ip_address, user_agent, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.action.as_str())
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(Json(&entry.metadata))
        .bind(entry.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
