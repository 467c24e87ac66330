#![allow(dead_code)]

use credential_service::store::memory::{
    MemoryAuditStore, MemoryRefreshTokenStore, MemoryUserStore,
};
use credential_service::{
    Argon2Hasher, AuthConfig, AuthService, ClientInfo, CredentialStores, JwtTokenIssuer,
    StrengthPolicy,
};
use std::sync::Arc;

pub const PASSWORD: &str = "Str0ng!Pass";
pub const SECRET: &str = "test-secret-test-secret-test-secret";

/// Service wired to in-memory stores, with handles kept for inspection
pub struct Harness {
    pub auth: Arc<AuthService>,
    pub users: Arc<MemoryUserStore>,
    pub tokens: Arc<MemoryRefreshTokenStore>,
    pub audit: Arc<MemoryAuditStore>,
}

pub fn config() -> AuthConfig {
    AuthConfig {
        jwt_secret: SECRET.to_string(),
        ..AuthConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with(config())
}

pub fn harness_with(config: AuthConfig) -> Harness {
    let users = Arc::new(MemoryUserStore::default());
    let tokens = Arc::new(MemoryRefreshTokenStore::default());
    let audit = Arc::new(MemoryAuditStore::default());

    let stores = CredentialStores {
        users: users.clone(),
        refresh_tokens: tokens.clone(),
        audit: audit.clone(),
    };

    let auth = AuthService::new(
        stores,
        Arc::new(JwtTokenIssuer::from_config(&config)),
        // Cheap parameters keep the suite fast
        Arc::new(Argon2Hasher::new(1024, 1, 1).unwrap()),
        Arc::new(StrengthPolicy::from_config(&config)),
        config,
    );

    Harness {
        auth: Arc::new(auth),
        users,
        tokens,
        audit,
    }
}

pub fn client() -> ClientInfo {
    ClientInfo::new(Some("203.0.113.7".into()), Some("integration-test".into()))
}
