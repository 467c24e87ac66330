//! Password Policy and Hashing
//!
//! Strength validation for new passwords and Argon2id hashing of stored ones.

use crate::config::AuthConfig;
use crate::error::AuthError;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, SaltString},
    Argon2, Params, PasswordHasher as _, PasswordVerifier as _,
};

/// Passwords rejected when they appear anywhere inside a candidate
pub const DEFAULT_COMMON_PASSWORDS: &[&str] =
    &["password", "12345678", "qwerty", "abc123", "password123"];

/// Stateless password strength check
pub trait PasswordPolicy: Send + Sync {
    fn validate_strength(&self, password: &str) -> Result<(), AuthError>;
}

/// One-way password hashing capability
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, AuthError>;

    /// `Ok(false)` on mismatch; `Err` only when the stored hash is unusable.
    fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError>;
}

// ============================================
// Strength Policy
// ============================================

/// Character-class and deny-list password policy
#[derive(Debug, Clone)]
pub struct StrengthPolicy {
    pub min_length: usize,
    pub require_upper: bool,
    pub require_lower: bool,
    pub require_digit: bool,
    pub require_symbol: bool,
    deny_list: Vec<String>,
}

impl Default for StrengthPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_upper: true,
            require_lower: true,
            require_digit: true,
            require_symbol: true,
            deny_list: DEFAULT_COMMON_PASSWORDS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl StrengthPolicy {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::default()
            .with_min_length(config.min_password_length)
            .with_deny_list(config.common_passwords.iter().cloned())
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    /// Replace the deny list. Entries are matched case-insensitively as substrings.
    pub fn with_deny_list<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deny_list = entries
            .into_iter()
            .map(|s| s.into().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }
}

fn is_symbol(c: char) -> bool {
    !c.is_alphanumeric() && !c.is_whitespace() && !c.is_control()
}

impl PasswordPolicy for StrengthPolicy {
    fn validate_strength(&self, password: &str) -> Result<(), AuthError> {
        if password.chars().count() < self.min_length {
            return Err(AuthError::WeakPassword);
        }

        let has_upper = password.chars().any(char::is_uppercase);
        let has_lower = password.chars().any(char::is_lowercase);
        let has_digit = password.chars().any(|c| c.is_numeric());
        let has_symbol = password.chars().any(is_symbol);

        if (self.require_upper && !has_upper)
            || (self.require_lower && !has_lower)
            || (self.require_digit && !has_digit)
            || (self.require_symbol && !has_symbol)
        {
            return Err(AuthError::WeakPassword);
        }

        let lowered = password.to_lowercase();
        if self.deny_list.iter().any(|common| lowered.contains(common.as_str())) {
            return Err(AuthError::WeakPassword);
        }

        Ok(())
    }
}

// ============================================
// Argon2id Hasher
// ============================================

/// Argon2id hasher producing PHC-format strings
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    pub fn new(memory_cost: u32, time_cost: u32, parallelism: u32) -> Result<Self, AuthError> {
        let params = Params::new(memory_cost, time_cost, parallelism, None)
            .map_err(|e| AuthError::Config(format!("invalid Argon2 parameters: {e}")))?;
        Ok(Self { params })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        Self::new(
            config.argon2_memory_cost,
            config.argon2_time_cost,
            config.argon2_parallelism,
        )
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            self.params.clone(),
        )
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);

        let hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)?
            .to_string();

        Ok(hash)
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AuthError::Internal(format!("invalid hash format: {e}")))?;

        // Parameters embedded in the PHC string take precedence over ours
        match self.argon2().verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher() -> Argon2Hasher {
        Argon2Hasher::new(1024, 1, 1).unwrap()
    }

    #[test]
    fn test_strong_password_accepted() {
        assert!(StrengthPolicy::default().validate_strength("Str0ng!Pass").is_ok());
    }

    #[test]
    fn test_short_password_rejected() {
        let err = StrengthPolicy::default().validate_strength("S0!a").unwrap_err();
        assert_eq!(err, AuthError::WeakPassword);
    }

    #[test]
    fn test_each_character_class_required() {
        let policy = StrengthPolicy::default();
        assert!(policy.validate_strength("str0ng!pass").is_err()); // no upper
        assert!(policy.validate_strength("STR0NG!PASS").is_err()); // no lower
        assert!(policy.validate_strength("Strong!Pass").is_err()); // no digit
        assert!(policy.validate_strength("Str0ngPass1").is_err()); // no symbol
    }

    #[test]
    fn test_deny_list_is_case_insensitive_substring() {
        let policy = StrengthPolicy::default();
        assert!(policy.validate_strength("MyPassWord1!").is_err());
        assert!(policy.validate_strength("xQwErTy9!x").is_err());
    }

    #[test]
    fn test_custom_deny_list() {
        let policy = StrengthPolicy::default().with_deny_list(["Acme"]);
        assert!(policy.validate_strength("ACME-rocks9").is_err());
        // The default list no longer applies
        assert!(policy.validate_strength("Password1!").is_ok());
    }

    #[test]
    fn test_relaxed_policy() {
        let policy = StrengthPolicy {
            require_symbol: false,
            ..StrengthPolicy::default()
        };
        assert!(policy.validate_strength("Str0ngPass").is_ok());
    }

    #[test]
    fn test_unicode_symbol_counts() {
        assert!(StrengthPolicy::default().validate_strength("Str0ng€Pass").is_ok());
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = fast_hasher();
        let hash = hasher.hash("Str0ng!Pass").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("Str0ng!Pass", &hash).unwrap());
        assert!(!hasher.verify("wrong", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let hasher = fast_hasher();
        let a = hasher.hash("Str0ng!Pass").unwrap();
        let b = hasher.hash("Str0ng!Pass").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_returns_error() {
        let result = fast_hasher().verify("pw", "not-a-hash");
        assert!(matches!(result, Err(AuthError::Internal(_))));
    }

    #[test]
    fn test_invalid_params_rejected() {
        assert!(matches!(
            Argon2Hasher::new(0, 0, 0),
            Err(AuthError::Config(_))
        ));
    }
}
