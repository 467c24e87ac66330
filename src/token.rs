//! Token Issuance
//!
//! HS256 JWT access tokens and opaque refresh tokens. Refresh tokens are
//! only ever stored as their SHA-256 digest; the plaintext goes to the client.

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::models::AccessTokenClaims;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Number of random bytes behind every refresh token
pub const REFRESH_TOKEN_BYTES: usize = 32;

/// A freshly generated refresh token
#[derive(Clone)]
pub struct IssuedRefreshToken {
    /// Returned to the client, never persisted
    pub plaintext: String,
    /// Persisted, never returned
    pub hash: String,
}

impl fmt::Debug for IssuedRefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedRefreshToken")
            .field("plaintext", &"<redacted>")
            .field("hash", &self.hash)
            .finish()
    }
}

/// Token signing and hashing capability
pub trait TokenIssuer: Send + Sync {
    fn issue_access_token(&self, user_id: Uuid) -> Result<String, AuthError>;

    fn issue_refresh_token(&self) -> Result<IssuedRefreshToken, AuthError>;

    /// Deterministic digest used to look up a presented refresh token.
    fn hash_token(&self, plaintext: &str) -> String;

    /// Verify signature, algorithm, issuer, audience and expiry; returns the user id.
    fn validate_access_token(&self, token: &str) -> Result<String, AuthError>;
}

/// Hex-encoded SHA-256 of a refresh token
pub fn sha256_hex(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

/// JWT-backed token issuer
pub struct JwtTokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
}

impl JwtTokenIssuer {
    pub fn new(
        secret: &str,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        access_ttl: Duration,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            audience: audience.into(),
            access_ttl,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            &config.jwt_secret,
            config.jwt_issuer.clone(),
            config.jwt_audience.clone(),
            config.access_ttl(),
        )
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation
    }

    /// Decode and verify an access token, returning its claims
    pub fn decode_access_token(&self, token: &str) -> Result<AccessTokenClaims, AuthError> {
        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation())?;
        Ok(token_data.claims)
    }
}

impl TokenIssuer for JwtTokenIssuer {
    fn issue_access_token(&self, user_id: Uuid) -> Result<String, AuthError> {
        let now = Utc::now();
        let exp = now + self.access_ttl;

        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("JWT encode: {e}")))
    }

    fn issue_refresh_token(&self) -> Result<IssuedRefreshToken, AuthError> {
        let bytes: [u8; REFRESH_TOKEN_BYTES] = rand::thread_rng().gen();
        let plaintext = URL_SAFE_NO_PAD.encode(bytes);
        let hash = self.hash_token(&plaintext);

        Ok(IssuedRefreshToken { plaintext, hash })
    }

    fn hash_token(&self, plaintext: &str) -> String {
        sha256_hex(plaintext)
    }

    fn validate_access_token(&self, token: &str) -> Result<String, AuthError> {
        let claims = self.decode_access_token(token)?;

        if claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken);
        }

        Ok(claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn issuer() -> JwtTokenIssuer {
        JwtTokenIssuer::new(SECRET, "test-issuer", "test-audience", Duration::minutes(15))
    }

    fn encode_claims(claims: &AccessTokenClaims, header: Header, secret: &str) -> String {
        encode(&header, claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn claims_for(user_id: Uuid) -> AccessTokenClaims {
        let now = Utc::now().timestamp();
        AccessTokenClaims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + 900,
            iss: "test-issuer".into(),
            aud: "test-audience".into(),
            jti: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_access_token_roundtrip() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();

        let token = issuer.issue_access_token(user_id).unwrap();
        assert_eq!(issuer.validate_access_token(&token).unwrap(), user_id.to_string());

        let claims = issuer.decode_access_token(&token).unwrap();
        assert_eq!(claims.exp - claims.iat, 900);
        assert_eq!(claims.iss, "test-issuer");
    }

    #[test]
    fn test_jti_is_unique() {
        let issuer = issuer();
        let uid = Uuid::new_v4();

        let a = issuer.decode_access_token(&issuer.issue_access_token(uid).unwrap()).unwrap();
        let b = issuer.decode_access_token(&issuer.issue_access_token(uid).unwrap()).unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = encode_claims(
            &claims_for(Uuid::new_v4()),
            Header::new(Algorithm::HS256),
            "another-secret-another-secret-!!",
        );
        assert_eq!(issuer().validate_access_token(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_other_algorithm_rejected() {
        let token = encode_claims(
            &claims_for(Uuid::new_v4()),
            Header::new(Algorithm::HS512),
            SECRET,
        );
        assert_eq!(issuer().validate_access_token(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut claims = claims_for(Uuid::new_v4());
        claims.iat -= 7200;
        claims.exp = claims.iat + 60;

        let token = encode_claims(&claims, Header::new(Algorithm::HS256), SECRET);
        assert_eq!(issuer().validate_access_token(&token), Err(AuthError::TokenExpired));
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let mut claims = claims_for(Uuid::new_v4());
        claims.aud = "someone-else".into();

        let token = encode_claims(&claims, Header::new(Algorithm::HS256), SECRET);
        assert_eq!(issuer().validate_access_token(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_garbage_rejected() {
        assert_eq!(
            issuer().validate_access_token("not.a.jwt"),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn test_refresh_token_shape() {
        let issued = issuer().issue_refresh_token().unwrap();

        // 32 bytes -> 43 base64url chars, no padding
        assert_eq!(issued.plaintext.len(), 43);
        assert!(issued
            .plaintext
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(issued.hash.len(), 64);
        assert!(!format!("{:?}", issued).contains(&issued.plaintext));
    }

    #[test]
    fn test_hash_matches_issuance() {
        let issuer = issuer();
        for _ in 0..16 {
            let issued = issuer.issue_refresh_token().unwrap();
            assert_eq!(issuer.hash_token(&issued.plaintext), issued.hash);
        }
    }

    #[test]
    fn test_refresh_tokens_are_unique() {
        let issuer = issuer();
        let a = issuer.issue_refresh_token().unwrap();
        let b = issuer.issue_refresh_token().unwrap();
        assert_ne!(a.plaintext, b.plaintext);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
