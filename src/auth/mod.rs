//! Bearer-token authentication
//!
//! JWT issuance and validation plus the authenticated `UserContext` every
//! search request carries. Invalid or expired tokens resolve to `None`; the
//! caller turns that into an unauthorized response before any retrieval work.

use crate::config::AuthConfig;
use crate::error::Result;
use crate::storage::Database;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// An authenticated user's context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub email: String,
    pub department: String,
    /// Ordered role names; `Admin` grants unconditional visibility
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Token issuer and validator
pub struct Authenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_hours: i64,
}

impl Authenticator {
    pub fn new(secret: &[u8], ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl_hours,
        }
    }

    /// Build from config, reading the signing secret from the configured
    /// environment variable
    pub fn from_config(config: &AuthConfig) -> Self {
        let secret = match std::env::var(&config.secret_env) {
            Ok(s) if !s.is_empty() => s,
            _ => {
                tracing::warn!(
                    "{} is not set; using an insecure development secret",
                    config.secret_env
                );
                "sibyl-dev-secret-change-in-prod".to_string()
            }
        };

        Self::new(secret.as_bytes(), config.token_ttl_hours)
    }

    /// Create a signed token for the given user
    pub fn create_token(&self, user_id: &str) -> Result<String> {
        let now = chrono::Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::hours(self.ttl_hours)).timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| anyhow::anyhow!("Failed to sign token: {}", e).into())
    }

    /// Decode a token and return the user id; `None` on invalid or expired
    pub fn decode_token(&self, token: &str) -> Option<String> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims.sub)
            .ok()
    }

    /// Validate a token and load the user's context
    pub fn authenticate(&self, token: &str, db: &Database) -> Result<Option<UserContext>> {
        match self.decode_token(token) {
            Some(user_id) => db.get_user_context(&user_id),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_roundtrip() {
        let auth = Authenticator::new(b"test-secret", 24);
        let token = auth.create_token("amara").unwrap();
        assert_eq!(auth.decode_token(&token).unwrap(), "amara");
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let issuer = Authenticator::new(b"secret-a", 24);
        let verifier = Authenticator::new(b"secret-b", 24);

        let token = issuer.create_token("amara").unwrap();
        assert!(verifier.decode_token(&token).is_none());
    }

    #[test]
    fn rejects_expired_token() {
        // Negative TTL puts exp firmly in the past, beyond validation leeway
        let auth = Authenticator::new(b"test-secret", -2);
        let token = auth.create_token("amara").unwrap();
        assert!(auth.decode_token(&token).is_none());
    }

    #[test]
    fn rejects_garbage() {
        let auth = Authenticator::new(b"test-secret", 24);
        assert!(auth.decode_token("not-a-token").is_none());
    }

    #[test]
    fn authenticate_resolves_user() {
        let db = Database::in_memory().unwrap();
        db.seed_roles().unwrap();
        db.create_user("amara", "amara@corp.test", "HR", &["Employee".to_string()])
            .unwrap();

        let auth = Authenticator::new(b"test-secret", 24);
        let token = auth.create_token("amara").unwrap();

        let ctx = auth.authenticate(&token, &db).unwrap().unwrap();
        assert_eq!(ctx.user_id, "amara");

        // Valid token for a user that no longer exists
        let ghost = auth.create_token("ghost").unwrap();
        assert!(auth.authenticate(&ghost, &db).unwrap().is_none());
    }
}
