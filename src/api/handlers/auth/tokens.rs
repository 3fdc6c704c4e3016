//! Session token signing and verification (HS256 JWT).

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims carried by a session token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Account id.
    pub sub: String,
    /// Issued-at, compared against `password_changed_at` by the guard.
    pub iat: i64,
    pub exp: i64,
}

/// Signs and verifies session tokens with a shared symmetric secret.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenService {
    #[must_use]
    pub fn new(secret: &SecretString) -> Self {
        let secret = secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Sign a token binding `account_id` for `ttl_seconds`.
    ///
    /// # Errors
    /// Returns an error if serialization or signing fails.
    pub fn sign(&self, account_id: Uuid, ttl_seconds: i64) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: account_id.to_string(),
            iat: now,
            exp: now + ttl_seconds,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .context("failed to sign session token")
    }

    /// Verify signature and expiry, returning the claims.
    ///
    /// # Errors
    /// Returns an error for tampered, expired, or malformed tokens.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let validation = Validation::default();
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .context("invalid session token")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(secret: &str) -> TokenService {
        TokenService::new(&SecretString::from(secret.to_string()))
    }

    #[test]
    fn sign_and_verify_round_trips() -> Result<()> {
        let tokens = service("test_secret_key");
        let account_id = Uuid::new_v4();

        let token = tokens.sign(account_id, 3600)?;
        let claims = tokens.verify(&token)?;

        assert_eq!(claims.sub, account_id.to_string());
        assert!(claims.exp > claims.iat);
        assert_eq!(claims.exp - claims.iat, 3600);
        Ok(())
    }

    #[test]
    fn garbage_token_rejected() {
        let tokens = service("test_secret_key");
        assert!(tokens.verify("not-a-token").is_err());
    }

    #[test]
    fn wrong_secret_rejected() -> Result<()> {
        let signer = service("secret-one");
        let verifier = service("secret-two");

        let token = signer.sign(Uuid::new_v4(), 3600)?;
        assert!(verifier.verify(&token).is_err());
        Ok(())
    }

    #[test]
    fn iat_tracks_issue_time() -> Result<()> {
        let tokens = service("test_secret_key");
        let before = Utc::now().timestamp();
        let token = tokens.sign(Uuid::new_v4(), 60)?;
        let after = Utc::now().timestamp();

        let claims = tokens.verify(&token)?;
        assert!(claims.iat >= before);
        assert!(claims.iat <= after);
        Ok(())
    }
}
