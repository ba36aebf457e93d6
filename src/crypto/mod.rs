//! Password hashing, session tokens and password-reset tokens.
//!
//! Session tokens are HS256 JWTs carrying the user id plus `iat`/`exp`.
//! There is no revocation list: a token is invalidated only when the user
//! changes their password after it was issued.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::AuthConfig;

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt_bytes: [u8; 16] = rand::rng().random();
    let salt = SaltString::encode_b64(&salt_bytes)?;
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random token (32 bytes, hex encoded)
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// A password reset token: the plain value goes to the user, only the hash is stored.
#[derive(Debug, Clone)]
pub struct ResetToken {
    pub plain: String,
    pub hashed: String,
    pub expires_at: DateTime<Utc>,
}

impl ResetToken {
    pub fn generate(valid_for: Duration) -> Self {
        let plain = generate_token();
        let hashed = hash_token(&plain);
        Self {
            plain,
            hashed,
            expires_at: Utc::now() + valid_for,
        }
    }
}

/// Parse a lifetime such as `90d`, `12h`, `30m`, `45s` or a bare number of seconds.
pub fn parse_lifetime(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let amount: i64 = number
        .parse()
        .map_err(|_| format!("Invalid lifetime: {}", value))?;

    let duration = match unit {
        "" | "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        "w" => Duration::try_weeks(amount),
        _ => return Err(format!("Invalid lifetime unit in: {}", value)),
    }
    .ok_or_else(|| format!("Lifetime out of range: {}", value))?;

    if duration <= Duration::zero() {
        return Err(format!("Lifetime must be positive: {}", value));
    }
    Ok(duration)
}

/// JWT claims for session tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Issues and verifies signed session tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &str, lifetime: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            lifetime,
        }
    }

    pub fn from_config(config: &AuthConfig) -> anyhow::Result<Self> {
        let lifetime = parse_lifetime(&config.jwt_expires_in).map_err(anyhow::Error::msg)?;
        Ok(Self::new(&config.jwt_secret, lifetime))
    }

    /// Issue a token for a user, valid from now
    pub fn issue(&self, user_id: &str) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue_at(user_id, Utc::now())
    }

    /// Issue a token with an explicit issue time
    pub fn issue_at(
        &self,
        user_id: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: user_id.to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + self.lifetime).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
    }

    /// Check signature and expiry and return the claims
    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::errors::ErrorKind;

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("pass1234").unwrap();
        assert_ne!(hash, "pass1234");
        assert!(verify_password("pass1234", &hash));
        assert!(!verify_password("pass12345", &hash));
        assert!(!verify_password("pass1234", "not-a-hash"));
    }

    #[test]
    fn test_reset_token_is_stored_hashed() {
        let token = ResetToken::generate(Duration::minutes(10));
        assert_eq!(token.plain.len(), 64);
        assert_eq!(token.hashed, hash_token(&token.plain));
        assert_ne!(token.hashed, token.plain);
        assert!(token.expires_at > Utc::now());
    }

    #[test]
    fn test_parse_lifetime() {
        assert_eq!(parse_lifetime("90d").unwrap(), Duration::days(90));
        assert_eq!(parse_lifetime("12h").unwrap(), Duration::hours(12));
        assert_eq!(parse_lifetime("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_lifetime("45").unwrap(), Duration::seconds(45));
        assert!(parse_lifetime("d").is_err());
        assert!(parse_lifetime("10y").is_err());
        assert!(parse_lifetime("0d").is_err());
    }

    #[test]
    fn test_parse_lifetime_out_of_range() {
        let err = parse_lifetime("99999999999999d").unwrap_err();
        assert!(err.contains("out of range"));
        assert!(parse_lifetime("99999999999999999999").is_err());

        let config = AuthConfig {
            jwt_expires_in: "99999999999999d".to_string(),
            ..Default::default()
        };
        assert!(TokenService::from_config(&config).is_err());
    }

    #[test]
    fn test_issue_and_verify() {
        let service = TokenService::new("test-secret", Duration::days(1));
        let token = service.issue("user-1").unwrap();
        let claims = service.verify(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.exp - claims.iat, 86_400);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = TokenService::new("secret-a", Duration::days(1));
        let verifier = TokenService::new("secret-b", Duration::days(1));
        let token = issuer.issue("user-1").unwrap();
        let err = verifier.verify(&token).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::InvalidSignature);
    }

    #[test]
    fn test_expired_token_rejected() {
        let service = TokenService::new("test-secret", Duration::hours(1));
        let token = service
            .issue_at("user-1", Utc::now() - Duration::hours(2))
            .unwrap();
        let err = service.verify(&token).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::ExpiredSignature);
    }

    #[test]
    fn test_malformed_token_rejected() {
        let service = TokenService::new("test-secret", Duration::hours(1));
        assert!(service.verify("loggedout").is_err());
    }
}
