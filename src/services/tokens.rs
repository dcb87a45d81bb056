// src/services/tokens.rs
//! Signed session credentials (HS256 JWT).

use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::models::{Claims, User};
use crate::common::config::JwtConfig;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign session token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Why a presented credential was rejected
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    #[error("token has expired")]
    Expired,

    #[error("token is malformed or its signature is invalid")]
    Malformed,

    #[error("token was rejected")]
    Unknown,
}

impl From<jsonwebtoken::errors::Error> for VerifyError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => VerifyError::Expired,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::MissingAlgorithm
            | ErrorKind::MissingRequiredClaim(_)
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => VerifyError::Malformed,
            _ => VerifyError::Unknown,
        }
    }
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
    issuer: String,
    audience: String,
}

impl TokenService {
    pub fn new(config: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            ttl_secs: i64::try_from(config.ttl.as_secs()).unwrap_or(i64::MAX),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        }
    }

    pub fn issue(&self, user: &User) -> Result<String, TokenError> {
        self.issue_at(user, Utc::now().timestamp())
    }

    fn issue_at(&self, user: &User, now: i64) -> Result<String, TokenError> {
        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            avatar: user.avatar.clone(),
            providers: user.provider_names(),
            iat: now.max(0) as usize,
            exp: now.saturating_add(self.ttl_secs).max(0) as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        debug!(user_id = %user.id, exp = claims.exp, "Issued session token");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, VerifyError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let kind = VerifyError::from(e);
                warn!(reason = %kind, "Session token verification failed");
                kind
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::ProviderLink;
    use crate::services::providers::Provider;
    use std::time::Duration;

    fn config(secret: &str) -> JwtConfig {
        JwtConfig {
            secret: secret.to_string(),
            ttl: Duration::from_secs(3600),
            issuer: "oauth-backend".to_string(),
            audience: "oauth-frontend".to_string(),
        }
    }

    fn user() -> User {
        User {
            id: "U_ABC123".to_string(),
            email: "a@x.com".to_string(),
            name: "A".to_string(),
            avatar: Some("https://img.example.com/a.png".to_string()),
            is_active: true,
            is_email_verified: true,
            login_count: 1,
            last_login_at: "2024-01-01 00:00:00".to_string(),
            created_at: "2024-01-01 00:00:00".to_string(),
            updated_at: "2024-01-01 00:00:00".to_string(),
            providers: vec![ProviderLink {
                provider: Provider::Google,
                provider_user_id: "g-42".to_string(),
                linked_at: "2024-01-01 00:00:00".to_string(),
            }],
        }
    }

    /// Flips one character in the middle of the signature segment
    fn tamper(token: &str) -> String {
        let (head, signature) = token.rsplit_once('.').unwrap();
        let mut chars: Vec<char> = signature.chars().collect();
        let mid = chars.len() / 2;
        chars[mid] = if chars[mid] == 'A' { 'B' } else { 'A' };
        format!("{}.{}", head, chars.into_iter().collect::<String>())
    }

    #[test]
    fn test_issue_and_verify() {
        let service = TokenService::new(&config("test_secret_key"));
        let token = service.issue(&user()).unwrap();

        let claims = service.verify(&token).unwrap();
        assert_eq!(claims.sub, "U_ABC123");
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.providers, vec!["google".to_string()]);
        assert_eq!(claims.iss, "oauth-backend");
        assert_eq!(claims.aud, "oauth-frontend");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_longest_lifetime_still_verifies() {
        let mut long = config("test_secret_key");
        long.ttl = Duration::from_secs(i64::MAX as u64);
        let service = TokenService::new(&long);

        let token = service.issue(&user()).unwrap();
        assert_eq!(service.verify(&token).unwrap().sub, "U_ABC123");
    }

    #[test]
    fn test_expired_token() {
        let service = TokenService::new(&config("test_secret_key"));
        let issued = Utc::now().timestamp() - 3700;
        let token = service.issue_at(&user(), issued).unwrap();

        assert_eq!(service.verify(&token), Err(VerifyError::Expired));
    }

    #[test]
    fn test_tampered_signature_is_malformed() {
        let service = TokenService::new(&config("test_secret_key"));
        let token = service.issue(&user()).unwrap();

        assert_eq!(service.verify(&tamper(&token)), Err(VerifyError::Malformed));
    }

    #[test]
    fn test_wrong_secret_is_malformed() {
        let signer = TokenService::new(&config("test_secret_key"));
        let verifier = TokenService::new(&config("wrong_secret_key"));
        let token = signer.issue(&user()).unwrap();

        assert_eq!(verifier.verify(&token), Err(VerifyError::Malformed));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let service = TokenService::new(&config("test_secret_key"));

        assert_eq!(service.verify("not-a-jwt"), Err(VerifyError::Malformed));
        assert_eq!(service.verify(""), Err(VerifyError::Malformed));
        assert_eq!(
            service.verify("aGVhZGVy.cGF5bG9hZA.c2ln"),
            Err(VerifyError::Malformed)
        );
    }

    #[test]
    fn test_wrong_audience_is_unknown() {
        let signer = TokenService::new(&config("test_secret_key"));
        let mut other = config("test_secret_key");
        other.audience = "another-app".to_string();
        let verifier = TokenService::new(&other);

        let token = signer.issue(&user()).unwrap();
        assert_eq!(verifier.verify(&token), Err(VerifyError::Unknown));
    }
}
