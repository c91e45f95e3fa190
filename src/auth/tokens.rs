/// Token service: signs, verifies and refreshes session tokens
///
/// Access and refresh tokens are HS256 JWTs signed with distinct secrets and
/// carrying distinct TTLs. Issuance is stateless; revocation lives in
/// [`crate::auth::SessionManager`].
use crate::{config::AuthConfig, error::ChatError};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Which secret a token was minted with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by both token kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub kind: TokenKind,
    /// Unique token id, used to revoke refresh tokens
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Access + refresh token pair handed out at login
#[derive(Debug, Clone)]
pub struct SessionPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Token verification failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Access token invalid: {0}")]
    AccessInvalid(String),

    #[error("Refresh token invalid: {0}")]
    RefreshInvalid(String),

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

impl From<TokenError> for ChatError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(msg) => ChatError::Jwt(msg),
            other => ChatError::Authentication(other.to_string()),
        }
    }
}

/// Stateless issuer/verifier for session tokens
#[derive(Clone)]
pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            access_ttl: Duration::minutes(config.access_ttl_minutes),
            refresh_ttl: Duration::days(config.refresh_ttl_days),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Sign a fresh access/refresh pair for a user
    pub fn issue(&self, user_id: &str) -> Result<SessionPair, TokenError> {
        self.issue_at(user_id, Utc::now())
    }

    /// Sign a pair as if issued at `now`
    pub fn issue_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<SessionPair, TokenError> {
        Ok(SessionPair {
            access_token: self.sign(user_id, TokenKind::Access, now)?,
            refresh_token: self.sign(user_id, TokenKind::Refresh, now)?,
        })
    }

    /// Sign a new access token only
    pub fn issue_access(&self, user_id: &str) -> Result<String, TokenError> {
        self.sign(user_id, TokenKind::Access, Utc::now())
    }

    /// Sign a new refresh token only
    pub fn issue_refresh(&self, user_id: &str) -> Result<String, TokenError> {
        self.sign(user_id, TokenKind::Refresh, Utc::now())
    }

    /// Verify an access token and return the user id it is bound to
    pub fn verify_access(&self, token: &str) -> Result<String, TokenError> {
        self.verify(token, TokenKind::Access)
            .map(|claims| claims.sub)
            .map_err(TokenError::AccessInvalid)
    }

    /// Verify a refresh token and return its claims
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(token, TokenKind::Refresh)
            .map_err(TokenError::RefreshInvalid)
    }

    /// Exchange a refresh token for a new access token
    ///
    /// The presented refresh token remains valid until its own expiry.
    pub fn refresh(&self, refresh_token: &str) -> Result<String, TokenError> {
        let claims = self.verify_refresh(refresh_token)?;
        self.issue_access(&claims.sub)
    }

    fn sign(&self, user_id: &str, kind: TokenKind, now: DateTime<Utc>) -> Result<String, TokenError> {
        let (key, ttl) = match kind {
            TokenKind::Access => (&self.access_encoding, self.access_ttl),
            TokenKind::Refresh => (&self.refresh_encoding, self.refresh_ttl),
        };

        let claims = Claims {
            sub: user_id.to_string(),
            kind,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, String> {
        let key = match kind {
            TokenKind::Access => &self.access_decoding,
            TokenKind::Refresh => &self.refresh_decoding,
        };

        let mut validation = Validation::new(Algorithm::HS256);
        // An expired token is never accepted, not even within clock skew
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<Claims>(token, key, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => "token has expired".to_string(),
            ErrorKind::InvalidSignature => "invalid token signature".to_string(),
            _ => format!("malformed token: {}", e),
        })?;

        if data.claims.kind != kind {
            return Err("wrong token kind".to_string());
        }

        Ok(data.claims)
    }
}
