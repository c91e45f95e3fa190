/// Session lifecycle: login, refresh and logout on top of the token service
use crate::{
    accounts::{AccountManager, User},
    auth::tokens::{SessionPair, TokenError, TokenService},
    error::{ChatError, ChatResult},
    metrics,
};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;

/// Result of exchanging a refresh token
#[derive(Debug, Clone)]
pub struct RefreshedSession {
    pub user_id: String,
    pub access_token: String,
    /// Replacement refresh token, present only when rotation is enabled
    pub refresh_token: Option<String>,
}

/// Session manager service
#[derive(Clone)]
pub struct SessionManager {
    db: SqlitePool,
    tokens: TokenService,
    accounts: AccountManager,
    rotate_refresh_tokens: bool,
}

impl SessionManager {
    pub fn new(
        db: SqlitePool,
        tokens: TokenService,
        accounts: AccountManager,
        rotate_refresh_tokens: bool,
    ) -> Self {
        Self {
            db,
            tokens,
            accounts,
            rotate_refresh_tokens,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Authenticate by email/password and sign a new session pair
    pub async fn login(&self, email: &str, password: &str) -> ChatResult<(User, SessionPair)> {
        let user = self.accounts.verify_credentials(email, password).await?;
        let pair = self.tokens.issue(&user.id)?;

        tracing::info!(user_id = %user.id, "user logged in");
        Ok((user, pair))
    }

    /// Resolve the user id bound to an access token
    pub fn authenticate(&self, access_token: &str) -> ChatResult<String> {
        Ok(self.tokens.verify_access(access_token)?)
    }

    /// Exchange a refresh token for a new access token
    pub async fn refresh(&self, refresh_token: &str) -> ChatResult<RefreshedSession> {
        let result = self.refresh_inner(refresh_token).await;
        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::TOKEN_REFRESH_TOTAL.with_label_values(&[outcome]).inc();
        result
    }

    async fn refresh_inner(&self, refresh_token: &str) -> ChatResult<RefreshedSession> {
        let claims = self.tokens.verify_refresh(refresh_token)?;

        if self.is_revoked(&claims.jti).await? {
            return Err(TokenError::RefreshInvalid("token has been revoked".to_string()).into());
        }

        let refresh_token = if self.rotate_refresh_tokens {
            // Only one concurrent exchange of the same token can insert the revocation
            if !self.revoke(&claims.jti, &claims.sub, claims.exp).await? {
                return Err(
                    TokenError::RefreshInvalid("token has already been exchanged".to_string()).into(),
                );
            }
            Some(self.tokens.issue_refresh(&claims.sub)?)
        } else {
            None
        };

        let access_token = self.tokens.issue_access(&claims.sub)?;
        tracing::debug!(user_id = %claims.sub, rotated = refresh_token.is_some(), "access token refreshed");

        Ok(RefreshedSession {
            user_id: claims.sub,
            access_token,
            refresh_token,
        })
    }

    /// Revoke the presented refresh token, if it is still valid
    pub async fn logout(&self, refresh_token: Option<&str>) -> ChatResult<()> {
        let Some(token) = refresh_token else {
            return Ok(());
        };

        // An invalid or expired token cannot be exchanged anyway
        if let Ok(claims) = self.tokens.verify_refresh(token) {
            self.revoke(&claims.jti, &claims.sub, claims.exp).await?;
            tracing::info!(user_id = %claims.sub, "user logged out");
        }

        Ok(())
    }

    /// Check whether a refresh token id has been revoked
    pub async fn is_revoked(&self, jti: &str) -> ChatResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM revoked_refresh_tokens WHERE jti = ?1")
            .bind(jti)
            .fetch_one(&self.db)
            .await?;

        Ok(count > 0)
    }

    /// Record a revocation; returns false when the token was already revoked
    async fn revoke(&self, jti: &str, user_id: &str, exp: i64) -> ChatResult<bool> {
        let expires_at: DateTime<Utc> = Utc
            .timestamp_opt(exp, 0)
            .single()
            .ok_or_else(|| ChatError::Internal(format!("Invalid token expiry: {}", exp)))?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO revoked_refresh_tokens (jti, user_id, revoked_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(jti)
        .bind(user_id)
        .bind(Utc::now())
        .bind(expires_at)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete revocations whose token would have expired anyway
    pub async fn cleanup_expired_revocations(&self) -> ChatResult<u64> {
        let result = sqlx::query("DELETE FROM revoked_refresh_tokens WHERE expires_at < ?1")
            .bind(Utc::now())
            .execute(&self.db)
            .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!(deleted, "Cleaned up expired refresh token revocations");
        } else {
            tracing::debug!("Revocation cleanup: nothing expired");
        }

        Ok(deleted)
    }
}
