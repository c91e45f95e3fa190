/// Authentication: token service, session lifecycle and request extractors
pub mod cookies;
pub mod session;
pub mod tokens;

pub use session::{RefreshedSession, SessionManager};
pub use tokens::{Claims, SessionPair, TokenError, TokenKind, TokenService};

use crate::{context::AppContext, error::ChatError};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::CookieJar;

/// Authenticated context - extracts and validates the access cookie
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = ChatError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar
            .get(cookies::ACCESS_COOKIE)
            .map(|c| c.value().to_string())
            .ok_or_else(|| ChatError::Authentication("Not authorized, no token".to_string()))?;

        let user_id = state.sessions.authenticate(&token)?;
        Ok(AuthContext { user_id })
    }
}

/// Read a cookie value from request headers
pub fn cookie_value(headers: &axum::http::HeaderMap, name: &str) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(name)
        .map(|c| c.value().to_string())
}
