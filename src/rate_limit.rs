/// Request rate limiting
use crate::{
    auth::{cookie_value, cookies::ACCESS_COOKIE},
    config::RateLimitConfig,
    context::AppContext,
    error::{ChatError, ChatResult},
};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiter manager with separate buckets for signed-in and anonymous traffic
#[derive(Clone)]
pub struct RateLimiter {
    enabled: bool,
    authenticated: Arc<DirectLimiter>,
    unauthenticated: Arc<DirectLimiter>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let quota = |rps: u32| Quota::per_second(NonZeroU32::new(rps).unwrap_or(NonZeroU32::MIN));

        Self {
            enabled: config.enabled,
            authenticated: Arc::new(GovernorLimiter::direct(quota(config.authenticated_rps))),
            unauthenticated: Arc::new(GovernorLimiter::direct(quota(config.unauthenticated_rps))),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Check rate limit for a request carrying a valid access token
    pub fn check_authenticated(&self) -> ChatResult<()> {
        Self::check(self.enabled, &self.authenticated)
    }

    /// Check rate limit for anonymous requests
    pub fn check_unauthenticated(&self) -> ChatResult<()> {
        Self::check(self.enabled, &self.unauthenticated)
    }

    fn check(enabled: bool, limiter: &DirectLimiter) -> ChatResult<()> {
        if !enabled {
            return Ok(());
        }
        limiter.check().map_err(|_| ChatError::RateLimitExceeded {
            retry_after: Duration::from_secs(1),
        })
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, ChatError> {
    let authenticated = cookie_value(request.headers(), ACCESS_COOKIE)
        .map(|token| ctx.sessions.authenticate(&token).is_ok())
        .unwrap_or(false);

    let result = if authenticated {
        ctx.rate_limiter.check_authenticated()
    } else {
        ctx.rate_limiter.check_unauthenticated()
    };

    if let Err(e) = result {
        tracing::warn!(path = %request.uri().path(), authenticated, "rate limit exceeded");
        return Err(e);
    }

    Ok(next.run(request).await)
}
