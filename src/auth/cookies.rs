/// Session cookies built with axum-extra's `Cookie`
use axum_extra::extract::cookie::{Cookie, SameSite};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

/// `Set-Cookie` value for an HTTP-only, same-site-strict session cookie
pub fn session_cookie(name: &str, value: &str, max_age: chrono::Duration, secure: bool) -> String {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(secure)
        .max_age(time::Duration::seconds(max_age.num_seconds()))
        .build()
        .to_string()
}

/// `Set-Cookie` value that expires a cookie immediately
pub fn clear_cookie(name: &str) -> String {
    Cookie::build((name, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::ZERO)
        .build()
        .to_string()
}
