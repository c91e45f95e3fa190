/// Account and session endpoints under `/api/auth`
use crate::{
    accounts::{LoginRequest, RegisterRequest, UserResponse, UserView},
    auth::{
        cookie_value,
        cookies::{self, ACCESS_COOKIE, REFRESH_COOKIE},
        AuthContext,
    },
    context::AppContext,
    error::{ChatError, ChatResult},
};
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

/// Build auth routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh-token", post(refresh_token))
        .route("/auth/logout", post(logout))
        .route("/auth/users", get(list_users))
        .route("/auth/me", get(me))
}

fn append_cookie(headers: &mut HeaderMap, cookie: String) -> ChatResult<()> {
    let value = HeaderValue::from_str(&cookie)
        .map_err(|e| ChatError::Internal(format!("Invalid cookie header: {}", e)))?;
    headers.append(header::SET_COOKIE, value);
    Ok(())
}

fn access_cookie(ctx: &AppContext, token: &str) -> String {
    cookies::session_cookie(
        ACCESS_COOKIE,
        token,
        ctx.sessions.tokens().access_ttl(),
        ctx.config.authentication.secure_cookies,
    )
}

fn refresh_cookie(ctx: &AppContext, token: &str) -> String {
    cookies::session_cookie(
        REFRESH_COOKIE,
        token,
        ctx.sessions.tokens().refresh_ttl(),
        ctx.config.authentication.secure_cookies,
    )
}

async fn register(
    State(ctx): State<AppContext>,
    Json(req): Json<RegisterRequest>,
) -> ChatResult<impl IntoResponse> {
    let user = ctx
        .accounts
        .create(&req.username, &req.email, &req.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            message: "User registered successfully".to_string(),
            user: user.into(),
        }),
    ))
}

async fn login(
    State(ctx): State<AppContext>,
    Json(req): Json<LoginRequest>,
) -> ChatResult<impl IntoResponse> {
    let (user, pair) = ctx.sessions.login(&req.email, &req.password).await?;

    let mut headers = HeaderMap::new();
    append_cookie(&mut headers, access_cookie(&ctx, &pair.access_token))?;
    append_cookie(&mut headers, refresh_cookie(&ctx, &pair.refresh_token))?;

    Ok((
        headers,
        Json(UserResponse {
            message: "Login successful".to_string(),
            user: user.into(),
        }),
    ))
}

async fn refresh_token(
    State(ctx): State<AppContext>,
    request_headers: HeaderMap,
) -> ChatResult<impl IntoResponse> {
    let token = cookie_value(&request_headers, REFRESH_COOKIE)
        .ok_or_else(|| ChatError::Authentication("No refresh token provided".to_string()))?;

    let refreshed = ctx.sessions.refresh(&token).await?;

    let mut headers = HeaderMap::new();
    append_cookie(&mut headers, access_cookie(&ctx, &refreshed.access_token))?;
    if let Some(rotated) = &refreshed.refresh_token {
        append_cookie(&mut headers, refresh_cookie(&ctx, rotated))?;
    }

    Ok((headers, Json(json!({ "message": "Access token refreshed" }))))
}

async fn logout(
    State(ctx): State<AppContext>,
    request_headers: HeaderMap,
) -> ChatResult<impl IntoResponse> {
    let token = cookie_value(&request_headers, REFRESH_COOKIE);
    ctx.sessions.logout(token.as_deref()).await?;

    let mut headers = HeaderMap::new();
    append_cookie(&mut headers, cookies::clear_cookie(ACCESS_COOKIE))?;
    append_cookie(&mut headers, cookies::clear_cookie(REFRESH_COOKIE))?;

    Ok((headers, Json(json!({ "message": "Logged out successfully" }))))
}

/// Every user except the caller
async fn list_users(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> ChatResult<Json<Vec<UserView>>> {
    let users = ctx.accounts.list_except(&auth.user_id).await?;
    Ok(Json(users.into_iter().map(UserView::from).collect()))
}

async fn me(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> ChatResult<Json<serde_json::Value>> {
    let user: UserView = ctx.accounts.get(&auth.user_id).await?.into();
    Ok(Json(json!({ "user": user })))
}
