/// API routes and handlers
pub mod auth;
pub mod files;
pub mod groups;
pub mod health;
pub mod messages;
pub mod realtime;

use crate::context::AppContext;
use axum::Router;

/// REST routes, mounted under `/api`
pub fn rest_routes() -> Router<AppContext> {
    Router::new()
        .merge(auth::routes())
        .merge(messages::routes())
        .merge(files::routes())
        .merge(groups::routes())
}

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .nest("/api", rest_routes())
        .merge(realtime::routes())
        .merge(health::routes())
}
