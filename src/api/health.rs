/// Health and metrics endpoints
///
/// - `/health`: overall status with database and realtime details
/// - `/health/live`: liveness, always 200 while the process serves requests
/// - `/health/ready`: readiness, 503 when the database does not answer
/// - `/metrics`: Prometheus text exposition
use crate::{context::AppContext, db, error::ChatResult, metrics};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::time::Instant;

/// Health status response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// "ok" or "degraded"
    pub status: String,
    pub version: String,
    pub database: ComponentHealth,
    pub connections: usize,
    pub users_online: usize,
}

/// Health status of an individual component
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub status: String,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Build health check routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/metrics", get(prometheus_metrics))
}

async fn health(State(ctx): State<AppContext>) -> (StatusCode, Json<HealthStatus>) {
    let database = check_database(&ctx).await;
    let healthy = database.error.is_none();

    let status = HealthStatus {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        version: ctx.config.service.version.clone(),
        database,
        connections: ctx.registry.connection_count().await,
        users_online: ctx.registry.online_snapshot().await.len(),
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

async fn liveness_probe(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "alive",
        "version": ctx.config.service.version
    }))
}

async fn readiness_probe(
    State(ctx): State<AppContext>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if let Err(e) = db::test_connection(&ctx.db).await {
        tracing::warn!(error = %e, "readiness probe failed: database check failed");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(serde_json::json!({
        "status": "ready",
        "version": ctx.config.service.version
    })))
}

async fn prometheus_metrics() -> ChatResult<impl IntoResponse> {
    let body = metrics::render_metrics()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

async fn check_database(ctx: &AppContext) -> ComponentHealth {
    let start = Instant::now();
    let result = db::test_connection(&ctx.db).await;
    let response_time_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(_) => ComponentHealth {
            status: "healthy".to_string(),
            response_time_ms,
            error: None,
        },
        Err(e) => ComponentHealth {
            status: "unhealthy".to_string(),
            response_time_ms,
            error: Some(e.to_string()),
        },
    }
}
