/// Background task implementations
use crate::{context::AppContext, db, error::ChatResult};

/// Delete revocation records whose refresh token has expired anyway
pub async fn cleanup_expired_revocations(ctx: &AppContext) -> ChatResult<u64> {
    ctx.sessions.cleanup_expired_revocations().await
}

/// Health check - verify the database answers
pub async fn health_check(ctx: &AppContext) -> ChatResult<()> {
    db::test_connection(&ctx.db).await?;

    let online = ctx.registry.online_snapshot().await.len();
    tracing::debug!(online, "health check passed");
    Ok(())
}
