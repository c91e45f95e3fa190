/// Direct message endpoints under `/api/messages`
use crate::{
    auth::AuthContext,
    context::AppContext,
    error::ChatResult,
    ledger::{DirectMessage, DirectMessageView, MessageContent},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

/// Build message routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/messages/send", post(send_message))
        .route("/messages/:user_id", get(conversation))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub receiver: String,
    pub message: String,
}

/// Persist a direct message, then push it to the receiver
pub(crate) async fn deliver_direct(
    ctx: &AppContext,
    sender: &str,
    receiver: &str,
    content: MessageContent,
) -> ChatResult<DirectMessage> {
    ctx.accounts.get(receiver).await?;

    let message = ctx.ledger.append_direct(sender, receiver, content).await?;
    ctx.broadcaster.direct_message(&message).await;

    Ok(message)
}

async fn send_message(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<SendMessageRequest>,
) -> ChatResult<(StatusCode, Json<DirectMessage>)> {
    let message = deliver_direct(
        &ctx,
        &auth.user_id,
        &req.receiver,
        MessageContent::text(req.message),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Conversation between the caller and another user, oldest first
async fn conversation(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(user_id): Path<String>,
) -> ChatResult<Json<Vec<DirectMessageView>>> {
    let messages = ctx.ledger.conversation(&auth.user_id, &user_id).await?;
    Ok(Json(messages))
}
