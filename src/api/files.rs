/// Attachment upload under `/api/files`
use crate::{
    api::messages::deliver_direct,
    auth::AuthContext,
    context::AppContext,
    error::{ChatError, ChatResult},
    ledger::{DirectMessage, MessageContent},
};
use axum::{
    body::Bytes,
    extract::{Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use std::{collections::HashMap, future::Future};

/// Build file routes
pub fn routes() -> Router<AppContext> {
    Router::new().route("/files/upload", post(upload_file))
}

/// File part of a multipart form
pub(crate) struct UploadedPart {
    pub file_name: Option<String>,
    pub data: Bytes,
}

/// Text fields and the optional `file` part of a multipart form
#[derive(Default)]
pub(crate) struct UploadForm {
    pub fields: HashMap<String, String>,
    pub file: Option<UploadedPart>,
}

impl UploadForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Read a multipart body into memory
pub(crate) async fn read_form(mut multipart: Multipart) -> ChatResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ChatError::Validation(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| ChatError::Validation(format!("Failed to read upload: {}", e)))?;
            form.file = Some(UploadedPart { file_name, data });
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| ChatError::Validation(format!("Invalid form field {}: {}", name, e)))?;
            form.fields.insert(name, value);
        }
    }

    Ok(form)
}

/// Store the optional `file` part, then run `deliver` with its public reference
///
/// The stored file is deleted again when `deliver` fails.
pub(crate) async fn with_stored_file<T, F, Fut>(
    ctx: &AppContext,
    part: Option<&UploadedPart>,
    deliver: F,
) -> ChatResult<T>
where
    F: FnOnce(Option<String>) -> Fut,
    Fut: Future<Output = ChatResult<T>>,
{
    let stored = match part {
        Some(part) => Some(ctx.files.save(part.file_name.as_deref(), &part.data).await?),
        None => None,
    };

    let result = deliver(stored.as_ref().map(|s| s.file_ref.clone())).await;
    if let (Err(e), Some(stored)) = (&result, &stored) {
        tracing::debug!(name = %stored.name, error = %e, "discarding orphaned upload");
        if let Err(remove_err) = ctx.files.remove(&stored.name).await {
            tracing::warn!(name = %stored.name, "Failed to remove orphaned upload: {}", remove_err);
        }
    }
    result
}

async fn upload_file(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    multipart: Multipart,
) -> ChatResult<(StatusCode, Json<DirectMessage>)> {
    let form = read_form(multipart).await?;

    let receiver = form
        .field("receiver")
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ChatError::Validation("Receiver is required".to_string()))?
        .to_string();
    let part = form
        .file
        .as_ref()
        .ok_or_else(|| ChatError::Validation("No file uploaded".to_string()))?;

    ctx.accounts.get(&receiver).await?;
    let message = with_stored_file(&ctx, Some(part), |file_ref| {
        let content = MessageContent {
            message: None,
            file: file_ref,
        };
        deliver_direct(&ctx, &auth.user_id, &receiver, content)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(message)))
}
