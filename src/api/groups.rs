/// Group endpoints under `/api/groups`
use crate::{
    api::files::{read_form, with_stored_file},
    auth::AuthContext,
    context::AppContext,
    error::ChatResult,
    groups::{CreateGroupRequest, Group, GroupView, MemberRequest},
    ledger::{GroupMessage, GroupMessageView, MessageContent},
};
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;

/// Build group routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/groups/create", post(create_group))
        .route("/groups/my-groups", get(my_groups))
        .route("/groups/:group_id/add-member", post(add_member))
        .route("/groups/:group_id/assign-admin", post(assign_admin))
        .route("/groups/:group_id/remove-admin/:admin_id", delete(remove_admin))
        .route("/groups/:group_id/remove-member/:member_id", delete(remove_member))
        .route("/groups/:group_id/send", post(send_group_message))
        .route("/groups/:group_id/messages", get(group_messages))
}

/// `{message, group}` envelope returned by group mutations
#[derive(Debug, Serialize)]
pub struct GroupResponse {
    pub message: String,
    pub group: Group,
}

impl GroupResponse {
    fn new(message: &str, group: Group) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
            group,
        })
    }
}

async fn create_group(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(req): Json<CreateGroupRequest>,
) -> ChatResult<(StatusCode, Json<GroupResponse>)> {
    let group = ctx
        .groups
        .create_group(&auth.user_id, &req.name, &req.members)
        .await?;

    Ok((StatusCode::CREATED, GroupResponse::new("Group created", group)))
}

async fn add_member(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(group_id): Path<String>,
    Json(req): Json<MemberRequest>,
) -> ChatResult<Json<GroupResponse>> {
    let group = ctx
        .groups
        .add_member(&group_id, &auth.user_id, &req.member_id)
        .await?;
    Ok(GroupResponse::new("Member added", group))
}

async fn assign_admin(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(group_id): Path<String>,
    Json(req): Json<MemberRequest>,
) -> ChatResult<Json<GroupResponse>> {
    let group = ctx
        .groups
        .assign_admin(&group_id, &auth.user_id, &req.member_id)
        .await?;
    Ok(GroupResponse::new("Admin assigned", group))
}

async fn remove_admin(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path((group_id, admin_id)): Path<(String, String)>,
) -> ChatResult<Json<GroupResponse>> {
    let group = ctx
        .groups
        .remove_admin(&group_id, &auth.user_id, &admin_id)
        .await?;
    Ok(GroupResponse::new("Admin removed successfully", group))
}

async fn remove_member(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path((group_id, member_id)): Path<(String, String)>,
) -> ChatResult<Json<GroupResponse>> {
    let group = ctx
        .groups
        .remove_member(&group_id, &auth.user_id, &member_id)
        .await?;
    Ok(GroupResponse::new("Member removed successfully", group))
}

/// Multipart post with an optional `message` field and optional `file` part
async fn send_group_message(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(group_id): Path<String>,
    multipart: Multipart,
) -> ChatResult<(StatusCode, Json<GroupMessage>)> {
    let form = read_form(multipart).await?;

    // Membership is checked before anything touches the disk
    ctx.groups.require_member(&group_id, &auth.user_id).await?;

    let text = form.field("message").map(str::to_string);
    let message = with_stored_file(&ctx, form.file.as_ref(), |file| {
        let content = MessageContent {
            message: text,
            file,
        };
        ctx.groups.post_message(&group_id, &auth.user_id, content)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

async fn group_messages(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(group_id): Path<String>,
) -> ChatResult<Json<Vec<GroupMessageView>>> {
    let messages = ctx.groups.read_messages(&group_id, &auth.user_id).await?;
    Ok(Json(messages))
}

async fn my_groups(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> ChatResult<Json<Vec<GroupView>>> {
    let groups = ctx.groups.my_groups(&auth.user_id).await?;
    Ok(Json(groups))
}
