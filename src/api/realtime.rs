/// Realtime WebSocket endpoint
///
/// # Handshake
///
/// `GET /realtime` upgrades after verifying the signed access token, taken
/// from the `accessToken` cookie or a `token` query parameter.
///
/// # Connection lifecycle
///
/// - The connection is registered and joins its user's private room
/// - Events for the connection are queued on a bounded outbox and written by
///   the socket loop; a full outbox drops events for that connection only
/// - Sends time out after 5s and disconnect slow consumers
/// - Pings go out every 30s without other traffic
/// - The connection is removed from every room on exit
///
/// # Client frames
///
/// `joinGroup`, `leaveGroup`, `typing`, `stop-typing`. Malformed frames are
/// answered with an `error` event and never close the socket.
use crate::{
    auth::{cookie_value, cookies::ACCESS_COOKIE},
    context::AppContext,
    error::{ChatError, ChatResult},
    realtime::{ClientEvent, ConnectionId, RoomId, ServerEvent},
};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use serde::Deserialize;
use tokio::{
    sync::mpsc,
    time::{interval, timeout, Duration, Instant},
};

/// Build realtime routes
pub fn routes() -> Router<AppContext> {
    Router::new().route("/realtime", get(connect))
}

/// Handshake query parameters
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Access token for clients that cannot send cookies
    pub token: Option<String>,
}

/// WebSocket handler for the realtime channel
///
/// The token is checked before the upgrade request itself, so an
/// unauthenticated client always sees 401.
pub async fn connect(
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(ctx): State<AppContext>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ChatResult<Response> {
    let user_id = authenticate_handshake(&ctx, &headers, params.token)?;

    match ws {
        Ok(ws) => Ok(ws.on_upgrade(move |socket| handle_connection(socket, user_id, ctx))),
        Err(rejection) => Ok(rejection.into_response()),
    }
}

/// Resolve the user behind a handshake, preferring the cookie over `?token=`
fn authenticate_handshake(
    ctx: &AppContext,
    headers: &HeaderMap,
    query_token: Option<String>,
) -> ChatResult<String> {
    let token = cookie_value(headers, ACCESS_COOKIE)
        .or(query_token)
        .ok_or_else(|| ChatError::Authentication("Not authorized, no token".to_string()))?;
    ctx.sessions.authenticate(&token)
}

/// Error type for sending frames
#[derive(Debug)]
enum SendError {
    Timeout,
    Disconnected,
}

/// Drive one realtime connection until either side closes it
async fn handle_connection(socket: WebSocket, user_id: String, ctx: AppContext) {
    let (mut sender, mut receiver) = socket.split();

    let realtime = &ctx.config.realtime;
    let send_timeout = Duration::from_millis(realtime.send_timeout_ms);
    let ping_every = Duration::from_secs(realtime.ping_interval_secs);

    let (outbox, mut events) = mpsc::channel::<ServerEvent>(realtime.outbox_capacity);
    let conn_id = ctx.registry.connect(&user_id, outbox.clone()).await;

    let mut ping_interval = interval(ping_every);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            // Outbox drained into the socket
            Some(event) = events.recv() => {
                match send_event(&mut sender, &event, send_timeout).await {
                    Ok(_) => {
                        last_activity = Instant::now();
                    }
                    Err(SendError::Timeout) => {
                        tracing::warn!(connection = %conn_id, user_id = %user_id, "Send timeout, client may be slow");
                        break;
                    }
                    Err(SendError::Disconnected) => {
                        tracing::debug!(connection = %conn_id, "Client disconnected during send");
                        break;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if last_activity.elapsed() >= ping_every
                    && sender.send(Message::Ping(vec![])).await.is_err()
                {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        handle_client_frame(&ctx, conn_id, &user_id, &text, &outbox).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::debug!(connection = %conn_id, "Client closed connection");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Binary(_))) => {
                        queue(&outbox, ServerEvent::error("Binary frames are not supported"));
                    }
                    Some(Err(e)) => {
                        tracing::debug!(connection = %conn_id, "WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        tracing::debug!(connection = %conn_id, "Client disconnected");
                        break;
                    }
                }
            }
        }
    }

    ctx.registry.disconnect(conn_id).await;
}

/// Apply one client frame
async fn handle_client_frame(
    ctx: &AppContext,
    conn_id: ConnectionId,
    user_id: &str,
    text: &str,
    outbox: &mpsc::Sender<ServerEvent>,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(connection = %conn_id, "Skipping malformed frame: {}", e);
            queue(outbox, ServerEvent::error(format!("Malformed event: {}", e)));
            return;
        }
    };

    match event {
        ClientEvent::JoinGroup(group_id) => match ctx.groups.is_member(&group_id, user_id).await {
            Ok(true) => {
                ctx.registry
                    .join_room(conn_id, RoomId::group(&group_id))
                    .await;
                queue(outbox, ServerEvent::Joined { room_id: group_id });
            }
            Ok(false) => {
                queue(outbox, ServerEvent::error("You are not a member of this group"));
            }
            Err(e) => {
                tracing::error!(connection = %conn_id, group_id = %group_id, "Membership lookup failed: {}", e);
                queue(outbox, ServerEvent::error("Could not join group"));
            }
        },
        ClientEvent::LeaveGroup(group_id) => {
            ctx.registry
                .leave_room(conn_id, &RoomId::group(&group_id))
                .await;
        }
        ClientEvent::Typing(signal) => {
            ctx.broadcaster.relay_typing(conn_id, signal, false).await;
        }
        ClientEvent::StopTyping(signal) => {
            ctx.broadcaster.relay_typing(conn_id, signal, true).await;
        }
    }
}

/// Queue a reply for this connection only
fn queue(outbox: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    if outbox.try_send(event).is_err() {
        tracing::warn!("Outbox full, dropping reply");
    }
}

/// Send an event with timeout
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
    send_timeout: Duration,
) -> Result<(), SendError> {
    let json = serde_json::to_string(event).map_err(|_| SendError::Disconnected)?;

    match timeout(send_timeout, sender.send(Message::Text(json))).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) => Err(SendError::Disconnected),
        Err(_) => Err(SendError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ServerConfig, db};
    use axum::http::HeaderValue;
    use tempfile::TempDir;

    struct Fixture {
        ctx: AppContext,
        _uploads: TempDir,
    }

    async fn fixture() -> Fixture {
        let uploads = TempDir::new().unwrap();
        let mut config = ServerConfig::with_secrets(
            "access-secret-for-tests-0123456789abcdef",
            "refresh-secret-for-tests-0123456789abcdef",
        );
        config.storage.upload_directory = uploads.path().to_path_buf();

        let pool = db::create_memory_pool().await.unwrap();
        let ctx = AppContext::with_pool(config, pool).await.unwrap();
        Fixture {
            ctx,
            _uploads: uploads,
        }
    }

    async fn user(ctx: &AppContext, name: &str) -> String {
        ctx.accounts
            .create(name, &format!("{}@example.com", name), "hunter22")
            .await
            .unwrap()
            .id
    }

    /// Register a connection and drain its presence broadcast
    async fn connect_user(
        ctx: &AppContext,
        user_id: &str,
    ) -> (ConnectionId, mpsc::Sender<ServerEvent>, mpsc::Receiver<ServerEvent>) {
        let (tx, mut rx) = mpsc::channel(16);
        let conn = ctx.registry.connect(user_id, tx.clone()).await;
        assert!(matches!(rx.recv().await, Some(ServerEvent::OnlineSetChanged(_))));
        (conn, tx, rx)
    }

    #[tokio::test]
    async fn test_handshake_requires_valid_token() {
        let f = fixture().await;
        let alice = user(&f.ctx, "alice").await;
        let token = f.ctx.sessions.tokens().issue_access(&alice).unwrap();

        let empty = HeaderMap::new();
        assert!(matches!(
            authenticate_handshake(&f.ctx, &empty, None),
            Err(ChatError::Authentication(_))
        ));
        assert!(authenticate_handshake(&f.ctx, &empty, Some("garbage".to_string())).is_err());
        assert_eq!(
            authenticate_handshake(&f.ctx, &empty, Some(token.clone())).unwrap(),
            alice
        );

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_str(&format!("{}={}", ACCESS_COOKIE, token)).unwrap(),
        );
        assert_eq!(authenticate_handshake(&f.ctx, &headers, None).unwrap(), alice);
    }

    #[tokio::test]
    async fn test_join_group_checks_membership() {
        let f = fixture().await;
        let alice = user(&f.ctx, "alice").await;
        let bob = user(&f.ctx, "bob").await;
        let group = f.ctx.groups.create_group(&alice, "team", &[]).await.unwrap();
        let frame = format!(r#"{{"event":"joinGroup","data":"{}"}}"#, group.id);

        let (bob_conn, bob_tx, mut bob_rx) = connect_user(&f.ctx, &bob).await;
        handle_client_frame(&f.ctx, bob_conn, &bob, &frame, &bob_tx).await;
        assert!(matches!(bob_rx.try_recv(), Ok(ServerEvent::Error { .. })));
        assert!(!f.ctx.registry.is_in_room(bob_conn, &RoomId::group(&group.id)).await);

        let (alice_conn, alice_tx, mut alice_rx) = connect_user(&f.ctx, &alice).await;
        handle_client_frame(&f.ctx, alice_conn, &alice, &frame, &alice_tx).await;
        assert_eq!(
            alice_rx.try_recv().unwrap(),
            ServerEvent::Joined {
                room_id: group.id.clone()
            }
        );
        assert!(f.ctx.registry.is_in_room(alice_conn, &RoomId::group(&group.id)).await);

        // Unknown groups are refused the same way
        handle_client_frame(
            &f.ctx,
            alice_conn,
            &alice,
            r#"{"event":"joinGroup","data":"missing"}"#,
            &alice_tx,
        )
        .await;
        assert!(matches!(alice_rx.try_recv(), Ok(ServerEvent::Error { .. })));
    }

    #[tokio::test]
    async fn test_leave_group_removes_room() {
        let f = fixture().await;
        let alice = user(&f.ctx, "alice").await;
        let group = f.ctx.groups.create_group(&alice, "team", &[]).await.unwrap();
        let room = RoomId::group(&group.id);

        let (conn, tx, mut rx) = connect_user(&f.ctx, &alice).await;
        let join = format!(r#"{{"event":"joinGroup","data":"{}"}}"#, group.id);
        handle_client_frame(&f.ctx, conn, &alice, &join, &tx).await;
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Joined { .. })));
        assert!(f.ctx.registry.is_in_room(conn, &room).await);

        let leave = format!(r#"{{"event":"leaveGroup","data":"{}"}}"#, group.id);
        handle_client_frame(&f.ctx, conn, &alice, &leave, &tx).await;
        assert!(!f.ctx.registry.is_in_room(conn, &room).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_frame_answers_error() {
        let f = fixture().await;
        let alice = user(&f.ctx, "alice").await;
        let (conn, tx, mut rx) = connect_user(&f.ctx, &alice).await;

        for frame in ["not json", r#"{"event":"explode","data":1}"#, r#"{"event":"typing","data":{}}"#] {
            handle_client_frame(&f.ctx, conn, &alice, frame, &tx).await;
            match rx.try_recv() {
                Ok(ServerEvent::Error { message }) => assert!(message.starts_with("Malformed event")),
                other => panic!("unexpected reply: {:?}", other),
            }
        }

        // The connection is still registered and usable
        assert_eq!(f.ctx.registry.connection_count().await, 1);
        let group = f.ctx.groups.create_group(&alice, "team", &[]).await.unwrap();
        let join = format!(r#"{{"event":"joinGroup","data":"{}"}}"#, group.id);
        handle_client_frame(&f.ctx, conn, &alice, &join, &tx).await;
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Joined { .. })));
    }
}
