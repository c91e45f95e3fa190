//! End-to-end tests driving the full router in memory

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use parley::{
    db,
    realtime::{RoomId, ServerEvent},
    server::build_router,
    AppContext, ServerConfig,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

struct TestApp {
    ctx: AppContext,
    router: Router,
    uploads: TempDir,
}

/// Cookies of one logged-in user
#[derive(Clone)]
struct Session {
    user_id: String,
    access: String,
    refresh: String,
}

impl Session {
    fn cookie(&self) -> String {
        format!("accessToken={}; refreshToken={}", self.access, self.refresh)
    }
}

struct Reply {
    status: StatusCode,
    cookies: Vec<(String, String)>,
    body: Value,
}

impl Reply {
    fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

async fn setup() -> TestApp {
    setup_with(|_| {}).await
}

async fn setup_with(configure: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let uploads = TempDir::new().unwrap();
    let mut config = ServerConfig::with_secrets(
        "integration-access-secret-0123456789abcdef",
        "integration-refresh-secret-0123456789abcdef",
    );
    config.storage.upload_directory = uploads.path().to_path_buf();
    config.rate_limit.enabled = false;
    configure(&mut config);

    let pool = db::create_memory_pool().await.unwrap();
    let ctx = AppContext::with_pool(config, pool).await.unwrap();
    let router = build_router(ctx.clone());

    TestApp {
        ctx,
        router,
        uploads,
    }
}

impl TestApp {
    async fn call(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.dispatch(request).await
    }

    /// Post a multipart form with text fields and an optional `file` part
    async fn send_form(
        &self,
        uri: &str,
        cookie: &str,
        fields: &[(&str, &str)],
        file: Option<(&str, &[u8])>,
    ) -> Reply {
        let boundary = "parley-test-boundary";
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    boundary, name, value
                )
                .as_bytes(),
            );
        }
        if let Some((file_name, data)) = file {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    boundary, file_name
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::COOKIE, cookie)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();
        self.dispatch(request).await
    }

    async fn dispatch(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let cookies = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .filter_map(|pair| pair.split_once('='))
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        Reply {
            status,
            cookies,
            body,
        }
    }

    /// Names of the files currently in the upload directory
    fn stored_uploads(&self) -> Vec<String> {
        std::fs::read_dir(self.uploads.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect()
    }

    async fn register_and_login(&self, username: &str) -> Session {
        let email = format!("{}@example.com", username);
        let reply = self
            .call(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "username": username, "email": email, "password": "hunter22" })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED);

        let reply = self
            .call(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": email, "password": "hunter22" })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK);

        Session {
            user_id: reply.body["user"]["id"].as_str().unwrap().to_string(),
            access: reply.cookie("accessToken").unwrap().to_string(),
            refresh: reply.cookie("refreshToken").unwrap().to_string(),
        }
    }

    async fn create_group(&self, owner: &Session, name: &str, members: &[&str]) -> Value {
        let reply = self
            .call(
                Method::POST,
                "/api/groups/create",
                Some(&owner.cookie()),
                Some(json!({ "name": name, "members": members })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED);
        reply.body["group"].clone()
    }
}

#[tokio::test]
async fn test_register_login_me() {
    let app = setup().await;
    let alice = app.register_and_login("alice").await;

    let reply = app
        .call(Method::GET, "/api/auth/me", Some(&alice.cookie()), None)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["user"]["username"], "alice");
    assert!(reply.body["user"].get("passwordHash").is_none());
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let app = setup().await;
    app.register_and_login("alice").await;

    let reply = app
        .call(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "username": "alice2", "email": "alice@example.com", "password": "hunter22" })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_wrong_password_rejected() {
    let app = setup().await;
    app.register_and_login("alice").await;

    let reply = app
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "alice@example.com", "password": "wrong-password" })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.cookie("accessToken").is_none());
}

#[tokio::test]
async fn test_protected_route_requires_cookie() {
    let app = setup().await;

    let reply = app.call(Method::GET, "/api/auth/me", None, None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let reply = app
        .call(Method::GET, "/api/auth/me", Some("accessToken=garbage"), None)
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_issues_new_access_token() {
    let app = setup().await;
    let alice = app.register_and_login("alice").await;

    let cookie = format!("refreshToken={}", alice.refresh);
    let reply = app
        .call(Method::POST, "/api/auth/refresh-token", Some(&cookie), None)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    let access = reply.cookie("accessToken").unwrap().to_string();

    let reply = app
        .call(
            Method::GET,
            "/api/auth/me",
            Some(&format!("accessToken={}", access)),
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);

    // No cookie, or an access token in its place, is refused
    let reply = app
        .call(Method::POST, "/api/auth/refresh-token", None, None)
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let forged = format!("refreshToken={}", alice.access);
    let reply = app
        .call(Method::POST, "/api/auth/refresh-token", Some(&forged), None)
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_revokes_refresh_token() {
    let app = setup().await;
    let alice = app.register_and_login("alice").await;

    let reply = app
        .call(Method::POST, "/api/auth/logout", Some(&alice.cookie()), None)
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.cookie("accessToken"), Some(""));

    let cookie = format!("refreshToken={}", alice.refresh);
    let reply = app
        .call(Method::POST, "/api/auth/refresh-token", Some(&cookie), None)
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_users_excludes_caller() {
    let app = setup().await;
    let alice = app.register_and_login("alice").await;
    app.register_and_login("bob").await;

    let reply = app
        .call(Method::GET, "/api/auth/users", Some(&alice.cookie()), None)
        .await;
    let users = reply.body.as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["username"], "bob");
}

#[tokio::test]
async fn test_direct_message_persisted_and_delivered() {
    let app = setup().await;
    let alice = app.register_and_login("alice").await;
    let bob = app.register_and_login("bob").await;

    let (tx, mut rx) = mpsc::channel(16);
    app.ctx.registry.connect(&bob.user_id, tx).await;
    // Drain the presence broadcast
    assert!(matches!(rx.recv().await, Some(ServerEvent::OnlineSetChanged(_))));

    let reply = app
        .call(
            Method::POST,
            "/api/messages/send",
            Some(&alice.cookie()),
            Some(json!({ "receiver": bob.user_id, "message": "hello bob" })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["message"], "hello bob");

    match rx.recv().await {
        Some(ServerEvent::ReceiveMessage(message)) => {
            assert_eq!(message.sender, alice.user_id);
            assert_eq!(message.message.as_deref(), Some("hello bob"));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // Both sides see the same conversation
    let uri = format!("/api/messages/{}", alice.user_id);
    let reply = app.call(Method::GET, &uri, Some(&bob.cookie()), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    let history = reply.body.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["sender"]["id"], alice.user_id.as_str());
    assert_eq!(history[0]["sender"]["username"], "alice");
    assert_eq!(history[0]["receiver"]["email"], "bob@example.com");
    assert!(history[0]["sender"].get("passwordHash").is_none());
}

#[tokio::test]
async fn test_message_to_unknown_user_rejected() {
    let app = setup().await;
    let alice = app.register_and_login("alice").await;

    let reply = app
        .call(
            Method::POST,
            "/api/messages/send",
            Some(&alice.cookie()),
            Some(json!({ "receiver": "nobody", "message": "hi" })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let reply = app
        .call(
            Method::POST,
            "/api/messages/send",
            Some(&alice.cookie()),
            Some(json!({ "receiver": alice.user_id, "message": "   " })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_group_admin_cannot_remove_members() {
    let app = setup().await;
    let alice = app.register_and_login("alice").await;
    let bob = app.register_and_login("bob").await;
    let carol = app.register_and_login("carol").await;

    let group = app
        .create_group(&alice, "team", &[&bob.user_id, &carol.user_id])
        .await;
    let group_id = group["id"].as_str().unwrap().to_string();
    assert_eq!(group["createdBy"], alice.user_id.as_str());

    let reply = app
        .call(
            Method::POST,
            &format!("/api/groups/{}/assign-admin", group_id),
            Some(&alice.cookie()),
            Some(json!({ "memberId": bob.user_id })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);

    // Admins add but only the creator removes
    let reply = app
        .call(
            Method::DELETE,
            &format!("/api/groups/{}/remove-member/{}", group_id, carol.user_id),
            Some(&bob.cookie()),
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = app
        .call(Method::GET, "/api/groups/my-groups", Some(&carol.cookie()), None)
        .await;
    let groups = reply.body.as_array().unwrap();
    assert_eq!(groups.len(), 1);
    let usernames: Vec<&str> = groups[0]["members"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["username"].as_str().unwrap())
        .collect();
    assert_eq!(usernames, vec!["bob", "carol", "alice"]);
    let admins: Vec<&str> = groups[0]["admins"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["email"].as_str().unwrap())
        .collect();
    assert_eq!(admins, vec!["bob@example.com", "alice@example.com"]);

    let reply = app
        .call(
            Method::DELETE,
            &format!("/api/groups/{}/remove-member/{}", group_id, carol.user_id),
            Some(&alice.cookie()),
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    let members = reply.body["group"]["members"].as_array().unwrap();
    assert!(!members.iter().any(|m| m == carol.user_id.as_str()));
}

#[tokio::test]
async fn test_group_membership_guards() {
    let app = setup().await;
    let alice = app.register_and_login("alice").await;
    let bob = app.register_and_login("bob").await;
    let carol = app.register_and_login("carol").await;

    let group = app.create_group(&alice, "team", &[&bob.user_id]).await;
    let group_id = group["id"].as_str().unwrap().to_string();

    // Only members can be promoted
    let reply = app
        .call(
            Method::POST,
            &format!("/api/groups/{}/assign-admin", group_id),
            Some(&alice.cookie()),
            Some(json!({ "memberId": carol.user_id })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    // Plain members cannot add
    let reply = app
        .call(
            Method::POST,
            &format!("/api/groups/{}/add-member", group_id),
            Some(&bob.cookie()),
            Some(json!({ "memberId": carol.user_id })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    // Outsiders cannot read
    let reply = app
        .call(
            Method::GET,
            &format!("/api/groups/{}/messages", group_id),
            Some(&carol.cookie()),
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);

    let reply = app
        .call(
            Method::GET,
            "/api/groups/missing/messages",
            Some(&alice.cookie()),
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_group_message_reaches_joined_members() {
    let app = setup().await;
    let alice = app.register_and_login("alice").await;
    let bob = app.register_and_login("bob").await;

    let group = app.create_group(&alice, "team", &[&bob.user_id]).await;
    let group_id = group["id"].as_str().unwrap().to_string();

    let (tx, mut rx) = mpsc::channel(16);
    let conn = app.ctx.registry.connect(&bob.user_id, tx).await;
    assert!(matches!(rx.recv().await, Some(ServerEvent::OnlineSetChanged(_))));
    assert!(app.ctx.registry.join_room(conn, RoomId::group(&group_id)).await);

    let reply = app
        .send_form(
            &format!("/api/groups/{}/send", group_id),
            &alice.cookie(),
            &[("message", "stand-up in 5")],
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::CREATED);

    match rx.recv().await {
        Some(ServerEvent::ReceiveGroupMessage(message)) => {
            assert_eq!(message.group, group_id);
            assert_eq!(message.message.as_deref(), Some("stand-up in 5"));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let reply = app
        .call(
            Method::GET,
            &format!("/api/groups/{}/messages", group_id),
            Some(&bob.cookie()),
            None,
        )
        .await;
    let history = reply.body.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["group"], group_id.as_str());
    assert_eq!(history[0]["sender"]["username"], "alice");
}

#[tokio::test]
async fn test_health_and_fallback() {
    let app = setup().await;

    let reply = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["status"], "ok");
    assert_eq!(reply.body["connections"], 0);

    let reply = app.call(Method::GET, "/api/nope", None, None).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_configured_version() {
    let app = setup_with(|config| config.service.version = "9.9.9-test".to_string()).await;

    for uri in ["/health", "/health/live", "/health/ready"] {
        let reply = app.call(Method::GET, uri, None, None).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["version"], "9.9.9-test", "{}", uri);
    }
}

#[tokio::test]
async fn test_realtime_handshake_requires_token() {
    let app = setup().await;

    let reply = app.call(Method::GET, "/realtime", None, None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let reply = app
        .call(Method::GET, "/realtime?token=not-a-jwt", None, None)
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let reply = app
        .call(Method::GET, "/realtime", Some("accessToken=forged"), None)
        .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_upload_requires_receiver_and_file() {
    let app = setup().await;
    let alice = app.register_and_login("alice").await;
    let bob = app.register_and_login("bob").await;

    let reply = app
        .send_form(
            "/api/files/upload",
            &alice.cookie(),
            &[],
            Some(("notes.txt", &b"hello"[..])),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let reply = app
        .send_form(
            "/api/files/upload",
            &alice.cookie(),
            &[("receiver", bob.user_id.as_str())],
            None,
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let reply = app
        .send_form(
            "/api/files/upload",
            &alice.cookie(),
            &[("receiver", "nobody")],
            Some(("notes.txt", &b"hello"[..])),
        )
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert!(app.stored_uploads().is_empty());
}

#[tokio::test]
async fn test_upload_delivers_file_message() {
    let app = setup().await;
    let alice = app.register_and_login("alice").await;
    let bob = app.register_and_login("bob").await;

    let (tx, mut rx) = mpsc::channel(16);
    app.ctx.registry.connect(&bob.user_id, tx).await;
    assert!(matches!(rx.recv().await, Some(ServerEvent::OnlineSetChanged(_))));

    let reply = app
        .send_form(
            "/api/files/upload",
            &alice.cookie(),
            &[("receiver", bob.user_id.as_str())],
            Some(("photo.png", &b"png bytes"[..])),
        )
        .await;
    assert_eq!(reply.status, StatusCode::CREATED);
    let file_ref = reply.body["file"].as_str().unwrap().to_string();
    assert!(file_ref.starts_with("/uploads/"));
    assert!(file_ref.ends_with(".png"));
    assert_eq!(reply.body["receiver"], bob.user_id.as_str());

    let stored = app.stored_uploads();
    assert_eq!(stored.len(), 1);
    assert_eq!(file_ref, format!("/uploads/{}", stored[0]));

    match rx.recv().await {
        Some(ServerEvent::ReceiveMessage(message)) => {
            assert_eq!(message.sender, alice.user_id);
            assert_eq!(message.file.as_deref(), Some(file_ref.as_str()));
            assert_eq!(message.message, None);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // The stored file is served back under its reference
    let reply = app
        .dispatch(
            Request::builder()
                .uri(file_ref.as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn test_rejected_group_upload_leaves_no_file() {
    let app = setup().await;
    let alice = app.register_and_login("alice").await;
    let carol = app.register_and_login("carol").await;

    let group = app.create_group(&alice, "team", &[]).await;
    let group_id = group["id"].as_str().unwrap().to_string();

    let reply = app
        .send_form(
            &format!("/api/groups/{}/send", group_id),
            &carol.cookie(),
            &[("message", "let me in")],
            Some(("notes.txt", &b"hello"[..])),
        )
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert!(app.stored_uploads().is_empty());
}
