/// Typed client SDK for the Parley server
///
/// [`ChatClient`] keeps the session cookies in a shared jar and routes every
/// authenticated REST call through a [`RequestCoordinator`], so an expired
/// access token is refreshed once and the call retried transparently.
/// [`ChatClient::connect_realtime`] opens the WebSocket channel with the
/// same cookies.
pub mod coordinator;
pub mod realtime;
pub mod typing;

pub use coordinator::{Refresher, RequestCoordinator};
pub use realtime::RealtimeClient;
pub use typing::{TypingIndicators, TYPING_TIMEOUT};

use crate::{
    accounts::{LoginRequest, RegisterRequest, UserResponse, UserView},
    error::ErrorResponse,
    groups::{Group, GroupView},
    ledger::{DirectMessage, DirectMessageView, GroupMessage, GroupMessageView},
    realtime::ServerEvent,
};
use async_trait::async_trait;
use reqwest::{
    cookie::{CookieStore, Jar},
    multipart::{Form, Part},
    Client, Response, StatusCode, Url,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Client-side errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server rejected the access token
    #[error("Not authenticated")]
    Unauthenticated,

    /// Refresh failed; the user has to log in again
    #[error("Session expired, please log in again")]
    SessionExpired,

    /// Any other non-success response
    #[error("Request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// A message received over the realtime channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    Direct(DirectMessage),
    Group(GroupMessage),
}

impl ChatMessage {
    /// Extract the message carried by a delivery event
    pub fn from_event(event: &ServerEvent) -> Option<Self> {
        match event {
            ServerEvent::ReceiveMessage(m) => Some(ChatMessage::Direct(m.clone())),
            ServerEvent::ReceiveGroupMessage(m) => Some(ChatMessage::Group(m.clone())),
            _ => None,
        }
    }

    pub fn sender(&self) -> &str {
        match self {
            ChatMessage::Direct(m) => &m.sender,
            ChatMessage::Group(m) => &m.sender,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            ChatMessage::Direct(m) => m.message.as_deref(),
            ChatMessage::Group(m) => m.message.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: UserView,
}

#[derive(Debug, Deserialize)]
struct GroupEnvelope {
    group: Group,
}

/// Refreshes the session through `POST /api/auth/refresh-token`
pub struct HttpRefresher {
    http: Client,
    url: Url,
}

#[async_trait]
impl Refresher for HttpRefresher {
    async fn refresh(&self) -> ClientResult<()> {
        let response = self.http.post(self.url.clone()).send().await?;
        let _: serde_json::Value = decode(response).await?;
        Ok(())
    }
}

/// Map a response to `T`, or to the matching [`ClientError`]
async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ClientError::Unauthenticated);
    }
    if !status.is_success() {
        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.message,
            Err(_) => status.canonical_reason().unwrap_or("Unknown error").to_string(),
        };
        return Err(ClientError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response.json().await?)
}

/// A file attached to an upload
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }

    fn part(&self) -> Part {
        Part::bytes(self.data.clone()).file_name(self.file_name.clone())
    }
}

/// HTTP and realtime client for one user session
pub struct ChatClient {
    http: Client,
    jar: Arc<Jar>,
    base_url: Url,
    coordinator: RequestCoordinator<HttpRefresher>,
}

impl ChatClient {
    /// Create a client for the server at `base_url`, e.g. `http://localhost:3000`
    pub fn new(base_url: &str) -> ClientResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| ClientError::Other(e.into()))?;
        let jar = Arc::new(Jar::default());
        let http = Client::builder()
            .cookie_provider(jar.clone())
            .user_agent(concat!("parley-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let refresher = HttpRefresher {
            http: http.clone(),
            url: join(&base_url, "/api/auth/refresh-token")?,
        };

        Ok(Self {
            http,
            jar,
            base_url,
            coordinator: RequestCoordinator::new(refresher),
        })
    }

    pub fn coordinator(&self) -> &RequestCoordinator<HttpRefresher> {
        &self.coordinator
    }

    fn url(&self, path: &str) -> ClientResult<Url> {
        join(&self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let url = self.url(path)?;
        self.coordinator
            .execute(|| async { decode(self.http.get(url.clone()).send().await?).await })
            .await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> ClientResult<T> {
        let url = self.url(path)?;
        self.coordinator
            .execute(|| async {
                decode(self.http.post(url.clone()).json(&body).send().await?).await
            })
            .await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let url = self.url(path)?;
        self.coordinator
            .execute(|| async { decode(self.http.delete(url.clone()).send().await?).await })
            .await
    }

    /// Multipart POST; the form is rebuilt for the retry
    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        fields: &[(&str, String)],
        file: Option<&Attachment>,
    ) -> ClientResult<T> {
        let url = self.url(path)?;
        self.coordinator
            .execute(|| async {
                let mut form = Form::new();
                for (name, value) in fields {
                    form = form.text(name.to_string(), value.clone());
                }
                if let Some(file) = file {
                    form = form.part("file", file.part());
                }
                decode(self.http.post(url.clone()).multipart(form).send().await?).await
            })
            .await
    }

    // Accounts and session

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> ClientResult<UserView> {
        let request = RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self
            .http
            .post(self.url("/api/auth/register")?)
            .json(&request)
            .send()
            .await?;
        let body: UserResponse = decode(response).await?;
        Ok(body.user)
    }

    /// Log in; the session cookies land in the jar
    pub async fn login(&self, email: &str, password: &str) -> ClientResult<UserView> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self
            .http
            .post(self.url("/api/auth/login")?)
            .json(&request)
            .send()
            .await?;
        let body: UserResponse = decode(response).await?;
        self.coordinator.reset();
        Ok(body.user)
    }

    pub async fn logout(&self) -> ClientResult<()> {
        let response = self
            .http
            .post(self.url("/api/auth/logout")?)
            .send()
            .await?;
        let _: serde_json::Value = decode(response).await?;
        Ok(())
    }

    pub async fn me(&self) -> ClientResult<UserView> {
        let body: UserEnvelope = self.get("/api/auth/me").await?;
        Ok(body.user)
    }

    /// Every user except the caller
    pub async fn users(&self) -> ClientResult<Vec<UserView>> {
        self.get("/api/auth/users").await
    }

    // Direct messages

    pub async fn send_message(&self, receiver: &str, message: &str) -> ClientResult<DirectMessage> {
        self.post(
            "/api/messages/send",
            json!({ "receiver": receiver, "message": message }),
        )
        .await
    }

    pub async fn conversation(&self, user_id: &str) -> ClientResult<Vec<DirectMessageView>> {
        self.get(&format!("/api/messages/{}", user_id)).await
    }

    pub async fn upload_file(
        &self,
        receiver: &str,
        file: &Attachment,
    ) -> ClientResult<DirectMessage> {
        self.post_form(
            "/api/files/upload",
            &[("receiver", receiver.to_string())],
            Some(file),
        )
        .await
    }

    // Groups

    pub async fn create_group(&self, name: &str, members: &[String]) -> ClientResult<Group> {
        let body: GroupEnvelope = self
            .post(
                "/api/groups/create",
                json!({ "name": name, "members": members }),
            )
            .await?;
        Ok(body.group)
    }

    pub async fn my_groups(&self) -> ClientResult<Vec<GroupView>> {
        self.get("/api/groups/my-groups").await
    }

    pub async fn add_member(&self, group_id: &str, member_id: &str) -> ClientResult<Group> {
        let body: GroupEnvelope = self
            .post(
                &format!("/api/groups/{}/add-member", group_id),
                json!({ "memberId": member_id }),
            )
            .await?;
        Ok(body.group)
    }

    pub async fn assign_admin(&self, group_id: &str, member_id: &str) -> ClientResult<Group> {
        let body: GroupEnvelope = self
            .post(
                &format!("/api/groups/{}/assign-admin", group_id),
                json!({ "memberId": member_id }),
            )
            .await?;
        Ok(body.group)
    }

    pub async fn remove_admin(&self, group_id: &str, admin_id: &str) -> ClientResult<Group> {
        let body: GroupEnvelope = self
            .delete(&format!("/api/groups/{}/remove-admin/{}", group_id, admin_id))
            .await?;
        Ok(body.group)
    }

    pub async fn remove_member(&self, group_id: &str, member_id: &str) -> ClientResult<Group> {
        let body: GroupEnvelope = self
            .delete(&format!("/api/groups/{}/remove-member/{}", group_id, member_id))
            .await?;
        Ok(body.group)
    }

    /// Post text, a file, or both to a group
    pub async fn send_group_message(
        &self,
        group_id: &str,
        message: Option<&str>,
        file: Option<&Attachment>,
    ) -> ClientResult<GroupMessage> {
        let fields: Vec<(&str, String)> = message
            .map(|m| vec![("message", m.to_string())])
            .unwrap_or_default();
        self.post_form(&format!("/api/groups/{}/send", group_id), &fields, file)
            .await
    }

    pub async fn group_messages(&self, group_id: &str) -> ClientResult<Vec<GroupMessageView>> {
        self.get(&format!("/api/groups/{}/messages", group_id)).await
    }

    // Realtime

    /// Open the realtime channel, refreshing once if the access token is stale
    pub async fn connect_realtime(
        &self,
    ) -> ClientResult<(RealtimeClient, mpsc::Receiver<ServerEvent>)> {
        let mut ws_url = self.url("/realtime")?;
        let scheme = if self.base_url.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        ws_url
            .set_scheme(scheme)
            .map_err(|_| ClientError::Other(anyhow::anyhow!("cannot derive WebSocket URL")))?;

        self.coordinator
            .execute(|| async {
                let cookie = self.cookie_header()?;
                RealtimeClient::connect(ws_url.as_str(), cookie.as_deref()).await
            })
            .await
    }

    /// Current `Cookie` header for the server
    fn cookie_header(&self) -> ClientResult<Option<String>> {
        match self.jar.cookies(&self.base_url) {
            Some(value) => {
                let value = value
                    .to_str()
                    .map_err(|e| ClientError::Other(e.into()))?
                    .to_string();
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

fn join(base: &Url, path: &str) -> ClientResult<Url> {
    base.join(path).map_err(|e| ClientError::Other(e.into()))
}
