/// Realtime client over tokio-tungstenite
///
/// Yields typed [`ServerEvent`]s on a channel and accepts [`ClientEvent`]s.
/// Malformed server frames are logged and skipped.
use super::{ClientError, ClientResult};
use crate::realtime::{ClientEvent, ServerEvent, TypingSignal};
use futures_util::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
};
use tracing::{debug, warn};

const BUFFER_SIZE: usize = 100;

/// Handle to an open realtime connection
pub struct RealtimeClient {
    outgoing: mpsc::Sender<ClientEvent>,
    task: JoinHandle<()>,
}

impl RealtimeClient {
    /// Connect to `ws_url`, authenticating with the given `Cookie` header value
    pub async fn connect(
        ws_url: &str,
        cookie: Option<&str>,
    ) -> ClientResult<(Self, mpsc::Receiver<ServerEvent>)> {
        let mut request = ws_url
            .into_client_request()
            .map_err(|e| ClientError::Other(e.into()))?;
        if let Some(cookie) = cookie {
            let value = HeaderValue::from_str(cookie).map_err(|e| ClientError::Other(e.into()))?;
            request.headers_mut().insert("cookie", value);
        }

        let (stream, _) = connect_async(request).await.map_err(|e| match e {
            tokio_tungstenite::tungstenite::Error::Http(response)
                if response.status().as_u16() == 401 =>
            {
                ClientError::Unauthenticated
            }
            other => ClientError::Other(other.into()),
        })?;
        debug!(url = ws_url, "realtime connected");

        let (events_tx, events_rx) = mpsc::channel(BUFFER_SIZE);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<ClientEvent>(BUFFER_SIZE);
        let (mut sink, mut source) = stream.split();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = outgoing_rx.recv() => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!("Failed to encode client event: {}", e);
                                continue;
                            }
                        };
                        if sink.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }

                    msg = source.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let Some(event) = parse_frame(&text) else {
                                    continue;
                                };
                                if events_tx.send(event).await.is_err() {
                                    debug!("Event receiver dropped");
                                    break;
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if sink.send(Message::Pong(data)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Server closed realtime connection");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("Realtime connection error: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok((
            Self {
                outgoing: outgoing_tx,
                task,
            },
            events_rx,
        ))
    }

    /// Queue an event for the server
    pub async fn send(&self, event: ClientEvent) -> ClientResult<()> {
        self.outgoing
            .send(event)
            .await
            .map_err(|_| ClientError::Other(anyhow::anyhow!("realtime connection closed")))
    }

    pub async fn join_group(&self, group_id: &str) -> ClientResult<()> {
        self.send(ClientEvent::JoinGroup(group_id.to_string())).await
    }

    pub async fn leave_group(&self, group_id: &str) -> ClientResult<()> {
        self.send(ClientEvent::LeaveGroup(group_id.to_string())).await
    }

    pub async fn typing(&self, signal: TypingSignal) -> ClientResult<()> {
        self.send(ClientEvent::Typing(signal)).await
    }

    pub async fn stop_typing(&self, signal: TypingSignal) -> ClientResult<()> {
        self.send(ClientEvent::StopTyping(signal)).await
    }

    /// Close the connection
    pub fn close(self) {
        self.task.abort();
    }
}

/// Decode one server frame, skipping anything malformed
pub fn parse_frame(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Skipping malformed realtime frame: {}", e);
            None
        }
    }
}
