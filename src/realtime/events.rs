/// Realtime wire events
///
/// Frames are JSON objects of the form `{"event": <name>, "data": <payload>}`.
use crate::ledger::{DirectMessage, GroupMessage};
use serde::{Deserialize, Serialize};

/// Typing indicator payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    /// Receiving user id, or group id when `is_group` is set
    pub target_id: String,
    /// Display name of the typing user
    pub username: String,
    #[serde(default)]
    pub is_group: bool,
}

/// Server to client events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "receiveMessage")]
    ReceiveMessage(DirectMessage),
    #[serde(rename = "receiveGroupMessage")]
    ReceiveGroupMessage(GroupMessage),
    #[serde(rename = "typing")]
    Typing(TypingSignal),
    #[serde(rename = "stop-typing")]
    StopTyping(TypingSignal),
    /// Full sorted online set, sent when a user comes online
    #[serde(rename = "online-set-changed")]
    OnlineSetChanged(Vec<String>),
    #[serde(rename = "user-offline")]
    UserOffline {
        #[serde(rename = "userId")]
        user_id: String,
    },
    /// Acknowledges a joinGroup request
    #[serde(rename = "joined")]
    Joined {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent {
    /// Wire name of the event, used as a metrics label
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ReceiveMessage(_) => "receiveMessage",
            ServerEvent::ReceiveGroupMessage(_) => "receiveGroupMessage",
            ServerEvent::Typing(_) => "typing",
            ServerEvent::StopTyping(_) => "stop-typing",
            ServerEvent::OnlineSetChanged(_) => "online-set-changed",
            ServerEvent::UserOffline { .. } => "user-offline",
            ServerEvent::Joined { .. } => "joined",
            ServerEvent::Error { .. } => "error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }
}

/// Client to server events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Join the room of a group the user belongs to
    #[serde(rename = "joinGroup")]
    JoinGroup(String),
    #[serde(rename = "leaveGroup")]
    LeaveGroup(String),
    #[serde(rename = "typing")]
    Typing(TypingSignal),
    #[serde(rename = "stop-typing")]
    StopTyping(TypingSignal),
}
