/// Message ledger
///
/// Durable, append-only record of direct and group messages, plus the
/// persisted form of groups and their membership. Every message is written
/// here before it is published on the realtime channel.

mod store;

pub use store::MessageLedger;

use crate::accounts::UserSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One-to-one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub id: String,
    pub sender: String,
    pub receiver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Message posted to a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessage {
    pub id: String,
    pub group: String,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Direct message as listed in history, with both users resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessageView {
    pub id: String,
    pub sender: UserSummary,
    pub receiver: UserSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Group message as listed in history, with the sender resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessageView {
    pub id: String,
    pub group: String,
    pub sender: UserSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Text and/or file reference of a message being appended
#[derive(Debug, Clone, Default)]
pub struct MessageContent {
    pub message: Option<String>,
    pub file: Option<String>,
}

impl MessageContent {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            file: None,
        }
    }

    pub fn file(file: impl Into<String>) -> Self {
        Self {
            message: None,
            file: Some(file.into()),
        }
    }

    /// Drop blank parts; `None` if nothing meaningful remains
    pub fn normalized(self) -> Option<Self> {
        let message = self.message.filter(|m| !m.trim().is_empty());
        let file = self.file.filter(|f| !f.trim().is_empty());
        if message.is_none() && file.is_none() {
            None
        } else {
            Some(Self { message, file })
        }
    }
}
