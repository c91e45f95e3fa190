/// SQLite-backed message ledger using runtime queries
use crate::{
    accounts::UserSummary,
    error::{ChatError, ChatResult},
    groups::{Group, GroupView},
    ledger::{DirectMessage, DirectMessageView, GroupMessage, GroupMessageView, MessageContent},
    metrics,
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

#[derive(FromRow)]
struct GroupRow {
    id: String,
    name: String,
    created_by: String,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct MemberRow {
    user_id: String,
    is_admin: bool,
}

#[derive(FromRow)]
struct MemberSummaryRow {
    id: String,
    username: String,
    email: String,
    is_admin: bool,
}

impl MemberSummaryRow {
    fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(FromRow)]
struct DirectHistoryRow {
    id: String,
    message: Option<String>,
    file: Option<String>,
    created_at: DateTime<Utc>,
    sender_id: String,
    sender_username: String,
    sender_email: String,
    receiver_id: String,
    receiver_username: String,
    receiver_email: String,
}

impl From<DirectHistoryRow> for DirectMessageView {
    fn from(row: DirectHistoryRow) -> Self {
        Self {
            id: row.id,
            sender: UserSummary {
                id: row.sender_id,
                username: row.sender_username,
                email: row.sender_email,
            },
            receiver: UserSummary {
                id: row.receiver_id,
                username: row.receiver_username,
                email: row.receiver_email,
            },
            message: row.message,
            file: row.file,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct GroupHistoryRow {
    id: String,
    group_id: String,
    message: Option<String>,
    file: Option<String>,
    created_at: DateTime<Utc>,
    sender_id: String,
    sender_username: String,
    sender_email: String,
}

impl From<GroupHistoryRow> for GroupMessageView {
    fn from(row: GroupHistoryRow) -> Self {
        Self {
            id: row.id,
            group: row.group_id,
            sender: UserSummary {
                id: row.sender_id,
                username: row.sender_username,
                email: row.sender_email,
            },
            message: row.message,
            file: row.file,
            created_at: row.created_at,
        }
    }
}

/// Message ledger service
#[derive(Clone)]
pub struct MessageLedger {
    db: SqlitePool,
}

impl MessageLedger {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Persist a direct message
    pub async fn append_direct(
        &self,
        sender: &str,
        receiver: &str,
        content: MessageContent,
    ) -> ChatResult<DirectMessage> {
        let content = content.normalized().ok_or_else(|| {
            ChatError::Validation("Message or file is required".to_string())
        })?;

        let message = DirectMessage {
            id: Uuid::new_v4().to_string(),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            message: content.message,
            file: content.file,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO direct_messages (id, sender, receiver, message, file, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&message.id)
        .bind(&message.sender)
        .bind(&message.receiver)
        .bind(&message.message)
        .bind(&message.file)
        .bind(message.created_at)
        .execute(&self.db)
        .await?;

        metrics::MESSAGES_PERSISTED_TOTAL
            .with_label_values(&["direct"])
            .inc();
        tracing::debug!(message_id = %message.id, sender, receiver, "direct message stored");

        Ok(message)
    }

    /// All messages exchanged between two users, oldest first
    pub async fn conversation(&self, a: &str, b: &str) -> ChatResult<Vec<DirectMessageView>> {
        let rows = sqlx::query_as::<_, DirectHistoryRow>(
            "SELECT m.id, m.message, m.file, m.created_at,
                    s.id AS sender_id, s.username AS sender_username, s.email AS sender_email,
                    r.id AS receiver_id, r.username AS receiver_username, r.email AS receiver_email
             FROM direct_messages m
             JOIN users s ON s.id = m.sender
             JOIN users r ON r.id = m.receiver
             WHERE (m.sender = ?1 AND m.receiver = ?2) OR (m.sender = ?2 AND m.receiver = ?1)
             ORDER BY m.created_at ASC, m.rowid ASC",
        )
        .bind(a)
        .bind(b)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(DirectMessageView::from).collect())
    }

    /// Persist a message posted to a group
    pub async fn append_group_message(
        &self,
        group_id: &str,
        sender: &str,
        content: MessageContent,
    ) -> ChatResult<GroupMessage> {
        let content = content.normalized().ok_or_else(|| {
            ChatError::Validation("Message or file is required".to_string())
        })?;

        let message = GroupMessage {
            id: Uuid::new_v4().to_string(),
            group: group_id.to_string(),
            sender: sender.to_string(),
            message: content.message,
            file: content.file,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO group_messages (id, group_id, sender, message, file, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&message.id)
        .bind(&message.group)
        .bind(&message.sender)
        .bind(&message.message)
        .bind(&message.file)
        .bind(message.created_at)
        .execute(&self.db)
        .await?;

        metrics::MESSAGES_PERSISTED_TOTAL
            .with_label_values(&["group"])
            .inc();
        tracing::debug!(message_id = %message.id, group_id, sender, "group message stored");

        Ok(message)
    }

    /// Group history, oldest first
    pub async fn group_messages(&self, group_id: &str) -> ChatResult<Vec<GroupMessageView>> {
        let rows = sqlx::query_as::<_, GroupHistoryRow>(
            "SELECT m.id, m.group_id, m.message, m.file, m.created_at,
                    s.id AS sender_id, s.username AS sender_username, s.email AS sender_email
             FROM group_messages m
             JOIN users s ON s.id = m.sender
             WHERE m.group_id = ?1
             ORDER BY m.created_at ASC, m.rowid ASC",
        )
        .bind(group_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(GroupMessageView::from).collect())
    }

    /// Persist a new group with its initial membership
    pub async fn insert_group(&self, group: &Group) -> ChatResult<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO groups (id, name, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&group.id)
        .bind(&group.name)
        .bind(&group.created_by)
        .bind(group.created_at)
        .execute(&mut *tx)
        .await?;

        Self::write_members(&mut tx, group).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Load a group and its ordered membership
    pub async fn find_group(&self, group_id: &str) -> ChatResult<Option<Group>> {
        let row = sqlx::query_as::<_, GroupRow>(
            "SELECT id, name, created_by, created_at FROM groups WHERE id = ?1",
        )
        .bind(group_id)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let members = sqlx::query_as::<_, MemberRow>(
            "SELECT user_id, is_admin FROM group_members WHERE group_id = ?1 ORDER BY position ASC",
        )
        .bind(group_id)
        .fetch_all(&self.db)
        .await?;

        let admins = members
            .iter()
            .filter(|m| m.is_admin)
            .map(|m| m.user_id.clone())
            .collect();

        Ok(Some(Group {
            id: row.id,
            name: row.name,
            members: members.into_iter().map(|m| m.user_id).collect(),
            admins,
            created_by: row.created_by,
            created_at: row.created_at,
        }))
    }

    /// Overwrite the stored membership of a group with `group`'s lists
    pub async fn replace_membership(&self, group: &Group) -> ChatResult<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM group_members WHERE group_id = ?1")
            .bind(&group.id)
            .execute(&mut *tx)
            .await?;

        Self::write_members(&mut tx, group).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Groups the user is a member of, oldest first, with users resolved
    pub async fn groups_for_member(&self, user_id: &str) -> ChatResult<Vec<GroupView>> {
        let rows = sqlx::query_as::<_, GroupRow>(
            "SELECT g.id, g.name, g.created_by, g.created_at FROM groups g
             JOIN group_members m ON m.group_id = g.id
             WHERE m.user_id = ?1
             ORDER BY g.created_at ASC, g.rowid ASC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            let members = sqlx::query_as::<_, MemberSummaryRow>(
                "SELECT u.id, u.username, u.email, m.is_admin
                 FROM group_members m
                 JOIN users u ON u.id = m.user_id
                 WHERE m.group_id = ?1
                 ORDER BY m.position ASC",
            )
            .bind(&row.id)
            .fetch_all(&self.db)
            .await?;

            groups.push(GroupView {
                admins: members.iter().filter(|m| m.is_admin).map(MemberSummaryRow::summary).collect(),
                members: members.iter().map(MemberSummaryRow::summary).collect(),
                id: row.id,
                name: row.name,
                created_by: row.created_by,
                created_at: row.created_at,
            });
        }

        Ok(groups)
    }

    async fn write_members(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        group: &Group,
    ) -> ChatResult<()> {
        for (position, user_id) in group.members.iter().enumerate() {
            sqlx::query(
                "INSERT INTO group_members (group_id, user_id, position, is_admin)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&group.id)
            .bind(user_id)
            .bind(position as i64)
            .bind(group.is_admin(user_id))
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }
}
