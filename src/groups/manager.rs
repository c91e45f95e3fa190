/// Group manager: serialized, persisted group mutations
use crate::{
    accounts::AccountManager,
    error::{ChatError, ChatResult},
    groups::{Group, GroupRole, GroupView},
    ledger::{GroupMessage, GroupMessageView, MessageContent, MessageLedger},
    realtime::{RoomBroadcaster, RoomId},
};
use chrono::Utc;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Group manager service
#[derive(Clone)]
pub struct GroupManager {
    ledger: MessageLedger,
    accounts: AccountManager,
    broadcaster: RoomBroadcaster,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl GroupManager {
    pub fn new(ledger: MessageLedger, accounts: AccountManager, broadcaster: RoomBroadcaster) -> Self {
        Self {
            ledger,
            accounts,
            broadcaster,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Lock guarding read-modify-write of one group's membership
    async fn group_lock(&self, group_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(group_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once no other caller holds it
    async fn release_lock(&self, group_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        let mut locks = self.locks.lock().await;
        if locks
            .get(group_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(group_id);
        }
    }

    async fn load(&self, group_id: &str) -> ChatResult<Group> {
        self.ledger
            .find_group(group_id)
            .await?
            .ok_or_else(|| ChatError::NotFound("Group not found".to_string()))
    }

    /// Load, mutate and persist a group under its lock
    ///
    /// Unknown groups fail with `NotFound` before a lock entry is created.
    async fn mutate<F>(&self, group_id: &str, apply: F) -> ChatResult<Group>
    where
        F: FnOnce(&mut Group) -> ChatResult<()>,
    {
        self.load(group_id).await?;

        let lock = self.group_lock(group_id).await;
        let result = self.mutate_locked(group_id, &lock, apply).await;
        self.release_lock(group_id, lock).await;
        result
    }

    async fn mutate_locked<F>(&self, group_id: &str, lock: &Mutex<()>, apply: F) -> ChatResult<Group>
    where
        F: FnOnce(&mut Group) -> ChatResult<()>,
    {
        let _guard = lock.lock().await;

        let mut group = self.load(group_id).await?;
        apply(&mut group)?;
        self.ledger.replace_membership(&group).await?;

        Ok(group)
    }

    pub async fn create_group(&self, actor: &str, name: &str, members: &[String]) -> ChatResult<Group> {
        let group = Group::new(Uuid::new_v4().to_string(), name, actor, members, Utc::now())?;

        for member in &group.members {
            if self.accounts.find_by_id(member).await?.is_none() {
                return Err(ChatError::NotFound(format!("User not found: {}", member)));
            }
        }

        self.ledger.insert_group(&group).await?;
        tracing::info!(group_id = %group.id, created_by = actor, members = group.members.len(), "group created");

        Ok(group)
    }

    pub async fn add_member(&self, group_id: &str, actor: &str, target: &str) -> ChatResult<Group> {
        self.load(group_id).await?.require_role(actor, GroupRole::Admin)?;
        self.accounts.get(target).await?;

        let group = self
            .mutate(group_id, |group| group.add_member(actor, target))
            .await?;
        tracing::info!(group_id, actor, target, "member added");
        Ok(group)
    }

    pub async fn assign_admin(&self, group_id: &str, actor: &str, target: &str) -> ChatResult<Group> {
        let group = self
            .mutate(group_id, |group| group.assign_admin(actor, target))
            .await?;
        tracing::info!(group_id, actor, target, "admin assigned");
        Ok(group)
    }

    pub async fn remove_admin(&self, group_id: &str, actor: &str, target: &str) -> ChatResult<Group> {
        let group = self
            .mutate(group_id, |group| group.remove_admin(actor, target))
            .await?;
        tracing::info!(group_id, actor, target, "admin removed");
        Ok(group)
    }

    pub async fn remove_member(&self, group_id: &str, actor: &str, target: &str) -> ChatResult<Group> {
        let group = self
            .mutate(group_id, |group| group.remove_member(actor, target))
            .await?;

        // Live connections of the removed user stop receiving the group feed
        let evicted = self
            .broadcaster
            .registry()
            .evict_user(target, &RoomId::group(group_id))
            .await;
        tracing::info!(group_id, actor, target, evicted, "member removed");
        Ok(group)
    }

    /// Load a group, failing unless `user_id` is a member
    pub async fn require_member(&self, group_id: &str, user_id: &str) -> ChatResult<Group> {
        let group = self.load(group_id).await?;
        group.require_role(user_id, GroupRole::Member)?;
        Ok(group)
    }

    /// Persist a group message, then push it to the group room
    pub async fn post_message(
        &self,
        group_id: &str,
        actor: &str,
        content: MessageContent,
    ) -> ChatResult<GroupMessage> {
        self.require_member(group_id, actor).await?;

        let message = self.ledger.append_group_message(group_id, actor, content).await?;
        self.broadcaster.group_message(&message).await;

        Ok(message)
    }

    pub async fn read_messages(&self, group_id: &str, actor: &str) -> ChatResult<Vec<GroupMessageView>> {
        self.require_member(group_id, actor).await?;

        self.ledger.group_messages(group_id).await
    }

    pub async fn my_groups(&self, actor: &str) -> ChatResult<Vec<GroupView>> {
        self.ledger.groups_for_member(actor).await
    }

    /// Whether `user_id` currently belongs to the group; false if it does not exist
    pub async fn is_member(&self, group_id: &str, user_id: &str) -> ChatResult<bool> {
        Ok(self
            .ledger
            .find_group(group_id)
            .await?
            .map(|group| group.is_member(user_id))
            .unwrap_or(false))
    }
}
