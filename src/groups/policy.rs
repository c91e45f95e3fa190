/// Group role hierarchy and the membership state machine
///
/// Every mutation checks the actor's role first and leaves the group
/// untouched when a guard fails.
use crate::error::{ChatError, ChatResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Group role levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    /// May read and post
    Member,
    /// May add members and promote members to admin
    Admin,
    /// May additionally demote admins and remove members; never revocable
    Creator,
}

impl GroupRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupRole::Member => "member",
            GroupRole::Admin => "admin",
            GroupRole::Creator => "creator",
        }
    }

    /// Check if this role can perform actions requiring another role
    pub fn can_act_as(&self, required: GroupRole) -> bool {
        self >= &required
    }
}

/// A group and its ordered membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
    pub admins: Vec<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Group {
    /// Build a new group owned by `creator`
    ///
    /// Listed members are de-duplicated in order; the creator is appended
    /// when absent and is the only initial admin.
    pub fn new(
        id: String,
        name: &str,
        creator: &str,
        listed_members: &[String],
        now: DateTime<Utc>,
    ) -> ChatResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::Validation("Group name cannot be empty".to_string()));
        }

        let mut members: Vec<String> = Vec::with_capacity(listed_members.len() + 1);
        for member in listed_members {
            let member = member.trim();
            if !member.is_empty() && !members.iter().any(|m| m == member) {
                members.push(member.to_string());
            }
        }
        if !members.iter().any(|m| m == creator) {
            members.push(creator.to_string());
        }

        Ok(Self {
            id,
            name: name.to_string(),
            members,
            admins: vec![creator.to_string()],
            created_by: creator.to_string(),
            created_at: now,
        })
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.iter().any(|a| a == user_id)
    }

    /// Highest role a user holds in this group
    pub fn role_of(&self, user_id: &str) -> Option<GroupRole> {
        if self.created_by == user_id {
            Some(GroupRole::Creator)
        } else if self.is_admin(user_id) {
            Some(GroupRole::Admin)
        } else if self.is_member(user_id) {
            Some(GroupRole::Member)
        } else {
            None
        }
    }

    /// Fail with Forbidden unless `actor` holds at least `required`
    pub fn require_role(&self, actor: &str, required: GroupRole) -> ChatResult<GroupRole> {
        match self.role_of(actor) {
            Some(role) if role.can_act_as(required) => Ok(role),
            _ => Err(ChatError::Authorization(match required {
                GroupRole::Member => "You are not a member of this group".to_string(),
                other => format!("Requires group {} role", other.as_str()),
            })),
        }
    }

    pub fn add_member(&mut self, actor: &str, target: &str) -> ChatResult<()> {
        self.require_role(actor, GroupRole::Admin)?;

        if self.is_member(target) {
            return Err(ChatError::Conflict("User already in group".to_string()));
        }

        self.members.push(target.to_string());
        Ok(())
    }

    pub fn assign_admin(&mut self, actor: &str, target: &str) -> ChatResult<()> {
        self.require_role(actor, GroupRole::Admin)?;

        if !self.is_member(target) {
            return Err(ChatError::Validation("User not in group".to_string()));
        }

        if !self.is_admin(target) {
            self.admins.push(target.to_string());
        }
        Ok(())
    }

    pub fn remove_admin(&mut self, actor: &str, target: &str) -> ChatResult<()> {
        self.require_role(actor, GroupRole::Creator)?;

        if !self.is_admin(target) {
            return Err(ChatError::Validation(
                "User is not an admin of this group".to_string(),
            ));
        }
        if target == self.created_by {
            return Err(ChatError::Validation(
                "The group creator cannot be demoted".to_string(),
            ));
        }

        self.admins.retain(|a| a != target);
        Ok(())
    }

    pub fn remove_member(&mut self, actor: &str, target: &str) -> ChatResult<()> {
        self.require_role(actor, GroupRole::Creator)?;

        if !self.is_member(target) {
            return Err(ChatError::Validation(
                "User is not a member of this group".to_string(),
            ));
        }
        if target == self.created_by {
            return Err(ChatError::Validation(
                "The group creator cannot be removed".to_string(),
            ));
        }

        self.members.retain(|m| m != target);
        self.admins.retain(|a| a != target);
        Ok(())
    }
}
