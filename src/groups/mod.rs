/// Group authorization engine
///
/// [`policy`] holds the pure membership rules; [`GroupManager`] applies them
/// atomically per group against the ledger and broadcasts group messages.

mod manager;
pub mod policy;

pub use manager::GroupManager;
pub use policy::{Group, GroupRole};

use crate::accounts::UserSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Group as listed by `my-groups`, with members and admins resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub id: String,
    pub name: String,
    pub members: Vec<UserSummary>,
    pub admins: Vec<UserSummary>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Body of `POST /api/groups/create`
#[derive(Debug, Clone, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// Body of add-member and assign-admin requests
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRequest {
    pub member_id: String,
}
