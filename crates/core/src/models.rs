//! Client-side models for users, lists, and items.
//!
//! The server's JSON is not perfectly uniform (creator references live
//! under different keys, booleans sometimes arrive as `0`/`1`), so the
//! deserializers here are deliberately lenient. Anything missing an `id`
//! still fails to parse; [`crate::normalize`] drops those entries.

use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{parse_timestamp, DbId, Timestamp};

/// Fallback display text for items without a description or title.
pub const UNTITLED: &str = "Untitled";

/// Fallback display name for unknown owners and creators.
pub const UNKNOWN: &str = "Unknown";

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Account type. Unknown values from the server map to [`UserType::User`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    /// May create, edit and delete lists.
    Admin,
    #[default]
    #[serde(other)]
    User,
}

/// The authenticated user as returned by `auth/login` and `auth/user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: DbId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub username: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(default, rename = "type", deserialize_with = "null_as_default")]
    pub user_type: UserType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.user_type == UserType::Admin
    }

    /// Name if set, otherwise username.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.username
        } else {
            &self.name
        }
    }
}

/// A lightweight reference to another user (owner, collaborator, creator,
/// search result).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: DbId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl UserRef {
    /// Name, then username, then [`UNKNOWN`].
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or(UNKNOWN)
    }
}

/// `created_by` is either a user object or a bare name string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CreatedBy {
    User(UserRef),
    Name(String),
}

// ---------------------------------------------------------------------------
// Lists
// ---------------------------------------------------------------------------

/// A to-do list as returned by `todos/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoList {
    pub id: DbId,
    #[serde(default, alias = "name", deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<DbId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<UserRef>,
    /// Invited collaborators.
    #[serde(default, deserialize_with = "null_as_default")]
    pub users: Vec<UserRef>,
}

/// A list together with the flags derived for the current user.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedList {
    pub list: TodoList,
    pub is_owner: bool,
    pub is_invited: bool,
    pub owner_name: String,
    pub invited_users_count: usize,
}

impl OwnedList {
    /// Derive ownership flags by comparing the list's owner and
    /// collaborator ids to `current`.
    pub fn for_user(list: TodoList, current: Option<&User>) -> Self {
        let current_id = current.map(|u| u.id);
        let is_owner = current_id.is_some() && list.owner_id == current_id;
        let is_invited = current_id.is_some_and(|id| list.users.iter().any(|u| u.id == id));
        let owner_name = list
            .owner
            .as_ref()
            .and_then(|o| o.name.clone())
            .unwrap_or_else(|| UNKNOWN.to_string());
        let invited_users_count = list.users.len();

        Self {
            list,
            is_owner,
            is_invited,
            owner_name,
            invited_users_count,
        }
    }

    /// Admin-level access to this list's items: owners, and admin accounts.
    pub fn is_admin_for(&self, current: Option<&User>) -> bool {
        self.is_owner || current.is_some_and(User::is_admin)
    }

    /// Invite and delete-list controls are reserved for the owner.
    pub fn can_manage(&self) -> bool {
        self.is_owner
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// A single to-do entry belonging to one list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: DbId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<CreatedBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl TodoItem {
    /// Description, then title, then [`UNTITLED`].
    pub fn display_text(&self) -> &str {
        self.description
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.title.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(UNTITLED)
    }

    /// Resolve the creator's display name across the known reference shapes.
    pub fn creator_name(&self) -> &str {
        if let Some(name) = ref_name(&self.creator).or(ref_name(&self.user)) {
            return name;
        }
        match &self.created_by {
            Some(CreatedBy::User(u)) => u
                .name
                .as_deref()
                .or(u.username.as_deref())
                .unwrap_or(UNKNOWN),
            Some(CreatedBy::Name(name)) => name,
            None => UNKNOWN,
        }
    }

    /// Whether `current` created this item.
    pub fn is_created_by(&self, current: &User) -> bool {
        let id_match = |r: &Option<UserRef>| r.as_ref().is_some_and(|u| u.id == current.id);
        if id_match(&self.creator) || id_match(&self.user) {
            return true;
        }
        match &self.created_by {
            Some(CreatedBy::User(u)) => u.id == current.id,
            Some(CreatedBy::Name(name)) => {
                (!current.name.is_empty() && *name == current.name)
                    || (!current.username.is_empty() && *name == current.username)
            }
            None => false,
        }
    }

    /// List admins may delete any item; everyone else only their own.
    pub fn can_delete(&self, current: Option<&User>, list_admin: bool) -> bool {
        list_admin || current.is_some_and(|u| self.is_created_by(u))
    }

    /// Parsed creation time. Unparseable values yield `None`.
    pub fn created_on(&self) -> Option<Timestamp> {
        parse_timestamp(self.created_at.as_deref()?)
    }
}

/// A partial item used for shallow merges.
///
/// Keys absent from the payload (or `null`) leave the existing field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemPatch {
    pub id: DbId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<CreatedBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl ItemPatch {
    /// Merge every present field into `item`. Returns `true` if anything
    /// actually changed.
    pub fn merge_into(self, item: &mut TodoItem) -> bool {
        let before = item.clone();
        if let Some(title) = self.title {
            item.title = Some(title);
        }
        if let Some(description) = self.description {
            item.description = Some(description);
        }
        if let Some(completed) = self.completed {
            item.completed = completed;
        }
        if let Some(creator) = self.creator {
            item.creator = Some(creator);
        }
        if let Some(user) = self.user {
            item.user = Some(user);
        }
        if let Some(created_by) = self.created_by {
            item.created_by = Some(created_by);
        }
        if let Some(created_at) = self.created_at {
            item.created_at = Some(created_at);
        }
        *item != before
    }
}

impl From<TodoItem> for ItemPatch {
    fn from(item: TodoItem) -> Self {
        Self {
            id: item.id,
            title: item.title,
            description: item.description,
            completed: Some(item.completed),
            creator: item.creator,
            user: item.user,
            created_by: item.created_by,
            created_at: item.created_at,
        }
    }
}

fn ref_name(r: &Option<UserRef>) -> Option<&str> {
    r.as_ref().and_then(|u| u.name.as_deref())
}

// ---------------------------------------------------------------------------
// Lenient deserializers
// ---------------------------------------------------------------------------

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn value_as_bool(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::Number(n) => n.as_i64().map(|n| n != 0),
        serde_json::Value::String(s) => match s.as_str() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value_as_bool(&value).unwrap_or(false))
}

fn lenient_opt_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value_as_bool(&value))
}
