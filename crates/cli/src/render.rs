//! Plain-text rendering of lists, items and users.

use std::fmt::Write;

use socialtodo_core::models::{OwnedList, TodoItem, User, UserRef};

pub fn user(user: &User) -> String {
    let kind = if user.is_admin() {
        "creator account"
    } else {
        "collaborator account"
    };
    format!("{} <{}> ({kind})", user.display_name(), user.email)
}

/// Dashboard view: one line per list with ownership flags.
pub fn lists(lists: &[OwnedList]) -> String {
    if lists.is_empty() {
        return "No lists yet.\n".to_string();
    }
    let mut out = String::new();
    for entry in lists {
        let role = if entry.is_owner {
            "owner".to_string()
        } else if entry.is_invited {
            format!("shared by {}", entry.owner_name)
        } else {
            format!("owned by {}", entry.owner_name)
        };
        let _ = write!(out, "[{}] {} ({role})", entry.list.id, entry.list.title);
        if entry.invited_users_count > 0 {
            let _ = write!(out, ", {} collaborator(s)", entry.invited_users_count);
        }
        out.push('\n');
        if let Some(description) = entry.list.description.as_deref().filter(|d| !d.is_empty()) {
            let _ = writeln!(out, "    {description}");
        }
    }
    out
}

/// Items newest first, with a completion box and the creator.
///
/// Items `current` may delete are marked with `*`.
pub fn items(items: &[TodoItem], current: Option<&User>, list_admin: bool) -> String {
    if items.is_empty() {
        return "No items yet.\n".to_string();
    }
    let mut out = String::new();
    for item in items {
        let check = if item.completed { "x" } else { " " };
        let mark = if item.can_delete(current, list_admin) {
            "*"
        } else {
            " "
        };
        let _ = write!(
            out,
            "[{check}]{mark}#{} {} (by {}",
            item.id,
            item.display_text(),
            item.creator_name()
        );
        if let Some(created) = item.created_on() {
            let _ = write!(out, ", {}", created.format("%Y-%m-%d"));
        }
        out.push_str(")\n");
    }
    let done = items.iter().filter(|i| i.completed).count();
    let _ = writeln!(out, "{done} of {} completed", items.len());
    out
}

pub fn users(users: &[UserRef]) -> String {
    if users.is_empty() {
        return "No matching users.\n".to_string();
    }
    users
        .iter()
        .map(|u| match &u.username {
            Some(username) => format!("#{} {} (@{username})\n", u.id, u.display_name()),
            None => format!("#{} {}\n", u.id, u.display_name()),
        })
        .collect()
}
