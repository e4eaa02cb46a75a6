//! Request bodies for the REST API, validated before they are sent.
//!
//! Constructors trim their inputs so that whitespace-only values fail the
//! `length(min = 1)` rules just like empty ones.

use serde::Serialize;
use validator::Validate;

use crate::error::CoreError;
use crate::models::UserType;

/// `auth/login` body.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct Credentials {
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

impl Credentials {
    pub fn new(email: &str, password: &str) -> Self {
        Self {
            email: email.trim().to_string(),
            password: password.to_string(),
        }
    }
}

/// `auth/register` body.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct Registration {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Username is required"))]
    pub username: String,
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    #[serde(rename = "type")]
    pub user_type: UserType,
}

impl Registration {
    pub fn new(name: &str, username: &str, email: &str, password: &str, user_type: UserType) -> Self {
        Self {
            name: name.trim().to_string(),
            username: username.trim().to_string(),
            email: email.trim().to_string(),
            password: password.to_string(),
            user_type,
        }
    }
}

/// `todos/create` body.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct NewList {
    #[validate(length(min = 1, message = "Title is required"))]
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewList {
    pub fn new(title: &str, description: Option<&str>) -> Self {
        Self {
            title: title.trim().to_string(),
            description: non_blank(description),
        }
    }
}

/// `todo-items/create/{listId}` body.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct NewItem {
    #[validate(length(min = 1, message = "Title is required"))]
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewItem {
    pub fn new(title: &str, description: Option<&str>) -> Self {
        Self {
            title: title.trim().to_string(),
            description: non_blank(description),
        }
    }
}

/// `todo-items/update/{id}` body. At least one field must be present.
#[derive(Debug, Clone, Default, Serialize, Validate)]
pub struct ItemUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, message = "Title cannot be empty"))]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ItemUpdate {
    pub fn new(title: Option<&str>, description: Option<&str>) -> Self {
        Self {
            title: title.map(|t| t.trim().to_string()),
            description: description.map(|d| d.trim().to_string()),
        }
    }

    /// Field rules plus "at least one field present".
    pub fn check(&self) -> Result<(), CoreError> {
        check(self)?;
        if self.title.is_none() && self.description.is_none() {
            return Err(CoreError::Validation("Nothing to update".into()));
        }
        Ok(())
    }
}

/// Run a form's validation rules.
pub fn check<T: Validate>(form: &T) -> Result<(), CoreError> {
    form.validate()?;
    Ok(())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
