//! User model
//!
//! Users are only stored so that tour guides can be populated. Accounts,
//! passwords and sessions are handled elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// User entity as stored in the `users` collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique identifier
    pub id: String,
    pub name: String,
    /// Email address (unique, lowercase)
    pub email: String,
    #[serde(default = "default_photo")]
    pub photo: String,
    pub role: UserRole,
    /// Last password change; never exposed through guide population
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_changed_at: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_photo() -> String {
    "default.jpg".to_string()
}

fn default_active() -> bool {
    true
}

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserRole {
    #[default]
    User,
    Guide,
    LeadGuide,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Guide => "guide",
            UserRole::LeadGuide => "lead-guide",
            UserRole::Admin => "admin",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(UserRole::User),
            "guide" => Ok(UserRole::Guide),
            "lead-guide" => Ok(UserRole::LeadGuide),
            "admin" => Ok(UserRole::Admin),
            _ => Err(format!("Invalid user role: {}", s)),
        }
    }
}

/// Input for creating a user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserInput {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub password_changed_at: Option<DateTime<Utc>>,
}

impl CreateUserInput {
    pub fn new(name: impl Into<String>, email: impl Into<String>, role: UserRole) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            role,
            photo: None,
            password_changed_at: None,
        }
    }

    pub fn with_password_changed_at(mut self, at: DateTime<Utc>) -> Self {
        self.password_changed_at = Some(at);
        self
    }
}
