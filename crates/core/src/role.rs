//! Caller roles and identities.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Privilege level of a caller.
///
/// Roles are totally ordered: a higher discriminant carries more privilege.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Role {
    Viewer = 1,
    Contributor = 2,
    Admin = 3,
}

impl Role {
    /// All roles, lowest privilege first.
    pub const ALL: [Role; 3] = [Role::Viewer, Role::Contributor, Role::Admin];

    /// Ordinal level of this role (1..=3).
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Look up a role by its ordinal level.
    pub fn from_level(level: u8) -> Result<Self> {
        match level {
            1 => Ok(Role::Viewer),
            2 => Ok(Role::Contributor),
            3 => Ok(Role::Admin),
            other => Err(Error::InvalidRole(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Contributor => "contributor",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    /// Accepts role names case-insensitively, or their ordinal level.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Ok(level) = trimmed.parse::<u8>() {
            return Self::from_level(level);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "viewer" => Ok(Role::Viewer),
            "contributor" => Ok(Role::Contributor),
            "admin" => Ok(Role::Admin),
            _ => Err(Error::InvalidRole(s.to_string())),
        }
    }
}

/// A caller already authenticated by an upstream collaborator.
///
/// The router trusts this triple as given and performs no authorization of its
/// own beyond bucket resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
}

impl CallerIdentity {
    pub fn new(user_id: Uuid, username: impl Into<String>, role: Role) -> Self {
        Self {
            user_id,
            username: username.into(),
            role,
        }
    }
}
