use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::TallyError;

/// An actor's membership role within a scope, also used as the minimum
/// permission a command requires.
///
/// Ordered `Member < Admin < Owner`; an actor may run a command when
/// `actor_role >= command.permission`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
    Owner,
}

impl Role {
    /// Whether this role satisfies a `required` permission level.
    pub fn satisfies(self, required: Role) -> bool {
        self >= required
    }

    /// Lower-case wire name (`"member"`, `"admin"`, `"owner"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Member => write!(f, "Member"),
            Role::Admin => write!(f, "Admin"),
            Role::Owner => write!(f, "Owner"),
        }
    }
}

impl FromStr for Role {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "member" => Ok(Role::Member),
            "admin" => Ok(Role::Admin),
            "owner" => Ok(Role::Owner),
            other => Err(TallyError::ConfigError(format!(
                "unknown role {other:?} (expected member, admin, or owner)"
            ))),
        }
    }
}
