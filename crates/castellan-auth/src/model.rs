//! Console identities and their persisted form.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a console account may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full access.
    Administrator,
    /// Read-only dashboard and stream list.
    Viewer,
}

impl Role {
    /// Stable identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Administrator => "administrator",
            Self::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approval state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// May log in.
    Active,
    /// Self-registered; awaits an administrator.
    Pending,
}

/// Account as shown to administrators; never carries the hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAccount {
    /// Login name.
    pub username: String,
    /// Granted role.
    pub role: Role,
    /// Approval state.
    pub status: AccountStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Authenticated console session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque bearer token.
    pub token: String,
    /// Account name.
    pub username: String,
    /// Account role at issue time.
    pub role: Role,
}

impl Session {
    /// True for administrator sessions.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Administrator
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredAccount {
    pub(crate) username: String,
    pub(crate) password_hash: String,
    pub(crate) role: Role,
    pub(crate) status: AccountStatus,
    pub(crate) created_at: DateTime<Utc>,
}

impl StoredAccount {
    pub(crate) fn view(&self) -> AdminAccount {
        AdminAccount {
            username: self.username.clone(),
            role: self.role,
            status: self.status,
            created_at: self.created_at,
        }
    }

    pub(crate) fn is_active_admin(&self) -> bool {
        self.role == Role::Administrator && self.status == AccountStatus::Active
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct CredentialFile {
    #[serde(default = "CredentialFile::current_version")]
    pub(crate) version: u32,
    #[serde(default)]
    pub(crate) accounts: Vec<StoredAccount>,
}

impl CredentialFile {
    pub(crate) const VERSION: u32 = 1;

    const fn current_version() -> u32 {
        Self::VERSION
    }
}
