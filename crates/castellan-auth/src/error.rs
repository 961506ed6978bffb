//! # Design
//!
//! - Login failures collapse into `InvalidCredentials` so callers cannot tell
//!   a wrong name from a wrong password.
//! - Store and hashing failures keep their sources for logs; HTTP callers only
//!   see the constant message.

use std::io;
use std::path::PathBuf;

use argon2::password_hash::Error as PasswordHashError;
use castellan_fsops::FsOpsError;
use thiserror::Error;

/// Result alias for admin directory operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors produced by the admin directory.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown user or wrong password.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Credentials were correct but the account awaits approval.
    #[error("account pending approval")]
    PendingApproval,
    /// Session token unknown, expired, or revoked.
    #[error("session expired")]
    SessionExpired,
    /// Self-registration is switched off.
    #[error("registration disabled")]
    RegistrationDisabled,
    /// Username already exists.
    #[error("username already taken")]
    UsernameTaken {
        /// Requested username.
        username: String,
    },
    /// No account with that username.
    #[error("account not found")]
    UnknownAccount {
        /// Requested username.
        username: String,
    },
    /// Approval or denial targeted an account that is not pending.
    #[error("account is not pending approval")]
    NotPending {
        /// Requested username.
        username: String,
    },
    /// Input rejected.
    #[error("invalid account input")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// An administrator tried to delete their own account.
    #[error("cannot delete own account")]
    SelfDeletion,
    /// The change would leave no active administrator.
    #[error("last administrator cannot be removed")]
    LastAdministrator,
    /// Hashing a secret failed.
    #[error("failed to hash secret material")]
    SecretHash {
        /// Hashing error detail.
        detail: PasswordHashError,
    },
    /// Stored hash could not be parsed.
    #[error("invalid stored hash")]
    StoredHashInvalid {
        /// Account whose hash is invalid.
        username: String,
        /// Parse error detail.
        detail: PasswordHashError,
    },
    /// Credential file could not be read.
    #[error("credential store io failure")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Source error.
        source: io::Error,
    },
    /// Credential file did not decode or encode.
    #[error("credential store is malformed")]
    Serde {
        /// Operation identifier.
        operation: &'static str,
        /// Source error.
        source: serde_json::Error,
    },
    /// Durable write failed.
    #[error("credential store write failed")]
    FsOps {
        /// Source error.
        source: FsOpsError,
    },
    /// Blocking task was cancelled or panicked.
    #[error("credential task failed")]
    TaskJoin {
        /// Operation identifier.
        operation: &'static str,
        /// Source join error.
        source: tokio::task::JoinError,
    },
}

impl AuthError {
    pub(crate) const fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::InvalidInput { field, reason }
    }

    /// True when the caller is not (or no longer) authenticated.
    #[must_use]
    pub const fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials | Self::PendingApproval | Self::SessionExpired
        )
    }
}
