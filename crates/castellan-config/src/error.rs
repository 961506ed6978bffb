//! Error types for configuration operations.
//!
//! # Design
//! - Constant messages; the offending section, field and value travel as data.
//! - Variants line up with what an operator can do next: fix the input
//!   (`InvalidField`, `InvalidDocument`), restore a backup (`CorruptConfig`),
//!   retry later (`Busy`), or leave a built-in alone (`ProtectedUser`).

use std::io;
use std::path::PathBuf;

use castellan_fsops::FsOpsError;
use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Section that failed validation.
        section: String,
        /// Field that failed validation.
        field: String,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// Candidate document text did not parse or had the wrong shape.
    #[error("invalid configuration document")]
    InvalidDocument {
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Parser detail (line and column when available).
        detail: Option<String>,
    },
    /// The live document on disk could not be parsed.
    #[error("configuration document on disk is corrupt")]
    CorruptConfig {
        /// Path of the live document.
        path: PathBuf,
        /// Parser detail.
        detail: String,
    },
    /// Another mutation holds the document lock and the store fails fast.
    #[error("configuration store is busy")]
    Busy {
        /// Path of the contended document.
        path: PathBuf,
    },
    /// Attempted to delete or widen a built-in streaming identity.
    #[error("streaming user is protected")]
    ProtectedUser {
        /// Name of the protected user.
        name: String,
        /// Machine-readable reason for the rejection.
        reason: &'static str,
    },
    /// No streaming user matched the selector.
    #[error("streaming user not found")]
    UnknownUser {
        /// Name in the selector.
        name: String,
    },
    /// A streaming user with the same identity already exists.
    #[error("streaming user already exists")]
    DuplicateUser {
        /// Conflicting name.
        name: String,
    },
    /// Requested backup does not exist.
    #[error("backup not found")]
    BackupNotFound {
        /// Backup identifier.
        id: String,
    },
    /// A structured edit produced a document whose other fields changed.
    #[error("structured edit was not isolated")]
    PatchNotIsolated {
        /// Key whose value drifted.
        field: String,
    },
    /// Structured edits cannot express this layout; use a raw edit instead.
    #[error("structured edit unsupported for document layout")]
    UnsupportedLayout {
        /// Section whose layout blocked the edit.
        section: &'static str,
    },
    /// File system operation failed.
    #[error("filesystem operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// A blocking filesystem task panicked or was cancelled.
    #[error("configuration task failed")]
    TaskJoin {
        /// Operation identifier.
        operation: &'static str,
        /// Source join error.
        source: tokio::task::JoinError,
    },
    /// Durable write helper failed.
    #[error("durable write failed")]
    FsOps {
        /// Operation identifier.
        operation: &'static str,
        /// Source fsops error.
        source: FsOpsError,
    },
}

impl ConfigError {
    pub(crate) fn invalid_field(
        section: &str,
        field: &str,
        value: Option<&str>,
        reason: &'static str,
    ) -> Self {
        Self::InvalidField {
            section: section.to_string(),
            field: field.to_string(),
            value: value.map(str::to_string),
            reason,
        }
    }

    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) const fn fsops(operation: &'static str, source: FsOpsError) -> Self {
        Self::FsOps { operation, source }
    }

    /// True for failures caused by caller input rather than host state.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidField { .. }
                | Self::InvalidDocument { .. }
                | Self::DuplicateUser { .. }
                | Self::UnsupportedLayout { .. }
        )
    }
}
