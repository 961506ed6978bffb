//! # Design
//!
//! - Download and verification failures happen before the swap and leave the
//!   installed binary untouched.
//! - `RolledBack` is returned when the new binary was swapped in, failed its
//!   health gate, and the retained artifact was put back.

use std::io;
use std::path::PathBuf;

use castellan_config::ConfigError;
use castellan_control::ControlError;
use castellan_fsops::FsOpsError;
use thiserror::Error;

/// Result alias for self-update operations.
pub type UpdateResult<T> = Result<T, UpdateError>;

/// Errors produced while checking for, applying or reverting an update.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Release feed request failed.
    #[error("release feed request failed")]
    Feed {
        /// Requested URL.
        url: String,
        /// Source error.
        source: reqwest::Error,
    },
    /// Release feed answered with something unusable.
    #[error("release feed response rejected")]
    FeedFormat {
        /// Requested URL.
        url: String,
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// A version tag is not a dotted list of integers.
    #[error("invalid version tag")]
    InvalidVersion {
        /// Offending tag.
        value: String,
    },
    /// The offered release is not newer than the installed one.
    #[error("release already installed")]
    AlreadyCurrent {
        /// Installed version.
        version: String,
    },
    /// Downloaded artifact is implausibly small.
    #[error("downloaded artifact too small")]
    ArtifactTooSmall {
        /// Bytes received.
        size: u64,
        /// Minimum accepted size.
        minimum: u64,
    },
    /// Downloaded artifact does not match the published checksum.
    #[error("artifact checksum mismatch")]
    ChecksumMismatch {
        /// Published SHA-256.
        expected: String,
        /// Computed SHA-256.
        actual: String,
    },
    /// No previous artifact is retained.
    #[error("no previous release to roll back to")]
    NothingToRollBack,
    /// The new release failed its health gate and was reverted.
    #[error("update rolled back")]
    RolledBack {
        /// Abandoned version.
        version: String,
        /// Why.
        reason: String,
    },
    /// Filesystem failure.
    #[error("update filesystem operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// Atomic file helper failure.
    #[error("update file replacement failed")]
    FsOps {
        /// Source error.
        #[from]
        source: FsOpsError,
    },
    /// Install marker could not be encoded or decoded.
    #[error("install marker serialization failed")]
    Serde {
        /// Operation identifier.
        operation: &'static str,
        /// Source error.
        source: serde_json::Error,
    },
    /// Unit manager or hand-off command failure.
    #[error("service control failed")]
    Service {
        /// Source error.
        #[from]
        source: ControlError,
    },
    /// The configuration lock could not be taken.
    #[error("configuration lock unavailable")]
    Config {
        /// Source error.
        #[from]
        source: ConfigError,
    },
    /// A blocking task panicked or was cancelled.
    #[error("update task failed")]
    TaskJoin {
        /// Operation identifier.
        operation: &'static str,
        /// Join error.
        source: tokio::task::JoinError,
    },
}

impl UpdateError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
