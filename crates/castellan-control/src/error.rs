//! # Design
//!
//! - Host command failures carry the program, the operation and the captured
//!   stderr so a failed `systemctl` or `ufw` call can be reproduced by hand.
//! - Restart failures distinguish a plain timeout from a terminal failure after
//!   rollback, so callers can say whether the document was reverted.

use std::io;
use std::time::Duration;

use castellan_config::ConfigError;
use castellan_fsops::FsOpsError;
use thiserror::Error;

/// Result alias for service control operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors produced by service control, firewall sync and log streaming.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A host command could not be spawned.
    #[error("failed to spawn host command")]
    CommandSpawn {
        /// Program name.
        program: String,
        /// Source IO error.
        source: io::Error,
    },
    /// A host command exited unsuccessfully.
    #[error("host command failed")]
    CommandFailed {
        /// Program name.
        program: String,
        /// Operation identifier.
        operation: &'static str,
        /// Exit code when the process exited normally.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// A host command did not finish in time.
    #[error("host command timed out")]
    CommandTimeout {
        /// Program name.
        program: String,
        /// Operation identifier.
        operation: &'static str,
    },
    /// A firewall change targeted a protected port.
    #[error("port is protected")]
    ProtectedPort {
        /// Protected port.
        port: u16,
    },
    /// The service did not become healthy in time.
    #[error("service restart timed out")]
    RestartTimeout {
        /// Managed unit.
        unit: String,
        /// Health-check window.
        waited: Duration,
    },
    /// The service could not be brought back, even after rollback when one
    /// applied.
    #[error("service failed")]
    ServiceFailed {
        /// Operator-facing description.
        message: String,
        /// Whether the configuration was rolled back before giving up.
        rollback_attempted: bool,
    },
    /// The new document did not come up healthy; the previous one was put
    /// back and the service is running on it.
    #[error("configuration change reverted")]
    ChangeReverted {
        /// Backup that was restored.
        backup: String,
        /// Why the first restart failed.
        message: String,
    },
    /// Media server API request failed.
    #[error("media server api request failed")]
    MediaApi {
        /// Requested URL.
        url: String,
        /// Source error.
        source: reqwest::Error,
    },
    /// Input rejected.
    #[error("invalid control input")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// No recording with that name exists.
    #[error("recording not found")]
    RecordingNotFound {
        /// Requested name.
        name: String,
    },
    /// Recordings directory access failed.
    #[error("recordings operation failed")]
    Recordings {
        /// Source error.
        source: FsOpsError,
    },
    /// Blocking filesystem task did not complete.
    #[error("background task failed")]
    Task {
        /// Source error.
        #[from]
        source: tokio::task::JoinError,
    },
    /// Configuration store failure.
    #[error("configuration operation failed")]
    Config {
        /// Source error.
        #[from]
        source: ConfigError,
    },
}

impl ControlError {
    pub(crate) fn invalid(field: &'static str, reason: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason,
            value: Some(value.into()),
        }
    }

    pub(crate) fn recordings(name: Option<&str>, source: FsOpsError) -> Self {
        match (name, source) {
            (Some(name), source) if source.is_not_found() => Self::RecordingNotFound {
                name: name.to_string(),
            },
            (_, FsOpsError::InvalidInput {
                field,
                reason,
                value,
            }) => Self::InvalidInput {
                field,
                reason,
                value,
            },
            (_, source) => Self::Recordings { source },
        }
    }

    pub(crate) fn failed(
        program: &str,
        operation: &'static str,
        status: Option<i32>,
        stderr: &[u8],
    ) -> Self {
        Self::CommandFailed {
            program: program.to_string(),
            operation,
            status,
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }
}
