//! Request and response bodies of the HTTP surface.

use castellan_auth::Role;
use castellan_config::{CommitReceipt, EncryptionMode, StreamingUser, UserSelector};
use castellan_events::ServiceState;
use castellan_updater::{InstallMarker, UpdateRelease};
use serde::{Deserialize, Serialize};

/// RFC 9457 problem document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// Problem type URI.
    #[serde(rename = "type")]
    pub kind: String,
    /// Short summary.
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Occurrence-specific explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Offending input fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_params: Option<Vec<ProblemInvalidParam>>,
}

/// Invalid parameter pointer surfaced alongside a [`ProblemDetails`] payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemInvalidParam {
    /// JSON pointer to the field.
    pub pointer: String,
    /// Machine-readable reason.
    pub message: String,
}

/// Login or registration credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Password.
    pub password: String,
}

/// Password change for the calling account.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordChange {
    /// Current password.
    pub current: String,
    /// Replacement password.
    pub new: String,
}

/// Administrator-created account.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAccount {
    /// Account name.
    pub username: String,
    /// Initial password.
    pub password: String,
    /// Granted role.
    pub role: Role,
}

/// Role to grant when approving or changing an account.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleGrant {
    /// Granted role; approval defaults to viewer.
    #[serde(default)]
    pub role: Option<Role>,
}

/// Live document text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawDocument {
    /// Store revision the text was read at.
    pub revision: u64,
    /// Document text.
    pub text: String,
}

/// Candidate document text for a raw edit or validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawText {
    /// Document text.
    pub text: String,
}

/// Result of a validation-only request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationReport {
    /// The text would be accepted.
    pub valid: bool,
}

/// A manual backup that was taken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupCreated {
    /// Backup name.
    pub id: String,
}

/// Change to one protocol; absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProtocolUpdate {
    /// New enable flag.
    #[serde(default)]
    pub enabled: Option<bool>,
    /// New plain listener port.
    #[serde(default)]
    pub port: Option<u16>,
    /// New encryption mode.
    #[serde(default)]
    pub encryption: Option<EncryptionMode>,
}

/// Replacement of one streaming user.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamingUserEdit {
    /// Record to replace.
    pub selector: UserSelector,
    /// Replacement record.
    pub user: StreamingUser,
}

/// Result of a streaming-user change. No restart is performed.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StreamingUserChange {
    /// Commit details.
    pub receipt: CommitReceipt,
    /// The committed document still waits for a restart.
    pub restart_pending: bool,
}

/// Desired state of an anonymous-access toggle.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AccessToggle {
    /// Switch the access on.
    pub enabled: bool,
}

/// A recording that was deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordingDeleted {
    /// Recording name.
    pub name: String,
    /// Bytes freed on disk.
    pub freed_bytes: u64,
}

/// Liveness document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// Always `ok` when the console answers.
    pub status: String,
    /// Console version.
    pub version: String,
    /// Build identifier.
    pub build: String,
    /// Managed service state.
    pub service: ServiceState,
    /// A committed document waits for a restart.
    pub restart_pending: bool,
}

/// Installed console version and the newest published one.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UpdateStatus {
    /// Installed-version marker.
    pub installed: InstallMarker,
    /// Newer release, when one exists.
    pub available: Option<UpdateRelease>,
}
