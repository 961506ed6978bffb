//! RFC9457-style API error wrapper and the mapping from domain errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use castellan_auth::AuthError;
use castellan_config::ConfigError;
use castellan_control::ControlError;
use castellan_updater::UpdateError;
use tracing::{error, warn};

use crate::http::constants::{
    PROBLEM_BAD_REQUEST, PROBLEM_BUSY, PROBLEM_CHANGE_REVERTED, PROBLEM_CONFIG_INVALID,
    PROBLEM_CONFLICT, PROBLEM_FORBIDDEN, PROBLEM_INTERNAL, PROBLEM_NOT_FOUND,
    PROBLEM_RESTART_TIMEOUT, PROBLEM_SERVICE_FAILED, PROBLEM_UNAUTHORIZED, PROBLEM_UPSTREAM,
};
use crate::models::{ProblemDetails, ProblemInvalidParam};

/// Structured API error with optional RFC9457 fields.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) kind: &'static str,
    title: &'static str,
    detail: Option<String>,
    pub(crate) invalid_params: Option<Vec<ProblemInvalidParam>>,
}

impl ApiError {
    const fn new(status: StatusCode, kind: &'static str, title: &'static str) -> Self {
        Self {
            status,
            kind,
            title,
            detail: None,
            invalid_params: None,
        }
    }

    pub(crate) fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub(crate) fn with_invalid_params(mut self, params: Vec<ProblemInvalidParam>) -> Self {
        self.invalid_params = Some(params);
        self
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            PROBLEM_INTERNAL,
            "internal server error",
        )
        .with_detail(message)
    }

    pub(crate) fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            PROBLEM_UNAUTHORIZED,
            "authentication required",
        )
        .with_detail(detail)
    }

    pub(crate) fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, PROBLEM_FORBIDDEN, "forbidden").with_detail(detail)
    }

    pub(crate) fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, PROBLEM_BAD_REQUEST, "bad request").with_detail(detail)
    }

    pub(crate) fn not_found(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            PROBLEM_NOT_FOUND,
            "resource not found",
        )
        .with_detail(detail)
    }

    pub(crate) fn conflict(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, PROBLEM_CONFLICT, "conflict").with_detail(detail)
    }

    fn busy(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, PROBLEM_BUSY, "configuration busy").with_detail(detail)
    }

    pub(crate) fn config_invalid(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            PROBLEM_CONFIG_INVALID,
            "configuration invalid",
        )
        .with_detail(detail)
    }

    fn change_reverted(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            PROBLEM_CHANGE_REVERTED,
            "change reverted",
        )
        .with_detail(detail)
    }

    fn service_failed(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            PROBLEM_SERVICE_FAILED,
            "service failed",
        )
        .with_detail(detail)
    }

    fn restart_timeout(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::GATEWAY_TIMEOUT,
            PROBLEM_RESTART_TIMEOUT,
            "service restart timed out",
        )
        .with_detail(detail)
    }

    pub(crate) fn upstream(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            PROBLEM_UPSTREAM,
            "upstream failure",
        )
        .with_detail(detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ProblemDetails {
            kind: self.kind.to_string(),
            title: self.title.to_string(),
            status: self.status.as_u16(),
            detail: self.detail,
            invalid_params: self.invalid_params,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        match &err {
            ConfigError::InvalidField {
                section,
                field,
                reason,
                ..
            } => {
                warn!(error = %err, section = %section, field = %field, reason, "configuration rejected");
                Self::config_invalid(format!("{field}: {reason}")).with_invalid_params(vec![
                    ProblemInvalidParam {
                        pointer: pointer_for(section, field),
                        message: (*reason).to_string(),
                    },
                ])
            }
            ConfigError::InvalidDocument { reason, detail } => {
                warn!(error = %err, reason, "document rejected");
                Self::config_invalid(detail.as_ref().map_or_else(
                    || (*reason).to_string(),
                    |detail| format!("{reason}: {detail}"),
                ))
            }
            ConfigError::UnsupportedLayout { section } => Self::config_invalid(format!(
                "section '{section}' cannot be edited structurally; use a raw edit"
            )),
            ConfigError::PatchNotIsolated { field } => Self::config_invalid(format!(
                "edit would also change '{field}'; use a raw edit"
            )),
            ConfigError::DuplicateUser { name } => {
                Self::conflict(format!("streaming user '{name}' already exists"))
            }
            ConfigError::ProtectedUser { name, reason } => {
                Self::forbidden(format!("streaming user '{name}' is built in: {reason}"))
            }
            ConfigError::UnknownUser { name } => {
                Self::not_found(format!("streaming user '{name}' not found"))
            }
            ConfigError::BackupNotFound { id } => {
                Self::not_found(format!("backup '{id}' not found"))
            }
            ConfigError::Busy { .. } => {
                Self::busy("another configuration change is in progress")
            }
            ConfigError::CorruptConfig { detail, .. } => {
                error!(error = %err, %detail, "live configuration is corrupt");
                Self::internal(format!("live configuration does not parse: {detail}"))
            }
            ConfigError::Io { .. } | ConfigError::TaskJoin { .. } | ConfigError::FsOps { .. } => {
                error!(error = %err, "configuration storage failed");
                Self::internal("configuration storage failed")
            }
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::Config { source } => source.into(),
            ControlError::ProtectedPort { port } => {
                Self::conflict(format!("port {port} is protected"))
            }
            ControlError::InvalidInput { field, reason, .. } => {
                Self::bad_request(format!("{field}: {reason}"))
            }
            ControlError::ChangeReverted { backup, message } => Self::change_reverted(format!(
                "service did not accept the change ({message}); restored backup {backup}"
            )),
            ControlError::RestartTimeout { unit, waited } => Self::restart_timeout(format!(
                "{unit} not healthy after {}s",
                waited.as_secs()
            )),
            ControlError::ServiceFailed {
                message,
                rollback_attempted,
            } => Self::service_failed(if rollback_attempted {
                format!("{message} (configuration was rolled back)")
            } else {
                message
            }),
            ControlError::MediaApi { ref url, .. } => {
                warn!(error = %err, %url, "media server API unreachable");
                Self::upstream("media server API unreachable")
            }
            ControlError::CommandSpawn { .. }
            | ControlError::CommandFailed { .. }
            | ControlError::CommandTimeout { .. } => {
                error!(error = ?err, "host command failed");
                Self::upstream("host command failed")
            }
            ControlError::RecordingNotFound { name } => {
                Self::not_found(format!("recording '{name}' not found"))
            }
            ControlError::Recordings { .. } | ControlError::Task { .. } => {
                error!(error = ?err, "recordings access failed");
                Self::internal("recordings access failed")
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => Self::unauthorized("invalid credentials"),
            AuthError::SessionExpired => Self::unauthorized("session expired"),
            AuthError::PendingApproval => Self::forbidden("account pending approval"),
            AuthError::RegistrationDisabled => Self::forbidden("registration is disabled"),
            AuthError::UsernameTaken { username } => {
                Self::conflict(format!("username '{username}' is taken"))
            }
            AuthError::UnknownAccount { username } => {
                Self::not_found(format!("account '{username}' not found"))
            }
            AuthError::NotPending { username } => {
                Self::conflict(format!("account '{username}' is not pending approval"))
            }
            AuthError::InvalidInput { field, reason } => Self::bad_request(format!(
                "{field}: {reason}"
            ))
            .with_invalid_params(vec![ProblemInvalidParam {
                pointer: pointer_for(field, ""),
                message: reason.to_string(),
            }]),
            AuthError::SelfDeletion => Self::conflict("cannot delete your own account"),
            AuthError::LastAdministrator => {
                Self::conflict("the last administrator cannot be removed or demoted")
            }
            other => {
                error!(error = ?other, "credential store failure");
                Self::internal("credential store failure")
            }
        }
    }
}

impl From<UpdateError> for ApiError {
    fn from(err: UpdateError) -> Self {
        match err {
            UpdateError::Service { source } => source.into(),
            UpdateError::Config { source } => source.into(),
            UpdateError::AlreadyCurrent { version } => {
                Self::conflict(format!("version {version} is already installed"))
            }
            UpdateError::NothingToRollBack => Self::conflict("no previous version is retained"),
            UpdateError::RolledBack { version, reason } => Self::conflict(format!(
                "update to {version} was rolled back: {reason}"
            )),
            UpdateError::Feed { ref url, .. } | UpdateError::FeedFormat { ref url, .. } => {
                warn!(error = ?err, %url, "release feed failed");
                Self::upstream("release feed unavailable")
            }
            UpdateError::InvalidVersion { value } => {
                Self::upstream(format!("release feed published invalid version '{value}'"))
            }
            UpdateError::ArtifactTooSmall { size, minimum } => Self::upstream(format!(
                "artifact of {size} bytes is below the {minimum} byte minimum"
            )),
            UpdateError::ChecksumMismatch { expected, actual } => Self::upstream(format!(
                "artifact checksum {actual} does not match {expected}"
            )),
            other => {
                error!(error = ?other, "update failed");
                Self::internal("update failed")
            }
        }
    }
}

pub(crate) fn pointer_for(section: &str, field: &str) -> String {
    let mut pointer = String::new();
    pointer.push('/');
    pointer.push_str(&encode_pointer_segment(section));

    if !field.is_empty() {
        pointer.push('/');
        pointer.push_str(&encode_pointer_segment(field));
    }

    pointer
}

fn encode_pointer_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn invalid_field_carries_a_pointer() {
        let err: ApiError = ConfigError::InvalidField {
            section: "protocols".to_string(),
            field: "rtmpAddress".to_string(),
            value: Some("8554".to_string()),
            reason: "port already used by another protocol",
        }
        .into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        let params = err.invalid_params.unwrap_or_default();
        assert_eq!(params[0].pointer, "/protocols/rtmpAddress");
    }

    #[test]
    fn control_failures_map_to_gateway_statuses() {
        let timeout: ApiError = ControlError::RestartTimeout {
            unit: "mediamtx".to_string(),
            waited: Duration::from_secs(30),
        }
        .into();
        assert_eq!(timeout.status, StatusCode::GATEWAY_TIMEOUT);

        let reverted: ApiError = ControlError::ChangeReverted {
            backup: "mediamtx.yml.20240101_000000_000".to_string(),
            message: "not healthy".to_string(),
        }
        .into();
        assert_eq!(reverted.status, StatusCode::CONFLICT);
        assert_eq!(reverted.kind, PROBLEM_CHANGE_REVERTED);

        let busy: ApiError = ControlError::Config {
            source: ConfigError::Busy {
                path: PathBuf::from("/etc/mediamtx.yml"),
            },
        }
        .into();
        assert_eq!(busy.kind, PROBLEM_BUSY);
    }

    #[test]
    fn auth_failures_distinguish_401_and_403() {
        assert_eq!(
            ApiError::from(AuthError::SessionExpired).status,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(AuthError::PendingApproval).status,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(AuthError::LastAdministrator).status,
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn pointer_segments_are_escaped() {
        assert_eq!(pointer_for("paths", "a/b~c"), "/paths/a~1b~0c");
        assert_eq!(pointer_for("password", ""), "/password");
    }
}
