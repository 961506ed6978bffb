//! # Design
//!
//! - Centralize application-level errors for settings, wiring and serving.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration values were invalid.
    #[error("invalid configuration")]
    InvalidConfig {
        /// Environment variable that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value, when one was supplied.
        value: Option<String>,
    },
    /// Host control operations failed.
    #[error("service control operation failed")]
    Control {
        /// Operation identifier.
        operation: &'static str,
        /// Source control error.
        source: castellan_control::ControlError,
    },
    /// Console identity operations failed.
    #[error("admin directory operation failed")]
    Auth {
        /// Operation identifier.
        operation: &'static str,
        /// Source auth error.
        source: castellan_auth::AuthError,
    },
    /// Self-update operations failed.
    #[error("update operation failed")]
    Update {
        /// Operation identifier.
        operation: &'static str,
        /// Source update error.
        source: castellan_updater::UpdateError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: castellan_telemetry::TelemetryError,
    },
    /// API server operations failed.
    #[error("api server operation failed")]
    ApiServer {
        /// Operation identifier.
        operation: &'static str,
        /// Source server error.
        source: anyhow::Error,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Source IO error.
        source: io::Error,
    },
}

impl AppError {
    pub(crate) fn invalid(field: &'static str, reason: &'static str, value: &str) -> Self {
        Self::InvalidConfig {
            field,
            reason,
            value: Some(value.to_string()),
        }
    }

    pub(crate) const fn control(
        operation: &'static str,
        source: castellan_control::ControlError,
    ) -> Self {
        Self::Control { operation, source }
    }

    pub(crate) const fn auth(operation: &'static str, source: castellan_auth::AuthError) -> Self {
        Self::Auth { operation, source }
    }

    pub(crate) const fn update(
        operation: &'static str,
        source: castellan_updater::UpdateError,
    ) -> Self {
        Self::Update { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: castellan_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn api_server(operation: &'static str, source: anyhow::Error) -> Self {
        Self::ApiServer { operation, source }
    }
}
