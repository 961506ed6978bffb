//! Host collaborators: unit manager, health probe, firewall, and the command
//! runner the system implementations shell out through.
//!
//! # Design
//! - Each boundary is a trait so the controller and the firewall sync can be
//!   driven by in-memory fakes in tests.
//! - System implementations never build shell strings; arguments are passed
//!   as a vector to the program.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use castellan_config::Transport;
use castellan_events::ServiceState;
use serde::{Deserialize, Serialize};

use crate::error::ControlResult;

pub mod command;
pub mod probe;
pub mod systemd;
pub mod ufw;

pub use command::{CommandOutput, CommandRunner, SystemRunner};
pub use probe::HttpHealthProbe;
pub use systemd::SystemdManager;
pub use ufw::{NoFirewall, UfwFirewall};

/// Unit state as reported by the service manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Running.
    Active,
    /// Start in progress.
    Activating,
    /// Stop in progress.
    Deactivating,
    /// Not running.
    Inactive,
    /// Exited with an error.
    Failed,
    /// Anything the manager reported that is not recognised.
    Unknown,
}

impl UnitStatus {
    /// Parse `systemctl is-active` output.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "active" | "reloading" => Self::Active,
            "activating" => Self::Activating,
            "deactivating" => Self::Deactivating,
            "inactive" => Self::Inactive,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Console state implied by the unit state.
    #[must_use]
    pub const fn service_state(self) -> ServiceState {
        match self {
            Self::Active => ServiceState::Running,
            Self::Activating => ServiceState::Starting,
            Self::Failed => ServiceState::Failed,
            Self::Deactivating | Self::Inactive | Self::Unknown => ServiceState::Stopped,
        }
    }
}

/// Start/stop/status operations against a host service unit.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Start `unit`.
    async fn start(&self, unit: &str) -> ControlResult<()>;
    /// Stop `unit`.
    async fn stop(&self, unit: &str) -> ControlResult<()>;
    /// Restart `unit` in one manager call.
    async fn restart(&self, unit: &str) -> ControlResult<()>;
    /// Current state of `unit`.
    async fn status(&self, unit: &str) -> ControlResult<UnitStatus>;
}

/// Lightweight liveness query against the running media server.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// True when the service answered.
    async fn check(&self) -> bool;
}

/// One firewall allow rule. A rule without a transport admits both TCP and
/// UDP, as `ufw allow 5000` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortRule {
    /// Port number.
    pub port: u16,
    /// Transport; `None` for a rule that covers both.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,
}

impl PortRule {
    /// Rule for `port`/`transport`.
    #[must_use]
    pub const fn new(port: u16, transport: Transport) -> Self {
        Self {
            port,
            transport: Some(transport),
        }
    }

    /// Rule for `port` on every transport.
    #[must_use]
    pub const fn any(port: u16) -> Self {
        Self {
            port,
            transport: None,
        }
    }
}

impl fmt::Display for PortRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.transport {
            Some(transport) => write!(f, "{}/{}", self.port, transport.as_str()),
            None => write!(f, "{}", self.port),
        }
    }
}

/// Add-port, remove-port and list-rules against the host firewall.
#[async_trait]
pub trait Firewall: Send + Sync {
    /// Currently open allow rules.
    async fn open_rules(&self) -> ControlResult<BTreeSet<PortRule>>;
    /// Open `rule`.
    async fn allow(&self, rule: PortRule) -> ControlResult<()>;
    /// Close `rule`.
    async fn remove(&self, rule: PortRule) -> ControlResult<()>;
}
