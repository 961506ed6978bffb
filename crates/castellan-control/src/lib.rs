//! Lifecycle control of the managed media service: restart state machine,
//! host collaborators, firewall reconciliation, log tailing and the change
//! coordinator that ties commits to restarts.
#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

pub mod coordinator;
pub mod error;
pub mod firewall_sync;
pub mod host;
pub mod logs;
pub mod recordings;
pub mod service;
pub mod streams;

pub use coordinator::{ChangeCoordinator, ChangeOutcome};
pub use error::{ControlError, ControlResult};
pub use firewall_sync::{
    FirewallSyncWarning, ProtocolFirewallSync, ReconcileReport, SYSTEM_PROTECTED_PORTS,
};
pub use host::{
    CommandOutput, CommandRunner, Firewall, HealthProbe, HttpHealthProbe, NoFirewall, PortRule,
    ServiceManager, SystemRunner, SystemdManager, UfwFirewall, UnitStatus,
};
pub use logs::{LogCommand, LogStreamer, LogSubscription};
pub use recordings::{IN_PROGRESS_WINDOW, Recording, RecordingLibrary, RecordingUsage};
pub use service::{
    ControllerOptions, CycleKind, CycleReport, FailureRecord, ServiceController, ServiceStatus,
    state_code,
};
pub use streams::{MediaApiClient, RELAY_PREFIX, StreamInfo, StreamViewers, ViewerMetrics};
