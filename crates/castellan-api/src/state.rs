//! Shared state handed to every handler.

use std::sync::Arc;

use castellan_auth::AdminDirectory;
use castellan_config::{ConfigStore, StreamingUserRegistry};
use castellan_control::{
    ChangeCoordinator, LogStreamer, MediaApiClient, RecordingLibrary, ServiceController,
};
use castellan_events::EventBus;
use castellan_telemetry::Metrics;
use castellan_updater::AutoUpdater;

/// Collaborators the HTTP surface drives.
pub struct ApiState {
    /// Console identities and sessions.
    pub directory: Arc<AdminDirectory>,
    /// Commit, restart and reconcile path for every configuration mutation.
    pub changes: ChangeCoordinator,
    /// Streaming credential CRUD.
    pub registry: StreamingUserRegistry,
    /// Per-client log tails.
    pub logs: LogStreamer,
    /// Media server path listing.
    pub streams: MediaApiClient,
    /// Recordings on disk.
    pub recordings: RecordingLibrary,
    /// Console self-update.
    pub updater: Arc<AutoUpdater>,
    /// Domain event fan-out.
    pub events: EventBus,
    /// Prometheus registry.
    pub metrics: Metrics,
    /// Console version reported by `/health`.
    pub version: String,
}

impl ApiState {
    pub(crate) const fn store(&self) -> &Arc<ConfigStore> {
        self.changes.store()
    }

    pub(crate) const fn controller(&self) -> &Arc<ServiceController> {
        self.changes.controller()
    }
}
