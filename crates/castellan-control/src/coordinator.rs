//! Commit, restart, reconcile: the one path every operator mutation takes.
//!
//! # Design
//! - The store lock is taken once and handed to the restart cycle, so nothing
//!   else can commit between a change, its restart and a possible rollback.
//! - The firewall is reconciled only after the service came back healthy on
//!   the new document. A reverted change leaves the firewall alone.

use std::sync::Arc;

use castellan_config::{
    BackupId, CommitReceipt, ConfigError, ConfigStore, ConfigTxn, StructuredPatch,
};
use castellan_events::{Event, EventBus};
use castellan_telemetry::Metrics;
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::{ControlError, ControlResult};
use crate::firewall_sync::{ProtocolFirewallSync, ReconcileReport};
use crate::service::{CycleReport, ServiceController};

/// Result of a committed and applied change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeOutcome {
    /// Commit details.
    pub receipt: CommitReceipt,
    /// Restart cycle that loaded the change.
    pub restart: CycleReport,
    /// Firewall pass, for changes that can move listening ports.
    pub firewall: Option<ReconcileReport>,
}

/// Runs mutations through the store, the service controller and the
/// firewall reconciler.
#[derive(Clone)]
pub struct ChangeCoordinator {
    store: Arc<ConfigStore>,
    controller: Arc<ServiceController>,
    firewall: Arc<ProtocolFirewallSync>,
    events: EventBus,
    metrics: Metrics,
}

impl ChangeCoordinator {
    /// Coordinator over the given collaborators.
    #[must_use]
    pub const fn new(
        store: Arc<ConfigStore>,
        controller: Arc<ServiceController>,
        firewall: Arc<ProtocolFirewallSync>,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            controller,
            firewall,
            events,
            metrics,
        }
    }

    /// Store the coordinator commits through.
    #[must_use]
    pub const fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Service controller.
    #[must_use]
    pub const fn controller(&self) -> &Arc<ServiceController> {
        &self.controller
    }

    /// Apply a structured patch, restart, and reconcile the firewall when the
    /// patch touched protocols.
    ///
    /// # Errors
    ///
    /// Returns the store's validation or lock error with the live file
    /// untouched, `ChangeReverted` when the service only came back on the
    /// previous document, or `ServiceFailed`.
    #[instrument(name = "change.structured", skip_all, fields(patch = patch.label()))]
    pub async fn apply_structured(&self, patch: StructuredPatch) -> ControlResult<ChangeOutcome> {
        let reconcile = patch.touches_protocols();
        let mut txn = self.store.begin().await?;
        let receipt = self.checked(txn.apply_structured(patch).await)?;
        self.finish(txn, receipt, reconcile).await
    }

    /// Replace the whole document, restart, and reconcile.
    ///
    /// # Errors
    ///
    /// As [`Self::apply_structured`]; an unparseable text is `InvalidDocument`.
    #[instrument(name = "change.raw", skip_all)]
    pub async fn apply_raw(&self, text: String) -> ControlResult<ChangeOutcome> {
        let mut txn = self.store.begin().await?;
        let receipt = self.checked(txn.apply_raw(text).await)?;
        self.finish(txn, receipt, true).await
    }

    /// Put a named backup back in place, restart, and reconcile.
    ///
    /// # Errors
    ///
    /// Returns `BackupNotFound`, or the restart errors of
    /// [`Self::apply_structured`].
    #[instrument(name = "change.restore", skip_all, fields(backup = %id))]
    pub async fn restore(&self, id: BackupId) -> ControlResult<ChangeOutcome> {
        let mut txn = self.store.begin().await?;
        let receipt = self.checked(txn.restore(id).await)?;
        self.finish(txn, receipt, true).await
    }

    /// Re-read the firewall and reconcile it against the live document.
    ///
    /// # Errors
    ///
    /// Returns `CorruptConfig` when the live document cannot be parsed.
    pub async fn reconcile_firewall(&self) -> ControlResult<ReconcileReport> {
        let settings = self.store.read().await?.protocols()?;
        self.firewall.invalidate().await;
        Ok(self.firewall.reconcile(&settings).await)
    }

    fn checked(&self, result: Result<CommitReceipt, ConfigError>) -> ControlResult<CommitReceipt> {
        let receipt = result.inspect_err(|err| {
            if err.is_validation() {
                self.metrics.inc_config_validation_failure();
            }
        })?;
        self.metrics.inc_config_commit(receipt.kind.as_str());
        self.events.publish(Event::ConfigCommitted {
            revision: receipt.revision,
            backup: receipt.backup.to_string(),
            kind: receipt.kind.as_str().to_string(),
        });
        Ok(receipt)
    }

    async fn finish(
        &self,
        txn: ConfigTxn,
        receipt: CommitReceipt,
        reconcile: bool,
    ) -> ControlResult<ChangeOutcome> {
        let restart = self.controller.restart_after_commit(txn).await?;
        let firewall = if reconcile {
            let settings = self
                .store
                .read()
                .await
                .and_then(|document| document.protocols())
                .map_err(ControlError::from)?;
            Some(self.firewall.reconcile(&settings).await)
        } else {
            None
        };
        info!(
            revision = receipt.revision,
            backup = %receipt.backup,
            coalesced = restart.coalesced,
            "change applied"
        );
        Ok(ChangeOutcome {
            receipt,
            restart,
            firewall,
        })
    }
}
