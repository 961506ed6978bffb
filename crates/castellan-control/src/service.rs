//! Restart state machine for the managed media service.
//!
//! # Design
//! - At most one cycle is in flight. Operator requests that arrive meanwhile
//!   join it and receive its report instead of starting another.
//! - A post-commit request never joins: the cycle in flight started before
//!   the commit and carries no rollback for it. It waits for that cycle to
//!   end and then runs its own, still holding the commit's transaction.
//! - Cycles run on a spawned task, so a caller that goes away never leaves
//!   the unit half-restarted.
//! - A cycle that follows a commit owns the open [`ConfigTxn`]. When the new
//!   document does not come up healthy, the backup taken by that commit is
//!   restored under the same lock and the restart is retried exactly once.
//! - The pending-restart flag is derived from store revisions: the revision
//!   a healthy cycle started from is recorded, and anything newer is pending.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use castellan_config::{BackupId, ConfigStore, ConfigTxn};
use castellan_events::{Event, EventBus, ServiceState};
use castellan_telemetry::Metrics;
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ControlError, ControlResult};
use crate::host::{HealthProbe, ServiceManager, UnitStatus};

/// Default window for the service to come back healthy.
pub const DEFAULT_RESTART_TIMEOUT: Duration = Duration::from_secs(30);
/// Default window for the service to exit after a stop.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(15);
/// Default delay between health polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Timing and identity of the managed unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Unit name handed to the service manager.
    pub unit: String,
    /// Health-check window after a start.
    pub restart_timeout: Duration,
    /// Exit window after a stop.
    pub stop_timeout: Duration,
    /// Delay between polls.
    pub poll_interval: Duration,
}

impl ControllerOptions {
    /// Defaults for `unit`.
    #[must_use]
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            restart_timeout: DEFAULT_RESTART_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Why a cycle was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    /// Operator start.
    Start,
    /// Operator stop.
    Stop,
    /// Operator restart.
    Restart,
    /// Restart following a configuration commit, with rollback.
    ApplyChange,
}

impl CycleKind {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::ApplyChange => "apply_change",
        }
    }
}

/// Last failure surfaced to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    /// What went wrong.
    pub message: String,
    /// Whether the document was rolled back before giving up.
    pub rollback_attempted: bool,
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
}

/// Read model for dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    /// Current state.
    pub state: ServiceState,
    /// A committed document has not been loaded by a healthy restart yet.
    pub restart_pending: bool,
    /// Most recent failure, cleared by the next clean cycle.
    pub last_failure: Option<FailureRecord>,
}

/// Outcome of one cycle as seen by a requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Sequential cycle id.
    pub cycle: u64,
    /// What the cycle did.
    pub kind: CycleKind,
    /// State at the end of the cycle.
    pub state: ServiceState,
    /// Start attempts made (0 for a stop).
    pub attempts: u32,
    /// First failure, when any attempt failed.
    pub failure: Option<String>,
    /// The first failure was a health-check timeout.
    pub timed_out: bool,
    /// A rollback was attempted.
    pub rollback_attempted: bool,
    /// Backup restored by the rollback.
    pub rolled_back_to: Option<String>,
    /// The requester joined a cycle that was already in flight.
    pub coalesced: bool,
    /// A commit landed after this cycle started.
    pub restart_pending: bool,
}

impl CycleReport {
    const fn new(cycle: u64, kind: CycleKind) -> Self {
        Self {
            cycle,
            kind,
            state: ServiceState::Stopped,
            attempts: 0,
            failure: None,
            timed_out: false,
            rollback_attempted: false,
            rolled_back_to: None,
            coalesced: false,
            restart_pending: false,
        }
    }

    fn aborted(cycle: u64, kind: CycleKind, err: &JoinError) -> Self {
        Self {
            state: ServiceState::Failed,
            failure: Some(format!("restart task aborted: {err}")),
            ..Self::new(cycle, kind)
        }
    }

    fn into_result(self, options: &ControllerOptions) -> ControlResult<Self> {
        if self.state != ServiceState::Failed {
            return match self.rolled_back_to {
                Some(backup) => Err(ControlError::ChangeReverted {
                    backup,
                    message: self.failure.unwrap_or_default(),
                }),
                None => Ok(self),
            };
        }
        if self.timed_out && !self.rollback_attempted {
            return Err(ControlError::RestartTimeout {
                unit: options.unit.clone(),
                waited: options.restart_timeout,
            });
        }
        Err(ControlError::ServiceFailed {
            message: self
                .failure
                .unwrap_or_else(|| "service failed".to_string()),
            rollback_attempted: self.rollback_attempted,
        })
    }
}

struct RollbackPlan {
    txn: ConfigTxn,
    backup: BackupId,
}

type SharedReport = Shared<BoxFuture<'static, CycleReport>>;

struct InFlight {
    id: u64,
    report: SharedReport,
}

/// What a request does about the cycle slot.
enum Step {
    /// Start a cycle of its own.
    Run(SharedReport),
    /// Share the report of the cycle in flight.
    Join(SharedReport),
    /// Let the cycle in flight finish, then try again.
    Wait(SharedReport),
}

enum AttemptError {
    Timeout(Duration),
    Host(ControlError),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(waited) => {
                write!(f, "service not healthy after {}s", waited.as_secs_f32())
            }
            Self::Host(ControlError::CommandFailed {
                program,
                operation,
                stderr,
                ..
            }) => write!(f, "{program} {operation} failed: {stderr}"),
            Self::Host(err) => write!(f, "{err}"),
        }
    }
}

/// Drives the managed unit through stop, start and health verification.
pub struct ServiceController {
    options: ControllerOptions,
    manager: Arc<dyn ServiceManager>,
    probe: Arc<dyn HealthProbe>,
    store: Arc<ConfigStore>,
    state: watch::Sender<ServiceState>,
    applied: AtomicU64,
    last_failure: Mutex<Option<FailureRecord>>,
    in_flight: Mutex<Option<InFlight>>,
    cycles: AtomicU64,
    events: EventBus,
    metrics: Metrics,
}

impl ServiceController {
    /// Controller for `options.unit`. The state starts as `stopped` until
    /// [`Self::refresh_from_host`] or a cycle says otherwise.
    #[must_use]
    pub fn new(
        options: ControllerOptions,
        manager: Arc<dyn ServiceManager>,
        probe: Arc<dyn HealthProbe>,
        store: Arc<ConfigStore>,
        events: EventBus,
        metrics: Metrics,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ServiceState::Stopped);
        Arc::new(Self {
            applied: AtomicU64::new(store.revision()),
            options,
            manager,
            probe,
            store,
            state,
            last_failure: Mutex::new(None),
            in_flight: Mutex::new(None),
            cycles: AtomicU64::new(0),
            events,
            metrics,
        })
    }

    /// Managed unit name.
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.options.unit
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    /// True when a committed document has not been loaded yet.
    #[must_use]
    pub fn restart_pending(&self) -> bool {
        self.store.revision() > self.applied.load(Ordering::Acquire)
    }

    /// True while a cycle is running.
    #[must_use]
    pub fn is_cycling(&self) -> bool {
        self.in_flight_guard().is_some()
    }

    /// Dashboard snapshot.
    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            state: self.state(),
            restart_pending: self.restart_pending(),
            last_failure: self
                .last_failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Adopt the unit manager's view of the service when no cycle is running.
    ///
    /// # Errors
    ///
    /// Returns the service manager's error when the status query fails.
    pub async fn refresh_from_host(&self) -> ControlResult<ServiceState> {
        if self.is_cycling() {
            return Ok(self.state());
        }
        let status = self.manager.status(&self.options.unit).await?;
        let state = status.service_state();
        if !self.is_cycling() {
            self.set_state(state);
        }
        Ok(state)
    }

    /// Operator start.
    ///
    /// # Errors
    ///
    /// Returns `RestartTimeout` or `ServiceFailed` when the service does not
    /// come up healthy.
    pub async fn start(self: &Arc<Self>) -> ControlResult<CycleReport> {
        self.request(CycleKind::Start, None).await
    }

    /// Operator stop.
    ///
    /// # Errors
    ///
    /// Returns `ServiceFailed` when the stop command fails or the unit keeps
    /// running.
    pub async fn stop(self: &Arc<Self>) -> ControlResult<CycleReport> {
        self.request(CycleKind::Stop, None).await
    }

    /// Operator restart; joins a cycle already in flight.
    ///
    /// # Errors
    ///
    /// Returns `RestartTimeout` or `ServiceFailed` when the service does not
    /// come back healthy.
    pub async fn request_restart(self: &Arc<Self>) -> ControlResult<CycleReport> {
        self.request(CycleKind::Restart, None).await
    }

    /// Restart after `txn` committed a change, rolling back to the backup
    /// that commit took when the service does not come back healthy.
    ///
    /// The transaction is released when the cycle ends.
    ///
    /// # Errors
    ///
    /// Returns `ChangeReverted` when the rollback brought the service back,
    /// and `ServiceFailed` when the retry failed as well.
    pub async fn restart_after_commit(self: &Arc<Self>, txn: ConfigTxn) -> ControlResult<CycleReport> {
        match txn.last_backup().cloned() {
            Some(backup) => {
                self.request(CycleKind::ApplyChange, Some(RollbackPlan { txn, backup }))
                    .await
            }
            None => self.request(CycleKind::Restart, None).await,
        }
    }

    async fn request(
        self: &Arc<Self>,
        kind: CycleKind,
        mut plan: Option<RollbackPlan>,
    ) -> ControlResult<CycleReport> {
        loop {
            let step = {
                let mut slot = self.in_flight_guard();
                match slot.as_ref() {
                    Some(in_flight) if kind == CycleKind::ApplyChange => {
                        info!(cycle = in_flight.id, "change waits for the cycle in flight");
                        Step::Wait(in_flight.report.clone())
                    }
                    Some(in_flight) => {
                        info!(cycle = in_flight.id, requested = kind.as_str(), "joining cycle in flight");
                        Step::Join(in_flight.report.clone())
                    }
                    None => {
                        let id = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
                        let this = Arc::clone(self);
                        let plan = plan.take();
                        let handle = tokio::spawn(async move { this.run(id, kind, plan).await });
                        let report = async move {
                            handle
                                .await
                                .unwrap_or_else(|err| CycleReport::aborted(id, kind, &err))
                        }
                        .boxed()
                        .shared();
                        *slot = Some(InFlight {
                            id,
                            report: report.clone(),
                        });
                        Step::Run(report)
                    }
                }
            };
            let (report, coalesced) = match step {
                Step::Wait(report) => {
                    report.await;
                    continue;
                }
                Step::Join(report) => (report, true),
                Step::Run(report) => (report, false),
            };
            let mut report = report.await;
            report.coalesced = coalesced;
            report.restart_pending = self.restart_pending();
            return report.into_result(&self.options);
        }
    }

    #[instrument(
        name = "service.cycle",
        skip(self, plan),
        fields(unit = %self.options.unit, kind = kind.as_str())
    )]
    async fn run(self: Arc<Self>, id: u64, kind: CycleKind, plan: Option<RollbackPlan>) -> CycleReport {
        let _release = ReleaseSlot {
            controller: Arc::clone(&self),
            id,
        };
        let mut report = CycleReport::new(id, kind);
        let mut target = self.store.revision();

        let first = if kind == CycleKind::Stop {
            self.stop_once().await
        } else {
            report.attempts = 1;
            self.start_once(kind).await
        };

        let outcome = match (first, plan) {
            (Ok(()), _) => Ok(()),
            (Err(err), None) => {
                report.timed_out = matches!(err, AttemptError::Timeout(_));
                report.failure = Some(err.to_string());
                Err(err.to_string())
            }
            (Err(err), Some(mut plan)) => {
                report.timed_out = matches!(err, AttemptError::Timeout(_));
                report.failure = Some(err.to_string());
                report.rollback_attempted = true;
                warn!(backup = %plan.backup, error = %err, "new configuration unhealthy; rolling back");
                match self.roll_back(&mut plan).await {
                    Ok(revision) => {
                        target = revision;
                        report.rolled_back_to = Some(plan.backup.to_string());
                        report.attempts = 2;
                        self.start_once(kind)
                            .await
                            .map_err(|retry| format!("{err}; retry after rollback: {retry}"))
                    }
                    Err(rollback) => Err(format!("{err}; rollback failed: {rollback}")),
                }
            }
        };

        match outcome {
            Ok(()) => {
                if kind == CycleKind::Stop {
                    self.set_state(ServiceState::Stopped);
                } else {
                    self.applied.fetch_max(target, Ordering::AcqRel);
                    self.set_state(ServiceState::Running);
                }
                let label = if report.rolled_back_to.is_some() {
                    self.record_failure(report.failure.clone().unwrap_or_default(), true);
                    "rolled_back"
                } else {
                    self.clear_failure();
                    "success"
                };
                self.metrics.inc_service_restart(label);
                info!(state = %self.state(), attempts = report.attempts, "cycle finished");
            }
            Err(message) => {
                self.set_state(ServiceState::Failed);
                self.metrics.inc_service_restart("failed");
                error!(error = %message, rollback_attempted = report.rollback_attempted, "service failed");
                self.events.publish(Event::ServiceFailed {
                    message: message.clone(),
                    rollback_attempted: report.rollback_attempted,
                });
                self.record_failure(message.clone(), report.rollback_attempted);
                report.failure = Some(message);
            }
        }
        report.state = self.state();
        report
    }

    async fn roll_back(&self, plan: &mut RollbackPlan) -> ControlResult<u64> {
        let receipt = plan.txn.restore(plan.backup.clone()).await?;
        self.metrics.inc_config_rollback();
        self.metrics.inc_config_commit(receipt.kind.as_str());
        self.events.publish(Event::ConfigCommitted {
            revision: receipt.revision,
            backup: receipt.backup.to_string(),
            kind: receipt.kind.as_str().to_string(),
        });
        self.events.publish(Event::RollbackPerformed {
            backup: plan.backup.to_string(),
        });
        info!(backup = %plan.backup, revision = receipt.revision, "configuration rolled back");
        Ok(receipt.revision)
    }

    async fn start_once(&self, kind: CycleKind) -> Result<(), AttemptError> {
        if kind == CycleKind::Start {
            self.set_state(ServiceState::Starting);
        } else {
            self.set_state(ServiceState::Restarting);
            self.manager
                .stop(&self.options.unit)
                .await
                .map_err(AttemptError::Host)?;
            self.wait_stopped().await?;
        }
        self.manager
            .start(&self.options.unit)
            .await
            .map_err(AttemptError::Host)?;
        self.wait_healthy().await
    }

    async fn stop_once(&self) -> Result<(), AttemptError> {
        self.manager
            .stop(&self.options.unit)
            .await
            .map_err(AttemptError::Host)?;
        self.wait_stopped().await
    }

    async fn wait_stopped(&self) -> Result<(), AttemptError> {
        let deadline = Instant::now() + self.options.stop_timeout;
        loop {
            match self.manager.status(&self.options.unit).await {
                Ok(UnitStatus::Active | UnitStatus::Activating | UnitStatus::Deactivating) => {}
                Ok(_) => return Ok(()),
                Err(err) => debug!(error = %err, "status query failed while stopping"),
            }
            if Instant::now() >= deadline {
                return Err(AttemptError::Timeout(self.options.stop_timeout));
            }
            sleep(self.options.poll_interval).await;
        }
    }

    async fn wait_healthy(&self) -> Result<(), AttemptError> {
        let deadline = Instant::now() + self.options.restart_timeout;
        loop {
            match self.manager.status(&self.options.unit).await {
                Ok(UnitStatus::Active) if self.probe.check().await => return Ok(()),
                Ok(status) => debug!(?status, "waiting for service health"),
                Err(err) => debug!(error = %err, "status query failed while starting"),
            }
            if Instant::now() >= deadline {
                return Err(AttemptError::Timeout(self.options.restart_timeout));
            }
            sleep(self.options.poll_interval).await;
        }
    }

    fn set_state(&self, next: ServiceState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, state = %next, "service state changed");
            self.metrics.set_service_state(state_code(next));
            self.events.publish(Event::ServiceStateChanged { state: next });
        }
    }

    fn record_failure(&self, message: String, rollback_attempted: bool) {
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(FailureRecord {
            message,
            rollback_attempted,
            at: Utc::now(),
        });
    }

    fn clear_failure(&self) {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn in_flight_guard(&self) -> std::sync::MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Frees the in-flight slot when the cycle task ends, panics included.
struct ReleaseSlot {
    controller: Arc<ServiceController>,
    id: u64,
}

impl Drop for ReleaseSlot {
    fn drop(&mut self) {
        let mut slot = self.controller.in_flight_guard();
        if slot.as_ref().is_some_and(|in_flight| in_flight.id == self.id) {
            slot.take();
        }
    }
}

/// Gauge encoding of [`ServiceState`].
#[must_use]
pub const fn state_code(state: ServiceState) -> i64 {
    match state {
        ServiceState::Stopped => 0,
        ServiceState::Starting => 1,
        ServiceState::Running => 2,
        ServiceState::Restarting => 3,
        ServiceState::Failed => 4,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use async_trait::async_trait;
    use castellan_config::ConfigStoreOptions;
    use tempfile::TempDir;

    type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

    /// Unit whose status after each start is taken from a script.
    #[derive(Default)]
    struct ScriptedUnit {
        after_start: Mutex<VecDeque<UnitStatus>>,
        current: Mutex<Option<UnitStatus>>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl ScriptedUnit {
        fn healthy_after(statuses: &[UnitStatus]) -> Arc<Self> {
            let unit = Self::default();
            unit.after_start
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(statuses.iter().copied());
            Arc::new(unit)
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        fn set(&self, status: UnitStatus) {
            *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
        }
    }

    #[async_trait]
    impl ServiceManager for ScriptedUnit {
        async fn start(&self, _unit: &str) -> ControlResult<()> {
            self.calls.lock().unwrap_or_else(PoisonError::into_inner).push("start");
            let next = self
                .after_start
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .unwrap_or(UnitStatus::Active);
            self.set(next);
            Ok(())
        }

        async fn stop(&self, _unit: &str) -> ControlResult<()> {
            self.calls.lock().unwrap_or_else(PoisonError::into_inner).push("stop");
            self.set(UnitStatus::Inactive);
            Ok(())
        }

        async fn restart(&self, unit: &str) -> ControlResult<()> {
            self.stop(unit).await?;
            self.start(unit).await
        }

        async fn status(&self, _unit: &str) -> ControlResult<UnitStatus> {
            Ok(self
                .current
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .unwrap_or(UnitStatus::Inactive))
        }
    }

    struct AlwaysUp;

    #[async_trait]
    impl HealthProbe for AlwaysUp {
        async fn check(&self) -> bool {
            true
        }
    }

    fn controller(unit: Arc<ScriptedUnit>, dir: &TempDir) -> TestResult<Arc<ServiceController>> {
        let store = ConfigStore::new(ConfigStoreOptions::new(
            dir.path().join("mediamtx.yml"),
            dir.path().join("backups"),
        ));
        let mut options = ControllerOptions::new("mediamtx");
        options.restart_timeout = Duration::from_millis(200);
        options.stop_timeout = Duration::from_millis(200);
        options.poll_interval = Duration::from_millis(10);
        Ok(ServiceController::new(
            options,
            unit,
            Arc::new(AlwaysUp),
            store,
            EventBus::new(),
            Metrics::new()?,
        ))
    }

    #[tokio::test]
    async fn restart_runs_stop_then_start_and_ends_running() -> TestResult<()> {
        let dir = TempDir::new()?;
        let unit = ScriptedUnit::healthy_after(&[]);
        let controller = controller(unit.clone(), &dir)?;
        let report = controller.request_restart().await?;
        assert_eq!(report.state, ServiceState::Running);
        assert_eq!(report.attempts, 1);
        assert_eq!(unit.calls(), vec!["stop", "start"]);
        assert!(controller.status().last_failure.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn operator_restart_timeout_fails_without_rollback() -> TestResult<()> {
        let dir = TempDir::new()?;
        let unit = ScriptedUnit::healthy_after(&[UnitStatus::Failed]);
        let controller = controller(unit.clone(), &dir)?;
        let result = controller.request_restart().await;
        assert!(matches!(result, Err(ControlError::RestartTimeout { .. })));
        assert_eq!(controller.state(), ServiceState::Failed);
        let failure = controller.status().last_failure.ok_or("no failure recorded")?;
        assert!(!failure.rollback_attempted);
        assert_eq!(unit.calls(), vec!["stop", "start"]);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_cycle() -> TestResult<()> {
        let dir = TempDir::new()?;
        let unit = ScriptedUnit::healthy_after(&[]);
        let controller = controller(unit.clone(), &dir)?;
        let (first, second) = tokio::join!(controller.request_restart(), controller.request_restart());
        let (first, second) = (first?, second?);
        assert_eq!(first.cycle, second.cycle);
        assert!(first.coalesced ^ second.coalesced);
        assert_eq!(unit.calls(), vec!["stop", "start"]);
        assert!(!controller.is_cycling());
        Ok(())
    }

    #[tokio::test]
    async fn stop_and_refresh_follow_the_unit() -> TestResult<()> {
        let dir = TempDir::new()?;
        let unit = ScriptedUnit::healthy_after(&[]);
        let controller = controller(unit.clone(), &dir)?;
        controller.start().await?;
        assert_eq!(controller.state(), ServiceState::Running);
        let report = controller.stop().await?;
        assert_eq!(report.state, ServiceState::Stopped);
        unit.set(UnitStatus::Failed);
        assert_eq!(controller.refresh_from_host().await?, ServiceState::Failed);
        assert_eq!(controller.state(), ServiceState::Failed);
        Ok(())
    }
}
