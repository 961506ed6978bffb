//! Self-update of the console binary.
//!
//! # Design
//! - `apply` runs inside the console: download to staging, size and checksum
//!   checks, then a swap that copies the running binary to the retained slot
//!   before the new one replaces it. It holds the configuration lock
//!   throughout so no document commit interleaves with the swap.
//! - Restarting the console unit would kill the process doing the restart, so
//!   the restart and its health gate are handed to a transient unit running
//!   the retained (known good) binary with `finalize-update`.
//! - `finalize` restarts the unit and polls its health. When the new binary
//!   does not come up in time the retained artifact is put back and the unit
//!   restarted again.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use castellan_config::ConfigStore;
use castellan_control::{CommandRunner, ControlError, HealthProbe, ServiceManager, UnitStatus};
use castellan_events::{Event, EventBus};
use castellan_telemetry::Metrics;
use chrono::Utc;
use serde::Serialize;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{UpdateError, UpdateResult};
use crate::feed::{ReleaseFeed, UpdateRelease};
use crate::marker::{InstallMarker, PendingSwap};
use crate::version::{Version, is_newer};

/// Artifacts smaller than this are rejected before checksum verification.
pub const MIN_ARTIFACT_BYTES: u64 = 1000;
/// Default health window after a console restart.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(30);

const HANDOFF_PROGRAM: &str = "systemd-run";

/// Where the console is installed and how long it may take to come back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterOptions {
    /// Path of the installed console binary.
    pub install_path: PathBuf,
    /// Directory for staging, the retained artifact and the marker.
    pub data_dir: PathBuf,
    /// The console's own unit.
    pub console_unit: String,
    /// Version of the running binary, used when no marker exists yet.
    pub running_version: String,
    /// Health window after a restart.
    pub health_timeout: Duration,
    /// Delay between health polls.
    pub poll_interval: Duration,
}

impl UpdaterOptions {
    /// Options with default timings.
    #[must_use]
    pub fn new(
        install_path: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
        console_unit: impl Into<String>,
        running_version: impl Into<String>,
    ) -> Self {
        Self {
            install_path: install_path.into(),
            data_dir: data_dir.into(),
            console_unit: console_unit.into(),
            running_version: running_version.into(),
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Download staging directory.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join("staging")
    }

    /// Retained previous artifact.
    #[must_use]
    pub fn previous_path(&self) -> PathBuf {
        self.data_dir.join("previous").join("castellan")
    }

    /// Installed-version marker.
    #[must_use]
    pub fn marker_path(&self) -> PathBuf {
        self.data_dir.join("install.json")
    }
}

/// Launches `finalize-update` outside the console unit.
#[derive(Clone)]
pub struct FinalizeHandoff {
    runner: Arc<dyn CommandRunner>,
    unit: String,
    env: Vec<(String, String)>,
}

impl FinalizeHandoff {
    /// Hand-off through `systemd-run` as transient unit `unit`, forwarding
    /// `env` to the helper.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, unit: impl Into<String>, env: Vec<(String, String)>) -> Self {
        Self {
            runner,
            unit: unit.into(),
            env,
        }
    }

    async fn launch(&self, binary: &Path) -> UpdateResult<()> {
        let mut args = vec![
            format!("--unit={}", self.unit),
            "--collect".to_string(),
            "--on-active=2".to_string(),
        ];
        args.extend(self.env.iter().map(|(key, value)| format!("--setenv={key}={value}")));
        args.push(binary.display().to_string());
        args.push("finalize-update".to_string());
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.runner.run(HANDOFF_PROGRAM, &argv).await?;
        if !output.success() {
            return Err(ControlError::CommandFailed {
                program: HANDOFF_PROGRAM.to_string(),
                operation: "updater.handoff",
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            }
            .into());
        }
        info!(unit = %self.unit, "finalize hand-off scheduled");
        Ok(())
    }
}

/// Host collaborators of the updater.
#[derive(Clone)]
pub struct UpdaterHost {
    /// Release source.
    pub feed: Arc<dyn ReleaseFeed>,
    /// Unit manager for the console's own unit.
    pub manager: Arc<dyn ServiceManager>,
    /// Console liveness probe.
    pub probe: Arc<dyn HealthProbe>,
    /// Hand-off launcher.
    pub handoff: FinalizeHandoff,
}

/// A swap that was performed and handed off for verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapReport {
    /// Version now at the install path.
    pub version: String,
    /// Version retained for rollback.
    pub retained: String,
    /// Downloaded bytes, for an update.
    pub bytes: Option<u64>,
}

/// Result of a finalize run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FinalizeOutcome {
    /// No swap was waiting.
    NothingPending,
    /// The swapped-in version came up healthy.
    Applied {
        /// Installed version.
        version: String,
    },
    /// The swapped-in version failed and the retained one is back.
    RolledBack {
        /// Abandoned version.
        version: String,
        /// Restored version.
        restored: String,
        /// Why.
        reason: String,
    },
}

/// Checks for, applies and reverts console updates.
pub struct AutoUpdater {
    options: UpdaterOptions,
    host: UpdaterHost,
    store: Arc<ConfigStore>,
    events: EventBus,
    metrics: Metrics,
}

impl AutoUpdater {
    /// Updater sharing `store`'s mutation lock.
    #[must_use]
    pub const fn new(
        options: UpdaterOptions,
        host: UpdaterHost,
        store: Arc<ConfigStore>,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        Self {
            options,
            host,
            store,
            events,
            metrics,
        }
    }

    /// Options in use.
    #[must_use]
    pub const fn options(&self) -> &UpdaterOptions {
        &self.options
    }

    /// Current install marker.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Serde` when an existing marker cannot be read.
    pub async fn installed(&self) -> UpdateResult<InstallMarker> {
        let path = self.options.marker_path();
        let running = self.options.running_version.clone();
        blocking("updater.marker.load", move || InstallMarker::load(&path, &running)).await
    }

    /// Latest release when it is newer than the installed version.
    ///
    /// # Errors
    ///
    /// Returns feed errors or `InvalidVersion`.
    #[instrument(name = "updater.check", skip(self))]
    pub async fn check_latest(&self) -> UpdateResult<Option<UpdateRelease>> {
        let release = self.host.feed.latest().await?;
        let marker = self.installed().await?;
        if !is_newer(&release.version, &marker.version)? {
            debug!(installed = %marker.version, latest = %release.version, "console is up to date");
            return Ok(None);
        }
        info!(installed = %marker.version, latest = %release.version, "console update available");
        self.events.publish(Event::UpdateAvailable {
            version: release.version.clone(),
        });
        Ok(Some(release))
    }

    /// Stage, verify and swap in `release`, then hand off the restart.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyCurrent`, download and verification errors (install
    /// path untouched), or swap and hand-off errors (swap undone).
    #[instrument(name = "updater.apply", skip_all, fields(version = %release.version))]
    pub async fn apply(&self, release: &UpdateRelease) -> UpdateResult<SwapReport> {
        let _exclusive = self.store.begin().await?;
        let result = self.apply_locked(release).await;
        match &result {
            Ok(_) => self.metrics.inc_update_attempt("swapped"),
            Err(err) => {
                warn!(error = %err, "update not applied");
                self.metrics.inc_update_attempt("failed");
            }
        }
        result
    }

    async fn apply_locked(&self, release: &UpdateRelease) -> UpdateResult<SwapReport> {
        let marker = self.installed().await?;
        if !is_newer(&release.version, &marker.version)? {
            return Err(UpdateError::AlreadyCurrent {
                version: marker.version,
            });
        }
        let (staged, bytes) = self.stage(release).await?;
        let retained = marker.version.clone();
        self.swap_in(staged.clone(), marker, release.version.clone())
            .await?;
        discard(&staged).await;
        self.hand_off().await?;
        info!(version = %release.version, retained = %retained, bytes, "update swapped in");
        Ok(SwapReport {
            version: release.version.clone(),
            retained,
            bytes: Some(bytes),
        })
    }

    /// Swap the retained artifact back in and hand off the restart.
    ///
    /// # Errors
    ///
    /// Returns `NothingToRollBack` when no previous artifact is retained.
    #[instrument(name = "updater.rollback", skip(self))]
    pub async fn rollback(&self) -> UpdateResult<SwapReport> {
        let _exclusive = self.store.begin().await?;
        let marker = self.installed().await?;
        let Some(previous) = marker.previous_version.clone() else {
            return Err(UpdateError::NothingToRollBack);
        };
        if !self.options.previous_path().is_file() {
            return Err(UpdateError::NothingToRollBack);
        }
        let retained = marker.version.clone();
        self.swap_in(self.options.previous_path(), marker, previous.clone())
            .await?;
        self.hand_off().await?;
        info!(version = %previous, retained = %retained, "rollback swapped in");
        Ok(SwapReport {
            version: previous,
            retained,
            bytes: None,
        })
    }

    /// Restart the console unit and keep the pending swap only when it comes
    /// up healthy; otherwise restore the retained artifact.
    ///
    /// # Errors
    ///
    /// Returns marker or filesystem errors. An unhealthy new version is not
    /// an error; it is reported as `RolledBack`.
    #[instrument(name = "updater.finalize", skip(self))]
    pub async fn finalize(&self) -> UpdateResult<FinalizeOutcome> {
        let mut marker = self.installed().await?;
        let Some(pending) = marker.pending.clone() else {
            return Ok(FinalizeOutcome::NothingPending);
        };

        match self.restart_and_verify().await {
            Ok(()) => {
                marker.version.clone_from(&pending.target);
                marker.previous_version = Some(pending.fallback);
                marker.pending = None;
                self.save_marker(marker).await?;
                self.metrics.inc_update_attempt("success");
                self.events.publish(Event::UpdateApplied {
                    version: pending.target.clone(),
                });
                info!(version = %pending.target, "update verified");
                Ok(FinalizeOutcome::Applied {
                    version: pending.target,
                })
            }
            Err(reason) => {
                warn!(version = %pending.target, %reason, "update unhealthy; restoring retained artifact");
                self.restore_retained().await?;
                marker.version.clone_from(&pending.fallback);
                marker.previous_version = None;
                marker.pending = None;
                self.save_marker(marker).await?;
                self.metrics.inc_update_attempt("rolled_back");
                self.events.publish(Event::UpdateRolledBack {
                    version: pending.target.clone(),
                    reason: reason.clone(),
                });
                if let Err(again) = self.restart_and_verify().await {
                    error!(error = %again, "console unhealthy after rollback");
                }
                Ok(FinalizeOutcome::RolledBack {
                    version: pending.target,
                    restored: pending.fallback,
                    reason,
                })
            }
        }
    }

    async fn stage(&self, release: &UpdateRelease) -> UpdateResult<(PathBuf, u64)> {
        let dir = self.options.staging_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| UpdateError::io("stage.mkdir", &dir, err))?;
        let name = format!("castellan-{}", Version::parse(&release.version)?);
        let part = dir.join(format!("{name}.part"));
        let bytes = match self.download_verified(release, &part).await {
            Ok(bytes) => bytes,
            Err(err) => {
                discard(&part).await;
                return Err(err);
            }
        };
        let staged = dir.join(name);
        tokio::fs::rename(&part, &staged)
            .await
            .map_err(|err| UpdateError::io("stage.rename", &staged, err))?;
        Ok((staged, bytes))
    }

    async fn download_verified(&self, release: &UpdateRelease, part: &Path) -> UpdateResult<u64> {
        let size = self.host.feed.download(release, part).await?;
        if size < MIN_ARTIFACT_BYTES {
            return Err(UpdateError::ArtifactTooSmall {
                size,
                minimum: MIN_ARTIFACT_BYTES,
            });
        }
        let path = part.to_path_buf();
        let actual = blocking("updater.digest", move || {
            Ok(castellan_fsops::sha256_file(&path)?)
        })
        .await?;
        if !actual.eq_ignore_ascii_case(release.checksum.trim()) {
            return Err(UpdateError::ChecksumMismatch {
                expected: release.checksum.clone(),
                actual,
            });
        }
        Ok(size)
    }

    /// Retain the installed binary and put `incoming` in its place, recording
    /// the swap as pending. The retained copy inherits the installed binary's
    /// mode since the hand-off executes it.
    async fn swap_in(&self, incoming: PathBuf, mut marker: InstallMarker, target: String) -> UpdateResult<()> {
        let options = self.options.clone();
        blocking("updater.swap", move || {
            let install = &options.install_path;
            let next = fs::read(&incoming).map_err(|err| UpdateError::io("swap.read_incoming", &incoming, err))?;
            let previous = options.previous_path();
            if let Some(dir) = previous.parent() {
                fs::create_dir_all(dir).map_err(|err| UpdateError::io("swap.mkdir", dir, err))?;
            }
            castellan_fsops::copy_atomic(install, &previous)?;
            castellan_fsops::write_atomic(install, &next)?;
            marker.pending = Some(PendingSwap {
                target,
                fallback: marker.version.clone(),
                swapped_at: Utc::now(),
            });
            marker.previous_version = Some(marker.version.clone());
            marker.save(&options.marker_path())
        })
        .await
    }

    async fn hand_off(&self) -> UpdateResult<()> {
        if let Err(err) = self.host.handoff.launch(&self.options.previous_path()).await {
            error!(error = %err, "hand-off failed; undoing swap");
            self.restore_retained().await?;
            let mut marker = self.installed().await?;
            marker.pending = None;
            self.save_marker(marker).await?;
            return Err(err);
        }
        Ok(())
    }

    async fn restore_retained(&self) -> UpdateResult<()> {
        let install = self.options.install_path.clone();
        let previous = self.options.previous_path();
        blocking("updater.restore", move || {
            castellan_fsops::copy_atomic(&previous, &install)?;
            Ok(())
        })
        .await
    }

    async fn save_marker(&self, mut marker: InstallMarker) -> UpdateResult<()> {
        let path = self.options.marker_path();
        blocking("updater.marker.save", move || marker.save(&path)).await
    }

    async fn restart_and_verify(&self) -> Result<(), String> {
        let unit = &self.options.console_unit;
        self.host
            .manager
            .restart(unit)
            .await
            .map_err(|err| format!("restart of {unit} failed: {err}"))?;
        let deadline = Instant::now() + self.options.health_timeout;
        loop {
            match self.host.manager.status(unit).await {
                Ok(UnitStatus::Active) if self.host.probe.check().await => return Ok(()),
                Ok(status) => debug!(?status, "waiting for console health"),
                Err(err) => debug!(error = %err, "console status query failed"),
            }
            if Instant::now() >= deadline {
                return Err(format!(
                    "console not healthy after {}s",
                    self.options.health_timeout.as_secs()
                ));
            }
            sleep(self.options.poll_interval).await;
        }
    }
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "staged artifact left behind"),
    }
}

async fn blocking<T, F>(operation: &'static str, task: F) -> UpdateResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> UpdateResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|source| UpdateError::TaskJoin { operation, source })?
}
