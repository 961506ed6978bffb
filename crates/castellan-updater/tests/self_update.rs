use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use castellan_config::{ConfigStore, ConfigStoreOptions};
use castellan_control::{ControlError, HealthProbe};
use castellan_events::{Event, EventBus};
use castellan_telemetry::Metrics;
use castellan_test_support::{
    ConsoleLayout, FakeProbe, FakeReleaseFeed, FakeServiceManager, RecordingRunner, release_for,
};
use castellan_updater::{
    AutoUpdater, FinalizeHandoff, FinalizeOutcome, UpdateError, UpdaterHost, UpdaterOptions,
};
use tokio::time::timeout;

type TestResult<T> = Result<T, Box<dyn Error>>;

const INSTALLED: &str = "v1.0.0";
const HANDOFF_UNIT: &str = "castellan-finalize";

struct Rig {
    layout: ConsoleLayout,
    install: PathBuf,
    manager: Arc<FakeServiceManager>,
    runner: Arc<RecordingRunner>,
    feed: Arc<FakeReleaseFeed>,
    events: EventBus,
    updater: AutoUpdater,
}

fn old_binary() -> Vec<u8> {
    vec![0x7f; 2048]
}

fn new_binary() -> Vec<u8> {
    vec![0x42; 4096]
}

fn rig_with(
    feed: Arc<FakeReleaseFeed>,
    probe: impl FnOnce(PathBuf) -> Arc<dyn HealthProbe>,
) -> TestResult<Rig> {
    let layout = ConsoleLayout::new()?;
    let install = layout.root().join("bin").join("castellan");
    fs::create_dir_all(install.parent().ok_or("install path has a parent")?)?;
    fs::write(&install, old_binary())?;

    let store = ConfigStore::new(ConfigStoreOptions::new(
        layout.config_path(),
        layout.backup_dir(),
    ));
    let manager = FakeServiceManager::running();
    let runner = RecordingRunner::new();
    let events = EventBus::new();
    let mut options = UpdaterOptions::new(&install, layout.data_dir(), "castellan", INSTALLED);
    options.health_timeout = Duration::from_millis(100);
    options.poll_interval = Duration::from_millis(10);
    let host = UpdaterHost {
        feed: feed.clone(),
        manager: manager.clone(),
        probe: probe(install.clone()),
        handoff: FinalizeHandoff::new(
            runner.clone(),
            HANDOFF_UNIT,
            vec![("CASTELLAN_UNIT".to_string(), "mediamtx".to_string())],
        ),
    };
    let updater = AutoUpdater::new(options, host, store, events.clone(), Metrics::new()?);
    Ok(Rig {
        layout,
        install,
        manager,
        runner,
        feed,
        events,
        updater,
    })
}

fn rig() -> TestResult<Rig> {
    rig_with(FakeReleaseFeed::new("v1.1.0", new_binary()), |_| {
        FakeProbe::healthy()
    })
}

#[tokio::test]
async fn apply_swaps_in_the_release_and_hands_off() -> TestResult<()> {
    let rig = rig()?;

    let report = rig.updater.apply(&rig.feed.release()).await?;

    assert_eq!(report.version, "v1.1.0");
    assert_eq!(report.retained, INSTALLED);
    assert_eq!(report.bytes, Some(4096));
    assert_eq!(fs::read(&rig.install)?, new_binary());
    let previous = rig.updater.options().previous_path();
    assert_eq!(fs::read(&previous)?, old_binary());
    assert_eq!(fs::read_dir(rig.updater.options().staging_dir())?.count(), 0);

    let marker = rig.updater.installed().await?;
    assert_eq!(marker.version, INSTALLED);
    let pending = marker.pending.ok_or("swap must be pending")?;
    assert_eq!(pending.target, "v1.1.0");
    assert_eq!(pending.fallback, INSTALLED);

    assert_eq!(
        rig.runner.calls(),
        vec![format!(
            "systemd-run --unit={HANDOFF_UNIT} --collect --on-active=2 \
             --setenv=CASTELLAN_UNIT=mediamtx {} finalize-update",
            previous.display()
        )]
    );
    assert!(rig.manager.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn truncated_artifact_is_rejected_before_the_swap() -> TestResult<()> {
    let rig = rig_with(FakeReleaseFeed::new("v1.1.0", vec![1; 200]), |_| {
        FakeProbe::healthy()
    })?;

    let result = rig.updater.apply(&rig.feed.release()).await;

    assert!(matches!(
        result,
        Err(UpdateError::ArtifactTooSmall { size: 200, .. })
    ));
    assert_eq!(fs::read(&rig.install)?, old_binary());
    assert!(rig.runner.calls().is_empty());
    assert_eq!(fs::read_dir(rig.updater.options().staging_dir())?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn checksum_mismatch_leaves_the_install_alone() -> TestResult<()> {
    let advertised = release_for("v1.1.0", b"a different build entirely");
    let feed = FakeReleaseFeed::with_release(advertised, new_binary());
    let rig = rig_with(feed, |_| FakeProbe::healthy())?;

    let result = rig.updater.apply(&rig.feed.release()).await;

    assert!(matches!(result, Err(UpdateError::ChecksumMismatch { .. })));
    assert_eq!(fs::read(&rig.install)?, old_binary());
    assert!(!rig.updater.options().previous_path().exists());
    assert!(rig.updater.installed().await?.pending.is_none());
    Ok(())
}

#[tokio::test]
async fn current_release_is_not_downloaded() -> TestResult<()> {
    let rig = rig_with(FakeReleaseFeed::new(INSTALLED, new_binary()), |_| {
        FakeProbe::healthy()
    })?;

    assert!(rig.updater.check_latest().await?.is_none());
    let result = rig.updater.apply(&rig.feed.release()).await;

    assert!(matches!(result, Err(UpdateError::AlreadyCurrent { .. })));
    assert_eq!(rig.feed.downloads(), 0);
    Ok(())
}

#[tokio::test]
async fn newer_release_is_announced() -> TestResult<()> {
    let rig = rig()?;
    let mut stream = rig.events.subscribe(None);

    let release = rig.updater.check_latest().await?.ok_or("update expected")?;

    assert_eq!(release.version, "v1.1.0");
    let envelope = timeout(Duration::from_secs(1), stream.next())
        .await?
        .ok_or("event expected")?;
    assert!(matches!(envelope.event, Event::UpdateAvailable { version } if version == "v1.1.0"));
    Ok(())
}

#[tokio::test]
async fn failed_handoff_undoes_the_swap() -> TestResult<()> {
    let rig = rig()?;
    rig.runner.exit_with(1);

    let result = rig.updater.apply(&rig.feed.release()).await;

    assert!(matches!(
        result,
        Err(UpdateError::Service {
            source: ControlError::CommandFailed { .. }
        })
    ));
    assert_eq!(fs::read(&rig.install)?, old_binary());
    assert!(rig.updater.installed().await?.pending.is_none());
    Ok(())
}

#[tokio::test]
async fn healthy_finalize_records_the_new_version() -> TestResult<()> {
    let rig = rig()?;
    rig.updater.apply(&rig.feed.release()).await?;

    let outcome = rig.updater.finalize().await?;

    assert_eq!(
        outcome,
        FinalizeOutcome::Applied {
            version: "v1.1.0".to_string()
        }
    );
    let marker = rig.updater.installed().await?;
    assert_eq!(marker.version, "v1.1.0");
    assert_eq!(marker.previous_version.as_deref(), Some(INSTALLED));
    assert!(marker.pending.is_none());
    assert_eq!(rig.manager.calls(), vec!["restart castellan"]);
    assert_eq!(rig.updater.finalize().await?, FinalizeOutcome::NothingPending);
    Ok(())
}

#[tokio::test]
async fn unhealthy_finalize_restores_the_retained_binary() -> TestResult<()> {
    let rig = rig_with(FakeReleaseFeed::new("v1.1.0", new_binary()), |install| {
        FakeProbe::from_fn(move || fs::read(&install).is_ok_and(|bytes| bytes != new_binary()))
    })?;
    rig.updater.apply(&rig.feed.release()).await?;
    let mut stream = rig.events.subscribe(None);

    let outcome = rig.updater.finalize().await?;

    match outcome {
        FinalizeOutcome::RolledBack {
            version, restored, ..
        } => {
            assert_eq!(version, "v1.1.0");
            assert_eq!(restored, INSTALLED);
        }
        other => return Err(format!("expected a rollback, got {other:?}").into()),
    }
    assert_eq!(fs::read(&rig.install)?, old_binary());
    let marker = rig.updater.installed().await?;
    assert_eq!(marker.version, INSTALLED);
    assert!(marker.pending.is_none());
    assert_eq!(rig.manager.count("restart"), 2);
    let envelope = timeout(Duration::from_secs(1), stream.next())
        .await?
        .ok_or("event expected")?;
    assert!(matches!(envelope.event, Event::UpdateRolledBack { .. }));
    Ok(())
}

#[tokio::test]
async fn rollback_needs_a_retained_artifact() -> TestResult<()> {
    let rig = rig()?;
    assert!(matches!(
        rig.updater.rollback().await,
        Err(UpdateError::NothingToRollBack)
    ));

    rig.updater.apply(&rig.feed.release()).await?;
    rig.updater.finalize().await?;
    let report = rig.updater.rollback().await?;

    assert_eq!(report.version, INSTALLED);
    assert_eq!(report.retained, "v1.1.0");
    assert_eq!(fs::read(&rig.install)?, old_binary());
    assert_eq!(
        fs::read(rig.updater.options().previous_path())?,
        new_binary()
    );
    assert!(rig.layout.data_dir().join("install.json").is_file());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn retained_binary_stays_executable_for_the_handoff() -> TestResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let rig = rig()?;
    fs::set_permissions(&rig.install, fs::Permissions::from_mode(0o755))?;
    let previous = rig.updater.options().previous_path();
    assert!(!previous.exists());

    rig.updater.apply(&rig.feed.release()).await?;

    let mode = |path: &std::path::Path| -> TestResult<u32> {
        Ok(fs::metadata(path)?.permissions().mode() & 0o777)
    };
    assert_eq!(mode(&rig.install)?, 0o755);
    assert_eq!(mode(&previous)?, 0o755);

    rig.updater.finalize().await?;
    rig.updater.rollback().await?;
    assert_eq!(mode(&rig.install)?, 0o755);
    assert_eq!(mode(&previous)?, 0o755);
    Ok(())
}
