use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use castellan_config::{
    BasicPatch, ConfigStore, ConfigStoreOptions, LogLevel, Protocol, ProtocolPatch,
    StructuredPatch, Transport,
};
use castellan_control::{
    ChangeCoordinator, ControlError, ControllerOptions, PortRule, ProtocolFirewallSync,
    ServiceController,
};
use castellan_events::{Event, EventBus, EventStream, ServiceState};
use castellan_telemetry::Metrics;
use castellan_test_support::{
    ConsoleLayout, FakeFirewall, FakeProbe, FakeServiceManager, SAMPLE_CONFIG, sample_open_rules,
};
use tokio::time::timeout;

type TestResult<T> = Result<T, Box<dyn Error>>;

const UNIT: &str = "mediamtx";
const CONSOLE_PORT: u16 = 8080;

struct Harness {
    layout: ConsoleLayout,
    manager: Arc<FakeServiceManager>,
    firewall: Arc<FakeFirewall>,
    events: EventBus,
    metrics: Metrics,
    coordinator: ChangeCoordinator,
}

fn harness(firewall: Arc<FakeFirewall>) -> TestResult<Harness> {
    harness_with_probe(firewall, FakeProbe::healthy())
}

fn harness_with_probe(firewall: Arc<FakeFirewall>, probe: Arc<FakeProbe>) -> TestResult<Harness> {
    let layout = ConsoleLayout::new()?;
    let store = ConfigStore::new(ConfigStoreOptions::new(
        layout.config_path(),
        layout.backup_dir(),
    ));
    let manager = FakeServiceManager::running();
    let events = EventBus::new();
    let metrics = Metrics::new()?;
    let mut options = ControllerOptions::new(UNIT);
    options.restart_timeout = Duration::from_millis(200);
    options.stop_timeout = Duration::from_millis(200);
    options.poll_interval = Duration::from_millis(10);
    let controller = ServiceController::new(
        options,
        manager.clone(),
        probe,
        Arc::clone(&store),
        events.clone(),
        metrics.clone(),
    );
    let sync = Arc::new(ProtocolFirewallSync::new(
        firewall.clone(),
        CONSOLE_PORT,
        events.clone(),
        metrics.clone(),
    ));
    let coordinator = ChangeCoordinator::new(store, controller, sync, events.clone(), metrics.clone());
    Ok(Harness {
        layout,
        manager,
        firewall,
        events,
        metrics,
        coordinator,
    })
}

fn log_level(level: LogLevel) -> StructuredPatch {
    StructuredPatch::Basic(BasicPatch {
        log_level: Some(level),
        ..BasicPatch::default()
    })
}

async fn drain(stream: &mut EventStream) -> Vec<Event> {
    let mut seen = Vec::new();
    while let Ok(Some(envelope)) = timeout(Duration::from_millis(20), stream.next()).await {
        seen.push(envelope.event);
    }
    seen
}

#[tokio::test]
async fn enabling_srt_on_a_new_port_opens_exactly_that_port() -> TestResult<()> {
    let h = harness(FakeFirewall::with_open(&sample_open_rules()))?;

    let outcome = h
        .coordinator
        .apply_structured(StructuredPatch::Protocol(ProtocolPatch {
            protocol: Protocol::Srt,
            enabled: Some(true),
            port: Some(9100),
            encryption: None,
        }))
        .await?;

    assert_eq!(outcome.restart.state, ServiceState::Running);
    assert_eq!(h.firewall.commands(), vec!["allow 9100/udp".to_string()]);
    let report = outcome.firewall.ok_or("protocol change must reconcile")?;
    assert_eq!(report.added, vec![PortRule::new(9100, Transport::Udp)]);
    assert!(report.removed.is_empty());
    assert!(h.layout.config_text()?.contains("srtAddress: ':9100'"));
    assert_eq!(h.manager.calls(), vec!["stop mediamtx", "start mediamtx"]);
    Ok(())
}

#[tokio::test]
async fn reconciling_twice_issues_no_further_commands() -> TestResult<()> {
    let h = harness(FakeFirewall::new())?;

    let first = h.coordinator.reconcile_firewall().await?;
    assert_eq!(first.added.len(), sample_open_rules().len());
    let issued = h.firewall.commands().len();

    let second = h.coordinator.reconcile_firewall().await?;
    assert!(!second.changed());
    assert_eq!(h.firewall.commands().len(), issued);
    assert_eq!(h.firewall.open_set(), sample_open_rules().into_iter().collect());
    Ok(())
}

#[tokio::test]
async fn disabling_a_protocol_closes_its_port() -> TestResult<()> {
    let h = harness(FakeFirewall::with_open(&sample_open_rules()))?;

    h.coordinator
        .apply_structured(StructuredPatch::Protocol(ProtocolPatch {
            protocol: Protocol::Hls,
            enabled: Some(false),
            port: None,
            encryption: None,
        }))
        .await?;

    assert_eq!(h.firewall.commands(), vec!["remove 8888/tcp".to_string()]);
    assert!(!h.firewall.is_open(PortRule::new(8888, Transport::Tcp)));
    Ok(())
}

#[tokio::test]
async fn disabling_rtsp_also_closes_its_media_ports() -> TestResult<()> {
    let h = harness(FakeFirewall::with_open(&sample_open_rules()))?;

    h.coordinator
        .apply_structured(StructuredPatch::Protocol(ProtocolPatch {
            protocol: Protocol::Rtsp,
            enabled: Some(false),
            port: None,
            encryption: None,
        }))
        .await?;

    assert_eq!(
        h.firewall.commands(),
        vec!["remove 8000/udp", "remove 8001/udp", "remove 8554/tcp"]
    );
    assert!(h.firewall.is_open(PortRule::new(8189, Transport::Udp)));
    Ok(())
}

#[tokio::test]
async fn protected_ports_are_never_opened() -> TestResult<()> {
    let h = harness(FakeFirewall::with_open(&sample_open_rules()))?;

    let outcome = h
        .coordinator
        .apply_structured(StructuredPatch::Protocol(ProtocolPatch {
            protocol: Protocol::Hls,
            enabled: None,
            port: Some(CONSOLE_PORT),
            encryption: None,
        }))
        .await?;

    let report = outcome.firewall.ok_or("protocol change must reconcile")?;
    assert_eq!(
        report.skipped_protected,
        vec![PortRule::new(CONSOLE_PORT, Transport::Tcp)]
    );
    assert!(h.firewall.commands().iter().all(|call| !call.contains("8080")));
    Ok(())
}

#[tokio::test]
async fn refused_firewall_command_becomes_a_warning() -> TestResult<()> {
    let h = harness(FakeFirewall::new())?;
    h.firewall.refuse(1935);
    let mut stream = h.events.subscribe(None);

    let report = h.coordinator.reconcile_firewall().await?;

    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].port, Some(1935));
    assert!(h.firewall.is_open(PortRule::new(8554, Transport::Tcp)));
    assert_eq!(h.metrics.snapshot().firewall_warnings_total, 1);
    let seen = drain(&mut stream).await;
    assert!(
        seen.iter()
            .any(|event| matches!(event, Event::FirewallWarning { port: Some(1935), .. }))
    );
    Ok(())
}

#[tokio::test]
async fn invalid_raw_edit_is_rejected_without_restart() -> TestResult<()> {
    let h = harness(FakeFirewall::new())?;

    let result = h
        .coordinator
        .apply_raw("paths: [unterminated\n".to_string())
        .await;

    match result {
        Err(ControlError::Config { source }) => assert!(source.is_validation()),
        other => return Err(format!("expected a validation error, got {other:?}").into()),
    }
    assert!(h.manager.calls().is_empty());
    assert!(h.firewall.calls().is_empty());
    assert_eq!(h.layout.config_text()?, SAMPLE_CONFIG);
    assert!(h.layout.backup_names()?.is_empty());
    assert_eq!(h.metrics.snapshot().config_validation_failures_total, 1);
    Ok(())
}

#[tokio::test]
async fn unhealthy_change_is_rolled_back_and_retried_once() -> TestResult<()> {
    let h = harness(FakeFirewall::with_open(&sample_open_rules()))?;
    h.manager.fail_next_starts(1);
    let mut stream = h.events.subscribe(None);

    let result = h
        .coordinator
        .apply_structured(StructuredPatch::Protocol(ProtocolPatch {
            protocol: Protocol::Rtmp,
            enabled: None,
            port: Some(1940),
            encryption: None,
        }))
        .await;

    let backup = match result {
        Err(ControlError::ChangeReverted { backup, .. }) => backup,
        other => return Err(format!("expected a reverted change, got {other:?}").into()),
    };
    assert_eq!(
        h.manager.calls(),
        vec!["stop mediamtx", "start mediamtx", "stop mediamtx", "start mediamtx"]
    );
    assert_eq!(h.layout.config_text()?, SAMPLE_CONFIG);
    assert!(h.firewall.commands().is_empty());

    let controller = h.coordinator.controller();
    assert_eq!(controller.state(), ServiceState::Running);
    assert!(!controller.restart_pending());
    let failure = controller
        .status()
        .last_failure
        .ok_or("rollback must be surfaced")?;
    assert!(failure.rollback_attempted);
    assert_eq!(h.metrics.snapshot().config_rollbacks_total, 1);

    let seen = drain(&mut stream).await;
    assert!(seen.iter().any(
        |event| matches!(event, Event::RollbackPerformed { backup: restored } if *restored == backup)
    ));
    Ok(())
}

#[tokio::test]
async fn failed_retry_leaves_the_service_failed() -> TestResult<()> {
    let h = harness(FakeFirewall::new())?;
    h.manager.fail_next_starts(2);

    let result = h.coordinator.apply_structured(log_level(LogLevel::Debug)).await;

    assert!(matches!(
        result,
        Err(ControlError::ServiceFailed {
            rollback_attempted: true,
            ..
        })
    ));
    assert_eq!(h.manager.count("start"), 2);
    assert_eq!(h.layout.config_text()?, SAMPLE_CONFIG);
    let controller = h.coordinator.controller();
    assert_eq!(controller.state(), ServiceState::Failed);
    assert!(h.firewall.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn concurrent_restart_requests_share_one_cycle() -> TestResult<()> {
    let h = harness(FakeFirewall::new())?;
    let controller = h.coordinator.controller();

    let (first, second) = tokio::join!(controller.request_restart(), controller.request_restart());
    let (first, second) = (first?, second?);

    assert_eq!(first.cycle, second.cycle);
    assert!(first.coalesced != second.coalesced);
    assert_eq!(h.manager.count("start"), 1);
    Ok(())
}

#[tokio::test]
async fn change_committed_during_operator_restart_keeps_its_rollback() -> TestResult<()> {
    let probe = FakeProbe::healthy();
    probe.set_healthy(false);
    let h = harness_with_probe(FakeFirewall::new(), probe)?;
    let controller = h.coordinator.controller();

    let operator = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.request_restart().await }
    });
    timeout(Duration::from_secs(1), async {
        while !controller.is_cycling() {
            tokio::task::yield_now().await;
        }
    })
    .await?;

    let result = h.coordinator.apply_structured(log_level(LogLevel::Debug)).await;

    assert!(operator.await?.is_err());
    assert!(matches!(
        result,
        Err(ControlError::ServiceFailed {
            rollback_attempted: true,
            ..
        })
    ));
    assert_eq!(h.manager.count("start"), 3);
    assert_eq!(h.layout.config_text()?, SAMPLE_CONFIG);
    assert_eq!(h.metrics.snapshot().config_rollbacks_total, 1);
    Ok(())
}

#[tokio::test]
async fn registry_commit_marks_restart_pending_until_next_cycle() -> TestResult<()> {
    let h = harness(FakeFirewall::new())?;
    let controller = h.coordinator.controller();
    assert!(!controller.restart_pending());

    h.coordinator.store().apply_structured(log_level(LogLevel::Warn)).await?;
    assert!(controller.restart_pending());
    assert!(h.manager.calls().is_empty());

    controller.request_restart().await?;
    assert!(!controller.restart_pending());
    Ok(())
}

#[tokio::test]
async fn restore_reloads_an_earlier_document() -> TestResult<()> {
    let h = harness(FakeFirewall::new())?;
    let first = h.coordinator.apply_structured(log_level(LogLevel::Debug)).await?;
    assert!(h.layout.config_text()?.contains("logLevel: debug"));

    let restored = h.coordinator.restore(first.receipt.backup.clone()).await?;

    assert_eq!(h.layout.config_text()?, SAMPLE_CONFIG);
    assert!(restored.firewall.is_some());
    assert_eq!(h.manager.count("start"), 2);
    Ok(())
}
