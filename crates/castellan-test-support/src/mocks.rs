//! In-memory stand-ins for the host collaborators: unit manager, firewall,
//! health probe, command runner and release feed.
//!
//! Every fake records what it was asked to do so tests can assert on the
//! exact command sequence.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use castellan_control::{
    CommandOutput, CommandRunner, ControlError, ControlResult, Firewall, HealthProbe, PortRule,
    ServiceManager, UnitStatus,
};
use castellan_updater::{ReleaseFeed, UpdateError, UpdateRelease, UpdateResult};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct UnitState {
    status: UnitStatus,
    failing_starts: usize,
    calls: Vec<String>,
}

/// Unit manager whose starts succeed unless told to fail.
///
/// A failing start leaves the unit `failed`, the way a crashing service looks
/// to systemd.
#[derive(Debug)]
pub struct FakeServiceManager {
    state: Mutex<UnitState>,
}

impl FakeServiceManager {
    /// Unit that is currently active.
    #[must_use]
    pub fn running() -> Arc<Self> {
        Self::with_status(UnitStatus::Active)
    }

    /// Unit that is currently inactive.
    #[must_use]
    pub fn stopped() -> Arc<Self> {
        Self::with_status(UnitStatus::Inactive)
    }

    fn with_status(status: UnitStatus) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(UnitState {
                status,
                failing_starts: 0,
                calls: Vec::new(),
            }),
        })
    }

    /// Make the next `count` starts leave the unit failed.
    pub fn fail_next_starts(&self, count: usize) {
        guard(&self.state).failing_starts = count;
    }

    /// Force the reported status.
    pub fn set_status(&self, status: UnitStatus) {
        guard(&self.state).status = status;
    }

    /// Recorded calls as `"<verb> <unit>"`, status queries excluded.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        guard(&self.state).calls.clone()
    }

    /// Number of recorded calls with `verb`.
    #[must_use]
    pub fn count(&self, verb: &str) -> usize {
        guard(&self.state)
            .calls
            .iter()
            .filter(|call| call.split_whitespace().next() == Some(verb))
            .count()
    }

    fn come_up(state: &mut UnitState) {
        if state.failing_starts > 0 {
            state.failing_starts -= 1;
            state.status = UnitStatus::Failed;
        } else {
            state.status = UnitStatus::Active;
        }
    }
}

#[async_trait]
impl ServiceManager for FakeServiceManager {
    async fn start(&self, unit: &str) -> ControlResult<()> {
        let mut state = guard(&self.state);
        state.calls.push(format!("start {unit}"));
        Self::come_up(&mut state);
        Ok(())
    }

    async fn stop(&self, unit: &str) -> ControlResult<()> {
        let mut state = guard(&self.state);
        state.calls.push(format!("stop {unit}"));
        state.status = UnitStatus::Inactive;
        Ok(())
    }

    async fn restart(&self, unit: &str) -> ControlResult<()> {
        let mut state = guard(&self.state);
        state.calls.push(format!("restart {unit}"));
        Self::come_up(&mut state);
        Ok(())
    }

    async fn status(&self, _unit: &str) -> ControlResult<UnitStatus> {
        Ok(guard(&self.state).status)
    }
}

/// Firewall holding its rules in memory.
#[derive(Debug, Default)]
pub struct FakeFirewall {
    open: Mutex<BTreeSet<PortRule>>,
    refused: Mutex<BTreeSet<u16>>,
    calls: Mutex<Vec<String>>,
}

impl FakeFirewall {
    /// Firewall with no open rules.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Firewall with `rules` already open.
    #[must_use]
    pub fn with_open(rules: &[PortRule]) -> Arc<Self> {
        let firewall = Self::default();
        guard(&firewall.open).extend(rules.iter().copied());
        Arc::new(firewall)
    }

    /// Make every command on `port` fail.
    pub fn refuse(&self, port: u16) {
        guard(&self.refused).insert(port);
    }

    /// Whether `rule` is open.
    #[must_use]
    pub fn is_open(&self, rule: PortRule) -> bool {
        guard(&self.open).contains(&rule)
    }

    /// Open rules.
    #[must_use]
    pub fn open_set(&self) -> BTreeSet<PortRule> {
        guard(&self.open).clone()
    }

    /// Every call, listings included, as `"list"`, `"allow 9100/tcp"`, ...
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        guard(&self.calls).clone()
    }

    /// Only the allow and remove calls.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call != "list")
            .collect()
    }

    fn check(&self, action: &'static str, rule: PortRule) -> ControlResult<()> {
        guard(&self.calls).push(format!("{action} {rule}"));
        if guard(&self.refused).contains(&rule.port) {
            return Err(ControlError::CommandFailed {
                program: "ufw".to_string(),
                operation: action,
                status: Some(1),
                stderr: format!("ERROR: could not {action} {rule}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Firewall for FakeFirewall {
    async fn open_rules(&self) -> ControlResult<BTreeSet<PortRule>> {
        guard(&self.calls).push("list".to_string());
        Ok(self.open_set())
    }

    async fn allow(&self, rule: PortRule) -> ControlResult<()> {
        self.check("allow", rule)?;
        guard(&self.open).insert(rule);
        Ok(())
    }

    async fn remove(&self, rule: PortRule) -> ControlResult<()> {
        self.check("remove", rule)?;
        guard(&self.open).remove(&rule);
        Ok(())
    }
}

type ProbeFn = Box<dyn Fn() -> bool + Send + Sync>;

/// Health probe answering from a flag or a closure.
pub struct FakeProbe {
    healthy: AtomicBool,
    check: Option<ProbeFn>,
    checks: AtomicUsize,
}

impl FakeProbe {
    /// Probe that reports healthy until told otherwise.
    #[must_use]
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(true),
            check: None,
            checks: AtomicUsize::new(0),
        })
    }

    /// Probe answering with `check`.
    #[must_use]
    pub fn from_fn(check: impl Fn() -> bool + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(true),
            check: Some(Box::new(check)),
            checks: AtomicUsize::new(0),
        })
    }

    /// Flip the flag used when no closure is set.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of checks performed.
    #[must_use]
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn check(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.check
            .as_ref()
            .map_or_else(|| self.healthy.load(Ordering::SeqCst), |check| check())
    }
}

/// Command runner that records invocations and exits with a fixed status.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    status: Mutex<i32>,
    calls: Mutex<Vec<String>>,
}

impl RecordingRunner {
    /// Runner whose commands succeed.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Exit status for subsequent commands.
    pub fn exit_with(&self, status: i32) {
        *guard(&self.status) = status;
    }

    /// Recorded command lines.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        guard(&self.calls).clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, program: &str, args: &[&str]) -> ControlResult<CommandOutput> {
        guard(&self.calls).push(format!("{program} {}", args.join(" ")));
        let status = *guard(&self.status);
        Ok(CommandOutput {
            status: Some(status),
            stdout: String::new(),
            stderr: if status == 0 {
                String::new()
            } else {
                "Failed to start transient service unit".to_string()
            },
        })
    }
}

/// Release feed serving one release from memory.
#[derive(Debug)]
pub struct FakeReleaseFeed {
    release: UpdateRelease,
    artifact: Vec<u8>,
    downloads: AtomicUsize,
}

impl FakeReleaseFeed {
    /// Feed offering `version` with `artifact` as its download and a
    /// matching checksum.
    #[must_use]
    pub fn new(version: &str, artifact: Vec<u8>) -> Arc<Self> {
        let release = release_for(version, &artifact);
        Self::with_release(release, artifact)
    }

    /// Feed offering `release` verbatim, whatever its checksum says.
    #[must_use]
    pub fn with_release(release: UpdateRelease, artifact: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            release,
            artifact,
            downloads: AtomicUsize::new(0),
        })
    }

    /// The offered release.
    #[must_use]
    pub fn release(&self) -> UpdateRelease {
        self.release.clone()
    }

    /// Number of downloads served.
    #[must_use]
    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseFeed for FakeReleaseFeed {
    async fn latest(&self) -> UpdateResult<UpdateRelease> {
        Ok(self.release.clone())
    }

    async fn download(&self, _release: &UpdateRelease, dest: &Path) -> UpdateResult<u64> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(dest, &self.artifact)
            .await
            .map_err(|source| UpdateError::Io {
                operation: "fake.download",
                path: dest.to_path_buf(),
                source,
            })?;
        Ok(self.artifact.len() as u64)
    }
}

/// Release descriptor for `artifact` with its real SHA-256.
#[must_use]
pub fn release_for(version: &str, artifact: &[u8]) -> UpdateRelease {
    UpdateRelease {
        version: version.to_string(),
        download_url: format!("https://releases.invalid/{version}/castellan"),
        checksum: castellan_fsops::sha256_hex(artifact),
        size: Some(artifact.len() as u64),
        notes: None,
    }
}
