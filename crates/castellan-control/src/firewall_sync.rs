//! Keeps host firewall rules in step with the protocols the media server
//! listens on.
//!
//! # Design
//! - The last known rule set is cached after a fully successful pass, so a
//!   second reconcile with unchanged settings issues no firewall commands.
//! - Any failed command drops the cache; the next pass re-reads the firewall.
//! - Failures never roll back a committed document. They come back as
//!   [`FirewallSyncWarning`] values and `FirewallWarning` events.
//! - Protected ports (console, SSH, HTTP, HTTPS) are never opened or closed
//!   here, whatever the protocol settings say.

use std::collections::BTreeSet;
use std::sync::Arc;

use castellan_config::ProtocolSetting;
use castellan_events::{Event, EventBus};
use castellan_telemetry::Metrics;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::error::{ControlError, ControlResult};
use crate::host::{Firewall, PortRule};

/// Ports that are protected on every host: SSH, HTTP and HTTPS.
pub const SYSTEM_PROTECTED_PORTS: [u16; 3] = [22, 80, 443];

/// A firewall command that failed after the configuration was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirewallSyncWarning {
    /// Port the command targeted; `None` when listing rules failed.
    pub port: Option<u16>,
    /// Operator-facing detail.
    pub message: String,
}

/// What one reconcile pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Rules opened.
    pub added: Vec<PortRule>,
    /// Rules closed.
    pub removed: Vec<PortRule>,
    /// Rules left alone because their port is protected.
    pub skipped_protected: Vec<PortRule>,
    /// Non-fatal failures.
    pub warnings: Vec<FirewallSyncWarning>,
}

impl ReconcileReport {
    /// True when the pass issued at least one successful command.
    #[must_use]
    pub fn changed(&self) -> bool {
        !(self.added.is_empty() && self.removed.is_empty())
    }
}

/// Reconciler between protocol settings and the host firewall.
pub struct ProtocolFirewallSync {
    firewall: Arc<dyn Firewall>,
    protected: BTreeSet<u16>,
    known: Mutex<Option<BTreeSet<PortRule>>>,
    events: EventBus,
    metrics: Metrics,
}

impl ProtocolFirewallSync {
    /// Reconciler that never touches `console_port` or the system ports.
    #[must_use]
    pub fn new(
        firewall: Arc<dyn Firewall>,
        console_port: u16,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        let protected = SYSTEM_PROTECTED_PORTS
            .into_iter()
            .chain(std::iter::once(console_port))
            .collect();
        Self {
            firewall,
            protected,
            known: Mutex::new(None),
            events,
            metrics,
        }
    }

    /// Protected ports, ascending.
    #[must_use]
    pub fn protected_ports(&self) -> Vec<u16> {
        self.protected.iter().copied().collect()
    }

    /// Fail with `ProtectedPort` when `rule` targets a protected port.
    ///
    /// # Errors
    ///
    /// Returns `ProtectedPort`.
    pub fn guard(&self, rule: PortRule) -> ControlResult<()> {
        if self.protected.contains(&rule.port) {
            return Err(ControlError::ProtectedPort { port: rule.port });
        }
        Ok(())
    }

    /// Forget the cached rule set so the next pass re-reads the firewall.
    pub async fn invalidate(&self) {
        *self.known.lock().await = None;
    }

    /// Bring the firewall in line with `settings`.
    ///
    /// Enabled protocols get their listening ports opened. Ports of disabled
    /// protocols, and ports an enabled protocol stopped using, are closed
    /// when open and not needed by another protocol.
    #[instrument(name = "firewall.reconcile", skip_all)]
    pub async fn reconcile(&self, settings: &[ProtocolSetting]) -> ReconcileReport {
        let mut known = self.known.lock().await;
        let mut report = ReconcileReport::default();

        let mut open = match known.take() {
            Some(rules) => rules,
            None => match self.firewall.open_rules().await {
                Ok(rules) => rules,
                Err(err) => {
                    self.warn(&mut report, None, &err);
                    return report;
                }
            },
        };

        let desired = desired_rules(settings);
        let managed = managed_rules(settings);
        let mut failed = false;

        let missing: Vec<PortRule> = desired
            .iter()
            .filter(|rule| !covers(&open, **rule))
            .copied()
            .collect();
        for rule in missing {
            if let Err(err) = self.guard(rule) {
                warn!(port = rule.port, error = %err, "not opening protected port");
                report.skipped_protected.push(rule);
                continue;
            }
            self.metrics.inc_firewall_command("allow");
            match self.firewall.allow(rule).await {
                Ok(()) => {
                    info!(%rule, "firewall port opened");
                    open.insert(rule);
                    report.added.push(rule);
                }
                Err(err) => {
                    failed = true;
                    self.warn(&mut report, Some(rule.port), &err);
                }
            }
        }

        for rule in stale_rules(&open, &desired, &managed) {
            if let Err(err) = self.guard(rule) {
                warn!(port = rule.port, error = %err, "not closing protected port");
                report.skipped_protected.push(rule);
                continue;
            }
            self.metrics.inc_firewall_command("remove");
            match self.firewall.remove(rule).await {
                Ok(()) => {
                    info!(%rule, "firewall port closed");
                    open.remove(&rule);
                    report.removed.push(rule);
                }
                Err(err) => {
                    failed = true;
                    self.warn(&mut report, Some(rule.port), &err);
                }
            }
        }

        if !failed {
            *known = Some(open);
        }
        if report.changed() {
            self.events.publish(Event::FirewallReconciled {
                added: report.added.iter().map(|rule| rule.port).collect(),
                removed: report.removed.iter().map(|rule| rule.port).collect(),
            });
        }
        report
    }

    fn warn(&self, report: &mut ReconcileReport, port: Option<u16>, err: &ControlError) {
        let message = describe(err);
        warn!(?port, error = %message, "firewall command failed");
        self.metrics.inc_firewall_warning();
        self.events.publish(Event::FirewallWarning {
            port,
            message: message.clone(),
        });
        report.warnings.push(FirewallSyncWarning { port, message });
    }
}

/// True when `open` admits `rule`, either exactly or through a rule that
/// covers both transports.
fn covers(open: &BTreeSet<PortRule>, rule: PortRule) -> bool {
    open.contains(&rule) || open.contains(&PortRule::any(rule.port))
}

/// Open rules to close: exact matches for managed rules nothing wants, and
/// both-transport rules whose port no enabled protocol uses.
fn stale_rules(
    open: &BTreeSet<PortRule>,
    desired: &BTreeSet<PortRule>,
    managed: &BTreeSet<PortRule>,
) -> BTreeSet<PortRule> {
    let wanted_ports: BTreeSet<u16> = desired.iter().map(|rule| rule.port).collect();
    let mut stale = BTreeSet::new();
    for rule in managed.difference(desired) {
        if open.contains(rule) {
            stale.insert(*rule);
        }
        let any = PortRule::any(rule.port);
        if open.contains(&any) && !wanted_ports.contains(&rule.port) {
            stale.insert(any);
        }
    }
    stale
}

fn desired_rules(settings: &[ProtocolSetting]) -> BTreeSet<PortRule> {
    settings
        .iter()
        .flat_map(ProtocolSetting::listening_rules)
        .map(|(port, transport)| PortRule::new(port, transport))
        .collect()
}

fn managed_rules(settings: &[ProtocolSetting]) -> BTreeSet<PortRule> {
    settings
        .iter()
        .flat_map(ProtocolSetting::all_rules)
        .map(|(port, transport)| PortRule::new(port, transport))
        .collect()
}

fn describe(err: &ControlError) -> String {
    match err {
        ControlError::CommandFailed {
            program,
            operation,
            stderr,
            ..
        } if !stderr.is_empty() => format!("{program} ({operation}): {stderr}"),
        ControlError::CommandFailed {
            program, operation, ..
        } => format!("{program} ({operation}) failed"),
        other => other.to_string(),
    }
}
