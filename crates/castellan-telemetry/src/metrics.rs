//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters operators watch on a single-host console: commits,
//!   restart outcomes, rollbacks, firewall activity and self-update attempts.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{TelemetryError, TelemetryResult};

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    config_commits_total: IntCounterVec,
    config_validation_failures_total: IntCounter,
    service_restarts_total: IntCounterVec,
    config_rollbacks_total: IntCounter,
    firewall_commands_total: IntCounterVec,
    firewall_warnings_total: IntCounter,
    update_attempts_total: IntCounterVec,
    service_state: IntGauge,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Validation failures since start.
    pub config_validation_failures_total: u64,
    /// Configuration rollbacks since start.
    pub config_rollbacks_total: u64,
    /// Firewall warnings since start.
    pub firewall_warnings_total: u64,
    /// Numeric encoding of the managed service state.
    pub service_state: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();

        let http_requests_total = counter_vec(
            "http_requests_total",
            "Total HTTP requests received",
            &["route", "code"],
        )?;
        let config_commits_total = counter_vec(
            "config_commits_total",
            "Configuration documents committed by mutation kind",
            &["kind"],
        )?;
        let config_validation_failures_total = counter(
            "config_validation_failures_total",
            "Rejected configuration mutations",
        )?;
        let service_restarts_total = counter_vec(
            "service_restarts_total",
            "Managed service restart cycles by outcome",
            &["outcome"],
        )?;
        let config_rollbacks_total = counter(
            "config_rollbacks_total",
            "Automatic configuration rollbacks after failed restarts",
        )?;
        let firewall_commands_total = counter_vec(
            "firewall_commands_total",
            "Firewall rule commands issued by action",
            &["action"],
        )?;
        let firewall_warnings_total =
            counter("firewall_warnings_total", "Firewall commands that failed")?;
        let update_attempts_total = counter_vec(
            "update_attempts_total",
            "Console self-update attempts by outcome",
            &["outcome"],
        )?;
        let service_state = IntGauge::with_opts(Opts::new(
            "service_state",
            "Managed service state (0 stopped, 1 starting, 2 running, 3 restarting, 4 failed)",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "service_state",
            source,
        })?;

        register(&registry, "http_requests_total", &http_requests_total)?;
        register(&registry, "config_commits_total", &config_commits_total)?;
        register(
            &registry,
            "config_validation_failures_total",
            &config_validation_failures_total,
        )?;
        register(&registry, "service_restarts_total", &service_restarts_total)?;
        register(&registry, "config_rollbacks_total", &config_rollbacks_total)?;
        register(&registry, "firewall_commands_total", &firewall_commands_total)?;
        register(&registry, "firewall_warnings_total", &firewall_warnings_total)?;
        register(&registry, "update_attempts_total", &update_attempts_total)?;
        register(&registry, "service_state", &service_state)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                http_requests_total,
                config_commits_total,
                config_validation_failures_total,
                service_restarts_total,
                config_rollbacks_total,
                firewall_commands_total,
                firewall_warnings_total,
                update_attempts_total,
                service_state,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Count a committed configuration document.
    pub fn inc_config_commit(&self, kind: &str) {
        self.inner
            .config_commits_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Count a rejected configuration mutation.
    pub fn inc_config_validation_failure(&self) {
        self.inner.config_validation_failures_total.inc();
    }

    /// Count a finished restart cycle (`healthy`, `rolled_back`, `failed`, `coalesced`).
    pub fn inc_service_restart(&self, outcome: &str) {
        self.inner
            .service_restarts_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Count an automatic configuration rollback.
    pub fn inc_config_rollback(&self) {
        self.inner.config_rollbacks_total.inc();
    }

    /// Count an issued firewall command (`allow`, `delete`).
    pub fn inc_firewall_command(&self, action: &str) {
        self.inner
            .firewall_commands_total
            .with_label_values(&[action])
            .inc();
    }

    /// Count a failed firewall command.
    pub fn inc_firewall_warning(&self) {
        self.inner.firewall_warnings_total.inc();
    }

    /// Count a self-update attempt by outcome.
    pub fn inc_update_attempt(&self, outcome: &str) {
        self.inner
            .update_attempts_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record the numeric service state.
    pub fn set_service_state(&self, code: i64) {
        self.inner.service_state.set(code);
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            config_validation_failures_total: self.inner.config_validation_failures_total.get(),
            config_rollbacks_total: self.inner.config_rollbacks_total.get(),
            firewall_warnings_total: self.inner.firewall_warnings_total.get(),
            service_state: self.inner.service_state.get(),
        }
    }
}

fn counter(name: &'static str, help: &str) -> TelemetryResult<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn counter_vec(
    name: &'static str,
    help: &str,
    labels: &[&str],
) -> TelemetryResult<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> TelemetryResult<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_series() -> TelemetryResult<()> {
        let metrics = Metrics::new()?;
        metrics.inc_http_request("/health", 200);
        metrics.inc_config_commit("structured");
        metrics.inc_service_restart("healthy");
        metrics.inc_firewall_command("allow");
        metrics.inc_update_attempt("applied");

        let rendered = metrics.render()?;
        assert!(rendered.contains("http_requests_total"));
        assert!(rendered.contains("config_commits_total{kind=\"structured\"} 1"));
        assert!(rendered.contains("service_restarts_total{outcome=\"healthy\"} 1"));
        assert!(rendered.contains("firewall_commands_total{action=\"allow\"} 1"));
        Ok(())
    }

    #[test]
    fn snapshot_tracks_counters() -> TelemetryResult<()> {
        let metrics = Metrics::new()?;
        metrics.inc_config_validation_failure();
        metrics.inc_config_rollback();
        metrics.inc_config_rollback();
        metrics.inc_firewall_warning();
        metrics.set_service_state(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.config_validation_failures_total, 1);
        assert_eq!(snapshot.config_rollbacks_total, 2);
        assert_eq!(snapshot.firewall_warnings_total, 1);
        assert_eq!(snapshot.service_state, 2);
        Ok(())
    }
}
