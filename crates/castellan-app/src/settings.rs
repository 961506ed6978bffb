//! Console settings loaded once from `CASTELLAN_*` environment variables.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use castellan_config::LockPolicy;
use castellan_telemetry::LogFormat;
use castellan_updater::DEFAULT_RELEASE_FEED;

use crate::error::{AppError, AppResult};

const ENV_PREFIX: &str = "CASTELLAN_";
const ENV_BOOTSTRAP_PASSWORD: &str = "CASTELLAN_BOOTSTRAP_PASSWORD";

const DEFAULT_CONFIG_PATH: &str = "/usr/local/etc/mediamtx.yml";
const DEFAULT_BACKUP_DIR: &str = "/usr/local/etc/mediamtx_backups";
const DEFAULT_SERVICE: &str = "mediamtx";
const DEFAULT_CONSOLE_SERVICE: &str = "castellan";
const DEFAULT_BIND: &str = "0.0.0.0:5000";
const DEFAULT_DATA_DIR: &str = "/opt/castellan";
const DEFAULT_HEALTH_URL: &str = "http://127.0.0.1:9997/v3/paths/list";
const DEFAULT_RESTART_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SESSION_IDLE_SECS: u64 = 1800;

/// Host firewall backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallBackend {
    /// Manage rules through `ufw`.
    Ufw,
    /// Leave the host firewall alone.
    Disabled,
}

/// Everything the console reads from its environment.
#[derive(Debug, Clone)]
pub struct ConsoleSettings {
    /// Live media server document.
    pub config_path: PathBuf,
    /// Backup directory.
    pub backup_dir: PathBuf,
    /// Number of backups to keep; `None` keeps all.
    pub backup_keep: Option<usize>,
    /// Behaviour of concurrent mutations.
    pub lock_policy: LockPolicy,
    /// Managed media server unit.
    pub service_unit: String,
    /// The console's own unit.
    pub console_unit: String,
    /// HTTP listener.
    pub bind: SocketAddr,
    /// Admin store, update staging and install marker.
    pub data_dir: PathBuf,
    /// Media server API endpoint used as the liveness probe.
    pub health_url: String,
    /// Health-check window after a start.
    pub restart_timeout: Duration,
    /// Session idle expiry.
    pub session_idle: Duration,
    /// Self-registration toggle.
    pub allow_registration: bool,
    /// Release feed URL.
    pub release_feed: String,
    /// Firewall backend.
    pub firewall: FirewallBackend,
    /// Log output format.
    pub log_format: LogFormat,
    /// First administrator's password when the admin store is empty.
    pub bootstrap_password: Option<String>,
    forwarded: Vec<(String, String)>,
}

impl ConsoleSettings {
    /// Read settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first variable that does not parse.
    pub fn from_env() -> AppResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Read settings from `vars`; variables without the console prefix are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first variable that does not parse.
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> AppResult<Self> {
        let vars: BTreeMap<String, String> = vars
            .into_iter()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect();
        let lookup = |name: &str| {
            vars.get(name)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
        };

        let backup_keep = lookup("CASTELLAN_BACKUP_KEEP")
            .map(|value| parse_positive("CASTELLAN_BACKUP_KEEP", value))
            .transpose()?
            .map(|keep| usize::try_from(keep).unwrap_or(usize::MAX));
        let lock_policy = match lookup("CASTELLAN_LOCK_POLICY") {
            Some(value) => LockPolicy::parse(value).ok_or_else(|| {
                AppError::invalid("CASTELLAN_LOCK_POLICY", "unknown_policy", value)
            })?,
            None => LockPolicy::Block,
        };
        let bind_text = lookup("CASTELLAN_BIND").unwrap_or(DEFAULT_BIND);
        let bind: SocketAddr = bind_text
            .parse()
            .map_err(|_| AppError::invalid("CASTELLAN_BIND", "not_a_socket_address", bind_text))?;
        if bind.port() == 0 {
            return Err(AppError::invalid("CASTELLAN_BIND", "zero_port", bind_text));
        }
        let health_url = lookup("CASTELLAN_HEALTH_URL").unwrap_or(DEFAULT_HEALTH_URL);
        require_http("CASTELLAN_HEALTH_URL", health_url)?;
        let release_feed = lookup("CASTELLAN_RELEASE_FEED").unwrap_or(DEFAULT_RELEASE_FEED);
        require_http("CASTELLAN_RELEASE_FEED", release_feed)?;
        let restart_timeout = lookup("CASTELLAN_RESTART_TIMEOUT_SECS")
            .map(|value| parse_positive("CASTELLAN_RESTART_TIMEOUT_SECS", value))
            .transpose()?
            .unwrap_or(DEFAULT_RESTART_TIMEOUT_SECS);
        let session_idle = lookup("CASTELLAN_SESSION_IDLE_SECS")
            .map(|value| parse_positive("CASTELLAN_SESSION_IDLE_SECS", value))
            .transpose()?
            .unwrap_or(DEFAULT_SESSION_IDLE_SECS);
        let allow_registration = lookup("CASTELLAN_ALLOW_REGISTRATION")
            .map(|value| parse_flag("CASTELLAN_ALLOW_REGISTRATION", value))
            .transpose()?
            .unwrap_or(true);
        let firewall = match lookup("CASTELLAN_FIREWALL").map(str::to_ascii_lowercase).as_deref() {
            None | Some("ufw") => FirewallBackend::Ufw,
            Some("none" | "off") => FirewallBackend::Disabled,
            Some(other) => {
                return Err(AppError::invalid("CASTELLAN_FIREWALL", "unknown_backend", other));
            }
        };

        let forwarded = vars
            .iter()
            .filter(|(key, _)| key.as_str() != ENV_BOOTSTRAP_PASSWORD)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            config_path: PathBuf::from(
                lookup("CASTELLAN_CONFIG_PATH").unwrap_or(DEFAULT_CONFIG_PATH),
            ),
            backup_dir: PathBuf::from(lookup("CASTELLAN_BACKUP_DIR").unwrap_or(DEFAULT_BACKUP_DIR)),
            backup_keep,
            lock_policy,
            service_unit: lookup("CASTELLAN_SERVICE").unwrap_or(DEFAULT_SERVICE).to_string(),
            console_unit: lookup("CASTELLAN_CONSOLE_SERVICE")
                .unwrap_or(DEFAULT_CONSOLE_SERVICE)
                .to_string(),
            bind,
            data_dir: PathBuf::from(lookup("CASTELLAN_DATA_DIR").unwrap_or(DEFAULT_DATA_DIR)),
            health_url: health_url.to_string(),
            restart_timeout: Duration::from_secs(restart_timeout),
            session_idle: Duration::from_secs(session_idle),
            allow_registration,
            release_feed: release_feed.to_string(),
            firewall,
            log_format: LogFormat::parse_or_infer(lookup("CASTELLAN_LOG_FORMAT")),
            bootstrap_password: lookup(ENV_BOOTSTRAP_PASSWORD).map(str::to_string),
            forwarded,
        })
    }

    /// Console variables handed to the `finalize-update` helper so it sees
    /// the same installation. The bootstrap password is never forwarded.
    #[must_use]
    pub fn forwarded_env(&self) -> Vec<(String, String)> {
        self.forwarded.clone()
    }

    /// Console liveness URL used to judge a freshly swapped binary.
    #[must_use]
    pub fn console_health_url(&self) -> String {
        format!("http://127.0.0.1:{}/health", self.bind.port())
    }
}

fn parse_positive(field: &'static str, value: &str) -> AppResult<u64> {
    match value.parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(AppError::invalid(field, "not_a_positive_integer", value)),
    }
}

fn parse_flag(field: &'static str, value: &str) -> AppResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AppError::invalid(field, "not_a_boolean", value)),
    }
}

fn require_http(field: &'static str, value: &str) -> AppResult<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(AppError::invalid(field, "not_an_http_url", value))
    }
}
