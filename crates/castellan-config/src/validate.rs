//! Validation helpers and scalar parsing for media server configuration values.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;

use crate::error::{ConfigError, ConfigResult};

/// Minimum SRT passphrase length accepted by the media server.
pub const SRT_PASSPHRASE_MIN: usize = 10;
/// Maximum SRT passphrase length accepted by the media server.
pub const SRT_PASSPHRASE_MAX: usize = 79;

static DURATION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^([0-9]+(\.[0-9]+)?(ns|us|µs|ms|s|m|h|d))+$").ok());

static DURATION_PART: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)(ns|us|µs|ms|s|m|h|d)").ok());

static PLAIN_SCALAR: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_/.][A-Za-z0-9_./%-]*$").ok());

const RESERVED_WORDS: &[&str] = &[
    "yes", "no", "true", "false", "on", "off", "y", "n", "null", ".inf", ".nan",
];

/// Interpret a YAML value as an on/off flag (`yes`/`no` or a boolean).
#[must_use]
pub fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "on" => Some(true),
            "no" | "false" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Render a flag the way the media server's own sample file writes it.
#[must_use]
pub const fn render_flag(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

/// Extract the port from a listener address such as `:8554` or `0.0.0.0:8554`.
#[must_use]
pub fn parse_listen_port(address: &str) -> Option<u16> {
    let (_, port) = address.trim().rsplit_once(':')?;
    match port.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

/// Rewrite the port of a listener address, keeping any host part.
#[must_use]
pub fn with_listen_port(address: Option<&str>, port: u16) -> String {
    let host = address
        .and_then(|addr| addr.trim().rsplit_once(':'))
        .map_or("", |(host, _)| host);
    format!("{host}:{port}")
}

/// True for media server durations (`10s`, `1m30s`, `168h`, `7d`).
#[must_use]
pub fn is_duration(value: &str) -> bool {
    DURATION
        .as_ref()
        .is_some_and(|re| re.is_match(value.trim()))
}

/// Parse a media server duration such as `1h30m` or `7d`.
#[must_use]
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if !is_duration(value) {
        return None;
    }
    let mut seconds = 0.0_f64;
    for part in DURATION_PART.as_ref()?.captures_iter(value) {
        let amount: f64 = part[1].parse().ok()?;
        let unit = match &part[2] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3_600.0,
            _ => 86_400.0,
        };
        seconds += amount * unit;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// Normalise a retention value: bare numbers are seconds.
///
/// # Errors
///
/// Returns `InvalidField` when the value is neither a number nor a duration.
pub fn normalize_retention(value: &str) -> ConfigResult<String> {
    let trimmed = value.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Ok(format!("{trimmed}s"));
    }
    if is_duration(trimmed) {
        return Ok(trimmed.to_string());
    }
    Err(ConfigError::invalid_field(
        "pathDefaults",
        "recordDeleteAfter",
        Some(value),
        "expected seconds or a duration such as 168h",
    ))
}

/// Check an SRT passphrase length.
///
/// # Errors
///
/// Returns `InvalidField` when the passphrase is outside 10..=79 characters.
pub fn validate_passphrase(field: &str, value: &str) -> ConfigResult<()> {
    let len = value.chars().count();
    if (SRT_PASSPHRASE_MIN..=SRT_PASSPHRASE_MAX).contains(&len) {
        Ok(())
    } else {
        Err(ConfigError::invalid_field(
            "pathDefaults",
            field,
            None,
            "passphrase must be 10 to 79 characters",
        ))
    }
}

/// Render a string as a YAML scalar, quoting anything YAML could reinterpret
/// (numbers, booleans, leading symbols).
#[must_use]
pub fn render_scalar(value: &str) -> String {
    let lowered = value.to_ascii_lowercase();
    let plain = PLAIN_SCALAR.as_ref().is_some_and(|re| re.is_match(value));
    if plain && !RESERVED_WORDS.contains(&lowered.as_str()) {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "''"))
    }
}

/// Read a string-ish scalar (strings and numbers) from a YAML value.
#[must_use]
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(render_flag(*flag).to_string()),
        _ => None,
    }
}
