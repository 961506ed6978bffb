//! Structured patch application.
//!
//! A patch is turned into a handful of line edits on the current text, the
//! result is re-parsed, and two checks run before it is handed back for
//! commit: the intended fields read back with the requested values, and every
//! other top-level key is byte-for-byte the same YAML value as before.

use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::document::{ConfigDocument, PATH_DEFAULTS, SRT_PUBLISH_PASSPHRASE, SRT_READ_PASSPHRASE};
use crate::edit::{USERS_KEY, replace_users, set_nested, set_top_level};
use crate::error::{ConfigError, ConfigResult};
use crate::model::{
    BasicPatch, EncryptionMode, Protocol, ProtocolPatch, RecordFormat, RecordingPatch,
    SrtPassphrasePatch, StructuredPatch,
};
use crate::registry::{
    plan_add, plan_delete, plan_edit, plan_public_access, plan_test_stream_viewer,
};
use crate::validate::{
    is_duration, normalize_retention, render_flag, render_scalar, scalar_text, validate_passphrase,
    with_listen_port,
};

/// Recording path template used when recording is first enabled.
pub const DEFAULT_RECORD_PATH: &str = "./recordings/%path/%Y-%m-%d_%H-%M-%S-%f";
/// Recording container used when recording is first enabled.
pub const DEFAULT_RECORD_FORMAT: RecordFormat = RecordFormat::Mpegts;

#[derive(Default)]
struct Touched {
    top: Vec<String>,
    nested: Vec<String>,
}

/// Apply `patch` to `doc`, returning the candidate text.
///
/// `base_dir` resolves relative certificate paths.
pub(crate) fn apply(
    doc: &ConfigDocument,
    patch: &StructuredPatch,
    base_dir: &Path,
) -> ConfigResult<String> {
    let mut touched = Touched::default();
    let mut planned = None;
    let text = match patch {
        StructuredPatch::Protocol(change) => apply_protocol(doc, change, base_dir, &mut touched)?,
        StructuredPatch::Basic(change) => apply_basic(doc, change, &mut touched)?,
        StructuredPatch::Recording(change) => apply_recording(doc, change, &mut touched)?,
        StructuredPatch::SrtPassphrases(change) => apply_srt(doc, change, &mut touched)?,
        StructuredPatch::AddUser { user } => {
            let users = plan_add(doc.users()?, user.clone())?;
            touched.top.push(USERS_KEY.to_string());
            replace_users(doc.text(), planned.insert(users))?
        }
        StructuredPatch::EditUser { selector, user } => {
            let users = plan_edit(doc.users()?, selector, user.clone())?;
            touched.top.push(USERS_KEY.to_string());
            replace_users(doc.text(), planned.insert(users))?
        }
        StructuredPatch::DeleteUser { selector } => {
            let users = plan_delete(doc.users()?, selector)?;
            touched.top.push(USERS_KEY.to_string());
            replace_users(doc.text(), planned.insert(users))?
        }
        StructuredPatch::PublicAccess { enabled } => {
            let users = plan_public_access(doc.users()?, *enabled)?;
            touched.top.push(USERS_KEY.to_string());
            replace_users(doc.text(), planned.insert(users))?
        }
        StructuredPatch::TestStreamViewer { enabled } => {
            let users = plan_test_stream_viewer(doc.users()?, *enabled)?;
            touched.top.push(USERS_KEY.to_string());
            replace_users(doc.text(), planned.insert(users))?
        }
    };

    let candidate = ConfigDocument::parse(&text)?;
    ensure_isolated(doc.root(), candidate.root(), &touched)?;
    ensure_applied(&candidate, patch)?;
    if let Some(users) = planned {
        let expected: Vec<_> = users
            .into_iter()
            .map(|mut user| {
                user.label = user.label.map(|label| label.trim().to_string());
                user
            })
            .collect();
        if candidate.users()? != expected {
            return Err(ConfigError::PatchNotIsolated {
                field: USERS_KEY.to_string(),
            });
        }
    }
    Ok(text)
}

fn apply_protocol(
    doc: &ConfigDocument,
    change: &ProtocolPatch,
    base_dir: &Path,
    touched: &mut Touched,
) -> ConfigResult<String> {
    let protocol = change.protocol;
    let mut text = doc.text().to_string();

    if let Some(enabled) = change.enabled {
        text = set_top_level(&text, protocol.id(), render_flag(enabled))?;
        touched.top.push(protocol.id().to_string());
    }

    if let Some(port) = change.port {
        if port == 0 {
            return Err(ConfigError::invalid_field(
                "protocols",
                protocol.address_key(),
                Some("0"),
                "port must be between 1 and 65535",
            ));
        }
        let current = doc.get(protocol.address_key()).and_then(scalar_text);
        let address = with_listen_port(current.as_deref(), port);
        text = set_top_level(&text, protocol.address_key(), &render_scalar(&address))?;
        touched.top.push(protocol.address_key().to_string());
    }

    if let Some(mode) = change.encryption {
        let Some(key) = protocol.encryption_key() else {
            if mode == EncryptionMode::Disabled {
                return Ok(text);
            }
            return Err(ConfigError::invalid_field(
                "protocols",
                protocol.id(),
                Some(mode.document_value()),
                "protocol has no transport encryption",
            ));
        };
        let rendered = if protocol.has_optional_encryption() {
            render_scalar(mode.document_value())
        } else if mode == EncryptionMode::Optional {
            return Err(ConfigError::invalid_field(
                "protocols",
                key,
                Some(mode.document_value()),
                "protocol supports only disabled or strict encryption",
            ));
        } else {
            render_flag(mode == EncryptionMode::Strict).to_string()
        };
        if mode != EncryptionMode::Disabled {
            ensure_tls_material(doc, protocol, base_dir)?;
        }
        text = set_top_level(&text, key, &rendered)?;
        touched.top.push(key.to_string());
    }

    Ok(text)
}

fn ensure_tls_material(doc: &ConfigDocument, protocol: Protocol, base_dir: &Path) -> ConfigResult<()> {
    let Some((key_field, cert_field)) = protocol.tls_keys() else {
        return Ok(());
    };
    for field in [key_field, cert_field] {
        let Some(path) = doc.get(field).and_then(scalar_text).filter(|p| !p.is_empty()) else {
            return Err(ConfigError::invalid_field(
                "protocols",
                field,
                None,
                "encryption requires a certificate and key path",
            ));
        };
        let resolved = base_dir.join(&path);
        if !resolved.is_file() {
            return Err(ConfigError::invalid_field(
                "protocols",
                field,
                Some(&path),
                "certificate file not found",
            ));
        }
    }
    Ok(())
}

fn apply_basic(doc: &ConfigDocument, change: &BasicPatch, touched: &mut Touched) -> ConfigResult<String> {
    let mut text = doc.text().to_string();
    if let Some(level) = change.log_level {
        text = set_top_level(&text, "logLevel", level.as_str())?;
        touched.top.push("logLevel".to_string());
    }
    for (key, value) in [
        ("readTimeout", change.read_timeout.as_deref()),
        ("writeTimeout", change.write_timeout.as_deref()),
    ] {
        let Some(value) = value.map(str::trim) else {
            continue;
        };
        if !is_duration(value) {
            return Err(ConfigError::invalid_field(
                "basic",
                key,
                Some(value),
                "expected a duration such as 10s",
            ));
        }
        text = set_top_level(&text, key, value)?;
        touched.top.push(key.to_string());
    }
    Ok(text)
}

fn apply_recording(
    doc: &ConfigDocument,
    change: &RecordingPatch,
    touched: &mut Touched,
) -> ConfigResult<String> {
    let mut text = doc.text().to_string();
    let current = doc.recording()?;

    let mut set = |text: &str, key: &'static str, value: &str| -> ConfigResult<String> {
        touched.nested.push(key.to_string());
        set_nested(text, PATH_DEFAULTS, key, Some(value))
    };

    if let Some(path) = change.path.as_deref() {
        if !path.contains("%path") {
            return Err(ConfigError::invalid_field(
                PATH_DEFAULTS,
                "recordPath",
                Some(path),
                "recording path must contain %path",
            ));
        }
        text = set(&text, "recordPath", &render_scalar(path))?;
    }
    if let Some(format) = change.format {
        text = set(&text, "recordFormat", format.as_str())?;
    }
    if let Some(retention) = change.retention.as_deref() {
        text = set(&text, "recordDeleteAfter", &normalize_retention(retention)?)?;
    }
    if let Some(enabled) = change.enabled {
        if enabled && current.path.is_none() && change.path.is_none() {
            text = set(&text, "recordPath", &render_scalar(DEFAULT_RECORD_PATH))?;
        }
        if enabled && current.format.is_none() && change.format.is_none() {
            text = set(&text, "recordFormat", DEFAULT_RECORD_FORMAT.as_str())?;
        }
        text = set(&text, "record", render_flag(enabled))?;
    }
    Ok(text)
}

fn apply_srt(
    doc: &ConfigDocument,
    change: &SrtPassphrasePatch,
    touched: &mut Touched,
) -> ConfigResult<String> {
    let mut text = doc.text().to_string();
    for (key, value) in [
        (SRT_PUBLISH_PASSPHRASE, change.publish.as_deref()),
        (SRT_READ_PASSPHRASE, change.read.as_deref()),
    ] {
        let Some(value) = value else {
            continue;
        };
        touched.nested.push(key.to_string());
        text = if value.is_empty() {
            set_nested(&text, PATH_DEFAULTS, key, None)?
        } else {
            validate_passphrase(key, value)?;
            set_nested(&text, PATH_DEFAULTS, key, Some(&render_scalar(value)))?
        };
    }
    Ok(text)
}

fn ensure_isolated(before: &Mapping, after: &Mapping, touched: &Touched) -> ConfigResult<()> {
    let keys = before.keys().chain(after.keys());
    for key in keys {
        let name = scalar_text(key).unwrap_or_default();
        if touched.top.contains(&name) {
            continue;
        }
        let (old, new) = (before.get(key), after.get(key));
        let same = if name == PATH_DEFAULTS && !touched.nested.is_empty() {
            same_except(old, new, &touched.nested)
        } else {
            old == new
        };
        if !same {
            return Err(ConfigError::PatchNotIsolated { field: name });
        }
    }
    Ok(())
}

fn same_except(old: Option<&Value>, new: Option<&Value>, skip: &[String]) -> bool {
    let empty = Mapping::new();
    let as_map = |value: Option<&Value>| match value {
        None | Some(Value::Null) => Some(empty.clone()),
        Some(Value::Mapping(map)) => Some(map.clone()),
        Some(_) => None,
    };
    let (Some(old), Some(new)) = (as_map(old), as_map(new)) else {
        return false;
    };
    old.keys().chain(new.keys()).all(|key| {
        let name = scalar_text(key).unwrap_or_default();
        skip.contains(&name) || old.get(key) == new.get(key)
    })
}

fn ensure_applied(after: &ConfigDocument, patch: &StructuredPatch) -> ConfigResult<()> {
    let drift = |field: &str| {
        Err(ConfigError::PatchNotIsolated {
            field: field.to_string(),
        })
    };
    match patch {
        StructuredPatch::Protocol(change) => {
            let setting = after.protocol(change.protocol)?;
            if change.enabled.is_some_and(|enabled| enabled != setting.enabled) {
                return drift(change.protocol.id());
            }
            if change.port.is_some_and(|port| port != setting.port) {
                return drift(change.protocol.address_key());
            }
            if change.protocol.encryption_key().is_some()
                && change.encryption.is_some_and(|mode| mode != setting.encryption)
            {
                return drift("encryption");
            }
        }
        StructuredPatch::Basic(change) => {
            let basic = after.basic()?;
            if change.log_level.is_some_and(|level| level != basic.log_level) {
                return drift("logLevel");
            }
        }
        StructuredPatch::Recording(change) => {
            let recording = after.recording()?;
            if change.enabled.is_some_and(|enabled| enabled != recording.enabled) {
                return drift("record");
            }
            if change.format.is_some_and(|format| Some(format) != recording.format) {
                return drift("recordFormat");
            }
        }
        StructuredPatch::SrtPassphrases(change) => {
            let status = after.srt_passphrases()?;
            if change
                .publish
                .as_deref()
                .is_some_and(|value| value.is_empty() == status.publish_set)
            {
                return drift(SRT_PUBLISH_PASSPHRASE);
            }
            if change
                .read
                .as_deref()
                .is_some_and(|value| value.is_empty() == status.read_set)
            {
                return drift(SRT_READ_PASSPHRASE);
            }
        }
        StructuredPatch::AddUser { .. }
        | StructuredPatch::EditUser { .. }
        | StructuredPatch::DeleteUser { .. }
        | StructuredPatch::PublicAccess { .. }
        | StructuredPatch::TestStreamViewer { .. } => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogLevel;
    use crate::users::{Action, Permission, Secret, StreamingUser, UserSelector};
    use std::error::Error;
    use tempfile::TempDir;

    type TestResult<T> = Result<T, Box<dyn Error>>;

    const SAMPLE: &str = "\
# general
logLevel: info
rtsp: yes
rtspAddress: :8554
rtspEncryption: \"no\"
srt: no # off for now
pathDefaults:
  record: no
authInternalUsers:
- user: any
  pass:
  ips: ['127.0.0.1']
  permissions:
  - action: publish
paths:
  all_others:
";

    fn doc() -> ConfigDocument {
        ConfigDocument::parse(SAMPLE).unwrap_or_else(|err| panic!("sample must parse: {err:?}"))
    }

    #[test]
    fn enabling_a_protocol_changes_only_its_flag() -> TestResult<()> {
        let patch = StructuredPatch::Protocol(ProtocolPatch {
            protocol: Protocol::Srt,
            enabled: Some(true),
            port: Some(9100),
            encryption: None,
        });
        let text = apply(&doc(), &patch, Path::new("."))?;
        assert!(text.contains("srt: yes # off for now\n"));
        assert!(text.contains("srtAddress: ':9100'\n"));
        assert!(text.starts_with("# general\nlogLevel: info\n"));

        let after = ConfigDocument::parse(&text)?;
        let srt = after.protocol(Protocol::Srt)?;
        assert!(srt.enabled);
        assert_eq!(srt.port, 9100);
        Ok(())
    }

    #[test]
    fn encryption_requires_existing_certificates() -> TestResult<()> {
        let patch = StructuredPatch::Protocol(ProtocolPatch {
            protocol: Protocol::Rtsp,
            enabled: None,
            port: None,
            encryption: Some(EncryptionMode::Strict),
        });
        assert!(matches!(
            apply(&doc(), &patch, Path::new(".")),
            Err(ConfigError::InvalidField { reason: "encryption requires a certificate and key path", .. })
        ));

        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("server.key"), "key")?;
        std::fs::write(dir.path().join("server.crt"), "crt")?;
        let with_certs = ConfigDocument::parse(&format!(
            "{SAMPLE}rtspServerKey: server.key\nrtspServerCert: server.crt\n"
        ))?;
        let text = apply(&with_certs, &patch, dir.path())?;
        assert!(text.contains("rtspEncryption: strict\n"));
        Ok(())
    }

    #[test]
    fn srt_rejects_encryption_and_hls_rejects_optional() {
        let srt = StructuredPatch::Protocol(ProtocolPatch {
            protocol: Protocol::Srt,
            enabled: None,
            port: None,
            encryption: Some(EncryptionMode::Strict),
        });
        assert!(apply(&doc(), &srt, Path::new(".")).is_err());

        let hls = StructuredPatch::Protocol(ProtocolPatch {
            protocol: Protocol::Hls,
            enabled: None,
            port: None,
            encryption: Some(EncryptionMode::Optional),
        });
        assert!(apply(&doc(), &hls, Path::new(".")).is_err());
    }

    #[test]
    fn basic_and_recording_patches() -> TestResult<()> {
        let basic = StructuredPatch::Basic(BasicPatch {
            log_level: Some(LogLevel::Debug),
            read_timeout: Some("15s".to_string()),
            write_timeout: None,
        });
        let text = apply(&doc(), &basic, Path::new("."))?;
        assert!(text.contains("logLevel: debug\n"));
        assert!(text.contains("readTimeout: 15s\n"));

        let recording = StructuredPatch::Recording(RecordingPatch {
            enabled: Some(true),
            retention: Some("3600".to_string()),
            path: None,
            format: None,
        });
        let text = apply(&doc(), &recording, Path::new("."))?;
        let after = ConfigDocument::parse(&text)?.recording()?;
        assert!(after.enabled);
        assert_eq!(after.retention, "3600s");
        assert_eq!(after.path.as_deref(), Some(DEFAULT_RECORD_PATH));
        assert_eq!(after.format, Some(RecordFormat::Mpegts));
        Ok(())
    }

    #[test]
    fn srt_passphrases_set_and_clear() -> TestResult<()> {
        let set = StructuredPatch::SrtPassphrases(SrtPassphrasePatch {
            publish: Some("publish-secret-1".to_string()),
            read: None,
        });
        let text = apply(&doc(), &set, Path::new("."))?;
        let doc_set = ConfigDocument::parse(&text)?;
        assert!(doc_set.srt_passphrases()?.publish_set);

        let clear = StructuredPatch::SrtPassphrases(SrtPassphrasePatch {
            publish: Some(String::new()),
            read: None,
        });
        let cleared = apply(&doc_set, &clear, Path::new("."))?;
        assert!(!cleared.contains(SRT_PUBLISH_PASSPHRASE));

        let short = StructuredPatch::SrtPassphrases(SrtPassphrasePatch {
            publish: Some("short".to_string()),
            read: None,
        });
        assert!(apply(&doc(), &short, Path::new(".")).is_err());
        Ok(())
    }

    #[test]
    fn user_patches_round_trip_numeric_secret_and_label() -> TestResult<()> {
        let cam = StreamingUser {
            name: "cam1".to_string(),
            secret: Secret::new("000123"),
            label: Some("Drones".to_string()),
            permissions: vec![Permission::any_path(Action::Publish)],
            ips: Vec::new(),
        };
        let text = apply(&doc(), &StructuredPatch::AddUser { user: cam.clone() }, Path::new("."))?;
        let after = ConfigDocument::parse(&text)?;
        let users = after.users()?;
        assert_eq!(users.len(), 2);
        assert_eq!(users[1], cam);
        assert!(text.contains("paths:\n  all_others:\n"));

        let deleted = apply(
            &after,
            &StructuredPatch::DeleteUser {
                selector: UserSelector::named("cam1"),
            },
            Path::new("."),
        )?;
        assert_eq!(ConfigDocument::parse(&deleted)?.users()?.len(), 1);
        Ok(())
    }
}
