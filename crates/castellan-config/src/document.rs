//! Parsed configuration document: original text plus its YAML tree.
//!
//! # Design
//! - The text is authoritative; the tree is derived and only read.
//! - Parsing checks syntax and the top-level shape. Field-level rules live in
//!   [`ConfigDocument::validate`] so a document with a bad field can still be
//!   read, shown to the operator, and repaired.

use std::collections::HashSet;

use serde_yaml::{Mapping, Value};

use crate::edit::{USERS_KEY, user_labels};
use crate::error::{ConfigError, ConfigResult};
use crate::model::{
    BasicSettings, ConfigView, EncryptionMode, LogLevel, MediaPort, Protocol, ProtocolSetting,
    RecordFormat, RecordingSettings, SrtPassphraseStatus, Transport,
};
use crate::users::{BuiltIn, StreamingUser, UserRecord, validate_user_list};
use crate::validate::{
    is_duration, parse_flag, parse_listen_port, scalar_text, validate_passphrase,
};

pub(crate) const PATH_DEFAULTS: &str = "pathDefaults";
pub(crate) const SRT_PUBLISH_PASSPHRASE: &str = "srtPublishPassphrase";
pub(crate) const SRT_READ_PASSPHRASE: &str = "srtReadPassphrase";

const RTSP_TRANSPORT_KEYS: [&str; 2] = ["rtspTransports", "protocols"];
const DEFAULT_TIMEOUT: &str = "10s";
const DEFAULT_RETENTION: &str = "1d";

/// The media server configuration document.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    text: String,
    root: Mapping,
}

impl ConfigDocument {
    /// Parse document text.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDocument` when the text is not YAML, contains duplicate
    /// keys, or is not a mapping at the top level.
    pub fn parse(text: &str) -> ConfigResult<Self> {
        let value: Value = serde_yaml::from_str(text).map_err(|err| ConfigError::InvalidDocument {
            reason: "document is not valid YAML",
            detail: Some(err.to_string()),
        })?;
        let root = match value {
            Value::Mapping(root) => root,
            Value::Null => {
                return Err(ConfigError::InvalidDocument {
                    reason: "document is empty",
                    detail: None,
                });
            }
            _ => {
                return Err(ConfigError::InvalidDocument {
                    reason: "document must be a mapping at the top level",
                    detail: None,
                });
            }
        };
        Ok(Self {
            text: text.to_string(),
            root,
        })
    }

    /// Original text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parsed top-level mapping.
    #[must_use]
    pub const fn root(&self) -> &Mapping {
        &self.root
    }

    /// Top-level value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    fn path_defaults(&self) -> ConfigResult<Option<&Mapping>> {
        match self.get(PATH_DEFAULTS) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Mapping(map)) => Ok(Some(map)),
            Some(_) => Err(ConfigError::InvalidDocument {
                reason: "pathDefaults must be a mapping",
                detail: None,
            }),
        }
    }

    fn path_default(&self, key: &str) -> ConfigResult<Option<&Value>> {
        Ok(self.path_defaults()?.and_then(|map| map.get(key)))
    }

    fn string_field(&self, key: &'static str) -> ConfigResult<Option<String>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => scalar_text(value).map(Some).ok_or_else(|| {
                ConfigError::invalid_field("document", key, None, "expected a scalar value")
            }),
        }
    }

    /// Effective per-protocol settings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` for malformed flags, addresses, or encryption modes.
    pub fn protocols(&self) -> ConfigResult<Vec<ProtocolSetting>> {
        Protocol::ALL
            .into_iter()
            .map(|protocol| self.protocol(protocol))
            .collect()
    }

    /// Effective settings for one protocol.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` for malformed flags, addresses, or encryption modes.
    pub fn protocol(&self, protocol: Protocol) -> ConfigResult<ProtocolSetting> {
        let enabled = match self.get(protocol.id()) {
            None | Some(Value::Null) => true,
            Some(value) => parse_flag(value).ok_or_else(|| {
                ConfigError::invalid_field("protocols", protocol.id(), None, "expected yes or no")
            })?,
        };
        let port = self.listen_port(protocol.address_key())?.unwrap_or(protocol.default_port());
        let secure_port = match protocol.secure_address_key() {
            Some(key) => self.listen_port(key)?.or(protocol.default_secure_port()),
            None => None,
        };
        let encryption = match protocol.encryption_key() {
            None => EncryptionMode::Disabled,
            Some(key) => self.encryption(protocol, key)?,
        };
        Ok(ProtocolSetting {
            protocol,
            enabled,
            port,
            secure_port,
            transport: protocol.transport(),
            encryption,
            media_ports: self.media_ports(protocol)?,
        })
    }

    /// UDP media listeners of `protocol`. An empty address switches a listener
    /// off, and RTSP has none when its transports exclude UDP.
    fn media_ports(&self, protocol: Protocol) -> ConfigResult<Vec<MediaPort>> {
        if protocol == Protocol::Rtsp && !self.rtsp_uses_udp() {
            return Ok(Vec::new());
        }
        let mut ports = Vec::new();
        for &(key, default_port, tls) in protocol.media_port_keys() {
            let port = match self.string_field(key)? {
                None => default_port,
                Some(address) if address.trim().is_empty() => continue,
                Some(address) => parse_listen_port(&address).ok_or_else(|| {
                    ConfigError::invalid_field(
                        "protocols",
                        key,
                        Some(&address),
                        "expected host:port",
                    )
                })?,
            };
            ports.push(MediaPort {
                port,
                transport: Transport::Udp,
                tls,
            });
        }
        Ok(ports)
    }

    fn rtsp_uses_udp(&self) -> bool {
        RTSP_TRANSPORT_KEYS
            .into_iter()
            .find_map(|key| match self.get(key) {
                Some(Value::Sequence(items)) => Some(
                    items
                        .iter()
                        .filter_map(scalar_text)
                        .any(|item| item.trim().eq_ignore_ascii_case("udp")),
                ),
                _ => None,
            })
            .unwrap_or(true)
    }

    fn listen_port(&self, key: &'static str) -> ConfigResult<Option<u16>> {
        match self.string_field(key)? {
            None => Ok(None),
            Some(address) => parse_listen_port(&address).map(Some).ok_or_else(|| {
                ConfigError::invalid_field("protocols", key, Some(&address), "expected host:port")
            }),
        }
    }

    fn encryption(&self, protocol: Protocol, key: &'static str) -> ConfigResult<EncryptionMode> {
        let Some(value) = self.get(key) else {
            return Ok(EncryptionMode::Disabled);
        };
        if let Some(flag) = parse_flag(value) {
            return Ok(if flag {
                EncryptionMode::Strict
            } else {
                EncryptionMode::Disabled
            });
        }
        let text = scalar_text(value).unwrap_or_default();
        match text.trim().to_ascii_lowercase().as_str() {
            "optional" if protocol.has_optional_encryption() => Ok(EncryptionMode::Optional),
            "strict" if protocol.has_optional_encryption() => Ok(EncryptionMode::Strict),
            _ => Err(ConfigError::invalid_field(
                "protocols",
                key,
                Some(&text),
                "expected no, optional or strict",
            )),
        }
    }

    /// General settings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` for an unknown log level or malformed timeouts.
    pub fn basic(&self) -> ConfigResult<BasicSettings> {
        let log_level = match self.string_field("logLevel")? {
            None => LogLevel::default(),
            Some(level) => LogLevel::parse(&level).ok_or_else(|| {
                ConfigError::invalid_field("basic", "logLevel", Some(&level), "unknown log level")
            })?,
        };
        let read_timeout = self.duration_field("readTimeout")?;
        let write_timeout = self.duration_field("writeTimeout")?;
        Ok(BasicSettings {
            log_level,
            read_timeout,
            write_timeout,
        })
    }

    fn duration_field(&self, key: &'static str) -> ConfigResult<String> {
        match self.string_field(key)? {
            None => Ok(DEFAULT_TIMEOUT.to_string()),
            Some(value) if is_duration(&value) => Ok(value),
            Some(value) => Err(ConfigError::invalid_field(
                "basic",
                key,
                Some(&value),
                "expected a duration such as 10s",
            )),
        }
    }

    /// Recording settings from `pathDefaults`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` for malformed recording values.
    pub fn recording(&self) -> ConfigResult<RecordingSettings> {
        let enabled = match self.path_default("record")? {
            None | Some(Value::Null) => false,
            Some(value) => parse_flag(value).ok_or_else(|| {
                ConfigError::invalid_field(PATH_DEFAULTS, "record", None, "expected yes or no")
            })?,
        };
        let path = self.path_default("recordPath")?.and_then(scalar_text);
        let format = match self.path_default("recordFormat")?.and_then(scalar_text) {
            None => None,
            Some(format) => Some(RecordFormat::parse(&format).ok_or_else(|| {
                ConfigError::invalid_field(
                    PATH_DEFAULTS,
                    "recordFormat",
                    Some(&format),
                    "expected fmp4 or mpegts",
                )
            })?),
        };
        let retention = match self.path_default("recordDeleteAfter")?.and_then(scalar_text) {
            None => DEFAULT_RETENTION.to_string(),
            Some(value) if is_duration(&value) => value,
            Some(value) => {
                return Err(ConfigError::invalid_field(
                    PATH_DEFAULTS,
                    "recordDeleteAfter",
                    Some(&value),
                    "expected a duration",
                ));
            }
        };
        Ok(RecordingSettings {
            enabled,
            path,
            format,
            retention,
        })
    }

    /// Whether SRT passphrases are configured.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDocument` when `pathDefaults` is not a mapping.
    pub fn srt_passphrases(&self) -> ConfigResult<SrtPassphraseStatus> {
        let is_set = |value: Option<&Value>| {
            value
                .and_then(scalar_text)
                .is_some_and(|text| !text.is_empty())
        };
        Ok(SrtPassphraseStatus {
            publish_set: is_set(self.path_default(SRT_PUBLISH_PASSPHRASE)?),
            read_set: is_set(self.path_default(SRT_READ_PASSPHRASE)?),
        })
    }

    /// Streaming credentials with their group labels.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` when the user list does not have the expected shape.
    pub fn users(&self) -> ConfigResult<Vec<StreamingUser>> {
        let records: Vec<UserRecord> = match self.get(USERS_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => serde_yaml::from_value(value.clone()).map_err(|err| {
                ConfigError::InvalidField {
                    section: USERS_KEY.to_string(),
                    field: "entries".to_string(),
                    value: Some(err.to_string()),
                    reason: "malformed streaming user list",
                }
            })?,
        };
        let labels = user_labels(&self.text);
        let labels = if labels.len() == records.len() {
            labels
        } else {
            vec![None; records.len()]
        };
        Ok(records
            .into_iter()
            .zip(labels)
            .map(|(record, label)| StreamingUser::from_record(record, label))
            .collect())
    }

    /// Names of the configured stream paths.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDocument` when `paths` is not a mapping.
    pub fn path_names(&self) -> ConfigResult<Vec<String>> {
        match self.get("paths") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Mapping(paths)) => Ok(paths.keys().filter_map(scalar_text).collect()),
            Some(_) => Err(ConfigError::InvalidDocument {
                reason: "paths must be a mapping",
                detail: None,
            }),
        }
    }

    /// Full structured view.
    ///
    /// # Errors
    ///
    /// Propagates the first section that fails to read.
    pub fn view(&self) -> ConfigResult<ConfigView> {
        let users = self.users()?;
        let public_access = users.iter().any(StreamingUser::is_public_access);
        let test_stream_viewer = users
            .iter()
            .any(|user| user.built_in() == Some(BuiltIn::TestStreamViewer));
        Ok(ConfigView {
            protocols: self.protocols()?,
            basic: self.basic()?,
            recording: self.recording()?,
            srt: self.srt_passphrases()?,
            users,
            paths: self.path_names()?,
            public_access,
            test_stream_viewer,
        })
    }

    /// Check every schema-known field. Commits require this to pass.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn validate(&self) -> ConfigResult<()> {
        let protocols = self.protocols()?;
        let mut ports = HashSet::new();
        for setting in protocols.iter().filter(|setting| setting.enabled) {
            for (port, transport) in setting.listening_rules() {
                if !ports.insert((port, transport)) {
                    return Err(ConfigError::invalid_field(
                        "protocols",
                        setting.protocol.address_key(),
                        Some(&port.to_string()),
                        "port already used by another protocol",
                    ));
                }
            }
        }
        self.basic()?;
        self.recording()?;
        for key in [SRT_PUBLISH_PASSPHRASE, SRT_READ_PASSPHRASE] {
            if let Some(text) = self.path_default(key)?.and_then(scalar_text)
                && !text.is_empty()
            {
                validate_passphrase(key, &text)?;
            }
        }
        validate_user_list(&self.users()?)?;
        self.path_names()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::HLS_VIEWER;

    const SAMPLE: &str = "\
logLevel: info
readTimeout: 10s
writeTimeout: 10s
rtsp: yes
rtspAddress: :8554
rtspEncryption: \"optional\"
rtmp: no
hls: yes
hlsAddress: 0.0.0.0:8888
webrtc: yes
srt: no
pathDefaults:
  record: no
  recordDeleteAfter: 168h
authInternalUsers:
# Localhost
- user: any
  pass:
  ips: ['127.0.0.1']
  permissions:
  - action: publish
  - action: api
- user: any
  pass:
  ips: []
  permissions:
  - action: read
    path: teststream
- user: hlsviewer
  pass: '0451'
  permissions:
  - action: read
paths:
  cam1:
  all_others:
";

    #[test]
    fn parse_rejects_non_mappings_and_duplicates() {
        assert!(matches!(
            ConfigDocument::parse("- a\n- b\n"),
            Err(ConfigError::InvalidDocument { .. })
        ));
        assert!(matches!(
            ConfigDocument::parse(""),
            Err(ConfigError::InvalidDocument { reason: "document is empty", .. })
        ));
        assert!(matches!(
            ConfigDocument::parse("rtsp: yes\nrtsp: no\n"),
            Err(ConfigError::InvalidDocument { .. })
        ));
        assert!(matches!(
            ConfigDocument::parse("paths: {cam1: [\n"),
            Err(ConfigError::InvalidDocument { .. })
        ));
    }

    #[test]
    fn media_ports_default_and_can_be_switched_off() -> ConfigResult<()> {
        let udp = |port| (port, Transport::Udp);
        let doc = ConfigDocument::parse("rtsp: yes\nwebrtc: yes\n")?;
        assert_eq!(
            doc.protocol(Protocol::Rtsp)?.listening_rules(),
            vec![(8554, Transport::Tcp), udp(8000), udp(8001)]
        );
        assert_eq!(
            doc.protocol(Protocol::WebRtc)?.listening_rules(),
            vec![(8889, Transport::Tcp), udp(8189)]
        );

        let doc = ConfigDocument::parse(
            "rtspTransports: [tcp]\nrtpAddress: :9000\nwebrtcLocalUDPAddress: ''\n",
        )?;
        assert!(doc.protocol(Protocol::Rtsp)?.media_ports.is_empty());
        assert!(doc.protocol(Protocol::WebRtc)?.media_ports.is_empty());

        let doc = ConfigDocument::parse("rtpAddress: :9000\nrtcpAddress: :9001\n")?;
        let rtsp = doc.protocol(Protocol::Rtsp)?;
        assert!(rtsp.listening_rules().contains(&udp(9000)));
        assert!(rtsp.listening_rules().contains(&udp(9001)));

        let clash = ConfigDocument::parse("rtpAddress: :8890\nsrt: yes\n")?;
        assert!(matches!(clash.validate(), Err(ConfigError::InvalidField { .. })));
        Ok(())
    }

    #[test]
    fn view_reads_known_sections() -> ConfigResult<()> {
        let doc = ConfigDocument::parse(SAMPLE)?;
        doc.validate()?;
        let view = doc.view()?;

        let rtsp = &view.protocols[0];
        assert!(rtsp.enabled);
        assert_eq!(rtsp.encryption, EncryptionMode::Optional);
        assert_eq!(rtsp.listening_ports(), vec![8554, 8322]);
        assert!(!view.protocols[1].enabled);
        assert_eq!(view.protocols[2].port, 8888);
        assert_eq!(view.protocols[4].port, 8890);

        assert_eq!(view.basic.log_level, LogLevel::Info);
        assert_eq!(view.recording.retention, "168h");
        assert!(!view.recording.enabled);
        assert_eq!(view.paths, vec!["cam1".to_string(), "all_others".to_string()]);
        assert!(!view.public_access);
        assert!(view.test_stream_viewer);

        assert_eq!(view.users.len(), 3);
        assert_eq!(view.users[0].label.as_deref(), Some("Localhost"));
        assert_eq!(view.users[0].built_in(), Some(BuiltIn::LocalhostExemption));
        assert_eq!(view.users[1].built_in(), Some(BuiltIn::TestStreamViewer));
        assert_eq!(view.users[2].name, HLS_VIEWER);
        assert_eq!(view.users[2].secret.expose(), "0451");
        Ok(())
    }

    #[test]
    fn validate_flags_port_collisions() -> ConfigResult<()> {
        let doc = ConfigDocument::parse("rtsp: yes\nrtspAddress: :1935\nrtmp: yes\n")?;
        assert!(matches!(
            doc.validate(),
            Err(ConfigError::InvalidField { reason: "port already used by another protocol", .. })
        ));
        let disabled = ConfigDocument::parse("rtsp: yes\nrtspAddress: :1935\nrtmp: no\n")?;
        disabled.validate()?;
        Ok(())
    }

    #[test]
    fn validate_flags_bad_fields() -> ConfigResult<()> {
        for text in [
            "rtsp: maybe\n",
            "rtspAddress: nowhere\n",
            "logLevel: chatty\n",
            "readTimeout: soon\n",
            "hlsEncryption: optional\n",
            "pathDefaults:\n  srtReadPassphrase: short\n",
            "authInternalUsers:\n- user: cam\n  pass: pw\n  permissions:\n  - action: metrics\n",
        ] {
            let doc = ConfigDocument::parse(text)?;
            assert!(doc.validate().is_err(), "expected failure for {text:?}");
        }
        Ok(())
    }
}
