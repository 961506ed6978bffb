//! Typed view of the schema-known parts of the media server document, and the
//! structured patches the console can apply to it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::patch::DEFAULT_RECORD_PATH;
use crate::users::{StreamingUser, UserSelector};
use crate::validate::parse_duration;

/// Streaming protocol served by the media server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// RTSP (and RTSPS).
    Rtsp,
    /// RTMP (and RTMPS).
    Rtmp,
    /// HLS over HTTP.
    Hls,
    /// WebRTC (WHIP/WHEP signalling).
    #[serde(rename = "webrtc")]
    WebRtc,
    /// SRT.
    Srt,
}

impl Protocol {
    /// Every protocol, in document order.
    pub const ALL: [Self; 5] = [Self::Rtsp, Self::Rtmp, Self::Hls, Self::WebRtc, Self::Srt];

    /// Stable identifier; also the document's enable-flag key.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Rtsp => "rtsp",
            Self::Rtmp => "rtmp",
            Self::Hls => "hls",
            Self::WebRtc => "webrtc",
            Self::Srt => "srt",
        }
    }

    /// Parse an identifier.
    #[must_use]
    pub fn parse(id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|protocol| protocol.id().eq_ignore_ascii_case(id.trim()))
    }

    /// Document key holding the plain listener address.
    #[must_use]
    pub const fn address_key(self) -> &'static str {
        match self {
            Self::Rtsp => "rtspAddress",
            Self::Rtmp => "rtmpAddress",
            Self::Hls => "hlsAddress",
            Self::WebRtc => "webrtcAddress",
            Self::Srt => "srtAddress",
        }
    }

    /// Port the media server uses when the address key is absent.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Rtsp => 8554,
            Self::Rtmp => 1935,
            Self::Hls => 8888,
            Self::WebRtc => 8889,
            Self::Srt => 8890,
        }
    }

    /// Separate TLS listener address key, for protocols that have one.
    #[must_use]
    pub const fn secure_address_key(self) -> Option<&'static str> {
        match self {
            Self::Rtsp => Some("rtspsAddress"),
            Self::Rtmp => Some("rtmpsAddress"),
            Self::Hls | Self::WebRtc | Self::Srt => None,
        }
    }

    /// Default TLS listener port.
    #[must_use]
    pub const fn default_secure_port(self) -> Option<u16> {
        match self {
            Self::Rtsp => Some(8322),
            Self::Rtmp => Some(1936),
            Self::Hls | Self::WebRtc | Self::Srt => None,
        }
    }

    /// Document key holding the encryption mode.
    #[must_use]
    pub const fn encryption_key(self) -> Option<&'static str> {
        match self {
            Self::Rtsp => Some("rtspEncryption"),
            Self::Rtmp => Some("rtmpEncryption"),
            Self::Hls => Some("hlsEncryption"),
            Self::WebRtc => Some("webrtcEncryption"),
            Self::Srt => None,
        }
    }

    /// Document keys for the TLS key and certificate paths.
    #[must_use]
    pub const fn tls_keys(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Rtsp => Some(("rtspServerKey", "rtspServerCert")),
            Self::Rtmp => Some(("rtmpServerKey", "rtmpServerCert")),
            Self::Hls => Some(("hlsServerKey", "hlsServerCert")),
            Self::WebRtc => Some(("webrtcServerKey", "webrtcServerCert")),
            Self::Srt => None,
        }
    }

    /// True when the encryption key is a three-way mode rather than a boolean.
    #[must_use]
    pub const fn has_optional_encryption(self) -> bool {
        matches!(self, Self::Rtsp | Self::Rtmp)
    }

    /// UDP media listeners that accompany the signalling listener:
    /// `(address key, default port, belongs to the TLS listener)`.
    #[must_use]
    pub const fn media_port_keys(self) -> &'static [(&'static str, u16, bool)] {
        match self {
            Self::Rtsp => &[
                ("rtpAddress", 8000, false),
                ("rtcpAddress", 8001, false),
                ("srtpAddress", 8004, true),
                ("srtcpAddress", 8005, true),
            ],
            Self::WebRtc => &[("webrtcLocalUDPAddress", 8189, false)],
            Self::Rtmp | Self::Hls | Self::Srt => &[],
        }
    }

    /// Transport the listener port needs opened.
    #[must_use]
    pub const fn transport(self) -> Transport {
        match self {
            Self::Srt => Transport::Udp,
            Self::Rtsp | Self::Rtmp | Self::Hls | Self::WebRtc => Transport::Tcp,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Layer-4 transport of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

impl Transport {
    /// Lowercase label (`tcp`/`udp`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// Transport-layer encryption policy for a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    /// Plain listener only.
    #[default]
    Disabled,
    /// Plain and TLS listeners.
    Optional,
    /// TLS listener only.
    Strict,
}

impl EncryptionMode {
    /// Value the media server expects for three-way encryption keys.
    #[must_use]
    pub const fn document_value(self) -> &'static str {
        match self {
            Self::Disabled => "no",
            Self::Optional => "optional",
            Self::Strict => "strict",
        }
    }
}

/// One protocol's effective settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSetting {
    /// Protocol.
    pub protocol: Protocol,
    /// Whether the media server serves it.
    pub enabled: bool,
    /// Plain listener port.
    pub port: u16,
    /// TLS listener port, for protocols with a separate one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_port: Option<u16>,
    /// Listener transport.
    pub transport: Transport,
    /// Encryption policy.
    pub encryption: EncryptionMode,
    /// UDP media ports (RTP/RTCP, WebRTC ICE) configured for this protocol.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_ports: Vec<MediaPort>,
}

/// A media listener next to a protocol's signalling listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPort {
    /// Port number.
    pub port: u16,
    /// Transport.
    pub transport: Transport,
    /// Served by the TLS listener rather than the plain one.
    #[serde(default)]
    pub tls: bool,
}

impl ProtocolSetting {
    /// Signalling ports the media server actually listens on for this protocol.
    #[must_use]
    pub fn listening_ports(&self) -> Vec<u16> {
        if !self.enabled {
            return Vec::new();
        }
        match (self.encryption, self.secure_port) {
            (EncryptionMode::Disabled, _) | (_, None) => vec![self.port],
            (EncryptionMode::Optional, Some(secure)) => vec![self.port, secure],
            (EncryptionMode::Strict, Some(secure)) => vec![secure],
        }
    }

    /// Every `(port, transport)` pair that must be reachable while the
    /// protocol is enabled: signalling listeners plus the media ports of the
    /// listeners that are active.
    #[must_use]
    pub fn listening_rules(&self) -> Vec<(u16, Transport)> {
        if !self.enabled {
            return Vec::new();
        }
        let tls_active = self.secure_port.is_some() && self.encryption != EncryptionMode::Disabled;
        let plain_active = !(tls_active && self.encryption == EncryptionMode::Strict);
        self.listening_ports()
            .into_iter()
            .map(|port| (port, self.transport))
            .chain(
                self.media_ports
                    .iter()
                    .filter(|media| if media.tls { tls_active } else { plain_active })
                    .map(|media| (media.port, media.transport)),
            )
            .collect()
    }

    /// Every `(port, transport)` pair this protocol could use, whatever its
    /// enable flag and encryption mode.
    #[must_use]
    pub fn all_rules(&self) -> Vec<(u16, Transport)> {
        std::iter::once(self.port)
            .chain(self.secure_port)
            .map(|port| (port, self.transport))
            .chain(self.media_ports.iter().map(|media| (media.port, media.transport)))
            .collect()
    }
}

/// Change to one protocol; `None` fields are left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolPatch {
    /// Target protocol.
    pub protocol: Protocol,
    /// New enable flag.
    #[serde(default)]
    pub enabled: Option<bool>,
    /// New plain listener port.
    #[serde(default)]
    pub port: Option<u16>,
    /// New encryption mode.
    #[serde(default)]
    pub encryption: Option<EncryptionMode>,
}

/// Media server log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational.
    #[default]
    Info,
    /// Verbose.
    Debug,
}

impl LogLevel {
    /// Document value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }

    /// Parse a document value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }
}

/// General server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicSettings {
    /// `logLevel`.
    pub log_level: LogLevel,
    /// `readTimeout`.
    pub read_timeout: String,
    /// `writeTimeout`.
    pub write_timeout: String,
}

/// Change to general settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicPatch {
    /// New `logLevel`.
    #[serde(default)]
    pub log_level: Option<LogLevel>,
    /// New `readTimeout`.
    #[serde(default)]
    pub read_timeout: Option<String>,
    /// New `writeTimeout`.
    #[serde(default)]
    pub write_timeout: Option<String>,
}

/// Container format for recordings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    /// Fragmented MP4.
    Fmp4,
    /// MPEG-TS.
    Mpegts,
}

impl RecordFormat {
    /// Document value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fmp4 => "fmp4",
            Self::Mpegts => "mpegts",
        }
    }

    /// Parse a document value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fmp4" => Some(Self::Fmp4),
            "mpegts" => Some(Self::Mpegts),
            _ => None,
        }
    }
}

/// Recording settings under `pathDefaults`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingSettings {
    /// `record`.
    pub enabled: bool,
    /// `recordPath`.
    pub path: Option<String>,
    /// `recordFormat`.
    pub format: Option<RecordFormat>,
    /// `recordDeleteAfter` (`0s` keeps recordings forever).
    pub retention: String,
}

impl RecordingSettings {
    /// Directory the media server writes recordings under: the leading part
    /// of `recordPath` before the first `%` placeholder.
    #[must_use]
    pub fn root_dir(&self) -> PathBuf {
        let template = self.path.as_deref().unwrap_or(DEFAULT_RECORD_PATH);
        Path::new(template)
            .components()
            .take_while(|component| !component.as_os_str().to_string_lossy().contains('%'))
            .collect()
    }

    /// How long recordings are kept; `None` when they are never deleted.
    #[must_use]
    pub fn retention_period(&self) -> Option<Duration> {
        parse_duration(&self.retention).filter(|period| !period.is_zero())
    }
}

/// Change to recording settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingPatch {
    /// New `record` flag.
    #[serde(default)]
    pub enabled: Option<bool>,
    /// New retention; bare numbers are seconds.
    #[serde(default)]
    pub retention: Option<String>,
    /// New `recordPath`; must contain `%path`.
    #[serde(default)]
    pub path: Option<String>,
    /// New `recordFormat`.
    #[serde(default)]
    pub format: Option<RecordFormat>,
}

/// Change to SRT passphrases. `Some("")` clears a passphrase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrtPassphrasePatch {
    /// New `srtPublishPassphrase`.
    #[serde(default)]
    pub publish: Option<String>,
    /// New `srtReadPassphrase`.
    #[serde(default)]
    pub read: Option<String>,
}

/// Whether SRT passphrases are configured; the values themselves stay hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrtPassphraseStatus {
    /// Publishers need a passphrase.
    pub publish_set: bool,
    /// Readers need a passphrase.
    pub read_set: bool,
}

/// Structured read model of the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigView {
    /// Per-protocol settings.
    pub protocols: Vec<ProtocolSetting>,
    /// General settings.
    pub basic: BasicSettings,
    /// Recording settings.
    pub recording: RecordingSettings,
    /// SRT passphrase state.
    pub srt: SrtPassphraseStatus,
    /// Streaming credentials.
    pub users: Vec<StreamingUser>,
    /// Names of configured stream paths.
    pub paths: Vec<String>,
    /// Anonymous unrestricted access is enabled.
    pub public_access: bool,
    /// The hidden test-stream viewer is present.
    pub test_stream_viewer: bool,
}

/// Schema-known change the store can apply without disturbing the rest of the
/// document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuredPatch {
    /// Protocol enable flag, port, or encryption.
    Protocol(ProtocolPatch),
    /// `logLevel` and timeouts.
    Basic(BasicPatch),
    /// Recording settings.
    Recording(RecordingPatch),
    /// SRT passphrases.
    SrtPassphrases(SrtPassphrasePatch),
    /// Append a streaming user.
    AddUser {
        /// New record.
        user: StreamingUser,
    },
    /// Replace a streaming user.
    EditUser {
        /// Record to replace.
        selector: UserSelector,
        /// Replacement.
        user: StreamingUser,
    },
    /// Remove a streaming user.
    DeleteUser {
        /// Record to remove.
        selector: UserSelector,
    },
    /// Add or remove the anonymous public-access entry.
    PublicAccess {
        /// Desired state.
        enabled: bool,
    },
    /// Add or remove the hidden test-stream viewer.
    TestStreamViewer {
        /// Desired state.
        enabled: bool,
    },
}

impl StructuredPatch {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Basic(_) => "basic",
            Self::Recording(_) => "recording",
            Self::SrtPassphrases(_) => "srt_passphrases",
            Self::AddUser { .. } => "add_user",
            Self::EditUser { .. } => "edit_user",
            Self::DeleteUser { .. } => "delete_user",
            Self::PublicAccess { .. } => "public_access",
            Self::TestStreamViewer { .. } => "test_stream_viewer",
        }
    }

    /// True when the patch can change which firewall ports must be open.
    #[must_use]
    pub const fn touches_protocols(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}
