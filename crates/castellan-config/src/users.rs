//! Streaming credential records stored under `authInternalUsers`.
//!
//! # Design
//! - `StreamingUser` is the console-facing shape; `UserRecord` is the exact
//!   YAML shape the media server reads. Labels live outside the YAML tree as
//!   comment lines and are attached by the document reader.
//! - Secrets round-trip verbatim: digit-only secrets are kept as text and
//!   written quoted so YAML never turns them into numbers.
//! - Built-in identities are recognised structurally, not by position.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{ConfigError, ConfigResult};

/// Name the media server treats as "any client".
pub const ANY_USER: &str = "any";
/// Label that marks the public-access group.
pub const PUBLIC_LABEL: &str = "Public";
/// Path the hidden test-stream viewer is scoped to.
pub const TEST_STREAM_PATH: &str = "teststream";
/// Account used by the embedded HLS player.
pub const HLS_VIEWER: &str = "hlsviewer";

const SECTION: &str = "authInternalUsers";

/// Action a streaming user may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Watch live streams.
    Read,
    /// Push streams.
    Publish,
    /// Play back recordings.
    Playback,
    /// Call the control API.
    Api,
}

impl Action {
    /// Wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Publish => "publish",
            Self::Playback => "playback",
            Self::Api => "api",
        }
    }
}

/// One permission grant, optionally scoped to a stream path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Permission {
    /// Granted action.
    pub action: Action,
    /// Path (or `~regex`) the grant is limited to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Permission {
    /// Unscoped grant.
    #[must_use]
    pub const fn any_path(action: Action) -> Self {
        Self { action, path: None }
    }

    /// Grant scoped to one path.
    #[must_use]
    pub fn scoped(action: Action, path: impl Into<String>) -> Self {
        Self {
            action,
            path: Some(path.into()),
        }
    }
}

/// Credential secret kept exactly as the operator typed it.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret text.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// True when no secret is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(<empty>)")
        } else {
            f.write_str("Secret(<redacted>)")
        }
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SecretVisitor;

        impl Visitor<'_> for SecretVisitor {
            type Value = Secret;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or numeric secret")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Secret, E> {
                Ok(Secret::new(v))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Secret, E> {
                Ok(Secret(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Secret, E> {
                Ok(Secret(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Secret, E> {
                Ok(Secret(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Secret, E> {
                Ok(Secret(v.to_string()))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Secret, E> {
                Ok(Secret::default())
            }

            fn visit_none<E: de::Error>(self) -> Result<Secret, E> {
                Ok(Secret::default())
            }
        }

        deserializer.deserialize_any(SecretVisitor)
    }
}

/// Streaming credential as presented to console operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingUser {
    /// Login name (`any` matches every client).
    pub name: String,
    /// Credential secret.
    #[serde(default)]
    pub secret: Secret,
    /// Group or agency label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Granted permissions.
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// Client IP allow-list (addresses or CIDRs); empty means unrestricted.
    #[serde(default)]
    pub ips: Vec<String>,
}

impl StreamingUser {
    /// Identity key used to tell `any` entries apart.
    #[must_use]
    pub fn selector(&self) -> UserSelector {
        UserSelector {
            name: self.name.clone(),
            ips: self.ips.clone(),
            paths: permission_paths(&self.permissions).into_iter().collect(),
        }
    }

    /// Which built-in identity this record is, if any.
    #[must_use]
    pub fn built_in(&self) -> Option<BuiltIn> {
        if self.name == HLS_VIEWER {
            return Some(BuiltIn::HlsViewer);
        }
        if self.name != ANY_USER {
            return None;
        }
        if self.ips.iter().any(|ip| is_loopback_entry(ip)) {
            return Some(BuiltIn::LocalhostExemption);
        }
        let scoped_to_test_stream = !self.permissions.is_empty()
            && self
                .permissions
                .iter()
                .all(|perm| perm.path.as_deref() == Some(TEST_STREAM_PATH));
        if self.ips.is_empty() && scoped_to_test_stream {
            return Some(BuiltIn::TestStreamViewer);
        }
        None
    }

    /// Anonymous entry opening every path to read, publish and playback.
    #[must_use]
    pub fn public_access() -> Self {
        Self {
            name: ANY_USER.to_string(),
            secret: Secret::default(),
            label: Some(PUBLIC_LABEL.to_string()),
            permissions: vec![
                Permission::any_path(Action::Read),
                Permission::any_path(Action::Publish),
                Permission::any_path(Action::Playback),
            ],
            ips: Vec::new(),
        }
    }

    /// Hidden anonymous viewer limited to the test stream.
    #[must_use]
    pub fn test_stream_viewer() -> Self {
        Self {
            name: ANY_USER.to_string(),
            secret: Secret::default(),
            label: None,
            permissions: vec![Permission::scoped(Action::Read, TEST_STREAM_PATH)],
            ips: Vec::new(),
        }
    }

    /// True when this entry grants anonymous, unrestricted access.
    #[must_use]
    pub fn is_public_access(&self) -> bool {
        self.name == ANY_USER
            && self.secret.is_empty()
            && self.ips.is_empty()
            && !self.permissions.is_empty()
            && self.permissions.iter().all(|perm| perm.path.is_none())
    }

    pub(crate) fn from_record(record: UserRecord, label: Option<String>) -> Self {
        Self {
            name: record.user,
            secret: record.pass,
            label,
            permissions: record.permissions,
            ips: record.ips,
        }
    }

    pub(crate) fn to_record(&self) -> UserRecord {
        UserRecord {
            user: self.name.clone(),
            pass: self.secret.clone(),
            ips: self.ips.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

/// Protected streaming identities the console itself depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltIn {
    /// `any` from loopback; used by the local transcoder and API.
    LocalhostExemption,
    /// Hidden `any` viewer scoped to the test stream.
    TestStreamViewer,
    /// Account used by the embedded HLS player.
    HlsViewer,
}

/// Identifies one streaming user. For `any` entries the IP list and the set of
/// permission paths disambiguate; for named users only the name counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSelector {
    /// User name.
    pub name: String,
    /// IP allow-list (order-insensitive).
    #[serde(default)]
    pub ips: Vec<String>,
    /// Distinct permission paths (order-insensitive); empty for unscoped users.
    #[serde(default)]
    pub paths: Vec<String>,
}

impl UserSelector {
    /// Selector for a named (non-`any`) user.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ips: Vec::new(),
            paths: Vec::new(),
        }
    }

    /// True when `user` is the record this selector names.
    #[must_use]
    pub fn matches(&self, user: &StreamingUser) -> bool {
        if self.name != user.name {
            return false;
        }
        if self.name != ANY_USER {
            return true;
        }
        sorted(&self.ips) == sorted(&user.ips)
            && self.paths.iter().cloned().collect::<BTreeSet<_>>()
                == permission_paths(&user.permissions)
    }
}

/// Exact YAML shape of one `authInternalUsers` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct UserRecord {
    pub(crate) user: String,
    #[serde(default)]
    pub(crate) pass: Secret,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub(crate) ips: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub(crate) permissions: Vec<Permission>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Validate one user record in isolation.
///
/// # Errors
///
/// Returns `InvalidField` describing the first offending field.
pub fn validate_user(user: &StreamingUser) -> ConfigResult<()> {
    let name = user.name.as_str();
    if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ConfigError::invalid_field(
            SECTION,
            "user",
            Some(name),
            "name must be non-empty without whitespace",
        ));
    }
    if name != ANY_USER && user.secret.is_empty() {
        return Err(ConfigError::invalid_field(
            SECTION,
            "pass",
            Some(name),
            "named users require a secret",
        ));
    }
    if user.secret.expose().contains(['\n', '\r']) {
        return Err(ConfigError::invalid_field(
            SECTION,
            "pass",
            Some(name),
            "secret must be a single line",
        ));
    }
    if user.permissions.is_empty() {
        return Err(ConfigError::invalid_field(
            SECTION,
            "permissions",
            Some(name),
            "at least one permission is required",
        ));
    }
    for perm in &user.permissions {
        if let Some(path) = perm.path.as_deref()
            && (path.trim().is_empty() || path.contains(['\n', '\r']))
        {
            return Err(ConfigError::invalid_field(
                SECTION,
                "permissions.path",
                Some(path),
                "path scope must be a non-empty single line",
            ));
        }
    }
    for ip in &user.ips {
        validate_ip_entry(ip)?;
    }
    if let Some(label) = user.label.as_deref()
        && (label.trim().is_empty() || label.contains(['\n', '\r']))
    {
        return Err(ConfigError::invalid_field(
            SECTION,
            "label",
            Some(label),
            "label must be a non-empty single line",
        ));
    }
    Ok(())
}

/// Validate a whole user list: per-record rules, identity uniqueness, and the
/// single public group.
///
/// # Errors
///
/// Returns `InvalidField` or `DuplicateUser` for the first violation found.
pub fn validate_user_list(users: &[StreamingUser]) -> ConfigResult<()> {
    let mut seen: Vec<UserSelector> = Vec::with_capacity(users.len());
    let mut public_groups = 0_usize;
    for user in users {
        validate_user(user)?;
        if seen.iter().any(|selector| selector.matches(user)) {
            return Err(ConfigError::DuplicateUser {
                name: user.name.clone(),
            });
        }
        seen.push(user.selector());
        if user
            .label
            .as_deref()
            .is_some_and(|label| label.trim().eq_ignore_ascii_case(PUBLIC_LABEL))
        {
            public_groups += 1;
        }
    }
    if public_groups > 1 {
        return Err(ConfigError::invalid_field(
            SECTION,
            "label",
            Some(PUBLIC_LABEL),
            "only one public group is allowed",
        ));
    }
    Ok(())
}

/// Check an IP allow-list entry: a bare address or `address/prefix`.
///
/// # Errors
///
/// Returns `InvalidField` when the entry is malformed.
pub fn validate_ip_entry(entry: &str) -> ConfigResult<()> {
    let invalid = || ConfigError::invalid_field(SECTION, "ips", Some(entry), "not an IP address or CIDR");
    let (addr, prefix) = match entry.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (entry, None),
    };
    let addr: IpAddr = addr.trim().parse().map_err(|_| invalid())?;
    if let Some(prefix) = prefix {
        let bits: u8 = prefix.parse().map_err(|_| invalid())?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if bits > max {
            return Err(invalid());
        }
    }
    Ok(())
}

fn is_loopback_entry(entry: &str) -> bool {
    let addr = entry.split_once('/').map_or(entry, |(addr, _)| addr);
    addr.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback() && ip.is_ipv4())
}

fn permission_paths(permissions: &[Permission]) -> BTreeSet<String> {
    permissions
        .iter()
        .filter_map(|perm| perm.path.clone())
        .collect()
}

fn sorted(values: &[String]) -> Vec<&str> {
    let mut out: Vec<&str> = values.iter().map(String::as_str).collect();
    out.sort_unstable();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str, secret: &str, ips: &[&str], permissions: Vec<Permission>) -> StreamingUser {
        StreamingUser {
            name: name.to_string(),
            secret: Secret::new(secret),
            label: None,
            permissions,
            ips: ips.iter().map(|ip| (*ip).to_string()).collect(),
        }
    }

    #[test]
    fn built_ins_are_recognised_structurally() {
        let localhost = user("any", "", &["127.0.0.1", "::1"], vec![Permission::any_path(Action::Api)]);
        let test_viewer = user("any", "", &[], vec![Permission::scoped(Action::Read, TEST_STREAM_PATH)]);
        let hls = user(HLS_VIEWER, "pw", &[], vec![Permission::any_path(Action::Read)]);
        let public = user("any", "", &[], vec![Permission::any_path(Action::Read)]);

        assert_eq!(localhost.built_in(), Some(BuiltIn::LocalhostExemption));
        assert_eq!(test_viewer.built_in(), Some(BuiltIn::TestStreamViewer));
        assert_eq!(hls.built_in(), Some(BuiltIn::HlsViewer));
        assert_eq!(public.built_in(), None);
        assert!(public.is_public_access());
        assert!(!test_viewer.is_public_access());
    }

    #[test]
    fn any_users_are_distinguished_by_ips_and_paths() -> ConfigResult<()> {
        let users = vec![
            user("any", "", &[], vec![Permission::any_path(Action::Read)]),
            user("any", "", &[], vec![Permission::scoped(Action::Read, TEST_STREAM_PATH)]),
            user("any", "", &["127.0.0.1"], vec![Permission::any_path(Action::Publish)]),
            user("camera1", "123456", &[], vec![Permission::any_path(Action::Publish)]),
        ];
        validate_user_list(&users)?;

        let selector = UserSelector {
            name: "any".to_string(),
            ips: Vec::new(),
            paths: vec![TEST_STREAM_PATH.to_string()],
        };
        assert_eq!(users.iter().filter(|u| selector.matches(u)).count(), 1);
        Ok(())
    }

    #[test]
    fn duplicate_named_users_are_rejected() {
        let users = vec![
            user("camera1", "a", &[], vec![Permission::any_path(Action::Publish)]),
            user("camera1", "b", &["10.0.0.0/8"], vec![Permission::any_path(Action::Read)]),
        ];
        assert!(matches!(
            validate_user_list(&users),
            Err(ConfigError::DuplicateUser { name }) if name == "camera1"
        ));
    }

    #[test]
    fn only_one_public_group() {
        let mut first = user("alice", "a", &[], vec![Permission::any_path(Action::Read)]);
        first.label = Some("Public".to_string());
        let mut second = user("bob", "b", &[], vec![Permission::any_path(Action::Read)]);
        second.label = Some("public".to_string());
        assert!(matches!(
            validate_user_list(&[first, second]),
            Err(ConfigError::InvalidField { reason: "only one public group is allowed", .. })
        ));
    }

    #[test]
    fn ip_entries_are_checked() {
        assert!(validate_ip_entry("192.168.1.10").is_ok());
        assert!(validate_ip_entry("10.0.0.0/8").is_ok());
        assert!(validate_ip_entry("fd00::/64").is_ok());
        assert!(validate_ip_entry("10.0.0.0/33").is_err());
        assert!(validate_ip_entry("camera.local").is_err());
        assert!(validate_ip_entry("10.0.0.1/abc").is_err());
    }

    #[test]
    fn numeric_secret_is_accepted_verbatim() -> Result<(), serde_yaml::Error> {
        let record: UserRecord = serde_yaml::from_str("user: cam\npass: 00123\npermissions:\n- action: publish\n")?;
        let user = StreamingUser::from_record(record, None);
        assert!(validate_user(&user).is_ok());

        let quoted: UserRecord = serde_yaml::from_str("user: cam\npass: '00123'\n")?;
        assert_eq!(quoted.pass.expose(), "00123");
        Ok(())
    }

    #[test]
    fn named_user_needs_secret_and_permissions() {
        let no_secret = user("cam", "", &[], vec![Permission::any_path(Action::Read)]);
        assert!(validate_user(&no_secret).is_err());
        let no_perms = user("cam", "pw", &[], Vec::new());
        assert!(validate_user(&no_perms).is_err());
    }

    #[test]
    fn unknown_actions_fail_to_parse() {
        let parsed: Result<Permission, _> = serde_yaml::from_str("action: metrics\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn secret_debug_is_redacted() {
        assert_eq!(format!("{:?}", Secret::new("hunter2")), "Secret(<redacted>)");
    }
}
