//! Test fixtures: a representative media server document and a scratch
//! directory laid out the way a console installation expects.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use castellan_config::Transport;
use castellan_control::PortRule;
use tempfile::TempDir;

/// Media server document with comments, the built-in streaming identities,
/// one labelled user and a path section.
pub const SAMPLE_CONFIG: &str = r#"###############################################
# General settings

# Verbosity of the program; available values are "error", "warn", "info", "debug".
logLevel: info
readTimeout: 10s
writeTimeout: 10s

###############################################
# Authentication

authMethod: internal
authInternalUsers:
# localhost
- user: any
  pass:
  ips: ['127.0.0.1', '::1']
  permissions:
  - action: publish
  - action: read
  - action: playback
  - action: api
# test stream
- user: any
  pass:
  ips: []
  permissions:
  - action: read
    path: teststream
- user: hlsviewer
  pass: viewer-pass
  ips: []
  permissions:
  - action: read
# Drones
- user: cam1
  pass: '000123'
  ips: ['192.168.10.0/24']
  permissions:
  - action: publish
    path: cam1

###############################################
# API

api: yes
apiAddress: 127.0.0.1:9997

###############################################
# Protocols

rtsp: yes # main ingest
rtspAddress: :8554
rtspEncryption: 'no'
rtspsAddress: :8322

rtmp: yes
rtmpAddress: :1935
rtmpEncryption: 'no'

hls: yes
hlsAddress: :8888

webrtc: yes
webrtcAddress: :8889

srt: no
srtAddress: :8890

###############################################
# Default path settings

pathDefaults:
  # Record streams to disk.
  record: no
  recordDeleteAfter: 1d

###############################################
# Path settings

paths:
  teststream:
    source: publisher
  all_others:
"#;

/// Firewall rules that match the enabled listeners of [`SAMPLE_CONFIG`],
/// media ports included.
#[must_use]
pub fn sample_open_rules() -> Vec<PortRule> {
    let tcp = [8554, 1935, 8888, 8889].map(|port| PortRule::new(port, Transport::Tcp));
    let udp = [8000, 8001, 8189].map(|port| PortRule::new(port, Transport::Udp));
    tcp.into_iter().chain(udp).collect()
}

/// Scratch installation: live document, backup directory and data directory
/// under one temporary root that is removed on drop.
#[derive(Debug)]
pub struct ConsoleLayout {
    root: TempDir,
    config_path: PathBuf,
    backup_dir: PathBuf,
    data_dir: PathBuf,
}

impl ConsoleLayout {
    /// Create a layout seeded with [`SAMPLE_CONFIG`].
    ///
    /// # Errors
    ///
    /// Returns an error when the temporary tree cannot be created.
    pub fn new() -> Result<Self> {
        Self::with_config(SAMPLE_CONFIG)
    }

    /// Create a layout whose live document holds `config`.
    ///
    /// # Errors
    ///
    /// Returns an error when the temporary tree cannot be created.
    pub fn with_config(config: &str) -> Result<Self> {
        let root = TempDir::new().context("failed to create temporary root")?;
        let config_path = root.path().join("mediamtx.yml");
        let backup_dir = root.path().join("backups");
        let data_dir = root.path().join("data");
        fs::create_dir_all(&backup_dir).context("failed to create backup directory")?;
        fs::create_dir_all(&data_dir).context("failed to create data directory")?;
        fs::write(&config_path, config).context("failed to seed configuration")?;
        Ok(Self {
            root,
            config_path,
            backup_dir,
            data_dir,
        })
    }

    /// Temporary root.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Live document path.
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Backup directory.
    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Console data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Current live document text.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read.
    pub fn config_text(&self) -> Result<String> {
        fs::read_to_string(&self.config_path).context("failed to read live configuration")
    }

    /// Names of the files in the backup directory, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be read.
    pub fn backup_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.backup_dir).context("failed to list backups")? {
            let entry = entry.context("failed to read backup entry")?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_seeded_and_removed_on_drop() -> Result<()> {
        let layout = ConsoleLayout::new()?;
        let root = layout.root().to_path_buf();
        assert_eq!(layout.config_text()?, SAMPLE_CONFIG);
        assert!(layout.backup_names()?.is_empty());
        assert!(layout.data_dir().is_dir());
        drop(layout);
        assert!(!root.exists());
        Ok(())
    }
}
