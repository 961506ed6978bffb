//! Timestamped backups of the live document.
//!
//! # Design
//! - Names are `<live file name>.<YYYYmmdd_HHMMSS_mmm>` in UTC, with a `-N`
//!   suffix when two backups land in the same millisecond, so the newest backup
//!   is the greatest `(timestamp, suffix)` pair.
//! - Backups are created with no-clobber semantics and never rewritten.
//! - Nothing is deleted unless a retention count is configured.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use castellan_fsops::{FsOpsError, list_files, write_new};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConfigError, ConfigResult};

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";
const MAX_COLLISIONS: u32 = 1_000;

/// Name of one backup file inside the backup directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupId(String);

impl BackupId {
    /// Backup file name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Listing entry for one backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Backup identifier.
    pub id: BackupId,
    /// Size in bytes.
    pub size: u64,
    /// File modification time.
    pub created_at: Option<DateTime<Utc>>,
}

/// Backup directory for one live document.
#[derive(Debug, Clone)]
pub struct BackupSet {
    dir: PathBuf,
    prefix: String,
    retention: Option<usize>,
}

impl BackupSet {
    /// Backups of `live_path` stored in `dir`, optionally keeping only the
    /// newest `retention` files.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, live_path: &Path, retention: Option<usize>) -> Self {
        let prefix = live_path
            .file_name()
            .map_or_else(|| "config".to_string(), |name| name.to_string_lossy().into_owned());
        Self {
            dir: dir.into(),
            prefix,
            retention: retention.filter(|keep| *keep > 0),
        }
    }

    /// Backup directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Validate a caller-supplied backup name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` for names that are not backups of this document
    /// (including anything with path separators).
    pub fn parse_id(&self, name: &str) -> ConfigResult<BackupId> {
        let reject = || ConfigError::invalid_field("backups", "id", Some(name), "not a backup name");
        if name.contains(['/', '\\']) || name.contains("..") {
            return Err(reject());
        }
        self.sort_key(name).ok_or_else(reject)?;
        Ok(BackupId(name.to_string()))
    }

    /// Store `bytes` as a new backup.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created or the file
    /// cannot be written.
    pub fn create(&self, bytes: &[u8]) -> ConfigResult<BackupId> {
        fs::create_dir_all(&self.dir)
            .map_err(|err| ConfigError::io("backup.create_dir", &self.dir, err))?;
        let stamp = Utc::now().format(STAMP_FORMAT).to_string();
        for attempt in 0..MAX_COLLISIONS {
            let name = if attempt == 0 {
                format!("{}.{stamp}", self.prefix)
            } else {
                format!("{}.{stamp}-{attempt}", self.prefix)
            };
            match write_new(&self.dir.join(&name), bytes) {
                Ok(()) => {
                    info!(backup = %name, bytes = bytes.len(), "configuration backup written");
                    self.prune();
                    return Ok(BackupId(name));
                }
                Err(FsOpsError::Io { source, .. })
                    if source.kind() == io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(ConfigError::fsops("backup.write", err)),
            }
        }
        Err(ConfigError::io(
            "backup.name",
            &self.dir,
            io::Error::new(io::ErrorKind::AlreadyExists, "backup name space exhausted"),
        ))
    }

    /// Backups, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be listed.
    pub fn list(&self) -> ConfigResult<Vec<BackupInfo>> {
        let mut entries: Vec<_> = list_files(&self.dir)
            .map_err(|err| ConfigError::fsops("backup.list", err))?
            .into_iter()
            .filter_map(|entry| self.sort_key(&entry.name).map(|key| (key, entry)))
            .collect();
        entries.sort_by(|(a, _), (b, _)| b.cmp(a));
        Ok(entries
            .into_iter()
            .map(|(_, entry)| BackupInfo {
                id: BackupId(entry.name),
                size: entry.len,
                created_at: entry.modified.map(DateTime::<Utc>::from),
            })
            .collect())
    }

    /// Most recent backup.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be listed.
    pub fn latest(&self) -> ConfigResult<Option<BackupId>> {
        Ok(self.list()?.into_iter().next().map(|info| info.id))
    }

    /// Contents of a backup.
    ///
    /// # Errors
    ///
    /// Returns `BackupNotFound` when the backup does not exist.
    pub fn read(&self, id: &BackupId) -> ConfigResult<Vec<u8>> {
        let path = self.dir.join(id.as_str());
        fs::read(&path).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                ConfigError::BackupNotFound {
                    id: id.to_string(),
                }
            } else {
                ConfigError::io("backup.read", path, err)
            }
        })
    }

    fn sort_key(&self, name: &str) -> Option<(String, u32)> {
        let stamp = name.strip_prefix(&self.prefix)?.strip_prefix('.')?;
        let (stamp, suffix) = match stamp.split_once('-') {
            Some((stamp, suffix)) => (stamp, suffix.parse().ok()?),
            None => (stamp, 0),
        };
        let well_formed = stamp.len() == 19
            && stamp
                .char_indices()
                .all(|(i, c)| if i == 8 || i == 15 { c == '_' } else { c.is_ascii_digit() });
        well_formed.then(|| (stamp.to_string(), suffix))
    }

    fn prune(&self) {
        let Some(keep) = self.retention else {
            return;
        };
        let backups = match self.list() {
            Ok(backups) => backups,
            Err(err) => {
                warn!(error = %err, "failed to list backups for retention");
                return;
            }
        };
        for stale in backups.into_iter().skip(keep) {
            let path = self.dir.join(stale.id.as_str());
            match fs::remove_file(&path) {
                Ok(()) => info!(backup = %stale.id, "backup removed by retention policy"),
                Err(err) => warn!(backup = %stale.id, error = %err, "failed to remove backup"),
            }
        }
    }
}
