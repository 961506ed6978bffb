//! Recordings the media server has written, with their retention deadline.
//!
//! The recordings root and the retention period are read from the live
//! document on every call, so a recording-settings change shows up without a
//! console restart. Relative `recordPath` values resolve against the directory
//! holding the document.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use castellan_config::ConfigStore;
use castellan_fsops::{
    FsOpsResult, RecordingFile, disk_usage, list_recordings, remove_recording, resolve_recording,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::spawn_blocking;
use tracing::info;

use crate::error::{ControlError, ControlResult};

/// A file touched this recently is treated as still being written.
pub const IN_PROGRESS_WINDOW: Duration = Duration::from_secs(10);

/// One recording as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recording {
    /// Path relative to the recordings root.
    pub name: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Last write.
    pub modified: Option<DateTime<Utc>>,
    /// When the media server will delete it; `None` when retention is off.
    pub expires_at: Option<DateTime<Utc>>,
    /// The deadline has passed and the file is due for deletion.
    pub expired: bool,
    /// The media server is still writing to it.
    pub in_progress: bool,
}

/// Space taken by recordings and left on their filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordingUsage {
    /// Recordings root.
    pub directory: PathBuf,
    /// Number of recordings.
    pub files: usize,
    /// Bytes held by recordings.
    pub recordings_bytes: u64,
    /// Filesystem size.
    pub disk_total: u64,
    /// Filesystem bytes in use.
    pub disk_used: u64,
    /// Filesystem bytes available.
    pub disk_free: u64,
}

/// Browses and prunes the recordings directory named by the live document.
#[derive(Clone)]
pub struct RecordingLibrary {
    store: Arc<ConfigStore>,
}

impl RecordingLibrary {
    /// Library over the recordings configured in `store`.
    #[must_use]
    pub const fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }

    /// Every recording, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Config` when the document cannot be read and `Recordings`
    /// when the directory cannot be walked.
    pub async fn list(&self) -> ControlResult<Vec<Recording>> {
        let (root, retention) = self.location().await?;
        let files = spawn_blocking(move || list_recordings(&root))
            .await?
            .map_err(|err| ControlError::recordings(None, err))?;
        let now = SystemTime::now();
        Ok(files
            .into_iter()
            .map(|file| describe(file, retention, now))
            .collect())
    }

    /// Path of the recording called `name`, for download.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for names outside the recordings root and
    /// `RecordingNotFound` when the file does not exist.
    pub async fn locate(&self, name: &str) -> ControlResult<PathBuf> {
        let (root, _) = self.location().await?;
        let owned = name.to_string();
        spawn_blocking(move || resolve_recording(&root, &owned))
            .await?
            .map_err(|err| ControlError::recordings(Some(name), err))
    }

    /// Delete the recording called `name`, returning the bytes freed.
    ///
    /// # Errors
    ///
    /// Same as [`Self::locate`], plus IO failures while removing the file.
    pub async fn delete(&self, name: &str) -> ControlResult<u64> {
        let (root, _) = self.location().await?;
        let owned = name.to_string();
        let freed = spawn_blocking(move || remove_recording(&root, &owned))
            .await?
            .map_err(|err| ControlError::recordings(Some(name), err))?;
        info!(recording = name, bytes = freed, "recording deleted");
        Ok(freed)
    }

    /// Recordings total and filesystem capacity.
    ///
    /// # Errors
    ///
    /// Returns `Recordings` when the directory cannot be walked or the
    /// filesystem cannot be queried.
    pub async fn usage(&self) -> ControlResult<RecordingUsage> {
        let (root, _) = self.location().await?;
        spawn_blocking(move || -> FsOpsResult<RecordingUsage> {
            let files = list_recordings(&root)?;
            let disk = disk_usage(&root)?;
            Ok(RecordingUsage {
                files: files.len(),
                recordings_bytes: files.iter().map(|file| file.len).sum(),
                disk_total: disk.total,
                disk_used: disk.used,
                disk_free: disk.free,
                directory: root,
            })
        })
        .await?
        .map_err(|err| ControlError::recordings(None, err))
    }

    async fn location(&self) -> ControlResult<(PathBuf, Option<Duration>)> {
        let settings = self.store.read().await?.recording()?;
        let root = settings.root_dir();
        let root = if root.is_absolute() {
            root
        } else {
            self.store
                .path()
                .parent()
                .map_or_else(|| root.clone(), |dir| dir.join(&root))
        };
        Ok((root, settings.retention_period()))
    }
}

fn describe(file: RecordingFile, retention: Option<Duration>, now: SystemTime) -> Recording {
    let deadline = file
        .modified
        .zip(retention)
        .and_then(|(modified, period)| modified.checked_add(period));
    let in_progress = file.modified.is_some_and(|modified| {
        now.duration_since(modified)
            .map_or(true, |age| age < IN_PROGRESS_WINDOW)
    });
    Recording {
        name: file.name,
        size_bytes: file.len,
        modified: file.modified.map(DateTime::<Utc>::from),
        expires_at: deadline.map(DateTime::<Utc>::from),
        expired: deadline.is_some_and(|deadline| deadline <= now),
        in_progress,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castellan_config::ConfigStoreOptions;
    use std::error::Error;
    use std::fs;
    use tempfile::TempDir;

    type TestResult<T> = Result<T, Box<dyn Error>>;

    fn library(dir: &TempDir, document: &str) -> TestResult<RecordingLibrary> {
        let config = dir.path().join("mediamtx.yml");
        fs::write(&config, document)?;
        let store = ConfigStore::new(ConfigStoreOptions::new(config, dir.path().join("backups")));
        Ok(RecordingLibrary::new(store))
    }

    fn age(path: &std::path::Path, by: Duration) -> TestResult<()> {
        fs::File::options()
            .write(true)
            .open(path)?
            .set_modified(SystemTime::now() - by)?;
        Ok(())
    }

    #[test]
    fn expiry_follows_retention() {
        let now = SystemTime::now();
        let file = |hours_old: u64| RecordingFile {
            name: "cam1/a.ts".to_string(),
            path: PathBuf::from("cam1/a.ts"),
            len: 1,
            modified: Some(now - Duration::from_secs(hours_old * 3_600)),
        };
        let day = Some(Duration::from_secs(24 * 3_600));

        let fresh = describe(file(1), day, now);
        assert!(!fresh.expired);
        assert!(!fresh.in_progress);
        assert!(fresh.expires_at.is_some());

        assert!(describe(file(25), day, now).expired);

        let kept = describe(file(1_000), None, now);
        assert_eq!(kept.expires_at, None);
        assert!(!kept.expired);

        assert!(describe(file(0), day, now).in_progress);
    }

    #[tokio::test]
    async fn relative_record_path_resolves_next_to_the_document() -> TestResult<()> {
        let dir = TempDir::new()?;
        let library = library(
            &dir,
            "pathDefaults:\n  record: yes\n  recordPath: ./recordings/%path/%Y-%m-%d_%H-%M-%S-%f\n  recordDeleteAfter: 1h\n",
        )?;
        let cam = dir.path().join("recordings").join("cam1");
        fs::create_dir_all(&cam)?;
        fs::write(cam.join("old.ts"), b"0123456789")?;
        age(&cam.join("old.ts"), Duration::from_secs(7_200))?;
        fs::write(cam.join("new.ts"), b"01234")?;
        age(&cam.join("new.ts"), Duration::from_secs(600))?;

        let recordings = library.list().await?;
        assert_eq!(recordings.len(), 2);
        assert_eq!(recordings[0].name, "cam1/new.ts");
        assert!(!recordings[0].expired);
        assert!(recordings[1].expired);

        let usage = library.usage().await?;
        assert_eq!(usage.files, 2);
        assert_eq!(usage.recordings_bytes, 15);
        assert!(usage.disk_total >= usage.disk_free);

        assert_eq!(library.locate("cam1/new.ts").await?, cam.join("new.ts"));
        assert_eq!(library.delete("cam1/old.ts").await?, 10);
        assert_eq!(library.list().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn bad_names_map_to_control_errors() -> TestResult<()> {
        let dir = TempDir::new()?;
        let library = library(&dir, "pathDefaults:\n  record: no\n")?;

        assert!(matches!(
            library.delete("../mediamtx.yml").await,
            Err(ControlError::InvalidInput { .. })
        ));
        assert!(matches!(
            library.locate("cam1/missing.ts").await,
            Err(ControlError::RecordingNotFound { .. })
        ));
        assert!(library.list().await?.is_empty());
        assert!(dir.path().join("mediamtx.yml").exists());
        Ok(())
    }
}
