//! Transactional owner of the live media server document.
//!
//! # Design
//! - Every mutation runs under the per-path lock: compute the candidate in
//!   memory, validate it, snapshot the live bytes into a new backup, then
//!   atomically replace the live file. Rejected candidates touch neither the
//!   live file nor the backup set.
//! - Blocking filesystem work runs on the blocking pool; the async lock guard is
//!   held across it so commits never interleave.
//! - A watch channel carries the commit revision for observers that only need
//!   to know that something changed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use castellan_fsops::write_atomic;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, watch};
use tracing::{info, warn};

use crate::backup::{BackupId, BackupInfo, BackupSet};
use crate::document::ConfigDocument;
use crate::error::{ConfigError, ConfigResult};
use crate::lock::{LockPolicy, lock_for};
use crate::model::StructuredPatch;
use crate::patch;

/// Construction options for [`ConfigStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigStoreOptions {
    /// Live document path.
    pub path: PathBuf,
    /// Directory receiving backups.
    pub backup_dir: PathBuf,
    /// Behaviour under lock contention.
    pub lock_policy: LockPolicy,
    /// Keep only this many backups; `None` keeps all of them.
    pub backup_retention: Option<usize>,
}

impl ConfigStoreOptions {
    /// Options for `path` with backups stored in `backup_dir`, blocking on
    /// contention and keeping every backup.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backup_dir: backup_dir.into(),
            lock_policy: LockPolicy::Block,
            backup_retention: None,
        }
    }
}

/// How a commit changed the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitKind {
    /// Schema-known patch.
    Structured,
    /// Whole-document replacement.
    Raw,
    /// Backup restored over the live file.
    Restore,
}

impl CommitKind {
    /// Label for logs, metrics and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Raw => "raw",
            Self::Restore => "restore",
        }
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    /// Revision number after the commit.
    pub revision: u64,
    /// Backup taken immediately before the commit.
    pub backup: BackupId,
    /// Commit flavour.
    pub kind: CommitKind,
}

/// Owner of the live document and its backups.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    backups: BackupSet,
    policy: LockPolicy,
    lock: Arc<AsyncMutex<()>>,
    revision: watch::Sender<u64>,
}

impl ConfigStore {
    /// Open a store. The live file is not read until first use.
    #[must_use]
    pub fn new(options: ConfigStoreOptions) -> Arc<Self> {
        let backups = BackupSet::new(
            options.backup_dir,
            &options.path,
            options.backup_retention,
        );
        let (revision, _) = watch::channel(0);
        Arc::new(Self {
            lock: lock_for(&options.path),
            path: options.path,
            backups,
            policy: options.lock_policy,
            revision,
        })
    }

    /// Live document path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Backup set for this document.
    #[must_use]
    pub const fn backups(&self) -> &BackupSet {
        &self.backups
    }

    /// Revision counter; increments on every commit made through this store.
    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Watch commit revisions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Raw text of the live document.
    ///
    /// # Errors
    ///
    /// Returns `Io` when the file cannot be read, or `CorruptConfig` when it
    /// is not UTF-8.
    pub async fn read_text(&self) -> ConfigResult<String> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|err| ConfigError::io("config.read", &self.path, err))?;
        decode_live(&self.path, bytes)
    }

    /// Parsed live document.
    ///
    /// # Errors
    ///
    /// Returns `CorruptConfig` when the file does not parse, or `Io` when it
    /// cannot be read.
    pub async fn read(&self) -> ConfigResult<ConfigDocument> {
        let text = self.read_text().await?;
        parse_live(&self.path, &text)
    }

    /// Validate candidate text without committing it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDocument` or `InvalidField` describing the first
    /// problem found.
    pub fn validate_raw(text: &str) -> ConfigResult<ConfigDocument> {
        let doc = ConfigDocument::parse(text)?;
        doc.validate()?;
        Ok(doc)
    }

    /// Backups, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the backup directory cannot be listed.
    pub async fn list_backups(self: &Arc<Self>) -> ConfigResult<Vec<BackupInfo>> {
        let store = Arc::clone(self);
        blocking("backup.list", move || store.backups.list()).await
    }

    /// Take a backup of the live document without changing it.
    ///
    /// # Errors
    ///
    /// Returns `Busy` under the fail-fast policy, or an IO error.
    pub async fn snapshot_backup(self: &Arc<Self>) -> ConfigResult<BackupId> {
        let txn = self.begin().await?;
        let store = Arc::clone(self);
        let id = blocking("backup.snapshot", move || {
            let bytes = store.read_live_bytes()?;
            store.backups.create(&bytes)
        })
        .await?;
        drop(txn);
        Ok(id)
    }

    /// Acquire the document lock.
    ///
    /// # Errors
    ///
    /// Returns `Busy` when the policy is fail-fast and a mutation is running.
    pub async fn begin(self: &Arc<Self>) -> ConfigResult<ConfigTxn> {
        let guard = match self.policy {
            LockPolicy::Block => Arc::clone(&self.lock).lock_owned().await,
            LockPolicy::FailFast => Arc::clone(&self.lock)
                .try_lock_owned()
                .map_err(|_| ConfigError::Busy {
                    path: self.path.clone(),
                })?,
        };
        Ok(ConfigTxn {
            store: Arc::clone(self),
            _guard: guard,
            last_backup: None,
        })
    }

    /// Apply a structured patch in its own transaction.
    ///
    /// # Errors
    ///
    /// See [`ConfigTxn::apply_structured`].
    pub async fn apply_structured(self: &Arc<Self>, patch: StructuredPatch) -> ConfigResult<CommitReceipt> {
        self.begin().await?.apply_structured(patch).await
    }

    /// Replace the document text in its own transaction.
    ///
    /// # Errors
    ///
    /// See [`ConfigTxn::apply_raw`].
    pub async fn apply_raw(self: &Arc<Self>, text: String) -> ConfigResult<CommitReceipt> {
        self.begin().await?.apply_raw(text).await
    }

    /// Restore a backup in its own transaction.
    ///
    /// # Errors
    ///
    /// See [`ConfigTxn::restore`].
    pub async fn restore(self: &Arc<Self>, id: BackupId) -> ConfigResult<CommitReceipt> {
        self.begin().await?.restore(id).await
    }

    fn read_live_bytes(&self) -> ConfigResult<Vec<u8>> {
        std::fs::read(&self.path).map_err(|err| ConfigError::io("config.read", &self.path, err))
    }

    fn commit(&self, candidate: &[u8], backup: BackupId, kind: CommitKind) -> ConfigResult<CommitReceipt> {
        write_atomic(&self.path, candidate).map_err(|err| ConfigError::fsops("config.write", err))?;
        let mut revision = 0;
        self.revision.send_modify(|current| {
            *current += 1;
            revision = *current;
        });
        info!(
            revision,
            backup = %backup,
            kind = kind.as_str(),
            bytes = candidate.len(),
            "configuration committed"
        );
        Ok(CommitReceipt {
            revision,
            backup,
            kind,
        })
    }
}

/// Exclusive handle on the document for a sequence of commits.
///
/// Dropping the handle releases the lock.
#[derive(Debug)]
pub struct ConfigTxn {
    store: Arc<ConfigStore>,
    _guard: OwnedMutexGuard<()>,
    last_backup: Option<BackupId>,
}

impl ConfigTxn {
    /// Store this transaction belongs to.
    #[must_use]
    pub const fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Backup taken by the most recent commit in this transaction.
    #[must_use]
    pub const fn last_backup(&self) -> Option<&BackupId> {
        self.last_backup.as_ref()
    }

    /// Parsed live document, read under the lock.
    ///
    /// # Errors
    ///
    /// Returns `CorruptConfig` or `Io`.
    pub async fn read(&self) -> ConfigResult<ConfigDocument> {
        self.store.read().await
    }

    /// Apply a structured patch.
    ///
    /// # Errors
    ///
    /// Returns `CorruptConfig` when the live document does not parse,
    /// a validation error when the patch is rejected, or `PatchNotIsolated`
    /// when the edit would disturb other keys. The live file is unchanged in
    /// every error case.
    pub async fn apply_structured(&mut self, patch: StructuredPatch) -> ConfigResult<CommitReceipt> {
        let store = Arc::clone(&self.store);
        let label = patch.label();
        let receipt = blocking("config.apply_structured", move || {
            let bytes = store.read_live_bytes()?;
            let text = decode_live(&store.path, bytes)?;
            let current = parse_live(&store.path, &text)?;
            let base_dir = store.path.parent().unwrap_or_else(|| Path::new("."));
            let candidate = patch::apply(&current, &patch, base_dir)?;
            ConfigStore::validate_raw(&candidate)?;
            let backup = store.backups.create(text.as_bytes())?;
            store.commit(candidate.as_bytes(), backup, CommitKind::Structured)
        })
        .await
        .inspect_err(|err| warn!(patch = label, error = %err, "structured edit rejected"))?;
        self.last_backup = Some(receipt.backup.clone());
        Ok(receipt)
    }

    /// Replace the whole document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDocument` or `InvalidField` when the text is rejected;
    /// the live file is unchanged.
    pub async fn apply_raw(&mut self, text: String) -> ConfigResult<CommitReceipt> {
        let store = Arc::clone(&self.store);
        let receipt = blocking("config.apply_raw", move || {
            ConfigStore::validate_raw(&text)?;
            let bytes = store.read_live_bytes()?;
            let backup = store.backups.create(&bytes)?;
            store.commit(text.as_bytes(), backup, CommitKind::Raw)
        })
        .await
        .inspect_err(|err| warn!(error = %err, "raw edit rejected"))?;
        self.last_backup = Some(receipt.backup.clone());
        Ok(receipt)
    }

    /// Put a backup back in place. The current live file is itself backed up
    /// first, so a restore can be undone.
    ///
    /// # Errors
    ///
    /// Returns `BackupNotFound` or an IO error.
    pub async fn restore(&mut self, id: BackupId) -> ConfigResult<CommitReceipt> {
        let store = Arc::clone(&self.store);
        let receipt = blocking("config.restore", move || {
            let restored = store.backups.read(&id)?;
            let current = store.read_live_bytes()?;
            let backup = store.backups.create(&current)?;
            let check = String::from_utf8(restored.clone())
                .map_err(|_| ConfigError::InvalidDocument {
                    reason: "document is not valid UTF-8",
                    detail: None,
                })
                .and_then(|text| ConfigDocument::parse(&text));
            if let Err(err) = check {
                warn!(backup = %id, error = %err, "restoring a backup that does not parse");
            }
            info!(backup = %id, "restoring configuration backup");
            store.commit(&restored, backup, CommitKind::Restore)
        })
        .await?;
        self.last_backup = Some(receipt.backup.clone());
        Ok(receipt)
    }
}

fn decode_live(path: &Path, bytes: Vec<u8>) -> ConfigResult<String> {
    String::from_utf8(bytes).map_err(|err| ConfigError::CorruptConfig {
        path: path.to_path_buf(),
        detail: format!(
            "document is not valid UTF-8 at byte {}",
            err.utf8_error().valid_up_to()
        ),
    })
}

fn parse_live(path: &Path, text: &str) -> ConfigResult<ConfigDocument> {
    ConfigDocument::parse(text).map_err(|err| {
        let detail = match err {
            ConfigError::InvalidDocument {
                detail: Some(detail),
                ..
            } => detail,
            ConfigError::InvalidDocument { reason, .. } => reason.to_string(),
            other => other.to_string(),
        };
        ConfigError::CorruptConfig {
            path: path.to_path_buf(),
            detail,
        }
    })
}

async fn blocking<T, F>(operation: &'static str, task: F) -> ConfigResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ConfigResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|source| ConfigError::TaskJoin { operation, source })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BasicPatch, LogLevel};
    use std::error::Error;
    use tempfile::TempDir;

    type TestResult<T> = Result<T, Box<dyn Error>>;

    const DOC: &str = "logLevel: info # keep\nrtsp: yes\nrtspAddress: :8554\npaths:\n  all_others:\n";

    fn store(dir: &TempDir, policy: LockPolicy) -> TestResult<Arc<ConfigStore>> {
        let path = dir.path().join("mediamtx.yml");
        std::fs::write(&path, DOC)?;
        let mut options = ConfigStoreOptions::new(path, dir.path().join("backups"));
        options.lock_policy = policy;
        Ok(ConfigStore::new(options))
    }

    #[tokio::test]
    async fn structured_commit_backs_up_and_bumps_revision() -> TestResult<()> {
        let dir = TempDir::new()?;
        let store = store(&dir, LockPolicy::Block)?;
        let mut revisions = store.subscribe();

        let receipt = store
            .apply_structured(StructuredPatch::Basic(BasicPatch {
                log_level: Some(LogLevel::Warn),
                read_timeout: None,
                write_timeout: None,
            }))
            .await?;
        assert_eq!(receipt.revision, 1);
        assert_eq!(receipt.kind, CommitKind::Structured);
        assert!(revisions.has_changed()?);
        assert_eq!(*revisions.borrow_and_update(), 1);

        let text = store.read_text().await?;
        assert_eq!(text, DOC.replace("logLevel: info", "logLevel: warn"));
        assert_eq!(store.backups().read(&receipt.backup)?, DOC.as_bytes());
        Ok(())
    }

    #[tokio::test]
    async fn rejected_raw_edit_leaves_live_file_alone() -> TestResult<()> {
        let dir = TempDir::new()?;
        let store = store(&dir, LockPolicy::Block)?;
        let err = store
            .apply_raw("rtspAddress: :8554\nrtmpAddress: :8554\nrtmp: yes\nrtsp: yes\n".to_string())
            .await;
        assert!(matches!(err, Err(ConfigError::InvalidField { .. })));
        assert_eq!(store.read_text().await?, DOC);
        assert_eq!(store.revision(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn fail_fast_reports_busy_while_locked() -> TestResult<()> {
        let dir = TempDir::new()?;
        let store = store(&dir, LockPolicy::FailFast)?;
        let held = store.begin().await?;
        assert!(matches!(
            store.apply_raw(DOC.to_string()).await,
            Err(ConfigError::Busy { .. })
        ));
        drop(held);
        store.apply_raw(DOC.to_string()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn restore_round_trips_and_is_itself_backed_up() -> TestResult<()> {
        let dir = TempDir::new()?;
        let store = store(&dir, LockPolicy::Block)?;
        let edit = store
            .apply_raw("logLevel: debug\n".to_string())
            .await?;
        let restored = store.restore(edit.backup.clone()).await?;
        assert_eq!(store.read_text().await?, DOC);
        assert_eq!(restored.kind, CommitKind::Restore);
        assert_eq!(store.backups().read(&restored.backup)?, b"logLevel: debug\n");
        assert_eq!(store.list_backups().await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_live_document_is_reported() -> TestResult<()> {
        let dir = TempDir::new()?;
        let store = store(&dir, LockPolicy::Block)?;
        std::fs::write(store.path(), "logLevel: [unterminated\n")?;
        assert!(matches!(store.read().await, Err(ConfigError::CorruptConfig { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn non_utf8_live_document_is_corrupt_on_every_path() -> TestResult<()> {
        let dir = TempDir::new()?;
        let store = store(&dir, LockPolicy::Block)?;
        let mut bytes = b"# operator note: caf".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b"\nlogLevel: info\nreadTimeout: 10s\nwriteTimeout: 10s\n");
        std::fs::write(store.path(), &bytes)?;

        assert!(matches!(store.read_text().await, Err(ConfigError::CorruptConfig { .. })));
        assert!(matches!(store.read().await, Err(ConfigError::CorruptConfig { .. })));
        let patch = StructuredPatch::Basic(BasicPatch {
            log_level: Some(LogLevel::Debug),
            ..BasicPatch::default()
        });
        let result = store.apply_structured(patch).await;
        assert!(matches!(result, Err(ConfigError::CorruptConfig { .. })));
        assert_eq!(std::fs::read(store.path())?, bytes);
        assert!(store.list_backups().await?.is_empty());
        Ok(())
    }
}
