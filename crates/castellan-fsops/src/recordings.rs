//! Recording files written by the media server, and the space they live on.
//!
//! # Design
//! - Recordings are addressed by their path relative to the recordings root,
//!   `/`-separated, because the media server fans them out into per-stream
//!   directories where file names alone can collide.
//! - Names coming from clients are checked component by component before
//!   they touch the filesystem: no parent or root components, no hidden
//!   entries, and only recording extensions.

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use nix::sys::statvfs::statvfs;
use walkdir::WalkDir;

use crate::error::{FsOpsError, FsOpsResult};

/// File extensions the media server records to.
pub const RECORDING_EXTENSIONS: &[&str] = &["mp4", "ts"];

/// One recording under the recordings root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingFile {
    /// Path relative to the root, `/`-separated.
    pub name: String,
    /// Location on disk.
    pub path: PathBuf,
    /// Size in bytes.
    pub len: u64,
    /// Last modification time reported by the filesystem.
    pub modified: Option<SystemTime>,
}

/// Capacity of the filesystem holding a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    /// Total bytes.
    pub total: u64,
    /// Bytes in use, counting the root-reserved blocks.
    pub used: u64,
    /// Bytes available to unprivileged writers.
    pub free: u64,
}

/// Every recording under `root`, newest first.
///
/// A missing root yields an empty listing.
///
/// # Errors
///
/// Returns an error when the tree exists but cannot be traversed.
pub fn list_recordings(root: &Path) -> FsOpsResult<Vec<RecordingFile>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut recordings = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
        });
    for entry in walker {
        let entry = entry.map_err(|err| FsOpsError::walkdir("recordings.walk", root, err))?;
        if !entry.file_type().is_file() || !has_recording_extension(entry.path()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let metadata = entry
            .metadata()
            .map_err(|err| FsOpsError::walkdir("recordings.metadata", entry.path(), err))?;
        recordings.push(RecordingFile {
            name: relative_name(relative),
            path: entry.path().to_path_buf(),
            len: metadata.len(),
            modified: metadata.modified().ok(),
        });
    }
    recordings.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(recordings)
}

/// Resolve a client-supplied recording name to an existing file under `root`.
///
/// # Errors
///
/// Returns `InvalidInput` for names that could leave the root or do not name
/// a recording, and a not-found IO error when no such file exists.
pub fn resolve_recording(root: &Path, name: &str) -> FsOpsResult<PathBuf> {
    let relative = checked_name(name)?;
    let path = root.join(relative);
    let metadata =
        std::fs::metadata(&path).map_err(|err| FsOpsError::io("recordings.resolve", &path, err))?;
    if !metadata.is_file() {
        return Err(FsOpsError::invalid(
            "recording",
            "not a regular file",
            Some(name.to_string()),
        ));
    }
    Ok(path)
}

/// Delete one recording, returning the bytes freed.
///
/// # Errors
///
/// Same as [`resolve_recording`], plus IO failures while removing the file.
pub fn remove_recording(root: &Path, name: &str) -> FsOpsResult<u64> {
    let path = resolve_recording(root, name)?;
    let len = std::fs::metadata(&path)
        .map_err(|err| FsOpsError::io("recordings.remove.metadata", &path, err))?
        .len();
    std::fs::remove_file(&path).map_err(|err| FsOpsError::io("recordings.remove", &path, err))?;
    Ok(len)
}

/// Capacity of the filesystem holding `path`, or its nearest existing
/// ancestor when `path` has not been created yet.
///
/// # Errors
///
/// Returns `Nix` when `statvfs` fails.
#[allow(clippy::useless_conversion)]
pub fn disk_usage(path: &Path) -> FsOpsResult<DiskUsage> {
    let target = path
        .ancestors()
        .find(|candidate| !candidate.as_os_str().is_empty() && candidate.exists())
        .unwrap_or_else(|| Path::new("."));
    let stat = statvfs(target).map_err(|err| FsOpsError::nix("recordings.statvfs", target, err))?;
    let fragment = u64::from(stat.fragment_size());
    let total = u64::from(stat.blocks()).saturating_mul(fragment);
    let free = u64::from(stat.blocks_available()).saturating_mul(fragment);
    Ok(DiskUsage {
        total,
        used: total.saturating_sub(free),
        free,
    })
}

fn checked_name(name: &str) -> FsOpsResult<PathBuf> {
    let invalid = |reason| FsOpsError::invalid("recording", reason, Some(name.to_string()));
    let mut relative = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) if !part.to_string_lossy().starts_with('.') => {
                relative.push(part);
            }
            Component::Normal(_) => return Err(invalid("hidden entries are not recordings")),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("must stay inside the recordings directory"));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(invalid("empty name"));
    }
    if !has_recording_extension(&relative) {
        return Err(invalid("not a recording file"));
    }
    Ok(relative)
}

fn has_recording_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| RECORDING_EXTENSIONS.contains(&ext))
}

fn relative_name(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    type TestResult<T> = Result<T, Box<dyn Error>>;

    fn touch(path: &Path, bytes: &[u8], age: Duration) -> TestResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        let file = fs::File::options().write(true).open(path)?;
        file.set_modified(SystemTime::now() - age)?;
        Ok(())
    }

    #[test]
    fn listing_walks_stream_directories_newest_first() -> TestResult<()> {
        let dir = TempDir::new()?;
        let root = dir.path();
        touch(&root.join("cam1/2026-10-01_10-00-00-000000.ts"), b"old", Duration::from_secs(7_200))?;
        touch(&root.join("cam2/2026-10-01_11-00-00-000000.mp4"), b"newer", Duration::from_secs(60))?;
        touch(&root.join("cam1/notes.txt"), b"skip", Duration::ZERO)?;
        touch(&root.join(".staging/partial.ts"), b"skip", Duration::ZERO)?;

        let recordings = list_recordings(root)?;
        let names: Vec<_> = recordings.iter().map(|rec| rec.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["cam2/2026-10-01_11-00-00-000000.mp4", "cam1/2026-10-01_10-00-00-000000.ts"]
        );
        assert_eq!(recordings[0].len, 5);
        assert!(list_recordings(&root.join("absent"))?.is_empty());
        Ok(())
    }

    #[test]
    fn names_cannot_escape_the_root() -> TestResult<()> {
        let dir = TempDir::new()?;
        let root = dir.path().join("recordings");
        touch(&root.join("cam1/a.ts"), b"a", Duration::ZERO)?;
        touch(&dir.path().join("secret.ts"), b"s", Duration::ZERO)?;

        assert_eq!(resolve_recording(&root, "cam1/a.ts")?, root.join("cam1/a.ts"));
        for name in ["../secret.ts", "/etc/passwd.ts", "cam1/../../secret.ts", ".hidden.ts", "cam1", ""] {
            assert!(
                matches!(resolve_recording(&root, name), Err(FsOpsError::InvalidInput { .. })),
                "{name:?} should be refused"
            );
        }
        assert!(resolve_recording(&root, "cam1/missing.ts").is_err_and(|err| err.is_not_found()));
        Ok(())
    }

    #[test]
    fn removing_reports_the_bytes_freed() -> TestResult<()> {
        let dir = TempDir::new()?;
        touch(&dir.path().join("cam1/a.ts"), b"12345", Duration::ZERO)?;

        assert_eq!(remove_recording(dir.path(), "cam1/a.ts")?, 5);
        assert!(!dir.path().join("cam1/a.ts").exists());
        assert!(remove_recording(dir.path(), "cam1/a.ts").is_err());
        Ok(())
    }

    #[test]
    fn disk_usage_falls_back_to_an_existing_ancestor() -> TestResult<()> {
        let dir = TempDir::new()?;
        let usage = disk_usage(&dir.path().join("not/yet/created"))?;
        assert!(usage.total > 0);
        assert!(usage.free <= usage.total);
        assert_eq!(usage.used + usage.free, usage.total);
        Ok(())
    }
}
