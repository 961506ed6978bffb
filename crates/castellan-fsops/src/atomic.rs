//! Durable whole-file replacement.
//!
//! # Design
//! - Stage bytes in a sibling temp file so the rename never crosses filesystems.
//! - `sync_all` the staged file before rename and the parent directory after it.
//! - Carry the target's permission bits over so swapped executables stay
//!   executable. A copy onto a fresh path takes the source's bits instead.

use std::fs::{self, File, OpenOptions, Permissions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::error::{FsOpsError, FsOpsResult};

/// Replace `path` with `bytes` so readers observe either the old or the new content.
///
/// # Errors
///
/// Returns an error when the temp file cannot be written or the rename fails.
/// The live file is untouched in every failure case.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> FsOpsResult<()> {
    let mode = fs::metadata(path).ok().map(|meta| meta.permissions());
    replace(path, bytes, mode)
}

fn replace(path: &Path, bytes: &[u8], mode: Option<Permissions>) -> FsOpsResult<()> {
    let staged = stage(path, bytes, mode)?;
    if let Err(err) = fs::rename(&staged, path) {
        discard(&staged);
        return Err(FsOpsError::io("write_atomic.rename", path, err));
    }
    sync_parent(path)?;
    debug!(path = %path.display(), bytes = bytes.len(), "file replaced atomically");
    Ok(())
}

/// Create `path` with `bytes`, failing if it already exists.
///
/// The content becomes visible under its final name only once fully durable.
///
/// # Errors
///
/// Returns an `AlreadyExists` IO error when `path` exists, or any IO failure
/// encountered while staging.
pub fn write_new(path: &Path, bytes: &[u8]) -> FsOpsResult<()> {
    let staged = stage(path, bytes, None)?;
    let linked = fs::hard_link(&staged, path);
    discard(&staged);
    linked.map_err(|err| FsOpsError::io("write_new.link", path, err))?;
    sync_parent(path)
}

/// Atomically replace `destination` with the contents of `source`.
///
/// An existing destination keeps its permission bits; a new one gets the
/// source's, so copying an executable yields an executable.
///
/// # Errors
///
/// Returns an error if the source cannot be read or the replacement fails.
pub fn copy_atomic(source: &Path, destination: &Path) -> FsOpsResult<()> {
    let source_meta =
        fs::metadata(source).map_err(|err| FsOpsError::io("copy_atomic.metadata", source, err))?;
    let bytes = fs::read(source).map_err(|err| FsOpsError::io("copy_atomic.read", source, err))?;
    let mode = fs::metadata(destination)
        .map_or_else(|_| source_meta.permissions(), |meta| meta.permissions());
    replace(destination, &bytes, Some(mode))
}

fn stage(path: &Path, bytes: &[u8], mode: Option<Permissions>) -> FsOpsResult<PathBuf> {
    let parent = parent_dir(path)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| FsOpsError::InvalidInput {
            field: "path",
            reason: "path has no file name",
            value: Some(path.display().to_string()),
        })?;
    let staged = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

    let result = (|| {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staged)
            .map_err(|err| FsOpsError::io("stage.create", &staged, err))?;
        file.write_all(bytes)
            .map_err(|err| FsOpsError::io("stage.write", &staged, err))?;
        if let Some(mode) = mode {
            file.set_permissions(mode)
                .map_err(|err| FsOpsError::io("stage.permissions", &staged, err))?;
        }
        file.sync_all()
            .map_err(|err| FsOpsError::io("stage.sync", &staged, err))
    })();

    match result {
        Ok(()) => Ok(staged),
        Err(err) => {
            discard(&staged);
            Err(err)
        }
    }
}

fn parent_dir(path: &Path) -> FsOpsResult<&Path> {
    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Ok(Path::new(".")),
        Some(parent) => Ok(parent),
        None => Err(FsOpsError::InvalidInput {
            field: "path",
            reason: "path has no parent directory",
            value: Some(path.display().to_string()),
        }),
    }
}

fn discard(staged: &Path) {
    if let Err(err) = fs::remove_file(staged) {
        debug!(path = %staged.display(), error = %err, "staged file already gone");
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> FsOpsResult<()> {
    let parent = parent_dir(path)?;
    File::open(parent)
        .and_then(|dir| dir.sync_all())
        .map_err(|err| FsOpsError::io("sync_parent", parent, err))
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> FsOpsResult<()> {
    Ok(())
}
