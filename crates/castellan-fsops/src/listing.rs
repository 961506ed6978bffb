//! Flat directory listings.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::error::{FsOpsError, FsOpsResult};

/// Regular file found directly inside a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute or caller-relative path.
    pub path: PathBuf,
    /// Final path component.
    pub name: String,
    /// Size in bytes.
    pub len: u64,
    /// Last modification time reported by the filesystem.
    pub modified: Option<SystemTime>,
}

/// List the regular files directly under `dir`, skipping dot-prefixed entries.
///
/// A missing directory yields an empty listing.
///
/// # Errors
///
/// Returns an error when the directory exists but cannot be traversed.
pub fn list_files(dir: &Path) -> FsOpsResult<Vec<FileEntry>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|err| FsOpsError::walkdir("list_files.walk", dir, err))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let metadata = entry
            .metadata()
            .map_err(|err| FsOpsError::walkdir("list_files.metadata", entry.path(), err))?;
        entries.push(FileEntry {
            path: entry.path().to_path_buf(),
            name,
            len: metadata.len(),
            modified: metadata.modified().ok(),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn lists_only_visible_regular_files() -> Result<(), Box<dyn Error>> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("a.yml"), "a")?;
        fs::write(dir.path().join(".a.yml.123.tmp"), "partial")?;
        fs::create_dir(dir.path().join("nested"))?;
        fs::write(dir.path().join("nested").join("b.yml"), "b")?;

        let entries = list_files(dir.path())?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.yml");
        assert_eq!(entries[0].len, 1);
        Ok(())
    }

    #[test]
    fn missing_directory_is_empty() -> Result<(), Box<dyn Error>> {
        let dir = TempDir::new()?;
        assert!(list_files(&dir.path().join("absent"))?.is_empty());
        Ok(())
    }
}
