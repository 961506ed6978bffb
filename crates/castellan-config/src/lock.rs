//! Per-path mutual exclusion for document mutations.
//!
//! Every store opened on the same live path shares one async mutex, so two
//! stores constructed independently still serialise their commits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

static PATH_LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// What a mutation does when another one holds the document lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockPolicy {
    /// Wait for the holder to finish.
    #[default]
    Block,
    /// Return `Busy` immediately.
    FailFast,
}

impl LockPolicy {
    /// Parse `block` or `fail-fast`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "block" => Some(Self::Block),
            "fail-fast" | "fail_fast" | "failfast" => Some(Self::FailFast),
            _ => None,
        }
    }
}

pub(crate) fn lock_for(path: &Path) -> Arc<AsyncMutex<()>> {
    let key = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .and_then(|parent| parent.canonicalize().ok())
        .zip(path.file_name())
        .map_or_else(|| path.to_path_buf(), |(parent, name)| parent.join(name));
    let mut locks = PATH_LOCKS.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(key).or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_path_shares_one_lock() {
        let a = lock_for(Path::new("/nonexistent/castellan/a.yml"));
        let b = lock_for(Path::new("/nonexistent/castellan/a.yml"));
        let c = lock_for(Path::new("/nonexistent/castellan/c.yml"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn policy_parsing() {
        assert_eq!(LockPolicy::parse("Block"), Some(LockPolicy::Block));
        assert_eq!(LockPolicy::parse("fail-fast"), Some(LockPolicy::FailFast));
        assert_eq!(LockPolicy::parse("sometimes"), None);
    }
}
