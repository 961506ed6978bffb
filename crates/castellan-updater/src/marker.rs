//! Installed-version marker persisted next to the retained artifact.

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{UpdateError, UpdateResult};

/// A swap that still has to pass its health gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSwap {
    /// Version now at the install path.
    pub target: String,
    /// Version of the retained artifact to fall back to.
    pub fallback: String,
    /// When the swap happened.
    pub swapped_at: DateTime<Utc>,
}

/// What is installed and what is retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallMarker {
    /// Version at the install path.
    pub version: String,
    /// Version of the retained previous artifact.
    #[serde(default)]
    pub previous_version: Option<String>,
    /// Swap awaiting verification.
    #[serde(default)]
    pub pending: Option<PendingSwap>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

impl InstallMarker {
    /// Marker for a fresh install of `version`.
    #[must_use]
    pub fn fresh(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            previous_version: None,
            pending: None,
            updated_at: Utc::now(),
        }
    }

    /// Load the marker, or a fresh one for `running_version` when absent.
    pub(crate) fn load(path: &Path, running_version: &str) -> UpdateResult<Self> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| UpdateError::Serde {
                operation: "marker.decode",
                source,
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::fresh(running_version)),
            Err(err) => Err(UpdateError::io("marker.read", path, err)),
        }
    }

    pub(crate) fn save(&mut self, path: &Path) -> UpdateResult<()> {
        self.updated_at = Utc::now();
        let bytes = serde_json::to_vec_pretty(self).map_err(|source| UpdateError::Serde {
            operation: "marker.encode",
            source,
        })?;
        castellan_fsops::write_atomic(path, &bytes)?;
        Ok(())
    }
}
