//! Console self-update: release feed, staged download, verified swap with a
//! retained previous artifact, and a health-gated restart with automatic
//! rollback.
#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod feed;
pub mod marker;
pub mod updater;
pub mod version;

pub use error::{UpdateError, UpdateResult};
pub use feed::{
    DEFAULT_ARTIFACT_NAME, DEFAULT_RELEASE_FEED, GitHubReleaseFeed, ReleaseFeed, UpdateRelease,
};
pub use marker::{InstallMarker, PendingSwap};
pub use updater::{
    AutoUpdater, DEFAULT_HEALTH_TIMEOUT, FinalizeHandoff, FinalizeOutcome, MIN_ARTIFACT_BYTES,
    SwapReport, UpdaterHost, UpdaterOptions,
};
pub use version::{Version, is_newer};
