//! Durable filesystem primitives shared by the configuration store, the admin
//! directory and the self-updater, plus the recordings library.
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

pub mod atomic;
pub mod digest;
pub mod error;
pub mod listing;
pub mod recordings;

pub use atomic::{copy_atomic, write_atomic, write_new};
pub use digest::{sha256_file, sha256_hex};
pub use error::{FsOpsError, FsOpsResult};
pub use listing::{FileEntry, list_files};
pub use recordings::{
    DiskUsage, RECORDING_EXTENSIONS, RecordingFile, disk_usage, list_recordings, remove_recording,
    resolve_recording,
};
