//! Media server configuration ownership: parsing, structured and raw edits,
//! backups, atomic commits and the streaming credential registry.
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

pub mod backup;
pub mod document;
mod edit;
pub mod error;
pub mod lock;
pub mod model;
mod patch;
pub mod registry;
pub mod store;
pub mod users;
pub mod validate;

pub use backup::{BackupId, BackupInfo, BackupSet};
pub use document::ConfigDocument;
pub use error::{ConfigError, ConfigResult};
pub use lock::LockPolicy;
pub use model::{
    BasicPatch, BasicSettings, ConfigView, EncryptionMode, LogLevel, MediaPort, Protocol,
    ProtocolPatch, ProtocolSetting, RecordFormat, RecordingPatch, RecordingSettings,
    SrtPassphrasePatch, SrtPassphraseStatus, StructuredPatch, Transport,
};
pub use patch::{DEFAULT_RECORD_FORMAT, DEFAULT_RECORD_PATH};
pub use registry::{AnonymousAccess, StreamingUserRegistry};
pub use store::{CommitKind, CommitReceipt, ConfigStore, ConfigStoreOptions, ConfigTxn};
pub use users::{
    Action, BuiltIn, Permission, Secret, StreamingUser, UserSelector, validate_ip_entry,
};
