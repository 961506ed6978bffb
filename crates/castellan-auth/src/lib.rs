//! Console administrator directory: argon2-hashed identities, roles,
//! self-registration approval and idle-expiring sessions.
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

pub mod directory;
pub mod error;
pub mod model;
mod secret;
mod sessions;

pub use directory::{AdminDirectory, BOOTSTRAP_USERNAME, DirectoryOptions, MIN_PASSWORD_LEN};
pub use error::{AuthError, AuthResult};
pub use model::{AccountStatus, AdminAccount, Role, Session};
