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

//! Castellan application bootstrap wiring.
//!
//! Layout: `settings.rs` (environment settings), `cli.rs` (subcommands),
//! `bootstrap.rs` (dependency wiring for `serve` and `finalize-update`).

/// Application bootstrap and subcommand dispatch.
pub mod bootstrap;
mod cli;
/// Application-level error type.
pub mod error;
/// Environment settings.
pub mod settings;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};
pub use settings::{ConsoleSettings, FirewallBackend};
