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

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (sample media server documents and scratch layouts),
//! mocks.rs (in-memory host collaborators).

pub mod fixtures;
pub mod mocks;

pub use fixtures::{ConsoleLayout, SAMPLE_CONFIG, sample_open_rules};
pub use mocks::{
    FakeFirewall, FakeProbe, FakeReleaseFeed, FakeServiceManager, RecordingRunner, release_for,
};
