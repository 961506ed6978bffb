//! HTTP surface of the Castellan console.
//!
//! Layout: `state.rs` (handles shared by handlers), `models.rs` (request and
//! response bodies), `http/` (router, middleware, handlers).
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

pub mod http;
pub mod models;
pub mod state;

pub use http::router::ApiServer;
pub use state::ApiState;
