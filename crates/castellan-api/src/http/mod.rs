//! HTTP surface modules (router, middleware, handlers).

/// Administrator account management.
pub(crate) mod accounts;
/// Session middleware and login handlers.
pub(crate) mod auth;
/// Media server document handlers.
pub(crate) mod config;
/// Shared constants and header names.
pub(crate) mod constants;
/// Problem response helpers and error mapping.
pub(crate) mod errors;
/// Health and metrics endpoints.
pub(crate) mod health;
/// Live log streaming endpoint.
pub(crate) mod logs;
/// Protocol settings and firewall handlers.
pub(crate) mod protocols;
/// Recording browser handlers.
pub(crate) mod recordings;
/// Router construction and server host.
pub mod router;
/// Managed service and stream inventory handlers.
pub(crate) mod service;
/// Domain event streaming.
pub(crate) mod sse;
/// Streaming credential handlers.
pub(crate) mod streaming_users;
/// Metrics middleware for HTTP requests.
pub(crate) mod telemetry;
/// Console self-update handlers.
pub(crate) mod update;
