//! Shared HTTP constants (headers, problem URIs, stream settings).

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";
pub(crate) const HEADER_LAST_EVENT_ID: &str = "last-event-id";
pub(crate) const BEARER_PREFIX: &str = "Bearer ";
pub(crate) const SESSION_QUERY_KEY: &str = "session";
pub(crate) const SSE_KEEP_ALIVE_SECS: u64 = 20;

pub(crate) const PROBLEM_INTERNAL: &str = "https://castellan.dev/problems/internal";
pub(crate) const PROBLEM_UNAUTHORIZED: &str = "https://castellan.dev/problems/unauthorized";
pub(crate) const PROBLEM_FORBIDDEN: &str = "https://castellan.dev/problems/forbidden";
pub(crate) const PROBLEM_BAD_REQUEST: &str = "https://castellan.dev/problems/bad-request";
pub(crate) const PROBLEM_CONFLICT: &str = "https://castellan.dev/problems/conflict";
pub(crate) const PROBLEM_BUSY: &str = "https://castellan.dev/problems/busy";
pub(crate) const PROBLEM_CONFIG_INVALID: &str = "https://castellan.dev/problems/config-invalid";
pub(crate) const PROBLEM_CHANGE_REVERTED: &str = "https://castellan.dev/problems/change-reverted";
pub(crate) const PROBLEM_SERVICE_FAILED: &str = "https://castellan.dev/problems/service-failed";
pub(crate) const PROBLEM_RESTART_TIMEOUT: &str = "https://castellan.dev/problems/restart-timeout";
pub(crate) const PROBLEM_UPSTREAM: &str = "https://castellan.dev/problems/upstream";
pub(crate) const PROBLEM_NOT_FOUND: &str = "https://castellan.dev/problems/not-found";
