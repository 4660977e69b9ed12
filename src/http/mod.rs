//! HTTP boundary for the admission layer.
//!
//! Requests to protected routes pass through [`enforce_admission`], which
//! derives a caller key, runs tiered admission and either rejects with `429`
//! or forwards the request to the upstream completion service.

mod handlers;
mod headers;
mod middleware;
mod server;
mod upstream;

pub use headers::{
    apply_rate_limit_headers, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
    X_RATELIMIT_WINDOW,
};
pub use middleware::{caller_key, enforce_admission, AdmissionState};
pub use server::{router, HttpServer};
pub use upstream::{HttpUpstream, Upstream, UpstreamError};
