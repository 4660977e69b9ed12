//! Standard rate-limit response headers.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::ratelimit::TierStatus;

/// The tier's per-window ceiling.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Requests left in the tier's current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Window reset time, in epoch seconds.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
/// Window length, in seconds.
pub const X_RATELIMIT_WINDOW: HeaderName = HeaderName::from_static("x-ratelimit-window");

/// Write the quota headers for `status`.
///
/// Times are rounded up to whole seconds so clients never retry early.
/// When `rejected` is set, `Retry-After` is added as well.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, status: &TierStatus, rejected: bool) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(status.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(status.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(ceil_div(status.reset_at, 1_000)),
    );
    headers.insert(
        X_RATELIMIT_WINDOW,
        HeaderValue::from(ceil_div(millis(status.window.as_millis()), 1_000)),
    );

    if rejected {
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from(retry_after_secs(status)),
        );
    }
}

/// Whole seconds until the tier's window resets, rounded up.
pub(crate) fn retry_after_secs(status: &TierStatus) -> u64 {
    ceil_div(millis(status.retry_after.as_millis()), 1_000)
}

fn millis(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

fn ceil_div(value: u64, divisor: u64) -> u64 {
    value / divisor + u64::from(value % divisor != 0)
}
