//! Admission middleware for protected routes.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{debug, info};

use super::headers::{apply_rate_limit_headers, retry_after_secs};
use crate::ratelimit::{Admission, AdmissionControl};

/// Key used when no client address can be determined.
const UNKNOWN_CALLER: &str = "unknown";

/// Body of a `429 Too Many Requests` response.
#[derive(Debug, Serialize)]
struct RateLimitedBody<'a> {
    error: &'a str,
    tier: &'a str,
    retry_after_secs: u64,
}

/// State for [`enforce_admission`].
#[derive(Clone)]
pub struct AdmissionState {
    /// Admission control run for every protected request
    pub control: Arc<dyn AdmissionControl>,
    /// Key callers on `X-Forwarded-For`/`X-Real-IP` instead of the peer
    pub trust_forwarded_headers: bool,
}

impl AdmissionState {
    /// Key callers on their peer address only.
    pub fn new(control: Arc<dyn AdmissionControl>) -> Self {
        Self {
            control,
            trust_forwarded_headers: false,
        }
    }

    /// Set whether forwarding headers identify the caller.
    ///
    /// Only enable this behind a proxy that overwrites those headers;
    /// otherwise clients choose their own key.
    pub fn trust_forwarded_headers(mut self, trust: bool) -> Self {
        self.trust_forwarded_headers = trust;
        self
    }
}

/// Derive the caller key for a request.
///
/// With `trust_forwarded` set, prefers the first entry of `X-Forwarded-For`,
/// then `X-Real-IP`. Falls back to the peer address.
pub fn caller_key(headers: &HeaderMap, peer: Option<IpAddr>, trust_forwarded: bool) -> String {
    let forwarded = || {
        headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split(',').map(str::trim).find(|ip| !ip.is_empty()))
    };

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    };

    let from_headers = if trust_forwarded {
        forwarded().or_else(real_ip)
    } else {
        None
    };

    match from_headers {
        Some(ip) => ip.to_string(),
        None => peer
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_CALLER.to_string()),
    }
}

/// Run tiered admission before the inner handler.
///
/// Rejections short-circuit with `429` and the rejecting tier's headers.
/// Admitted responses carry the headers of the most constrained tier.
pub async fn enforce_admission(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let key = caller_key(request.headers(), peer, state.trust_forwarded_headers);

    match state.control.admit(&key) {
        Admission::Admitted { status } => {
            debug!(key = %key, path = %request.uri().path(), "Request admitted");
            let mut response = next.run(request).await;
            if let Some(status) = status {
                apply_rate_limit_headers(response.headers_mut(), &status, false);
            }
            response
        }
        Admission::Rejected { status, message } => {
            info!(
                key = %key,
                tier = %status.name,
                limit = status.limit,
                reset_at = status.reset_at,
                "Request rejected by rate limit"
            );

            let body = RateLimitedBody {
                error: &message,
                tier: &status.name,
                retry_after_secs: retry_after_secs(&status),
            };
            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            apply_rate_limit_headers(response.headers_mut(), &status, true);
            response
        }
    }
}
